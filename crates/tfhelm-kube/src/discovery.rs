//! Cached API discovery and resource mapping
//!
//! Discovery results are fetched once per [`CachedDiscovery`] and reused.
//! [`RestMapper`] resolves the names a user types (plural, singular, kind or
//! short name, optionally qualified by group) to a concrete API resource.

use std::collections::HashMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList;
use kube::Client;
use kube::discovery::ApiResource;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::Result;

/// Discovery client with an in-memory cache
pub struct CachedDiscovery {
    client: Client,
    resources: OnceCell<Vec<APIResourceList>>,
}

impl CachedDiscovery {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resources: OnceCell::new(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// All served resources, grouped by group/version
    ///
    /// Only the preferred version of each API group is listed. A group that
    /// fails to list is skipped with a warning.
    pub async fn server_resources(&self) -> Result<Vec<APIResourceList>> {
        self.resources
            .get_or_try_init(|| self.fetch())
            .await
            .cloned()
    }

    /// Whether discovery has already been performed
    pub fn is_cached(&self) -> bool {
        self.resources.initialized()
    }

    async fn fetch(&self) -> Result<Vec<APIResourceList>> {
        let mut lists = Vec::new();

        let core = self.client.list_core_api_versions().await?;
        for version in &core.versions {
            lists.push(self.client.list_core_api_resources(version).await?);
        }

        let groups = self.client.list_api_groups().await?;
        for group in &groups.groups {
            let Some(preferred) = group
                .preferred_version
                .as_ref()
                .or_else(|| group.versions.first())
            else {
                continue;
            };
            match self
                .client
                .list_api_group_resources(&preferred.group_version)
                .await
            {
                Ok(list) => lists.push(list),
                Err(e) => warn!(
                    group_version = %preferred.group_version,
                    error = %e,
                    "skipping API group that failed discovery"
                ),
            }
        }

        debug!(groups = lists.len(), "discovery complete");
        Ok(lists)
    }
}

/// A resolved resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMapping {
    pub group: String,
    pub version: String,
    pub kind: String,
    /// Plural resource name
    pub resource: String,
    pub singular: String,
    pub short_names: Vec<String>,
    pub namespaced: bool,
}

impl ResourceMapping {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Dynamic API resource for use with `Api::<DynamicObject>`
    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: self.api_version(),
            kind: self.kind.clone(),
            plural: self.resource.clone(),
        }
    }

    fn matches(&self, name: &str) -> bool {
        self.resource == name
            || self.singular == name
            || self.kind.eq_ignore_ascii_case(name)
            || self.short_names.iter().any(|s| s == name)
    }
}

/// Maps user-facing resource names to API resources
#[derive(Debug, Clone, Default)]
pub struct RestMapper {
    mappings: Vec<ResourceMapping>,
    by_kind: HashMap<(String, String), usize>,
}

fn split_group_version(group_version: &str) -> (&str, &str) {
    match group_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", group_version),
    }
}

impl RestMapper {
    pub fn from_resource_lists(lists: Vec<APIResourceList>) -> Self {
        let mut mapper = Self::default();
        for list in lists {
            let (group, version) = split_group_version(&list.group_version);
            for resource in list.resources {
                // subresources such as pods/log
                if resource.name.contains('/') {
                    continue;
                }
                let singular = if resource.singular_name.is_empty() {
                    resource.kind.to_lowercase()
                } else {
                    resource.singular_name
                };
                let mapping = ResourceMapping {
                    group: resource.group.unwrap_or_else(|| group.to_string()),
                    version: resource.version.unwrap_or_else(|| version.to_string()),
                    kind: resource.kind,
                    resource: resource.name,
                    singular,
                    short_names: resource.short_names.unwrap_or_default(),
                    namespaced: resource.namespaced,
                };
                mapper
                    .by_kind
                    .entry((mapping.group.clone(), mapping.kind.clone()))
                    .or_insert(mapper.mappings.len());
                mapper.mappings.push(mapping);
            }
        }
        mapper
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Resolve `name` or `name.group`
    ///
    /// Core-group resources win over others with the same short name.
    pub fn resource_for(&self, name: &str) -> Option<&ResourceMapping> {
        let name = name.to_lowercase();
        if let Some(found) = self.find(&name, None) {
            return Some(found);
        }
        let (resource, group) = name.split_once('.')?;
        self.find(resource, Some(group))
    }

    /// Resolve a kind within a group
    pub fn kind_for(&self, group: &str, kind: &str) -> Option<&ResourceMapping> {
        self.by_kind
            .get(&(group.to_string(), kind.to_string()))
            .map(|&idx| &self.mappings[idx])
    }

    fn find(&self, name: &str, group: Option<&str>) -> Option<&ResourceMapping> {
        let mut candidates = self
            .mappings
            .iter()
            .filter(|m| group.is_none_or(|g| m.group == g))
            .filter(|m| m.matches(name));
        let first = candidates.next()?;
        if first.group.is_empty() {
            return Some(first);
        }
        Some(
            candidates
                .find(|m| m.group.is_empty())
                .unwrap_or(first),
        )
    }
}
