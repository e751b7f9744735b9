//! `helm_chart`: a Helm release managed through Tiller

use async_trait::async_trait;
use serde_json::{Map, Value};
use tfhelm_kube::DEFAULT_NAMESPACE;
use tfhelm_repo::{RepoError, RepositoryFile, RepositoryIndex};
use tracing::{debug, info, warn};

use super::{Resource, metadata_block};
use crate::data::ResourceData;
use crate::error::{ProviderError, Result};
use crate::helm::{ChartRef, ListFilter, Release, ReleaseRequest, ReleaseStatus};
use crate::meta::Meta;
use crate::schema::{AttrType, Attribute, Schema};

/// Seconds Tiller waits for hooks and, with `wait`, for resources
pub const DEFAULT_TIMEOUT: i64 = 300;

pub struct ChartResource;

/// Whether `chart` names a chart on disk rather than in a repository
fn is_local_chart(chart: &str) -> bool {
    chart.starts_with('.')
        || chart.starts_with('/')
        || chart.starts_with('~')
        || std::path::Path::new(chart).exists()
}

fn is_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Resolve the chart reference from `repository`, `chart` and `version`
pub fn chart_ref(repository: Option<&str>, chart: &str, version: Option<&str>) -> ChartRef {
    let version = version.filter(|v| !v.is_empty()).map(String::from);
    match repository.filter(|r| !r.is_empty()) {
        Some(repo) if is_url(repo) => ChartRef {
            chart: chart.to_string(),
            repo_url: Some(repo.to_string()),
            version,
        },
        Some(repo) if !chart.contains('/') && !is_local_chart(chart) => ChartRef {
            chart: format!("{}/{}", repo, chart),
            repo_url: None,
            version,
        },
        _ => ChartRef {
            chart: chart.to_string(),
            repo_url: None,
            version,
        },
    }
}

impl ChartResource {
    fn request(d: &ResourceData) -> Result<ReleaseRequest> {
        let chart = chart_ref(
            d.get_str_ok("repository"),
            d.require_str("chart")?,
            d.get_str_ok("version"),
        );

        let set = d
            .get("set")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let name = item.get("name")?.as_str()?;
                        let value = match item.get("value")? {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        Some((name.to_string(), value))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let values = d.get_strings("values");
        for doc in &values {
            serde_yaml::from_str::<serde_yaml::Value>(doc)?;
        }

        let verify = d.get_bool("verify");
        Ok(ReleaseRequest {
            name: d.require_str("name")?.to_string(),
            namespace: d
                .get_str_ok("namespace")
                .unwrap_or(DEFAULT_NAMESPACE)
                .to_string(),
            chart,
            values,
            set,
            timeout: d
                .get("timeout")
                .and_then(Value::as_i64)
                .unwrap_or(DEFAULT_TIMEOUT),
            wait: d.get("wait").and_then(Value::as_bool).unwrap_or(true),
            devel: d.get_bool("devel"),
            verify,
            keyring: d
                .get_str_ok("keyring")
                .filter(|_| verify)
                .map(String::from),
            disable_hooks: d.get_bool("disable_webhooks"),
            reuse_values: d.get_bool("reuse_values"),
            force: d.get_bool("force_update"),
            recreate_pods: d.get_bool("recreate_pods"),
        })
    }

    /// Fail early when a named repository's cached index lacks the chart
    fn check_cached_index(meta: &Meta, d: &ResourceData) -> Result<()> {
        let Some(repo) = d.get_str_ok("repository").filter(|r| !is_url(r)) else {
            return Ok(());
        };
        let chart = d.require_str("chart")?;
        if chart.contains('/') || is_local_chart(chart) {
            return Ok(());
        }

        let home = &meta.settings.home;
        let file = RepositoryFile::load_or_default(&home.repository_file())?;
        if !file.has(repo) {
            return Err(ProviderError::config_with_help(
                format!("repository {:?} is not registered", repo),
                "declare it with a helm_repository resource",
            ));
        }

        let path = home.cache_index(repo);
        if !path.exists() {
            debug!(repository = repo, "no cached index, leaving chart resolution to helm");
            return Ok(());
        }
        let index = RepositoryIndex::load_from(&path)?;
        // helm --devel also considers pre-releases, which constraints skip
        let version = d.get_str_ok("version").filter(|_| !d.get_bool("devel"));
        match index.require(repo, chart, version) {
            Ok(_) => Ok(()),
            Err(RepoError::InvalidConstraint { constraint, .. }) => {
                debug!(repository = repo, constraint = %constraint, "leaving version constraint to helm");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn refresh(d: &mut ResourceData, meta: &Meta, release: &Release) -> Result<()> {
        let values = match meta.helm().release_values(&release.name).await {
            Ok(values) => values,
            Err(e) if e.is_not_found() => String::new(),
            Err(e) => return Err(e),
        };
        set_metadata(d, release, values);
        Ok(())
    }
}

/// Whether `current` is a revision written by the install that just ran
fn installed_now(previous: Option<&Release>, current: &Release) -> bool {
    previous.is_none_or(|p| current.revision > p.revision)
}

fn set_metadata(d: &mut ResourceData, release: &Release, values: String) {
    let mut fields = Map::new();
    fields.insert("name".to_string(), Value::String(release.name.clone()));
    fields.insert("revision".to_string(), Value::from(release.revision));
    fields.insert("namespace".to_string(), Value::String(release.namespace.clone()));
    fields.insert("status".to_string(), Value::String(release.status.to_string()));
    fields.insert("chart".to_string(), Value::String(release.chart.clone()));
    fields.insert("version".to_string(), Value::String(release.version.clone()));
    fields.insert("values".to_string(), Value::String(values));
    d.set("metadata", metadata_block(fields));
}

#[async_trait]
impl Resource for ChartResource {
    fn name(&self) -> &'static str {
        "helm_chart"
    }

    fn schema(&self) -> Schema {
        let set = Schema::new()
            .attr("name", Attribute::required(AttrType::String))
            .attr("value", Attribute::required(AttrType::String));

        let metadata = Schema::new()
            .attr("name", Attribute::computed(AttrType::String))
            .attr("revision", Attribute::computed(AttrType::Int))
            .attr("namespace", Attribute::computed(AttrType::String))
            .attr("status", Attribute::computed(AttrType::String))
            .attr("chart", Attribute::computed(AttrType::String))
            .attr("version", Attribute::computed(AttrType::String))
            .attr("values", Attribute::computed(AttrType::String));

        Schema::new()
            .attr(
                "name",
                Attribute::required(AttrType::String)
                    .force_new()
                    .describe("Release name."),
            )
            .attr(
                "repository",
                Attribute::optional(AttrType::String)
                    .describe("Repository name or URL where to locate the requested chart."),
            )
            .attr(
                "chart",
                Attribute::required(AttrType::String).describe("Chart name to be installed."),
            )
            .attr(
                "version",
                Attribute::optional(AttrType::String)
                    .also_computed()
                    .describe("Specify the exact chart version to install. If this is not specified, the latest version is installed."),
            )
            .attr(
                "values",
                Attribute::optional(AttrType::List(Box::new(AttrType::String)))
                    .describe("List of values in raw yaml format to pass to helm."),
            )
            .attr(
                "set",
                Attribute::block_list(set).describe("Custom values to be merged with the values."),
            )
            .attr(
                "namespace",
                Attribute::optional(AttrType::String)
                    .with_default(DEFAULT_NAMESPACE)
                    .force_new()
                    .describe("Namespace to install the release into."),
            )
            .attr(
                "verify",
                Attribute::optional(AttrType::Bool)
                    .with_default(false)
                    .describe("Verify the package before installing it."),
            )
            .attr(
                "keyring",
                Attribute::optional(AttrType::String)
                    .with_default("~/.gnupg/pubring.gpg")
                    .describe("Location of public keys used for verification."),
            )
            .attr(
                "timeout",
                Attribute::optional(AttrType::Int)
                    .with_default(DEFAULT_TIMEOUT)
                    .describe("Time in seconds to wait for any individual kubernetes operation."),
            )
            .attr(
                "disable_webhooks",
                Attribute::optional(AttrType::Bool)
                    .with_default(false)
                    .describe("Prevent hooks from running."),
            )
            .attr(
                "reuse_values",
                Attribute::optional(AttrType::Bool)
                    .with_default(false)
                    .describe("When upgrading, reuse the last release's values, ignoring any other input."),
            )
            .attr(
                "force_update",
                Attribute::optional(AttrType::Bool)
                    .with_default(false)
                    .describe("Force resource update through delete/recreate if needed."),
            )
            .attr(
                "recreate_pods",
                Attribute::optional(AttrType::Bool)
                    .with_default(false)
                    .describe("On update performs pods restart for the resource if applicable."),
            )
            .attr(
                "devel",
                Attribute::optional(AttrType::Bool)
                    .with_default(false)
                    .describe("Use chart development versions, too. Equivalent to version '>0.0.0-0'. If `version` is set, this is ignored."),
            )
            .attr(
                "wait",
                Attribute::optional(AttrType::Bool)
                    .with_default(true)
                    .describe("Will wait until all resources are in a ready state before marking the release as successful."),
            )
            .attr(
                "metadata",
                Attribute::computed_block(metadata).describe("Status of the deployed release."),
            )
    }

    async fn create(&self, d: &mut ResourceData, meta: &Meta) -> Result<()> {
        Self::check_cached_index(meta, d)?;
        let req = Self::request(d)?;

        let previous = match meta.helm().release_status(&req.name).await {
            Ok(release) => Some(release),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let release = match meta.helm().install(&req).await {
            Ok(release) => release,
            Err(e) => {
                if req.wait {
                    match meta.helm().release_status(&req.name).await {
                        Ok(release) if installed_now(previous.as_ref(), &release) => {
                            warn!(release = %req.name, status = %release.status, "install failed, keeping the release in state");
                            d.set_id(release.name.clone());
                            set_metadata(d, &release, String::new());
                        }
                        Ok(release) => {
                            debug!(release = %req.name, revision = release.revision, "release predates this install, not tracking it");
                        }
                        Err(_) => {}
                    }
                }
                return Err(e);
            }
        };

        info!(release = %release.name, revision = release.revision, chart = %release.chart, "Installed release");
        d.set_id(release.name.clone());
        Self::refresh(d, meta, &release).await
    }

    async fn read(&self, d: &mut ResourceData, meta: &Meta) -> Result<()> {
        let Some(name) = d.id().map(String::from) else {
            return Ok(());
        };

        let found = meta
            .helm()
            .list_releases(&ListFilter::exact(&name))
            .await?
            .into_iter()
            .find(|r| r.name == name);

        match found {
            Some(release) if release.status != ReleaseStatus::Deleted => {
                Self::refresh(d, meta, &release).await
            }
            _ => {
                debug!(release = %name, "release is gone");
                d.clear_id();
                Ok(())
            }
        }
    }

    async fn update(&self, d: &mut ResourceData, meta: &Meta) -> Result<()> {
        let req = Self::request(d)?;
        let release = meta.helm().upgrade(&req).await?;
        info!(release = %release.name, revision = release.revision, "Upgraded release");
        Self::refresh(d, meta, &release).await
    }

    async fn delete(&self, d: &mut ResourceData, meta: &Meta) -> Result<()> {
        let name = d.require_str("name")?.to_string();
        match meta.helm().delete_release(&name, true).await {
            Ok(()) => info!(release = %name, "Deleted release"),
            Err(e) if e.is_not_found() => debug!(release = %name, "release already deleted"),
            Err(e) => return Err(e),
        }
        d.clear_id();
        Ok(())
    }

    async fn exists(&self, d: &ResourceData, meta: &Meta) -> Result<bool> {
        let Some(name) = d.id() else {
            return Ok(false);
        };
        match meta.helm().release_status(name).await {
            Ok(release) => Ok(release.status != ReleaseStatus::Deleted),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn import(&self, id: &str, meta: &Meta) -> Result<ResourceData> {
        let release = match meta.helm().release_status(id).await {
            Ok(release) if release.status != ReleaseStatus::Deleted => release,
            Ok(_) | Err(ProviderError::ReleaseNotFound { .. }) => {
                return Err(ProviderError::config(format!(
                    "cannot import non-existent helm_chart {:?}",
                    id
                )));
            }
            Err(e) => return Err(e),
        };

        let mut d = ResourceData::new(self.name(), Map::new());
        d.set_id(id);
        d.set("name", release.name.clone());
        d.set("namespace", release.namespace.clone());
        d.set("chart", release.chart.clone());
        d.set("version", release.version.clone());
        Self::refresh(&mut d, meta, &release).await?;
        Ok(d)
    }
}
