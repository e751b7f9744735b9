//! In-memory Helm client for testing
//!
//! Releases live in a map keyed by name, each with its revision history,
//! so resource handlers can be exercised without a Tiller server.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{HelmClient, ListFilter, Release, ReleaseRequest, ReleaseStatus};
use crate::error::{ProviderError, Result};

#[derive(Debug, Clone)]
struct StoredRevision {
    release: Release,
    values: String,
}

/// In-memory Helm client
#[derive(Clone, Default)]
pub struct MockHelmClient {
    /// Storage: name -> revisions, oldest first
    store: Arc<RwLock<HashMap<String, Vec<StoredRevision>>>>,
    /// Track operation counts for assertions
    operations: Arc<RwLock<HelmOperationCounts>>,
    /// Requests in arrival order
    requests: Arc<RwLock<Vec<ReleaseRequest>>>,
    /// Status recorded by the next install, which then fails
    failing_install: Arc<RwLock<Option<ReleaseStatus>>>,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HelmOperationCounts {
    pub installs: usize,
    pub upgrades: usize,
    pub statuses: usize,
    pub lists: usize,
    pub deletes: usize,
}

impl MockHelmClient {
    /// Create a new empty mock client
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-populated releases
    pub fn with_releases(releases: Vec<Release>) -> Self {
        let client = Self::new();
        {
            let mut store = client.store.write().unwrap();
            for release in releases {
                store
                    .entry(release.name.clone())
                    .or_default()
                    .push(StoredRevision {
                        release,
                        values: String::new(),
                    });
            }
        }
        client
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> HelmOperationCounts {
        self.operations.read().unwrap().clone()
    }

    /// Reset operation counts
    pub fn reset_counts(&self) {
        *self.operations.write().unwrap() = HelmOperationCounts::default();
    }

    /// Install and upgrade requests received so far
    pub fn requests(&self) -> Vec<ReleaseRequest> {
        self.requests.read().unwrap().clone()
    }

    /// Force the status of the latest revision (for testing)
    pub fn set_status(&self, name: &str, status: ReleaseStatus) {
        let mut store = self.store.write().unwrap();
        if let Some(last) = store.get_mut(name).and_then(|revs| revs.last_mut()) {
            last.release.status = status;
        }
    }

    /// Make the next install record a revision with `status` and then fail,
    /// the way a `wait`ed install that times out does
    pub fn fail_next_install(&self, status: ReleaseStatus) {
        *self.failing_install.write().unwrap() = Some(status);
    }

    fn latest(&self, name: &str) -> Option<StoredRevision> {
        self.store
            .read()
            .unwrap()
            .get(name)
            .and_then(|revs| revs.last())
            .cloned()
    }

    fn push_revision(&self, req: &ReleaseRequest, values: String) -> Release {
        let mut store = self.store.write().unwrap();
        let revisions = store.entry(req.name.clone()).or_default();
        for rev in revisions.iter_mut() {
            if rev.release.status == ReleaseStatus::Deployed {
                rev.release.status = ReleaseStatus::Superseded;
            }
        }
        let revision = revisions.last().map(|r| r.release.revision).unwrap_or(0) + 1;
        let chart = req
            .chart
            .chart
            .rsplit('/')
            .next()
            .unwrap_or(&req.chart.chart)
            .to_string();
        let release = Release {
            name: req.name.clone(),
            namespace: req.namespace.clone(),
            revision,
            status: ReleaseStatus::Deployed,
            chart,
            version: req.chart.version.clone().unwrap_or_default(),
            app_version: String::new(),
            updated: String::new(),
        };
        revisions.push(StoredRevision {
            release: release.clone(),
            values,
        });
        release
    }
}

/// Values as `helm get values` would print them
fn render_values(req: &ReleaseRequest, previous: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(prev) = previous.filter(|_| req.reuse_values) {
        out.push_str(prev);
    }
    for doc in &req.values {
        out.push_str(doc);
        if !doc.ends_with('\n') {
            out.push('\n');
        }
    }
    for (name, value) in &req.set {
        out.push_str(&format!("{}: {}\n", name, value));
    }
    out
}

#[async_trait]
impl HelmClient for MockHelmClient {
    async fn install(&self, req: &ReleaseRequest) -> Result<Release> {
        self.operations.write().unwrap().installs += 1;
        self.requests.write().unwrap().push(req.clone());

        if let Some(existing) = self.latest(&req.name) {
            if existing.release.status != ReleaseStatus::Deleted {
                return Err(ProviderError::helm(
                    "install",
                    format!("a release named {} already exists", req.name),
                ));
            }
        }
        let release = self.push_revision(req, render_values(req, None));
        if let Some(status) = self.failing_install.write().unwrap().take() {
            self.set_status(&release.name, status);
            return Err(ProviderError::helm(
                "install",
                format!("release {} failed: timed out waiting for the condition", req.name),
            ));
        }
        Ok(release)
    }

    async fn upgrade(&self, req: &ReleaseRequest) -> Result<Release> {
        self.operations.write().unwrap().upgrades += 1;
        self.requests.write().unwrap().push(req.clone());

        let previous = self
            .latest(&req.name)
            .ok_or_else(|| ProviderError::ReleaseNotFound {
                name: req.name.clone(),
            })?;
        Ok(self.push_revision(req, render_values(req, Some(&previous.values))))
    }

    async fn release_status(&self, name: &str) -> Result<Release> {
        self.operations.write().unwrap().statuses += 1;
        self.latest(name)
            .map(|r| r.release)
            .ok_or_else(|| ProviderError::ReleaseNotFound {
                name: name.to_string(),
            })
    }

    async fn release_values(&self, name: &str) -> Result<String> {
        self.latest(name)
            .map(|r| r.values)
            .ok_or_else(|| ProviderError::ReleaseNotFound {
                name: name.to_string(),
            })
    }

    async fn list_releases(&self, filter: &ListFilter) -> Result<Vec<Release>> {
        self.operations.write().unwrap().lists += 1;

        let exact = filter
            .filter
            .as_deref()
            .and_then(|f| f.strip_prefix('^'))
            .and_then(|f| f.strip_suffix('$'));

        let store = self.store.read().unwrap();
        let mut releases: Vec<Release> = store
            .values()
            .filter_map(|revs| revs.last())
            .map(|r| r.release.clone())
            .filter(|r| exact.is_none_or(|name| r.name == name))
            .filter(|r| filter.namespace.as_ref().is_none_or(|ns| &r.namespace == ns))
            .filter(|r| {
                filter.all
                    || !matches!(r.status, ReleaseStatus::Deleted | ReleaseStatus::Failed)
            })
            .collect();
        releases.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(releases)
    }

    async fn delete_release(&self, name: &str, purge: bool) -> Result<()> {
        self.operations.write().unwrap().deletes += 1;

        let mut store = self.store.write().unwrap();
        if purge {
            return store.remove(name).map(|_| ()).ok_or_else(|| {
                ProviderError::ReleaseNotFound {
                    name: name.to_string(),
                }
            });
        }
        let last = store
            .get_mut(name)
            .and_then(|revs| revs.last_mut())
            .ok_or_else(|| ProviderError::ReleaseNotFound {
                name: name.to_string(),
            })?;
        last.release.status = ReleaseStatus::Deleted;
        Ok(())
    }
}
