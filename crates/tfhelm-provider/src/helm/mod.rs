//! Helm client abstraction
//!
//! Release operations go through [`HelmClient`]. [`TillerClient`] drives the
//! `helm` binary against a Tiller host; [`MockHelmClient`] keeps releases in
//! memory for tests.

mod cli;
mod mock;

pub use cli::{HELM_BIN_ENV, TillerClient};
pub use mock::{HelmOperationCounts, MockHelmClient};

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Release status as reported by Tiller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseStatus {
    #[default]
    Unknown,
    Deployed,
    Deleted,
    Superseded,
    Failed,
    Deleting,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
}

impl ReleaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Deployed => "DEPLOYED",
            Self::Deleted => "DELETED",
            Self::Superseded => "SUPERSEDED",
            Self::Failed => "FAILED",
            Self::Deleting => "DELETING",
            Self::PendingInstall => "PENDING_INSTALL",
            Self::PendingUpgrade => "PENDING_UPGRADE",
            Self::PendingRollback => "PENDING_ROLLBACK",
        }
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReleaseStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().replace(' ', "_").as_str() {
            "DEPLOYED" => Self::Deployed,
            "DELETED" => Self::Deleted,
            "SUPERSEDED" => Self::Superseded,
            "FAILED" => Self::Failed,
            "DELETING" => Self::Deleting,
            "PENDING_INSTALL" => Self::PendingInstall,
            "PENDING_UPGRADE" => Self::PendingUpgrade,
            "PENDING_ROLLBACK" => Self::PendingRollback,
            _ => Self::Unknown,
        })
    }
}

/// A deployed release
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Release {
    pub name: String,
    pub namespace: String,
    pub revision: i64,
    pub status: ReleaseStatus,
    /// Chart name
    pub chart: String,
    /// Chart version
    pub version: String,
    pub app_version: String,
    pub updated: String,
}

/// Where a chart comes from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChartRef {
    /// Chart reference as passed to helm (`repo/chart`, path or bare name)
    pub chart: String,
    /// Repository URL for `--repo`
    pub repo_url: Option<String>,
    pub version: Option<String>,
}

/// Install or upgrade request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseRequest {
    pub name: String,
    pub namespace: String,
    pub chart: ChartRef,
    /// YAML documents, later ones win
    pub values: Vec<String>,
    /// `--set name=value` pairs
    pub set: Vec<(String, String)>,
    /// Seconds
    pub timeout: i64,
    pub wait: bool,
    pub devel: bool,
    pub verify: bool,
    pub keyring: Option<String>,
    pub disable_hooks: bool,
    pub reuse_values: bool,
    pub force: bool,
    pub recreate_pods: bool,
}

/// Release listing filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Regular expression over release names, as helm understands it
    pub filter: Option<String>,
    pub namespace: Option<String>,
    /// Include deleted and failed releases
    pub all: bool,
}

impl ListFilter {
    /// Match exactly one release name
    pub fn exact(name: &str) -> Self {
        Self {
            filter: Some(format!("^{}$", name)),
            namespace: None,
            all: true,
        }
    }
}

/// Release operations against Tiller
#[async_trait]
pub trait HelmClient: Send + Sync {
    async fn install(&self, req: &ReleaseRequest) -> Result<Release>;

    async fn upgrade(&self, req: &ReleaseRequest) -> Result<Release>;

    /// Latest revision of a release
    async fn release_status(&self, name: &str) -> Result<Release>;

    /// User-supplied values of the latest revision, as YAML
    async fn release_values(&self, name: &str) -> Result<String>;

    async fn list_releases(&self, filter: &ListFilter) -> Result<Vec<Release>>;

    async fn delete_release(&self, name: &str, purge: bool) -> Result<()>;
}

/// Split helm's `name-version` chart column
pub fn split_chart_version(chart: &str) -> (&str, &str) {
    let mut search = chart.len();
    while let Some(idx) = chart[..search].rfind('-') {
        if chart[idx + 1..].starts_with(|c: char| c.is_ascii_digit()) {
            return (&chart[..idx], &chart[idx + 1..]);
        }
        search = idx;
    }
    (chart, "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_chart_version() {
        assert_eq!(split_chart_version("mariadb-5.2.2"), ("mariadb", "5.2.2"));
        assert_eq!(
            split_chart_version("kube-state-metrics-0.12.1"),
            ("kube-state-metrics", "0.12.1")
        );
        assert_eq!(
            split_chart_version("nginx-ingress-1.0.0-rc.1"),
            ("nginx-ingress", "1.0.0-rc.1")
        );
        assert_eq!(split_chart_version("local"), ("local", ""));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("DEPLOYED".parse::<ReleaseStatus>().unwrap(), ReleaseStatus::Deployed);
        assert_eq!(
            "PENDING_UPGRADE".parse::<ReleaseStatus>().unwrap(),
            ReleaseStatus::PendingUpgrade
        );
        assert_eq!("weird".parse::<ReleaseStatus>().unwrap(), ReleaseStatus::Unknown);
        assert_eq!(ReleaseStatus::Deleted.to_string(), "DELETED");
    }

    #[test]
    fn test_exact_filter() {
        let filter = ListFilter::exact("web");
        assert_eq!(filter.filter.as_deref(), Some("^web$"));
        assert!(filter.all);
    }
}
