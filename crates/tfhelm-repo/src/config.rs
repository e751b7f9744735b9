//! Repository file management
//!
//! Reads and writes `$HELM_HOME/repository/repositories.yaml` in the Helm v2
//! format, so the `helm` binary sees every repository the provider manages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RepoError, Result};

/// Repository file (`repositories.yaml`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryFile {
    /// API version
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// When the file was last written
    #[serde(default = "Utc::now")]
    pub generated: DateTime<Utc>,

    /// Configured repositories
    #[serde(default)]
    pub repositories: Vec<Repository>,
}

fn default_api_version() -> String {
    "v1".to_string()
}

impl Default for RepositoryFile {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            generated: Utc::now(),
            repositories: Vec::new(),
        }
    }
}

impl RepositoryFile {
    /// Load from a path, returning an empty file when it does not exist yet
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: Self = serde_yaml::from_str(&content)?;
        if file.api_version.is_empty() {
            return Err(RepoError::InvalidConfig {
                message: format!("{} has no API version", path.display()),
            });
        }
        Ok(file)
    }

    /// Save to a specific path
    pub fn save_to(&mut self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.generated = Utc::now();
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get a repository by name
    pub fn get(&self, name: &str) -> Option<&Repository> {
        self.repositories.iter().find(|r| r.name == name)
    }

    /// Whether a repository with this name exists
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Insert a repository, replacing any entry with the same name
    pub fn update(&mut self, repo: Repository) {
        match self.repositories.iter_mut().find(|r| r.name == repo.name) {
            Some(existing) => *existing = repo,
            None => self.repositories.push(repo),
        }
    }

    /// Remove a repository by name
    pub fn remove(&mut self, name: &str) -> Result<Repository> {
        let idx = self
            .repositories
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| RepoError::RepositoryNotFound {
                name: name.to_string(),
            })?;
        Ok(self.repositories.remove(idx))
    }

    /// List all repository names
    pub fn names(&self) -> Vec<&str> {
        self.repositories.iter().map(|r| r.name.as_str()).collect()
    }
}

/// Repository entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    /// Unique name for this repository
    pub name: String,

    /// Path of the cached index file
    #[serde(default)]
    pub cache: PathBuf,

    /// Repository URL
    pub url: String,

    /// Basic auth username
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,

    /// Basic auth password
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,

    /// Client certificate file
    #[serde(default)]
    pub cert_file: String,

    /// Client key file
    #[serde(default)]
    pub key_file: String,

    /// CA bundle file
    #[serde(default)]
    pub ca_file: String,
}

impl Repository {
    /// Create a new repository entry from a name and URL
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let url = url.into();
        validate_url(&url)?;
        if name.is_empty() || name.contains('/') {
            return Err(RepoError::InvalidConfig {
                message: format!("invalid repository name {:?}", name),
            });
        }

        Ok(Self {
            name,
            url,
            ..Default::default()
        })
    }

    /// Get the index URL
    pub fn index_url(&self) -> String {
        format!("{}/index.yaml", self.url.trim_end_matches('/'))
    }

    /// Whether the entry carries basic auth credentials
    pub fn has_basic_auth(&self) -> bool {
        !self.username.is_empty() || !self.password.is_empty()
    }
}

fn validate_url(url: &str) -> Result<()> {
    let parsed = url::Url::parse(url).map_err(|e| RepoError::InvalidRepositoryUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(RepoError::InvalidRepositoryUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}', expected http or https", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_new() {
        let repo = Repository::new("stable", "https://charts.example.com/stable/").unwrap();
        assert_eq!(repo.name, "stable");
        assert_eq!(
            repo.index_url(),
            "https://charts.example.com/stable/index.yaml"
        );
        assert!(!repo.has_basic_auth());

        assert!(Repository::new("stable", "oci://ghcr.io/org").is_err());
        assert!(Repository::new("stable", "not a url").is_err());
        assert!(Repository::new("a/b", "https://example.com").is_err());
    }

    #[test]
    fn test_update_replaces_by_name() {
        let mut file = RepositoryFile::default();
        file.update(Repository::new("test", "https://example.com").unwrap());
        file.update(Repository::new("other", "https://other.com").unwrap());
        file.update(Repository::new("test", "https://example.org").unwrap());

        assert_eq!(file.names(), vec!["test", "other"]);
        assert_eq!(file.get("test").unwrap().url, "https://example.org");
    }

    #[test]
    fn test_remove() {
        let mut file = RepositoryFile::default();
        file.update(Repository::new("test", "https://example.com").unwrap());

        let removed = file.remove("test").unwrap();
        assert_eq!(removed.name, "test");
        assert!(!file.has("test"));
        assert!(file.remove("test").unwrap_err().is_not_found());
    }

    #[test]
    fn test_round_trip_helm_format() {
        let yaml = r#"
apiVersion: v1
generated: 2018-08-06T10:00:00Z
repositories:
- caFile: ""
  cache: /home/u/.helm/repository/cache/stable-index.yaml
  certFile: ""
  keyFile: ""
  name: stable
  url: https://kubernetes-charts.storage.googleapis.com
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repositories.yaml");
        std::fs::write(&path, yaml).unwrap();

        let mut file = RepositoryFile::load_from(&path).unwrap();
        assert_eq!(file.repositories.len(), 1);
        assert_eq!(
            file.get("stable").unwrap().cache,
            PathBuf::from("/home/u/.helm/repository/cache/stable-index.yaml")
        );

        file.save_to(&path).unwrap();
        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(saved.contains("apiVersion: v1"));
        assert!(saved.contains("caFile"));
        assert!(!saved.contains("username"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = RepositoryFile::load_or_default(&dir.path().join("nope.yaml")).unwrap();
        assert!(file.repositories.is_empty());
    }
}
