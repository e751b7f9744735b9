//! Repository index types
//!
//! Only the parts of the Helm index format the provider inspects are modelled;
//! unknown fields are ignored.

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::error::{RepoError, Result};

/// Repository index (`index.yaml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryIndex {
    /// API version
    #[serde(default)]
    pub api_version: String,

    /// Chart versions indexed by chart name
    #[serde(default)]
    pub entries: HashMap<String, Vec<ChartEntry>>,
}

impl RepositoryIndex {
    /// Parse index from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let index: Self = serde_yaml::from_str(yaml).map_err(|e| RepoError::IndexParseError {
            message: e.to_string(),
        })?;
        if index.api_version.is_empty() {
            return Err(RepoError::InvalidIndex {
                message: "no API version specified".to_string(),
            });
        }
        Ok(index)
    }

    /// Parse index from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let yaml = std::str::from_utf8(bytes).map_err(|e| RepoError::IndexParseError {
            message: format!("Invalid UTF-8: {}", e),
        })?;
        Self::from_yaml(yaml)
    }

    /// Load a cached index file
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    /// Whether the index lists a chart
    pub fn has(&self, name: &str) -> bool {
        self.entries.get(name).is_some_and(|v| !v.is_empty())
    }

    /// Get a specific version of a chart
    pub fn get_version(&self, name: &str, version: &str) -> Option<&ChartEntry> {
        self.entries
            .get(name)?
            .iter()
            .find(|e| e.version == version)
    }

    /// Highest version of a chart matching a semver constraint
    pub fn find_best_match(&self, name: &str, constraint: &str) -> Result<Option<&ChartEntry>> {
        let req = VersionReq::parse(constraint).map_err(|e| RepoError::InvalidConstraint {
            constraint: constraint.to_string(),
            message: e.to_string(),
        })?;

        Ok(self
            .entries
            .get(name)
            .into_iter()
            .flatten()
            .filter_map(|e| {
                let version = Version::parse(&e.version).ok()?;
                req.matches(&version).then_some((version, e))
            })
            .max_by(|a, b| a.0.cmp(&b.0))
            .map(|(_, e)| e))
    }

    /// Check that a chart, and optionally a version or constraint, is available
    ///
    /// An exact version must be listed as is. Anything else is matched as a
    /// semver constraint; `InvalidConstraint` means it could not be parsed.
    pub fn require(&self, repo: &str, name: &str, version: Option<&str>) -> Result<&ChartEntry> {
        let versions = self
            .entries
            .get(name)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| RepoError::ChartNotFound {
                name: name.to_string(),
                repo: repo.to_string(),
            })?;

        let not_found = |version: &str| RepoError::VersionNotFound {
            name: name.to_string(),
            version: version.to_string(),
            repo: repo.to_string(),
        };

        match version {
            Some(version) => {
                if let Some(entry) = self.get_version(name, version) {
                    return Ok(entry);
                }
                if Version::parse(version).is_ok() {
                    return Err(not_found(version));
                }
                self.find_best_match(name, version)?
                    .ok_or_else(|| not_found(version))
            }
            // Helm writes entries newest first
            None => Ok(&versions[0]),
        }
    }

    /// Number of chart versions in the index
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Hex-encoded SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Chart version entry in the index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartEntry {
    /// Chart name
    pub name: String,

    /// Chart version
    pub version: String,

    /// Application version
    #[serde(default)]
    pub app_version: Option<String>,

    /// Description
    #[serde(default)]
    pub description: Option<String>,

    /// URLs to download the chart archive
    #[serde(default)]
    pub urls: Vec<String>,

    /// SHA256 digest of the archive
    #[serde(default)]
    pub digest: Option<String>,
}
