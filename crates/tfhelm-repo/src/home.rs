//! Helm home directory layout
//!
//! Mirrors the `$HELM_HOME` tree used by the Helm v2 client:
//!
//! ```text
//! $HELM_HOME/
//!   repository/
//!     repositories.yaml
//!     cache/<name>-index.yaml
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

/// Default Helm home, relative to the user's home directory
pub const DEFAULT_HELM_HOME: &str = "~/.helm";

/// A Helm home directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelmHome {
    root: PathBuf,
}

impl HelmHome {
    /// Create a Helm home, expanding a leading `~`
    pub fn new(path: impl AsRef<str>) -> Self {
        Self {
            root: expand_path(path.as_ref()),
        }
    }

    /// Root of the Helm home
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// `$HELM_HOME/repository`
    pub fn repository(&self) -> PathBuf {
        self.root.join("repository")
    }

    /// `$HELM_HOME/repository/repositories.yaml`
    pub fn repository_file(&self) -> PathBuf {
        self.repository().join("repositories.yaml")
    }

    /// `$HELM_HOME/repository/cache`
    pub fn cache(&self) -> PathBuf {
        self.repository().join("cache")
    }

    /// Cached index file for a named repository
    pub fn cache_index(&self, name: &str) -> PathBuf {
        self.cache().join(format!("{}-index.yaml", name))
    }

    /// Create the directories the repository files live in
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.cache())
    }
}

impl Default for HelmHome {
    fn default() -> Self {
        Self::new(DEFAULT_HELM_HOME)
    }
}

impl fmt::Display for HelmHome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root.display())
    }
}

/// Expand a leading `~` to the user's home directory
pub fn expand_path(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let home = HelmHome::new("/tmp/helm");
        assert_eq!(
            home.repository_file(),
            PathBuf::from("/tmp/helm/repository/repositories.yaml")
        );
        assert_eq!(
            home.cache_index("stable"),
            PathBuf::from("/tmp/helm/repository/cache/stable-index.yaml")
        );
        assert_eq!(home.to_string(), "/tmp/helm");
    }

    #[test]
    fn test_expand_path() {
        assert_eq!(expand_path("/abs/path"), PathBuf::from("/abs/path"));
        assert_eq!(expand_path("relative"), PathBuf::from("relative"));

        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~/.helm"), home.join(".helm"));
            assert_eq!(expand_path("~"), home);
        }
    }
}
