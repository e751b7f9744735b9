//! Helm repository management for the Helm provider plugin
//!
//! This crate owns everything the provider keeps under `$HELM_HOME`:
//!
//! - **Helm home layout**: paths of the repository file, index cache and TLS defaults
//! - **Repository file**: `repositories.yaml` in the Helm v2 format
//! - **Index download**: fetch, validate and cache `index.yaml` over HTTP(S)
//!
//! ## Example
//!
//! ```rust,no_run
//! use tfhelm_repo::{ChartRepository, HelmHome, Repository, RepositoryFile};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let home = HelmHome::new("~/.helm");
//! let repo = Repository::new("stable", "https://charts.example.com/stable")?;
//!
//! let mut client = ChartRepository::new(repo, None)?;
//! client.download_index_file(&home).await?;
//!
//! let mut file = RepositoryFile::load_or_default(&home.repository_file())?;
//! file.update(client.into_repository());
//! file.save_to(&home.repository_file())?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod home;
pub mod http;
pub mod index;

// Re-exports for convenience
pub use config::{Repository, RepositoryFile};
pub use error::{RepoError, Result};
pub use home::{DEFAULT_HELM_HOME, HelmHome, expand_path};
pub use http::ChartRepository;
pub use index::{ChartEntry, RepositoryIndex, sha256_hex};
