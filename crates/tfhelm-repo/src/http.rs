//! HTTP chart repository client
//!
//! Downloads `index.yaml` from a chart repository, validates it, and writes it
//! to the Helm home cache, like `helm repo add` does.

use std::time::Duration;

use crate::config::Repository;
use crate::error::{RepoError, Result};
use crate::home::HelmHome;
use crate::index::{RepositoryIndex, sha256_hex};

const USER_AGENT: &str = concat!("tfhelm/", env!("CARGO_PKG_VERSION"));
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP repository client
pub struct ChartRepository {
    /// Repository configuration
    repo: Repository,
    /// HTTP client
    client: reqwest::Client,
}

impl ChartRepository {
    /// Create a client, optionally presenting a TLS client configuration
    pub fn new(repo: Repository, tls: Option<rustls::ClientConfig>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT);

        if let Some(tls) = tls {
            builder = builder.use_preconfigured_tls(tls);
        }

        let client = builder.build().map_err(|e| RepoError::NetworkError {
            message: format!("Failed to create HTTP client: {}", e),
        })?;

        Ok(Self { repo, client })
    }

    /// Get the repository name
    pub fn name(&self) -> &str {
        &self.repo.name
    }

    /// Get the repository URL
    pub fn url(&self) -> &str {
        &self.repo.url
    }

    /// Consume the client and return the repository entry
    pub fn into_repository(self) -> Repository {
        self.repo
    }

    /// Fetch and validate the repository index, returning the raw bytes too
    pub async fn fetch_index(&self) -> Result<(RepositoryIndex, Vec<u8>)> {
        let index_url = self.repo.index_url();
        tracing::debug!(repo = %self.repo.name, url = %index_url, "fetching repository index");

        let mut request = self.client.get(&index_url);
        if self.repo.has_basic_auth() {
            request = request.basic_auth(&self.repo.username, Some(&self.repo.password));
        }

        let response = request.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RepoError::IndexNotFound { url: index_url });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(RepoError::AuthRequired { url: index_url });
        }
        if !status.is_success() {
            return Err(RepoError::HttpError {
                status: status.as_u16(),
                message: format!("failed to fetch {}", index_url),
            });
        }

        let data = response.bytes().await?.to_vec();
        let index = RepositoryIndex::from_bytes(&data)?;
        Ok((index, data))
    }

    /// Fetch the index and write it to the Helm home cache
    ///
    /// The repository entry's `cache` field is pointed at the written file.
    pub async fn download_index_file(&mut self, home: &HelmHome) -> Result<RepositoryIndex> {
        let (index, data) = self.fetch_index().await?;

        home.ensure()?;
        let path = home.cache_index(&self.repo.name);
        let digest = sha256_hex(&data);

        let unchanged = std::fs::read(&path).is_ok_and(|cached| sha256_hex(&cached) == digest);
        if unchanged {
            tracing::debug!(repo = %self.repo.name, %digest, "repository index unchanged");
        } else {
            std::fs::write(&path, &data)?;
            tracing::debug!(repo = %self.repo.name, path = %path.display(), %digest, charts = index.len(), "cached repository index");
        }

        self.repo.cache = path;
        Ok(index)
    }
}
