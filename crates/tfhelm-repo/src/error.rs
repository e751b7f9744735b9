//! Error types for repository operations

use thiserror::Error;

use crate::http::REQUEST_TIMEOUT;

/// Repository operation errors
#[derive(Debug, Error)]
pub enum RepoError {
    // ============ Configuration Errors ============
    #[error("Repository not found: {name}")]
    RepositoryNotFound { name: String },

    #[error("Invalid repository URL: {url} - {reason}")]
    InvalidRepositoryUrl { url: String, reason: String },

    #[error("Invalid repository configuration: {message}")]
    InvalidConfig { message: String },

    // ============ Network Errors ============
    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Request timeout after {seconds}s")]
    Timeout { seconds: u64 },

    // ============ Authentication Errors ============
    #[error("Authentication required for {url}")]
    AuthRequired { url: String },

    // ============ Index Errors ============
    #[error("Index not found at {url}")]
    IndexNotFound { url: String },

    #[error("Invalid index format: {message}")]
    InvalidIndex { message: String },

    #[error("Index parse error: {message}")]
    IndexParseError { message: String },

    // ============ Chart Errors ============
    #[error("Chart not found: {name} in repository {repo}")]
    ChartNotFound { name: String, repo: String },

    #[error("Invalid version constraint '{constraint}': {message}")]
    InvalidConstraint { constraint: String, message: String },

    #[error("Version not found: {name}@{version} in repository {repo}")]
    VersionNotFound {
        name: String,
        version: String,
        repo: String,
    },

    // ============ IO Errors ============
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;

impl From<reqwest::Error> for RepoError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RepoError::Timeout {
                seconds: REQUEST_TIMEOUT.as_secs(),
            }
        } else if e.is_connect() {
            RepoError::NetworkError {
                message: format!("Connection failed: {}", e),
            }
        } else if let Some(status) = e.status() {
            RepoError::HttpError {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            RepoError::NetworkError {
                message: e.to_string(),
            }
        }
    }
}

impl From<serde_yaml::Error> for RepoError {
    fn from(e: serde_yaml::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(e: serde_json::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<url::ParseError> for RepoError {
    fn from(e: url::ParseError) -> Self {
        RepoError::InvalidRepositoryUrl {
            url: String::new(),
            reason: e.to_string(),
        }
    }
}

impl RepoError {
    /// Whether the error means the repository is simply not configured
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepoError::RepositoryNotFound { .. })
    }
}
