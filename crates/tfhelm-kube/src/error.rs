//! Error types for tfhelm-kube

use thiserror::Error;

/// Result type for tfhelm-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while resolving or talking to a cluster
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Kubeconfig could not be loaded or resolved
    #[error("invalid kubeconfig: {0}")]
    Kubeconfig(String),

    /// Host override is not a URL or host:port pair
    #[error("invalid Kubernetes host '{host}': {reason}")]
    InvalidHost { host: String, reason: String },

    /// Exec credential plugin spec could not be parsed
    #[error("failed to parse exec: {0}")]
    ExecPlugin(String),

    /// The raw kubeconfig loader could not be constructed
    #[error("failed to initialize kubernetes config")]
    NoLoader,

    /// In-cluster configuration unavailable
    #[error("in-cluster configuration unavailable: {0}")]
    InCluster(String),

    /// Failed to build a client from a resolved configuration
    #[error("failed to configure kubernetes config: {0}")]
    Client(String),

    /// No running Tiller pod
    #[error("could not find tiller in namespace '{namespace}'")]
    TillerNotFound { namespace: String },

    /// Port-forward tunnel error
    #[error("error creating tunnel: {0}")]
    Tunnel(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 409)
    }
}
