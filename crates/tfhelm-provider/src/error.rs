//! Provider error types
//!
//! Every failure surfaces to the plugin host synchronously. Variants fall
//! into three groups: configuration errors, connectivity errors and
//! resource-operation errors.

use miette::Diagnostic;
use thiserror::Error;

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors returned by the provider
#[derive(Error, Debug, Diagnostic)]
pub enum ProviderError {
    /// Provider or resource configuration is invalid
    #[error("{message}")]
    #[diagnostic(code(tfhelm::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// TLS material could not be assembled
    #[error("{message}")]
    #[diagnostic(code(tfhelm::tls))]
    Tls { message: String },

    /// Kubernetes configuration or API failure
    #[error(transparent)]
    #[diagnostic(code(tfhelm::kubernetes))]
    Kube(#[from] tfhelm_kube::KubeError),

    /// Chart repository failure
    #[error(transparent)]
    #[diagnostic(code(tfhelm::repository))]
    Repo(#[from] tfhelm_repo::RepoError),

    /// The helm binary failed
    #[error("helm {command} failed: {message}")]
    #[diagnostic(code(tfhelm::helm))]
    Helm { command: String, message: String },

    /// A release does not exist
    #[error("release not found: {name}")]
    #[diagnostic(code(tfhelm::release_not_found))]
    ReleaseNotFound { name: String },

    /// A required attribute is missing or has the wrong type
    #[error("{resource}: {message}")]
    #[diagnostic(code(tfhelm::schema))]
    Schema { resource: String, message: String },

    /// Malformed protocol message
    #[error("protocol error: {message}")]
    #[diagnostic(code(tfhelm::protocol))]
    Protocol { message: String },

    /// Resource type not served by this provider
    #[error("unknown resource type: {name}")]
    #[diagnostic(code(tfhelm::unknown_resource))]
    UnknownResource { name: String },

    /// A request arrived before `configure`
    #[error("provider is not configured")]
    #[diagnostic(code(tfhelm::not_configured), help("send a configure request first"))]
    NotConfigured,

    #[error("IO error: {0}")]
    #[diagnostic(code(tfhelm::io))]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    #[diagnostic(code(tfhelm::serialization))]
    Serialization(String),
}

impl ProviderError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    /// Create a configuration error with help text
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls {
            message: message.into(),
        }
    }

    pub fn schema(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn helm(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Helm {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code for the protocol
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Tls { .. } => "tls",
            Self::Kube(_) => "kubernetes",
            Self::Repo(_) => "repository",
            Self::Helm { .. } => "helm",
            Self::ReleaseNotFound { .. } => "release_not_found",
            Self::Schema { .. } => "schema",
            Self::Protocol { .. } => "protocol",
            Self::UnknownResource { .. } => "unknown_resource",
            Self::NotConfigured => "not_configured",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
        }
    }

    /// Whether the error means "the object is gone"
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::ReleaseNotFound { .. } => true,
            Self::Kube(e) => e.is_not_found(),
            Self::Repo(e) => e.is_not_found(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for ProviderError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(ProviderError::config("x").code(), "config");
        assert_eq!(ProviderError::NotConfigured.code(), "not_configured");
        assert_eq!(
            ProviderError::UnknownResource {
                name: "helm_x".into()
            }
            .to_string(),
            "unknown resource type: helm_x"
        );
    }

    #[test]
    fn test_not_found() {
        assert!(
            ProviderError::ReleaseNotFound {
                name: "web".into()
            }
            .is_not_found()
        );
        assert!(
            ProviderError::Repo(tfhelm_repo::RepoError::RepositoryNotFound {
                name: "stable".into()
            })
            .is_not_found()
        );
        assert!(!ProviderError::tls("bad").is_not_found());
    }
}
