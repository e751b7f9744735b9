//! Kubernetes client construction
//!
//! The kubeconfig-derived configuration is tried first. In-cluster
//! configuration is only a fallback when the provider was given no static
//! connection settings.

use kube::Client;
use tracing::{debug, warn};

use crate::error::{KubeError, Result};
use crate::kubeconfig::{KubeConfig, RestClientGetter};

/// A connected client and the configuration it was built from
#[derive(Clone)]
pub struct ClusterClient {
    pub client: Client,
    pub config: kube::Config,
}

impl std::fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient")
            .field("cluster_url", &self.config.cluster_url)
            .field("default_namespace", &self.config.default_namespace)
            .finish_non_exhaustive()
    }
}

/// Resolve a configuration and build a client from it
pub async fn build_client(resolver: &KubeConfig) -> Result<ClusterClient> {
    let config = resolve_config(resolver).await?;
    let client = Client::try_from(config.clone()).map_err(|e| KubeError::Client(e.to_string()))?;
    Ok(ClusterClient { client, config })
}

/// Resolution order: kubeconfig plus overrides, then in-cluster when no
/// static block was given
pub async fn resolve_config(resolver: &KubeConfig) -> Result<kube::Config> {
    let has_static = resolver.settings().has_static();

    let err = match resolver.to_rest_config().await {
        Ok(config) => return Ok(config),
        Err(e) => e,
    };

    if has_static {
        return Err(KubeError::Client(err.to_string()));
    }

    debug!(error = %err, "kubeconfig resolution failed, trying in-cluster configuration");
    match kube::Config::incluster() {
        Ok(config) => Ok(config),
        Err(in_cluster) => {
            warn!(error = %in_cluster, "in-cluster configuration unavailable");
            Err(KubeError::Client(err.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubeconfig::KubernetesSettings;

    #[tokio::test]
    async fn test_static_block_does_not_fall_back() {
        let resolver = KubeConfig::new(
            KubernetesSettings {
                username: Some("admin".into()),
                ..Default::default()
            },
            None,
        );
        let err = resolve_config(&resolver).await.unwrap_err();
        assert!(matches!(err, KubeError::Client(_)));
        assert!(err.to_string().starts_with("failed to configure kubernetes config"));
    }

    #[tokio::test]
    async fn test_overrides_resolve() {
        let resolver = KubeConfig::new(
            KubernetesSettings {
                host: Some("https://k8s.example.com:6443".into()),
                insecure: Some(true),
                ..Default::default()
            },
            None,
        );
        let config = resolve_config(&resolver).await.unwrap();
        assert_eq!(config.cluster_url.host(), Some("k8s.example.com"));
    }
}
