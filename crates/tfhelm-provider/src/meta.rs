//! Provider metadata shared by every resource operation
//!
//! [`Meta::build`] runs once per `configure`: Kubernetes client, Tiller
//! tunnel (when no Tiller host was given), TLS, then the Helm client.

use std::sync::Arc;

use tfhelm_kube::{ClusterClient, KubeConfig, Tunnel, build_client};
use tracing::{debug, info};

use crate::error::{ProviderError, Result};
use crate::helm::{HelmClient, TillerClient};
use crate::settings::Settings;
use crate::tls::TlsConfig;

/// Everything a resource handler needs
pub struct Meta {
    pub settings: Settings,
    kube: Arc<KubeConfig>,
    cluster: Option<ClusterClient>,
    /// Kept alive for the life of the process
    tunnel: Option<Tunnel>,
    tiller_host: String,
    helm: Arc<dyn HelmClient>,
}

impl std::fmt::Debug for Meta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Meta")
            .field("tiller_host", &self.tiller_host)
            .field("tiller_namespace", &self.settings.tiller_namespace)
            .field("cluster", &self.cluster)
            .field("tunnel", &self.tunnel)
            .finish_non_exhaustive()
    }
}

impl Meta {
    /// Connect to the cluster and Tiller
    pub async fn build(settings: Settings) -> Result<Self> {
        let kube = Arc::new(KubeConfig::new(settings.kubernetes.clone(), None));

        let cluster = build_client(&kube).await.map_err(|e| {
            ProviderError::config_with_help(
                format!("failed to configure kubernetes config: {}", e),
                "check the kubernetes block or the kubeconfig it points at",
            )
        })?;
        debug!(cluster = ?cluster, "kubernetes client ready");

        let (tunnel, tiller_host) = if settings.tiller_host.is_empty() {
            let tunnel = Tunnel::open(cluster.client.clone(), &settings.tiller_namespace)
                .await
                .map_err(|e| ProviderError::config(format!("error creating tunnel: {:?}", e.to_string())))?;
            let host = tunnel.host();
            (Some(tunnel), host)
        } else {
            (None, settings.tiller_host.clone())
        };

        let tls = TlsConfig::from_settings(&settings)?;
        let helm = TillerClient::new(&settings, &tiller_host, tls.as_ref())?;
        info!(tiller_host = %tiller_host, tls = tls.is_some(), "configured helm provider");

        Ok(Self {
            settings,
            kube,
            cluster: Some(cluster),
            tunnel,
            tiller_host,
            helm: Arc::new(helm),
        })
    }

    /// Metadata around an existing Helm client, with or without a cluster
    pub fn with_client(
        settings: Settings,
        helm: Arc<dyn HelmClient>,
        cluster: Option<ClusterClient>,
    ) -> Self {
        let kube = Arc::new(KubeConfig::new(settings.kubernetes.clone(), None));
        let tiller_host = settings.tiller_host.clone();
        Self {
            settings,
            kube,
            cluster,
            tunnel: None,
            tiller_host,
            helm,
        }
    }

    pub fn helm(&self) -> &dyn HelmClient {
        self.helm.as_ref()
    }

    /// Kubernetes client; fails when the provider has no cluster connection
    pub fn cluster(&self) -> Result<&ClusterClient> {
        self.cluster.as_ref().ok_or_else(|| {
            ProviderError::config("no kubernetes client is available for this provider")
        })
    }

    /// Kubeconfig resolver
    pub fn kube_config(&self) -> &Arc<KubeConfig> {
        &self.kube
    }

    /// Effective Tiller address
    pub fn tiller_host(&self) -> &str {
        &self.tiller_host
    }

    pub fn tunnel(&self) -> Option<&Tunnel> {
        self.tunnel.as_ref()
    }
}
