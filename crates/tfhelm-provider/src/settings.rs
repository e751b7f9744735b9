//! Provider settings
//!
//! [`Settings`] is assembled once per `configure` from the provider block
//! (after schema defaults and env fallbacks are applied) and never mutated
//! afterwards.

use tfhelm_kube::KubernetesSettings;
use tfhelm_repo::HelmHome;

use crate::data::ResourceData;

/// Literal defaults of the TLS attributes; a value equal to these is absent
pub const DEFAULT_CLIENT_KEY: &str = "$HELM_HOME/key.pem";
pub const DEFAULT_CLIENT_CERTIFICATE: &str = "$HELM_HOME/cert.pem";
pub const DEFAULT_CA_CERTIFICATE: &str = "$HELM_HOME/ca.pem";

/// Kubeconfig path when no env var names one
pub const DEFAULT_KUBECONFIG: &str = "~/.kube/config";

/// Env vars consulted, in order, for the kubeconfig path
pub const KUBECONFIG_ENV: &[&str] = &["KUBE_CONFIG", "KUBECONFIG"];

/// Resolved provider configuration
#[derive(Debug, Clone)]
pub struct Settings {
    /// Tiller address (`host:port`); empty means "tunnel to the pod"
    pub tiller_host: String,
    pub tiller_namespace: String,
    pub home: HelmHome,
    pub debug: bool,
    pub plugins_disable: bool,
    pub insecure: bool,
    /// Path or PEM contents
    pub client_key: String,
    /// Path or PEM contents
    pub client_certificate: String,
    /// Path or PEM contents
    pub ca_certificate: String,
    pub kubernetes: KubernetesSettings,
}

impl Settings {
    /// Read settings from the provider configuration
    pub fn from_data(d: &ResourceData, lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        Self {
            tiller_host: d.string("host"),
            tiller_namespace: d
                .get_str_ok("namespace")
                .unwrap_or(tfhelm_kube::DEFAULT_TILLER_NAMESPACE)
                .to_string(),
            home: HelmHome::new(d.get_str_ok("home").unwrap_or(tfhelm_repo::DEFAULT_HELM_HOME)),
            debug: d.get_bool("debug"),
            plugins_disable: d.get_bool("plugins_disable"),
            insecure: d.get_bool("insecure"),
            client_key: d.string("client_key"),
            client_certificate: d.string("client_certificate"),
            ca_certificate: d.string("ca_certificate"),
            kubernetes: kubernetes_settings(d, lookup),
        }
    }
}

/// The `kubernetes` block as resolver input
///
/// Without a block only the kubeconfig location and context are taken from
/// the environment; static connection fields stay unset.
fn kubernetes_settings(
    d: &ResourceData,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> KubernetesSettings {
    if d.get("kubernetes.0").is_none() {
        let config_path = KUBECONFIG_ENV
            .iter()
            .find_map(|var| lookup(var).filter(|v| !v.is_empty()))
            .unwrap_or_else(|| DEFAULT_KUBECONFIG.to_string());
        return KubernetesSettings {
            load_config_file: true,
            config_path: Some(config_path),
            config_context: lookup("KUBE_CTX").filter(|v| !v.is_empty()),
            ..Default::default()
        };
    }

    let s = |key: &str| {
        d.get_str_ok(&format!("kubernetes.0.{}", key))
            .map(String::from)
    };
    KubernetesSettings {
        load_config_file: d.get_bool("kubernetes.0.load_config_file"),
        config_path: s("config_path"),
        config_context: s("config_context"),
        config_context_auth_info: s("config_context_auth_info"),
        config_context_cluster: s("config_context_cluster"),
        host: s("host"),
        username: s("username"),
        password: s("password"),
        token: s("token"),
        insecure: d
            .get_ok("kubernetes.0.insecure")
            .and_then(serde_json::Value::as_bool),
        cluster_ca_certificate: s("cluster_ca_certificate"),
        client_certificate: s("client_certificate"),
        client_key: s("client_key"),
        exec: d.get_ok("kubernetes.0.exec").cloned(),
    }
}
