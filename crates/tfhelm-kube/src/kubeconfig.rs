//! Kubeconfig resolution
//!
//! [`KubeConfig`] turns the provider's `kubernetes` settings into a Kubernetes
//! client configuration. It combines loading rules (an explicit kubeconfig
//! path) with an overrides object populated field by field from the settings:
//! a set field replaces the kubeconfig's value, an unset one leaves it alone.
//!
//! The raw loader is built lazily, exactly once, behind a mutex. Every caller
//! of [`RestClientGetter::to_raw_kube_config_loader`] observes the same
//! instance for the life of the [`KubeConfig`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use kube::config::{KubeConfigOptions, Kubeconfig};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use crate::discovery::{CachedDiscovery, RestMapper};
use crate::error::{KubeError, Result};
use crate::server_url::default_server_url;

/// Namespace used when none is configured
pub const DEFAULT_NAMESPACE: &str = "default";

/// Name given to context, cluster and user entries the overrides have to create
const GENERATED_ENTRY: &str = "tfhelm";

/// Host-supplied Kubernetes connection settings
///
/// `None` (or an empty string) means the field was not set.
#[derive(Debug, Clone, Default)]
pub struct KubernetesSettings {
    /// Whether to read the kubeconfig file at all
    pub load_config_file: bool,
    /// Kubeconfig path, `~` is expanded
    pub config_path: Option<String>,
    /// Context to select
    pub config_context: Option<String>,
    /// User entry the context should use
    pub config_context_auth_info: Option<String>,
    /// Cluster entry the context should use
    pub config_context_cluster: Option<String>,
    /// API server host (URL or host:port)
    pub host: Option<String>,
    /// Basic auth username
    pub username: Option<String>,
    /// Basic auth password
    pub password: Option<String>,
    /// Bearer token
    pub token: Option<String>,
    /// Skip server certificate verification
    pub insecure: Option<bool>,
    /// PEM-encoded cluster CA bundle
    pub cluster_ca_certificate: Option<String>,
    /// PEM-encoded client certificate
    pub client_certificate: Option<String>,
    /// PEM-encoded client key
    pub client_key: Option<String>,
    /// Exec credential plugin block, as supplied by the host
    pub exec: Option<Value>,
}

impl KubernetesSettings {
    /// Whether any static connection field overrides the kubeconfig
    pub fn has_static(&self) -> bool {
        [
            &self.host,
            &self.username,
            &self.password,
            &self.token,
            &self.cluster_ca_certificate,
            &self.client_certificate,
            &self.client_key,
        ]
        .into_iter()
        .any(|v| set(v).is_some())
            || self.insecure == Some(true)
            || self.exec.is_some()
    }
}

fn set(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Exec-based credential plugin spec
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExecSpec {
    pub api_version: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ExecSpec {
    /// Parse the host's exec block (a single-element list or a bare object)
    pub fn from_value(value: &Value) -> Result<Self> {
        let spec = match value {
            Value::Array(items) => items
                .first()
                .ok_or_else(|| KubeError::ExecPlugin("empty exec block".to_string()))?,
            other => other,
        };
        if !spec.is_object() {
            return Err(KubeError::ExecPlugin(format!(
                "expected an object, got {}",
                spec
            )));
        }
        serde_json::from_value(spec.clone()).map_err(|e| KubeError::ExecPlugin(e.to_string()))
    }

    fn to_kubeconfig(&self) -> Value {
        let env: Vec<Value> = self
            .env
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect();
        json!({
            "apiVersion": self.api_version,
            "command": self.command,
            "args": self.args,
            "env": env,
        })
    }
}

/// Where the kubeconfig is loaded from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadingRules {
    pub explicit_path: Option<PathBuf>,
}

/// Overrides for the selected cluster entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterOverrides {
    pub server: Option<String>,
    pub insecure_skip_tls_verify: bool,
    pub certificate_authority_data: Option<String>,
}

/// Overrides for the selected user entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthOverrides {
    pub client_certificate_data: Option<String>,
    pub client_key_data: Option<String>,
    pub token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub exec: Option<ExecSpec>,
}

/// Overrides for the selected context entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextOverrides {
    pub cluster: Option<String>,
    pub auth_info: Option<String>,
    pub namespace: String,
}

/// Everything the host settings override
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub cluster_info: ClusterOverrides,
    pub auth_info: AuthOverrides,
    pub context: ContextOverrides,
    pub current_context: Option<String>,
}

impl ClusterOverrides {
    fn apply(&self, cluster: &mut Map<String, Value>) {
        if let Some(server) = &self.server {
            cluster.insert("server".into(), json!(server));
        }
        if self.insecure_skip_tls_verify {
            cluster.insert("insecure-skip-tls-verify".into(), json!(true));
            if self.certificate_authority_data.is_none() {
                cluster.remove("certificate-authority");
                cluster.remove("certificate-authority-data");
            }
        }
        if let Some(ca) = &self.certificate_authority_data {
            cluster.remove("certificate-authority");
            cluster.insert("certificate-authority-data".into(), json!(STANDARD.encode(ca)));
        }
    }
}

impl AuthOverrides {
    fn apply(&self, user: &mut Map<String, Value>) {
        if let Some(cert) = &self.client_certificate_data {
            user.remove("client-certificate");
            user.insert("client-certificate-data".into(), json!(STANDARD.encode(cert)));
        }
        if let Some(key) = &self.client_key_data {
            user.remove("client-key");
            user.insert("client-key-data".into(), json!(STANDARD.encode(key)));
        }
        if let Some(token) = &self.token {
            user.remove("token-file");
            user.insert("token".into(), json!(token));
        }
        if let Some(username) = &self.username {
            user.insert("username".into(), json!(username));
        }
        if let Some(password) = &self.password {
            user.insert("password".into(), json!(password));
        }
        if let Some(exec) = &self.exec {
            user.insert("exec".into(), exec.to_kubeconfig());
        }
    }
}

/// Raw kubeconfig loader: loading rules plus overrides
#[derive(Debug)]
pub struct ClientConfigLoader {
    rules: LoadingRules,
    overrides: ConfigOverrides,
}

impl ClientConfigLoader {
    pub fn new(rules: LoadingRules, overrides: ConfigOverrides) -> Self {
        Self { rules, overrides }
    }

    pub fn loading_rules(&self) -> &LoadingRules {
        &self.rules
    }

    pub fn overrides(&self) -> &ConfigOverrides {
        &self.overrides
    }

    /// Namespace of the resolved context
    pub fn namespace(&self) -> &str {
        &self.overrides.context.namespace
    }

    /// The kubeconfig document after overrides, in kubeconfig's own field names
    pub fn raw_config(&self) -> Result<Value> {
        let mut doc = self.load_document()?;
        let root = object_mut(&mut doc);
        for key in ["clusters", "users", "contexts"] {
            array_mut(root.entry(key).or_insert(Value::Null));
        }

        let context_name = self
            .overrides
            .current_context
            .clone()
            .or_else(|| {
                root.get("current-context")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
            })
            .unwrap_or_else(|| GENERATED_ENTRY.to_string());

        let (cluster_name, user_name) = {
            let context = named_entry(root, "contexts", "context", &context_name);
            if let Some(cluster) = &self.overrides.context.cluster {
                context.insert("cluster".into(), json!(cluster));
            }
            if let Some(user) = &self.overrides.context.auth_info {
                context.insert("user".into(), json!(user));
            }
            context.insert("namespace".into(), json!(self.overrides.context.namespace));

            let cluster_name = entry_name(context, "cluster");
            let user_name = entry_name(context, "user");
            (cluster_name, user_name)
        };

        self.overrides
            .cluster_info
            .apply(named_entry(root, "clusters", "cluster", &cluster_name));
        self.overrides
            .auth_info
            .apply(named_entry(root, "users", "user", &user_name));
        root.insert("current-context".into(), json!(context_name));

        Ok(doc)
    }

    /// Resolve the merged kubeconfig and the context to use from it
    pub fn merged_kubeconfig(&self) -> Result<(Kubeconfig, String)> {
        let doc = self.raw_config()?;
        let context = doc
            .get("current-context")
            .and_then(Value::as_str)
            .unwrap_or(GENERATED_ENTRY)
            .to_string();

        let kubeconfig: Kubeconfig = serde_json::from_value(doc)
            .map_err(|e| KubeError::Kubeconfig(format!("invalid merged kubeconfig: {}", e)))?;

        let has_server = kubeconfig
            .contexts
            .iter()
            .find(|c| c.name == context)
            .and_then(|c| c.context.as_ref())
            .and_then(|c| kubeconfig.clusters.iter().find(|cl| cl.name == c.cluster))
            .and_then(|cl| cl.cluster.as_ref())
            .and_then(|cl| cl.server.as_deref())
            .is_some_and(|s| !s.is_empty());
        if !has_server {
            return Err(KubeError::Kubeconfig(
                "no configuration has been provided".to_string(),
            ));
        }

        Ok((kubeconfig, context))
    }

    /// Build the client configuration
    pub async fn client_config(&self) -> Result<kube::Config> {
        let (kubeconfig, context) = self.merged_kubeconfig()?;
        let options = KubeConfigOptions {
            context: Some(context),
            cluster: None,
            user: None,
        };

        let mut config = kube::Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| KubeError::Kubeconfig(e.to_string()))?;
        config.default_namespace = self.namespace().to_string();
        Ok(config)
    }

    fn load_document(&self) -> Result<Value> {
        let Some(path) = &self.rules.explicit_path else {
            return Ok(empty_document());
        };
        if !path.exists() {
            debug!(path = %path.display(), "kubeconfig not found, using overrides only");
            return Ok(empty_document());
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(empty_document());
        }
        let mut doc: Value = serde_yaml::from_str(&content)?;
        if let Some(dir) = path.parent() {
            absolutize_paths(&mut doc, dir);
        }
        Ok(doc)
    }
}

fn empty_document() -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [],
        "users": [],
        "contexts": [],
    })
}

fn object_mut(slot: &mut Value) -> &mut Map<String, Value> {
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(map) => map,
        _ => unreachable!("slot was just made an object"),
    }
}

fn array_mut(slot: &mut Value) -> &mut Vec<Value> {
    if !slot.is_array() {
        *slot = Value::Array(Vec::new());
    }
    match slot {
        Value::Array(items) => items,
        _ => unreachable!("slot was just made an array"),
    }
}

/// Find (or create) `list[name == name].field` and return it as an object
fn named_entry<'a>(
    root: &'a mut Map<String, Value>,
    list: &str,
    field: &str,
    name: &str,
) -> &'a mut Map<String, Value> {
    let items = array_mut(root.entry(list).or_insert(Value::Null));
    let idx = match items
        .iter()
        .position(|item| item.get("name").and_then(Value::as_str) == Some(name))
    {
        Some(idx) => idx,
        None => {
            items.push(json!({ "name": name, field: {} }));
            items.len() - 1
        }
    };
    let entry = object_mut(&mut items[idx]);
    object_mut(entry.entry(field).or_insert(Value::Null))
}

fn entry_name(context: &mut Map<String, Value>, key: &str) -> String {
    let name = context
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(GENERATED_ENTRY)
        .to_string();
    context.insert(key.into(), json!(name));
    name
}

/// Resolve file references relative to the kubeconfig's directory
fn absolutize_paths(doc: &mut Value, dir: &Path) {
    let targets = [
        ("clusters", "cluster", &["certificate-authority"][..]),
        ("users", "user", &["client-certificate", "client-key", "token-file"][..]),
    ];
    for (list, field, keys) in targets {
        let Some(items) = doc.get_mut(list).and_then(Value::as_array_mut) else {
            continue;
        };
        for item in items {
            let Some(inner) = item.get_mut(field).and_then(Value::as_object_mut) else {
                continue;
            };
            for key in keys {
                if let Some(Value::String(path)) = inner.get_mut(*key) {
                    if !path.is_empty() && Path::new(path.as_str()).is_relative() {
                        *path = dir.join(path.as_str()).to_string_lossy().into_owned();
                    }
                }
            }
        }
    }
}

/// Expand a leading `~` and take the first entry of a path list
fn expand_config_path(path: &str) -> PathBuf {
    let first = std::env::split_paths(path)
        .next()
        .unwrap_or_else(|| PathBuf::from(path));
    let first = first.to_string_lossy();
    if let Some(rest) = first.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(first.as_ref())
}

/// Capability set downstream Kubernetes tooling expects from a config source
#[async_trait]
pub trait RestClientGetter: Send + Sync {
    /// Client configuration
    async fn to_rest_config(&self) -> Result<kube::Config>;

    /// Discovery client, cached for the life of the getter
    async fn to_discovery_client(&self) -> Result<Arc<CachedDiscovery>>;

    /// Resource mapper with short-name expansion
    async fn to_rest_mapper(&self) -> Result<RestMapper>;

    /// Raw loader; `None` is a fatal configuration error for the caller
    fn to_raw_kube_config_loader(&self) -> Option<Arc<ClientConfigLoader>>;
}

/// Kubeconfig resolver backed by host settings
pub struct KubeConfig {
    settings: KubernetesSettings,
    namespace: Option<String>,
    loader: Mutex<Option<Arc<ClientConfigLoader>>>,
    loader_builds: AtomicUsize,
    discovery: OnceCell<Arc<CachedDiscovery>>,
}

impl KubeConfig {
    pub fn new(settings: KubernetesSettings, namespace: Option<String>) -> Self {
        Self {
            settings,
            namespace,
            loader: Mutex::new(None),
            loader_builds: AtomicUsize::new(0),
            discovery: OnceCell::new(),
        }
    }

    pub fn settings(&self) -> &KubernetesSettings {
        &self.settings
    }

    /// How many times a loader has been constructed
    pub fn loader_builds(&self) -> usize {
        self.loader_builds.load(Ordering::SeqCst)
    }

    fn build_loader(&self) -> Result<ClientConfigLoader> {
        let s = &self.settings;
        let mut rules = LoadingRules::default();
        let mut overrides = ConfigOverrides::default();

        if s.load_config_file {
            if let Some(path) = set(&s.config_path) {
                rules.explicit_path = Some(expand_config_path(path));

                let ctx = set(&s.config_context);
                let auth_info = set(&s.config_context_auth_info);
                let cluster = set(&s.config_context_cluster);
                if ctx.is_some() || auth_info.is_some() || cluster.is_some() {
                    if let Some(ctx) = ctx {
                        overrides.current_context = Some(ctx.to_string());
                        debug!("Using custom current context: {:?}", ctx);
                    }
                    overrides.context.auth_info = auth_info.map(String::from);
                    overrides.context.cluster = cluster.map(String::from);
                    debug!("Using overridden context: {:?}", overrides.context);
                }
            }
        }

        if s.insecure == Some(true) {
            overrides.cluster_info.insecure_skip_tls_verify = true;
        }
        if let Some(ca) = set(&s.cluster_ca_certificate) {
            overrides.cluster_info.certificate_authority_data = Some(ca.to_string());
        }
        if let Some(cert) = set(&s.client_certificate) {
            overrides.auth_info.client_certificate_data = Some(cert.to_string());
        }
        if let Some(host) = set(&s.host) {
            let default_tls = overrides.cluster_info.certificate_authority_data.is_some()
                || overrides.auth_info.client_certificate_data.is_some()
                || overrides.cluster_info.insecure_skip_tls_verify;
            overrides.cluster_info.server = Some(default_server_url(host, default_tls)?);
        }
        if let Some(username) = set(&s.username) {
            overrides.auth_info.username = Some(username.to_string());
        }
        if let Some(password) = set(&s.password) {
            overrides.auth_info.password = Some(password.to_string());
        }
        if let Some(key) = set(&s.client_key) {
            overrides.auth_info.client_key_data = Some(key.to_string());
        }
        if let Some(token) = set(&s.token) {
            overrides.auth_info.token = Some(token.to_string());
        }
        if let Some(exec) = &s.exec {
            overrides.auth_info.exec = Some(ExecSpec::from_value(exec)?);
        }

        overrides.context.namespace = self
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        Ok(ClientConfigLoader::new(rules, overrides))
    }
}

impl std::fmt::Debug for KubeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeConfig")
            .field("namespace", &self.namespace)
            .field("loader_builds", &self.loader_builds())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RestClientGetter for KubeConfig {
    async fn to_rest_config(&self) -> Result<kube::Config> {
        let loader = self.to_raw_kube_config_loader().ok_or(KubeError::NoLoader)?;
        loader.client_config().await
    }

    async fn to_discovery_client(&self) -> Result<Arc<CachedDiscovery>> {
        self.discovery
            .get_or_try_init(|| async {
                let config = self.to_rest_config().await?;
                let client = kube::Client::try_from(config)
                    .map_err(|e| KubeError::Client(e.to_string()))?;
                Ok::<_, KubeError>(Arc::new(CachedDiscovery::new(client)))
            })
            .await
            .cloned()
    }

    async fn to_rest_mapper(&self) -> Result<RestMapper> {
        let discovery = self.to_discovery_client().await?;
        let resources = discovery.server_resources().await?;
        Ok(RestMapper::from_resource_lists(resources))
    }

    fn to_raw_kube_config_loader(&self) -> Option<Arc<ClientConfigLoader>> {
        let mut guard = self
            .loader
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if guard.is_none() {
            match self.build_loader() {
                Ok(loader) => {
                    self.loader_builds.fetch_add(1, Ordering::SeqCst);
                    info!("Successfully initialized config");
                    *guard = Some(Arc::new(loader));
                }
                Err(e) => {
                    error!("Failed to initialize kubernetes config: {}", e);
                    return None;
                }
            }
        }

        guard.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: dev
clusters:
- name: dev-cluster
  cluster:
    server: https://dev.example.com:6443
    certificate-authority: certs/ca.crt
- name: prod-cluster
  cluster:
    server: https://prod.example.com
contexts:
- name: dev
  context:
    cluster: dev-cluster
    user: dev-user
    namespace: apps
- name: prod
  context:
    cluster: prod-cluster
    user: prod-user
users:
- name: dev-user
  user:
    token: dev-token
- name: prod-user
  user:
    username: admin
    password: secret
"#;

    fn write_kubeconfig(dir: &Path) -> String {
        let path = dir.join("config");
        std::fs::write(&path, KUBECONFIG).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn cluster<'a>(doc: &'a Value, name: &str) -> &'a Value {
        doc["clusters"]
            .as_array()
            .unwrap()
            .iter()
            .find(|c| c["name"] == name)
            .map(|c| &c["cluster"])
            .unwrap()
    }

    fn user<'a>(doc: &'a Value, name: &str) -> &'a Value {
        doc["users"]
            .as_array()
            .unwrap()
            .iter()
            .find(|c| c["name"] == name)
            .map(|c| &c["user"])
            .unwrap()
    }

    #[test]
    fn test_host_with_client_certificate_defaults_to_https() {
        let kc = KubeConfig::new(
            KubernetesSettings {
                host: Some("10.0.0.1:6443".into()),
                client_certificate: Some("-----BEGIN CERTIFICATE-----".into()),
                ..Default::default()
            },
            None,
        );
        let loader = kc.to_raw_kube_config_loader().unwrap();
        assert_eq!(
            loader.overrides().cluster_info.server.as_deref(),
            Some("https://10.0.0.1:6443")
        );
    }

    #[test]
    fn test_host_without_tls_defaults_to_http() {
        let kc = KubeConfig::new(
            KubernetesSettings {
                host: Some("10.0.0.1:8080".into()),
                username: Some("admin".into()),
                ..Default::default()
            },
            None,
        );
        let loader = kc.to_raw_kube_config_loader().unwrap();
        assert_eq!(
            loader.overrides().cluster_info.server.as_deref(),
            Some("http://10.0.0.1:8080")
        );
    }

    #[test]
    fn test_overrides_only_without_file() {
        let kc = KubeConfig::new(
            KubernetesSettings {
                host: Some("https://k8s.example.com".into()),
                token: Some("abc".into()),
                cluster_ca_certificate: Some("CA".into()),
                ..Default::default()
            },
            Some("tiller".into()),
        );
        let doc = kc.to_raw_kube_config_loader().unwrap().raw_config().unwrap();

        assert_eq!(doc["current-context"], GENERATED_ENTRY);
        let cl = cluster(&doc, GENERATED_ENTRY);
        assert_eq!(cl["server"], "https://k8s.example.com");
        assert_eq!(cl["certificate-authority-data"], STANDARD.encode("CA"));
        assert_eq!(user(&doc, GENERATED_ENTRY)["token"], "abc");
        assert_eq!(doc["contexts"][0]["context"]["namespace"], "tiller");
    }

    #[test]
    fn test_file_values_survive_unset_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let kc = KubeConfig::new(
            KubernetesSettings {
                load_config_file: true,
                config_path: Some(write_kubeconfig(dir.path())),
                ..Default::default()
            },
            None,
        );
        let doc = kc.to_raw_kube_config_loader().unwrap().raw_config().unwrap();

        assert_eq!(doc["current-context"], "dev");
        let cl = cluster(&doc, "dev-cluster");
        assert_eq!(cl["server"], "https://dev.example.com:6443");
        assert_eq!(
            cl["certificate-authority"],
            dir.path().join("certs/ca.crt").to_string_lossy().as_ref()
        );
        assert_eq!(user(&doc, "dev-user")["token"], "dev-token");
        // namespace always comes from the overrides
        let ctx = doc["contexts"]
            .as_array()
            .unwrap()
            .iter()
            .find(|c| c["name"] == "dev")
            .unwrap();
        assert_eq!(ctx["context"]["namespace"], DEFAULT_NAMESPACE);
    }

    #[test]
    fn test_context_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let kc = KubeConfig::new(
            KubernetesSettings {
                load_config_file: true,
                config_path: Some(write_kubeconfig(dir.path())),
                config_context: Some("prod".into()),
                config_context_auth_info: Some("dev-user".into()),
                password: Some("override".into()),
                ..Default::default()
            },
            None,
        );
        let loader = kc.to_raw_kube_config_loader().unwrap();
        assert_eq!(loader.overrides().current_context.as_deref(), Some("prod"));

        let doc = loader.raw_config().unwrap();
        assert_eq!(doc["current-context"], "prod");
        let dev_user = user(&doc, "dev-user");
        assert_eq!(dev_user["token"], "dev-token");
        assert_eq!(dev_user["password"], "override");
        // untouched entries are left as-is
        assert_eq!(user(&doc, "prod-user")["password"], "secret");
    }

    #[test]
    fn test_context_ignored_when_file_disabled() {
        let kc = KubeConfig::new(
            KubernetesSettings {
                load_config_file: false,
                config_path: Some("/does/not/matter".into()),
                config_context: Some("prod".into()),
                host: Some("https://k8s.example.com".into()),
                ..Default::default()
            },
            None,
        );
        let loader = kc.to_raw_kube_config_loader().unwrap();
        assert_eq!(loader.loading_rules().explicit_path, None);
        assert_eq!(loader.overrides().current_context, None);
    }

    #[test]
    fn test_insecure_drops_file_ca() {
        let dir = tempfile::tempdir().unwrap();
        let kc = KubeConfig::new(
            KubernetesSettings {
                load_config_file: true,
                config_path: Some(write_kubeconfig(dir.path())),
                insecure: Some(true),
                ..Default::default()
            },
            None,
        );
        let doc = kc.to_raw_kube_config_loader().unwrap().raw_config().unwrap();
        let cl = cluster(&doc, "dev-cluster");
        assert_eq!(cl["insecure-skip-tls-verify"], true);
        assert!(cl.get("certificate-authority").is_none());
    }

    #[test]
    fn test_exec_spec() {
        let kc = KubeConfig::new(
            KubernetesSettings {
                host: Some("https://k8s.example.com".into()),
                exec: Some(json!([{
                    "api_version": "client.authentication.k8s.io/v1beta1",
                    "command": "aws-iam-authenticator",
                    "args": ["token", "-i", "demo"],
                    "env": { "AWS_PROFILE": "dev" },
                }])),
                ..Default::default()
            },
            None,
        );
        let doc = kc.to_raw_kube_config_loader().unwrap().raw_config().unwrap();
        let exec = &user(&doc, GENERATED_ENTRY)["exec"];
        assert_eq!(exec["command"], "aws-iam-authenticator");
        assert_eq!(exec["apiVersion"], "client.authentication.k8s.io/v1beta1");
        assert_eq!(exec["env"][0], json!({ "name": "AWS_PROFILE", "value": "dev" }));
    }

    #[tokio::test]
    async fn test_malformed_exec_yields_no_loader() {
        let kc = KubeConfig::new(
            KubernetesSettings {
                host: Some("https://k8s.example.com".into()),
                exec: Some(json!(["not-a-block"])),
                ..Default::default()
            },
            None,
        );
        assert!(kc.to_raw_kube_config_loader().is_none());
        assert_eq!(kc.loader_builds(), 0);
        assert!(matches!(
            kc.to_rest_config().await,
            Err(KubeError::NoLoader)
        ));
    }

    #[test]
    fn test_concurrent_first_resolution_builds_once() {
        let kc = Arc::new(KubeConfig::new(
            KubernetesSettings {
                host: Some("https://k8s.example.com".into()),
                ..Default::default()
            },
            None,
        ));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let kc = Arc::clone(&kc);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    kc.to_raw_kube_config_loader().unwrap()
                })
            })
            .collect();

        let loaders: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(kc.loader_builds(), 1);
        assert!(loaders.iter().all(|l| Arc::ptr_eq(l, &loaders[0])));
        assert!(Arc::ptr_eq(
            &kc.to_raw_kube_config_loader().unwrap(),
            &loaders[0]
        ));
    }

    #[test]
    fn test_no_server_is_an_error() {
        let kc = KubeConfig::new(KubernetesSettings::default(), None);
        let loader = kc.to_raw_kube_config_loader().unwrap();
        assert!(matches!(
            loader.merged_kubeconfig(),
            Err(KubeError::Kubeconfig(_))
        ));
    }

    #[tokio::test]
    async fn test_rest_config_from_overrides() {
        let kc = KubeConfig::new(
            KubernetesSettings {
                host: Some("10.0.0.1:6443".into()),
                insecure: Some(true),
                token: Some("abc".into()),
                ..Default::default()
            },
            Some("tiller".into()),
        );
        let config = kc.to_rest_config().await.unwrap();

        assert_eq!(config.cluster_url.scheme_str(), Some("https"));
        assert_eq!(config.cluster_url.host(), Some("10.0.0.1"));
        assert_eq!(config.cluster_url.port_u16(), Some(6443));
        assert!(config.accept_invalid_certs);
        assert_eq!(config.default_namespace, "tiller");
    }

    #[test]
    fn test_has_static() {
        assert!(!KubernetesSettings::default().has_static());
        assert!(
            !KubernetesSettings {
                host: Some(String::new()),
                insecure: Some(false),
                ..Default::default()
            }
            .has_static()
        );
        assert!(
            KubernetesSettings {
                token: Some("t".into()),
                ..Default::default()
            }
            .has_static()
        );
    }
}
