//! Provider entry points
//!
//! [`Provider`] owns the provider schema and, after [`Provider::configure`],
//! the shared [`Meta`]. Plans are computed from resource schemas; applies
//! dispatch to the resource handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::data::ResourceData;
use crate::error::{ProviderError, Result};
use crate::meta::Meta;
use crate::resources::{self, Resource};
use crate::schema::{AttrType, Attribute, ProviderSchema, Schema, process_env};
use crate::settings::{
    DEFAULT_CA_CERTIFICATE, DEFAULT_CLIENT_CERTIFICATE, DEFAULT_CLIENT_KEY, DEFAULT_KUBECONFIG,
    KUBECONFIG_ENV, Settings,
};

/// Environment lookup used for attribute defaults
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Schema of the `kubernetes` block
fn kubernetes_schema() -> Schema {
    let string_env = |var: &str, description: &str| {
        Attribute::optional(AttrType::String)
            .with_env(&[var])
            .with_default("")
            .describe(description)
    };

    let exec = Schema::new()
        .attr("api_version", Attribute::required(AttrType::String))
        .attr("command", Attribute::required(AttrType::String))
        .attr(
            "args",
            Attribute::optional(AttrType::List(Box::new(AttrType::String))),
        )
        .attr("env", Attribute::optional(AttrType::Map));

    Schema::new()
        .attr(
            "host",
            string_env("KUBE_HOST", "The hostname (in form of URI) of Kubernetes master."),
        )
        .attr(
            "username",
            string_env("KUBE_USER", "The username to use for HTTP basic authentication."),
        )
        .attr(
            "password",
            string_env("KUBE_PASSWORD", "The password to use for HTTP basic authentication.")
                .sensitive(),
        )
        .attr(
            "token",
            string_env("KUBE_TOKEN", "Token to authenticate a service account.").sensitive(),
        )
        .attr(
            "insecure",
            Attribute::optional(AttrType::Bool)
                .with_env(&["KUBE_INSECURE"])
                .with_default(false)
                .describe("Whether server should be accessed without verifying the TLS certificate."),
        )
        .attr(
            "client_certificate",
            string_env("KUBE_CLIENT_CERT_DATA", "PEM-encoded client certificate for TLS authentication."),
        )
        .attr(
            "client_key",
            string_env("KUBE_CLIENT_KEY_DATA", "PEM-encoded client certificate key for TLS authentication.")
                .sensitive(),
        )
        .attr(
            "cluster_ca_certificate",
            string_env("KUBE_CLUSTER_CA_CERT_DATA", "PEM-encoded root certificates bundle for TLS authentication."),
        )
        .attr(
            "config_path",
            Attribute::optional(AttrType::String)
                .with_env(KUBECONFIG_ENV)
                .with_default(DEFAULT_KUBECONFIG)
                .describe("Path to the kube config file, defaults to ~/.kube/config."),
        )
        .attr(
            "config_context",
            string_env("KUBE_CTX", "Context to choose from the config file."),
        )
        .attr(
            "config_context_auth_info",
            string_env("KUBE_CTX_AUTH_INFO", "User to choose from the config file."),
        )
        .attr(
            "config_context_cluster",
            string_env("KUBE_CTX_CLUSTER", "Cluster to choose from the config file."),
        )
        .attr(
            "load_config_file",
            Attribute::optional(AttrType::Bool)
                .with_env(&["KUBE_LOAD_CONFIG_FILE"])
                .with_default(true)
                .describe("Load local kubeconfig."),
        )
        .attr("exec", Attribute::block(exec, 1))
}

/// Schema of the provider block
pub fn provider_config_schema() -> Schema {
    Schema::new()
        .attr(
            "host",
            Attribute::optional(AttrType::String)
                .with_env(&["HELM_HOST"])
                .with_default("")
                .describe("Set an alternative Tiller host. The format is host:port."),
        )
        .attr(
            "home",
            Attribute::optional(AttrType::String)
                .with_env(&["HELM_HOME"])
                .with_default(tfhelm_repo::DEFAULT_HELM_HOME)
                .describe("Set an alternative location for Helm files. By default, these are stored in '~/.helm'."),
        )
        .attr(
            "namespace",
            Attribute::optional(AttrType::String)
                .with_default(tfhelm_kube::DEFAULT_TILLER_NAMESPACE)
                .describe("Set an alternative Tiller namespace."),
        )
        .attr(
            "debug",
            Attribute::optional(AttrType::Bool).with_default(false),
        )
        .attr(
            "plugins_disable",
            Attribute::optional(AttrType::Bool)
                .with_env(&["HELM_NO_PLUGINS"])
                .with_default(true)
                .describe("Disable plugins. Set HELM_NO_PLUGINS=1 to disable plugins."),
        )
        .attr(
            "insecure",
            Attribute::optional(AttrType::Bool)
                .with_default(false)
                .describe("Whether server should be accessed without verifying the TLS certificate."),
        )
        .attr(
            "client_key",
            Attribute::optional(AttrType::String)
                .with_default(DEFAULT_CLIENT_KEY)
                .describe("PEM-encoded client certificate key for TLS authentication."),
        )
        .attr(
            "client_certificate",
            Attribute::optional(AttrType::String)
                .with_default(DEFAULT_CLIENT_CERTIFICATE)
                .describe("PEM-encoded client certificate for TLS authentication."),
        )
        .attr(
            "ca_certificate",
            Attribute::optional(AttrType::String)
                .with_default(DEFAULT_CA_CERTIFICATE)
                .describe("PEM-encoded root certificates bundle for TLS authentication."),
        )
        .attr(
            "kubernetes",
            Attribute::block(kubernetes_schema(), 1).describe("Kubernetes configuration."),
        )
}

/// What applying a plan will do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    NoOp,
    Create,
    Update,
    Replace,
    Delete,
}

/// Planned change for one resource instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub action: PlanAction,
    /// State after apply, as far as it is known; `None` for deletes
    pub planned_state: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires_replace: Vec<String>,
}

/// A failed apply, with whatever state the handler left behind
#[derive(Debug)]
pub struct ApplyFailure {
    pub error: ProviderError,
    pub state: Option<Map<String, Value>>,
}

impl From<ProviderError> for ApplyFailure {
    fn from(error: ProviderError) -> Self {
        Self { error, state: None }
    }
}

fn has_id(state: &Map<String, Value>) -> bool {
    state
        .get("id")
        .and_then(Value::as_str)
        .is_some_and(|id| !id.is_empty())
}

/// The provider and its configured metadata
pub struct Provider {
    lookup: EnvLookup,
    meta: Option<Arc<Meta>>,
}

impl Default for Provider {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider {
    /// Provider reading env defaults from the process environment
    pub fn new() -> Self {
        Self::with_lookup(Arc::new(process_env))
    }

    pub fn with_lookup(lookup: EnvLookup) -> Self {
        Self { lookup, meta: None }
    }

    /// Provider around prepared metadata, skipping `configure`
    pub fn with_meta(meta: Meta) -> Self {
        Self {
            lookup: Arc::new(process_env),
            meta: Some(Arc::new(meta)),
        }
    }

    /// Provider and resource schemas
    pub fn schema(&self) -> ProviderSchema {
        ProviderSchema {
            provider: provider_config_schema(),
            resources: resources::all()
                .into_iter()
                .map(|r| (r.name().to_string(), r.schema()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    /// Settings from a provider block, env fallbacks applied
    pub fn settings(&self, config: &Value) -> Result<Settings> {
        let lookup = self.lookup.as_ref();
        let values = provider_config_schema().apply_defaults("provider", config, lookup)?;
        let d = ResourceData::new("provider", values);
        Ok(Settings::from_data(&d, lookup))
    }

    /// Build the shared metadata from a provider block
    pub async fn configure(&mut self, config: &Value) -> Result<()> {
        let settings = self.settings(config)?;
        debug!(
            tiller_host = %settings.tiller_host,
            tiller_namespace = %settings.tiller_namespace,
            home = %settings.home,
            "configuring provider"
        );
        let meta = Meta::build(settings).await?;
        info!(tiller_host = %meta.tiller_host(), "provider configured");
        self.meta = Some(Arc::new(meta));
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.meta.is_some()
    }

    fn meta(&self) -> Result<&Meta> {
        self.meta.as_deref().ok_or(ProviderError::NotConfigured)
    }

    fn resolve(&self, resource: &str, config: &Value) -> Result<Map<String, Value>> {
        let handler = resources::lookup(resource)?;
        handler
            .schema()
            .apply_defaults(resource, config, self.lookup.as_ref())
    }

    /// Compare prior state with configuration
    ///
    /// Needs no cluster access, so it works before `configure`.
    pub fn plan(
        &self,
        resource: &str,
        prior: Option<&Map<String, Value>>,
        config: Option<&Value>,
    ) -> Result<Plan> {
        let handler = resources::lookup(resource)?;
        let prior = prior.filter(|p| has_id(p));

        let Some(config) = config.filter(|c| !c.is_null()) else {
            let action = if prior.is_some() {
                PlanAction::Delete
            } else {
                PlanAction::NoOp
            };
            return Ok(Plan {
                action,
                planned_state: None,
                changed: Vec::new(),
                requires_replace: Vec::new(),
            });
        };

        let proposed = self.resolve(resource, config)?;
        let Some(prior) = prior else {
            return Ok(Plan {
                action: PlanAction::Create,
                planned_state: Some(proposed),
                changed: Vec::new(),
                requires_replace: Vec::new(),
            });
        };

        let schema = handler.schema();
        let diff = schema.diff(prior, &proposed);
        let action = if diff.is_empty() {
            PlanAction::NoOp
        } else if diff.requires_replace() {
            PlanAction::Replace
        } else {
            PlanAction::Update
        };

        let planned = if action == PlanAction::Replace {
            proposed
        } else {
            carry_over(&schema, prior, proposed)
        };

        Ok(Plan {
            action,
            planned_state: Some(planned),
            changed: diff.changed,
            requires_replace: diff.requires_replace,
        })
    }

    /// Move an instance from `prior` to `planned`; `None` means destroy
    pub async fn apply(
        &self,
        resource: &str,
        prior: Option<&Map<String, Value>>,
        planned: Option<&Map<String, Value>>,
    ) -> std::result::Result<Option<Map<String, Value>>, ApplyFailure> {
        let meta = self.meta()?;
        let handler = resources::lookup(resource)?;
        let prior = prior.filter(|p| has_id(p));

        let Some(planned) = planned else {
            if let Some(prior) = prior {
                let mut d = ResourceData::new(resource, prior.clone());
                handler.delete(&mut d, meta).await?;
            }
            return Ok(None);
        };

        let planned = self.resolve(resource, &Value::Object(planned.clone()))?;
        match prior {
            None => create(handler.as_ref(), resource, planned, meta).await,
            Some(prior) => {
                let diff = handler.schema().diff(prior, &planned);
                if diff.requires_replace() {
                    info!(resource, replaced = ?diff.requires_replace, "replacing instance");
                    let mut old = ResourceData::new(resource, prior.clone());
                    handler.delete(&mut old, meta).await?;
                    return create(handler.as_ref(), resource, planned, meta).await;
                }

                let mut d = ResourceData::new(resource, carry_over(&handler.schema(), prior, planned))
                    .with_prior(prior.clone());
                if diff.is_empty() {
                    return Ok(Some(d.into_values()));
                }
                match handler.update(&mut d, meta).await {
                    Ok(()) => Ok(Some(d.into_values())),
                    Err(error) => Err(ApplyFailure {
                        error,
                        state: Some(prior.clone()),
                    }),
                }
            }
        }
    }

    /// Refresh state; `None` when the object is gone
    pub async fn read(
        &self,
        resource: &str,
        state: &Map<String, Value>,
    ) -> Result<Option<Map<String, Value>>> {
        let meta = self.meta()?;
        let handler = resources::lookup(resource)?;
        let mut d = ResourceData::new(resource, state.clone());
        if !handler.exists(&d, meta).await? {
            debug!(resource, id = ?d.id(), "object no longer exists");
            return Ok(None);
        }
        handler.read(&mut d, meta).await?;
        Ok(d.id().is_some().then(|| d.into_values()))
    }

    /// State for an existing object
    pub async fn import(&self, resource: &str, id: &str) -> Result<Map<String, Value>> {
        let meta = self.meta()?;
        let handler = resources::lookup(resource)?;
        let d = handler.import(id, meta).await?;
        info!(resource, id, "imported");
        Ok(d.into_values())
    }
}

async fn create(
    handler: &dyn Resource,
    resource: &str,
    planned: Map<String, Value>,
    meta: &Meta,
) -> std::result::Result<Option<Map<String, Value>>, ApplyFailure> {
    let mut d = ResourceData::new(resource, planned);
    match handler.create(&mut d, meta).await {
        Ok(()) => Ok(Some(d.into_values())),
        Err(error) => {
            let state = d.id().is_some().then(|| d.into_values());
            Err(ApplyFailure { error, state })
        }
    }
}

/// Proposed values plus the id and provider-written attributes of `prior`
fn carry_over(
    schema: &Schema,
    prior: &Map<String, Value>,
    mut proposed: Map<String, Value>,
) -> Map<String, Value> {
    if let Some(id) = prior.get("id") {
        proposed.insert("id".to_string(), id.clone());
    }
    for (name, attr) in &schema.attributes {
        if !attr.computed {
            continue;
        }
        let unset = proposed.get(name).is_none_or(Value::is_null);
        if unset {
            if let Some(value) = prior.get(name) {
                proposed.insert(name.clone(), value.clone());
            }
        }
    }
    proposed
}
