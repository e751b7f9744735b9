//! Helm provider plugin
//!
//! Declarative Helm repositories, releases and Tiller installations for an
//! infrastructure-as-code host:
//!
//! - **Schema**: typed attributes with defaults and environment fallbacks
//! - **Settings and TLS**: provider configuration assembled once per `configure`
//! - **Helm client**: release operations through the `helm` binary and Tiller
//! - **Resources**: `helm_repository`, `helm_chart` and `helm_tiller` handlers
//! - **Server**: newline-delimited JSON requests on stdio

pub mod content;
pub mod data;
pub mod error;
pub mod helm;
pub mod meta;
pub mod provider;
pub mod resources;
pub mod schema;
pub mod server;
pub mod settings;
pub mod tls;

// Re-exports for convenience
pub use data::ResourceData;
pub use error::{ProviderError, Result};
pub use helm::{HelmClient, MockHelmClient, TillerClient};
pub use meta::Meta;
pub use provider::{Plan, PlanAction, Provider};
pub use schema::{AttrType, Attribute, ProviderSchema, Schema};
pub use settings::Settings;
pub use tls::TlsConfig;
