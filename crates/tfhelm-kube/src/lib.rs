//! Kubernetes integration for the Helm provider plugin
//!
//! This crate provides:
//! - **Kubeconfig resolution**: merge an on-disk kubeconfig with provider overrides,
//!   memoized behind a mutex
//! - **REST client getter**: config, cached discovery, REST mapper and raw loader
//! - **Client builder**: kubeconfig first, in-cluster as fallback
//! - **Tiller tunnel**: port-forward from a local ephemeral port to the Tiller pod
//! - **Tiller management**: install, upgrade and remove the `tiller-deploy` deployment

pub mod client;
pub mod discovery;
pub mod error;
pub mod kubeconfig;
pub mod server_url;
pub mod tiller;
pub mod tunnel;

pub use client::{ClusterClient, build_client, resolve_config};
pub use discovery::{CachedDiscovery, ResourceMapping, RestMapper};
pub use error::{KubeError, Result};
pub use kubeconfig::{
    AuthOverrides, ClientConfigLoader, ClusterOverrides, ConfigOverrides, ContextOverrides,
    DEFAULT_NAMESPACE, ExecSpec, KubeConfig, KubernetesSettings, LoadingRules, RestClientGetter,
};
pub use server_url::default_server_url;
pub use tiller::{
    DEFAULT_TILLER_IMAGE, DEFAULT_TILLER_NAMESPACE, DEPLOYMENT_NAME, TillerManager, TillerOptions,
    TillerStatus,
};
pub use tunnel::{TILLER_PORT, TILLER_SELECTOR, Tunnel};
