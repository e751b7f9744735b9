//! Tiller deployment management
//!
//! Tiller runs as the `tiller-deploy` deployment plus a ClusterIP service in
//! its namespace. Objects are built by pure functions so their shape can be
//! tested without a cluster.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, HTTPGetAction, Namespace, PodSpec, PodTemplateSpec, Probe,
    Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::Client;
use kube::api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams, PostParams, PropagationPolicy};
use serde_json::json;
use tracing::{debug, info};

use crate::error::{KubeError, Result};
use crate::tunnel::TILLER_PORT;

/// Name of the Tiller deployment and service
pub const DEPLOYMENT_NAME: &str = "tiller-deploy";

/// Default Tiller image
pub const DEFAULT_TILLER_IMAGE: &str = "gcr.io/kubernetes-helm/tiller:v2.11.0";

/// Default Tiller namespace
pub const DEFAULT_TILLER_NAMESPACE: &str = "kube-system";

/// Tiller's HTTP probe port
pub const TILLER_PROBE_PORT: u16 = 44135;

const CONTAINER_NAME: &str = "tiller";

/// Desired Tiller installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TillerOptions {
    pub namespace: String,
    pub service_account: String,
    pub image: String,
    /// Maximum release history kept by Tiller; 0 is unlimited
    pub max_history: i64,
}

impl Default for TillerOptions {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_TILLER_NAMESPACE.to_string(),
            service_account: "default".to_string(),
            image: DEFAULT_TILLER_IMAGE.to_string(),
            max_history: 0,
        }
    }
}

/// Observed state of the Tiller deployment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TillerStatus {
    pub name: String,
    pub namespace: String,
    pub generation: i64,
    pub resource_version: String,
    pub uid: String,
    pub deleting: bool,
}

impl TillerStatus {
    pub fn from_deployment(deployment: &Deployment) -> Self {
        let meta = &deployment.metadata;
        Self {
            name: meta.name.clone().unwrap_or_default(),
            namespace: meta.namespace.clone().unwrap_or_default(),
            generation: meta.generation.unwrap_or_default(),
            resource_version: meta.resource_version.clone().unwrap_or_default(),
            uid: meta.uid.clone().unwrap_or_default(),
            deleting: meta.deletion_timestamp.is_some(),
        }
    }
}

/// Labels on every Tiller object
pub fn tiller_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "helm".to_string()),
        ("name".to_string(), "tiller".to_string()),
    ])
}

fn tiller_env(opts: &TillerOptions) -> Vec<EnvVar> {
    vec![
        EnvVar {
            name: "TILLER_NAMESPACE".to_string(),
            value: Some(opts.namespace.clone()),
            ..Default::default()
        },
        EnvVar {
            name: "TILLER_HISTORY_MAX".to_string(),
            value: Some(opts.max_history.to_string()),
            ..Default::default()
        },
    ]
}

fn probe(path: &str) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(i32::from(TILLER_PROBE_PORT)),
            ..Default::default()
        }),
        initial_delay_seconds: Some(1),
        timeout_seconds: Some(1),
        ..Default::default()
    }
}

/// The `tiller-deploy` deployment
pub fn tiller_deployment(opts: &TillerOptions) -> Deployment {
    let labels = tiller_labels();
    Deployment {
        metadata: ObjectMeta {
            name: Some(DEPLOYMENT_NAME.to_string()),
            namespace: Some(opts.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(opts.service_account.clone()),
                    automount_service_account_token: Some(true),
                    containers: vec![Container {
                        name: CONTAINER_NAME.to_string(),
                        image: Some(opts.image.clone()),
                        image_pull_policy: Some("IfNotPresent".to_string()),
                        ports: Some(vec![
                            ContainerPort {
                                name: Some("tiller".to_string()),
                                container_port: i32::from(TILLER_PORT),
                                ..Default::default()
                            },
                            ContainerPort {
                                name: Some("http".to_string()),
                                container_port: i32::from(TILLER_PROBE_PORT),
                                ..Default::default()
                            },
                        ]),
                        env: Some(tiller_env(opts)),
                        liveness_probe: Some(probe("/liveness")),
                        readiness_probe: Some(probe("/readiness")),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The service fronting Tiller's gRPC port
pub fn tiller_service(namespace: &str) -> Service {
    let labels = tiller_labels();
    Service {
        metadata: ObjectMeta {
            name: Some(DEPLOYMENT_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some("tiller".to_string()),
                port: i32::from(TILLER_PORT),
                target_port: Some(IntOrString::String("tiller".to_string())),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Patch applied on in-place updates
pub fn upgrade_patch(opts: &TillerOptions) -> serde_json::Value {
    json!({
        "spec": {
            "template": {
                "spec": {
                    "serviceAccountName": opts.service_account,
                    "containers": [{
                        "name": CONTAINER_NAME,
                        "image": opts.image,
                        "env": tiller_env(opts),
                    }],
                },
            },
        },
    })
}

/// Delete parameters for the deployment
///
/// Foreground propagation keeps the deployment, with a deletion timestamp,
/// until its pods are gone.
pub fn delete_params() -> DeleteParams {
    DeleteParams {
        propagation_policy: Some(PropagationPolicy::Foreground),
        ..Default::default()
    }
}

/// Installs, inspects and removes Tiller
#[derive(Clone)]
pub struct TillerManager {
    client: Client,
}

impl TillerManager {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Create `namespace` unless it already exists
    pub async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        if api.get_opt(namespace).await?.is_some() {
            return Ok(());
        }

        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => {
                info!(namespace, "Created namespace");
                Ok(())
            }
            Err(e) => {
                let err = KubeError::from(e);
                if err.is_conflict() { Ok(()) } else { Err(err) }
            }
        }
    }

    /// Install Tiller
    pub async fn install(&self, opts: &TillerOptions) -> Result<TillerStatus> {
        self.ensure_namespace(&opts.namespace).await?;

        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &opts.namespace);
        let created = deployments
            .create(&PostParams::default(), &tiller_deployment(opts))
            .await?;

        let services: Api<Service> = Api::namespaced(self.client.clone(), &opts.namespace);
        match services
            .create(&PostParams::default(), &tiller_service(&opts.namespace))
            .await
        {
            Ok(_) => {}
            Err(e) => {
                let err = KubeError::from(e);
                if !err.is_conflict() {
                    return Err(err);
                }
                debug!(namespace = %opts.namespace, "tiller service already exists");
            }
        }

        info!(namespace = %opts.namespace, image = %opts.image, "Installed tiller");
        Ok(TillerStatus::from_deployment(&created))
    }

    /// Current deployment state, `None` when absent
    pub async fn get(&self, namespace: &str) -> Result<Option<TillerStatus>> {
        Ok(self
            .deployment(namespace)
            .await?
            .as_ref()
            .map(TillerStatus::from_deployment))
    }

    /// The raw deployment, `None` when absent
    pub async fn deployment(&self, namespace: &str) -> Result<Option<Deployment>> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(deployments.get_opt(DEPLOYMENT_NAME).await?)
    }

    /// Update image, service account and history limit in place
    pub async fn upgrade(&self, opts: &TillerOptions) -> Result<TillerStatus> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &opts.namespace);
        let patched = deployments
            .patch(
                DEPLOYMENT_NAME,
                &PatchParams::default(),
                &Patch::Strategic(upgrade_patch(opts)),
            )
            .await?;
        info!(namespace = %opts.namespace, image = %opts.image, "Upgraded tiller");
        Ok(TillerStatus::from_deployment(&patched))
    }

    /// Remove the deployment and service
    pub async fn uninstall(&self, namespace: &str) -> Result<()> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found(deployments.delete(DEPLOYMENT_NAME, &delete_params()).await.map(|_| ()))?;

        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found(
            services
                .delete(DEPLOYMENT_NAME, &DeleteParams::default())
                .await
                .map(|_| ()),
        )?;

        info!(namespace, "Uninstalled tiller");
        Ok(())
    }
}

fn ignore_not_found(result: std::result::Result<(), kube::Error>) -> Result<()> {
    match result.map_err(KubeError::from) {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
