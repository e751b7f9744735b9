//! Local tunnel to the Tiller pod
//!
//! A listener on `127.0.0.1:0` forwards every accepted connection to the
//! Tiller pod's gRPC port through the Kubernetes port-forward stream.
//! The accept loop runs as a detached task for the life of the process.

use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use kube::api::{Api, ListParams};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{KubeError, Result};

/// Tiller's gRPC port inside the pod
pub const TILLER_PORT: u16 = 44134;

/// Label selector identifying Tiller pods
pub const TILLER_SELECTOR: &str = "app=helm,name=tiller";

/// An open port-forward tunnel
#[derive(Debug)]
pub struct Tunnel {
    pub local: u16,
    pub remote: u16,
    pub namespace: String,
    pub pod: String,
    task: JoinHandle<()>,
}

impl Tunnel {
    /// Find the Tiller pod in `namespace` and start forwarding to it
    pub async fn open(client: Client, namespace: &str) -> Result<Self> {
        let pod = tiller_pod_name(&client, namespace).await?;

        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| KubeError::Tunnel(e.to_string()))?;
        let local = listener
            .local_addr()
            .map_err(|e| KubeError::Tunnel(e.to_string()))?
            .port();

        let pods: Api<Pod> = Api::namespaced(client, namespace);
        let task = tokio::spawn(accept_loop(listener, pods, pod.clone()));

        info!(namespace, pod = %pod, local, "Created tunnel to tiller");

        Ok(Self {
            local,
            remote: TILLER_PORT,
            namespace: namespace.to_string(),
            pod,
            task,
        })
    }

    /// Tiller host as seen by the Helm client
    pub fn host(&self) -> String {
        format!("localhost:{}", self.local)
    }

    /// Whether the accept loop is still running
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Name of the first running Tiller pod in `namespace`
pub async fn tiller_pod_name(client: &Client, namespace: &str) -> Result<String> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let list = pods
        .list(&ListParams::default().labels(TILLER_SELECTOR))
        .await?;

    first_running(&list.items).ok_or_else(|| KubeError::TillerNotFound {
        namespace: namespace.to_string(),
    })
}

fn first_running(pods: &[Pod]) -> Option<String> {
    pods.iter()
        .find(|pod| {
            pod.status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .is_some_and(|phase| phase == "Running")
        })
        .and_then(|pod| pod.metadata.name.clone())
}

async fn accept_loop(listener: TcpListener, pods: Api<Pod>, pod: String) {
    loop {
        let (conn, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "tunnel accept failed");
                continue;
            }
        };
        debug!(%peer, pod = %pod, "forwarding connection to tiller");

        let pods = pods.clone();
        let pod = pod.clone();
        tokio::spawn(async move {
            if let Err(e) = forward(pods, &pod, conn).await {
                warn!(pod = %pod, error = %e, "tunnel connection failed");
            }
        });
    }
}

async fn forward(pods: Api<Pod>, pod: &str, mut conn: TcpStream) -> Result<()> {
    let mut pf = pods.portforward(pod, &[TILLER_PORT]).await?;
    let mut upstream = pf
        .take_stream(TILLER_PORT)
        .ok_or_else(|| KubeError::Tunnel(format!("failed to get stream for port {}", TILLER_PORT)))?;

    tokio::io::copy_bidirectional(&mut conn, &mut upstream).await?;
    drop(upstream);

    pf.join().await.map_err(|e| KubeError::Tunnel(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;
    use kube::api::ObjectMeta;

    fn pod(name: &str, phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_first_running_pod_is_selected() {
        let pods = vec![
            pod("tiller-deploy-1", "Pending"),
            pod("tiller-deploy-2", "Running"),
            pod("tiller-deploy-3", "Running"),
        ];
        assert_eq!(first_running(&pods).as_deref(), Some("tiller-deploy-2"));
    }

    #[test]
    fn test_no_running_pod() {
        assert_eq!(first_running(&[pod("tiller", "Failed")]), None);
        assert_eq!(first_running(&[]), None);
    }
}
