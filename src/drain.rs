//! Cordon and eviction of a node's workloads.
//!
//! The replacement handler only records outcomes; the mechanics live behind
//! [`NodeDrainer`]. [`KubeNodeDrainer`] marks the node unschedulable and
//! evicts through the Eviction API so PodDisruptionBudgets are honored.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, DeleteParams, EvictParams, Patch, PatchParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::store::FIELD_MANAGER;
use crate::Error;

/// Trait abstracting node cordon and pod eviction
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeDrainer: Send + Sync {
    /// Mark the node unschedulable
    async fn cordon(&self, node_name: &str) -> Result<(), Error>;

    /// Evict one pod, with an optional grace period override
    async fn evict(
        &self,
        pod_name: &str,
        namespace: &str,
        grace_period_seconds: Option<i64>,
    ) -> Result<(), Error>;
}

/// Real Kubernetes implementation of [`NodeDrainer`]
pub struct KubeNodeDrainer {
    client: Client,
}

impl KubeNodeDrainer {
    /// Create a new KubeNodeDrainer wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeDrainer for KubeNodeDrainer {
    async fn cordon(&self, node_name: &str) -> Result<(), Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        let patch = serde_json::json!({ "spec": { "unschedulable": true } });

        api.patch(node_name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::drain(format!("cordon {node_name}: {e}")))?;
        Ok(())
    }

    async fn evict(
        &self,
        pod_name: &str,
        namespace: &str,
        grace_period_seconds: Option<i64>,
    ) -> Result<(), Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = EvictParams {
            delete_options: Some(DeleteParams {
                grace_period_seconds: grace_period_seconds
                    .and_then(|g| u32::try_from(g).ok()),
                ..Default::default()
            }),
            ..Default::default()
        };

        match api.evict(pod_name, &params).await {
            Ok(_) => Ok(()),
            // Already gone counts as evicted
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(pod = %pod_name, namespace = %namespace, "pod already deleted");
                Ok(())
            }
            Err(e) => Err(Error::drain(format!("evict {namespace}/{pod_name}: {e}"))),
        }
    }
}
