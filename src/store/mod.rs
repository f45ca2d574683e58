//! Object store access for the controllers
//!
//! The cluster API is the only durable state. [`ObjectStore`] is the narrow
//! slice of it the handlers use: list and get, create, and status writes that
//! are checked against the object's `resourceVersion`. A stale write fails
//! with [`Error::Conflict`].
//!
//! [`KubeStore`] talks to a real API server; [`memory::InMemoryStore`] is a
//! fake with the same contract for tests.

pub mod memory;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};

#[cfg(test)]
use mockall::automock;

use crate::crd::{
    NodeReplacement, NodeReplacementStatus, NodeRollout, NodeRolloutStatus,
};
use crate::Error;

/// Field manager used for every write
pub const FIELD_MANAGER: &str = "fleetroll-controller";

/// Trait abstracting the object store operations used by the handlers
///
/// This trait allows testing the handlers against an in-memory fake or a
/// mock while using the real API server in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List every node in the cluster
    async fn list_nodes(&self) -> Result<Vec<Node>, Error>;

    /// Get a node by name, `None` if it does not exist
    async fn get_node(&self, name: &str) -> Result<Option<Node>, Error>;

    /// List the pods bound to a node
    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>, Error>;

    /// Get a NodeRollout by name
    async fn get_rollout(&self, name: &str) -> Result<NodeRollout, Error>;

    /// Write a NodeRollout's status, conditional on the rollout's resourceVersion
    async fn patch_rollout_status(
        &self,
        rollout: &NodeRollout,
        status: &NodeRolloutStatus,
    ) -> Result<NodeRollout, Error>;

    /// List every NodeReplacement in the cluster
    async fn list_replacements(&self) -> Result<Vec<NodeReplacement>, Error>;

    /// Create a NodeReplacement (honoring `metadata.generateName`)
    async fn create_replacement(
        &self,
        replacement: &NodeReplacement,
    ) -> Result<NodeReplacement, Error>;

    /// Get a NodeReplacement by name
    async fn get_replacement(&self, name: &str) -> Result<NodeReplacement, Error>;

    /// Write a NodeReplacement's status, conditional on its resourceVersion
    async fn patch_replacement_status(
        &self,
        replacement: &NodeReplacement,
        status: &NodeReplacementStatus,
    ) -> Result<NodeReplacement, Error>;
}

/// Build the status merge patch, pinned to the version the status was computed from
fn status_patch<S: serde::Serialize>(
    resource_version: Option<String>,
    status: &S,
) -> serde_json::Value {
    serde_json::json!({
        "metadata": { "resourceVersion": resource_version },
        "status": status,
    })
}

/// Real Kubernetes implementation of [`ObjectStore`]
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Create a new KubeStore wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn list_nodes(&self) -> Result<Vec<Node>, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let lp = ListParams::default().fields(&format!("spec.nodeName={node_name}"));
        Ok(api.list(&lp).await?.items)
    }

    async fn get_rollout(&self, name: &str) -> Result<NodeRollout, Error> {
        let api: Api<NodeRollout> = Api::all(self.client.clone());
        api.get(name)
            .await
            .map_err(|e| Error::from_kube("NodeRollout", name, e))
    }

    async fn patch_rollout_status(
        &self,
        rollout: &NodeRollout,
        status: &NodeRolloutStatus,
    ) -> Result<NodeRollout, Error> {
        let api: Api<NodeRollout> = Api::all(self.client.clone());
        let name = rollout.name_any();
        let patch = status_patch(rollout.resource_version(), status);

        api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube("NodeRollout", &name, e))
    }

    async fn list_replacements(&self) -> Result<Vec<NodeReplacement>, Error> {
        let api: Api<NodeReplacement> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn create_replacement(
        &self,
        replacement: &NodeReplacement,
    ) -> Result<NodeReplacement, Error> {
        let api: Api<NodeReplacement> = Api::all(self.client.clone());
        let pp = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        Ok(api.create(&pp, replacement).await?)
    }

    async fn get_replacement(&self, name: &str) -> Result<NodeReplacement, Error> {
        let api: Api<NodeReplacement> = Api::all(self.client.clone());
        api.get(name)
            .await
            .map_err(|e| Error::from_kube("NodeReplacement", name, e))
    }

    async fn patch_replacement_status(
        &self,
        replacement: &NodeReplacement,
        status: &NodeReplacementStatus,
    ) -> Result<NodeReplacement, Error> {
        let api: Api<NodeReplacement> = Api::all(self.client.clone());
        let name = replacement.name_any();
        let patch = status_patch(replacement.resource_version(), status);

        api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube("NodeReplacement", &name, e))
    }
}
