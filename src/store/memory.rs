//! In-memory [`ObjectStore`] with the same optimistic-concurrency contract as
//! the API server.
//!
//! Every write bumps a store-wide resourceVersion; a status write carrying a
//! stale version is rejected with [`Error::Conflict`]. Failures can be
//! injected per node name (replacement creation) or as a number of upcoming
//! status-write conflicts, to simulate concurrent writers.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::ResourceExt;
use tokio::sync::RwLock;

use super::ObjectStore;
use crate::crd::{NodeReplacement, NodeReplacementStatus, NodeRollout, NodeRolloutStatus};
use crate::Error;

#[derive(Default)]
struct State {
    version: u64,
    generated: u64,
    nodes: BTreeMap<String, Node>,
    pods: Vec<Pod>,
    rollouts: BTreeMap<String, NodeRollout>,
    replacements: BTreeMap<String, NodeReplacement>,
    create_failures: HashMap<String, String>,
    pending_conflicts: u32,
    create_calls: usize,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// Thread-safe in-memory object store
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a node
    pub async fn put_node(&self, node: Node) {
        let mut state = self.state.write().await;
        state.nodes.insert(node.name_any(), node);
    }

    /// Remove a node, as if it had been deleted from the cluster
    pub async fn remove_node(&self, name: &str) {
        self.state.write().await.nodes.remove(name);
    }

    /// Add a pod
    pub async fn put_pod(&self, pod: Pod) {
        self.state.write().await.pods.push(pod);
    }

    /// Add a rollout, assigning it a uid and resourceVersion if missing
    pub async fn put_rollout(&self, mut rollout: NodeRollout) -> NodeRollout {
        let mut state = self.state.write().await;
        let name = rollout.name_any();
        if rollout.metadata.uid.is_none() {
            rollout.metadata.uid = Some(format!("uid-rollout-{name}"));
        }
        rollout.metadata.resource_version = Some(state.next_version());
        state.rollouts.insert(name, rollout.clone());
        rollout
    }

    /// Add a replacement as-is, bypassing generateName
    pub async fn put_replacement(&self, mut replacement: NodeReplacement) -> NodeReplacement {
        let mut state = self.state.write().await;
        replacement.metadata.resource_version = Some(state.next_version());
        state
            .replacements
            .insert(replacement.name_any(), replacement.clone());
        replacement
    }

    /// Make every future replacement creation for `node_name` fail with `message`
    pub async fn fail_creation_for(&self, node_name: &str, message: &str) {
        self.state
            .write()
            .await
            .create_failures
            .insert(node_name.to_string(), message.to_string());
    }

    /// Clear all injected creation failures
    pub async fn clear_creation_failures(&self) {
        self.state.write().await.create_failures.clear();
    }

    /// Reject the next `count` status writes with a conflict, bumping the
    /// stored version each time as a concurrent writer would
    pub async fn inject_conflicts(&self, count: u32) {
        self.state.write().await.pending_conflicts = count;
    }

    /// Number of create calls that reached the store
    pub async fn create_calls(&self) -> usize {
        self.state.read().await.create_calls
    }

    /// Snapshot of every stored replacement
    pub async fn replacements(&self) -> Vec<NodeReplacement> {
        self.state.read().await.replacements.values().cloned().collect()
    }

    fn take_conflict(state: &mut State, kind: &'static str, name: &str) -> Result<(), Error> {
        if state.pending_conflicts == 0 {
            return Ok(());
        }
        state.pending_conflicts -= 1;
        let version = state.next_version();
        match kind {
            "NodeRollout" => {
                if let Some(r) = state.rollouts.get_mut(name) {
                    r.metadata.resource_version = Some(version);
                }
            }
            _ => {
                if let Some(r) = state.replacements.get_mut(name) {
                    r.metadata.resource_version = Some(version);
                }
            }
        }
        Err(Error::conflict(kind, name))
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn list_nodes(&self) -> Result<Vec<Node>, Error> {
        Ok(self.state.read().await.nodes.values().cloned().collect())
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>, Error> {
        Ok(self.state.read().await.nodes.get(name).cloned())
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>, Error> {
        let state = self.state.read().await;
        Ok(state
            .pods
            .iter()
            .filter(|p| {
                p.spec
                    .as_ref()
                    .and_then(|s| s.node_name.as_deref())
                    .is_some_and(|n| n == node_name)
            })
            .cloned()
            .collect())
    }

    async fn get_rollout(&self, name: &str) -> Result<NodeRollout, Error> {
        self.state
            .read()
            .await
            .rollouts
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("NodeRollout", name))
    }

    async fn patch_rollout_status(
        &self,
        rollout: &NodeRollout,
        status: &NodeRolloutStatus,
    ) -> Result<NodeRollout, Error> {
        let name = rollout.name_any();
        let mut state = self.state.write().await;
        Self::take_conflict(&mut state, "NodeRollout", &name)?;

        let current_version = state
            .rollouts
            .get(&name)
            .ok_or_else(|| Error::not_found("NodeRollout", &name))?
            .resource_version();
        if rollout.resource_version() != current_version {
            return Err(Error::conflict("NodeRollout", name));
        }

        let version = state.next_version();
        let stored = state
            .rollouts
            .get_mut(&name)
            .ok_or_else(|| Error::not_found("NodeRollout", &name))?;
        stored.status = Some(status.clone());
        stored.metadata.resource_version = Some(version);
        Ok(stored.clone())
    }

    async fn list_replacements(&self) -> Result<Vec<NodeReplacement>, Error> {
        Ok(self.replacements().await)
    }

    async fn create_replacement(
        &self,
        replacement: &NodeReplacement,
    ) -> Result<NodeReplacement, Error> {
        let mut state = self.state.write().await;
        state.create_calls += 1;

        if let Some(message) = state.create_failures.get(&replacement.spec.node_name) {
            return Err(Error::store(message.clone()));
        }

        let mut created = replacement.clone();
        let name = match (&created.metadata.name, &created.metadata.generate_name) {
            (Some(name), _) => name.clone(),
            (None, Some(prefix)) => {
                state.generated += 1;
                format!("{prefix}{:05}", state.generated)
            }
            (None, None) => {
                return Err(Error::validation(
                    "NodeReplacement needs metadata.name or metadata.generateName",
                ))
            }
        };
        if state.replacements.contains_key(&name) {
            return Err(Error::store(format!(
                "NodeReplacement {name} already exists"
            )));
        }

        created.metadata.name = Some(name.clone());
        created.metadata.uid = Some(format!("uid-replacement-{name}"));
        created.metadata.resource_version = Some(state.next_version());
        state.replacements.insert(name, created.clone());
        Ok(created)
    }

    async fn get_replacement(&self, name: &str) -> Result<NodeReplacement, Error> {
        self.state
            .read()
            .await
            .replacements
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("NodeReplacement", name))
    }

    async fn patch_replacement_status(
        &self,
        replacement: &NodeReplacement,
        status: &NodeReplacementStatus,
    ) -> Result<NodeReplacement, Error> {
        let name = replacement.name_any();
        let mut state = self.state.write().await;
        Self::take_conflict(&mut state, "NodeReplacement", &name)?;

        let current_version = state
            .replacements
            .get(&name)
            .ok_or_else(|| Error::not_found("NodeReplacement", &name))?
            .resource_version();
        if replacement.resource_version() != current_version {
            return Err(Error::conflict("NodeReplacement", name));
        }

        let version = state.next_version();
        let stored = state
            .replacements
            .get_mut(&name)
            .ok_or_else(|| Error::not_found("NodeReplacement", &name))?;
        stored.status = Some(status.clone());
        stored.metadata.resource_version = Some(version);
        Ok(stored.clone())
    }
}
