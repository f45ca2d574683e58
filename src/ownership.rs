//! Owner references between rollouts, replacements and nodes.
//!
//! Ownership is metadata, not a pointer: a reference is the tuple (kind,
//! apiVersion, name, uid, controller, blockOwnerDeletion) and two references
//! are the same owner only when every element is equal.

use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use crate::crd::{NodeReplacement, NodeRollout};

/// Build an owner reference for any resource with static type information.
pub fn owner_ref<K>(owner: &K, controller: bool, block_owner_deletion: bool) -> OwnerReference
where
    K: Resource<DynamicType = ()>,
{
    OwnerReference {
        api_version: K::api_version(&()).into_owned(),
        kind: K::kind(&()).into_owned(),
        name: owner.name_any(),
        uid: owner.uid().unwrap_or_default(),
        controller: Some(controller),
        block_owner_deletion: Some(block_owner_deletion),
    }
}

/// The controlling, deletion-blocking reference a rollout puts on its replacements
pub fn rollout_owner_ref(rollout: &NodeRollout) -> OwnerReference {
    owner_ref(rollout, true, true)
}

/// The informational back-reference from a replacement to its node.
///
/// Neither controlling nor blocking: deleting the replacement must never
/// cascade to the node.
pub fn node_back_ref(node: &Node) -> OwnerReference {
    owner_ref(node, false, false)
}

/// Returns true if `obj` carries exactly `owner` among its owner references
pub fn is_owned_by(refs: &[OwnerReference], owner: &OwnerReference) -> bool {
    refs.iter().any(|r| r == owner)
}

/// Keep only the replacements owned by this exact rollout
pub fn owned_replacements(
    replacements: Vec<NodeReplacement>,
    rollout: &NodeRollout,
) -> Vec<NodeReplacement> {
    let owner = rollout_owner_ref(rollout);
    replacements
        .into_iter()
        .filter(|r| is_owned_by(r.owner_references(), &owner))
        .collect()
}
