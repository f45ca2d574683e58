//! Node selection: map a rollout's selector and name entries onto the live
//! node inventory.
//!
//! Selector entries are applied first in the order given, later entries
//! overwriting earlier ones for the same node. Name entries are applied second
//! and always overwrite. A name that is not in the inventory is skipped since
//! the node list is only a snapshot. A malformed selector aborts the whole
//! selection and no partial result is returned.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use kube::ResourceExt;

use crate::crd::{NodeReplacementSpec, PriorityLabelSelector, PriorityName, ReplacementSpec};
use crate::Error;

/// A node chosen for replacement, with the parameters of the entry that won it
#[derive(Clone, Debug, PartialEq)]
pub struct NodeTarget {
    /// The node as listed
    pub node: Node,
    /// Spec for the NodeReplacement to create for this node
    pub spec: NodeReplacementSpec,
}

impl NodeTarget {
    fn new(node: &Node, priority: Option<i32>, replacement: &ReplacementSpec) -> Self {
        Self {
            node: node.clone(),
            spec: NodeReplacementSpec {
                node_name: node.name_any(),
                node_uid: node.uid().unwrap_or_default(),
                priority,
                replacement: replacement.clone(),
            },
        }
    }
}

/// Label-selector operators understood by Kubernetes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl Operator {
    fn parse(op: &str) -> Result<Self, Error> {
        match op {
            "In" => Ok(Self::In),
            "NotIn" => Ok(Self::NotIn),
            "Exists" => Ok(Self::Exists),
            "DoesNotExist" => Ok(Self::DoesNotExist),
            other => Err(Error::validation(format!(
                "invalid label selector operator {other:?}"
            ))),
        }
    }

    fn matches(&self, label_value: Option<&str>, values: &[String]) -> bool {
        match self {
            Self::In => label_value.is_some_and(|v| values.iter().any(|req| req == v)),
            Self::NotIn => {
                label_value.is_none() || !values.iter().any(|req| Some(req.as_str()) == label_value)
            }
            Self::Exists => label_value.is_some(),
            Self::DoesNotExist => label_value.is_none(),
        }
    }
}

/// A validated requirement, ready to evaluate
#[derive(Debug)]
struct Requirement<'a> {
    key: &'a str,
    operator: Operator,
    values: &'a [String],
}

impl<'a> Requirement<'a> {
    fn parse(req: &'a LabelSelectorRequirement) -> Result<Self, Error> {
        let operator = Operator::parse(&req.operator)?;
        let values = req.values.as_deref().unwrap_or_default();

        if req.key.is_empty() {
            return Err(Error::validation("label selector requirement has an empty key"));
        }
        match operator {
            Operator::In | Operator::NotIn if values.is_empty() => {
                return Err(Error::validation(format!(
                    "label selector requirement {:?}: values must be non-empty for {}",
                    req.key, req.operator
                )));
            }
            Operator::Exists | Operator::DoesNotExist if !values.is_empty() => {
                return Err(Error::validation(format!(
                    "label selector requirement {:?}: values must be empty for {}",
                    req.key, req.operator
                )));
            }
            _ => {}
        }

        Ok(Self {
            key: &req.key,
            operator,
            values,
        })
    }

    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(self.key).map(|s| s.as_str());
        self.operator.matches(value, self.values)
    }
}

/// A label selector that has been checked for well-formedness.
///
/// Like Kubernetes, an empty selector matches every node.
#[derive(Debug)]
pub struct CompiledSelector<'a> {
    match_labels: Option<&'a BTreeMap<String, String>>,
    requirements: Vec<Requirement<'a>>,
}

impl<'a> CompiledSelector<'a> {
    /// Validate a label selector
    pub fn compile(selector: &'a LabelSelector) -> Result<Self, Error> {
        let requirements = selector
            .match_expressions
            .iter()
            .flatten()
            .map(Requirement::parse)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            match_labels: selector.match_labels.as_ref(),
            requirements,
        })
    }

    /// Check whether a label set satisfies every term of the selector
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        if let Some(match_labels) = self.match_labels {
            for (key, value) in match_labels {
                if labels.get(key) != Some(value) {
                    return false;
                }
            }
        }

        self.requirements.iter().all(|req| req.matches(labels))
    }
}

/// Compute the deduplicated target map for a rollout.
///
/// Keys are node names. Name entries take precedence over selector entries
/// regardless of their relative order in the spec.
pub fn select_targets(
    nodes: &[Node],
    selectors: &[PriorityLabelSelector],
    names: &[PriorityName],
) -> Result<BTreeMap<String, NodeTarget>, Error> {
    let mut targets = BTreeMap::new();

    for entry in selectors {
        let selector = CompiledSelector::compile(&entry.label_selector)?;
        for node in nodes {
            if selector.matches(node.labels()) {
                targets.insert(
                    node.name_any(),
                    NodeTarget::new(node, entry.priority, &entry.replacement),
                );
            }
        }
    }

    for entry in names {
        match nodes.iter().find(|n| n.name_any() == entry.name) {
            Some(node) => {
                targets.insert(
                    entry.name.clone(),
                    NodeTarget::new(node, entry.priority, &entry.replacement),
                );
            }
            None => {
                tracing::debug!(node = %entry.name, "named node not in inventory, skipping");
            }
        }
    }

    Ok(targets)
}
