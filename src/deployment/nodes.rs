//! Node validity
//!
//! A spec node takes part in the cluster only when a Kubernetes node with
//! that name (or `kubernetes.io/hostname` label) exists, is schedulable,
//! reports `Ready=True` and has no scheduling taint the target placement
//! fails to tolerate.

use crate::crd::{Placement, StorageNode, StorageScopeSpec};
use k8s_openapi::api::core::v1::{Node, Taint, Toleration};
use tracing::warn;

pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or_default()
}

fn hostname(node: &Node) -> Option<&str> {
    node.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(HOSTNAME_LABEL))
        .map(String::as_str)
}

fn is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map_or(false, |conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

fn is_schedulable(node: &Node) -> bool {
    !node
        .spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false)
}

fn tolerates(toleration: &Toleration, taint: &Taint) -> bool {
    if let Some(effect) = toleration.effect.as_deref() {
        if !effect.is_empty() && effect != taint.effect {
            return false;
        }
    }
    let operator = toleration.operator.as_deref().unwrap_or("Equal");
    match toleration.key.as_deref() {
        None | Some("") => operator == "Exists",
        Some(key) if key != taint.key => false,
        Some(_) => match operator {
            "Exists" => true,
            _ => toleration.value.as_deref().unwrap_or_default()
                == taint.value.as_deref().unwrap_or_default(),
        },
    }
}

fn taints_tolerated(node: &Node, placement: &Placement) -> bool {
    let tolerations = placement.tolerations.as_deref().unwrap_or_default();
    node.spec
        .as_ref()
        .and_then(|s| s.taints.as_ref())
        .map_or(true, |taints| {
            taints
                .iter()
                .filter(|t| t.effect == "NoSchedule" || t.effect == "NoExecute")
                .all(|t| tolerations.iter().any(|tol| tolerates(tol, t)))
        })
}

/// Whether the node can host a target pod
pub fn is_valid_node(node: &Node, placement: &Placement) -> bool {
    is_ready(node) && is_schedulable(node) && taints_tolerated(node, placement)
}

/// Find the Kubernetes node backing a spec node name
pub fn find_node<'a>(name: &str, nodes: &'a [Node]) -> Option<&'a Node> {
    nodes
        .iter()
        .find(|n| node_name(n) == name)
        .or_else(|| nodes.iter().find(|n| hostname(n) == Some(name)))
}

/// Spec nodes backed by a valid Kubernetes node, in spec order
pub fn get_valid_nodes(
    storage: &StorageScopeSpec,
    nodes: &[Node],
    placement: &Placement,
) -> Vec<StorageNode> {
    storage
        .nodes
        .iter()
        .filter(|spec_node| match find_node(&spec_node.name, nodes) {
            Some(node) if is_valid_node(node, placement) => true,
            Some(_) => {
                warn!("Node {} is not ready or not schedulable, skipping", spec_node.name);
                false
            }
            None => {
                warn!("Node {} not found in the cluster, skipping", spec_node.name);
                false
            }
        })
        .cloned()
        .collect()
}
