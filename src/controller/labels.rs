//! Node labels written by the Cluster controller
//!
//! `<namespace>=cluster` pins target pods to the nodes of a cluster. The
//! label is removed again when a node leaves the cluster or the cluster is
//! deleted.

use super::retry::{retry_on_conflict, FixedInterval};
use crate::domain::ports::ClusterApi;
use crate::error::Result;
use crate::workload::CLUSTER_NODE_LABEL_VALUE;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Merge `labels` into a node, retrying conflicts
pub async fn add_node_labels(
    api: &dyn ClusterApi,
    node: &str,
    labels: &BTreeMap<String, String>,
    policy: FixedInterval,
) -> Result<()> {
    let patch: BTreeMap<String, Option<String>> = labels
        .iter()
        .map(|(k, v)| (k.clone(), Some(v.clone())))
        .collect();
    let what = format!("labeling node {}", node);
    retry_on_conflict(policy, &what, || api.patch_node_labels(node, &patch)).await
}

/// Remove label keys from a node. Missing nodes and keys are not errors.
pub async fn remove_node_labels(
    api: &dyn ClusterApi,
    node: &str,
    keys: &[String],
    policy: FixedInterval,
) -> Result<()> {
    let Some(current) = api.get_node(node).await? else {
        debug!("Node {} is gone, nothing to unlabel", node);
        return Ok(());
    };
    let present = current.metadata.labels.unwrap_or_default();
    let patch: BTreeMap<String, Option<String>> = keys
        .iter()
        .filter(|k| present.contains_key(*k))
        .map(|k| (k.clone(), None))
        .collect();
    if patch.is_empty() {
        return Ok(());
    }
    let what = format!("removing labels {:?} from node {}", keys, node);
    retry_on_conflict(policy, &what, || api.patch_node_labels(node, &patch)).await
}

pub async fn label_target_node(
    api: &dyn ClusterApi,
    namespace: &str,
    node: &str,
    policy: FixedInterval,
) -> Result<()> {
    let labels = BTreeMap::from([(
        namespace.to_string(),
        CLUSTER_NODE_LABEL_VALUE.to_string(),
    )]);
    add_node_labels(api, node, &labels, policy).await?;
    info!("[{}] labeled node {} as target", namespace, node);
    Ok(())
}

pub async fn unlabel_target_node(
    api: &dyn ClusterApi,
    namespace: &str,
    node: &str,
    policy: FixedInterval,
) -> Result<()> {
    remove_node_labels(api, node, &[namespace.to_string()], policy).await?;
    info!("[{}] unlabeled node {}", namespace, node);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::fake::FakeClusterApi;
    use crate::deployment::nodes::tests::ready_node;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn policy() -> FixedInterval {
        FixedInterval::with_attempts(Duration::from_millis(1), 5)
    }

    #[tokio::test]
    async fn test_label_survives_conflicts() {
        let api = FakeClusterApi::default();
        api.add_node(ready_node("node-a"));
        api.fail_label_patches(3);

        assert_ok!(label_target_node(&api, "rook-edgefs", "node-a", policy()).await);
        assert_eq!(
            api.node_labels("node-a").get("rook-edgefs").map(String::as_str),
            Some("cluster")
        );
    }

    #[tokio::test]
    async fn test_label_gives_up_after_budget() {
        let api = FakeClusterApi::default();
        api.add_node(ready_node("node-a"));
        api.fail_label_patches(5);

        let err = assert_err!(label_target_node(&api, "rook-edgefs", "node-a", policy()).await);
        assert!(err.is_conflict());
        assert!(api.node_labels("node-a").get("rook-edgefs").is_none());
    }

    #[tokio::test]
    async fn test_unlabel_keeps_other_labels() {
        let api = FakeClusterApi::default();
        api.add_node(ready_node("node-a"));
        api.set_node_label("node-a", "rook-edgefs", "cluster");
        api.set_node_label("node-a", "rook-edgefs-nodetype", "gateway");

        unlabel_target_node(&api, "rook-edgefs", "node-a", policy())
            .await
            .unwrap();
        let labels = api.node_labels("node-a");
        assert!(!labels.contains_key("rook-edgefs"));
        assert_eq!(labels.get("rook-edgefs-nodetype").map(String::as_str), Some("gateway"));
    }

    #[tokio::test]
    async fn test_unlabel_missing_node_or_label() {
        let api = FakeClusterApi::default();
        unlabel_target_node(&api, "rook-edgefs", "ghost", policy())
            .await
            .unwrap();

        api.add_node(ready_node("node-a"));
        api.fail_label_patches(1);
        unlabel_target_node(&api, "rook-edgefs", "node-a", policy())
            .await
            .unwrap();
        // no patch was sent, so the injected conflict is still pending
        let single = FixedInterval::with_attempts(Duration::from_millis(1), 1);
        let err = label_target_node(&api, "rook-edgefs", "node-a", single)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }
}
