//! Domain Ports - Core trait definitions for the EdgeFS operator
//!
//! These traits define the boundaries between the reconcile logic and the
//! orchestration API / discovery agent. Adapters in [`crate::controller`]
//! implement them against a live cluster; tests use in-memory fakes.

use crate::crd::{Cluster, ClusterStatus};
use crate::domain::devices::{select_available_devices, DeviceRef, DeviceSelection, LocalDisk};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Node, Service};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Apply Outcome
// =============================================================================

/// Result of a create-or-update style call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    /// Object already existed and was left untouched
    Unchanged,
}

impl std::fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyOutcome::Created => write!(f, "created"),
            ApplyOutcome::Updated => write!(f, "updated"),
            ApplyOutcome::Unchanged => write!(f, "unchanged"),
        }
    }
}

// =============================================================================
// Cluster API Port
// =============================================================================

/// Orchestration API operations the operator depends on
#[async_trait]
pub trait ClusterApi: Send + Sync {
    // --- Nodes ---

    /// List all nodes
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// Get a node by name
    async fn get_node(&self, name: &str) -> Result<Option<Node>>;

    /// Merge-patch node labels; `None` values remove the key
    async fn patch_node_labels(
        &self,
        name: &str,
        labels: &BTreeMap<String, Option<String>>,
    ) -> Result<()>;

    // --- Config maps ---

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;

    async fn list_config_maps(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ConfigMap>>;

    /// Create, or replace when it already exists
    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<ApplyOutcome>;

    // --- Workloads ---

    /// Create a service; an existing service is left as is
    async fn ensure_service(&self, service: &Service) -> Result<ApplyOutcome>;

    /// Delete a service with foreground propagation; `false` when missing
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<bool>;

    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>>;

    /// Create, or update when it already exists
    async fn apply_stateful_set(&self, stateful_set: &StatefulSet) -> Result<ApplyOutcome>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    /// Create, or update when it already exists
    async fn apply_deployment(&self, deployment: &Deployment) -> Result<ApplyOutcome>;

    /// Delete a deployment with foreground propagation; `false` when missing
    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<bool>;

    // --- Cluster resources ---

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>>;

    async fn update_cluster_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ClusterStatus,
    ) -> Result<()>;

    /// Replace the finalizer list of a cluster resource
    async fn set_cluster_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<()>;
}

// =============================================================================
// Device Discovery Port
// =============================================================================

/// Per-node raw device inventory
#[async_trait]
pub trait DeviceDiscovery: Send + Sync {
    /// Devices per node; `None` lists every node
    async fn list_devices(&self, node_name: Option<&str>)
        -> Result<BTreeMap<String, Vec<LocalDisk>>>;

    /// Devices of a node matching the selection
    async fn get_available_devices(
        &self,
        node_name: &str,
        selection: &DeviceSelection,
    ) -> Result<Vec<DeviceRef>> {
        if selection.is_empty() {
            return Ok(Vec::new());
        }
        let inventory = self.list_devices(Some(node_name)).await?;
        let disks = inventory.get(node_name).ok_or_else(|| Error::Discovery {
            node: node_name.to_string(),
            reason: format!("node {} has no devices", node_name),
        })?;
        Ok(select_available_devices(disks, selection))
    }
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ClusterApiRef = Arc<dyn ClusterApi>;
pub type DeviceDiscoveryRef = Arc<dyn DeviceDiscovery>;
