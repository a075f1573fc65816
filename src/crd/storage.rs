//! Storage scope of a cluster
//!
//! Which nodes take part in the cluster and which devices or directories
//! each of them contributes. Node entries inherit cluster-wide selection
//! and tuning values they do not set themselves.

use crate::domain::devices::{DeviceRef, DeviceSelection};
use k8s_openapi::api::core::v1::ResourceRequirements;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Directory on the host reserved for operator state
pub const OPERATOR_DATA_DIR: &str = "/var/lib/rook";

// =============================================================================
// Selection
// =============================================================================

/// A raw device picked by name or by full by-id path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub full_path: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
}

/// A host directory backing an rtlfs device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
    pub path: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
}

/// Device and directory selection, shared by the scope and node entries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    /// Claim every empty device on the node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_all_devices: Option<bool>,

    /// Regular expression matched against kernel device names
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device_filter: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<Device>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directories: Vec<Directory>,
}

impl Selection {
    pub fn get_use_all_devices(&self) -> bool {
        self.use_all_devices.unwrap_or(false)
    }

    /// Whether the selection names devices in any way
    pub fn has_devices(&self) -> bool {
        self.get_use_all_devices() || !self.device_filter.is_empty() || !self.devices.is_empty()
    }

    /// Selection handed to device discovery
    pub fn device_selection(&self) -> DeviceSelection {
        DeviceSelection {
            devices: self
                .devices
                .iter()
                .map(|d| DeviceRef {
                    name: d.name.clone(),
                    full_path: d.full_path.clone(),
                })
                .collect(),
            filter: self.device_filter.clone(),
            use_all: self.get_use_all_devices(),
        }
    }
}

// =============================================================================
// Nodes
// =============================================================================

/// A node taking part in the cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageNode {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Per-node tuning, merged over the scope config
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,

    #[serde(flatten)]
    pub selection: Selection,
}

impl StorageNode {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// Storage scope of the cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageScopeSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<StorageNode>,

    /// Use every node reported by device discovery
    #[serde(default)]
    pub use_all_nodes: bool,

    /// Cluster-wide tuning
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,

    #[serde(flatten)]
    pub selection: Selection,
}

impl StorageScopeSpec {
    /// Node entry with cluster-wide selection and config applied.
    ///
    /// Returns `None` when the node is not listed and `useAllNodes` is off.
    pub fn resolve_node(&self, node_name: &str) -> Option<StorageNode> {
        let mut node = match self.nodes.iter().find(|n| n.name == node_name) {
            Some(n) => n.clone(),
            None if self.use_all_nodes => StorageNode::named(node_name),
            None => return None,
        };

        if node.selection.use_all_devices.is_none() {
            node.selection.use_all_devices = self.selection.use_all_devices;
        }
        if node.selection.device_filter.is_empty() {
            node.selection.device_filter = self.selection.device_filter.clone();
        }
        if node.selection.devices.is_empty() {
            node.selection.devices = self.selection.devices.clone();
        }
        for (k, v) in &self.config {
            node.config.entry(k.clone()).or_insert_with(|| v.clone());
        }
        Some(node)
    }

    /// Whether the scope or any node entry asks for raw devices
    pub fn has_devices_specification(&self) -> bool {
        self.selection.has_devices() || self.nodes.iter().any(|n| n.selection.has_devices())
    }

    /// Whether `useAllDevices` is on anywhere in the scope
    pub fn any_use_all_devices(&self) -> bool {
        self.selection.get_use_all_devices()
            || self.nodes.iter().any(|n| n.selection.get_use_all_devices())
    }

    pub fn directories(&self) -> &[Directory] {
        &self.selection.directories
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> StorageScopeSpec {
        let mut config = BTreeMap::new();
        config.insert("useMetadataOffload".to_string(), "true".to_string());
        config.insert("zone".to_string(), "1".to_string());

        let mut node_config = BTreeMap::new();
        node_config.insert("zone".to_string(), "2".to_string());

        StorageScopeSpec {
            nodes: vec![StorageNode {
                name: "node-a".into(),
                config: node_config,
                selection: Selection {
                    device_filter: "^sd[c-d]".into(),
                    ..Default::default()
                },
                ..Default::default()
            }],
            use_all_nodes: false,
            config,
            selection: Selection {
                use_all_devices: Some(false),
                device_filter: "^sd".into(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_resolve_listed_node_merges_scope() {
        let node = scope().resolve_node("node-a").unwrap();
        assert_eq!(node.selection.device_filter, "^sd[c-d]");
        assert_eq!(node.selection.use_all_devices, Some(false));
        assert_eq!(node.config.get("zone").map(String::as_str), Some("2"));
        assert_eq!(
            node.config.get("useMetadataOffload").map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn test_resolve_unlisted_node() {
        let mut s = scope();
        assert!(s.resolve_node("node-z").is_none());

        s.use_all_nodes = true;
        let node = s.resolve_node("node-z").unwrap();
        assert_eq!(node.name, "node-z");
        assert_eq!(node.selection.device_filter, "^sd");
        assert_eq!(node.config.get("zone").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_devices_specification() {
        let mut s = StorageScopeSpec::default();
        assert!(!s.has_devices_specification());

        s.nodes.push(StorageNode {
            name: "node-a".into(),
            selection: Selection {
                devices: vec![Device {
                    name: "sdb".into(),
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..Default::default()
        });
        assert!(s.has_devices_specification());
        assert!(!s.any_use_all_devices());

        s.selection.use_all_devices = Some(true);
        assert!(s.any_use_all_devices());
    }

    #[test]
    fn test_flattened_selection_json() {
        let json = r#"{
            "useAllNodes": false,
            "useAllDevices": true,
            "directories": [{"path": "/mnt/edgefs"}],
            "nodes": [{"name": "node-a", "devices": [{"name": "sdb"}]}]
        }"#;
        let s: StorageScopeSpec = serde_json::from_str(json).unwrap();
        assert!(s.selection.get_use_all_devices());
        assert_eq!(s.directories()[0].path, "/mnt/edgefs");
        assert_eq!(s.nodes[0].selection.devices[0].name, "sdb");

        let sel = s.resolve_node("node-a").unwrap().selection.device_selection();
        assert!(sel.use_all);
        assert_eq!(sel.devices[0].name, "sdb");
    }
}
