//! Device discovery backed by the discovery agent's config maps
//!
//! The agent runs on every node and publishes one config map per node in
//! the operator namespace, labeled `app=rook-discover` and
//! `rook.io/node=<node>`, with the disks as JSON under `devices`.

use super::retry::{retry_if, FixedInterval};
use crate::domain::devices::LocalDisk;
use crate::domain::ports::{ClusterApiRef, DeviceDiscovery};
use crate::error::{Error, Result};
use crate::workload::APP_LABEL;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub const DISCOVER_APP_NAME: &str = "rook-discover";
pub const NODE_ATTR: &str = "rook.io/node";
pub const LOCAL_DISK_DATA_KEY: &str = "devices";

const ALL_NODES: &str = "*";

pub struct ConfigMapDiscovery {
    api: ClusterApiRef,
    namespace: String,
    policy: FixedInterval,
}

impl ConfigMapDiscovery {
    pub fn new(api: ClusterApiRef, namespace: impl Into<String>, policy: FixedInterval) -> Self {
        Self {
            api,
            namespace: namespace.into(),
            policy,
        }
    }

    async fn list_once(
        &self,
        node_name: Option<&str>,
    ) -> Result<BTreeMap<String, Vec<LocalDisk>>> {
        let selector = format!("{}={}", APP_LABEL, DISCOVER_APP_NAME);
        let config_maps = self.api.list_config_maps(&self.namespace, &selector).await?;
        if config_maps.is_empty() {
            info!("No device config map in {} yet", self.namespace);
            return Err(Error::Discovery {
                node: node_name.unwrap_or(ALL_NODES).to_string(),
                reason: "waiting for device config maps to appear".into(),
            });
        }

        let mut devices = BTreeMap::new();
        for cm in config_maps {
            let node = cm
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(NODE_ATTR))
                .cloned()
                .unwrap_or_default();
            if node_name.map_or(false, |n| n != node) {
                continue;
            }
            let json = cm
                .data
                .as_ref()
                .and_then(|d| d.get(LOCAL_DISK_DATA_KEY))
                .cloned()
                .unwrap_or_default();
            debug!("node {}, devices {}", node, json);
            if node.is_empty() || json.is_empty() {
                continue;
            }
            match serde_json::from_str::<Vec<LocalDisk>>(&json) {
                Ok(disks) => {
                    devices.insert(node, disks);
                }
                Err(e) => warn!("Failed to unmarshal devices of node {}: {}", node, e),
            }
        }
        Ok(devices)
    }
}

#[async_trait]
impl DeviceDiscovery for ConfigMapDiscovery {
    async fn list_devices(
        &self,
        node_name: Option<&str>,
    ) -> Result<BTreeMap<String, Vec<LocalDisk>>> {
        let devices = retry_if(
            self.policy.clone(),
            "waiting for device config maps",
            |e| matches!(e, Error::Discovery { .. }),
            || self.list_once(node_name),
        )
        .await?;
        debug!("Discovery found devices on {} nodes", devices.len());
        Ok(devices)
    }
}
