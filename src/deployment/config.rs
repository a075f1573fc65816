//! Deployment configuration model
//!
//! Device records as the storage daemons read them (legacy snake_case field
//! names), the per-node device configuration and the cluster-wide
//! deployment configuration with its counting and diff helpers.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

// =============================================================================
// Deployment Type & Transport
// =============================================================================

/// How target daemons store data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeploymentType {
    /// Raw devices
    #[serde(rename = "rtrd")]
    Rtrd,
    /// Host directories listed in the spec
    #[serde(rename = "rtlfs")]
    Rtlfs,
    /// Directories created by the daemon under the data dir
    #[serde(rename = "autoRtlfs")]
    AutoRtlfs,
    /// Key-value SSDs with directory journals
    #[serde(rename = "rtkvs")]
    Rtkvs,
}

impl DeploymentType {
    pub fn transport(&self) -> Transport {
        match self {
            DeploymentType::Rtkvs => Transport::Rtkvs,
            DeploymentType::Rtlfs | DeploymentType::AutoRtlfs => Transport::Rtlfs,
            DeploymentType::Rtrd => Transport::Rtrd,
        }
    }
}

impl std::fmt::Display for DeploymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentType::Rtrd => write!(f, "rtrd"),
            DeploymentType::Rtlfs => write!(f, "rtlfs"),
            DeploymentType::AutoRtlfs => write!(f, "autoRtlfs"),
            DeploymentType::Rtkvs => write!(f, "rtkvs"),
        }
    }
}

/// Transport key written to `ccowd.transport`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Rtrd,
    Rtlfs,
    Rtkvs,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Rtrd => "rtrd",
            Transport::Rtlfs => "rtlfs",
            Transport::Rtkvs => "rtkvs",
        }
    }

    pub fn parse(s: &str) -> Option<Transport> {
        match s {
            "rtrd" => Some(Transport::Rtrd),
            "rtlfs" => Some(Transport::Rtlfs),
            "rtkvs" => Some(Transport::Rtkvs),
            _ => None,
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Role of a node in the cluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    #[default]
    Target,
    Gateway,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeType::Target => write!(f, "target"),
            NodeType::Gateway => write!(f, "gateway"),
        }
    }
}

// =============================================================================
// Device Records
// =============================================================================

/// One raw disk as presented to the storage daemon
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RTDevice {
    /// Stable by-id name
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Block path
    #[serde(skip_serializing_if = "String::is_empty")]
    pub device: String,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub psize: u32,
    pub verify_chid: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub journal: String,
    /// `<ssd-by-id>,<mask>` in offload mode
    #[serde(skip_serializing_if = "String::is_empty")]
    pub metadata: String,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub bcache: u32,
    pub bcache_writearound: u32,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub plevel_override: u32,
    pub sync: u32,
    #[serde(rename = "hdd_readahead", skip_serializing_if = "is_zero_u32")]
    pub hdd_read_ahead: u32,
    #[serde(rename = "payload_s3_bucket_url", skip_serializing_if = "String::is_empty")]
    pub payload_s3_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub payload_s3_region: String,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub payload_s3_min_kb: u32,
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub payload_s3_capacity: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub payload_s3_secret: String,
}

/// Device list of one target daemon
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RTDevices {
    #[serde(default)]
    pub devices: Vec<RTDevice>,
}

/// One directory backing an rtlfs daemon
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtlfsDevice {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
    pub check_mountpoint: u32,
    pub psize: u32,
    pub verify_chid: u32,
    pub plevel_override: u32,
    pub sync: u32,
    pub maxsize: u64,
    #[serde(rename = "payload_s3_bucket_url", skip_serializing_if = "String::is_empty")]
    pub payload_s3_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub payload_s3_region: String,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub payload_s3_min_kb: u32,
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub payload_s3_capacity: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub payload_s3_secret: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RtlfsDevices {
    #[serde(default)]
    pub devices: Vec<RtlfsDevice>,
}

/// One key-value SSD with its journal directory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtkvsDevice {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(rename = "jpath", skip_serializing_if = "String::is_empty")]
    pub journal_path: String,
    #[serde(rename = "jmaxsize", skip_serializing_if = "is_zero_u64")]
    pub journal_maxsize: u64,
    pub verify_chid: u32,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub psize: u32,
    #[serde(rename = "mdcache_reserved", skip_serializing_if = "is_zero_u32")]
    pub md_reserved: u32,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub plevel_override: u32,
    pub sync: u32,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub wal_disabled: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RtkvsDevices {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backend: String,
    #[serde(default)]
    pub devices: Vec<RtkvsDevice>,
}

// =============================================================================
// Per-node Devices Config
// =============================================================================

/// Devices assigned to one node
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicesConfig {
    /// Primary daemon devices
    pub rtrd: RTDevices,
    /// One entry per additional daemon container
    pub rtrd_slaves: Vec<RTDevices>,
    pub rtlfs: RtlfsDevices,
    pub rtkvs: RtkvsDevices,
    pub zone: u32,
    pub is_gateway_node: bool,
}

impl DevicesConfig {
    pub fn gateway(zone: u32) -> Self {
        Self {
            zone,
            is_gateway_node: true,
            ..Default::default()
        }
    }

    pub fn node_type(&self) -> NodeType {
        if self.is_gateway_node {
            NodeType::Gateway
        } else {
            NodeType::Target
        }
    }

    /// Rtrd devices across the primary and slave containers
    pub fn rtrd_devices_count(&self) -> usize {
        self.rtrd.devices.len()
            + self
                .rtrd_slaves
                .iter()
                .map(|s| s.devices.len())
                .sum::<usize>()
    }

    /// Containers with at least one rtrd device
    pub fn rtrd_containers_count(&self) -> usize {
        let primary = usize::from(!self.rtrd.devices.is_empty());
        primary
            + self
                .rtrd_slaves
                .iter()
                .filter(|s| !s.devices.is_empty())
                .count()
    }
}

// =============================================================================
// Cluster Deployment Config
// =============================================================================

/// Cluster-wide deployment plan
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDeploymentConfig {
    pub deployment_type: Option<DeploymentType>,
    pub transport_key: Option<Transport>,
    /// Cluster-wide rtlfs directories
    pub directories: Vec<RtlfsDevice>,
    pub dev_config: BTreeMap<String, DevicesConfig>,
    pub need_privileges: bool,
}

impl ClusterDeploymentConfig {
    pub fn new(deployment_type: DeploymentType, need_privileges: bool) -> Self {
        Self {
            deployment_type: Some(deployment_type),
            transport_key: Some(deployment_type.transport()),
            need_privileges,
            ..Default::default()
        }
    }

    /// Non-gateway nodes
    pub fn targets_count(&self) -> usize {
        self.dev_config
            .values()
            .filter(|c| !c.is_gateway_node)
            .count()
    }

    pub fn rtrd_devices_count(&self) -> usize {
        self.dev_config
            .values()
            .filter(|c| !c.is_gateway_node)
            .map(DevicesConfig::rtrd_devices_count)
            .sum()
    }

    pub fn rtrd_containers_count(&self) -> usize {
        self.dev_config
            .values()
            .filter(|c| !c.is_gateway_node)
            .map(DevicesConfig::rtrd_containers_count)
            .sum()
    }

    pub fn rtkvs_devices_count(&self) -> usize {
        self.dev_config
            .values()
            .filter(|c| !c.is_gateway_node)
            .map(|c| c.rtkvs.devices.len())
            .sum()
    }

    /// Node names present here but not in `other`
    pub fn nodes_difference(&self, other: &ClusterDeploymentConfig) -> Vec<String> {
        self.dev_config
            .keys()
            .filter(|name| !other.dev_config.contains_key(*name))
            .cloned()
            .collect()
    }

    /// Whether `new` may replace this config. Device sets are not compared;
    /// only the deployment type and the transport are immutable.
    pub fn compatible_with(&self, new: &ClusterDeploymentConfig) -> Result<()> {
        if self.deployment_type != new.deployment_type {
            return Err(Error::Incompatible {
                field: "deployment type".into(),
                previous: display_opt(&self.deployment_type),
                current: display_opt(&new.deployment_type),
            });
        }
        if self.transport_key != new.transport_key {
            return Err(Error::Incompatible {
                field: "transport".into(),
                previous: display_opt(&self.transport_key),
                current: display_opt(&new.transport_key),
            });
        }
        Ok(())
    }
}

fn display_opt<T: std::fmt::Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "<none>".to_string())
}
