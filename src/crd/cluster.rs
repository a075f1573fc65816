//! Cluster CRD
//!
//! The declarative description of one EdgeFS storage cluster. There is at
//! most one cluster per namespace; every derived object lives next to it.

use super::common::{AnnotationsSpec, DashboardSpec, NetworkSpec, PlacementSpec};
use super::storage::StorageScopeSpec;
use crate::domain::quantity::quantity_value;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Image used when the cluster does not name one
pub const DEFAULT_EDGEFS_IMAGE: &str = "edgefs/edgefs:latest";

/// Service account of target and service pods
pub const DEFAULT_SERVICE_ACCOUNT: &str = "rook-edgefs-cluster";

/// Host path used for daemon state when neither a host path nor a volume
/// size is configured
pub const DEFAULT_DATA_DIR_HOST_PATH: &str = "/var/lib/edgefs";

/// Replication count used when `sysRepCount` is unset
pub const DEFAULT_SYS_REP_COUNT: u32 = 3;

// =============================================================================
// Cluster CRD
// =============================================================================

/// Cluster describes the nodes, devices and runtime settings of one EdgeFS
/// storage cluster.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "edgefs.rook.io",
    version = "v1",
    kind = "Cluster",
    plural = "clusters",
    status = "ClusterStatus",
    printcolumn = r#"{"name": "Image", "type": "string", "jsonPath": ".spec.edgefsImageName"}"#,
    printcolumn = r#"{"name": "HostPath", "type": "string", "jsonPath": ".spec.dataDirHostPath"}"#,
    printcolumn = r#"{"name": "State", "type": "string", "jsonPath": ".status.state"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Nodes, devices and directories taking part in the cluster
    #[serde(default)]
    pub storage: StorageScopeSpec,

    /// Annotations per component (`all`, `target`, `mgr`)
    #[serde(default, skip_serializing_if = "AnnotationsSpec::is_empty")]
    pub annotations: AnnotationsSpec,

    /// Scheduling constraints per component (`all`, `target`, `mgr`)
    #[serde(default, skip_serializing_if = "PlacementSpec::is_empty")]
    pub placement: PlacementSpec,

    #[serde(default)]
    pub network: NetworkSpec,

    #[serde(default)]
    pub dashboard: DashboardSpec,

    /// Requests and limits of the daemon containers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Host path persisting daemon configuration and state
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data_dir_host_path: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account: String,

    /// Size of the per-target persistent volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_volume_size: Option<Quantity>,

    /// `restore`, `restorezap` or `restorezapwait`, optionally `:N`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub devices_resurrect_mode: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub edgefs_image_name: String,

    #[serde(default)]
    pub skip_host_prepare: bool,

    /// Empty, `embedded` or `performance`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_profile: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_cache_size: Option<Quantity>,

    /// Seconds between transaction log runs; must divide 60
    #[serde(default)]
    pub trlog_processing_interval: u32,

    #[serde(default)]
    pub trlog_keep_days: u32,

    #[serde(default)]
    pub sys_rep_count: u32,

    /// `device`, `host` (default) or `zone`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub failure_domain: String,

    #[serde(default)]
    pub commit_n_wait: u32,

    #[serde(rename = "noIP4Frag", default)]
    pub no_ip4_frag: bool,

    /// Capacity ceiling of one target container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_container_capacity: Option<Quantity>,

    #[serde(default)]
    pub use_host_local_time: bool,
}

impl ClusterSpec {
    pub fn data_volume_bytes(&self) -> u64 {
        quantity_value(self.data_volume_size.as_ref())
    }

    pub fn max_container_capacity_bytes(&self) -> u64 {
        quantity_value(self.max_container_capacity.as_ref())
    }

    /// Daemon state lives on a persistent volume claim
    pub fn uses_data_volume(&self) -> bool {
        self.data_volume_bytes() > 0
    }

    /// Host path backing daemon state when no volume is used
    pub fn effective_data_dir_host_path(&self) -> &str {
        if self.data_dir_host_path.is_empty() {
            DEFAULT_DATA_DIR_HOST_PATH
        } else {
            &self.data_dir_host_path
        }
    }

    pub fn image(&self, default_image: &str) -> String {
        if self.edgefs_image_name.is_empty() {
            default_image.to_string()
        } else {
            self.edgefs_image_name.clone()
        }
    }

    pub fn effective_service_account(&self) -> &str {
        if self.service_account.is_empty() {
            DEFAULT_SERVICE_ACCOUNT
        } else {
            &self.service_account
        }
    }

    pub fn effective_sys_rep_count(&self) -> usize {
        if self.sys_rep_count > 0 {
            self.sys_rep_count as usize
        } else {
            DEFAULT_SYS_REP_COUNT as usize
        }
    }

    pub fn effective_failure_domain(&self) -> Result<FailureDomain> {
        if self.failure_domain.is_empty() {
            return Ok(FailureDomain::Host);
        }
        self.failure_domain.parse()
    }

    pub fn is_embedded(&self) -> bool {
        self.resource_profile == super::common::PROFILE_EMBEDDED
    }
}

// =============================================================================
// Failure Domain
// =============================================================================

/// Unit across which the cluster spreads replicas
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailureDomain {
    Device,
    #[default]
    Host,
    Zone,
}

impl std::str::FromStr for FailureDomain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "device" => Ok(FailureDomain::Device),
            "host" => Ok(FailureDomain::Host),
            "zone" => Ok(FailureDomain::Zone),
            _ => Err(Error::Validation(format!("unknown failure domain {}", s))),
        }
    }
}

impl std::fmt::Display for FailureDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureDomain::Device => write!(f, "device"),
            FailureDomain::Host => write!(f, "host"),
            FailureDomain::Zone => write!(f, "zone"),
        }
    }
}

// =============================================================================
// Status
// =============================================================================

/// Lifecycle state of a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ClusterState {
    Creating,
    Created,
    Updating,
    Deleting,
    Error,
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterState::Creating => write!(f, "Creating"),
            ClusterState::Created => write!(f, "Created"),
            ClusterState::Updating => write!(f, "Updating"),
            ClusterState::Deleting => write!(f, "Deleting"),
            ClusterState::Error => write!(f, "Error"),
        }
    }
}

/// Status of the Cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ClusterState>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl ClusterStatus {
    pub fn new(state: ClusterState, message: impl Into<String>) -> Self {
        Self {
            state: Some(state),
            message: message.into(),
            last_updated: Some(Utc::now()),
        }
    }
}

impl Cluster {
    pub fn state(&self) -> Option<ClusterState> {
        self.status.as_ref().and_then(|s| s.state)
    }
}
