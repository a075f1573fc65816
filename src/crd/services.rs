//! Service CRDs
//!
//! One custom resource per EdgeFS frontend kind. They share replica count,
//! placement, annotations, resources and memory profile; the rest is
//! kind specific.

use super::common::{Annotations, Placement};
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

fn default_instances() -> i32 {
    1
}

// =============================================================================
// NFS
// =============================================================================

/// NFS file-share frontend
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "edgefs.rook.io",
    version = "v1",
    kind = "NFS",
    root = "Nfs",
    plural = "nfss",
    printcolumn = r#"{"name": "Instances", "type": "integer", "jsonPath": ".spec.instances"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct NfsSpec {
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,

    #[serde(default)]
    pub placement: Placement,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default = "default_instances")]
    pub instances: i32,

    #[serde(default)]
    pub relaxed_dir_updates: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_profile: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_cache_size: Option<Quantity>,
}

// =============================================================================
// S3
// =============================================================================

/// S3 object frontend
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "edgefs.rook.io",
    version = "v1",
    kind = "S3",
    root = "S3",
    plural = "s3s",
    printcolumn = r#"{"name": "Instances", "type": "integer", "jsonPath": ".spec.instances"}"#,
    printcolumn = r#"{"name": "Type", "type": "string", "jsonPath": ".spec.s3type"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct S3Spec {
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,

    #[serde(default)]
    pub placement: Placement,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default = "default_instances")]
    pub instances: i32,

    /// HTTP port (9982 when unset)
    #[serde(default)]
    pub port: u16,

    /// HTTPS port (9443 when unset)
    #[serde(default)]
    pub secure_port: u16,

    /// `ClusterIP` when unset
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_type: String,

    #[serde(default)]
    pub external_port: u16,

    #[serde(default)]
    pub secure_external_port: u16,

    /// Secret holding `sslkey` and `sslcert`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssl_certificate_ref: String,

    /// `s3` (path style, default), `s3s` (virtual host style) or `s3g`
    #[serde(rename = "s3type", default, skip_serializing_if = "String::is_empty")]
    pub s3_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_profile: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_cache_size: Option<Quantity>,
}

// =============================================================================
// SWIFT
// =============================================================================

/// OpenStack SWIFT object frontend
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "edgefs.rook.io",
    version = "v1",
    kind = "SWIFT",
    root = "Swift",
    plural = "swifts",
    printcolumn = r#"{"name": "Instances", "type": "integer", "jsonPath": ".spec.instances"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SwiftSpec {
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,

    #[serde(default)]
    pub placement: Placement,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default = "default_instances")]
    pub instances: i32,

    /// HTTP port (9981 when unset)
    #[serde(default)]
    pub port: u16,

    /// HTTPS port (443 when unset)
    #[serde(default)]
    pub secure_port: u16,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_type: String,

    #[serde(default)]
    pub external_port: u16,

    #[serde(default)]
    pub secure_external_port: u16,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssl_certificate_ref: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_profile: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_cache_size: Option<Quantity>,
}

// =============================================================================
// S3X
// =============================================================================

/// Extended S3 frontend with an S3 compatibility proxy
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "edgefs.rook.io",
    version = "v1",
    kind = "S3X",
    root = "S3x",
    plural = "s3xs",
    printcolumn = r#"{"name": "Instances", "type": "integer", "jsonPath": ".spec.instances"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct S3xSpec {
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,

    #[serde(default)]
    pub placement: Placement,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default = "default_instances")]
    pub instances: i32,

    /// HTTP port (4000 when unset)
    #[serde(default)]
    pub port: u16,

    /// HTTPS port (4443 when unset)
    #[serde(default)]
    pub secure_port: u16,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_type: String,

    #[serde(default)]
    pub external_port: u16,

    #[serde(default)]
    pub secure_external_port: u16,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssl_certificate_ref: String,

    /// Run the S3 compatibility proxy next to the native frontend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_proxy: Option<bool>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_profile: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_cache_size: Option<Quantity>,
}

// =============================================================================
// ISCSI
// =============================================================================

/// iSCSI target tunables passed verbatim to the frontend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetParametersSpec {
    #[serde(default)]
    pub max_recv_data_segment_length: u32,
    #[serde(default)]
    pub default_time2_retain: u32,
    #[serde(default)]
    pub default_time2_wait: u32,
    #[serde(default)]
    pub first_burst_length: u32,
    #[serde(default)]
    pub max_burst_length: u32,
    #[serde(default)]
    pub max_queue_cmd: u32,
}

/// iSCSI block frontend
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "edgefs.rook.io",
    version = "v1",
    kind = "ISCSI",
    root = "Iscsi",
    plural = "iscsis",
    printcolumn = r#"{"name": "Target", "type": "string", "jsonPath": ".spec.targetName"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct IscsiSpec {
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,

    #[serde(default)]
    pub placement: Placement,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default = "default_instances")]
    pub instances: i32,

    /// Target IQN (`iqn.2018-11.edgefs.io` when unset)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_name: String,

    #[serde(default)]
    pub target_params: TargetParametersSpec,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_profile: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_cache_size: Option<Quantity>,
}

// =============================================================================
// ISGW
// =============================================================================

/// Relay configuration of an inter-segment gateway
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IsgwConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clients: Vec<String>,
}

impl IsgwConfig {
    pub fn is_empty(&self) -> bool {
        self.server.is_empty() && self.clients.is_empty()
    }
}

/// Inter-segment gateway replicating between sites
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "edgefs.rook.io",
    version = "v1",
    kind = "ISGW",
    root = "Isgw",
    plural = "isgws",
    printcolumn = r#"{"name": "Direction", "type": "string", "jsonPath": ".spec.direction"}"#,
    printcolumn = r#"{"name": "Remote", "type": "string", "jsonPath": ".spec.remoteURL"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct IsgwSpec {
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,

    #[serde(default)]
    pub placement: Placement,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Always deployed as a single replica
    #[serde(default = "default_instances")]
    pub instances: i32,

    /// `send`, `receive` or both when unset
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub direction: String,

    #[serde(rename = "remoteURL", default, skip_serializing_if = "String::is_empty")]
    pub remote_url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_type: String,

    #[serde(default, skip_serializing_if = "IsgwConfig::is_empty")]
    pub config: IsgwConfig,

    #[serde(default)]
    pub external_port: u16,

    /// `initial`, `continuous` or `initial+continuous` (default)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub replication_type: String,

    /// `all` or `versions`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub metadata_only: String,

    /// `host:port` of the dynamic fetch listener, `-` disables it
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dynamic_fetch_addr: String,

    /// `host:port` of the local endpoint (`0.0.0.0:14000` when unset)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub local_addr: String,

    #[serde(default)]
    pub use_encrypted_tunnel: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_profile: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_cache_size: Option<Quantity>,
}

// =============================================================================
// SMB
// =============================================================================

/// Active Directory membership of an SMB frontend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdsSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dc_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_name: String,

    /// Secret holding `username` and `password`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_secret: String,

    /// Comma separated DNS servers
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nameservers: String,
}

impl AdsSpec {
    pub fn is_empty(&self) -> bool {
        *self == AdsSpec::default()
    }
}

/// SMB file-share frontend
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "edgefs.rook.io",
    version = "v1",
    kind = "SMB",
    root = "Smb",
    plural = "smbs",
    printcolumn = r#"{"name": "Instances", "type": "integer", "jsonPath": ".spec.instances"}"#,
    printcolumn = r#"{"name": "Domain", "type": "string", "jsonPath": ".spec.ads.domainName"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SmbSpec {
    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,

    #[serde(default)]
    pub placement: Placement,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default = "default_instances")]
    pub instances: i32,

    #[serde(default)]
    pub relaxed_dir_updates: bool,

    #[serde(default, skip_serializing_if = "AdsSpec::is_empty")]
    pub ads: AdsSpec,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_profile: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_cache_size: Option<Quantity>,
}
