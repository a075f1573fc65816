//! Shared cluster config document
//!
//! One Setup Node record per selected node, serialized as a single JSON
//! object keyed by node name and stored in the cluster config map under
//! [`SETUP_CONFIG_KEY`]. Field names are the ones the daemons read.

use super::config::{ClusterDeploymentConfig, DeploymentType, NodeType, RTDevices, RtkvsDevices, RtlfsDevices};
use super::resurrect::DevicesResurrectOptions;
use crate::crd::{ClusterSpec, FailureDomain};
use crate::error::Result;
use crate::workload::TARGET_APP_NAME;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Config map key holding the document
pub const SETUP_CONFIG_KEY: &str = "nesetup";

/// Socket the daemons listen on inside the pod
pub const SERVER_UNIX_SOCKET: &str = "/opt/nedge/var/run/sock/ccowd.sock";

/// Mount point of auto-detected rtlfs folders
pub const RTLFS_AUTODETECT_PATH: &str = "/data";

pub const DEFAULT_TRLOG_INTERVAL: u32 = 10;
pub const DEFAULT_TRLOG_KEEP_DAYS: u32 = 7;

pub const FAILURE_DOMAIN_DEVICE: u32 = 0;
pub const FAILURE_DOMAIN_HOST: u32 = 1;
pub const FAILURE_DOMAIN_ZONE: u32 = 2;

pub type SetupDocument = BTreeMap<String, SetupNode>;

// =============================================================================
// Document Sections
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CcowTrlog {
    pub interval: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CcowTenant {
    pub failure_domain: u32,
    #[serde(skip_serializing_if = "is_zero")]
    pub replication_count: u32,
    #[serde(skip_serializing_if = "is_zero")]
    pub sync_put_commit_wait: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CcowNetwork {
    pub broker_interfaces: String,
    pub server_unix_socket: String,
    #[serde(rename = "broker_ip4addr", skip_serializing_if = "String::is_empty")]
    pub broker_ip4_addr: String,
    #[serde(rename = "server_ip4addr", skip_serializing_if = "String::is_empty")]
    pub server_ip4_addr: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub no_ipfrag: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CcowConf {
    pub trlog: CcowTrlog,
    pub tenant: CcowTenant,
    pub network: CcowNetwork,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CcowdBgConfig {
    pub trlog_delete_after_hours: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CcowdNetwork {
    pub server_interfaces: String,
    pub server_unix_socket: String,
    #[serde(rename = "server_ip4addr", skip_serializing_if = "String::is_empty")]
    pub server_ip4_addr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CcowdConf {
    pub repdev_bg_config: CcowdBgConfig,
    pub zone: u32,
    pub network: CcowdNetwork,
    pub transport: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditdConf {
    pub is_aggregator: u32,
}

/// Configuration of one node as the daemons read it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupNode {
    pub ccow: CcowConf,
    pub ccowd: CcowdConf,
    pub auditd: AuditdConf,
    pub ipv4_autodetect: u32,
    pub rtrd: RTDevices,
    #[serde(rename = "rtrdslaves")]
    pub rtrd_slaves: Vec<RTDevices>,
    pub rtlfs: RtlfsDevices,
    #[serde(skip_serializing_if = "rtkvs_is_empty")]
    pub rtkvs: RtkvsDevices,
    pub rtlfs_autodetect: String,
    pub cluster_nodes: Vec<String>,
    #[serde(rename = "nodeType")]
    pub node_type: String,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

fn rtkvs_is_empty(v: &RtkvsDevices) -> bool {
    v.devices.is_empty() && v.backend.is_empty()
}

impl SetupNode {
    pub fn is_gateway(&self) -> bool {
        self.node_type == NodeType::Gateway.to_string()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Qualified headless-service DNS name of replica `index`
pub fn peer_dns_name(index: usize, namespace: &str) -> String {
    format!("{app}-{index}.{app}.{namespace}", app = TARGET_APP_NAME)
}

/// Ordered peer list of a target set with `replicas` pods
pub fn peer_dns_names(replicas: usize, namespace: &str) -> Vec<String> {
    (0..replicas).map(|i| peer_dns_name(i, namespace)).collect()
}

/// Tenant failure domain written for a node
pub fn failure_domain_value(zone: u32, failure_domain: FailureDomain) -> u32 {
    if zone > 0 {
        FAILURE_DOMAIN_ZONE
    } else if failure_domain == FailureDomain::Device {
        FAILURE_DOMAIN_DEVICE
    } else {
        FAILURE_DOMAIN_HOST
    }
}

/// Build the document for every node of the deployment config
pub fn build_setup_document(
    namespace: &str,
    spec: &ClusterSpec,
    deployment_config: &ClusterDeploymentConfig,
    resurrect: &DevicesResurrectOptions,
) -> Result<SetupDocument> {
    let failure_domain = spec.effective_failure_domain()?;
    let (server_if, broker_if) = spec.network.interfaces();
    let cluster_nodes = peer_dns_names(deployment_config.dev_config.len(), namespace);
    let transport: Vec<String> = deployment_config
        .transport_key
        .iter()
        .map(ToString::to_string)
        .collect();

    let trlog_interval = if spec.trlog_processing_interval > 0 {
        spec.trlog_processing_interval
    } else {
        DEFAULT_TRLOG_INTERVAL
    };
    let keep_days = if spec.trlog_keep_days > 0 {
        spec.trlog_keep_days
    } else {
        DEFAULT_TRLOG_KEEP_DAYS
    };
    let auto_rtlfs = deployment_config.deployment_type == Some(DeploymentType::AutoRtlfs);

    let mut document = SetupDocument::new();
    for (index, (node_name, dev_config)) in deployment_config.dev_config.iter().enumerate() {
        let gateway = dev_config.is_gateway_node;
        let keep_devices = !resurrect.need_to_resurrect && !gateway;

        let node = SetupNode {
            ccow: CcowConf {
                trlog: CcowTrlog {
                    interval: trlog_interval,
                },
                tenant: CcowTenant {
                    failure_domain: failure_domain_value(dev_config.zone, failure_domain),
                    replication_count: spec.effective_sys_rep_count() as u32,
                    sync_put_commit_wait: spec.commit_n_wait,
                },
                network: CcowNetwork {
                    broker_interfaces: broker_if.clone(),
                    server_unix_socket: SERVER_UNIX_SOCKET.to_string(),
                    no_ipfrag: u32::from(spec.no_ip4_frag),
                    ..Default::default()
                },
            },
            ccowd: CcowdConf {
                repdev_bg_config: CcowdBgConfig {
                    trlog_delete_after_hours: keep_days * 24,
                },
                zone: dev_config.zone,
                network: CcowdNetwork {
                    server_interfaces: server_if.clone(),
                    server_unix_socket: SERVER_UNIX_SOCKET.to_string(),
                    ..Default::default()
                },
                transport: transport.clone(),
            },
            auditd: AuditdConf {
                is_aggregator: u32::from(index == 0),
            },
            ipv4_autodetect: 1,
            rtrd: if keep_devices {
                dev_config.rtrd.clone()
            } else {
                RTDevices::default()
            },
            rtrd_slaves: if keep_devices {
                dev_config.rtrd_slaves.clone()
            } else {
                Vec::new()
            },
            rtlfs: if keep_devices {
                dev_config.rtlfs.clone()
            } else {
                RtlfsDevices::default()
            },
            rtkvs: if keep_devices {
                dev_config.rtkvs.clone()
            } else {
                RtkvsDevices::default()
            },
            rtlfs_autodetect: if auto_rtlfs && !gateway {
                RTLFS_AUTODETECT_PATH.to_string()
            } else {
                String::new()
            },
            cluster_nodes: cluster_nodes.clone(),
            node_type: dev_config.node_type().to_string(),
        };
        document.insert(node_name.clone(), node);
    }

    Ok(document)
}

pub fn to_json(document: &SetupDocument) -> Result<String> {
    Ok(serde_json::to_string(document)?)
}

pub fn parse_setup_document(json: &str) -> Result<SetupDocument> {
    Ok(serde_json::from_str(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::NetworkSpec;
    use crate::deployment::config::{DevicesConfig, RTDevice, RtlfsDevice};

    fn rtrd_config(nodes: &[&str]) -> ClusterDeploymentConfig {
        let mut dc = ClusterDeploymentConfig::new(DeploymentType::Rtrd, true);
        for n in nodes {
            dc.dev_config.insert(
                n.to_string(),
                DevicesConfig {
                    rtrd: RTDevices {
                        devices: vec![RTDevice {
                            name: format!("ata-{}", n),
                            device: "/dev/sdb".into(),
                            ..Default::default()
                        }],
                    },
                    rtrd_slaves: vec![RTDevices::default()],
                    ..Default::default()
                },
            );
        }
        dc
    }

    #[test]
    fn test_peer_dns_ordering() {
        let dc = rtrd_config(&["n1", "n2", "n3", "n4"]);
        let doc = build_setup_document("rook-edgefs", &ClusterSpec::default(), &dc, &Default::default())
            .unwrap();
        for node in doc.values() {
            assert_eq!(
                node.cluster_nodes,
                vec![
                    "rook-edgefs-target-0.rook-edgefs-target.rook-edgefs",
                    "rook-edgefs-target-1.rook-edgefs-target.rook-edgefs",
                    "rook-edgefs-target-2.rook-edgefs-target.rook-edgefs",
                    "rook-edgefs-target-3.rook-edgefs-target.rook-edgefs",
                ]
            );
        }
        assert_eq!(doc["n1"].auditd.is_aggregator, 1);
        assert_eq!(doc["n2"].auditd.is_aggregator, 0);
    }

    #[test]
    fn test_resurrect_empties_device_lists() {
        let dc = rtrd_config(&["n1", "n2"]);
        let resurrect = DevicesResurrectOptions::parse("restorezap");
        let doc = build_setup_document("ns", &ClusterSpec::default(), &dc, &resurrect).unwrap();
        for node in doc.values() {
            assert!(node.rtrd.devices.is_empty());
            assert!(node.rtrd_slaves.is_empty());
            assert!(node.rtlfs.devices.is_empty());
            assert_eq!(node.ccowd.transport, vec!["rtrd"]);
            assert_eq!(node.cluster_nodes.len(), 2);
            assert_eq!(node.ccowd.network.server_interfaces, "eth0");
        }
    }

    #[test]
    fn test_gateway_node_is_empty() {
        let mut dc = rtrd_config(&["n1"]);
        dc.dev_config.insert("gw".into(), DevicesConfig::gateway(0));
        let doc = build_setup_document("ns", &ClusterSpec::default(), &dc, &Default::default()).unwrap();
        let gw = &doc["gw"];
        assert!(gw.rtrd.devices.is_empty() && gw.rtrd_slaves.is_empty() && gw.rtlfs.devices.is_empty());
        assert_eq!(gw.node_type, "gateway");
        assert!(gw.is_gateway());
        assert_eq!(doc["n1"].node_type, "target");
        assert_eq!(doc["n1"].rtrd.devices.len(), 1);
    }

    #[test]
    fn test_failure_domain_follows_zone() {
        assert_eq!(failure_domain_value(0, FailureDomain::Host), 1);
        assert_eq!(failure_domain_value(3, FailureDomain::Host), 2);
        assert_eq!(failure_domain_value(1, FailureDomain::Device), 2);
        assert_eq!(failure_domain_value(0, FailureDomain::Device), 0);
    }

    #[test]
    fn test_auto_rtlfs_and_host_network() {
        let mut dc = ClusterDeploymentConfig::new(DeploymentType::AutoRtlfs, true);
        dc.dev_config.insert("n1".into(), DevicesConfig::default());
        dc.dev_config.insert("gw".into(), DevicesConfig::gateway(0));
        let spec = ClusterSpec {
            network: NetworkSpec {
                server_if_name: "ens3".into(),
                ..Default::default()
            },
            trlog_keep_days: 2,
            ..Default::default()
        };
        let doc = build_setup_document("ns", &spec, &dc, &Default::default()).unwrap();
        assert_eq!(doc["n1"].rtlfs_autodetect, "/data");
        assert_eq!(doc["gw"].rtlfs_autodetect, "");
        assert_eq!(doc["n1"].ccowd.network.server_interfaces, "ens3");
        assert_eq!(doc["n1"].ccow.network.broker_interfaces, "ens3");
        assert_eq!(doc["n1"].ccowd.transport, vec!["rtlfs"]);
        assert_eq!(doc["n1"].ccowd.repdev_bg_config.trlog_delete_after_hours, 48);
    }

    #[test]
    fn test_document_json_roundtrip_keeps_legacy_names() {
        let mut dc = ClusterDeploymentConfig::new(DeploymentType::Rtlfs, false);
        dc.dev_config.insert(
            "n1".into(),
            DevicesConfig {
                rtlfs: RtlfsDevices {
                    devices: vec![RtlfsDevice {
                        name: "disk0".into(),
                        path: "/mnt/disk0".into(),
                        ..Default::default()
                    }],
                },
                ..Default::default()
            },
        );
        let doc = build_setup_document("ns", &ClusterSpec::default(), &dc, &Default::default()).unwrap();
        let json = to_json(&doc).unwrap();
        assert!(json.contains("\"rtrdslaves\""));
        assert!(json.contains("\"nodeType\":\"target\""));
        assert!(json.contains("\"check_mountpoint\""));
        assert!(json.contains("\"trlog_delete_after_hours\""));
        assert_eq!(parse_setup_document(&json).unwrap(), doc);
    }
}
