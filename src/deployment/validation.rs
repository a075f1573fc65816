//! Cluster spec and deployment config validation
//!
//! Spec validation runs before anything touches the API server. Deployment
//! config validation runs on the freshly planned config after the
//! compatibility check and slave alignment.

use super::config::{ClusterDeploymentConfig, Transport};
use super::resurrect::DevicesResurrectOptions;
use crate::crd::{ClusterSpec, FailureDomain, PROFILE_EMBEDDED, PROFILE_PERFORMANCE};
use crate::domain::quantity::{parse_quantity, GIB, MIB};
use crate::error::{Error, Result};

/// Minimum memory request of the target containers per profile
pub const MIN_MEMORY_EMBEDDED: u64 = 512 * MIB;
pub const MIN_MEMORY_DEFAULT: u64 = GIB;

/// Folders an auto-detected rtlfs target creates
pub const AUTO_RTLFS_FOLDERS: usize = 4;

/// Cluster-wide rtrd devices required outside resurrect mode
pub const MIN_RTRD_DEVICES: usize = 3;

fn invalid(msg: impl Into<String>) -> Error {
    Error::Validation(msg.into())
}

// =============================================================================
// Cluster Spec
// =============================================================================

/// Memory the containers ask for: the request, else the limit
fn requested_memory(spec: &ClusterSpec) -> Result<Option<u64>> {
    let Some(resources) = spec.resources.as_ref() else {
        return Ok(None);
    };
    let quantity = resources
        .requests
        .as_ref()
        .and_then(|r| r.get("memory"))
        .or_else(|| resources.limits.as_ref().and_then(|l| l.get("memory")));
    match quantity {
        Some(q) => Ok(Some(parse_quantity(&q.0)?)),
        None => Ok(None),
    }
}

pub fn validate_cluster_spec(spec: &ClusterSpec) -> Result<()> {
    if !spec.data_dir_host_path.is_empty() && spec.uses_data_volume() {
        return Err(invalid(
            "dataDirHostPath and dataVolumeSize are mutually exclusive, set only one of them",
        ));
    }

    match spec.resource_profile.as_str() {
        "" | PROFILE_EMBEDDED | PROFILE_PERFORMANCE => {}
        other => {
            return Err(invalid(format!(
                "unknown resourceProfile '{}', expected '{}' or '{}'",
                other, PROFILE_EMBEDDED, PROFILE_PERFORMANCE
            )))
        }
    }

    let storage = &spec.storage;
    if !storage.directories().is_empty() && storage.has_devices_specification() {
        return Err(invalid(
            "storage directories can't be combined with devices, deviceFilter or useAllDevices",
        ));
    }

    if let Some(memory) = requested_memory(spec)? {
        let minimum = if spec.is_embedded() {
            MIN_MEMORY_EMBEDDED
        } else {
            MIN_MEMORY_DEFAULT
        };
        if memory < minimum {
            return Err(invalid(format!(
                "memory request {} is below the {} minimum of the '{}' profile",
                memory,
                minimum,
                if spec.resource_profile.is_empty() {
                    PROFILE_PERFORMANCE
                } else {
                    spec.resource_profile.as_str()
                }
            )));
        }
    }

    let interval = spec.trlog_processing_interval;
    if interval > 0 && 60 % interval != 0 {
        return Err(invalid(format!(
            "trlogProcessingInterval {} must divide 60 evenly",
            interval
        )));
    }

    DevicesResurrectOptions::parse(&spec.devices_resurrect_mode).check()?;
    spec.effective_failure_domain()?;
    Ok(())
}

// =============================================================================
// Deployment Config
// =============================================================================

/// Zones are all zero or all set; the zone failure domain needs enough zones
pub fn validate_zones(
    deployment_config: &ClusterDeploymentConfig,
    sys_rep_count: usize,
    failure_domain: FailureDomain,
) -> Result<()> {
    let zoned = deployment_config
        .dev_config
        .values()
        .filter(|c| c.zone > 0)
        .count();

    if zoned > 0 && zoned != deployment_config.dev_config.len() {
        return Err(Error::DeploymentConfig(
            "Valid Zone number must be propagated to all nodes".into(),
        ));
    }

    if failure_domain == FailureDomain::Zone && zoned < sys_rep_count {
        return Err(Error::DeploymentConfig(format!(
            "assigned cluster zones count {} should be greater or equal to sysRepCount {}",
            zoned, sys_rep_count
        )));
    }
    Ok(())
}

fn at_least(what: &str, count: usize, sys_rep_count: usize) -> Result<()> {
    if count < sys_rep_count {
        return Err(Error::DeploymentConfig(format!(
            "{} ({}) should be greater or equal to sysRepCount {} on all nodes summary",
            what, count, sys_rep_count
        )));
    }
    Ok(())
}

pub fn validate_deployment_config(
    deployment_config: &ClusterDeploymentConfig,
    spec: &ClusterSpec,
    resurrect: &DevicesResurrectOptions,
) -> Result<()> {
    let (Some(transport), Some(_)) = (
        deployment_config.transport_key,
        deployment_config.deployment_type,
    ) else {
        return Err(Error::DeploymentConfig(
            "no valid transport key or deployment type".into(),
        ));
    };

    let sys_rep_count = spec.effective_sys_rep_count();
    let failure_domain = spec.effective_failure_domain()?;
    validate_zones(deployment_config, sys_rep_count, failure_domain)?;

    let directories = spec.storage.directories().len();

    match transport {
        Transport::Rtkvs => {
            if directories == 0 {
                return Err(Error::DeploymentConfig(
                    "rtkvs needs at least one storage directory for journals and metadata".into(),
                ));
            }
            if spec.storage.use_all_nodes || spec.storage.selection.get_use_all_devices() {
                return Err(Error::DeploymentConfig(
                    "rtkvs doesn't allow useAllNodes or useAllDevices, list KVSSD devices per node"
                        .into(),
                ));
            }
            match failure_domain {
                FailureDomain::Device => at_least(
                    "rtkvs devices",
                    deployment_config.rtkvs_devices_count(),
                    sys_rep_count,
                )?,
                FailureDomain::Host => {
                    at_least("rtkvs targets", deployment_config.targets_count(), sys_rep_count)?
                }
                FailureDomain::Zone => {}
            }
        }
        Transport::Rtlfs => {
            let nodes = deployment_config.dev_config.len();
            if directories > 0 && directories * nodes < MIN_RTRD_DEVICES {
                return Err(Error::DeploymentConfig(format!(
                    "rtlfs devices count {} is less than {} on all nodes summary",
                    directories * nodes,
                    MIN_RTRD_DEVICES
                )));
            }
            match failure_domain {
                FailureDomain::Device => {
                    let folders = if directories > 0 {
                        directories * nodes
                    } else {
                        AUTO_RTLFS_FOLDERS * nodes
                    };
                    at_least("rtlfs devices", folders, sys_rep_count)?
                }
                FailureDomain::Host => {
                    at_least("rtlfs targets", deployment_config.targets_count(), sys_rep_count)?
                }
                FailureDomain::Zone => {}
            }
        }
        Transport::Rtrd => {
            for (node, devices) in &deployment_config.dev_config {
                if devices.is_gateway_node {
                    continue;
                }
                if devices.rtrd.devices.is_empty() && !resurrect.need_to_resurrect {
                    return Err(Error::DeploymentConfig(format!(
                        "node {} has no devices to deploy",
                        node
                    )));
                }
            }

            let devices = deployment_config.rtrd_devices_count();
            if !resurrect.need_to_resurrect && devices < MIN_RTRD_DEVICES {
                return Err(Error::DeploymentConfig(format!(
                    "rtrd devices count {} is less than {} on all nodes summary",
                    devices, MIN_RTRD_DEVICES
                )));
            }

            if !resurrect.need_to_resurrect {
                match failure_domain {
                    FailureDomain::Device => at_least("rtrd devices", devices, sys_rep_count)?,
                    FailureDomain::Host => at_least(
                        "rtrd containers",
                        deployment_config.rtrd_containers_count(),
                        sys_rep_count,
                    )?,
                    FailureDomain::Zone => {}
                }
            }
        }
    }

    Ok(())
}
