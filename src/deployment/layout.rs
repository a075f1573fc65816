//! Layout Planner
//!
//! Splits a node's disks into container device sets, each bounded by the
//! per-container capacity ceiling, and translates every set into the device
//! records of one target daemon.
//!
//! Three translation modes exist:
//! - all-SSD: every SSD is a data device
//! - HDD-only: every HDD is a data device
//! - hybrid offload: HDDs are data devices, each SSD serves as journal and
//!   metadata device for a contiguous group of HDDs

use super::config::{RTDevice, RTDevices, RtkvsDevice, RtkvsDevices, RtlfsDevice};
use super::store_config::StoreConfig;
use crate::crd::Directory;
use crate::domain::devices::{DeviceRef, LocalDisk};
use crate::domain::quantity::{byte_count_binary, TIB};
use crate::error::{Error, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Ceiling used when the cluster does not set `maxContainerCapacity`
pub const DEFAULT_MAX_CONTAINER_CAPACITY: u64 = 132 * TIB;

/// Disks assigned to one daemon container, in planning order
pub type ContainerDeviceSet = Vec<LocalDisk>;

fn div_ceil(a: u64, b: u64) -> u64 {
    if b == 0 {
        0
    } else {
        (a + b - 1) / b
    }
}

fn layout_error(node: &str, reason: impl Into<String>) -> Error {
    Error::Layout {
        node: node.to_string(),
        reason: reason.into(),
    }
}

// =============================================================================
// Planning
// =============================================================================

/// Plan the container device sets of one node.
///
/// Only disks that count toward capacity in the configured mode take part:
/// SSDs with `useAllSSD`, SSDs and HDDs with `useMetadataOffload`, HDDs
/// otherwise. Output depends only on the inputs and their order.
pub fn plan_containers(
    node: &str,
    disks: &[LocalDisk],
    max_capacity: u64,
    sc: &StoreConfig,
) -> Result<Vec<ContainerDeviceSet>> {
    let max_cap = if max_capacity == 0 {
        DEFAULT_MAX_CONTAINER_CAPACITY
    } else {
        max_capacity
    };

    let mut ssds: Vec<&LocalDisk> = Vec::new();
    let mut hdds: Vec<&LocalDisk> = Vec::new();
    for disk in disks {
        if !disk.is_usable() {
            debug!("[{}] Skipping non-empty disk {}", node, disk.name);
            continue;
        }
        if disk.rotational {
            hdds.push(disk);
        } else {
            ssds.push(disk);
        }
    }

    if sc.use_all_ssd {
        hdds.clear();
    } else if !sc.use_metadata_offload {
        ssds.clear();
    }

    let total: u64 = ssds.iter().chain(hdds.iter()).map(|d| d.size).sum();
    if total == 0 {
        return Err(layout_error(node, "no usable capacity on available disks"));
    }

    let num_containers = div_ceil(total, max_cap) as usize;
    let max_ssd = div_ceil(ssds.len() as u64, num_containers as u64) as usize;
    let max_hdd = div_ceil(hdds.len() as u64, num_containers as u64) as usize;

    info!(
        "[{}] Planning {} container(s) for {} SSD(s) and {} HDD(s), total {}, ceiling {}",
        node,
        num_containers,
        ssds.len(),
        hdds.len(),
        byte_count_binary(total),
        byte_count_binary(max_cap)
    );

    let mut used: HashSet<usize> = HashSet::new();
    let mut sets = Vec::with_capacity(num_containers);

    for slot in 0..num_containers {
        let mut set = ContainerDeviceSet::new();
        let mut sum = 0u64;

        for (kind_offset, pool, max_per_kind) in [(0, &ssds, max_ssd), (ssds.len(), &hdds, max_hdd)] {
            let mut taken = 0;
            for (i, disk) in pool.iter().enumerate() {
                if taken >= max_per_kind {
                    break;
                }
                let key = kind_offset + i;
                if used.contains(&key) || sum + disk.size > max_cap {
                    continue;
                }
                used.insert(key);
                sum += disk.size;
                taken += 1;
                set.push((*disk).clone());
            }
        }

        if set.is_empty() {
            warn!("[{}] Container slot {} left without disks", node, slot);
            continue;
        }
        sets.push(set);
    }

    let skipped = ssds.len() + hdds.len() - used.len();
    if skipped > 0 {
        warn!(
            "[{}] {} disk(s) did not fit under the {} container ceiling",
            node,
            skipped,
            byte_count_binary(max_cap)
        );
    }

    if sets.is_empty() {
        return Err(layout_error(node, "no disk fits under the container ceiling"));
    }
    Ok(sets)
}

// =============================================================================
// Translation
// =============================================================================

fn base_rt_device(disk: &LocalDisk, sc: &StoreConfig) -> RTDevice {
    RTDevice {
        name: disk.stable_name(),
        device: disk.stable_path(),
        psize: sc.lmdb_page_size,
        verify_chid: sc.verify_chid,
        plevel_override: sc.rt_plevel_override,
        sync: sc.sync,
        payload_s3_url: sc.payload_s3_url.clone(),
        payload_s3_region: sc.payload_s3_region.clone(),
        payload_s3_min_kb: sc.payload_s3_min_kb,
        payload_s3_capacity: sc.payload_s3_capacity,
        payload_s3_secret: sc.payload_s3_secret.clone(),
        ..Default::default()
    }
}

/// Translate one container set into daemon device records
pub fn to_rt_devices(node: &str, set: &[LocalDisk], sc: &StoreConfig) -> Result<RTDevices> {
    let (ssds, hdds): (Vec<&LocalDisk>, Vec<&LocalDisk>) = set.iter().partition(|d| !d.rotational);

    if sc.use_all_ssd {
        if sc.use_metadata_offload {
            info!("[{}] useMetadataOffload ignored with useAllSSD", node);
        }
        if ssds.is_empty() {
            return Err(layout_error(node, "useAllSSD is set but no SSDs are available"));
        }
        let devices = ssds.iter().map(|d| base_rt_device(d, sc)).collect();
        return Ok(RTDevices { devices });
    }

    if !sc.use_metadata_offload {
        if hdds.is_empty() {
            return Err(layout_error(node, "no HDDs available"));
        }
        let devices = hdds
            .iter()
            .map(|d| RTDevice {
                hdd_read_ahead: sc.hdd_read_ahead,
                ..base_rt_device(d, sc)
            })
            .collect();
        return Ok(RTDevices { devices });
    }

    if ssds.is_empty() || hdds.len() < ssds.len() {
        return Err(layout_error(
            node,
            format!(
                "metadata offload needs at least one SSD and no more SSDs than HDDs, got {} SSD(s) and {} HDD(s)",
                ssds.len(),
                hdds.len()
            ),
        ));
    }

    let mut devices = Vec::with_capacity(hdds.len());
    let mut remaining = hdds.as_slice();
    for (i, ssd) in ssds.iter().enumerate() {
        let remaining_ssds = ssds.len() - i;
        let group = div_ceil(remaining.len() as u64, remaining_ssds as u64) as usize;
        let (current, rest) = remaining.split_at(group);
        remaining = rest;

        let journal = ssd.stable_name();
        for hdd in current {
            devices.push(RTDevice {
                journal: journal.clone(),
                metadata: format!("{},{}", journal, sc.use_metadata_mask),
                bcache: u32::from(sc.use_bcache),
                bcache_writearound: u32::from(!sc.use_bcache_wb),
                hdd_read_ahead: sc.hdd_read_ahead,
                ..base_rt_device(hdd, sc)
            });
        }
    }

    Ok(RTDevices { devices })
}

/// Plan and translate; one entry per daemon container
pub fn get_containers_rt_devices(
    node: &str,
    max_capacity: u64,
    disks: &[LocalDisk],
    sc: &StoreConfig,
) -> Result<Vec<RTDevices>> {
    plan_containers(node, disks, max_capacity, sc)?
        .iter()
        .map(|set| to_rt_devices(node, set, sc))
        .collect()
}

// =============================================================================
// Directory and KVS Devices
// =============================================================================

/// Directory-backed devices, one per cluster directory
pub fn get_rtlfs_devices(directories: &[Directory], sc: &StoreConfig) -> Vec<RtlfsDevice> {
    directories
        .iter()
        .map(|dir| RtlfsDevice {
            name: Path::new(&dir.path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| dir.path.clone()),
            path: dir.path.clone(),
            check_mountpoint: 0,
            psize: sc.lmdb_page_size,
            verify_chid: sc.verify_chid,
            plevel_override: sc.rt_plevel_override,
            sync: sc.sync,
            maxsize: sc.max_size,
            payload_s3_url: sc.payload_s3_url.clone(),
            payload_s3_region: sc.payload_s3_region.clone(),
            payload_s3_min_kb: sc.payload_s3_min_kb,
            payload_s3_capacity: sc.payload_s3_capacity,
            payload_s3_secret: sc.payload_s3_secret.clone(),
        })
        .collect()
}

/// Key-value devices with journals spread round-robin over the directories
pub fn get_rtkvs_devices(
    node: &str,
    devices: &[DeviceRef],
    directories: &[Directory],
    sc: &StoreConfig,
) -> Result<RtkvsDevices> {
    if directories.is_empty() {
        return Err(layout_error(node, "rtkvs journals need at least one directory"));
    }

    let devices = devices
        .iter()
        .enumerate()
        .map(|(i, dev)| RtkvsDevice {
            name: dev.name.clone(),
            path: dev.full_path.clone(),
            journal_path: directories[i % directories.len()].path.clone(),
            journal_maxsize: sc.max_size,
            verify_chid: sc.verify_chid,
            psize: sc.lmdb_page_size,
            md_reserved: sc.md_reserved,
            plevel_override: sc.rt_plevel_override,
            sync: sc.sync,
            wal_disabled: u32::from(sc.wal_disabled),
        })
        .collect();

    Ok(RtkvsDevices {
        backend: sc.use_rtkvs_backend.clone(),
        devices,
    })
}
