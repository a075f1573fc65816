//! Device inventory types
//!
//! Records reported by the discovery agent for each node, plus the pure
//! selection logic that joins a node's inventory with a device selection
//! (explicit names or by-id paths, a name filter, or "use all").

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Prefix of stable udev links
pub const BY_ID_PREFIX: &str = "/dev/disk/by-id/";

// =============================================================================
// Discovery Records
// =============================================================================

/// A partition on a local disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Size", default)]
    pub size: u64,
    #[serde(rename = "Label", default)]
    pub label: String,
    #[serde(rename = "Filesystem", default)]
    pub filesystem: String,
}

/// A raw block device as reported by the discovery agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDisk {
    /// Kernel name, e.g. `sdb`
    pub name: String,
    #[serde(default)]
    pub parent: String,
    #[serde(default)]
    pub has_children: bool,
    /// Space separated udev links
    #[serde(default)]
    pub dev_links: String,
    /// Size in bytes
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub serial: String,
    #[serde(rename = "type", default)]
    pub device_type: String,
    #[serde(default)]
    pub rotational: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(rename = "Partitions", default)]
    pub partitions: Option<Vec<Partition>>,
    #[serde(default)]
    pub filesystem: String,
    #[serde(default)]
    pub mountpoint: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub wwn: String,
    #[serde(default)]
    pub wwn_vendor_extension: String,
    /// No filesystem, no partitions, not mounted
    #[serde(default)]
    pub empty: bool,
}

impl LocalDisk {
    /// Whether the disk may be claimed by a storage daemon
    pub fn is_usable(&self) -> bool {
        self.empty && self.partitions.as_ref().map_or(true, |p| p.is_empty())
    }

    /// Stable by-id link name, falling back to the kernel name
    pub fn stable_name(&self) -> String {
        stable_link_name(&self.dev_links).unwrap_or_else(|| self.name.clone())
    }

    /// Block path the daemon opens
    pub fn stable_path(&self) -> String {
        match stable_link_name(&self.dev_links) {
            Some(link) => format!("{}{}", BY_ID_PREFIX, link),
            None => format!("/dev/{}", self.name),
        }
    }

    pub fn kind(&self) -> &'static str {
        if self.rotational {
            "HDD"
        } else {
            "SSD"
        }
    }
}

/// Picks the by-id link used to name a disk: the first `/dev/disk/by-id/`
/// entry that is neither a WWN link, an NVMe EUI/UUID link, nor nested.
pub fn stable_link_name(dev_links: &str) -> Option<String> {
    dev_links
        .split_whitespace()
        .filter_map(|link| link.strip_prefix(BY_ID_PREFIX))
        .find(|name| {
            !name.starts_with("wwn-")
                && !name.starts_with("nvme-eui.")
                && !name.starts_with("nvme-uuid.")
                && !name.contains('/')
        })
        .map(str::to_string)
}

pub fn match_device_full_path(dev_links: &str, full_path: &str) -> bool {
    dev_links.split_whitespace().any(|link| link == full_path)
}

// =============================================================================
// Device Selection
// =============================================================================

/// A device chosen for a node, by kernel name and optional by-id path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRef {
    pub name: String,
    #[serde(default)]
    pub full_path: String,
}

/// What a node asks for from its inventory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceSelection {
    pub devices: Vec<DeviceRef>,
    pub filter: String,
    pub use_all: bool,
}

impl DeviceSelection {
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.filter.is_empty() && !self.use_all
    }
}

/// Join a node's inventory with a selection. Explicit devices win over the
/// filter; an empty filter with `use_all` matches every disk.
pub fn select_available_devices(
    node_disks: &[LocalDisk],
    selection: &DeviceSelection,
) -> Vec<DeviceRef> {
    let mut results = Vec::new();
    if selection.is_empty() {
        return results;
    }

    if !selection.devices.is_empty() {
        for wanted in &selection.devices {
            for disk in node_disks {
                if !wanted.full_path.is_empty()
                    && match_device_full_path(&disk.dev_links, &wanted.full_path)
                {
                    let mut found = wanted.clone();
                    if found.name.is_empty() {
                        found.name = disk.name.clone();
                    }
                    results.push(found);
                } else if wanted.name == disk.name {
                    results.push(wanted.clone());
                }
            }
        }
        return results;
    }

    let filter = match Regex::new(&selection.filter) {
        Ok(re) => re,
        Err(e) => {
            warn!("Invalid device filter '{}': {}", selection.filter, e);
            return results;
        }
    };
    for disk in node_disks {
        if filter.is_match(&disk.name) {
            results.push(DeviceRef {
                name: disk.name.clone(),
                full_path: String::new(),
            });
        }
    }
    results
}
