//! Store config decoder
//!
//! Turns the free-form `storage.config` map of a cluster or node into a
//! typed tuning record. Unknown keys are ignored; a value that does not
//! parse or is out of range is logged and the default is kept.

use crate::domain::quantity::parse_quantity;
use std::collections::BTreeMap;
use tracing::warn;

pub const DEFAULT_VERIFY_CHID: u32 = 1;
pub const DEFAULT_LMDB_PAGE_SIZE: u32 = 16384;
pub const DEFAULT_METADATA_MASK: &str = "0xff";
pub const DEFAULT_SYNC: u32 = 1;

const VALID_PAGE_SIZES: [u32; 4] = [4096, 8192, 16384, 32768];

/// Only rtkvs backend the daemons support
pub const RTKVS_BACKEND_KVSSD: &str = "kvssd";

/// Typed per-node tuning
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// 0 = off, 1 = verify on write, 2 = verify always
    pub verify_chid: u32,
    pub lmdb_page_size: u32,
    /// Percent of an offload SSD reserved for metadata, 0 when unset
    pub md_reserved: u32,
    /// HDD read-ahead in kB
    pub hdd_read_ahead: u32,
    /// Max size of an rtlfs directory in bytes, 0 when unbounded
    pub max_size: u64,
    pub use_bcache: bool,
    pub use_bcache_wb: bool,
    pub use_metadata_mask: String,
    pub use_metadata_offload: bool,
    pub use_all_ssd: bool,
    pub rt_plevel_override: u32,
    pub sync: u32,
    pub zone: u32,
    pub use_rtkvs_backend: String,
    pub wal_disabled: bool,
    pub payload_s3_url: String,
    pub payload_s3_region: String,
    pub payload_s3_min_kb: u32,
    pub payload_s3_capacity: u64,
    pub payload_s3_secret: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            verify_chid: DEFAULT_VERIFY_CHID,
            lmdb_page_size: DEFAULT_LMDB_PAGE_SIZE,
            md_reserved: 0,
            hdd_read_ahead: 0,
            max_size: 0,
            use_bcache: false,
            use_bcache_wb: false,
            use_metadata_mask: DEFAULT_METADATA_MASK.to_string(),
            use_metadata_offload: false,
            use_all_ssd: false,
            rt_plevel_override: 0,
            sync: DEFAULT_SYNC,
            zone: 0,
            use_rtkvs_backend: String::new(),
            wal_disabled: false,
            payload_s3_url: String::new(),
            payload_s3_region: String::new(),
            payload_s3_min_kb: 0,
            payload_s3_capacity: 0,
            payload_s3_secret: String::new(),
        }
    }
}

/// Boolean in the spellings accepted by the node config
fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn parse_u32(value: &str) -> Option<u32> {
    value.trim().parse().ok()
}

fn set_bool(field: &mut bool, key: &str, value: &str) {
    match parse_bool(value) {
        Some(v) => *field = v,
        None => warn!("Invalid {} value '{}', using default {}", key, value, field),
    }
}

fn set_ranged(field: &mut u32, key: &str, value: &str, valid: impl Fn(u32) -> bool) {
    match parse_u32(value) {
        Some(v) if valid(v) => *field = v,
        _ => warn!("Invalid {} value '{}', using default {}", key, value, field),
    }
}

fn set_bytes(field: &mut u64, key: &str, value: &str) {
    match parse_quantity(value) {
        Ok(v) => *field = v,
        Err(e) => warn!("Invalid {} value '{}': {}, using default {}", key, value, e, field),
    }
}

/// Decode a tuning map, falling back to defaults per field
pub fn to_store_config(config: &BTreeMap<String, String>) -> StoreConfig {
    let mut sc = StoreConfig::default();

    for (key, value) in config {
        match key.as_str() {
            "rtVerifyChid" => set_ranged(&mut sc.verify_chid, key, value, |v| v <= 2),
            "lmdbPageSize" => set_ranged(&mut sc.lmdb_page_size, key, value, |v| {
                VALID_PAGE_SIZES.contains(&v)
            }),
            "mdReserved" => {
                set_ranged(&mut sc.md_reserved, key, value, |v| (10..=99).contains(&v))
            }
            "hddReadAhead" => set_ranged(&mut sc.hdd_read_ahead, key, value, |_| true),
            "maxSize" => set_bytes(&mut sc.max_size, key, value),
            "useBCache" => set_bool(&mut sc.use_bcache, key, value),
            "useBCacheWB" => set_bool(&mut sc.use_bcache_wb, key, value),
            "useMetadataMask" => sc.use_metadata_mask = value.trim().to_string(),
            "useMetadataOffload" => set_bool(&mut sc.use_metadata_offload, key, value),
            "useAllSSD" => set_bool(&mut sc.use_all_ssd, key, value),
            "rtPLevelOverride" => set_ranged(&mut sc.rt_plevel_override, key, value, |_| true),
            "sync" => set_ranged(&mut sc.sync, key, value, |v| v <= 3),
            "zone" => set_ranged(&mut sc.zone, key, value, |_| true),
            "useRtkvsBackend" => sc.use_rtkvs_backend = value.trim().to_string(),
            "walDisabled" => set_bool(&mut sc.wal_disabled, key, value),
            "payloadS3URL" => sc.payload_s3_url = value.trim().to_string(),
            "payloadS3Region" => sc.payload_s3_region = value.trim().to_string(),
            "payloadS3MinKb" => set_ranged(&mut sc.payload_s3_min_kb, key, value, |_| true),
            "payloadS3Capacity" => set_bytes(&mut sc.payload_s3_capacity, key, value),
            "payloadS3Secret" => sc.payload_s3_secret = value.trim().to_string(),
            _ => {}
        }
    }

    sc
}
