//! Devices resurrect mode
//!
//! `devicesResurrectMode` has the form `<keyword>[:<slaveContainers>]` with
//! keyword `restore`, `restorezap` or `restorezapwait`. Parsing never fails:
//! unknown keywords disable every flag.

use crate::error::{Error, Result};
use serde::Serialize;

/// Upper bound of the `:<slaveContainers>` suffix
pub const MAX_SLAVE_CONTAINERS: usize = 32;

/// Keyword selecting the resurrect flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResurrectKeyword {
    Restore,
    RestoreZap,
    RestoreZapWait,
}

impl ResurrectKeyword {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "restore" => Some(ResurrectKeyword::Restore),
            "restorezap" => Some(ResurrectKeyword::RestoreZap),
            "restorezapwait" => Some(ResurrectKeyword::RestoreZapWait),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicesResurrectOptions {
    pub need_to_resurrect: bool,
    pub need_to_zap: bool,
    pub need_to_wait: bool,
    /// Empty slave containers to allocate per target
    pub slave_containers: usize,
}

impl DevicesResurrectOptions {
    pub fn parse(mode: &str) -> Self {
        let mut opts = Self::default();
        if mode.is_empty() {
            return opts;
        }

        let mut parts = mode.split(':');
        let keyword = parts.next().unwrap_or_default();
        if let Some(count) = parts.next() {
            if let Ok(n) = count.trim().parse::<usize>() {
                opts.slave_containers = n;
            }
        }

        match ResurrectKeyword::parse(keyword) {
            Some(ResurrectKeyword::Restore) => {
                opts.need_to_resurrect = true;
            }
            Some(ResurrectKeyword::RestoreZap) => {
                opts.need_to_resurrect = true;
                opts.need_to_zap = true;
            }
            Some(ResurrectKeyword::RestoreZapWait) => {
                opts.need_to_resurrect = true;
                opts.need_to_zap = true;
                opts.need_to_wait = true;
            }
            None => return Self::default(),
        }
        opts
    }

    /// Reject slave counts a target pod can't hold
    pub fn check(&self) -> Result<()> {
        if self.slave_containers > MAX_SLAVE_CONTAINERS {
            return Err(Error::Validation(format!(
                "devicesResurrectMode requests {} slave containers, at most {} are supported",
                self.slave_containers, MAX_SLAVE_CONTAINERS
            )));
        }
        Ok(())
    }
}
