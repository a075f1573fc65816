//! Memory environment of daemon containers
//!
//! Every storage client (target daemon or service frontend) is told how
//! much memory its chunk cache may use. The figure derives from the
//! container memory limit, the kind of daemon and the resource profile.

use super::env;
use crate::domain::quantity::{quantity_value, GIB, MIB};
use crate::crd::PROFILE_EMBEDDED;
use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Limits below this halve the cache share
const SMALL_MEMORY_LIMIT: u64 = 2 * GIB;

const MEM_PER_WORKER_EMBEDDED: u64 = 128 * MIB;
const MEM_PER_WORKER: u64 = 256 * MIB;

/// Daemon kinds with their own memory rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DaemonKind {
    Target,
    Nfs,
    S3,
    S3x,
    Swift,
    Iscsi,
    Isgw,
    Smb,
}

impl DaemonKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DaemonKind::Target => "target",
            DaemonKind::Nfs => "nfs",
            DaemonKind::S3 => "s3",
            DaemonKind::S3x => "s3x",
            DaemonKind::Swift => "swift",
            DaemonKind::Iscsi => "iscsi",
            DaemonKind::Isgw => "isgw",
            DaemonKind::Smb => "smb",
        }
    }

    /// Percent of the memory limit given to the chunk cache
    fn cache_percent(&self) -> u64 {
        match self {
            DaemonKind::Isgw => 25,
            _ => 75,
        }
    }

    /// HTTP frontends split the remaining memory between workers
    fn has_workers(&self) -> bool {
        matches!(self, DaemonKind::S3 | DaemonKind::S3x | DaemonKind::Swift)
    }
}

impl std::fmt::Display for DaemonKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn memory_limit(resources: Option<&ResourceRequirements>) -> u64 {
    resources
        .and_then(|r| r.limits.as_ref())
        .map(|limits| quantity_value(limits.get("memory")))
        .unwrap_or(0)
}

/// Environment variables sizing the chunk cache of a daemon
///
/// `embedded` is true when either the cluster or the service asks for the
/// embedded profile.
pub fn initiator_env(
    kind: DaemonKind,
    resources: Option<&ResourceRequirements>,
    chunk_cache_size: Option<&Quantity>,
    embedded: bool,
) -> Vec<EnvVar> {
    let mut vars = Vec::new();
    if embedded {
        vars.push(env("CCOW_EMBEDDED", "1"));
        vars.push(env("JE_MALLOC_CONF", "tcache:false"));
    }

    let limit = memory_limit(resources);
    let explicit = quantity_value(chunk_cache_size);
    let cache = if explicit > 0 {
        explicit
    } else if limit > 0 {
        let mut percent = kind.cache_percent();
        if limit < SMALL_MEMORY_LIMIT {
            percent /= 2;
        }
        limit * percent / 100
    } else {
        0
    };
    if cache > 0 {
        vars.push(env("CCOW_MEMORY_LIMIT", cache.to_string()));
    }

    if limit == 0 {
        return vars;
    }

    if kind == DaemonKind::Target {
        vars.push(env("CCOWD_CGROUP_MEMLIM", (limit * 95 / 100).to_string()));
    }

    if kind.has_workers() {
        let svc_limit = limit.saturating_sub(cache);
        let per_worker = if embedded {
            MEM_PER_WORKER_EMBEDDED
        } else {
            MEM_PER_WORKER
        };
        vars.push(env("SVC_MEM_LIMIT", svc_limit.to_string()));
        vars.push(env("SVC_MEM_PER_WORKER", per_worker.min(svc_limit).to_string()));
    }
    vars
}

/// Cluster or service profile asks for the embedded footprint
pub fn is_embedded_profile(cluster_profile: &str, service_profile: &str) -> bool {
    cluster_profile == PROFILE_EMBEDDED || service_profile == PROFILE_EMBEDDED
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn limits(memory: &str) -> ResourceRequirements {
        ResourceRequirements {
            limits: Some(BTreeMap::from([("memory".to_string(), Quantity(memory.into()))])),
            ..Default::default()
        }
    }

    fn value<'a>(vars: &'a [EnvVar], name: &str) -> Option<&'a str> {
        vars.iter()
            .find(|v| v.name == name)
            .and_then(|v| v.value.as_deref())
    }

    #[test]
    fn test_no_limits_no_cache() {
        let vars = initiator_env(DaemonKind::Nfs, None, None, false);
        assert!(vars.is_empty());
    }

    #[test]
    fn test_target_share_and_cgroup_limit() {
        let res = limits("4Gi");
        let vars = initiator_env(DaemonKind::Target, Some(&res), None, false);
        assert_eq!(value(&vars, "CCOW_MEMORY_LIMIT"), Some((3 * GIB).to_string().as_str()));
        let memlim = (4 * GIB * 95 / 100).to_string();
        assert_eq!(value(&vars, "CCOWD_CGROUP_MEMLIM"), Some(memlim.as_str()));
        assert_eq!(value(&vars, "SVC_MEM_LIMIT"), None);
    }

    #[test]
    fn test_small_limit_halves_share() {
        let res = limits("1Gi");
        let vars = initiator_env(DaemonKind::Isgw, Some(&res), None, false);
        let expected = (GIB * 12 / 100).to_string();
        assert_eq!(value(&vars, "CCOW_MEMORY_LIMIT"), Some(expected.as_str()));
    }

    #[test]
    fn test_explicit_cache_and_workers() {
        let res = limits("2Gi");
        let cache = Quantity("512Mi".into());
        let vars = initiator_env(DaemonKind::S3, Some(&res), Some(&cache), true);
        assert_eq!(value(&vars, "CCOW_EMBEDDED"), Some("1"));
        assert_eq!(value(&vars, "JE_MALLOC_CONF"), Some("tcache:false"));
        assert_eq!(value(&vars, "CCOW_MEMORY_LIMIT"), Some((512 * MIB).to_string().as_str()));
        assert_eq!(value(&vars, "SVC_MEM_LIMIT"), Some((1536 * MIB).to_string().as_str()));
        assert_eq!(value(&vars, "SVC_MEM_PER_WORKER"), Some((128 * MIB).to_string().as_str()));
    }

    #[test]
    fn test_embedded_profile() {
        assert!(is_embedded_profile("embedded", ""));
        assert!(is_embedded_profile("", "embedded"));
        assert!(!is_embedded_profile("performance", ""));
    }
}
