//! NFS frontend

use super::{CommonSpec, EdgefsService, PortSpec};
use crate::crd::Nfs;
use crate::error::Result;
use crate::workload::{env, DaemonKind};
use k8s_openapi::api::core::v1::EnvVar;

/// Protocol ports published over both TCP and UDP
const NFS_PORTS: &[(&str, i32)] = &[
    ("nfs", 2049),
    ("nlockmgr", 32803),
    ("mountd", 20048),
    ("portmapper", 111),
    ("statd", 662),
    ("rquotad", 875),
];

impl EdgefsService for Nfs {
    const KIND: DaemonKind = DaemonKind::Nfs;

    fn common(&self) -> CommonSpec<'_> {
        CommonSpec {
            annotations: &self.spec.annotations,
            placement: &self.spec.placement,
            resources: self.spec.resources.as_ref(),
            instances: self.spec.instances,
            resource_profile: &self.spec.resource_profile,
            chunk_cache_size: self.spec.chunk_cache_size.as_ref(),
        }
    }

    fn spec_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.spec)?)
    }

    fn ports(&self) -> Result<Vec<PortSpec>> {
        Ok(NFS_PORTS
            .iter()
            .flat_map(|(name, port)| {
                [
                    PortSpec::tcp(&format!("{}-tcp", name), *port),
                    PortSpec::udp(&format!("{}-udp", name), *port),
                ]
            })
            .collect())
    }

    fn extra_env(&self) -> Result<Vec<EnvVar>> {
        if self.spec.relaxed_dir_updates {
            Ok(vec![env("EFSNFS_RELAXED_DIR_UPDATES", "1")])
        } else {
            Ok(Vec::new())
        }
    }

    fn service_type(&self) -> &str {
        "NodePort"
    }
}
