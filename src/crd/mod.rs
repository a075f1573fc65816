//! Custom Resource Definitions for the EdgeFS operator
//!
//! This module contains all CRD types:
//! - Cluster: nodes, devices and runtime settings of a storage cluster
//! - NFS, S3, SWIFT, S3X, ISCSI, ISGW, SMB: frontend services
//! - Shared placement, network and storage scope building blocks

pub mod cluster;
pub mod common;
pub mod services;
pub mod storage;

pub use cluster::*;
pub use common::*;
pub use services::*;
pub use storage::*;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

/// API group of every EdgeFS resource
pub const GROUP: &str = "edgefs.rook.io";

/// All definitions served by the operator, in install order
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        Cluster::crd(),
        Nfs::crd(),
        S3::crd(),
        Swift::crd(),
        S3x::crd(),
        Iscsi::crd(),
        Isgw::crd(),
        Smb::crd(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_crds_share_group() {
        let crds = all_crds();
        assert_eq!(crds.len(), 8);
        assert!(crds.iter().all(|c| c.spec.group == GROUP));
    }
}
