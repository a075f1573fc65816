//! EdgeFS Operator
//!
//! A Kubernetes operator that turns `Cluster` resources into running EdgeFS
//! scale-out storage clusters and manages the NFS, S3, S3X, Swift, iSCSI,
//! ISGW and SMB frontends that serve them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                          Cluster Controller                                  │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │   Node & Device │  │   Deployment    │  │      Setup Document         │  │
//! │  │   Resolution    │  │   Planner       │  │      (edgefs-config)        │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           │                    │                         │                   │
//! │           └────────────────────┼─────────────────────────┘                   │
//! │                                │                                             │
//! │                    ┌───────────┴───────────┐                                │
//! │                    │  Target StatefulSet   │                                │
//! │                    │  + Manager Deployment │                                │
//! │                    └───────────────────────┘                                │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                        Service Controllers                                   │
//! │  ┌───────┐ ┌──────┐ ┌─────┐ ┌───────┐ ┌───────┐ ┌──────┐ ┌─────┐            │
//! │  │  NFS  │ │  S3  │ │ S3X │ │ Swift │ │ iSCSI │ │ ISGW │ │ SMB │            │
//! │  └───────┘ └──────┘ └─────┘ └───────┘ └───────┘ └──────┘ └─────┘            │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controller`]: Watch dispatch, the Cluster reconciler and Kubernetes adapters
//! - [`crd`]: Custom Resource Definitions
//! - [`deployment`]: Node resolution, device layout and the setup document
//! - [`domain`]: Core domain types and ports
//! - [`error`]: Error types and handling
//! - [`metrics`]: Prometheus collectors
//! - [`services`]: Frontend service reconcilers
//! - [`workload`]: Kubernetes objects derived from a cluster

pub mod controller;
pub mod crd;
pub mod deployment;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod services;
pub mod workload;

// Re-export commonly used types
pub use controller::{
    ClusterController, ConfigMapDiscovery, KubeClusterApi, KubeServiceLauncher, OperatorConfig,
    DEFAULT_OPERATOR_NAMESPACE,
};

pub use crd::{
    all_crds, Cluster, ClusterSpec, ClusterState, ClusterStatus, Iscsi, Isgw, Nfs, Smb, Swift,
    S3, S3x,
};

pub use deployment::{ClusterDeploymentConfig, DeploymentConfigurator, DevicesResurrectOptions};

pub use domain::ports::{ApplyOutcome, ClusterApi, DeviceDiscovery};

pub use error::{Error, ErrorAction, Result};

pub use services::{ServiceController, ServiceSet};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
