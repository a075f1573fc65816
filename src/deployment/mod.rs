//! Deployment planning
//!
//! Everything between a cluster spec and the objects the reconciler writes:
//! classification, per-node device layout, validation and the setup
//! document the storage daemons read at start.

pub mod config;
pub mod configurator;
pub mod layout;
pub mod nodes;
pub mod resurrect;
pub mod setup;
pub mod store_config;
pub mod validation;

pub use config::{
    ClusterDeploymentConfig, DeploymentType, DevicesConfig, NodeType, RTDevice, RTDevices,
    RtkvsDevice, RtkvsDevices, RtlfsDevice, RtlfsDevices, Transport,
};
pub use configurator::{
    align_slave_containers, cluster_deployment_type, need_privileges, node_type_label,
    print_deployment_config, ClusterReconfigureSpec, DeploymentConfigurator, GATEWAY_NODE_TYPE,
};
pub use layout::{get_containers_rt_devices, plan_containers, DEFAULT_MAX_CONTAINER_CAPACITY};
pub use resurrect::DevicesResurrectOptions;
pub use setup::{build_setup_document, SetupDocument, SETUP_CONFIG_KEY};
pub use store_config::{to_store_config, StoreConfig};
pub use validation::{validate_cluster_spec, validate_deployment_config};
