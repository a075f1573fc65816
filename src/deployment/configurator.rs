//! Deployment Configurator
//!
//! Turns a cluster spec plus the live node and device inventory into a
//! [`ClusterDeploymentConfig`], and rebuilds the previous one from the
//! persisted setup document so both can be diffed.

use super::config::{
    ClusterDeploymentConfig, DeploymentType, DevicesConfig, RTDevices, RtkvsDevices, RtlfsDevices,
    Transport,
};
use super::layout::{get_containers_rt_devices, get_rtkvs_devices, get_rtlfs_devices};
use super::nodes::get_valid_nodes;
use super::resurrect::DevicesResurrectOptions;
use super::setup::{parse_setup_document, SetupDocument, SETUP_CONFIG_KEY};
use super::store_config::{to_store_config, RTKVS_BACKEND_KVSSD};
use super::validation::validate_deployment_config;
use crate::crd::{target_placement, ClusterSpec, Directory, StorageNode, StorageScopeSpec, OPERATOR_DATA_DIR};
use crate::domain::devices::{DeviceRef, LocalDisk, BY_ID_PREFIX};
use crate::domain::ports::{ClusterApiRef, DeviceDiscoveryRef};
use crate::domain::quantity::byte_count_binary;
use crate::error::{Error, Result};
use crate::workload::CLUSTER_CONFIG_MAP;
use k8s_openapi::api::core::v1::ResourceRequirements;
use tracing::{debug, info, warn};

/// Value of the node type label that turns a node into a gateway
pub const GATEWAY_NODE_TYPE: &str = "gateway";

/// Label key marking gateway nodes of a cluster namespace
pub fn node_type_label(namespace: &str) -> String {
    format!("{}-nodetype", namespace)
}

/// Diff between the persisted and the freshly planned deployment config
#[derive(Debug, Clone, Default)]
pub struct ClusterReconfigureSpec {
    pub deployment_config: ClusterDeploymentConfig,
    pub nodes_to_delete: Vec<String>,
    pub nodes_to_add: Vec<String>,
}

// =============================================================================
// Pure Helpers
// =============================================================================

/// Classify the deployment type of a cluster spec
pub fn cluster_deployment_type(namespace: &str, spec: &ClusterSpec) -> Result<DeploymentType> {
    let store_config = to_store_config(&spec.storage.config);
    let has_path = !spec.data_dir_host_path.is_empty();
    let has_volume = spec.uses_data_volume();

    if !store_config.use_rtkvs_backend.is_empty() {
        warn!("[{}] Using rtkvs backend {}", namespace, store_config.use_rtkvs_backend);
        Ok(DeploymentType::Rtkvs)
    } else if !spec.storage.directories().is_empty() && (has_path || has_volume) {
        Ok(DeploymentType::Rtlfs)
    } else if spec.storage.has_devices_specification() && (has_path || has_volume) {
        Ok(DeploymentType::Rtrd)
    } else if !has_path || !has_volume {
        Ok(DeploymentType::AutoRtlfs)
    } else {
        Err(Error::UnknownDeploymentType {
            namespace: namespace.to_string(),
        })
    }
}

/// Privileged containers are needed for raw devices and host networking
pub fn need_privileges(spec: &ClusterSpec, deployment_type: DeploymentType) -> bool {
    spec.network.is_host()
        || matches!(deployment_type, DeploymentType::Rtrd | DeploymentType::Rtkvs)
}

/// Pad every target node with empty slave entries up to the longest list
pub fn align_slave_containers(deployment_config: &mut ClusterDeploymentConfig) {
    let max_slaves = deployment_config
        .dev_config
        .values()
        .filter(|c| !c.is_gateway_node)
        .map(|c| c.rtrd_slaves.len())
        .max()
        .unwrap_or(0);

    for devices in deployment_config
        .dev_config
        .values_mut()
        .filter(|c| !c.is_gateway_node)
    {
        devices.rtrd_slaves.resize_with(max_slaves, RTDevices::default);
    }
}

/// Node requirements overlaid on the cluster ones; node keys win
pub fn merge_resource_requirements(
    node: Option<&ResourceRequirements>,
    cluster: Option<&ResourceRequirements>,
) -> Option<ResourceRequirements> {
    let (node, cluster) = match (node, cluster) {
        (None, None) => return None,
        (Some(n), None) => return Some(n.clone()),
        (None, Some(c)) => return Some(c.clone()),
        (Some(n), Some(c)) => (n, c),
    };
    let mut merged = node.clone();
    if let Some(limits) = &cluster.limits {
        let target = merged.limits.get_or_insert_with(Default::default);
        for (k, v) in limits {
            target.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
    if let Some(requests) = &cluster.requests {
        let target = merged.requests.get_or_insert_with(Default::default);
        for (k, v) in requests {
            target.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
    Some(merged)
}

/// Rebuild a deployment config from a persisted setup document.
///
/// The deployment type is inferred from the first target node. Documents
/// written in resurrect mode carry no devices; those fall back to the
/// transport the document names, keeping `current` when it agrees.
pub fn deployment_config_from_document(
    document: &SetupDocument,
    current: DeploymentType,
) -> Result<ClusterDeploymentConfig> {
    let mut config = ClusterDeploymentConfig::default();
    let mut inferred = false;
    let mut fallback_transport = None;

    for (name, node) in document {
        let gateway = node.is_gateway();
        config.dev_config.insert(
            name.clone(),
            DevicesConfig {
                rtrd: node.rtrd.clone(),
                rtrd_slaves: node.rtrd_slaves.clone(),
                rtlfs: node.rtlfs.clone(),
                rtkvs: node.rtkvs.clone(),
                zone: node.ccowd.zone,
                is_gateway_node: gateway,
            },
        );

        if gateway || inferred {
            continue;
        }

        let deployment_type = if !node.rtkvs.devices.is_empty() {
            Some(DeploymentType::Rtkvs)
        } else if !node.rtrd.devices.is_empty() {
            config.need_privileges = true;
            Some(DeploymentType::Rtrd)
        } else if !node.rtlfs.devices.is_empty() {
            Some(DeploymentType::Rtlfs)
        } else if !node.rtlfs_autodetect.is_empty() {
            Some(DeploymentType::AutoRtlfs)
        } else {
            None
        };
        if let Some(dt) = deployment_type {
            config.deployment_type = Some(dt);
            config.transport_key = Some(dt.transport());
        } else {
            fallback_transport = node.ccowd.transport.first().and_then(|t| Transport::parse(t));
        }

        if node.ccowd.network.server_interfaces != crate::crd::DEFAULT_INTERFACE {
            config.need_privileges = true;
        }
        inferred = true;
    }

    if config.deployment_type.is_none() && !document.is_empty() {
        let transport = fallback_transport.ok_or_else(|| {
            Error::DeploymentConfig(
                "can't retrieve deployment config from config map, unknown deployment type or transport"
                    .into(),
            )
        })?;
        let deployment_type = if current.transport() == transport {
            current
        } else {
            match transport {
                Transport::Rtrd => DeploymentType::Rtrd,
                Transport::Rtlfs => DeploymentType::Rtlfs,
                Transport::Rtkvs => DeploymentType::Rtkvs,
            }
        };
        if matches!(deployment_type, DeploymentType::Rtrd | DeploymentType::Rtkvs) {
            config.need_privileges = true;
        }
        config.deployment_type = Some(deployment_type);
        config.transport_key = Some(transport);
    }

    Ok(config)
}

/// Log the planned layout per node and container
pub fn print_deployment_config(namespace: &str, deployment_config: &ClusterDeploymentConfig) {
    info!("[{}] DeploymentConfig:", namespace);
    info!(
        "DeploymentType: {}",
        deployment_config
            .deployment_type
            .map(|d| d.to_string())
            .unwrap_or_default()
    );
    info!(
        "TransportKey: {}",
        deployment_config
            .transport_key
            .map(|t| t.to_string())
            .unwrap_or_default()
    );
    info!("Directories: {:?}", deployment_config.directories);
    info!("NeedPrivileges: {}", deployment_config.need_privileges);

    for (node, devices) in &deployment_config.dev_config {
        info!("\tNode [{}] devices:", node);
        if devices.is_gateway_node {
            info!("\t\tContainer[0] Configured as gateway. No devices selected");
            continue;
        }
        match deployment_config.deployment_type {
            Some(DeploymentType::Rtrd) => {
                print_rt_devices(0, &devices.rtrd);
                for (i, slave) in devices.rtrd_slaves.iter().enumerate() {
                    print_rt_devices(i + 1, slave);
                }
            }
            Some(DeploymentType::Rtlfs) => print_rtlfs_devices(&devices.rtlfs),
            Some(DeploymentType::Rtkvs) => print_rtkvs_devices(&devices.rtkvs),
            Some(DeploymentType::AutoRtlfs) => {
                for i in 0..super::validation::AUTO_RTLFS_FOLDERS {
                    info!("\t\tContainer[0] Path: /mnt/disks/disk{}", i);
                }
            }
            None => warn!("[{}] Unknown deployment type", namespace),
        }
    }
}

fn print_rt_devices(index: usize, devices: &RTDevices) {
    if devices.devices.is_empty() {
        info!("\t\tContainer[{}] Stub container. No devices assigned", index);
        return;
    }
    for d in &devices.devices {
        info!(
            "\t\tContainer[{}] Device: {}, Name: {}, Journal: {}",
            index, d.device, d.name, d.journal
        );
    }
}

fn print_rtlfs_devices(devices: &RtlfsDevices) {
    for d in &devices.devices {
        info!(
            "\t\tContainer[0] Path: {}, Name: {}, MaxSize: {}",
            d.path,
            d.name,
            byte_count_binary(d.maxsize)
        );
    }
}

fn print_rtkvs_devices(devices: &RtkvsDevices) {
    for d in &devices.devices {
        info!(
            "\t\tContainer[0] Path: {}, Name: {}, Backend: {}, JournalPath: {}, JournalMaxSize: {}",
            d.path,
            d.name,
            devices.backend,
            d.journal_path,
            byte_count_binary(d.journal_maxsize)
        );
    }
}

// =============================================================================
// Configurator
// =============================================================================

/// Plans the deployment of one cluster
pub struct DeploymentConfigurator {
    namespace: String,
    operator_namespace: String,
    spec: ClusterSpec,
    api: ClusterApiRef,
    discovery: DeviceDiscoveryRef,
}

impl DeploymentConfigurator {
    pub fn new(
        namespace: impl Into<String>,
        operator_namespace: impl Into<String>,
        spec: ClusterSpec,
        api: ClusterApiRef,
        discovery: DeviceDiscoveryRef,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            operator_namespace: operator_namespace.into(),
            spec,
            api,
            discovery,
        }
    }

    pub fn spec(&self) -> &ClusterSpec {
        &self.spec
    }

    pub fn deployment_type(&self) -> Result<DeploymentType> {
        cluster_deployment_type(&self.namespace, &self.spec)
    }

    fn devices_error(&self, node: &str, reason: impl Into<String>) -> Error {
        Error::DevicesConfig {
            node: node.to_string(),
            namespace: self.namespace.clone(),
            reason: reason.into(),
        }
    }

    /// Storage node with cluster directories and merged resources
    pub fn resolve_node(&self, node_name: &str) -> Option<StorageNode> {
        let mut node = self.spec.storage.resolve_node(node_name)?;
        node.resources = merge_resource_requirements(node.resources.as_ref(), self.spec.resources.as_ref());

        let host_path = &self.spec.data_dir_host_path;
        node.selection.directories = self
            .spec
            .storage
            .directories()
            .iter()
            .filter(|dir| {
                if dir.path == OPERATOR_DATA_DIR || dir.path == *host_path {
                    warn!("Skipping directory {} that would conflict with the dataDirHostPath", dir.path);
                    false
                } else {
                    true
                }
            })
            .cloned()
            .collect();
        Some(node)
    }

    async fn is_gateway_labeled_node(&self, node_name: &str) -> bool {
        let label = node_type_label(&self.namespace);
        match self.api.get_node(node_name).await {
            Ok(Some(node)) => node
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(&label))
                .map_or(false, |v| v == GATEWAY_NODE_TYPE),
            Ok(None) => false,
            Err(e) => {
                debug!("Can't read labels of node {}: {}", node_name, e);
                false
            }
        }
    }

    /// Valid nodes taking part in the cluster. With `useAllNodes` the
    /// candidate list is every node known to device discovery.
    pub async fn get_cluster_nodes(&self) -> Result<Vec<StorageNode>> {
        let mut storage: StorageScopeSpec = self.spec.storage.clone();
        if storage.use_all_nodes {
            let inventory = self.discovery.list_devices(None).await.map_err(|e| {
                warn!(
                    "Failed to get storage nodes from namespace {}: {}",
                    self.operator_namespace, e
                );
                e
            })?;
            storage.nodes = inventory.keys().map(|n| StorageNode::named(n)).collect();
            warn!("useAllNodes prevents future cluster changes, list nodes explicitly via `nodes:`");
        }

        let nodes = self.api.list_nodes().await?;
        Ok(get_valid_nodes(
            &storage,
            &nodes,
            &target_placement(&self.spec.placement),
        ))
    }

    async fn node_inventory(&self, node_name: &str) -> Result<Vec<LocalDisk>> {
        let inventory = self.discovery.list_devices(Some(node_name)).await?;
        let disks = inventory.get(node_name).cloned().unwrap_or_default();
        info!("[{}] available devices:", node_name);
        for d in &disks {
            info!(
                "\tName: {}, Size: {}, Type: {}, Rotational: {}, Empty: {}",
                d.name,
                byte_count_binary(d.size),
                d.device_type,
                d.rotational,
                d.empty
            );
        }
        Ok(disks)
    }

    /// Devices configuration of one node
    pub async fn create_devices_config(
        &self,
        deployment_type: DeploymentType,
        node: &StorageNode,
        resurrect: &DevicesResurrectOptions,
    ) -> Result<DevicesConfig> {
        let resolved = self
            .resolve_node(&node.name)
            .ok_or_else(|| Error::NodeNotResolved {
                node: node.name.clone(),
            })?;
        let name = resolved.name.as_str();
        let store_config = to_store_config(&resolved.config);
        let directories: &[Directory] = self.spec.storage.directories();

        if self.is_gateway_labeled_node(name).await {
            info!("Skipping node [{}] devices as labeled as gateway node", name);
            return Ok(DevicesConfig::gateway(store_config.zone));
        }

        let mut devices = DevicesConfig {
            zone: store_config.zone,
            ..Default::default()
        };

        if resurrect.need_to_resurrect {
            resurrect.check()?;
            info!("Skipping node [{}] devices due to 'restore' option", name);
            devices.rtlfs.devices = get_rtlfs_devices(directories, &store_config);
            devices.rtrd_slaves = vec![RTDevices::default(); resurrect.slave_containers];
            return Ok(devices);
        }

        match deployment_type {
            DeploymentType::Rtkvs => {
                if store_config.use_rtkvs_backend != RTKVS_BACKEND_KVSSD {
                    return Err(self.devices_error(
                        name,
                        format!("rtkvs backend {} isn't supported", store_config.use_rtkvs_backend),
                    ));
                }
                let disks = self.node_inventory(name).await?;
                let available = self
                    .discovery
                    .get_available_devices(name, &resolved.selection.device_selection())
                    .await
                    .map_err(|e| self.devices_error(name, e.to_string()))?;
                if available.is_empty() {
                    return Err(self.devices_error(name, "no NVMe (KVSSD) devices in the cluster spec"));
                }

                let mut selected = Vec::new();
                for dev in &available {
                    for disk in disks.iter().filter(|d| d.name == dev.name) {
                        let full_path = if dev.full_path.is_empty() {
                            format!("{}{}", BY_ID_PREFIX, disk.stable_name())
                        } else {
                            dev.full_path.clone()
                        };
                        info!("\t{}: using {} ({}) as a KVSSD drive", name, full_path, dev.name);
                        selected.push(DeviceRef {
                            name: dev.name.clone(),
                            full_path,
                        });
                    }
                }
                if selected.is_empty() {
                    return Err(self.devices_error(name, "none of the specified KVSSD devices were detected"));
                }
                if directories.is_empty() {
                    return Err(self.devices_error(
                        name,
                        "KVSSD journal mountpoints missing, use storage.directories for this purpose",
                    ));
                }
                devices.rtkvs = get_rtkvs_devices(name, &selected, directories, &store_config)?;
            }
            DeploymentType::Rtrd => {
                let disks = self.node_inventory(name).await?;
                let available = self
                    .discovery
                    .get_available_devices(name, &resolved.selection.device_selection())
                    .await
                    .map_err(|e| self.devices_error(name, e.to_string()))?;

                info!("[{}] selected devices:", name);
                let mut selected: Vec<LocalDisk> = Vec::new();
                for dev in &available {
                    for disk in disks.iter().filter(|d| d.name == dev.name) {
                        info!(
                            "\tName: {}, Type: {}, Size: {}",
                            disk.name,
                            disk.kind(),
                            byte_count_binary(disk.size)
                        );
                        selected.push(disk.clone());
                    }
                }

                let containers = get_containers_rt_devices(
                    name,
                    self.spec.max_container_capacity_bytes(),
                    &selected,
                    &store_config,
                )
                .unwrap_or_else(|e| {
                    warn!("Can't get rtDevices for node {}: {}", name, e);
                    vec![RTDevices::default()]
                });

                let mut containers = containers.into_iter();
                if let Some(primary) = containers.next() {
                    devices.rtrd = primary;
                }
                devices.rtrd_slaves = containers.collect();
            }
            DeploymentType::Rtlfs | DeploymentType::AutoRtlfs => {
                devices.rtlfs.devices = get_rtlfs_devices(directories, &store_config);
            }
        }

        Ok(devices)
    }

    /// Plan the new deployment config against the persisted one
    pub async fn create_reconfiguration_spec(
        &self,
        existing: &ClusterDeploymentConfig,
        valid_nodes: &[StorageNode],
        resurrect: &DevicesResurrectOptions,
    ) -> Result<ClusterReconfigureSpec> {
        let deployment_type = self.deployment_type()?;
        debug!("ClusterSpec: {:?}", self.spec);

        let mut new_config =
            ClusterDeploymentConfig::new(deployment_type, need_privileges(&self.spec, deployment_type));
        new_config.directories = get_rtlfs_devices(
            self.spec.storage.directories(),
            &to_store_config(&self.spec.storage.config),
        );

        if self.spec.storage.use_all_nodes {
            for existing_node in existing.dev_config.keys() {
                if !valid_nodes.iter().any(|n| &n.name == existing_node) {
                    return Err(Error::NodeNotValid {
                        node: existing_node.clone(),
                    });
                }
            }
        }

        for node in valid_nodes {
            let devices = match existing.dev_config.get(&node.name) {
                Some(previous) => previous.clone(),
                None => match self.create_devices_config(deployment_type, node, resurrect).await {
                    Ok(d) => d,
                    Err(e) => {
                        warn!("Can't create DevicesConfig for {} node: {}", node.name, e);
                        continue;
                    }
                },
            };
            new_config.dev_config.insert(node.name.clone(), devices);
        }

        let nodes_to_delete = existing.nodes_difference(&new_config);
        debug!("NodesToDelete: {:?}", nodes_to_delete);
        let nodes_to_add = new_config.nodes_difference(existing);
        debug!("NodesToAdd: {:?}", nodes_to_add);

        existing.compatible_with(&new_config)?;
        align_slave_containers(&mut new_config);
        validate_deployment_config(&new_config, &self.spec, resurrect)?;

        Ok(ClusterReconfigureSpec {
            deployment_config: new_config,
            nodes_to_delete,
            nodes_to_add,
        })
    }

    /// Previous deployment config from the cluster config map
    pub async fn retrieve_deployment_config(&self) -> Result<ClusterDeploymentConfig> {
        let current = self.deployment_type()?;
        let document = match self.api.get_config_map(&self.namespace, CLUSTER_CONFIG_MAP).await? {
            Some(cm) => cm.data.and_then(|mut d| d.remove(SETUP_CONFIG_KEY)),
            None => None,
        };

        let mut config = match document {
            Some(json) => {
                let document = parse_setup_document(&json).map_err(|e| {
                    Error::DeploymentConfig(format!("invalid JSON in cluster config map: {}", e))
                })?;
                deployment_config_from_document(&document, current)?
            }
            None => ClusterDeploymentConfig::new(current, false),
        };

        if self.spec.network.is_host() {
            config.need_privileges = true;
        }
        Ok(config)
    }
}
