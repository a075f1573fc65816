//! In-memory adapters for tests

use crate::crd::{Cluster, ClusterStatus};
use crate::domain::devices::LocalDisk;
use crate::domain::ports::{ApplyOutcome, ClusterApi, DeviceDiscovery};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Node, Service};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

type Key = (String, String);

fn key(meta: &ObjectMeta) -> Key {
    (
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

fn ns_key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn conflict() -> Error {
    Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".into(),
        message: "the object has been modified".into(),
        reason: "Conflict".into(),
        code: 409,
    }))
}

#[derive(Default)]
pub struct FakeClusterApi {
    nodes: RwLock<BTreeMap<String, Node>>,
    config_maps: RwLock<BTreeMap<Key, ConfigMap>>,
    services: RwLock<BTreeMap<Key, Service>>,
    stateful_sets: RwLock<BTreeMap<Key, StatefulSet>>,
    deployments: RwLock<BTreeMap<Key, Deployment>>,
    clusters: RwLock<BTreeMap<Key, Cluster>>,
    deployment_writes: AtomicUsize,
    label_conflicts: AtomicUsize,
    finalizer_failures: AtomicUsize,
}

impl FakeClusterApi {
    pub fn add_node(&self, node: Node) {
        self.nodes.write().insert(node.name_any(), node);
    }

    pub fn set_node_label(&self, node: &str, key: &str, value: &str) {
        if let Some(n) = self.nodes.write().get_mut(node) {
            n.metadata
                .labels
                .get_or_insert_with(BTreeMap::new)
                .insert(key.to_string(), value.to_string());
        }
    }

    pub fn node_labels(&self, node: &str) -> BTreeMap<String, String> {
        self.nodes
            .read()
            .get(node)
            .and_then(|n| n.metadata.labels.clone())
            .unwrap_or_default()
    }

    pub fn put_config_map(&self, config_map: ConfigMap) {
        self.config_maps
            .write()
            .insert(key(&config_map.metadata), config_map);
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.config_maps.read().get(&ns_key(namespace, name)).cloned()
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.services.read().get(&ns_key(namespace, name)).cloned()
    }

    pub fn service_names(&self, namespace: &str) -> Vec<String> {
        self.services
            .read()
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn stateful_set(&self, namespace: &str, name: &str) -> Option<StatefulSet> {
        self.stateful_sets.read().get(&ns_key(namespace, name)).cloned()
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.deployments.read().get(&ns_key(namespace, name)).cloned()
    }

    pub fn put_deployment(&self, deployment: Deployment) {
        self.deployments
            .write()
            .insert(key(&deployment.metadata), deployment);
    }

    /// Count of deployment create or update calls
    pub fn deployment_writes(&self) -> usize {
        self.deployment_writes.load(Ordering::SeqCst)
    }

    pub fn put_cluster(&self, cluster: Cluster) {
        self.clusters.write().insert(key(&cluster.metadata), cluster);
    }

    pub fn cluster(&self, namespace: &str, name: &str) -> Option<Cluster> {
        self.clusters.read().get(&ns_key(namespace, name)).cloned()
    }

    /// Fail the next `n` label patches with a conflict
    pub fn fail_label_patches(&self, n: usize) {
        self.label_conflicts.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` finalizer updates with a conflict
    pub fn fail_finalizer_updates(&self, n: usize) {
        self.finalizer_failures.store(n, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn upsert<T: Clone>(map: &RwLock<BTreeMap<Key, T>>, k: Key, obj: &T) -> ApplyOutcome {
    match map.write().insert(k, obj.clone()) {
        Some(_) => ApplyOutcome::Updated,
        None => ApplyOutcome::Created,
    }
}

#[async_trait]
impl ClusterApi for FakeClusterApi {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.nodes.read().values().cloned().collect())
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        Ok(self.nodes.read().get(name).cloned())
    }

    async fn patch_node_labels(
        &self,
        name: &str,
        labels: &BTreeMap<String, Option<String>>,
    ) -> Result<()> {
        if Self::take_failure(&self.label_conflicts) {
            return Err(conflict());
        }
        let mut nodes = self.nodes.write();
        let node = nodes.get_mut(name).ok_or_else(|| Error::ResourceNotFound {
            kind: "Node".into(),
            name: name.into(),
        })?;
        let current = node.metadata.labels.get_or_insert_with(BTreeMap::new);
        for (k, v) in labels {
            match v {
                Some(v) => current.insert(k.clone(), v.clone()),
                None => current.remove(k),
            };
        }
        Ok(())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        Ok(self.config_map(namespace, name))
    }

    async fn list_config_maps(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ConfigMap>> {
        let wanted: Vec<(&str, &str)> = label_selector
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .collect();
        Ok(self
            .config_maps
            .read()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .filter(|(_, cm)| {
                let labels = cm.labels();
                wanted
                    .iter()
                    .all(|(k, v)| labels.get(*k).map(String::as_str) == Some(*v))
            })
            .map(|(_, cm)| cm.clone())
            .collect())
    }

    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<ApplyOutcome> {
        Ok(upsert(&self.config_maps, key(&config_map.metadata), config_map))
    }

    async fn ensure_service(&self, service: &Service) -> Result<ApplyOutcome> {
        let k = key(&service.metadata);
        let mut services = self.services.write();
        if services.contains_key(&k) {
            return Ok(ApplyOutcome::Unchanged);
        }
        services.insert(k, service.clone());
        Ok(ApplyOutcome::Created)
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<bool> {
        Ok(self
            .services
            .write()
            .remove(&ns_key(namespace, name))
            .is_some())
    }

    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>> {
        Ok(self.stateful_set(namespace, name))
    }

    async fn apply_stateful_set(&self, stateful_set: &StatefulSet) -> Result<ApplyOutcome> {
        Ok(upsert(
            &self.stateful_sets,
            key(&stateful_set.metadata),
            stateful_set,
        ))
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        Ok(self.deployment(namespace, name))
    }

    async fn apply_deployment(&self, deployment: &Deployment) -> Result<ApplyOutcome> {
        self.deployment_writes.fetch_add(1, Ordering::SeqCst);
        Ok(upsert(&self.deployments, key(&deployment.metadata), deployment))
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<bool> {
        Ok(self
            .deployments
            .write()
            .remove(&ns_key(namespace, name))
            .is_some())
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>> {
        Ok(self.cluster(namespace, name))
    }

    async fn update_cluster_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ClusterStatus,
    ) -> Result<()> {
        let mut clusters = self.clusters.write();
        let cluster = clusters
            .get_mut(&ns_key(namespace, name))
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Cluster".into(),
                name: name.into(),
            })?;
        cluster.status = Some(status.clone());
        Ok(())
    }

    async fn set_cluster_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<()> {
        if Self::take_failure(&self.finalizer_failures) {
            return Err(conflict());
        }
        let mut clusters = self.clusters.write();
        let cluster = clusters
            .get_mut(&ns_key(namespace, name))
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Cluster".into(),
                name: name.into(),
            })?;
        cluster.metadata.finalizers = if finalizers.is_empty() {
            None
        } else {
            Some(finalizers)
        };
        Ok(())
    }
}

/// Device inventory keyed by node
#[derive(Default)]
pub struct FakeDiscovery {
    devices: RwLock<BTreeMap<String, Vec<LocalDisk>>>,
}

impl FakeDiscovery {
    pub fn set_devices(&self, node: &str, disks: Vec<LocalDisk>) {
        self.devices.write().insert(node.to_string(), disks);
    }
}

#[async_trait]
impl DeviceDiscovery for FakeDiscovery {
    async fn list_devices(
        &self,
        node_name: Option<&str>,
    ) -> Result<BTreeMap<String, Vec<LocalDisk>>> {
        Ok(self
            .devices
            .read()
            .iter()
            .filter(|(node, _)| node_name.map_or(true, |n| n == node.as_str()))
            .map(|(node, disks)| (node.clone(), disks.clone()))
            .collect())
    }
}
