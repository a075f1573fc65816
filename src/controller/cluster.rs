//! Cluster controller
//!
//! Reconciles `Cluster` resources. A new cluster is planned and projected
//! into workloads by [`ClusterController::create_instance`], retried on a
//! fixed interval until it succeeds or the create deadline passes. Spec
//! changes run the same pipeline in update mode, and deletion removes the
//! node labels before the finalizer is released.

use super::labels::{label_target_node, unlabel_target_node};
use super::retry::{retry_if, FixedInterval};
use super::watch::EventHandler;
use super::OperatorConfig;
use crate::crd::{Cluster, ClusterState, ClusterStatus};
use crate::deployment::setup::to_json;
use crate::deployment::{
    build_setup_document, print_deployment_config, validate_cluster_spec,
    ClusterDeploymentConfig, DeploymentConfigurator, DevicesResurrectOptions,
};
use crate::domain::ports::{ClusterApiRef, DeviceDiscoveryRef};
use crate::error::{Error, Result};
use crate::metrics::{forget_cluster, record_reconcile, record_state, set_planned_nodes, Outcome};
use crate::services::ServiceSet;
use crate::workload::{
    cluster_config_map, headless_service, mgr_deployment, mgr_services, target_stateful_set,
    ClusterContext,
};
use async_trait::async_trait;
use dashmap::DashMap;
use kube::ResourceExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Finalizer guarding node label cleanup
pub const FINALIZER_NAME: &str = "cluster.edgefs.rook.io";

const KIND: &str = "Cluster";

/// Starts the service reconcilers of a cluster
pub trait ServiceLauncher: Send + Sync {
    /// Watch every service kind in `namespace` until `token` is cancelled
    fn launch(&self, namespace: &str, services: Arc<ServiceSet>, token: CancellationToken);
}

/// What the operator remembers about a cluster it manages
struct ClusterEntry {
    ctx: ClusterContext,
    /// Plan of the last successful reconcile
    deployment_config: Option<ClusterDeploymentConfig>,
    services: Arc<ServiceSet>,
    /// Cancelled when the cluster is deleted
    token: CancellationToken,
    uses_all_devices: bool,
    services_started: bool,
}

pub struct ClusterController {
    api: ClusterApiRef,
    discovery: DeviceDiscoveryRef,
    config: OperatorConfig,
    launcher: Option<Arc<dyn ServiceLauncher>>,
    token: CancellationToken,
    /// Managed clusters keyed by namespace
    clusters: DashMap<String, ClusterEntry>,
    /// Set while some cluster claims every device of its nodes
    devices_in_use: AtomicBool,
}

impl ClusterController {
    pub fn new(
        api: ClusterApiRef,
        discovery: DeviceDiscoveryRef,
        config: OperatorConfig,
        token: CancellationToken,
    ) -> Self {
        Self {
            api,
            discovery,
            config,
            launcher: None,
            token,
            clusters: DashMap::new(),
            devices_in_use: AtomicBool::new(false),
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn ServiceLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn is_managed(&self, namespace: &str) -> bool {
        self.clusters.contains_key(namespace)
    }

    /// Service reconcilers of a managed cluster
    pub fn services(&self, namespace: &str) -> Option<Arc<ServiceSet>> {
        self.clusters.get(namespace).map(|e| e.services.clone())
    }

    pub fn deployment_config(&self, namespace: &str) -> Option<ClusterDeploymentConfig> {
        self.clusters
            .get(namespace)
            .and_then(|e| e.deployment_config.clone())
    }

    pub fn devices_in_use(&self) -> bool {
        self.devices_in_use.load(Ordering::SeqCst)
    }

    fn cluster_token(&self, namespace: &str) -> Option<CancellationToken> {
        self.clusters.get(namespace).map(|e| e.token.clone())
    }

    // =========================================================================
    // Pipeline
    // =========================================================================

    /// Plan the cluster and write every object it is made of
    pub async fn create_instance(
        &self,
        cluster: &Cluster,
        update: bool,
    ) -> Result<ClusterDeploymentConfig> {
        let namespace = cluster.namespace().unwrap_or_default();
        let spec = &cluster.spec;
        info!("[{}] reconciling cluster update={}", namespace, update);

        validate_cluster_spec(spec)?;
        let ctx = ClusterContext::from_cluster(cluster, &self.config.default_image);
        let resurrect = DevicesResurrectOptions::parse(&spec.devices_resurrect_mode);
        let configurator = DeploymentConfigurator::new(
            namespace.clone(),
            self.config.operator_namespace.clone(),
            spec.clone(),
            self.api.clone(),
            self.discovery.clone(),
        );

        let nodes = configurator.get_cluster_nodes().await?;
        let existing = configurator.retrieve_deployment_config().await?;
        let plan = configurator
            .create_reconfiguration_spec(&existing, &nodes, &resurrect)
            .await?;
        let deployment_config = plan.deployment_config;
        print_deployment_config(&namespace, &deployment_config);

        let document = build_setup_document(&namespace, spec, &deployment_config, &resurrect)?;
        let outcome = self
            .api
            .apply_config_map(&cluster_config_map(&ctx, to_json(&document)?))
            .await?;
        debug!("[{}] cluster config map {}", namespace, outcome);

        for node in deployment_config.dev_config.keys() {
            label_target_node(self.api.as_ref(), &namespace, node, self.config.label_policy())
                .await?;
        }
        for node in &plan.nodes_to_delete {
            if let Err(e) =
                unlabel_target_node(self.api.as_ref(), &namespace, node, self.config.label_policy())
                    .await
            {
                warn!("[{}] failed to unlabel removed node {}: {}", namespace, node, e);
            }
        }

        self.api.ensure_service(&headless_service(&ctx)).await?;
        let outcome = self
            .api
            .apply_stateful_set(&target_stateful_set(&ctx, &deployment_config, &resurrect))
            .await?;
        info!("[{}] target stateful set {}", namespace, outcome);

        let outcome = self
            .api
            .apply_deployment(&mgr_deployment(&ctx, deployment_config.need_privileges))
            .await?;
        info!("[{}] manager deployment {}", namespace, outcome);
        for service in mgr_services(&ctx) {
            self.api.ensure_service(&service).await?;
        }

        set_planned_nodes(&namespace, deployment_config.dev_config.len());
        if let Some(mut entry) = self.clusters.get_mut(&namespace) {
            entry.ctx = ctx;
            entry.deployment_config = Some(deployment_config.clone());
        }
        Ok(deployment_config)
    }

    /// Retry [`Self::create_instance`] under `policy`; spec errors stop
    /// the loop at once
    async fn reconcile_until(
        &self,
        cluster: &Cluster,
        update: bool,
        policy: FixedInterval,
    ) -> Result<ClusterDeploymentConfig> {
        let what = format!(
            "reconciling cluster in namespace {}",
            cluster.namespace().unwrap_or_default()
        );
        retry_if(policy, &what, Error::is_retryable, || {
            self.create_instance(cluster, update)
        })
        .await
    }

    // =========================================================================
    // Status & Finalizer
    // =========================================================================

    async fn set_status(&self, cluster: &Cluster, state: ClusterState, message: impl Into<String>) {
        let namespace = cluster.namespace().unwrap_or_default();
        let status = ClusterStatus::new(state, message);
        record_state(&namespace, &state.to_string());
        if let Err(e) = self
            .api
            .update_cluster_status(&namespace, &cluster.name_any(), &status)
            .await
        {
            error!("[{}] failed to update cluster status to {}: {}", namespace, state, e);
        }
    }

    async fn add_finalizer(&self, cluster: &Cluster) -> Result<()> {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = cluster.name_any();
        let latest = self
            .api
            .get_cluster(&namespace, &name)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                kind: KIND.into(),
                name: name.clone(),
            })?;
        let mut finalizers = latest.finalizers().to_vec();
        if finalizers.iter().any(|f| f == FINALIZER_NAME) {
            info!("[{}] finalizer already set on cluster {}", namespace, name);
            return Ok(());
        }
        finalizers.push(FINALIZER_NAME.to_string());
        self.api
            .set_cluster_finalizers(&namespace, &name, finalizers)
            .await?;
        info!("[{}] added finalizer to cluster {}", namespace, name);
        Ok(())
    }

    async fn remove_finalizer(&self, cluster: &Cluster) -> Result<()> {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = cluster.name_any();
        if !cluster.finalizers().iter().any(|f| f == FINALIZER_NAME) {
            info!("[{}] finalizer {} not found on cluster {}", namespace, FINALIZER_NAME, name);
            return Ok(());
        }
        let remaining: Vec<String> = cluster
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != FINALIZER_NAME)
            .cloned()
            .collect();

        let what = format!("removing finalizer from cluster {}", name);
        let result = retry_if(
            self.config.finalizer_policy(),
            &what,
            |e| !e.is_not_found(),
            || self.api.set_cluster_finalizers(&namespace, &name, remaining.clone()),
        )
        .await;
        match result {
            Ok(()) => {
                info!("[{}] removed finalizer from cluster {}", namespace, name);
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Remove the target label from every node of the cluster. Unknown
    /// clusters fall back to the nodes named in the spec.
    async fn handle_delete(&self, cluster: &Cluster) {
        let namespace = cluster.namespace().unwrap_or_default();
        let nodes: Vec<String> = match self.deployment_config(&namespace) {
            Some(config) => config.dev_config.keys().cloned().collect(),
            None => cluster
                .spec
                .storage
                .nodes
                .iter()
                .map(|n| n.name.clone())
                .collect(),
        };
        for node in nodes {
            if let Err(e) =
                unlabel_target_node(self.api.as_ref(), &namespace, &node, self.config.label_policy())
                    .await
            {
                warn!("[{}] failed to unlabel node {}: {}", namespace, node, e);
            }
        }
    }

    fn start_services(&self, namespace: &str) {
        let Some(launcher) = &self.launcher else {
            return;
        };
        let Some(mut entry) = self.clusters.get_mut(namespace) else {
            return;
        };
        if entry.services_started {
            return;
        }
        entry.services_started = true;
        launcher.launch(namespace, entry.services.clone(), entry.token.clone());
    }

    async fn handle_update(&self, cluster: &Cluster) -> Result<()> {
        let namespace = cluster.namespace().unwrap_or_default();
        let (previous_image, services) = match self.clusters.get(&namespace) {
            Some(entry) => (entry.ctx.image.clone(), entry.services.clone()),
            None => return Err(Error::UnknownCluster { namespace }),
        };

        self.set_status(cluster, ClusterState::Updating, "").await;
        let policy = self.config.update_policy();
        let timeout = policy.timeout().unwrap_or_default();
        if let Err(e) = self.reconcile_until(cluster, true, policy).await {
            let message = if e.is_retryable() {
                format!(
                    "giving up updating cluster in namespace {} after {:?}. Error: {}",
                    namespace, timeout, e
                )
            } else {
                e.to_string()
            };
            error!("[{}] {}", namespace, message);
            self.set_status(cluster, ClusterState::Error, message).await;
            return Err(e);
        }

        let ctx = ClusterContext::from_cluster(cluster, &self.config.default_image);
        services.update_cluster(&ctx);
        if ctx.image != previous_image {
            info!("[{}] cluster image changed to {}", namespace, ctx.image);
            if let Err(e) = services.set_image(&ctx.image).await {
                warn!("[{}] failed to roll services to {}: {}", namespace, ctx.image, e);
            }
        }

        self.set_status(cluster, ClusterState::Created, "").await;
        Ok(())
    }
}

fn record<T>(result: &Result<T>) {
    let outcome = if result.is_ok() {
        Outcome::Success
    } else {
        Outcome::Failure
    };
    record_reconcile(KIND, outcome);
}

// =============================================================================
// Event Handling
// =============================================================================

#[async_trait]
impl EventHandler<Cluster> for ClusterController {
    async fn on_add(&self, cluster: Cluster) -> Result<()> {
        let namespace = cluster.namespace().unwrap_or_default();
        if cluster.metadata.deletion_timestamp.is_some() {
            info!("[{}] cluster is being deleted", namespace);
            self.handle_delete(&cluster).await;
            return self.remove_finalizer(&cluster).await;
        }
        info!("[{}] cluster {} added", namespace, cluster.name_any());

        let uses_all_devices = cluster.spec.storage.any_use_all_devices();
        if uses_all_devices && self.devices_in_use() {
            let message = "using all devices in more than one namespace is not supported";
            error!("[{}] {}", namespace, message);
            self.set_status(&cluster, ClusterState::Error, message).await;
            record_reconcile(KIND, Outcome::Failure);
            return Err(Error::Validation(message.into()));
        }
        if uses_all_devices {
            self.devices_in_use.store(true, Ordering::SeqCst);
        }

        let ctx = ClusterContext::from_cluster(&cluster, &self.config.default_image);
        let entry = ClusterEntry {
            services: Arc::new(ServiceSet::new(self.api.clone(), ctx.clone())),
            ctx,
            deployment_config: None,
            token: self.token.child_token(),
            uses_all_devices,
            services_started: false,
        };
        if let Some(previous) = self.clusters.insert(namespace.clone(), entry) {
            previous.token.cancel();
        }

        self.set_status(&cluster, ClusterState::Creating, "").await;
        let policy = self.config.create_policy();
        let timeout = policy.timeout().unwrap_or_default();
        let result = self.reconcile_until(&cluster, false, policy).await;
        record(&result);
        if let Err(e) = result {
            let message = if e.is_retryable() {
                format!(
                    "giving up creating cluster in namespace {} after {:?}. Error: {}",
                    namespace, timeout, e
                )
            } else {
                e.to_string()
            };
            error!("[{}] {}", namespace, message);
            self.set_status(&cluster, ClusterState::Error, message).await;
            return Err(e);
        }
        self.set_status(&cluster, ClusterState::Created, "").await;
        info!("[{}] cluster created", namespace);

        self.start_services(&namespace);
        if let Err(e) = self.add_finalizer(&cluster).await {
            error!("[{}] failed to add finalizer: {}", namespace, e);
        }
        Ok(())
    }

    async fn on_update(&self, old: Cluster, new: Cluster) -> Result<()> {
        let namespace = new.namespace().unwrap_or_default();
        if new.metadata.deletion_timestamp.is_some() {
            info!("[{}] cluster {} has a deletion timestamp", namespace, new.name_any());
            self.set_status(&new, ClusterState::Deleting, "").await;
            self.handle_delete(&new).await;
            let result = self.remove_finalizer(&new).await;
            record(&result);
            return result;
        }

        if old.spec == new.spec {
            debug!("[{}] cluster spec unchanged, skipping update", namespace);
            record_reconcile(KIND, Outcome::Skipped);
            return Ok(());
        }

        info!("[{}] applying cluster spec changes", namespace);
        let result = self.handle_update(&new).await;
        record(&result);
        result
    }

    async fn on_delete(&self, cluster: Cluster) -> Result<()> {
        let namespace = cluster.namespace().unwrap_or_default();
        info!("[{}] cluster {} deleted", namespace, cluster.name_any());
        self.handle_delete(&cluster).await;

        if let Some(token) = self.cluster_token(&namespace) {
            token.cancel();
        }
        if let Some((_, entry)) = self.clusters.remove(&namespace) {
            if entry.uses_all_devices {
                self.devices_in_use.store(false, Ordering::SeqCst);
            }
        }
        forget_cluster(&namespace);
        record_reconcile(KIND, Outcome::Success);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::fake::{FakeClusterApi, FakeDiscovery};
    use crate::crd::{ClusterSpec, Directory, NfsSpec, Nfs, Selection, StorageNode};
    use crate::deployment::nodes::tests::ready_node;
    use crate::deployment::setup::parse_setup_document;
    use crate::deployment::SETUP_CONFIG_KEY;
    use crate::domain::devices::LocalDisk;
    use crate::workload::{CLUSTER_CONFIG_MAP, MGR_APP_NAME, TARGET_APP_NAME};
    use assert_matches::assert_matches;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use parking_lot::Mutex;

    const NS: &str = "rook-edgefs";
    const TB: u64 = 1_000_000_000_000;

    #[derive(Default)]
    struct RecordingLauncher {
        launched: Mutex<Vec<(String, CancellationToken)>>,
    }

    impl ServiceLauncher for RecordingLauncher {
        fn launch(&self, namespace: &str, _services: Arc<ServiceSet>, token: CancellationToken) {
            self.launched.lock().push((namespace.to_string(), token));
        }
    }

    struct Harness {
        api: Arc<FakeClusterApi>,
        launcher: Arc<RecordingLauncher>,
        root: CancellationToken,
        controller: ClusterController,
    }

    fn harness(nodes: &[&str]) -> Harness {
        let api = Arc::new(FakeClusterApi::default());
        let discovery = Arc::new(FakeDiscovery::default());
        for node in nodes {
            api.add_node(ready_node(node));
            discovery.set_devices(
                node,
                vec![LocalDisk {
                    name: "sdb".into(),
                    dev_links: format!("/dev/disk/by-id/ata-disk-{}", node),
                    size: 4 * TB,
                    rotational: true,
                    empty: true,
                    ..Default::default()
                }],
            );
        }
        let launcher = Arc::new(RecordingLauncher::default());
        let root = CancellationToken::new();
        let controller = ClusterController::new(
            api.clone(),
            discovery,
            OperatorConfig::fast(),
            root.clone(),
        )
        .with_launcher(launcher.clone());
        Harness {
            api,
            launcher,
            root,
            controller,
        }
    }

    fn cluster(namespace: &str, spec: ClusterSpec) -> Cluster {
        let mut cluster = Cluster::new("edgefs", spec);
        cluster.metadata.namespace = Some(namespace.into());
        cluster.metadata.uid = Some(format!("uid-{}", namespace));
        cluster.metadata.resource_version = Some("1".into());
        cluster
    }

    fn spec_with_nodes(nodes: &[&str]) -> ClusterSpec {
        let mut spec = ClusterSpec::default();
        spec.storage.nodes = nodes.iter().map(|n| StorageNode::named(n)).collect();
        spec
    }

    fn rtrd_spec(nodes: &[&str]) -> ClusterSpec {
        let mut spec = spec_with_nodes(nodes);
        spec.data_dir_host_path = "/var/lib/edgefs".into();
        spec.storage.selection.use_all_devices = Some(true);
        spec
    }

    fn state_of(api: &FakeClusterApi, namespace: &str) -> (Option<ClusterState>, String) {
        let status = api
            .cluster(namespace, "edgefs")
            .and_then(|c| c.status)
            .unwrap_or_default();
        (status.state, status.message)
    }

    fn setup_document(api: &FakeClusterApi) -> crate::deployment::SetupDocument {
        let cm = api.config_map(NS, CLUSTER_CONFIG_MAP).unwrap();
        parse_setup_document(&cm.data.unwrap()[SETUP_CONFIG_KEY]).unwrap()
    }

    async fn create(h: &Harness, cluster: &Cluster) -> Result<()> {
        h.api.put_cluster(cluster.clone());
        h.controller.on_add(cluster.clone()).await
    }

    #[tokio::test]
    async fn test_create_auto_rtlfs_cluster() {
        let nodes = ["n1", "n2", "n3"];
        let h = harness(&nodes);
        let c = cluster(NS, spec_with_nodes(&nodes));
        create(&h, &c).await.unwrap();

        assert_eq!(state_of(&h.api, NS).0, Some(ClusterState::Created));
        let document = setup_document(&h.api);
        assert_eq!(document.len(), 3);
        for node in document.values() {
            assert_eq!(node.rtlfs_autodetect, "/data");
            assert_eq!(node.ccowd.transport, vec!["rtlfs".to_string()]);
        }
        for node in nodes {
            assert_eq!(
                h.api.node_labels(node).get(NS).map(String::as_str),
                Some("cluster")
            );
        }

        let set = h.api.stateful_set(NS, TARGET_APP_NAME).unwrap();
        assert_eq!(set.spec.unwrap().replicas, Some(3));
        assert!(h.api.deployment(NS, MGR_APP_NAME).is_some());
        assert!(h.api.service(NS, TARGET_APP_NAME).is_some());
        assert!(h.api.service(NS, MGR_APP_NAME).is_some());

        let stored = h.api.cluster(NS, "edgefs").unwrap();
        assert_eq!(stored.finalizers(), &[FINALIZER_NAME.to_string()]);
        assert_eq!(h.launcher.launched.lock().len(), 1);
        assert!(h.controller.is_managed(NS));
        assert_eq!(h.controller.deployment_config(NS).unwrap().dev_config.len(), 3);
    }

    #[tokio::test]
    async fn test_rtrd_cluster_below_minimum_fails_fast() {
        let nodes = ["n1", "n2"];
        let h = harness(&nodes);
        let c = cluster(NS, rtrd_spec(&nodes));
        let err = create(&h, &c).await.unwrap_err();
        assert!(err.to_string().contains("less than 3"), "{}", err);

        let (state, message) = state_of(&h.api, NS);
        assert_eq!(state, Some(ClusterState::Error));
        assert!(message.contains("less than 3"));
        assert!(h.api.stateful_set(NS, TARGET_APP_NAME).is_none());
        assert!(h.launcher.launched.lock().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_slave_count_fails_fast() {
        let nodes = ["n1", "n2", "n3"];
        let h = harness(&nodes);
        let mut spec = rtrd_spec(&nodes);
        spec.devices_resurrect_mode = "restore:18446744073709551615".into();
        let err = create(&h, &cluster(NS, spec)).await.unwrap_err();
        assert_matches!(err, Error::Validation(_));

        let (state, message) = state_of(&h.api, NS);
        assert_eq!(state, Some(ClusterState::Error));
        assert!(message.contains("slave containers"), "{}", message);
        assert!(h.api.stateful_set(NS, TARGET_APP_NAME).is_none());
    }

    #[tokio::test]
    async fn test_create_gives_up_after_deadline() {
        let nodes = ["n1", "n2", "n3"];
        let h = harness(&nodes);
        h.api.fail_label_patches(usize::MAX);
        let c = cluster(NS, spec_with_nodes(&nodes));
        let err = create(&h, &c).await.unwrap_err();
        assert!(err.is_conflict());

        let (state, message) = state_of(&h.api, NS);
        assert_eq!(state, Some(ClusterState::Error));
        assert!(message.starts_with("giving up creating cluster in namespace rook-edgefs"), "{}", message);
    }

    #[tokio::test]
    async fn test_resurrect_zap_reapply() {
        let nodes = ["n1", "n2", "n3"];
        let h = harness(&nodes);
        let c = cluster(NS, rtrd_spec(&nodes));
        create(&h, &c).await.unwrap();
        let before = setup_document(&h.api);
        assert!(!before["n1"].rtrd.devices.is_empty());

        let mut zapped = c.clone();
        zapped.spec.devices_resurrect_mode = "restorezap".into();
        h.controller.on_update(c, zapped).await.unwrap();
        assert_eq!(state_of(&h.api, NS).0, Some(ClusterState::Created));

        let document = setup_document(&h.api);
        for node in document.values() {
            assert!(node.rtrd.devices.is_empty());
            assert!(node.rtrd_slaves.is_empty());
            assert!(node.rtlfs.devices.is_empty());
            assert_eq!(node.ccowd.transport, vec!["rtrd".to_string()]);
            assert_eq!(node.cluster_nodes.len(), 3);
        }

        let pod = h
            .api
            .stateful_set(NS, TARGET_APP_NAME)
            .and_then(|s| s.spec)
            .and_then(|s| s.template.spec)
            .unwrap();
        let zap = &pod.init_containers.unwrap()[0];
        assert_eq!(
            zap.args.as_ref().unwrap(),
            &vec!["toolbox".to_string(), "nezap --do-as-i-say".to_string()]
        );
    }

    #[tokio::test]
    async fn test_transport_change_is_rejected() {
        let nodes = ["n1", "n2", "n3"];
        let h = harness(&nodes);
        let c = cluster(NS, rtrd_spec(&nodes));
        create(&h, &c).await.unwrap();
        let set_before = h.api.stateful_set(NS, TARGET_APP_NAME);

        let mut rtlfs = c.clone();
        rtlfs.spec.storage.selection = Selection {
            directories: vec![Directory {
                path: "/mnt/d0".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let err = h.controller.on_update(c, rtlfs).await.unwrap_err();
        assert_matches!(err, Error::Incompatible { .. });

        assert_eq!(state_of(&h.api, NS).0, Some(ClusterState::Error));
        assert_eq!(h.api.stateful_set(NS, TARGET_APP_NAME), set_before);
    }

    #[tokio::test]
    async fn test_unchanged_spec_is_skipped() {
        let nodes = ["n1", "n2", "n3"];
        let h = harness(&nodes);
        let c = cluster(NS, spec_with_nodes(&nodes));
        create(&h, &c).await.unwrap();
        let writes = h.api.deployment_writes();

        let mut touched = c.clone();
        touched.metadata.resource_version = Some("2".into());
        h.controller.on_update(c, touched).await.unwrap();
        assert_eq!(h.api.deployment_writes(), writes);
    }

    #[tokio::test]
    async fn test_update_of_unknown_cluster() {
        let h = harness(&["n1"]);
        let c = cluster(NS, spec_with_nodes(&["n1"]));
        let mut changed = c.clone();
        changed.spec.trlog_keep_days = 3;
        assert_matches!(
            h.controller.on_update(c, changed).await,
            Err(Error::UnknownCluster { .. })
        );
    }

    #[tokio::test]
    async fn test_image_change_rolls_services() {
        let nodes = ["n1", "n2", "n3"];
        let h = harness(&nodes);
        let c = cluster(NS, spec_with_nodes(&nodes));
        create(&h, &c).await.unwrap();

        let mut share = Nfs::new(
            "share",
            NfsSpec {
                instances: 1,
                ..Default::default()
            },
        );
        share.metadata.namespace = Some(NS.into());
        let services = h.controller.services(NS).unwrap();
        services.nfs.on_add(share).await.unwrap();

        let mut upgraded = c.clone();
        upgraded.spec.edgefs_image_name = "edgefs/edgefs:1.3.0".into();
        h.controller.on_update(c, upgraded).await.unwrap();

        let image = |name: &str| {
            h.api
                .deployment(NS, name)
                .and_then(|d| d.spec)
                .and_then(|s| s.template.spec)
                .and_then(|p| p.containers[0].image.clone())
        };
        assert_eq!(image("rook-edgefs-nfs-share").as_deref(), Some("edgefs/edgefs:1.3.0"));
        assert_eq!(image(MGR_APP_NAME).as_deref(), Some("edgefs/edgefs:1.3.0"));
    }

    #[tokio::test]
    async fn test_second_use_all_devices_cluster_refused() {
        let nodes = ["n1", "n2", "n3"];
        let h = harness(&nodes);
        create(&h, &cluster(NS, rtrd_spec(&nodes))).await.unwrap();
        assert!(h.controller.devices_in_use());

        let other = cluster("rook-edgefs-2", rtrd_spec(&nodes));
        assert_matches!(create(&h, &other).await, Err(Error::Validation(_)));
        let (state, message) = state_of(&h.api, "rook-edgefs-2");
        assert_eq!(state, Some(ClusterState::Error));
        assert_eq!(message, "using all devices in more than one namespace is not supported");
        assert!(!h.controller.is_managed("rook-edgefs-2"));

        h.controller.on_delete(other).await.unwrap();
        assert!(h.controller.devices_in_use());
    }

    #[tokio::test]
    async fn test_delete_unlabels_and_releases() {
        let nodes = ["n1", "n2", "n3"];
        let h = harness(&nodes);
        let c = cluster(NS, rtrd_spec(&nodes));
        create(&h, &c).await.unwrap();
        let token = h.launcher.launched.lock()[0].1.clone();

        let mut deleting = h.api.cluster(NS, "edgefs").unwrap();
        deleting.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        h.api.fail_finalizer_updates(2);
        h.controller.on_update(c, deleting.clone()).await.unwrap();

        for node in nodes {
            assert!(h.api.node_labels(node).get(NS).is_none());
        }
        assert!(h.api.cluster(NS, "edgefs").unwrap().finalizers().is_empty());
        assert_eq!(state_of(&h.api, NS).0, Some(ClusterState::Deleting));

        h.controller.on_delete(deleting).await.unwrap();
        assert!(token.is_cancelled());
        assert!(!h.root.is_cancelled());
        assert!(!h.controller.is_managed(NS));
        assert!(!h.controller.devices_in_use());
    }

    #[tokio::test]
    async fn test_root_cancel_reaches_clusters() {
        let nodes = ["n1", "n2", "n3"];
        let h = harness(&nodes);
        create(&h, &cluster(NS, spec_with_nodes(&nodes))).await.unwrap();
        let token = h.launcher.launched.lock()[0].1.clone();
        h.root.cancel();
        assert!(token.is_cancelled());
    }
}
