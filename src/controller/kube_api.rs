//! Kubernetes-backed adapters
//!
//! [`KubeClusterApi`] implements [`ClusterApi`] on a `kube::Client`, and
//! [`KubeServiceLauncher`] starts the per-cluster service watches.

use super::cluster::ServiceLauncher;
use super::watch::{self, EventHandler};
use crate::crd::{Cluster, ClusterStatus};
use crate::domain::ports::{ApplyOutcome, ClusterApi};
use crate::error::{Error, Result};
use crate::services::{EdgefsService, ServiceControllerRef, ServiceSet};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Node, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// [`ClusterApi`] over a live API server
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Create `obj`, replacing the stored object when it already exists
async fn create_or_replace<K>(api: &Api<K>, obj: &K) -> Result<ApplyOutcome>
where
    K: Resource + Clone + Debug + Serialize + DeserializeOwned,
{
    let name = obj.name_any();
    match api.create(&PostParams::default(), obj).await {
        Ok(_) => Ok(ApplyOutcome::Created),
        Err(e) => {
            let err = Error::from(e);
            if !err.is_already_exists() {
                return Err(err);
            }
            debug!("{} already exists, updating", name);
            let current = api.get(&name).await?;
            let mut updated = obj.clone();
            updated.meta_mut().resource_version = current.meta().resource_version.clone();
            api.replace(&name, &PostParams::default(), &updated).await?;
            Ok(ApplyOutcome::Updated)
        }
    }
}

/// Delete with foreground propagation; `false` when the object is gone
async fn delete_foreground<K>(api: &Api<K>, name: &str) -> Result<bool>
where
    K: Resource + Clone + Debug + DeserializeOwned,
{
    match api.delete(name, &DeleteParams::foreground()).await {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(response)) if response.code == 404 => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn patch_node_labels(
        &self,
        name: &str,
        labels: &BTreeMap<String, Option<String>>,
    ) -> Result<()> {
        let api: Api<Node> = Api::all(self.client.clone());
        let patch = json!({ "metadata": { "labels": labels } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        Ok(self.namespaced::<ConfigMap>(namespace).get_opt(name).await?)
    }

    async fn list_config_maps(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ConfigMap>> {
        let params = ListParams::default().labels(label_selector);
        Ok(self
            .namespaced::<ConfigMap>(namespace)
            .list(&params)
            .await?
            .items)
    }

    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<ApplyOutcome> {
        let namespace = config_map.namespace().unwrap_or_default();
        create_or_replace(&self.namespaced(&namespace), config_map).await
    }

    async fn ensure_service(&self, service: &Service) -> Result<ApplyOutcome> {
        let namespace = service.namespace().unwrap_or_default();
        let api: Api<Service> = self.namespaced(&namespace);
        match api.create(&PostParams::default(), service).await {
            Ok(_) => Ok(ApplyOutcome::Created),
            Err(e) => {
                let err = Error::from(e);
                if err.is_already_exists() {
                    Ok(ApplyOutcome::Unchanged)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<bool> {
        delete_foreground(&self.namespaced::<Service>(namespace), name).await
    }

    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>> {
        Ok(self.namespaced::<StatefulSet>(namespace).get_opt(name).await?)
    }

    async fn apply_stateful_set(&self, stateful_set: &StatefulSet) -> Result<ApplyOutcome> {
        let namespace = stateful_set.namespace().unwrap_or_default();
        create_or_replace(&self.namespaced(&namespace), stateful_set).await
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        Ok(self.namespaced::<Deployment>(namespace).get_opt(name).await?)
    }

    async fn apply_deployment(&self, deployment: &Deployment) -> Result<ApplyOutcome> {
        let namespace = deployment.namespace().unwrap_or_default();
        create_or_replace(&self.namespaced(&namespace), deployment).await
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<bool> {
        delete_foreground(&self.namespaced::<Deployment>(namespace), name).await
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>> {
        Ok(self.namespaced::<Cluster>(namespace).get_opt(name).await?)
    }

    async fn update_cluster_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ClusterStatus,
    ) -> Result<()> {
        let patch = json!({ "status": status });
        self.namespaced::<Cluster>(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn set_cluster_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<()> {
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        self.namespaced::<Cluster>(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

// =============================================================================
// Service Watches
// =============================================================================

/// Starts one namespaced watch per service kind
pub struct KubeServiceLauncher {
    client: Client,
}

impl KubeServiceLauncher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn watch<S: EdgefsService>(
        &self,
        namespace: &str,
        controller: ServiceControllerRef<S>,
        token: CancellationToken,
    ) {
        let api: Api<S> = Api::namespaced(self.client.clone(), namespace);
        let handler: Arc<dyn EventHandler<S>> = controller;
        watch::spawn(api, S::KIND.as_str(), handler, token);
    }
}

impl ServiceLauncher for KubeServiceLauncher {
    fn launch(&self, namespace: &str, services: Arc<ServiceSet>, token: CancellationToken) {
        info!("[{}] starting service watches", namespace);
        self.watch(namespace, services.nfs.clone(), token.clone());
        self.watch(namespace, services.s3.clone(), token.clone());
        self.watch(namespace, services.swift.clone(), token.clone());
        self.watch(namespace, services.s3x.clone(), token.clone());
        self.watch(namespace, services.iscsi.clone(), token.clone());
        self.watch(namespace, services.isgw.clone(), token.clone());
        self.watch(namespace, services.smb.clone(), token);
    }
}
