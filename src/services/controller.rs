//! Generic service reconciler
//!
//! One [`ServiceController`] per frontend kind and cluster. It remembers the
//! services it deployed so a cluster image change can roll all of them.

use super::{
    instance_name, make_deployment, make_service, validate_service, EdgefsService,
};
use crate::controller::watch::EventHandler;
use crate::crd::{Iscsi, Isgw, Nfs, Smb, Swift, S3, S3x};
use crate::domain::ports::{ApplyOutcome, ClusterApiRef};
use crate::domain::quantity::semantically_equal;
use crate::error::Result;
use crate::metrics::{record_reconcile, Outcome};
use crate::workload::ClusterContext;
use async_trait::async_trait;
use dashmap::DashMap;
use kube::ResourceExt;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub type ServiceControllerRef<S> = Arc<ServiceController<S>>;

pub struct ServiceController<S: EdgefsService> {
    api: ClusterApiRef,
    cluster: RwLock<ClusterContext>,
    known: DashMap<String, S>,
}

impl<S: EdgefsService> ServiceController<S> {
    pub fn new(api: ClusterApiRef, cluster: ClusterContext) -> Self {
        Self {
            api,
            cluster: RwLock::new(cluster),
            known: DashMap::new(),
        }
    }

    fn context(&self) -> ClusterContext {
        self.cluster.read().clone()
    }

    pub fn namespace(&self) -> String {
        self.cluster.read().namespace.clone()
    }

    /// Names of the services this controller deployed
    pub fn known_services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.known.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Replace the cluster-derived settings used by later reconciles
    pub fn update_cluster(&self, ctx: ClusterContext) {
        *self.cluster.write() = ctx;
    }

    /// Deploy `svc`; with `update` false an existing deployment is left
    /// alone
    pub async fn create_or_update(&self, svc: &S, update: bool) -> Result<ApplyOutcome> {
        let kind = S::KIND;
        let name = svc.name_any();
        info!("[{}] starting update={} service={}", kind, update, name);

        validate_service(svc)?;
        let ctx = self.context();
        let instance = instance_name(kind, &name);

        if !update && self.api.get_deployment(&ctx.namespace, &instance).await?.is_some() {
            info!("[{}] service {} exists in namespace {}", kind, name, ctx.namespace);
            self.known.insert(name, svc.clone());
            return Ok(ApplyOutcome::Unchanged);
        }

        let deployment = make_deployment(svc, &ctx)?;
        let outcome = self.api.apply_deployment(&deployment).await?;
        info!("[{}] deployment {} {}", kind, instance, outcome);

        let service = make_service(svc, &ctx)?;
        match self.api.ensure_service(&service).await? {
            ApplyOutcome::Unchanged => info!("[{}] service {} already exists", kind, instance),
            created => info!("[{}] service {} {}", kind, instance, created),
        }

        self.known.insert(name, svc.clone());
        Ok(outcome)
    }

    /// Remove the service and deployment of `svc`
    pub async fn delete(&self, svc: &S) -> Result<()> {
        let kind = S::KIND;
        let name = svc.name_any();
        let namespace = svc.namespace().unwrap_or_else(|| self.namespace());
        let instance = instance_name(kind, &name);

        if !self.api.delete_service(&namespace, &instance).await? {
            warn!("[{}] service {} not found, skipping", kind, instance);
        }
        if !self.api.delete_deployment(&namespace, &instance).await? {
            warn!("[{}] deployment {} not found, skipping", kind, instance);
        }
        self.known.remove(&name);
        info!("[{}] removed service {} from namespace {}", kind, name, namespace);
        Ok(())
    }

    /// Switch to a new cluster image and roll every known service
    pub async fn set_image(&self, image: &str) -> Result<()> {
        self.cluster.write().image = image.to_string();
        let services: Vec<S> = self.known.iter().map(|e| e.value().clone()).collect();
        for svc in services {
            if let Err(e) = self.create_or_update(&svc, true).await {
                error!("[{}] failed to update image of {}: {}", S::KIND, svc.name_any(), e);
                record_reconcile(S::KIND.as_str(), Outcome::Failure);
                return Err(e);
            }
        }
        Ok(())
    }

    fn belongs_to_cluster(&self, svc: &S) -> bool {
        svc.namespace().as_deref() == Some(self.namespace().as_str())
    }
}

fn record<T>(kind: &str, result: &Result<T>) {
    let outcome = if result.is_ok() {
        Outcome::Success
    } else {
        Outcome::Failure
    };
    record_reconcile(kind, outcome);
}

#[async_trait]
impl<S: EdgefsService> EventHandler<S> for ServiceController<S> {
    async fn on_add(&self, obj: S) -> Result<()> {
        if !self.belongs_to_cluster(&obj) {
            return Ok(());
        }
        let result = self.create_or_update(&obj, false).await.map(|_| ());
        record(S::KIND.as_str(), &result);
        result
    }

    async fn on_update(&self, old: S, new: S) -> Result<()> {
        if !self.belongs_to_cluster(&new) {
            return Ok(());
        }
        if semantically_equal(&old.spec_json()?, &new.spec_json()?) {
            debug!("[{}] service {} did not change", S::KIND, new.name_any());
            record_reconcile(S::KIND.as_str(), Outcome::Skipped);
            return Ok(());
        }
        info!("[{}] applying changes to service {}", S::KIND, new.name_any());
        let result = self.create_or_update(&new, true).await.map(|_| ());
        record(S::KIND.as_str(), &result);
        result
    }

    async fn on_delete(&self, obj: S) -> Result<()> {
        if !self.belongs_to_cluster(&obj) {
            return Ok(());
        }
        let result = self.delete(&obj).await;
        record(S::KIND.as_str(), &result);
        result
    }
}

// =============================================================================
// Service Set
// =============================================================================

/// Controllers of every frontend kind of one cluster
pub struct ServiceSet {
    pub nfs: ServiceControllerRef<Nfs>,
    pub s3: ServiceControllerRef<S3>,
    pub swift: ServiceControllerRef<Swift>,
    pub s3x: ServiceControllerRef<S3x>,
    pub iscsi: ServiceControllerRef<Iscsi>,
    pub isgw: ServiceControllerRef<Isgw>,
    pub smb: ServiceControllerRef<Smb>,
}

impl ServiceSet {
    pub fn new(api: ClusterApiRef, ctx: ClusterContext) -> Self {
        Self {
            nfs: Arc::new(ServiceController::new(api.clone(), ctx.clone())),
            s3: Arc::new(ServiceController::new(api.clone(), ctx.clone())),
            swift: Arc::new(ServiceController::new(api.clone(), ctx.clone())),
            s3x: Arc::new(ServiceController::new(api.clone(), ctx.clone())),
            iscsi: Arc::new(ServiceController::new(api.clone(), ctx.clone())),
            isgw: Arc::new(ServiceController::new(api.clone(), ctx.clone())),
            smb: Arc::new(ServiceController::new(api, ctx)),
        }
    }

    pub fn update_cluster(&self, ctx: &ClusterContext) {
        self.nfs.update_cluster(ctx.clone());
        self.s3.update_cluster(ctx.clone());
        self.swift.update_cluster(ctx.clone());
        self.s3x.update_cluster(ctx.clone());
        self.iscsi.update_cluster(ctx.clone());
        self.isgw.update_cluster(ctx.clone());
        self.smb.update_cluster(ctx.clone());
    }

    /// Roll every service of the cluster to `image`; all kinds are tried
    /// and the first failure is returned
    pub async fn set_image(&self, image: &str) -> Result<()> {
        let results = [
            self.nfs.set_image(image).await,
            self.s3.set_image(image).await,
            self.swift.set_image(image).await,
            self.s3x.set_image(image).await,
            self.iscsi.set_image(image).await,
            self.isgw.set_image(image).await,
            self.smb.set_image(image).await,
        ];
        results.into_iter().collect()
    }
}
