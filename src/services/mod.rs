//! Service Sub-Reconcilers
//!
//! Every frontend kind (NFS, S3, SWIFT, S3X, ISCSI, ISGW, SMB) follows the
//! same protocol: validate, fill defaults, skip when the deployment exists
//! and this is not an update, apply the deployment, then ensure the
//! service. Kinds only describe their arguments, ports, environment and
//! extra pod pieces through [`EdgefsService`]; [`ServiceController`] does
//! the rest.

pub mod controller;
pub mod iscsi;
pub mod isgw;
pub mod nfs;
pub mod s3;
pub mod s3x;
pub mod smb;
pub mod swift;

pub use controller::{ServiceController, ServiceControllerRef, ServiceSet};

use crate::crd::{apply_annotations, Annotations, Placement};
use crate::error::{Error, Result};
use crate::workload::initiator::is_embedded_profile;
use crate::workload::{
    daemon_env, env, initiator_env, mount, security_context, service_data_mounts,
    ClusterContext, DaemonKind, APP_LABEL, CLUSTER_LABEL, GRPC_PORT,
};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, KeyToPath, PodSpec, PodTemplateSpec, ResourceRequirements,
    SecretVolumeSource, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::NamespaceResourceScope;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;

pub const SVC_NAME_LABEL: &str = "edgefs_svcname";
pub const SVC_TYPE_LABEL: &str = "edgefs_svctype";

pub const DEFAULT_SERVICE_TYPE: &str = "ClusterIP";

const SERVICE_CAPABILITIES: &[&str] = &["SYS_NICE", "SYS_RESOURCE", "IPC_LOCK"];

// =============================================================================
// Ports
// =============================================================================

/// One port exposed by both the container and the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub name: String,
    pub port: i32,
    pub protocol: &'static str,
    pub node_port: Option<i32>,
}

impl PortSpec {
    pub fn tcp(name: &str, port: i32) -> Self {
        Self {
            name: name.into(),
            port,
            protocol: "TCP",
            node_port: None,
        }
    }

    pub fn udp(name: &str, port: i32) -> Self {
        Self {
            protocol: "UDP",
            ..Self::tcp(name, port)
        }
    }

    /// Publish on a fixed node port; zero keeps it unset
    pub fn with_node_port(mut self, node_port: u16) -> Self {
        if node_port != 0 {
            self.node_port = Some(node_port as i32);
        }
        self
    }

    pub fn container_port(&self) -> ContainerPort {
        ContainerPort {
            name: Some(self.name.clone()),
            container_port: self.port,
            protocol: Some(self.protocol.into()),
            ..Default::default()
        }
    }

    pub fn service_port(&self) -> ServicePort {
        ServicePort {
            name: Some(self.name.clone()),
            port: self.port,
            target_port: Some(IntOrString::Int(self.port)),
            protocol: Some(self.protocol.into()),
            node_port: self.node_port,
            ..Default::default()
        }
    }
}

/// Port with its default applied
pub fn port_or(port: u16, default: u16) -> i32 {
    if port == 0 {
        default as i32
    } else {
        port as i32
    }
}

// =============================================================================
// TLS Certificates
// =============================================================================

pub const SSL_CERT_VOLUME_NAME: &str = "ssl-cert-volume";
pub const SSL_MOUNT_PATH: &str = "/opt/nedge/etc/ssl/";

/// Secret volume exposing `sslkey` and `sslcert` as `ssl.key` and `ssl.crt`
pub fn ssl_volumes(secret: &str) -> Vec<Volume> {
    if secret.is_empty() {
        return Vec::new();
    }
    let item = |key: &str, path: &str| KeyToPath {
        key: key.into(),
        path: path.into(),
        ..Default::default()
    };
    vec![Volume {
        name: SSL_CERT_VOLUME_NAME.into(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.into()),
            items: Some(vec![item("sslkey", "ssl.key"), item("sslcert", "ssl.crt")]),
            ..Default::default()
        }),
        ..Default::default()
    }]
}

pub fn ssl_mounts(secret: &str) -> Vec<VolumeMount> {
    if secret.is_empty() {
        return Vec::new();
    }
    vec![mount(SSL_CERT_VOLUME_NAME, SSL_MOUNT_PATH, None)]
}

/// `ClusterIP` unless the spec names a type
pub fn service_type_or_default(service_type: &str) -> &str {
    if service_type.is_empty() {
        DEFAULT_SERVICE_TYPE
    } else {
        service_type
    }
}

// =============================================================================
// Service Kind Trait
// =============================================================================

/// Fields every service spec carries
#[derive(Debug, Clone, Copy)]
pub struct CommonSpec<'a> {
    pub annotations: &'a Annotations,
    pub placement: &'a Placement,
    pub resources: Option<&'a ResourceRequirements>,
    pub instances: i32,
    pub resource_profile: &'a str,
    pub chunk_cache_size: Option<&'a Quantity>,
}

/// Kind-specific part of a frontend deployment
pub trait EdgefsService:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    const KIND: DaemonKind;

    fn common(&self) -> CommonSpec<'_>;

    /// Spec as JSON for semantic change detection
    fn spec_json(&self) -> Result<serde_json::Value>;

    fn replicas(&self) -> i32 {
        self.common().instances
    }

    /// Kind-specific checks on top of name and namespace
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn image(&self, cluster_image: &str) -> String {
        cluster_image.to_string()
    }

    fn args(&self) -> Vec<String> {
        vec![Self::KIND.as_str().to_string()]
    }

    /// Container ports besides gRPC
    fn ports(&self) -> Result<Vec<PortSpec>>;

    /// Ports published by the service; the container ports unless a side
    /// container listens on more
    fn service_ports(&self) -> Result<Vec<PortSpec>> {
        self.ports()
    }

    fn extra_env(&self) -> Result<Vec<EnvVar>> {
        Ok(Vec::new())
    }

    fn extra_mounts(&self) -> Vec<VolumeMount> {
        Vec::new()
    }

    fn extra_volumes(&self) -> Vec<Volume> {
        Vec::new()
    }

    /// Side containers next to the main one
    fn extra_containers(&self, _ctx: &ClusterContext, _main: &Container) -> Vec<Container> {
        Vec::new()
    }

    fn configure_pod(&self, _ctx: &ClusterContext, _pod: &mut PodSpec) {}

    fn service_type(&self) -> &str {
        DEFAULT_SERVICE_TYPE
    }

    fn external_ips(&self) -> Result<Option<Vec<String>>> {
        Ok(None)
    }
}

// =============================================================================
// Builders
// =============================================================================

pub fn app_name(kind: DaemonKind) -> String {
    format!("rook-edgefs-{}", kind)
}

/// `rook-edgefs-<kind>-<name>`
pub fn instance_name(kind: DaemonKind, name: &str) -> String {
    format!("{}-{}", app_name(kind), name)
}

pub fn service_labels(kind: DaemonKind, name: &str, namespace: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL.to_string(), app_name(kind)),
        (CLUSTER_LABEL.to_string(), namespace.to_string()),
        (SVC_NAME_LABEL.to_string(), name.to_string()),
        (SVC_TYPE_LABEL.to_string(), kind.as_str().to_string()),
    ])
}

/// Name and namespace must be set before anything is built
pub fn validate_service<S: EdgefsService>(svc: &S) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidService {
        kind: S::KIND.to_string(),
        name: svc.name_any(),
        reason: reason.to_string(),
    };
    if svc.meta().name.as_deref().unwrap_or_default().is_empty() {
        return Err(invalid("missing name"));
    }
    if svc.namespace().unwrap_or_default().is_empty() {
        return Err(invalid("missing namespace"));
    }
    svc.validate()
}

fn with_grpc(ports: Vec<PortSpec>) -> Vec<PortSpec> {
    let mut all = vec![PortSpec::tcp("grpc", GRPC_PORT)];
    all.extend(ports);
    all
}

/// Main frontend container
pub fn service_container<S: EdgefsService>(svc: &S, ctx: &ClusterContext) -> Result<Container> {
    let common = svc.common();
    let name = svc.name_any();

    let mut vars = daemon_env();
    vars.push(env("CCOW_SVCNAME", name));
    vars.extend(svc.extra_env()?);
    vars.extend(initiator_env(
        S::KIND,
        common.resources,
        common.chunk_cache_size,
        is_embedded_profile(&ctx.spec.resource_profile, common.resource_profile),
    ));

    let mut mounts = service_data_mounts(ctx.spec.use_host_local_time);
    mounts.extend(svc.extra_mounts());

    Ok(Container {
        name: S::KIND.as_str().into(),
        image: Some(svc.image(&ctx.image)),
        image_pull_policy: Some("IfNotPresent".into()),
        args: Some(svc.args()),
        env: Some(vars),
        resources: common.resources.cloned(),
        security_context: Some(security_context(true, SERVICE_CAPABILITIES)),
        volume_mounts: Some(mounts),
        ports: Some(with_grpc(svc.ports()?).iter().map(PortSpec::container_port).collect()),
        ..Default::default()
    })
}

pub fn make_deployment<S: EdgefsService>(svc: &S, ctx: &ClusterContext) -> Result<Deployment> {
    let name = svc.name_any();
    let instance = instance_name(S::KIND, &name);
    let labels = service_labels(S::KIND, &name, &ctx.namespace);
    let common = svc.common();

    let main = service_container(svc, ctx)?;
    let mut containers = svc.extra_containers(ctx, &main);
    containers.insert(0, main);

    let mut volumes = vec![ctx.data_volume()];
    volumes.extend(svc.extra_volumes());

    let mut pod = PodSpec {
        containers,
        volumes: Some(volumes),
        restart_policy: Some("Always".into()),
        ..Default::default()
    };
    ctx.apply_pod_defaults(&mut pod);
    svc.configure_pod(ctx, &mut pod);
    common.placement.apply_to_pod_spec(&mut pod);

    let mut template_meta = ObjectMeta {
        name: Some(instance.clone()),
        labels: Some(labels.clone()),
        ..Default::default()
    };
    apply_annotations(common.annotations, &mut template_meta);

    let mut meta = ObjectMeta {
        name: Some(instance),
        namespace: Some(ctx.namespace.clone()),
        labels: Some(labels.clone()),
        owner_references: ctx.owner_references(),
        ..Default::default()
    };
    apply_annotations(common.annotations, &mut meta);

    Ok(Deployment {
        metadata: meta,
        spec: Some(DeploymentSpec {
            replicas: Some(svc.replicas()),
            selector: LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(template_meta),
                spec: Some(pod),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub fn make_service<S: EdgefsService>(svc: &S, ctx: &ClusterContext) -> Result<Service> {
    let name = svc.name_any();
    let labels = service_labels(S::KIND, &name, &ctx.namespace);
    Ok(Service {
        metadata: ObjectMeta {
            name: Some(instance_name(S::KIND, &name)),
            namespace: Some(ctx.namespace.clone()),
            labels: Some(labels.clone()),
            owner_references: ctx.owner_references(),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(svc.service_type().to_string()),
            selector: Some(labels),
            ports: Some(
                with_grpc(svc.service_ports()?)
                    .iter()
                    .map(PortSpec::service_port)
                    .collect(),
            ),
            external_ips: svc.external_ips()?,
            ..Default::default()
        }),
        ..Default::default()
    })
}
