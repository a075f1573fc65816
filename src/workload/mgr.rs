//! Manager workload
//!
//! Single replica deployment running the management REST API, the gRPC
//! manager and the web UI, exposed through three services.

use super::{
    daemon_env, env, image_version, modified_image, mount, security_context, service_data_mounts,
    ClusterContext, APP_LABEL, CLUSTER_LABEL, LOCALTIME_VOLUME_NAME,
};
use crate::crd::{apply_annotations, mgr_placement, PLACEMENT_MGR};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PodSpec, PodTemplateSpec, Probe, Service, ServicePort, ServiceSpec,
    TCPSocketAction,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;
use std::net::IpAddr;

pub const MGR_APP_NAME: &str = "rook-edgefs-mgr";
pub const RESTAPI_SERVICE_NAME: &str = "rook-edgefs-restapi";
pub const UI_SERVICE_NAME: &str = "rook-edgefs-ui";

pub const MGR_PORT: i32 = 6789;
pub const METRICS_PORT: i32 = 8881;
pub const MGMT_PORT: i32 = 8080;
pub const MGMT_SECURE_PORT: i32 = 4443;
pub const UI_PORT: i32 = 3000;
pub const UI_SECURE_PORT: i32 = 3443;

const MGR_CAPABILITIES: &[&str] = &["SYS_NICE", "SYS_RESOURCE", "IPC_LOCK"];

pub fn mgr_labels(namespace: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL.to_string(), MGR_APP_NAME.to_string()),
        (CLUSTER_LABEL.to_string(), namespace.to_string()),
    ])
}

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.into()),
        container_port: port,
        protocol: Some("TCP".into()),
        ..Default::default()
    }
}

fn service_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.into()),
        port,
        target_port: Some(IntOrString::Int(port)),
        protocol: Some("TCP".into()),
        ..Default::default()
    }
}

// =============================================================================
// Containers
// =============================================================================

fn restapi_container(ctx: &ClusterContext, privileged: bool) -> Container {
    let mut vars = daemon_env();
    vars.push(env("DEBUG", "alert,error,info"));
    Container {
        name: "restapi".into(),
        image: Some(modified_image(&ctx.image, "restapi")),
        args: Some(vec!["mgmt".into()]),
        env: Some(vars),
        security_context: Some(security_context(privileged, MGR_CAPABILITIES)),
        volume_mounts: Some(service_data_mounts(ctx.spec.use_host_local_time)),
        ports: Some(vec![
            container_port("http-metrics", METRICS_PORT),
            container_port("http-mgmt", MGMT_PORT),
            container_port("https-mgmt", MGMT_SECURE_PORT),
        ]),
        ..Default::default()
    }
}

fn grpc_container(ctx: &ClusterContext, privileged: bool) -> Container {
    Container {
        name: "grpc".into(),
        image: Some(ctx.image.clone()),
        args: Some(vec!["mgmt".into()]),
        env: Some(daemon_env()),
        security_context: Some(security_context(privileged, MGR_CAPABILITIES)),
        volume_mounts: Some(service_data_mounts(ctx.spec.use_host_local_time)),
        ports: Some(vec![container_port("mgr", MGR_PORT)]),
        liveness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(MGR_PORT),
                ..Default::default()
            }),
            initial_delay_seconds: Some(10),
            period_seconds: Some(30),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn ui_container(ctx: &ClusterContext) -> Container {
    let image = format!("edgefs/edgefs-ui:{}", image_version(&ctx.image));
    Container {
        name: "ui".into(),
        image: Some(image),
        env: Some(vec![env(
            "API_ENDPOINT",
            format!("http://0.0.0.0:{}", MGMT_PORT),
        )]),
        ports: Some(vec![
            container_port("http-ui", UI_PORT),
            container_port("https-ui", UI_SECURE_PORT),
        ]),
        volume_mounts: ctx
            .spec
            .use_host_local_time
            .then(|| vec![mount(LOCALTIME_VOLUME_NAME, "/etc/localtime", None)]),
        ..Default::default()
    }
}

// =============================================================================
// Deployment & Services
// =============================================================================

/// Manager deployment; `privileged` follows the target daemons
pub fn mgr_deployment(ctx: &ClusterContext, privileged: bool) -> Deployment {
    let labels = mgr_labels(&ctx.namespace);
    let mut pod_labels = labels.clone();
    pod_labels.insert("instance".into(), MGR_APP_NAME.into());

    let mut template_meta = ObjectMeta {
        labels: Some(pod_labels),
        annotations: Some(BTreeMap::from([
            ("prometheus.io/scrape".to_string(), "true".to_string()),
            ("prometheus.io/port".to_string(), METRICS_PORT.to_string()),
        ])),
        ..Default::default()
    };
    apply_annotations(&ctx.annotations_for(PLACEMENT_MGR), &mut template_meta);

    let mut pod = PodSpec {
        containers: vec![
            restapi_container(ctx, privileged),
            grpc_container(ctx, privileged),
            ui_container(ctx),
        ],
        volumes: Some(vec![ctx.data_volume()]),
        restart_policy: Some("Always".into()),
        ..Default::default()
    };
    ctx.apply_pod_defaults(&mut pod);
    mgr_placement(&ctx.spec.placement).apply_to_pod_spec(&mut pod);

    Deployment {
        metadata: ObjectMeta {
            name: Some(MGR_APP_NAME.into()),
            namespace: Some(ctx.namespace.clone()),
            labels: Some(labels.clone()),
            owner_references: ctx.owner_references(),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
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
    }
}

fn mgr_service(
    ctx: &ClusterContext,
    name: &str,
    type_: &str,
    ports: Vec<ServicePort>,
) -> Service {
    let labels = mgr_labels(&ctx.namespace);
    Service {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(ctx.namespace.clone()),
            labels: Some(labels.clone()),
            owner_references: ctx.owner_references(),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(type_.into()),
            selector: Some(labels),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Dashboard address usable as an external IP
fn dashboard_external_ip(local_addr: &str) -> Option<String> {
    match local_addr.parse::<IpAddr>() {
        Ok(ip) if !ip.is_unspecified() => Some(ip.to_string()),
        _ => None,
    }
}

/// gRPC manager, REST API and UI services
pub fn mgr_services(ctx: &ClusterContext) -> Vec<Service> {
    let grpc = mgr_service(ctx, MGR_APP_NAME, "ClusterIP", vec![service_port("mgr", MGR_PORT)]);
    let restapi = mgr_service(
        ctx,
        RESTAPI_SERVICE_NAME,
        "ClusterIP",
        vec![
            service_port("http-metrics", METRICS_PORT),
            service_port("http-mgmt", MGMT_PORT),
            service_port("https-mgmt", MGMT_SECURE_PORT),
        ],
    );
    let mut ui = mgr_service(
        ctx,
        UI_SERVICE_NAME,
        "NodePort",
        vec![
            service_port("http-ui", UI_PORT),
            service_port("https-ui", UI_SECURE_PORT),
        ],
    );
    if let (Some(ip), Some(spec)) = (
        dashboard_external_ip(&ctx.spec.dashboard.local_addr),
        ui.spec.as_mut(),
    ) {
        spec.external_ips = Some(vec![ip]);
    }
    vec![grpc, restapi, ui]
}
