//! Workload Projector
//!
//! Builders for the Kubernetes objects the operator owns: the target
//! stateful set with its headless service and config map, the manager
//! deployment with its services, and the pieces every service frontend
//! shares. Builders are pure; the reconcilers apply their output through
//! [`crate::domain::ClusterApi`].

pub mod initiator;
pub mod mgr;
pub mod target;

pub use initiator::{initiator_env, DaemonKind};
pub use mgr::{mgr_deployment, mgr_services, MGR_APP_NAME};
pub use target::{cluster_config_map, headless_service, target_stateful_set};

use crate::crd::{Annotations, Cluster, ClusterSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, EnvVar, EnvVarSource, HostPathVolumeSource, ObjectFieldSelector,
    PersistentVolumeClaimVolumeSource, PodSpec, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

// =============================================================================
// Names
// =============================================================================

/// Name of the target stateful set and its headless service
pub const TARGET_APP_NAME: &str = "rook-edgefs-target";

/// Config map holding the shared setup document
pub const CLUSTER_CONFIG_MAP: &str = "edgefs-config";

pub const DATA_VOLUME_NAME: &str = "edgefs-datadir";
pub const CONFIG_VOLUME_NAME: &str = "edgefs-configdir";
pub const LOCALTIME_VOLUME_NAME: &str = "host-local-time";

pub const STATE_FOLDER: &str = ".state";
pub const ETC_FOLDER: &str = ".etc";

pub const APP_LABEL: &str = "app";
pub const CLUSTER_LABEL: &str = "rook_cluster";

/// Value of the `<namespace>` node label pinning target pods
pub const CLUSTER_NODE_LABEL_VALUE: &str = "cluster";

/// Log level handed to every daemon
pub const CCOW_LOG_LEVEL: &str = "5";

/// gRPC port of every service frontend
pub const GRPC_PORT: i32 = 49000;

// =============================================================================
// Cluster Context
// =============================================================================

/// Cluster-derived settings shared by the target, manager and service
/// builders
#[derive(Debug, Clone, Default)]
pub struct ClusterContext {
    pub namespace: String,
    pub spec: ClusterSpec,
    pub image: String,
    pub owner_ref: Option<OwnerReference>,
}

impl ClusterContext {
    pub fn from_cluster(cluster: &Cluster, default_image: &str) -> Self {
        Self {
            namespace: cluster.namespace().unwrap_or_default(),
            spec: cluster.spec.clone(),
            image: cluster.spec.image(default_image),
            owner_ref: cluster.controller_owner_ref(&()),
        }
    }

    pub fn host_network(&self) -> bool {
        self.spec.network.is_host()
    }

    pub fn is_embedded(&self) -> bool {
        self.spec.is_embedded()
    }

    pub fn owner_references(&self) -> Option<Vec<OwnerReference>> {
        self.owner_ref.clone().map(|o| vec![o])
    }

    /// `<namespace>: cluster`
    pub fn node_selector(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(
            self.namespace.clone(),
            CLUSTER_NODE_LABEL_VALUE.to_string(),
        )])
    }

    /// Data volume for deployments: the claim in volume mode, the host
    /// path otherwise
    pub fn data_volume(&self) -> Volume {
        if self.spec.uses_data_volume() {
            Volume {
                name: DATA_VOLUME_NAME.into(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: DATA_VOLUME_NAME.into(),
                    ..Default::default()
                }),
                ..Default::default()
            }
        } else {
            host_path_volume(DATA_VOLUME_NAME, self.spec.effective_data_dir_host_path(), None)
        }
    }

    /// Host networking, DNS policy, IPC and node pinning
    pub fn apply_pod_defaults(&self, pod: &mut PodSpec) {
        pod.host_ipc = Some(true);
        pod.host_network = Some(self.host_network());
        if self.host_network() {
            pod.dns_policy = Some("ClusterFirstWithHostNet".into());
        }
        pod.node_selector = Some(self.node_selector());
        pod.service_account_name = Some(self.spec.effective_service_account().to_string());
        if self.spec.use_host_local_time {
            pod.volumes
                .get_or_insert_with(Vec::new)
                .push(host_path_volume(LOCALTIME_VOLUME_NAME, "/etc/localtime", None));
        }
    }

    /// Annotations for a component key merged over the `all` entry
    pub fn annotations_for(&self, key: &str) -> Annotations {
        let mut merged = self
            .spec
            .annotations
            .get(crate::crd::PLACEMENT_ALL)
            .cloned()
            .unwrap_or_default();
        if let Some(specific) = self.spec.annotations.get(key) {
            merged.extend(specific.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        merged
    }
}

// =============================================================================
// Shared Builders
// =============================================================================

pub fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn field_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.into(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Environment common to every daemon container
pub fn daemon_env() -> Vec<EnvVar> {
    vec![
        env("CCOW_LOG_LEVEL", CCOW_LOG_LEVEL),
        field_env("HOST_HOSTNAME", "spec.nodeName"),
        field_env("K8S_NAMESPACE", "metadata.namespace"),
    ]
}

pub fn security_context(privileged: bool, capabilities: &[&str]) -> SecurityContext {
    SecurityContext {
        privileged: Some(privileged),
        run_as_user: Some(0),
        read_only_root_filesystem: Some(false),
        capabilities: if capabilities.is_empty() {
            None
        } else {
            Some(Capabilities {
                add: Some(capabilities.iter().map(|c| c.to_string()).collect()),
                ..Default::default()
            })
        },
        ..Default::default()
    }
}

pub fn host_path_volume(name: &str, path: &str, type_: Option<&str>) -> Volume {
    Volume {
        name: name.into(),
        host_path: Some(HostPathVolumeSource {
            path: path.into(),
            type_: type_.map(str::to_string),
        }),
        ..Default::default()
    }
}

pub fn mount(name: &str, path: &str, sub_path: Option<&str>) -> VolumeMount {
    VolumeMount {
        name: name.into(),
        mount_path: path.into(),
        sub_path: sub_path.map(str::to_string),
        ..Default::default()
    }
}

/// Data volume mounts of a frontend or manager container
pub fn service_data_mounts(use_host_local_time: bool) -> Vec<VolumeMount> {
    let mut mounts = vec![
        mount(DATA_VOLUME_NAME, "/opt/nedge/etc.target", Some(ETC_FOLDER)),
        mount(DATA_VOLUME_NAME, "/opt/nedge/var/run", Some(STATE_FOLDER)),
    ];
    if use_host_local_time {
        mounts.push(VolumeMount {
            read_only: Some(true),
            ..mount(LOCALTIME_VOLUME_NAME, "/etc/localtime", None)
        });
    }
    mounts
}

/// Tag of an image reference, `latest` when there is none
pub fn image_version(image: &str) -> &str {
    match image.rsplit_once(':') {
        Some((_, tag)) if !tag.contains('/') => tag,
        _ => "latest",
    }
}

/// Image of a sibling component: `repo/edgefs:1.2` with `restapi` becomes
/// `repo/edgefs-restapi:1.2`
pub fn modified_image(image: &str, postfix: &str) -> String {
    let (name, tag) = match image.rsplit_once(':') {
        Some((name, tag)) if !tag.contains('/') => (name, Some(tag)),
        _ => (image, None),
    };
    match tag {
        Some(tag) => format!("{}-{}:{}", name, postfix, tag),
        None => format!("{}-{}", name, postfix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::NetworkSpec;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    #[test]
    fn test_image_helpers() {
        assert_eq!(image_version("edgefs/edgefs:1.2.117"), "1.2.117");
        assert_eq!(image_version("edgefs/edgefs"), "latest");
        assert_eq!(image_version("registry:5000/edgefs"), "latest");
        assert_eq!(modified_image("edgefs/edgefs:1.2", "restapi"), "edgefs/edgefs-restapi:1.2");
        assert_eq!(modified_image("edgefs/edgefs", "ui"), "edgefs/edgefs-ui");
        assert_eq!(
            modified_image("registry:5000/edgefs/edgefs:2", "restapi"),
            "registry:5000/edgefs/edgefs-restapi:2"
        );
    }

    #[test]
    fn test_data_volume_modes() {
        let mut ctx = ClusterContext {
            namespace: "rook-edgefs".into(),
            ..Default::default()
        };
        let host = ctx.data_volume();
        assert_eq!(host.host_path.unwrap().path, "/var/lib/edgefs");

        ctx.spec.data_volume_size = Some(Quantity("10Gi".into()));
        let claim = ctx.data_volume();
        assert_eq!(claim.persistent_volume_claim.unwrap().claim_name, DATA_VOLUME_NAME);
    }

    #[test]
    fn test_pod_defaults() {
        let ctx = ClusterContext {
            namespace: "rook-edgefs".into(),
            spec: ClusterSpec {
                network: NetworkSpec {
                    server_if_name: "ens3".into(),
                    ..Default::default()
                },
                use_host_local_time: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut pod = PodSpec::default();
        ctx.apply_pod_defaults(&mut pod);
        assert_eq!(pod.host_network, Some(true));
        assert_eq!(pod.dns_policy.as_deref(), Some("ClusterFirstWithHostNet"));
        assert_eq!(pod.node_selector.unwrap()["rook-edgefs"], "cluster");
        assert_eq!(pod.volumes.unwrap()[0].name, LOCALTIME_VOLUME_NAME);
    }

    #[test]
    fn test_annotations_merge_all() {
        let mut ctx = ClusterContext::default();
        ctx.spec.annotations.insert(
            "all".into(),
            BTreeMap::from([("a".to_string(), "1".to_string()), ("b".to_string(), "1".to_string())]),
        );
        ctx.spec
            .annotations
            .insert("mgr".into(), BTreeMap::from([("b".to_string(), "2".to_string())]));
        let merged = ctx.annotations_for("mgr");
        assert_eq!(merged["a"], "1");
        assert_eq!(merged["b"], "2");
        assert_eq!(ctx.annotations_for("target").len(), 2);
    }
}
