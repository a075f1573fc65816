//! Target workload
//!
//! One stateful set pod per storage node. Each pod runs the membership
//! (`corosync`), audit and storage daemon containers, plus one extra
//! daemon container per slave device set. Peers find each other through
//! the headless service; the shared setup document is mounted from the
//! cluster config map.

use super::initiator::{initiator_env, DaemonKind};
use super::{
    daemon_env, env, field_env, host_path_volume, mount, security_context, ClusterContext,
    APP_LABEL, CCOW_LOG_LEVEL, CLUSTER_CONFIG_MAP, CLUSTER_LABEL, CONFIG_VOLUME_NAME, DATA_VOLUME_NAME,
    ETC_FOLDER, STATE_FOLDER, TARGET_APP_NAME,
};
use crate::crd::{apply_annotations, target_placement, PLACEMENT_TARGET};
use crate::deployment::setup::{RTLFS_AUTODETECT_PATH, SETUP_CONFIG_KEY};
use crate::deployment::{ClusterDeploymentConfig, DeploymentType, DevicesResurrectOptions};
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy};
use k8s_openapi::api::core::v1::{
    Affinity, ConfigMap, ConfigMapVolumeSource, Container, EnvVar, KeyToPath,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PodAffinityTerm, PodAntiAffinity,
    PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
    VolumeResourceRequirements, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta,
};
use std::collections::BTreeMap;

/// Membership port published by the headless service
pub const COROSYNC_PORT: i32 = 5405;

const DEVICES_VOLUME: &str = "devices";
const SYS_VOLUME: &str = "sys";
const UDEV_VOLUME: &str = "udev";

const TERMINATION_GRACE_SECONDS: i64 = 60;

pub fn target_labels(namespace: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL.to_string(), TARGET_APP_NAME.to_string()),
        (CLUSTER_LABEL.to_string(), namespace.to_string()),
    ])
}

// =============================================================================
// Config Map & Headless Service
// =============================================================================

/// Config map carrying the setup document under `nesetup`
pub fn cluster_config_map(ctx: &ClusterContext, document: String) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(CLUSTER_CONFIG_MAP.into()),
            namespace: Some(ctx.namespace.clone()),
            owner_references: ctx.owner_references(),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(SETUP_CONFIG_KEY.to_string(), document)])),
        ..Default::default()
    }
}

/// Headless service giving every target a stable peer DNS name
pub fn headless_service(ctx: &ClusterContext) -> Service {
    let labels = target_labels(&ctx.namespace);
    Service {
        metadata: ObjectMeta {
            name: Some(TARGET_APP_NAME.into()),
            namespace: Some(ctx.namespace.clone()),
            labels: Some(labels.clone()),
            annotations: Some(BTreeMap::from([(
                "service.alpha.kubernetes.io/tolerate-unready-endpoints".to_string(),
                "true".to_string(),
            )])),
            owner_references: ctx.owner_references(),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".into()),
            publish_not_ready_addresses: Some(true),
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some("totem".into()),
                port: COROSYNC_PORT,
                protocol: Some("UDP".into()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

// =============================================================================
// Stateful Set
// =============================================================================

/// Slave containers per pod: the widest node decides for all
fn slave_containers_count(
    config: &ClusterDeploymentConfig,
    resurrect: &DevicesResurrectOptions,
) -> usize {
    let planned = config
        .dev_config
        .values()
        .filter(|c| !c.is_gateway_node)
        .map(|c| c.rtrd_slaves.len())
        .max()
        .unwrap_or(0);
    if resurrect.need_to_resurrect {
        planned.max(resurrect.slave_containers)
    } else {
        planned
    }
}

fn config_mount() -> VolumeMount {
    mount(CONFIG_VOLUME_NAME, "/opt/nedge/etc/config", None)
}

fn data_mount(path: &str, sub_path: String) -> VolumeMount {
    VolumeMount {
        name: DATA_VOLUME_NAME.into(),
        mount_path: path.into(),
        sub_path: Some(sub_path),
        ..Default::default()
    }
}

struct TargetPod<'a> {
    ctx: &'a ClusterContext,
    config: &'a ClusterDeploymentConfig,
    resurrect: &'a DevicesResurrectOptions,
    deployment_type: DeploymentType,
}

impl<'a> TargetPod<'a> {
    fn privileged(&self) -> bool {
        self.config.need_privileges
    }

    fn corosync_container(&self) -> Container {
        Container {
            name: "corosync".into(),
            image: Some(self.ctx.image.clone()),
            args: Some(vec!["corosync".into()]),
            env: Some(vec![field_env("HOST_HOSTNAME", "spec.nodeName")]),
            security_context: Some(security_context(self.privileged(), &["SYS_NICE", "IPC_LOCK"])),
            volume_mounts: Some(vec![
                data_mount("/opt/nedge/etc", ETC_FOLDER.into()),
                data_mount("/opt/nedge/var/run", STATE_FOLDER.into()),
                config_mount(),
                mount(DATA_VOLUME_NAME, RTLFS_AUTODETECT_PATH, None),
            ]),
            ..Default::default()
        }
    }

    fn auditd_container(&self) -> Container {
        Container {
            name: "auditd".into(),
            image: Some(self.ctx.image.clone()),
            args: Some(vec!["auditd".into()]),
            env: Some(vec![
                env("CCOW_LOG_LEVEL", CCOW_LOG_LEVEL),
                field_env("HOST_HOSTNAME", "spec.nodeName"),
            ]),
            security_context: Some(security_context(self.privileged(), &[])),
            volume_mounts: Some(vec![
                data_mount("/opt/nedge/etc", ETC_FOLDER.into()),
                data_mount("/opt/nedge/var/run", STATE_FOLDER.into()),
            ]),
            ..Default::default()
        }
    }

    /// Device, host and storage mounts shared by the primary and slave
    /// daemon containers
    fn storage_mounts(&self) -> Vec<VolumeMount> {
        let mut mounts = vec![
            mount(DEVICES_VOLUME, "/dev", None),
            mount(SYS_VOLUME, "/sys", None),
            mount(UDEV_VOLUME, "/run/udev", None),
        ];
        match self.deployment_type {
            DeploymentType::AutoRtlfs => {
                mounts.push(mount(DATA_VOLUME_NAME, RTLFS_AUTODETECT_PATH, None));
            }
            DeploymentType::Rtlfs => {
                for dir in &self.config.directories {
                    mounts.push(mount(&dir.name, &dir.path, None));
                }
            }
            DeploymentType::Rtkvs | DeploymentType::Rtrd => {}
        }
        mounts
    }

    fn target_env(&self) -> Vec<EnvVar> {
        let mut vars = daemon_env();
        vars.extend(initiator_env(
            DaemonKind::Target,
            self.ctx.spec.resources.as_ref(),
            self.ctx.spec.chunk_cache_size.as_ref(),
            self.ctx.is_embedded(),
        ));
        vars
    }

    fn daemon_args(&self) -> Vec<String> {
        if self.resurrect.need_to_wait {
            vec!["wait".into()]
        } else {
            vec!["daemon".into()]
        }
    }

    fn daemon_container(&self) -> Container {
        let mut mounts = self.storage_mounts();
        mounts.push(data_mount("/opt/nedge/etc", ETC_FOLDER.into()));
        mounts.push(data_mount("/opt/nedge/var/run", STATE_FOLDER.into()));
        mounts.push(config_mount());

        Container {
            name: "daemon".into(),
            image: Some(self.ctx.image.clone()),
            args: Some(self.daemon_args()),
            env: Some(self.target_env()),
            resources: self.ctx.spec.resources.clone(),
            security_context: Some(security_context(
                self.privileged(),
                &["SYS_NICE", "SYS_RESOURCE"],
            )),
            volume_mounts: Some(mounts),
            ..Default::default()
        }
    }

    /// Extra daemon for slave device set `index` (1-based); it shares the
    /// membership and audit state of the primary
    fn slave_container(&self, index: usize) -> Container {
        let mut mounts = self.storage_mounts();
        mounts.push(data_mount("/opt/nedge/etc", format!("{}-{}", ETC_FOLDER, index)));
        mounts.push(data_mount("/opt/nedge/var/run", format!("{}-{}", STATE_FOLDER, index)));
        mounts.push(data_mount(
            "/opt/nedge/var/run/corosync",
            format!("{}/corosync", STATE_FOLDER),
        ));
        mounts.push(data_mount(
            "/opt/nedge/var/run/auditd",
            format!("{}/auditd", STATE_FOLDER),
        ));
        mounts.push(config_mount());

        let mut vars = self.target_env();
        vars.push(env("DAEMON_INDEX", index.to_string()));

        Container {
            name: format!("daemon-{}", index),
            image: Some(self.ctx.image.clone()),
            args: Some(self.daemon_args()),
            env: Some(vars),
            resources: self.ctx.spec.resources.clone(),
            security_context: Some(security_context(
                self.privileged(),
                &["SYS_NICE", "SYS_RESOURCE"],
            )),
            volume_mounts: Some(mounts),
            ..Default::default()
        }
    }

    /// Wipes device metadata before the daemons start
    fn zap_container(&self) -> Container {
        let mut mounts = self.storage_mounts();
        mounts.push(config_mount());
        Container {
            name: "daemon-zap".into(),
            image: Some(self.ctx.image.clone()),
            args: Some(vec!["toolbox".into(), "nezap --do-as-i-say".into()]),
            env: Some(daemon_env()),
            security_context: Some(security_context(self.privileged(), &[])),
            volume_mounts: Some(mounts),
            ..Default::default()
        }
    }

    fn volumes(&self) -> Vec<Volume> {
        let mut volumes = vec![
            host_path_volume(DEVICES_VOLUME, "/dev", None),
            host_path_volume(SYS_VOLUME, "/sys", None),
            host_path_volume(UDEV_VOLUME, "/run/udev", None),
            Volume {
                name: CONFIG_VOLUME_NAME.into(),
                config_map: Some(ConfigMapVolumeSource {
                    name: Some(CLUSTER_CONFIG_MAP.into()),
                    items: Some(vec![KeyToPath {
                        key: SETUP_CONFIG_KEY.into(),
                        path: format!("{}.json", SETUP_CONFIG_KEY),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ];
        if !self.ctx.spec.uses_data_volume() {
            volumes.push(host_path_volume(
                DATA_VOLUME_NAME,
                self.ctx.spec.effective_data_dir_host_path(),
                Some("DirectoryOrCreate"),
            ));
        }
        if self.deployment_type == DeploymentType::Rtlfs {
            for dir in &self.config.directories {
                volumes.push(host_path_volume(&dir.name, &dir.path, Some("DirectoryOrCreate")));
            }
        }
        volumes
    }

    fn anti_affinity() -> Affinity {
        Affinity {
            pod_anti_affinity: Some(PodAntiAffinity {
                preferred_during_scheduling_ignored_during_execution: Some(vec![
                    WeightedPodAffinityTerm {
                        weight: 100,
                        pod_affinity_term: PodAffinityTerm {
                            label_selector: Some(LabelSelector {
                                match_expressions: Some(vec![LabelSelectorRequirement {
                                    key: APP_LABEL.into(),
                                    operator: "In".into(),
                                    values: Some(vec![TARGET_APP_NAME.into()]),
                                }]),
                                ..Default::default()
                            }),
                            topology_key: "kubernetes.io/hostname".into(),
                            ..Default::default()
                        },
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod_spec(&self) -> PodSpec {
        let mut containers = vec![
            self.corosync_container(),
            self.auditd_container(),
            self.daemon_container(),
        ];
        for index in 1..=slave_containers_count(self.config, self.resurrect) {
            containers.push(self.slave_container(index));
        }

        let mut pod = PodSpec {
            containers,
            init_containers: self
                .resurrect
                .need_to_zap
                .then(|| vec![self.zap_container()]),
            volumes: Some(self.volumes()),
            affinity: Some(Self::anti_affinity()),
            termination_grace_period_seconds: Some(TERMINATION_GRACE_SECONDS),
            dns_policy: Some("ClusterFirst".into()),
            ..Default::default()
        };
        self.ctx.apply_pod_defaults(&mut pod);
        target_placement(&self.ctx.spec.placement).apply_to_pod_spec(&mut pod);
        pod
    }
}

fn data_volume_claim(size: Quantity) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(DATA_VOLUME_NAME.into()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".into()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), size)])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Stateful set with one replica per planned node
pub fn target_stateful_set(
    ctx: &ClusterContext,
    config: &ClusterDeploymentConfig,
    resurrect: &DevicesResurrectOptions,
) -> StatefulSet {
    let labels = target_labels(&ctx.namespace);
    let pod = TargetPod {
        ctx,
        config,
        resurrect,
        deployment_type: config.deployment_type.unwrap_or(DeploymentType::AutoRtlfs),
    };

    let mut template_meta = ObjectMeta {
        labels: Some(labels.clone()),
        ..Default::default()
    };
    apply_annotations(&ctx.annotations_for(PLACEMENT_TARGET), &mut template_meta);

    let claims = ctx
        .spec
        .data_volume_size
        .clone()
        .filter(|_| ctx.spec.uses_data_volume())
        .map(|size| vec![data_volume_claim(size)]);

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(TARGET_APP_NAME.into()),
            namespace: Some(ctx.namespace.clone()),
            labels: Some(labels.clone()),
            owner_references: ctx.owner_references(),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            service_name: TARGET_APP_NAME.into(),
            replicas: Some(config.dev_config.len() as i32),
            pod_management_policy: Some("Parallel".into()),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".into()),
                ..Default::default()
            }),
            selector: LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(template_meta),
                spec: Some(pod.pod_spec()),
            },
            volume_claim_templates: claims,
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{NetworkSpec, Placement};
    use crate::deployment::{DevicesConfig, RTDevice, RTDevices, RtlfsDevice};

    fn ctx() -> ClusterContext {
        ClusterContext {
            namespace: "rook-edgefs".into(),
            image: "edgefs/edgefs:1.2.117".into(),
            ..Default::default()
        }
    }

    fn rtrd_config(slaves: usize) -> ClusterDeploymentConfig {
        let mut config = ClusterDeploymentConfig::new(DeploymentType::Rtrd, true);
        let devices = RTDevices {
            devices: vec![RTDevice {
                name: "ata-disk1".into(),
                device: "/dev/sdb".into(),
                ..Default::default()
            }],
        };
        config.dev_config.insert(
            "node-a".into(),
            DevicesConfig {
                rtrd: devices.clone(),
                rtrd_slaves: vec![devices; slaves],
                ..Default::default()
            },
        );
        config.dev_config.insert("node-b".into(), DevicesConfig::gateway(0));
        config
    }

    fn pod_of(set: &StatefulSet) -> &PodSpec {
        set.spec.as_ref().unwrap().template.spec.as_ref().unwrap()
    }

    fn container<'a>(pod: &'a PodSpec, name: &str) -> &'a Container {
        pod.containers.iter().find(|c| c.name == name).unwrap()
    }

    #[test]
    fn test_headless_service() {
        let svc = headless_service(&ctx());
        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(spec.publish_not_ready_addresses, Some(true));
        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, COROSYNC_PORT);
        assert_eq!(port.protocol.as_deref(), Some("UDP"));
        assert_eq!(spec.selector.unwrap()["app"], TARGET_APP_NAME);
    }

    #[test]
    fn test_config_map_holds_document() {
        let cm = cluster_config_map(&ctx(), "{}".into());
        assert_eq!(cm.metadata.name.as_deref(), Some(CLUSTER_CONFIG_MAP));
        assert_eq!(cm.data.unwrap()[SETUP_CONFIG_KEY], "{}");
    }

    #[test]
    fn test_stateful_set_shape() {
        let set = target_stateful_set(&ctx(), &rtrd_config(0), &DevicesResurrectOptions::default());
        let spec = set.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(2));
        assert_eq!(Some(spec.service_name.as_str()), Some(TARGET_APP_NAME));
        assert_eq!(spec.pod_management_policy.as_deref(), Some("Parallel"));
        assert!(spec.volume_claim_templates.is_none());

        let pod = pod_of(&set);
        let names: Vec<_> = pod.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["corosync", "auditd", "daemon"]);
        assert!(pod.init_containers.is_none());
        assert_eq!(pod.termination_grace_period_seconds, Some(60));
        assert_eq!(pod.dns_policy.as_deref(), Some("ClusterFirst"));
        assert_eq!(pod.host_network, Some(false));
        assert_eq!(pod.node_selector.as_ref().unwrap()["rook-edgefs"], "cluster");

        let daemon = container(pod, "daemon");
        assert_eq!(daemon.args.as_ref().unwrap(), &vec!["daemon".to_string()]);
        assert_eq!(daemon.security_context.as_ref().unwrap().privileged, Some(true));

        let data = pod
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .find(|v| v.name == DATA_VOLUME_NAME)
            .unwrap();
        let host_path = data.host_path.as_ref().unwrap();
        assert_eq!(host_path.path, "/var/lib/edgefs");
        assert_eq!(host_path.type_.as_deref(), Some("DirectoryOrCreate"));
    }

    #[test]
    fn test_slave_containers_and_zap() {
        let resurrect = DevicesResurrectOptions::parse("restorezapwait:2");
        let set = target_stateful_set(&ctx(), &rtrd_config(1), &resurrect);
        let pod = pod_of(&set);

        let names: Vec<_> = pod.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["corosync", "auditd", "daemon", "daemon-1", "daemon-2"]);

        let zap = &pod.init_containers.as_ref().unwrap()[0];
        assert_eq!(zap.name, "daemon-zap");
        assert_eq!(
            zap.args.as_ref().unwrap(),
            &vec!["toolbox".to_string(), "nezap --do-as-i-say".to_string()]
        );

        let slave = container(pod, "daemon-2");
        assert_eq!(slave.args.as_ref().unwrap(), &vec!["wait".to_string()]);
        let sub_paths: Vec<_> = slave
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .filter_map(|m| m.sub_path.as_deref())
            .collect();
        assert!(sub_paths.contains(&".etc-2"));
        assert!(sub_paths.contains(&".state-2"));
        assert!(sub_paths.contains(&".state/corosync"));
        let index = slave
            .env
            .as_ref()
            .unwrap()
            .iter()
            .find(|e| e.name == "DAEMON_INDEX")
            .unwrap();
        assert_eq!(index.value.as_deref(), Some("2"));
    }

    #[test]
    fn test_data_volume_claim_mode() {
        let mut ctx = ctx();
        ctx.spec.data_volume_size = Some(Quantity("20Gi".into()));
        let set = target_stateful_set(&ctx, &rtrd_config(0), &DevicesResurrectOptions::default());
        let claims = set.spec.as_ref().unwrap().volume_claim_templates.as_ref().unwrap();
        assert_eq!(claims[0].metadata.name.as_deref(), Some(DATA_VOLUME_NAME));

        let pod = pod_of(&set);
        assert!(pod
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .all(|v| v.name != DATA_VOLUME_NAME));
    }

    #[test]
    fn test_rtlfs_directories_and_host_network() {
        let mut ctx = ctx();
        ctx.spec.network = NetworkSpec {
            server_if_name: "ens3".into(),
            ..Default::default()
        };
        ctx.spec.placement.insert(
            "target".into(),
            Placement {
                tolerations: Some(vec![Default::default()]),
                ..Default::default()
            },
        );
        let mut config = ClusterDeploymentConfig::new(DeploymentType::Rtlfs, false);
        config.directories = vec![RtlfsDevice {
            name: "disk1".into(),
            path: "/mnt/disk1".into(),
            ..Default::default()
        }];
        config.dev_config.insert("node-a".into(), DevicesConfig::default());

        let set = target_stateful_set(&ctx, &config, &DevicesResurrectOptions::default());
        let pod = pod_of(&set);
        assert_eq!(pod.host_network, Some(true));
        assert_eq!(pod.dns_policy.as_deref(), Some("ClusterFirstWithHostNet"));
        assert_eq!(pod.tolerations.as_ref().unwrap().len(), 1);

        let daemon = container(pod, "daemon");
        assert!(daemon
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .any(|m| m.name == "disk1" && m.mount_path == "/mnt/disk1"));
        assert!(pod.volumes.as_ref().unwrap().iter().any(|v| v.name == "disk1"));
    }
}
