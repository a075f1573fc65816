//! Shared CRD building blocks
//!
//! Placement, annotations, network and dashboard settings used by the
//! cluster resource and by every service kind.

use k8s_openapi::api::core::v1::{
    Affinity, NodeAffinity, PodAffinity, PodAntiAffinity, PodSpec, Toleration,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Placement key applied to every component
pub const PLACEMENT_ALL: &str = "all";
/// Placement key for target pods
pub const PLACEMENT_TARGET: &str = "target";
/// Placement key for the manager deployment
pub const PLACEMENT_MGR: &str = "mgr";

// =============================================================================
// Placement
// =============================================================================

/// Scheduling constraints for one component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_affinity: Option<NodeAffinity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_affinity: Option<PodAffinity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_anti_affinity: Option<PodAntiAffinity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,
}

impl Placement {
    /// Overlay `other` on top of `self`; set fields of `other` win
    pub fn merge(&self, other: &Placement) -> Placement {
        let mut ret = self.clone();
        if other.node_affinity.is_some() {
            ret.node_affinity = other.node_affinity.clone();
        }
        if other.pod_affinity.is_some() {
            ret.pod_affinity = other.pod_affinity.clone();
        }
        if other.pod_anti_affinity.is_some() {
            ret.pod_anti_affinity = other.pod_anti_affinity.clone();
        }
        if other.tolerations.is_some() {
            ret.tolerations = other.tolerations.clone();
        }
        ret
    }

    /// Write the placement into a pod spec, keeping affinity terms the
    /// placement does not set
    pub fn apply_to_pod_spec(&self, pod: &mut PodSpec) {
        let affinity = pod.affinity.get_or_insert_with(Affinity::default);
        if let Some(node_affinity) = &self.node_affinity {
            affinity.node_affinity = Some(node_affinity.clone());
        }
        if let Some(pod_affinity) = &self.pod_affinity {
            affinity.pod_affinity = Some(pod_affinity.clone());
        }
        if let Some(anti_affinity) = &self.pod_anti_affinity {
            affinity.pod_anti_affinity = Some(anti_affinity.clone());
        }
        if let Some(tolerations) = &self.tolerations {
            pod.tolerations = Some(tolerations.clone());
        }
    }
}

/// Placement per component key (`all`, `target`, `mgr`)
pub type PlacementSpec = BTreeMap<String, Placement>;

fn placement_for(spec: &PlacementSpec, key: &str) -> Placement {
    let all = spec.get(PLACEMENT_ALL).cloned().unwrap_or_default();
    match spec.get(key) {
        Some(specific) => all.merge(specific),
        None => all,
    }
}

pub fn target_placement(spec: &PlacementSpec) -> Placement {
    placement_for(spec, PLACEMENT_TARGET)
}

pub fn mgr_placement(spec: &PlacementSpec) -> Placement {
    placement_for(spec, PLACEMENT_MGR)
}

// =============================================================================
// Annotations
// =============================================================================

/// Extra annotations for generated objects
pub type Annotations = BTreeMap<String, String>;

/// Annotations per component key
pub type AnnotationsSpec = BTreeMap<String, Annotations>;

pub fn apply_annotations(annotations: &Annotations, meta: &mut ObjectMeta) {
    if annotations.is_empty() {
        return;
    }
    let target = meta.annotations.get_or_insert_with(BTreeMap::new);
    for (k, v) in annotations {
        target.insert(k.clone(), v.clone());
    }
}

// =============================================================================
// Network & Dashboard
// =============================================================================

/// Host networking selection by interface name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Interface used by the storage daemons
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_if_name: String,

    /// Interface used by client brokers
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub broker_if_name: String,
}

/// Interface used when the pods run on the overlay network
pub const DEFAULT_INTERFACE: &str = "eth0";

impl NetworkSpec {
    /// Host networking is requested when either interface is named
    pub fn is_host(&self) -> bool {
        !self.server_if_name.is_empty() || !self.broker_if_name.is_empty()
    }

    /// (server, broker) interface names; a single name serves both
    pub fn interfaces(&self) -> (String, String) {
        if !self.is_host() {
            return (DEFAULT_INTERFACE.into(), DEFAULT_INTERFACE.into());
        }
        let server = if self.server_if_name.is_empty() {
            &self.broker_if_name
        } else {
            &self.server_if_name
        };
        let broker = if self.broker_if_name.is_empty() {
            &self.server_if_name
        } else {
            &self.broker_if_name
        };
        (server.clone(), broker.clone())
    }
}

/// Management UI exposure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSpec {
    /// IP address published as the UI service external IP
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub local_addr: String,
}

/// Memory profile of the daemons
pub const PROFILE_EMBEDDED: &str = "embedded";
pub const PROFILE_PERFORMANCE: &str = "performance";

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::WeightedPodAffinityTerm;

    fn toleration(key: &str) -> Toleration {
        Toleration {
            key: Some(key.into()),
            operator: Some("Exists".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_placement_merge_prefers_specific() {
        let mut spec = PlacementSpec::new();
        spec.insert(
            PLACEMENT_ALL.into(),
            Placement {
                tolerations: Some(vec![toleration("all")]),
                ..Default::default()
            },
        );
        spec.insert(
            PLACEMENT_TARGET.into(),
            Placement {
                tolerations: Some(vec![toleration("storage")]),
                ..Default::default()
            },
        );

        let target = target_placement(&spec);
        assert_eq!(target.tolerations.unwrap()[0].key.as_deref(), Some("storage"));

        let mgr = mgr_placement(&spec);
        assert_eq!(mgr.tolerations.unwrap()[0].key.as_deref(), Some("all"));
    }

    #[test]
    fn test_apply_keeps_existing_anti_affinity() {
        let mut pod = PodSpec {
            affinity: Some(Affinity {
                pod_anti_affinity: Some(PodAntiAffinity {
                    preferred_during_scheduling_ignored_during_execution: Some(vec![
                        WeightedPodAffinityTerm {
                            weight: 100,
                            ..Default::default()
                        },
                    ]),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let placement = Placement {
            tolerations: Some(vec![toleration("edge")]),
            ..Default::default()
        };
        placement.apply_to_pod_spec(&mut pod);
        assert!(pod.affinity.unwrap().pod_anti_affinity.is_some());
        assert_eq!(pod.tolerations.unwrap().len(), 1);
    }

    #[test]
    fn test_network_interfaces() {
        let overlay = NetworkSpec::default();
        assert!(!overlay.is_host());
        assert_eq!(overlay.interfaces(), ("eth0".into(), "eth0".into()));

        let broker_only = NetworkSpec {
            broker_if_name: "ens4".into(),
            ..Default::default()
        };
        assert!(broker_only.is_host());
        assert_eq!(broker_only.interfaces(), ("ens4".into(), "ens4".into()));

        let both = NetworkSpec {
            server_if_name: "ens3".into(),
            broker_if_name: "ens4".into(),
        };
        assert_eq!(both.interfaces(), ("ens3".into(), "ens4".into()));
    }

    #[test]
    fn test_apply_annotations() {
        let mut meta = ObjectMeta::default();
        let mut ann = Annotations::new();
        ann.insert("team".into(), "storage".into());
        apply_annotations(&ann, &mut meta);
        assert_eq!(meta.annotations.unwrap().get("team").map(String::as_str), Some("storage"));
    }
}
