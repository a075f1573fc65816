//! iSCSI frontend

use super::{CommonSpec, EdgefsService, PortSpec};
use crate::crd::{Iscsi, TargetParametersSpec};
use crate::error::Result;
use crate::workload::{env, DaemonKind};
use k8s_openapi::api::core::v1::EnvVar;
use std::collections::BTreeMap;

pub const ISCSI_PORT: i32 = 3260;
pub const DEFAULT_TARGET_NAME: &str = "iqn.2018-11.edgefs.io";

/// Non-zero target tunables as a JSON object keyed by iSCSI parameter name
pub fn target_params_json(params: &TargetParametersSpec) -> Result<String> {
    let values: BTreeMap<&str, u32> = [
        ("MaxRecvDataSegmentLength", params.max_recv_data_segment_length),
        ("DefaultTime2Retain", params.default_time2_retain),
        ("DefaultTime2Wait", params.default_time2_wait),
        ("FirstBurstLength", params.first_burst_length),
        ("MaxBurstLength", params.max_burst_length),
        ("MaxQueueCmd", params.max_queue_cmd),
    ]
    .into_iter()
    .filter(|(_, v)| *v > 0)
    .collect();
    Ok(serde_json::to_string(&values)?)
}

impl EdgefsService for Iscsi {
    const KIND: DaemonKind = DaemonKind::Iscsi;

    fn common(&self) -> CommonSpec<'_> {
        CommonSpec {
            annotations: &self.spec.annotations,
            placement: &self.spec.placement,
            resources: self.spec.resources.as_ref(),
            instances: self.spec.instances,
            resource_profile: &self.spec.resource_profile,
            chunk_cache_size: self.spec.chunk_cache_size.as_ref(),
        }
    }

    fn spec_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.spec)?)
    }

    /// A target IQN can only be served once
    fn replicas(&self) -> i32 {
        1
    }

    fn ports(&self) -> Result<Vec<PortSpec>> {
        Ok(vec![PortSpec::tcp("port", ISCSI_PORT)])
    }

    fn extra_env(&self) -> Result<Vec<EnvVar>> {
        let target_name = if self.spec.target_name.is_empty() {
            DEFAULT_TARGET_NAME
        } else {
            &self.spec.target_name
        };
        Ok(vec![
            env("EFSISCSI_TARGET_NAME", target_name),
            env("EFSISCSI_TARGET_PARAMS", target_params_json(&self.spec.target_params)?),
        ])
    }

    fn service_type(&self) -> &str {
        "NodePort"
    }
}
