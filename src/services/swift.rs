//! SWIFT frontend

use super::s3::RESTAPI_IMAGE_POSTFIX;
use super::{
    port_or, service_type_or_default, ssl_mounts, ssl_volumes, CommonSpec, EdgefsService,
    PortSpec,
};
use crate::crd::Swift;
use crate::error::Result;
use crate::workload::{env, modified_image, DaemonKind};
use k8s_openapi::api::core::v1::{EnvVar, Volume, VolumeMount};

pub const DEFAULT_PORT: u16 = 9981;
pub const DEFAULT_SECURE_PORT: u16 = 443;

impl Swift {
    fn http_port(&self) -> i32 {
        port_or(self.spec.port, DEFAULT_PORT)
    }

    fn https_port(&self) -> i32 {
        port_or(self.spec.secure_port, DEFAULT_SECURE_PORT)
    }
}

impl EdgefsService for Swift {
    const KIND: DaemonKind = DaemonKind::Swift;

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

    fn image(&self, cluster_image: &str) -> String {
        modified_image(cluster_image, RESTAPI_IMAGE_POSTFIX)
    }

    fn ports(&self) -> Result<Vec<PortSpec>> {
        Ok(vec![
            PortSpec::tcp("port", self.http_port()).with_node_port(self.spec.external_port),
            PortSpec::tcp("secure-port", self.https_port())
                .with_node_port(self.spec.secure_external_port),
        ])
    }

    fn extra_env(&self) -> Result<Vec<EnvVar>> {
        Ok(vec![
            env("DEBUG", "alert,error,info"),
            env("EFSSWIFT_HTTP_PORT", self.http_port().to_string()),
            env("EFSSWIFT_HTTPS_PORT", self.https_port().to_string()),
        ])
    }

    fn extra_mounts(&self) -> Vec<VolumeMount> {
        ssl_mounts(&self.spec.ssl_certificate_ref)
    }

    fn extra_volumes(&self) -> Vec<Volume> {
        ssl_volumes(&self.spec.ssl_certificate_ref)
    }

    fn service_type(&self) -> &str {
        service_type_or_default(&self.spec.service_type)
    }
}
