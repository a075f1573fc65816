//! S3X frontend
//!
//! Runs the extended S3 API and, unless disabled, an S3 compatibility
//! proxy in a side container of the same pod.

use super::s3::RESTAPI_IMAGE_POSTFIX;
use super::{
    port_or, service_type_or_default, ssl_mounts, ssl_volumes, CommonSpec, EdgefsService,
    PortSpec,
};
use crate::crd::S3x;
use crate::error::Result;
use crate::workload::{env, modified_image, ClusterContext, DaemonKind};
use k8s_openapi::api::core::v1::{Container, EnvVar, Volume, VolumeMount};

pub const DEFAULT_PORT: u16 = 4000;
pub const DEFAULT_SECURE_PORT: u16 = 4443;
pub const S3_PROXY_PORT: i32 = 9982;

const S3_PROXY_CONTAINER: &str = "s3proxy";

impl S3x {
    fn http_port(&self) -> i32 {
        port_or(self.spec.port, DEFAULT_PORT)
    }

    fn https_port(&self) -> i32 {
        port_or(self.spec.secure_port, DEFAULT_SECURE_PORT)
    }

    fn s3_proxy_enabled(&self) -> bool {
        self.spec.s3_proxy != Some(false)
    }
}

impl EdgefsService for S3x {
    const KIND: DaemonKind = DaemonKind::S3x;

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

    fn ports(&self) -> Result<Vec<PortSpec>> {
        Ok(vec![
            PortSpec::tcp("port", self.http_port()).with_node_port(self.spec.external_port),
            PortSpec::tcp("secure-port", self.https_port())
                .with_node_port(self.spec.secure_external_port),
        ])
    }

    fn service_ports(&self) -> Result<Vec<PortSpec>> {
        let mut ports = self.ports()?;
        if self.s3_proxy_enabled() {
            ports.push(PortSpec::tcp("s3-port", S3_PROXY_PORT));
        }
        Ok(ports)
    }

    fn extra_env(&self) -> Result<Vec<EnvVar>> {
        Ok(vec![
            env("EFSS3X_HTTP_PORT", self.http_port().to_string()),
            env("EFSS3X_HTTPS_PORT", self.https_port().to_string()),
        ])
    }

    fn extra_mounts(&self) -> Vec<VolumeMount> {
        ssl_mounts(&self.spec.ssl_certificate_ref)
    }

    fn extra_volumes(&self) -> Vec<Volume> {
        ssl_volumes(&self.spec.ssl_certificate_ref)
    }

    /// Proxy shares mounts, resources and security settings of the main
    /// container but listens only on the S3 port
    fn extra_containers(&self, ctx: &ClusterContext, main: &Container) -> Vec<Container> {
        if !self.s3_proxy_enabled() {
            return Vec::new();
        }
        let mut vars: Vec<EnvVar> = main
            .env
            .iter()
            .flatten()
            .filter(|e| !e.name.starts_with("EFSS3X_"))
            .cloned()
            .collect();
        vars.push(env("EFSS3_HTTP_PORT", S3_PROXY_PORT.to_string()));
        vars.push(env("EFSS3X_URL", format!("http://127.0.0.1:{}", self.http_port())));

        vec![Container {
            name: S3_PROXY_CONTAINER.into(),
            image: Some(modified_image(&ctx.image, RESTAPI_IMAGE_POSTFIX)),
            args: Some(vec!["s3".into()]),
            env: Some(vars),
            ports: Some(vec![PortSpec::tcp("s3-port", S3_PROXY_PORT).container_port()]),
            ..main.clone()
        }]
    }

    fn service_type(&self) -> &str {
        service_type_or_default(&self.spec.service_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::S3xSpec;
    use crate::services::tests::cluster_ctx;
    use crate::services::{make_deployment, make_service};

    fn s3x(s3_proxy: Option<bool>) -> S3x {
        let mut svc = S3x::new(
            "s3x01",
            S3xSpec {
                instances: 1,
                s3_proxy,
                ..Default::default()
            },
        );
        svc.metadata.namespace = Some("rook-edgefs".into());
        svc
    }

    #[test]
    fn test_s3x_with_proxy_sidecar() {
        let svc = s3x(None);
        let deployment = make_deployment(&svc, &cluster_ctx()).unwrap();
        let pod = deployment.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.containers.len(), 2);
        assert_eq!(pod.containers[0].image.as_deref(), Some("edgefs/edgefs:1.2.117"));
        assert_eq!(pod.containers[0].args.as_ref().unwrap(), &vec!["s3x".to_string()]);

        let proxy = &pod.containers[1];
        assert_eq!(proxy.name, S3_PROXY_CONTAINER);
        assert_eq!(proxy.ports.as_ref().unwrap()[0].container_port, S3_PROXY_PORT);
        let vars = proxy.env.as_ref().unwrap();
        assert!(vars.iter().all(|e| e.name != "EFSS3X_HTTP_PORT"));
        assert!(vars.iter().any(|e| e.name == "EFSS3X_URL"));

        let ports = make_service(&svc, &cluster_ctx())
            .unwrap()
            .spec
            .unwrap()
            .ports
            .unwrap();
        let numbers: Vec<_> = ports.iter().map(|p| p.port).collect();
        assert_eq!(numbers, vec![49000, 4000, 4443, 9982]);
    }

    #[test]
    fn test_s3x_proxy_disabled() {
        let svc = s3x(Some(false));
        let deployment = make_deployment(&svc, &cluster_ctx()).unwrap();
        let pod = deployment.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.containers.len(), 1);
        assert_eq!(svc.service_ports().unwrap().len(), 2);
    }
}
