//! S3 frontend

use super::{
    port_or, service_type_or_default, ssl_mounts, ssl_volumes, CommonSpec, EdgefsService,
    PortSpec,
};
use crate::crd::S3;
use crate::error::Result;
use crate::workload::{env, modified_image, DaemonKind};
use k8s_openapi::api::core::v1::{EnvVar, Volume, VolumeMount};

pub const DEFAULT_PORT: u16 = 9982;
pub const DEFAULT_SECURE_PORT: u16 = 9443;
const DEFAULT_S3_TYPE: &str = "s3";

/// Frontends served by the REST API image
pub(crate) const RESTAPI_IMAGE_POSTFIX: &str = "restapi";

impl S3 {
    fn http_port(&self) -> i32 {
        port_or(self.spec.port, DEFAULT_PORT)
    }

    fn https_port(&self) -> i32 {
        port_or(self.spec.secure_port, DEFAULT_SECURE_PORT)
    }
}

impl EdgefsService for S3 {
    const KIND: DaemonKind = DaemonKind::S3;

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

    fn args(&self) -> Vec<String> {
        let s3_type = if self.spec.s3_type.is_empty() {
            DEFAULT_S3_TYPE
        } else {
            &self.spec.s3_type
        };
        vec![s3_type.to_string()]
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
            env("EFSS3_HTTP_PORT", self.http_port().to_string()),
            env("EFSS3_HTTPS_PORT", self.https_port().to_string()),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::S3Spec;
    use crate::services::tests::cluster_ctx;
    use crate::services::{make_deployment, make_service, SSL_CERT_VOLUME_NAME, SSL_MOUNT_PATH};

    fn s3(spec: S3Spec) -> S3 {
        let mut s3 = S3::new("s3a", spec);
        s3.metadata.namespace = Some("rook-edgefs".into());
        s3
    }

    #[test]
    fn test_s3_defaults() {
        let svc = s3(S3Spec::default());
        let deployment = make_deployment(&svc, &cluster_ctx()).unwrap();
        let pod = deployment.spec.unwrap().template.spec.unwrap();
        let container = &pod.containers[0];

        assert_eq!(container.image.as_deref(), Some("edgefs/edgefs-restapi:1.2.117"));
        assert_eq!(container.args.as_ref().unwrap(), &vec!["s3".to_string()]);
        let vars = container.env.as_ref().unwrap();
        let value = |name: &str| {
            vars.iter()
                .find(|e| e.name == name)
                .and_then(|e| e.value.clone())
        };
        assert_eq!(value("EFSS3_HTTP_PORT").as_deref(), Some("9982"));
        assert_eq!(value("EFSS3_HTTPS_PORT").as_deref(), Some("9443"));
        assert!(pod.volumes.unwrap().iter().all(|v| v.name != SSL_CERT_VOLUME_NAME));

        let service = make_service(&svc, &cluster_ctx()).unwrap().spec.unwrap();
        assert_eq!(service.type_.as_deref(), Some("ClusterIP"));
        assert!(service.ports.unwrap().iter().all(|p| p.node_port.is_none()));
    }

    #[test]
    fn test_s3_ssl_and_node_ports() {
        let svc = s3(S3Spec {
            instances: 3,
            port: 8000,
            service_type: "NodePort".into(),
            external_port: 30080,
            secure_external_port: 30443,
            ssl_certificate_ref: "s3-certs".into(),
            s3_type: "s3s".into(),
            ..Default::default()
        });

        let deployment = make_deployment(&svc, &cluster_ctx()).unwrap();
        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(3));
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.containers[0].args.as_ref().unwrap(), &vec!["s3s".to_string()]);

        let volumes = pod.volumes.unwrap();
        let ssl = volumes.iter().find(|v| v.name == SSL_CERT_VOLUME_NAME).unwrap();
        let secret = ssl.secret.as_ref().unwrap();
        assert_eq!(secret.secret_name.as_deref(), Some("s3-certs"));
        assert_eq!(secret.items.as_ref().unwrap()[1].path, "ssl.crt");
        assert!(pod.containers[0]
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .any(|m| m.mount_path == SSL_MOUNT_PATH));

        let service = make_service(&svc, &cluster_ctx()).unwrap().spec.unwrap();
        assert_eq!(service.type_.as_deref(), Some("NodePort"));
        let ports = service.ports.unwrap();
        assert_eq!(ports[1].port, 8000);
        assert_eq!(ports[1].node_port, Some(30080));
        assert_eq!(ports[2].port, 9443);
        assert_eq!(ports[2].node_port, Some(30443));
    }
}
