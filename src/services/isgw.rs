//! ISGW frontend
//!
//! An inter-segment gateway sends, receives or both. Receivers publish the
//! local listener port, senders publish the dynamic fetch port when one is
//! configured.

use super::{service_type_or_default, CommonSpec, EdgefsService, PortSpec};
use crate::crd::Isgw;
use crate::error::{Error, Result};
use crate::workload::{env, DaemonKind};
use k8s_openapi::api::core::v1::EnvVar;
use kube::ResourceExt;
use std::net::IpAddr;

pub const DEFAULT_REPLICATION_TYPE: &str = "initial+continuous";
pub const DEFAULT_LOCAL_ADDR: &str = "0.0.0.0:14000";
pub const DEFAULT_DYNAMIC_FETCH_PORT: u16 = 49678;

/// Disables dynamic fetch
const NO_DYNAMIC_FETCH: &str = "-";

/// Split `host:port`, accepting bracketed IPv6 hosts
pub fn split_host_port(addr: &str) -> Result<(String, u16)> {
    let invalid = |reason: &str| Error::AddressParse {
        addr: addr.to_string(),
        reason: reason.to_string(),
    };
    let (host, port) = addr.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let port = port
        .parse::<u16>()
        .map_err(|e| invalid(&e.to_string()))?;
    Ok((host.to_string(), port))
}

fn is_unspecified(host: &str) -> bool {
    host.parse::<IpAddr>()
        .map(|ip| ip.is_unspecified())
        .unwrap_or(false)
}

impl Isgw {
    /// 1 send, 2 receive, 3 both
    pub fn direction_code(&self) -> u8 {
        match self.spec.direction.as_str() {
            "send" => 1,
            "receive" => 2,
            _ => 3,
        }
    }

    fn receives(&self) -> bool {
        self.direction_code() & 2 != 0
    }

    fn sends(&self) -> bool {
        self.direction_code() & 1 != 0
    }

    /// 1 initial, 2 continuous, 3 both
    pub fn replication_code(&self) -> u8 {
        match self.replication_type() {
            "initial" => 1,
            "continuous" => 2,
            _ => 3,
        }
    }

    /// 1 all metadata, 2 versions only, 0 full data
    pub fn metadata_only_code(&self) -> u8 {
        match self.spec.metadata_only.as_str() {
            "all" => 1,
            "versions" => 2,
            _ => 0,
        }
    }

    fn replication_type(&self) -> &str {
        if self.spec.replication_type.is_empty() {
            DEFAULT_REPLICATION_TYPE
        } else {
            &self.spec.replication_type
        }
    }

    fn local_addr(&self) -> &str {
        if self.spec.local_addr.is_empty() {
            DEFAULT_LOCAL_ADDR
        } else {
            &self.spec.local_addr
        }
    }

    fn dynamic_fetch_addr(&self) -> &str {
        if self.spec.dynamic_fetch_addr.is_empty() {
            NO_DYNAMIC_FETCH
        } else {
            &self.spec.dynamic_fetch_addr
        }
    }

    fn dynamic_fetch_port(&self) -> Result<Option<u16>> {
        let addr = self.dynamic_fetch_addr();
        if addr == NO_DYNAMIC_FETCH {
            return Ok(None);
        }
        if !addr.contains(':') {
            return Ok(Some(DEFAULT_DYNAMIC_FETCH_PORT));
        }
        Ok(Some(split_host_port(addr)?.1))
    }

    /// Relay configuration as JSON, empty when none is set
    pub fn config_json(&self) -> Result<String> {
        if self.spec.config.is_empty() {
            return Ok(String::new());
        }
        Ok(serde_json::to_string(&self.spec.config)?)
    }
}

impl EdgefsService for Isgw {
    const KIND: DaemonKind = DaemonKind::Isgw;

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

    fn replicas(&self) -> i32 {
        1
    }

    fn validate(&self) -> Result<()> {
        if self.spec.config.is_empty() && self.spec.remote_url.is_empty() {
            return Err(Error::InvalidService {
                kind: Self::KIND.to_string(),
                name: self.name_any(),
                reason: "remoteURL is required when no relay configuration is set".into(),
            });
        }
        split_host_port(self.local_addr())?;
        self.dynamic_fetch_port()?;
        Ok(())
    }

    fn ports(&self) -> Result<Vec<PortSpec>> {
        let mut ports = Vec::new();
        if self.receives() {
            let (_, lport) = split_host_port(self.local_addr())?;
            ports.push(
                PortSpec::tcp("lport", lport as i32).with_node_port(self.spec.external_port),
            );
        }
        if self.sends() {
            if let Some(dfport) = self.dynamic_fetch_port()? {
                ports.push(PortSpec::tcp("dfport", dfport as i32));
            }
        }
        Ok(ports)
    }

    fn extra_env(&self) -> Result<Vec<EnvVar>> {
        Ok(vec![
            env("EFSISGW_DIRECTION", self.direction_code().to_string()),
            env("EFSISGW_REMOTE_URL", self.spec.remote_url.clone()),
            env("EFSISGW_LOCAL_ADDR", self.local_addr()),
            env("EFSISGW_DYNAMIC_FETCH_ADDR", self.dynamic_fetch_addr()),
            env("EFSISGW_REPLICATION_TYPE", self.replication_code().to_string()),
            env(
                "EFSISGW_USE_ENCRYPTED_TUNNEL",
                if self.spec.use_encrypted_tunnel { "1" } else { "0" },
            ),
            env("EFSISGW_METADATA_ONLY", self.metadata_only_code().to_string()),
            env("EFSISGW_CONFIGURATION", self.config_json()?),
        ])
    }

    fn service_type(&self) -> &str {
        service_type_or_default(&self.spec.service_type)
    }

    /// A receiver bound to a concrete address is reachable on it
    fn external_ips(&self) -> Result<Option<Vec<String>>> {
        if !self.receives() {
            return Ok(None);
        }
        let (host, _) = split_host_port(self.local_addr())?;
        if host.is_empty() || is_unspecified(&host) {
            return Ok(None);
        }
        Ok(Some(vec![host]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{IsgwConfig, IsgwSpec};
    use crate::services::tests::cluster_ctx;
    use crate::services::{make_deployment, make_service, validate_service};
    use assert_matches::assert_matches;

    fn isgw(spec: IsgwSpec) -> Isgw {
        let mut svc = Isgw::new("isgw01", spec);
        svc.metadata.namespace = Some("rook-edgefs".into());
        svc
    }

    fn env_value(svc: &Isgw, name: &str) -> Option<String> {
        svc.extra_env()
            .unwrap()
            .into_iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value)
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("0.0.0.0:14000").unwrap(), ("0.0.0.0".to_string(), 14000));
        assert_eq!(split_host_port("[::]:14000").unwrap(), ("::".to_string(), 14000));
        assert_matches!(split_host_port("10.0.0.1"), Err(Error::AddressParse { .. }));
        assert_matches!(split_host_port("10.0.0.1:http"), Err(Error::AddressParse { .. }));
    }

    #[test]
    fn test_isgw_requires_remote_or_config() {
        let svc = isgw(IsgwSpec::default());
        assert_matches!(validate_service(&svc), Err(Error::InvalidService { .. }));

        let svc = isgw(IsgwSpec {
            config: IsgwConfig {
                server: "seg1".into(),
                clients: vec![],
            },
            ..Default::default()
        });
        assert!(validate_service(&svc).is_ok());
        assert_eq!(env_value(&svc, "EFSISGW_CONFIGURATION").unwrap(), r#"{"server":"seg1"}"#);
    }

    #[test]
    fn test_isgw_relay_config_reaches_container() {
        let svc = isgw(IsgwSpec {
            config: IsgwConfig {
                server: "seg1".into(),
                clients: vec!["seg2".into(), "seg3".into()],
            },
            ..Default::default()
        });
        let deployment = make_deployment(&svc, &cluster_ctx()).unwrap();
        let pod = deployment.spec.unwrap().template.spec.unwrap();
        let configuration = pod.containers[0]
            .env
            .as_ref()
            .unwrap()
            .iter()
            .find(|e| e.name == "EFSISGW_CONFIGURATION")
            .and_then(|e| e.value.clone());
        assert_eq!(
            configuration.as_deref(),
            Some(r#"{"server":"seg1","clients":["seg2","seg3"]}"#)
        );
    }

    #[test]
    fn test_isgw_defaults_both_directions() {
        let svc = isgw(IsgwSpec {
            remote_url: "ccow://10.1.1.1:14000".into(),
            ..Default::default()
        });
        assert_eq!(env_value(&svc, "EFSISGW_DIRECTION").unwrap(), "3");
        assert_eq!(env_value(&svc, "EFSISGW_REPLICATION_TYPE").unwrap(), "3");
        assert_eq!(env_value(&svc, "EFSISGW_LOCAL_ADDR").unwrap(), DEFAULT_LOCAL_ADDR);
        assert_eq!(env_value(&svc, "EFSISGW_DYNAMIC_FETCH_ADDR").unwrap(), "-");
        assert_eq!(env_value(&svc, "EFSISGW_METADATA_ONLY").unwrap(), "0");
        assert_eq!(env_value(&svc, "EFSISGW_CONFIGURATION").unwrap(), "");

        let service = make_service(&svc, &cluster_ctx()).unwrap().spec.unwrap();
        let ports = service.ports.unwrap();
        let names: Vec<_> = ports.iter().filter_map(|p| p.name.clone()).collect();
        assert_eq!(names, vec!["grpc", "lport"]);
        assert_eq!(ports[1].port, 14000);
        assert!(service.external_ips.is_none());
    }

    #[test]
    fn test_isgw_receiver_external_ip() {
        let svc = isgw(IsgwSpec {
            direction: "receive".into(),
            remote_url: "ccow://10.1.1.1:14000".into(),
            local_addr: "10.2.2.2:14001".into(),
            external_port: 31400,
            dynamic_fetch_addr: "0.0.0.0:49678".into(),
            ..Default::default()
        });
        let service = make_service(&svc, &cluster_ctx()).unwrap().spec.unwrap();
        assert_eq!(service.external_ips, Some(vec!["10.2.2.2".to_string()]));
        let ports = service.ports.unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[1].port, 14001);
        assert_eq!(ports[1].node_port, Some(31400));
    }

    #[test]
    fn test_isgw_sender_dynamic_fetch() {
        let svc = isgw(IsgwSpec {
            direction: "send".into(),
            remote_url: "ccow://10.1.1.1:14000".into(),
            dynamic_fetch_addr: "0.0.0.0:49700".into(),
            replication_type: "initial".into(),
            metadata_only: "versions".into(),
            use_encrypted_tunnel: true,
            instances: 4,
            ..Default::default()
        });
        assert_eq!(env_value(&svc, "EFSISGW_REPLICATION_TYPE").unwrap(), "1");
        assert_eq!(env_value(&svc, "EFSISGW_METADATA_ONLY").unwrap(), "2");
        assert_eq!(env_value(&svc, "EFSISGW_USE_ENCRYPTED_TUNNEL").unwrap(), "1");

        let deployment = make_deployment(&svc, &cluster_ctx()).unwrap();
        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        let ports = spec.template.spec.unwrap().containers[0].ports.clone().unwrap();
        let names: Vec<_> = ports.iter().filter_map(|p| p.name.clone()).collect();
        assert_eq!(names, vec!["grpc", "dfport"]);
        assert_eq!(ports[1].container_port, 49700);

        let bare = isgw(IsgwSpec {
            direction: "send".into(),
            remote_url: "ccow://10.1.1.1:14000".into(),
            dynamic_fetch_addr: "10.3.3.3".into(),
            ..Default::default()
        });
        assert_eq!(
            bare.ports().unwrap()[0].port,
            DEFAULT_DYNAMIC_FETCH_PORT as i32
        );
    }
}
