//! SMB frontend
//!
//! Optionally joins an Active Directory domain; the domain controller
//! then also serves as the pod's DNS.

use super::{CommonSpec, EdgefsService, PortSpec};
use crate::crd::Smb;
use crate::error::Result;
use crate::workload::{env, ClusterContext, DaemonKind};
use k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, PodDNSConfig, PodSpec, SecretKeySelector};

fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: Some(secret.into()),
                key: key.into(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

impl EdgefsService for Smb {
    const KIND: DaemonKind = DaemonKind::Smb;

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
            PortSpec::tcp("netbios-ns", 137),
            PortSpec::udp("netbios-ns-udp", 137),
            PortSpec::tcp("netbios-dgm", 138),
            PortSpec::udp("netbios-dgm-udp", 138),
            PortSpec::tcp("netbios-ssn", 139),
            PortSpec::tcp("microsoft-ds", 445),
        ])
    }

    fn extra_env(&self) -> Result<Vec<EnvVar>> {
        let mut vars = Vec::new();
        let ads = &self.spec.ads;
        if !ads.is_empty() {
            let workgroup = ads.domain_name.split('.').next().unwrap_or_default();
            vars.push(env("EFSSMB_DOMAIN_NAME", ads.domain_name.clone()));
            vars.push(env("EFSSMB_WORKGROUP", workgroup));
            vars.push(env("EFSSMB_DC1", ads.dc_name.clone()));
            vars.push(env("EFSSMB_NETBIOS_NAME", ads.server_name.clone()));
            vars.push(secret_env("EFSSMB_AD_USERNAME", &ads.user_secret, "username"));
            vars.push(secret_env("EFSSMB_AD_PASSWORD", &ads.user_secret, "password"));
        }
        if self.spec.relaxed_dir_updates {
            vars.push(env("EFSSMB_RELAXED_DIR_UPDATES", "1"));
        }
        Ok(vars)
    }

    fn configure_pod(&self, ctx: &ClusterContext, pod: &mut PodSpec) {
        let ads = &self.spec.ads;
        if ads.is_empty() || ctx.host_network() {
            return;
        }
        pod.dns_policy = Some("None".into());
        pod.dns_config = Some(PodDNSConfig {
            nameservers: Some(ads.nameservers.split(',').map(str::to_string).collect()),
            searches: Some(vec![ads.domain_name.to_lowercase()]),
            ..Default::default()
        });
    }
}
