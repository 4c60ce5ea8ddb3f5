//! k3s via the upstream install script

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;

use rfkube_core::error::{Error, Result};
use rfkube_core::{BackendDescriptor, BackendId, Invocation, RegistrySpec};

use super::{BackendAdapter, LiveStatus, TeardownStep, stdout_of};
use crate::context::HostContext;

const INSTALL_SCRIPT_URL: &str = "https://get.k3s.io";
const REGISTRIES_PATH: &str = "/etc/rancher/k3s/registries.yaml";
const KUBECONFIG_PATH: &str = "/etc/rancher/k3s/k3s.yaml";
const UNINSTALL_SCRIPT: &str = "/usr/local/bin/k3s-uninstall.sh";

pub struct K3sAdapter;

/// k3s `registries.yaml`
#[derive(Debug, Serialize)]
struct Registries {
    mirrors: BTreeMap<String, Mirror>,
    configs: BTreeMap<String, RegistryConfig>,
}

#[derive(Debug, Serialize)]
struct Mirror {
    endpoint: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RegistryConfig {
    tls: Tls,
}

#[derive(Debug, Serialize)]
struct Tls {
    insecure_skip_verify: bool,
}

/// Mirror + TLS entry trusting `address` over HTTP; also read by k3d nodes
pub(super) fn registries_yaml(address: &str) -> Result<String> {
    let registries = Registries {
        mirrors: BTreeMap::from([(
            address.to_string(),
            Mirror {
                endpoint: vec![format!("http://{address}")],
            },
        )]),
        configs: BTreeMap::from([(
            address.to_string(),
            RegistryConfig {
                tls: Tls {
                    insecure_skip_verify: true,
                },
            },
        )]),
    };
    serde_yaml::to_string(&registries).map_err(|source| Error::Yaml {
        what: "registries.yaml".to_string(),
        source,
    })
}

#[async_trait]
impl BackendAdapter for K3sAdapter {
    fn descriptor(&self) -> &'static BackendDescriptor {
        BackendId::K3s.descriptor()
    }

    async fn probe(&self, host: &HostContext) -> LiveStatus {
        let active = host
            .succeeds(&Invocation::new("systemctl", ["is-active", "--quiet", "k3s"]))
            .await;
        if active
            && host
                .succeeds(&Invocation::sudo("k3s", ["kubectl", "get", "--raw", "/readyz"]))
                .await
        {
            return LiveStatus::Running;
        }
        if active || host.root_path_exists(UNINSTALL_SCRIPT).await {
            return LiveStatus::Degraded("k3s installed but API server unreachable".into());
        }
        LiveStatus::Absent
    }

    async fn provision(&self, host: &HostContext, registry: &RegistrySpec) -> Result<()> {
        // k3s reads registries.yaml only at startup, so it must exist first
        self.configure_registry_trust(host, registry).await?;
        let install = format!("curl -sfL {INSTALL_SCRIPT_URL} | sh -s - --write-kubeconfig-mode 644");
        host.run_checked(&Invocation::sudo("sh", ["-c", install.as_str()]))
            .await?;
        Ok(())
    }

    fn teardown_steps(&self, _host: &HostContext) -> Vec<TeardownStep> {
        vec![
            TeardownStep::new("k3s-uninstall.sh", Invocation::sudo(UNINSTALL_SCRIPT, Vec::<String>::new())),
            TeardownStep::new(
                "remove registries.yaml",
                Invocation::sudo("rm", ["-f", REGISTRIES_PATH]),
            ),
        ]
    }

    async fn fetch_kubeconfig(&self, host: &HostContext) -> Result<String> {
        stdout_of(host, &Invocation::sudo("cat", [KUBECONFIG_PATH])).await
    }

    async fn configure_registry_trust(&self, host: &HostContext, registry: &RegistrySpec) -> Result<()> {
        host.write_root_file(REGISTRIES_PATH, &registries_yaml(&registry.address)?)
            .await
    }

    async fn reload_registry_trust(&self, host: &HostContext) -> Result<()> {
        host.run_checked(&Invocation::sudo("systemctl", ["restart", "k3s"]))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registries_yaml_shape() {
        let yaml = registries_yaml("10.0.0.5:5000").unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(
            value["mirrors"]["10.0.0.5:5000"]["endpoint"][0].as_str(),
            Some("http://10.0.0.5:5000")
        );
        assert_eq!(
            value["configs"]["10.0.0.5:5000"]["tls"]["insecure_skip_verify"].as_bool(),
            Some(true)
        );
    }
}
