//! k3s-in-docker via k3d

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

use rfkube_core::error::{Error, Result};
use rfkube_core::{BackendDescriptor, BackendId, Invocation, RegistrySpec};

use super::k3s::registries_yaml;
use super::{BackendAdapter, LiveStatus, TeardownStep, stdout_of};
use crate::context::HostContext;

pub const CLUSTER_NAME: &str = "rf-k3d";
const NETWORK: &str = "k3d-rf-k3d";
const SERVER_CONTAINER: &str = "k3d-rf-k3d-server-0";

pub struct K3dAdapter;

/// One entry of `k3d cluster list -o json`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterEntry {
    name: String,
    #[serde(default)]
    servers_count: u32,
    #[serde(default)]
    servers_running: u32,
}

fn live_status_from_list(json: &str) -> LiveStatus {
    let clusters: Vec<ClusterEntry> = match serde_json::from_str(json) {
        Ok(clusters) => clusters,
        Err(e) => {
            debug!(error = %e, "unparseable k3d cluster list");
            return LiveStatus::Absent;
        }
    };
    match clusters.iter().find(|c| c.name == CLUSTER_NAME) {
        None => LiveStatus::Absent,
        Some(c) if c.servers_running > 0 && c.servers_running == c.servers_count => {
            LiveStatus::Running
        }
        Some(c) => LiveStatus::Degraded(format!(
            "{}/{} server containers running",
            c.servers_running, c.servers_count
        )),
    }
}

/// Host-side copy of the registries file handed to k3d
fn registry_config_path(host: &HostContext) -> PathBuf {
    host.store.dir().join("k3d-registries.yaml")
}

fn write_registry_config(host: &HostContext, registry: &RegistrySpec) -> Result<PathBuf> {
    let path = registry_config_path(host);
    let dir = host.store.dir();
    std::fs::create_dir_all(dir).map_err(|source| Error::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    std::fs::write(&path, registries_yaml(&registry.address)?).map_err(|source| Error::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

#[async_trait]
impl BackendAdapter for K3dAdapter {
    fn descriptor(&self) -> &'static BackendDescriptor {
        BackendId::K3d.descriptor()
    }

    async fn probe(&self, host: &HostContext) -> LiveStatus {
        match host
            .run(&Invocation::new("k3d", ["cluster", "list", "-o", "json"]))
            .await
        {
            Ok(out) if out.success() => live_status_from_list(&out.stdout),
            _ => LiveStatus::Absent,
        }
    }

    async fn provision(&self, host: &HostContext, registry: &RegistrySpec) -> Result<()> {
        let config = write_registry_config(host, registry)?
            .to_string_lossy()
            .into_owned();
        host.run_checked(&Invocation::new(
            "k3d",
            [
                "cluster",
                "create",
                CLUSTER_NAME,
                "--registry-config",
                config.as_str(),
                "--kubeconfig-update-default=false",
                "--wait",
            ],
        ))
        .await?;
        Ok(())
    }

    fn teardown_steps(&self, host: &HostContext) -> Vec<TeardownStep> {
        vec![
            TeardownStep::new(
                "k3d cluster delete",
                Invocation::new("k3d", ["cluster", "delete", CLUSTER_NAME]),
            ),
            TeardownStep::new(
                "remove registries file",
                Invocation::new(
                    "rm",
                    ["-f".to_string(), registry_config_path(host).to_string_lossy().into_owned()],
                ),
            ),
        ]
    }

    async fn fetch_kubeconfig(&self, host: &HostContext) -> Result<String> {
        stdout_of(host, &Invocation::new("k3d", ["kubeconfig", "get", CLUSTER_NAME])).await
    }

    fn cluster_network(&self) -> Option<&'static str> {
        Some(NETWORK)
    }

    async fn configure_registry_trust(&self, host: &HostContext, registry: &RegistrySpec) -> Result<()> {
        // the file baked in at create time may name a different address
        let config = write_registry_config(host, registry)?;
        host.run_checked(&Invocation::new(
            "docker",
            [
                "cp".to_string(),
                config.to_string_lossy().into_owned(),
                format!("{SERVER_CONTAINER}:/etc/rancher/k3s/registries.yaml"),
            ],
        ))
        .await?;
        Ok(())
    }

    async fn reload_registry_trust(&self, host: &HostContext) -> Result<()> {
        host.run_checked(&Invocation::new("docker", ["restart", SERVER_CONTAINER]))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_status_from_cluster_list() {
        assert_eq!(live_status_from_list("[]"), LiveStatus::Absent);
        assert_eq!(
            live_status_from_list(r#"[{"name":"rf-k3d","serversCount":1,"serversRunning":1}]"#),
            LiveStatus::Running
        );
        assert!(matches!(
            live_status_from_list(r#"[{"name":"rf-k3d","serversCount":1,"serversRunning":0}]"#),
            LiveStatus::Degraded(_)
        ));
        assert_eq!(
            live_status_from_list(r#"[{"name":"other","serversCount":1,"serversRunning":1}]"#),
            LiveStatus::Absent
        );
    }
}
