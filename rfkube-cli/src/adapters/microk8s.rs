//! MicroK8s from the snap store

use async_trait::async_trait;
use std::time::Duration;

use rfkube_core::error::Result;
use rfkube_core::{BackendDescriptor, BackendId, Invocation, RegistrySpec};

use super::containerd;
use super::{BackendAdapter, LiveStatus, TeardownStep, stdout_of};
use crate::context::HostContext;

const CERTS_DIR: &str = "/var/snap/microk8s/current/args/certs.d";

pub struct Microk8sAdapter;

impl Microk8sAdapter {
    fn wait_ready(timeout_secs: u64) -> Invocation {
        Invocation::sudo(
            "microk8s",
            ["status".to_string(), "--wait-ready".to_string(), "--timeout".to_string(), timeout_secs.to_string()],
        )
        .timeout(Duration::from_secs(timeout_secs + 60))
    }
}

#[async_trait]
impl BackendAdapter for Microk8sAdapter {
    fn descriptor(&self) -> &'static BackendDescriptor {
        BackendId::Microk8s.descriptor()
    }

    async fn probe(&self, host: &HostContext) -> LiveStatus {
        if !host
            .succeeds(&Invocation::new("snap", ["list", "microk8s"]))
            .await
        {
            return LiveStatus::Absent;
        }
        if host.succeeds(&Self::wait_ready(5)).await {
            LiveStatus::Running
        } else {
            LiveStatus::Degraded("snap installed but microk8s is not ready".into())
        }
    }

    async fn provision(&self, host: &HostContext, _registry: &RegistrySpec) -> Result<()> {
        host.run_checked(&Invocation::sudo("snap", ["install", "microk8s", "--classic"]))
            .await?;
        host.run_checked(&Self::wait_ready(host.settings.timeouts.cluster_ready_secs))
            .await?;
        host.run_checked(&Invocation::sudo("microk8s", ["enable", "dns"]))
            .await?;
        Ok(())
    }

    fn teardown_steps(&self, _host: &HostContext) -> Vec<TeardownStep> {
        vec![TeardownStep::new(
            "snap remove microk8s",
            Invocation::sudo("snap", ["remove", "microk8s", "--purge"]),
        )]
    }

    async fn fetch_kubeconfig(&self, host: &HostContext) -> Result<String> {
        stdout_of(host, &Invocation::sudo("microk8s", ["config"])).await
    }

    async fn configure_registry_trust(&self, host: &HostContext, registry: &RegistrySpec) -> Result<()> {
        containerd::write_hosts_toml(host, CERTS_DIR, registry).await
    }

    async fn reload_registry_trust(&self, host: &HostContext) -> Result<()> {
        host.run_checked(&Invocation::sudo("snap", ["restart", "microk8s"]))
            .await?;
        host.run_checked(&Self::wait_ready(host.settings.timeouts.cluster_ready_secs))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::context;
    use rfkube_core::testing::{ScriptedRunner, StaticProbe};
    use rfkube_core::{CmdOutput, RegistryMode};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_probe_distinguishes_installed_from_ready() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .on("snap", &["list", "microk8s"])
            .respond(CmdOutput::failed(1, "error: no matching snaps installed"));
        let host = context(dir.path(), runner.clone(), Arc::new(StaticProbe::new(vec![200])));
        assert_eq!(Microk8sAdapter.probe(&host).await, LiveStatus::Absent);

        runner
            .on("snap", &["list", "microk8s"])
            .respond(CmdOutput::ok("microk8s  v1.30.1  6876  1.30/stable  canonical  classic"));
        runner
            .on("microk8s", &["status", "--wait-ready"])
            .respond(CmdOutput::failed(1, "microk8s is not running"));
        assert!(matches!(
            Microk8sAdapter.probe(&host).await,
            LiveStatus::Degraded(_)
        ));
    }

    #[tokio::test]
    async fn test_trust_writes_snap_certs_dir() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let host = context(dir.path(), runner.clone(), Arc::new(StaticProbe::new(vec![200])));
        let registry = RegistrySpec {
            address: "10.0.0.5:5000".into(),
            mode: RegistryMode::Local,
        };

        Microk8sAdapter
            .configure_registry_trust(&host, &registry)
            .await
            .unwrap();
        assert!(runner.ran(
            "tee",
            &["/var/snap/microk8s/current/args/certs.d/10.0.0.5:5000/hosts.toml"]
        ));
    }
}
