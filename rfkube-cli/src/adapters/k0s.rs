//! k0s single-node controller

use async_trait::async_trait;
use tera::Context;

use rfkube_core::error::Result;
use rfkube_core::{BackendDescriptor, BackendId, Check, Invocation, RegistrySpec, poll_until};

use super::containerd;
use super::{BackendAdapter, LiveStatus, TeardownStep, stdout_of};
use crate::context::HostContext;
use crate::templates;

const DATA_DIR: &str = "/var/lib/k0s";
/// k0s merges every TOML file in this directory into its containerd config
const CONTAINERD_IMPORT_DIR: &str = "/etc/k0s/containerd.d";
const CERTS_DIR: &str = "/etc/k0s/certs.d";

pub struct K0sAdapter;

async fn controller_answers(host: &HostContext) -> bool {
    host.succeeds(&Invocation::sudo("k0s", ["status"])).await
        && host
            .succeeds(&Invocation::sudo("k0s", ["kubectl", "get", "--raw", "/readyz"]))
            .await
}

#[async_trait]
impl BackendAdapter for K0sAdapter {
    fn descriptor(&self) -> &'static BackendDescriptor {
        BackendId::K0s.descriptor()
    }

    async fn probe(&self, host: &HostContext) -> LiveStatus {
        if controller_answers(host).await {
            LiveStatus::Running
        } else if host.root_path_exists(DATA_DIR).await {
            LiveStatus::Degraded(format!("{DATA_DIR} present but controller not answering"))
        } else {
            LiveStatus::Absent
        }
    }

    async fn provision(&self, host: &HostContext, _registry: &RegistrySpec) -> Result<()> {
        host.run_checked(&Invocation::sudo("k0s", ["install", "controller", "--single"]))
            .await?;
        host.run_checked(&Invocation::sudo("k0s", ["start"])).await?;

        // `k0s start` only starts the service unit
        let spec = host
            .settings
            .timeouts
            .spec("k0s controller", host.settings.timeouts.cluster_ready_secs);
        poll_until(&spec, || async {
            if controller_answers(host).await {
                Check::Ready(())
            } else {
                Check::Pending("k0s status not yet healthy".to_string())
            }
        })
        .await?;
        Ok(())
    }

    fn teardown_steps(&self, _host: &HostContext) -> Vec<TeardownStep> {
        vec![
            TeardownStep::new("k0s stop", Invocation::sudo("k0s", ["stop"])),
            TeardownStep::new("k0s reset", Invocation::sudo("k0s", ["reset"])),
            TeardownStep::new(
                "remove k0s config",
                Invocation::sudo("rm", ["-rf", "/etc/k0s"]),
            ),
        ]
    }

    async fn fetch_kubeconfig(&self, host: &HostContext) -> Result<String> {
        stdout_of(host, &Invocation::sudo("k0s", ["kubeconfig", "admin"])).await
    }

    async fn configure_registry_trust(&self, host: &HostContext, registry: &RegistrySpec) -> Result<()> {
        let mut ctx = Context::new();
        ctx.insert("certs_dir", CERTS_DIR);
        let import = templates::render("k0s-containerd-registry.toml", &ctx)?;
        host.write_root_file(&format!("{CONTAINERD_IMPORT_DIR}/rf-registry.toml"), &import)
            .await?;
        containerd::write_hosts_toml(host, CERTS_DIR, registry).await
    }

    async fn reload_registry_trust(&self, host: &HostContext) -> Result<()> {
        host.run_checked(&Invocation::sudo("systemctl", ["restart", "k0scontroller"]))
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
    async fn test_trust_writes_import_and_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let host = context(dir.path(), runner.clone(), Arc::new(StaticProbe::new(vec![200])));
        let registry = RegistrySpec {
            address: "10.0.0.5:5000".into(),
            mode: RegistryMode::Local,
        };

        K0sAdapter.configure_registry_trust(&host, &registry).await.unwrap();
        assert!(runner.ran("tee", &["/etc/k0s/containerd.d/rf-registry.toml"]));
        assert!(runner.ran("tee", &["/etc/k0s/certs.d/10.0.0.5:5000/hosts.toml"]));
    }

    #[tokio::test]
    async fn test_provision_waits_for_controller() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("k0s", &["status"]).respond_seq(vec![
            CmdOutput::failed(1, "connection refused"),
            CmdOutput::ok("Role: controller"),
        ]);
        let host = context(dir.path(), runner.clone(), Arc::new(StaticProbe::new(vec![200])));
        let registry = RegistrySpec {
            address: "10.0.0.5:5000".into(),
            mode: RegistryMode::Remote,
        };

        K0sAdapter.provision(&host, &registry).await.unwrap();
        assert!(runner.ran("k0s", &["install", "controller", "--single"]));
        assert_eq!(runner.count("k0s", &["status"]), 2);
    }
}
