//! kind (Kubernetes in Docker)

use async_trait::async_trait;
use tera::Context;
use tracing::debug;

use rfkube_core::error::{Error, Result};
use rfkube_core::{BackendDescriptor, BackendId, Invocation, RegistrySpec};

use super::containerd::{HOST_CERTS_DIR, hosts_path};
use super::{BackendAdapter, LiveStatus, TeardownStep, stdout_of};
use crate::context::HostContext;
use crate::templates;

pub const CLUSTER_NAME: &str = "rf-kind";
const NETWORK: &str = "kind";

pub struct KindAdapter;

impl KindAdapter {
    fn control_plane_container() -> String {
        format!("{CLUSTER_NAME}-control-plane")
    }

    async fn nodes(host: &HostContext) -> Result<Vec<String>> {
        let out = stdout_of(
            host,
            &Invocation::new("kind", ["get", "nodes", "--name", CLUSTER_NAME]),
        )
        .await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[async_trait]
impl BackendAdapter for KindAdapter {
    fn descriptor(&self) -> &'static BackendDescriptor {
        BackendId::Kind.descriptor()
    }

    async fn probe(&self, host: &HostContext) -> LiveStatus {
        let clusters = match host.run(&Invocation::new("kind", ["get", "clusters"])).await {
            Ok(out) if out.success() => out.stdout,
            _ => return LiveStatus::Absent,
        };
        if !clusters.lines().any(|l| l.trim() == CLUSTER_NAME) {
            return LiveStatus::Absent;
        }
        let running = host
            .run(&Invocation::new(
                "docker",
                [
                    "inspect".to_string(),
                    "-f".to_string(),
                    "{{.State.Running}}".to_string(),
                    Self::control_plane_container(),
                ],
            ))
            .await;
        match running {
            Ok(out) if out.success() && out.stdout.trim() == "true" => LiveStatus::Running,
            _ => LiveStatus::Degraded("control-plane container is not running".into()),
        }
    }

    async fn provision(&self, host: &HostContext, _registry: &RegistrySpec) -> Result<()> {
        let mut ctx = Context::new();
        ctx.insert("cluster_name", CLUSTER_NAME);
        let config = templates::render("kind-config.yaml", &ctx)?;

        let create = Invocation::new(
            "kind",
            ["create", "cluster", "--name", CLUSTER_NAME, "--config", "-", "--wait", "120s"],
        )
        .env("KUBECONFIG", host.kubeconfig.path().to_string_lossy().into_owned())
        .stdin(config);
        host.run_checked(&create).await?;
        Ok(())
    }

    fn teardown_steps(&self, _host: &HostContext) -> Vec<TeardownStep> {
        vec![TeardownStep::new(
            "kind delete cluster",
            Invocation::new("kind", ["delete", "cluster", "--name", CLUSTER_NAME]),
        )]
    }

    async fn fetch_kubeconfig(&self, host: &HostContext) -> Result<String> {
        stdout_of(
            host,
            &Invocation::new("kind", ["get", "kubeconfig", "--name", CLUSTER_NAME]),
        )
        .await
    }

    fn cluster_network(&self) -> Option<&'static str> {
        Some(NETWORK)
    }

    async fn configure_registry_trust(&self, host: &HostContext, registry: &RegistrySpec) -> Result<()> {
        let hosts = templates::hosts_toml(&registry.address)?;
        let target = hosts_path(HOST_CERTS_DIR, &registry.address);
        let dir = target
            .rsplit_once('/')
            .map(|(dir, _)| dir.to_string())
            .ok_or_else(|| Error::phase(format!("malformed hosts.toml path {target}")))?;

        let nodes = Self::nodes(host).await?;
        if nodes.is_empty() {
            return Err(Error::phase(format!("kind cluster {CLUSTER_NAME} has no nodes")));
        }
        for node in &nodes {
            let script = format!("mkdir -p '{dir}' && cat > '{target}'");
            host.run_checked(
                &Invocation::new("docker", ["exec", "-i", node.as_str(), "sh", "-c", script.as_str()])
                    .stdin(hosts.clone()),
            )
            .await?;
        }

        // documents the registry for tooling that follows KEP-1755
        let mut ctx = Context::new();
        ctx.insert("address", &registry.address);
        let configmap = templates::render("local-registry-hosting.yaml", &ctx)?;
        host.run_checked(&host.kubectl(["apply", "-f", "-"]).stdin(configmap))
            .await?;
        Ok(())
    }

    async fn reload_registry_trust(&self, _host: &HostContext) -> Result<()> {
        debug!("kind nodes read hosts.toml on every pull; nothing to restart");
        Ok(())
    }
}
