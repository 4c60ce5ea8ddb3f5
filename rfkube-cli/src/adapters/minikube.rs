//! minikube with the docker driver
//!
//! Registry trust is a start flag, so a changed registry address needs a
//! fresh cluster rather than a reload.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use rfkube_core::error::Result;
use rfkube_core::{BackendDescriptor, BackendId, Invocation, RegistrySpec};

use super::{BackendAdapter, LiveStatus, TeardownStep};
use crate::context::HostContext;

pub const PROFILE: &str = "rf-minikube";

pub struct MinikubeAdapter;

/// `minikube status -o json` for a single-node profile
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ProfileStatus {
    host: String,
    kubelet: String,
    #[serde(rename = "APIServer")]
    api_server: String,
}

fn live_status_from_json(json: &str) -> LiveStatus {
    match serde_json::from_str::<ProfileStatus>(json) {
        Ok(s) if [&s.host, &s.kubelet, &s.api_server].iter().all(|v| *v == "Running") => {
            LiveStatus::Running
        }
        Ok(s) => LiveStatus::Degraded(format!(
            "host {}, kubelet {}, apiserver {}",
            s.host, s.kubelet, s.api_server
        )),
        // unknown profiles print an error instead of JSON
        Err(_) => LiveStatus::Absent,
    }
}

#[async_trait]
impl BackendAdapter for MinikubeAdapter {
    fn descriptor(&self) -> &'static BackendDescriptor {
        BackendId::Minikube.descriptor()
    }

    async fn probe(&self, host: &HostContext) -> LiveStatus {
        // non-zero exit for stopped profiles, JSON is still printed
        match host
            .run(&Invocation::new("minikube", ["status", "-p", PROFILE, "-o", "json"]))
            .await
        {
            Ok(out) => live_status_from_json(&out.stdout),
            Err(e) => {
                debug!(error = %e, "minikube not runnable");
                LiveStatus::Absent
            }
        }
    }

    async fn provision(&self, host: &HostContext, registry: &RegistrySpec) -> Result<()> {
        let start = Invocation::new(
            "minikube",
            ["start", "-p", PROFILE, "--driver=docker", "--wait=all"],
        )
        .arg(format!("--insecure-registry={}", registry.address))
        .env("KUBECONFIG", host.kubeconfig.path().to_string_lossy().into_owned());
        host.run_checked(&start).await?;
        Ok(())
    }

    fn teardown_steps(&self, _host: &HostContext) -> Vec<TeardownStep> {
        vec![TeardownStep::new(
            "minikube delete",
            Invocation::new("minikube", ["delete", "-p", PROFILE]),
        )]
    }

    async fn fetch_kubeconfig(&self, host: &HostContext) -> Result<String> {
        // minikube merged its context into the canonical kubeconfig on start
        let view = host.kubectl([
            "config",
            "view",
            "--raw",
            "--flatten",
            "--minify",
            "--context",
            PROFILE,
        ]);
        Ok(host.run_checked(&view).await?.stdout)
    }

    fn cluster_network(&self) -> Option<&'static str> {
        Some(PROFILE)
    }

    async fn configure_registry_trust(&self, host: &HostContext, registry: &RegistrySpec) -> Result<()> {
        let recorded = host
            .store
            .load(BackendId::Minikube)?
            .and_then(|s| s.registry_address);
        if recorded.as_deref().is_some_and(|addr| addr != registry.address) {
            warn!(
                started_with = recorded.as_deref().unwrap_or_default(),
                requested = %registry.address,
                "minikube trusts the registry given at start; reinstall to change it"
            );
        }
        Ok(())
    }

    async fn reload_registry_trust(&self, _host: &HostContext) -> Result<()> {
        Ok(())
    }
}
