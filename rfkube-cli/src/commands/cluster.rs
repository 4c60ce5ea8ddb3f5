//! `rfkube cluster <backend> <action>`

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use std::path::Path;

use rfkube_core::BackendId;

use super::RunArgs;
use crate::adapters::adapter_for;
use crate::orchestrator::{self, print_state};
use crate::ui;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterAction {
    /// Bring the cluster up (idempotent)
    Install,
    /// Tear the cluster down and restore the kubeconfig
    Uninstall,
    /// Report the recorded and live state
    Status,
    /// Deploy the RapidFort runtime into the running cluster
    DeployRapidfort,
    /// Install, verify, deploy, run coverage, uninstall
    Test,
}

/// Manage one backend's cluster
#[derive(Args, Debug)]
pub struct ClusterArgs {
    /// kubeadm, k0s, k3s, k3d, kind, microk8s, minikube or zuul
    pub backend: BackendId,

    #[arg(value_enum)]
    pub action: ClusterAction,

    #[command(flatten)]
    pub run: RunArgs,
}

pub async fn run(args: ClusterArgs, config: Option<&Path>) -> Result<()> {
    let host = super::host_context(config, args.run.timeout).await?;
    let adapter = adapter_for(args.backend);
    let options = args.run.options();
    let id = args.backend;

    match args.action {
        ClusterAction::Install => {
            let state = orchestrator::install_cluster(&host, adapter.as_ref(), &options)
                .await
                .with_context(|| format!("Failed to install {id}"))?;
            print_state(&state);
        }
        ClusterAction::Uninstall => {
            let report = adapter
                .uninstall(&host)
                .await
                .with_context(|| format!("Failed to uninstall {id}"))?;
            for step in report.failures() {
                ui::warning(&format!(
                    "{} failed: {}",
                    step.name,
                    step.error.as_deref().unwrap_or_default()
                ));
            }
            ui::success(&format!("{id} uninstalled"));
        }
        ClusterAction::Status => {
            let state = adapter.status(&host).await?;
            print_state(&state);
        }
        ClusterAction::DeployRapidfort => {
            let outcome = orchestrator::deploy_rapidfort(&host, adapter.as_ref(), &options)
                .await
                .with_context(|| format!("Failed to deploy the runtime on {id}"))?;
            for image in &outcome.mirrored {
                ui::detail(&format!("mirrored {image}"));
            }
        }
        ClusterAction::Test => {
            orchestrator::test_backend(&host, adapter.as_ref(), &options).await?;
            ui::success(&format!("{id} passed"));
        }
    }
    Ok(())
}
