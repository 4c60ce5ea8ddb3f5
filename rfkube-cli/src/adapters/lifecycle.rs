//! Uniform lifecycle operations
//!
//! `install`, `uninstall`, `status` and `deploy_runtime` are written once
//! against the [`BackendAdapter`] hooks. Install is idempotent: it compares
//! the live probe with the state record and either returns, adopts the
//! running cluster, or cleans up leftovers before provisioning.

use tracing::{debug, info, warn};

use rfkube_core::error::{Error, Result};
use rfkube_core::{ClusterPhase, ClusterState, DeploymentPlan, RegistrySpec};

use super::{BackendAdapter, LiveStatus};
use crate::context::HostContext;
use crate::kube;
use crate::runtime::{self, RuntimeOutcome};
use crate::ui;

/// Result of one best-effort teardown step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub name: &'static str,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UninstallReport {
    pub steps: Vec<StepResult>,
}

impl UninstallReport {
    /// Steps that failed; uninstall itself still succeeds
    pub fn failures(&self) -> impl Iterator<Item = &StepResult> {
        self.steps.iter().filter(|s| s.error.is_some())
    }
}

pub async fn install<A: BackendAdapter + ?Sized>(
    adapter: &A,
    host: &HostContext,
    registry: &RegistrySpec,
) -> Result<ClusterState> {
    let id = adapter.id();
    let record = host.store.load(id)?;
    let live = adapter.probe(host).await;
    debug!(backend = %id, ?live, recorded = ?record.as_ref().map(|s| s.phase), "install requested");

    match (live, record) {
        (LiveStatus::Running, Some(state)) if state.is_running() => {
            ui::info(&format!("{id} cluster is already running"));
            Ok(state)
        }
        (LiveStatus::Running, Some(stale)) if is_interrupted(&stale) => {
            ui::warning(&format!(
                "{id} answers but was left {}; cleaning up first",
                stale.phase
            ));
            force_cleanup(adapter, host, Some(&stale)).await?;
            provision(adapter, host, registry).await
        }
        (LiveStatus::Running, record) => adopt(adapter, host, registry, record).await,
        (LiveStatus::Degraded(reason), record) => {
            ui::warning(&format!("{id} has leftovers ({reason}); cleaning up first"));
            force_cleanup(adapter, host, record.as_ref()).await?;
            provision(adapter, host, registry).await
        }
        (LiveStatus::Absent, Some(stale)) => {
            ui::warning(&format!(
                "{id} was recorded as {} but nothing is running; cleaning up first",
                stale.phase
            ));
            force_cleanup(adapter, host, Some(&stale)).await?;
            provision(adapter, host, registry).await
        }
        (LiveStatus::Absent, None) => provision(adapter, host, registry).await,
    }
}

/// A previous run stopped part way through install, a failure or uninstall
fn is_interrupted(state: &ClusterState) -> bool {
    matches!(
        state.phase,
        ClusterPhase::Installing | ClusterPhase::Degraded | ClusterPhase::Uninstalling
    )
}

/// Take over a cluster that answers and has no record of its own
async fn adopt<A: BackendAdapter + ?Sized>(
    adapter: &A,
    host: &HostContext,
    registry: &RegistrySpec,
    record: Option<ClusterState>,
) -> Result<ClusterState> {
    let id = adapter.id();
    ui::info(&format!("adopting running {id} cluster"));

    let mut state = match record {
        Some(state) => state,
        None => {
            let checkout = host.kubeconfig.acquire()?;
            let mut state = ClusterState::new(id, host.kubeconfig.path().to_path_buf());
            state.had_prior_kubeconfig = checkout.had_prior;
            state.kubeconfig_backup = checkout.backup;
            state
        }
    };
    state.registry_address = Some(registry.address.clone());

    let outcome = async {
        let kubeconfig = adapter.fetch_kubeconfig(host).await?;
        host.kubeconfig.install(&kubeconfig)?;
        kube::wait_nodes_ready(host, host.settings.timeouts.cluster_ready_secs).await
    }
    .await;
    settle(host, &mut state, outcome)?;
    Ok(state)
}

async fn provision<A: BackendAdapter + ?Sized>(
    adapter: &A,
    host: &HostContext,
    registry: &RegistrySpec,
) -> Result<ClusterState> {
    let id = adapter.id();
    ui::header(&format!("Installing {id}"));

    let checkout = host.kubeconfig.acquire()?;
    let mut state = ClusterState::new(id, host.kubeconfig.path().to_path_buf());
    state.had_prior_kubeconfig = checkout.had_prior;
    state.kubeconfig_backup = checkout.backup;
    state.registry_address = Some(registry.address.clone());
    state.transition(ClusterPhase::Installing);
    host.store.save(&state)?;

    let outcome = async {
        adapter.provision(host, registry).await?;
        let kubeconfig = adapter.fetch_kubeconfig(host).await?;
        host.kubeconfig.install(&kubeconfig)?;
        kube::wait_nodes_ready(host, host.settings.timeouts.cluster_ready_secs).await
    }
    .await;
    settle(host, &mut state, outcome)?;
    ui::success(&format!("{id} cluster is running"));
    Ok(state)
}

/// Record Running on success or Degraded on failure
fn settle(host: &HostContext, state: &mut ClusterState, outcome: Result<usize>) -> Result<()> {
    match outcome {
        Ok(nodes) => {
            state.transition(ClusterPhase::Running);
            host.store.save(state)?;
            info!(backend = %state.backend, nodes, "cluster running");
            Ok(())
        }
        Err(e) => {
            state.degrade(e.to_string());
            if let Err(save_err) = host.store.save(state) {
                warn!(error = %save_err, "could not record degraded state");
            }
            Err(e)
        }
    }
}

/// Tear down leftovers of a previous attempt and forget its record
async fn force_cleanup<A: BackendAdapter + ?Sized>(
    adapter: &A,
    host: &HostContext,
    record: Option<&ClusterState>,
) -> Result<()> {
    run_teardown(adapter, host).await;
    if let Some(state) = record {
        host.kubeconfig.release(state.had_prior_kubeconfig)?;
    }
    host.store.clear(adapter.id())
}

async fn run_teardown<A: BackendAdapter + ?Sized>(adapter: &A, host: &HostContext) -> UninstallReport {
    let mut report = UninstallReport::default();
    for step in adapter.teardown_steps(host) {
        let error = match host.run_checked(&step.invocation).await {
            Ok(_) => None,
            Err(e) => {
                warn!(backend = %adapter.id(), step = step.name, error = %e, "teardown step failed");
                Some(e.to_string())
            }
        };
        report.steps.push(StepResult {
            name: step.name,
            error,
        });
    }
    report
}

pub async fn uninstall<A: BackendAdapter + ?Sized>(
    adapter: &A,
    host: &HostContext,
) -> Result<UninstallReport> {
    let id = adapter.id();
    ui::header(&format!("Uninstalling {id}"));

    let record = host.store.load(id)?;
    if let Some(mut state) = record.clone() {
        state.transition(ClusterPhase::Uninstalling);
        if let Err(e) = host.store.save(&state) {
            warn!(error = %e, "could not record uninstalling state");
        }
    }

    let report = run_teardown(adapter, host).await;
    for failed in report.failures() {
        ui::warning(&format!(
            "{}: {}",
            failed.name,
            failed.error.as_deref().unwrap_or_default()
        ));
    }

    // local state always converges, whatever the teardown steps did
    match &record {
        Some(state) => host.kubeconfig.release(state.had_prior_kubeconfig)?,
        None if host.kubeconfig.backup_path().exists() => host.kubeconfig.release(true)?,
        None => debug!(backend = %id, "no record and no kubeconfig backup"),
    }
    host.store.clear(id)?;

    ui::success(&format!("{id} uninstalled"));
    Ok(report)
}

/// Read-only view combining the live probe with the record
pub async fn status<A: BackendAdapter + ?Sized>(adapter: &A, host: &HostContext) -> Result<ClusterState> {
    let id = adapter.id();
    let record = host.store.load(id)?;
    let live = adapter.probe(host).await;

    let mut state = record
        .clone()
        .unwrap_or_else(|| ClusterState::new(id, host.kubeconfig.path().to_path_buf()));
    match live {
        LiveStatus::Running => state.transition(ClusterPhase::Running),
        LiveStatus::Degraded(reason) => state.degrade(reason),
        LiveStatus::Absent => match record {
            Some(recorded) if recorded.phase != ClusterPhase::Absent => state.degrade(format!(
                "recorded as {} but no cluster found on the host",
                recorded.phase
            )),
            _ => state.transition(ClusterPhase::Absent),
        },
    }
    Ok(state)
}

pub async fn deploy_runtime<A: BackendAdapter + ?Sized>(
    adapter: &A,
    host: &HostContext,
    plan: &DeploymentPlan,
) -> Result<RuntimeOutcome> {
    let state = status(adapter, host).await?;
    if !state.is_running() {
        return Err(Error::NotRunning {
            backend: adapter.id().to_string(),
            phase: state.phase.to_string(),
        });
    }
    runtime::deploy(host, plan).await
}
