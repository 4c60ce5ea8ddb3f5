//! Lifecycle orchestration
//!
//! [`test_backend`] drives one backend through every phase in order and
//! stops at the first fatal error, leaving the cluster as it is for
//! inspection. [`test_all`] runs every backend strictly one after another and
//! collects the outcomes into a [`TestRunSummary`].

use anyhow::Result;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use rfkube_core::settings::expand_path;
use rfkube_core::{
    BackendDescriptor, BackendId, BackendResult, ClusterPhase, ClusterState, DeploymentPlan, Error,
    Invocation, PlanRequest, RegistryInputs, RegistrySpec, RuntimeCredentials, TestRunSummary,
};

use crate::adapters::{AdapterSet, BackendAdapter, UninstallReport};
use crate::context::HostContext;
use crate::reconciler::{self, ReconcileReport};
use crate::runtime::RuntimeOutcome;
use crate::{bootstrap, kube, ui};

/// Flags shared by `cluster <backend> test` and `test-all`
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub registry_flag: Option<String>,
    pub local_registry: bool,
    pub image_tag: Option<String>,
    pub skip_runtime: bool,
    pub skip_coverage: bool,
    pub keep_cluster: bool,
}

impl RunOptions {
    pub fn registry_inputs(&self, host: &HostContext) -> RegistryInputs {
        RegistryInputs {
            env_address: host.env.rf_local_registry.clone(),
            flag_address: self.registry_flag.clone(),
            detected_ip: host.host.advertise_ip,
            local_flag: self.local_registry,
            env_use_local: host.env.rf_use_local_registry.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Preflight,
    Install,
    PodsReady,
    Registry,
    Runtime,
    Coverage,
    Status,
    Uninstall,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Preflight => "preflight",
            Phase::Install => "install",
            Phase::PodsReady => "pods-ready",
            Phase::Registry => "registry",
            Phase::Runtime => "runtime",
            Phase::Coverage => "coverage",
            Phase::Status => "status",
            Phase::Uninstall => "uninstall",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The first fatal error of a backend's sequence
#[derive(Debug)]
pub struct PhaseFailure {
    pub phase: Phase,
    pub error: anyhow::Error,
}

impl fmt::Display for PhaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} phase failed: {:#}", self.phase, self.error)
    }
}

impl std::error::Error for PhaseFailure {}

trait InPhase<T> {
    fn in_phase(self, phase: Phase) -> Result<T, PhaseFailure>;
}

impl<T, E: Into<anyhow::Error>> InPhase<T> for std::result::Result<T, E> {
    fn in_phase(self, phase: Phase) -> Result<T, PhaseFailure> {
        self.map_err(|e| PhaseFailure {
            phase,
            error: e.into(),
        })
    }
}

/// Everything resolved before the host is touched
#[derive(Debug, Clone)]
pub struct Preflight {
    pub registry: RegistrySpec,
    pub plan: Option<DeploymentPlan>,
}

/// Registry address, prerequisites and (optionally) the deployment plan
pub async fn preflight(
    host: &HostContext,
    adapter: &dyn BackendAdapter,
    options: &RunOptions,
    with_runtime: bool,
) -> Result<Preflight> {
    let id = adapter.id();
    let registry = RegistrySpec::resolve(&options.registry_inputs(host), adapter.descriptor())?;
    info!(backend = %id, %registry, "registry resolved");

    bootstrap::ensure_prerequisites(host, id).await?;

    let plan = if with_runtime {
        Some(build_plan(host, adapter.descriptor(), &registry, options)?)
    } else {
        None
    };
    Ok(Preflight { registry, plan })
}

/// Load credentials and build the runtime deployment plan
pub fn build_plan(
    host: &HostContext,
    descriptor: &BackendDescriptor,
    registry: &RegistrySpec,
    options: &RunOptions,
) -> Result<DeploymentPlan> {
    let paths = &host.settings.paths;
    let credentials = RuntimeCredentials::load(&paths.credentials())?;
    let secret_manifest = paths.registry_secret();
    let plan = DeploymentPlan::build(&PlanRequest {
        registry,
        credentials: &credentials,
        backend: descriptor,
        image_tag: options.image_tag.as_deref(),
        runtime: &host.settings.runtime,
        secret_manifest: &secret_manifest,
    })?;
    Ok(plan)
}

/// `cluster <backend> install`
pub async fn install_cluster(
    host: &HostContext,
    adapter: &dyn BackendAdapter,
    options: &RunOptions,
) -> Result<ClusterState> {
    let pre = preflight(host, adapter, options, false).await?;
    Ok(adapter.install(host, &pre.registry).await?)
}

/// `cluster <backend> deploy-rapidfort`; local mode reconciles the registry first
pub async fn deploy_rapidfort(
    host: &HostContext,
    adapter: &dyn BackendAdapter,
    options: &RunOptions,
) -> Result<RuntimeOutcome> {
    let pre = preflight(host, adapter, options, true).await?;
    let Some(plan) = pre.plan else {
        anyhow::bail!("no deployment plan was built");
    };
    if pre.registry.is_local() {
        reconciler::reconcile(adapter, host, &pre.registry).await?;
    }
    Ok(adapter.deploy_runtime(host, &plan).await?)
}

/// What a passing backend sequence produced
#[derive(Debug)]
pub struct TestReport {
    pub state: ClusterState,
    pub pods_ready: usize,
    pub registry: ReconcileReport,
    pub runtime: Option<RuntimeOutcome>,
    pub uninstall: Option<UninstallReport>,
}

/// Run the full phase sequence for one backend
pub async fn test_backend(
    host: &HostContext,
    adapter: &dyn BackendAdapter,
    options: &RunOptions,
) -> Result<TestReport, PhaseFailure> {
    let id = adapter.id();
    ui::header(&format!("Testing {id}"));

    let pre = preflight(host, adapter, options, !options.skip_runtime)
        .await
        .in_phase(Phase::Preflight)?;

    let outcome = run_phases(host, adapter, options, &pre).await;
    if let Err(failure) = &outcome {
        record_failure(host, id, failure);
    }
    outcome
}

async fn run_phases(
    host: &HostContext,
    adapter: &dyn BackendAdapter,
    options: &RunOptions,
    pre: &Preflight,
) -> Result<TestReport, PhaseFailure> {
    let id = adapter.id();
    let timeouts = &host.settings.timeouts;

    adapter
        .install(host, &pre.registry)
        .await
        .in_phase(Phase::Install)?;

    let spec = timeouts.spec("all pods Running or Completed", timeouts.pods_ready_secs);
    let pods_ready = kube::wait_pods_settled(host, None, &spec)
        .await
        .in_phase(Phase::PodsReady)?;
    ui::success(&format!("{pods_ready} pods settled"));

    let registry = reconciler::reconcile(adapter, host, &pre.registry)
        .await
        .in_phase(Phase::Registry)?;

    let runtime = match &pre.plan {
        Some(plan) => Some(
            adapter
                .deploy_runtime(host, plan)
                .await
                .in_phase(Phase::Runtime)?,
        ),
        None => {
            ui::info("skipping runtime deployment");
            None
        }
    };

    if options.skip_coverage {
        ui::info("skipping coverage");
    } else {
        run_coverage(host, id).await.in_phase(Phase::Coverage)?;
    }

    let state = adapter.status(host).await.in_phase(Phase::Status)?;
    print_state(&state);

    let uninstall = if options.keep_cluster {
        ui::info(&format!("keeping {id} cluster"));
        None
    } else {
        Some(adapter.uninstall(host).await.in_phase(Phase::Uninstall)?)
    };

    Ok(TestReport {
        state,
        pods_ready,
        registry,
        runtime,
        uninstall,
    })
}

/// Run the configured coverage hook with `KUBECONFIG` exported
async fn run_coverage(host: &HostContext, id: BackendId) -> rfkube_core::Result<()> {
    let Some((program, args)) = host.settings.coverage.command.split_first() else {
        ui::info("no coverage command configured; skipping coverage");
        return Ok(());
    };
    let hook = Invocation::new(program, args.iter().cloned())
        .env(
            "KUBECONFIG",
            host.kubeconfig.path().to_string_lossy().into_owned(),
        )
        .env("RFKUBE_BACKEND", id.as_str())
        .timeout(Duration::from_secs(host.settings.coverage.timeout_secs));
    ui::info(&format!("running coverage: {}", hook.display()));
    host.run_checked(&hook).await?;
    ui::success("coverage passed");
    Ok(())
}

/// Mark the record Degraded with the failed phase; the cluster is left in place
fn record_failure(host: &HostContext, id: BackendId, failure: &PhaseFailure) {
    error!(backend = %id, phase = %failure.phase, error = %format!("{:#}", failure.error), "backend sequence aborted");
    if let Some(dump) = failure
        .error
        .downcast_ref::<Error>()
        .and_then(Error::diagnostics)
    {
        ui::detail(dump);
    }

    match host.store.load(id) {
        Ok(Some(mut state)) if state.phase != ClusterPhase::Absent => {
            state.degrade(format!("{}: {:#}", failure.phase, failure.error));
            if let Err(e) = host.store.save(&state) {
                warn!(error = %e, "could not record failed phase");
            }
            print_state(&state);
        }
        Ok(_) => info!(backend = %id, "no cluster recorded"),
        Err(e) => warn!(error = %e, "could not read cluster state"),
    }
}

pub fn print_state(state: &ClusterState) {
    ui::info(&format!("{} is {}", state.backend, state.phase));
    let mut lines = vec![format!("kubeconfig: {}", state.kubeconfig_path.display())];
    if let Some(address) = &state.registry_address {
        lines.push(format!("registry: {address}"));
    }
    if let Some(err) = &state.last_error {
        lines.push(format!("last error: {err}"));
    }
    lines.push(format!("updated: {}", state.updated_at.to_rfc3339()));
    ui::detail(&lines.join("\n"));
}

fn run_host_label() -> String {
    let hostname = whoami::fallible::hostname().unwrap_or_else(|_| "unknown".to_string());
    format!("{}@{hostname}", whoami::username())
}

/// Test every backend in [`BackendId::ALL`] order; one failure never stops the run
pub async fn test_all(
    host: &HostContext,
    adapters: &AdapterSet,
    options: &RunOptions,
) -> TestRunSummary {
    let mut summary = TestRunSummary::new(run_host_label());
    let cooldown = Duration::from_secs(host.settings.batch.cooldown_secs);
    let mut ran_before = false;

    for id in BackendId::ALL {
        let Some(adapter) = adapters.get(id) else {
            ui::warning(&format!("no adapter for {id}; skipping"));
            summary.record(BackendResult::skipped(id, "no adapter available"));
            continue;
        };

        if ran_before && !cooldown.is_zero() {
            ui::info(&format!("cooling down for {}s", cooldown.as_secs()));
            tokio::time::sleep(cooldown).await;
        }
        ran_before = true;

        let started = Instant::now();
        let result = match test_backend(host, adapter, options).await {
            Ok(_) => {
                ui::success(&format!("{id} passed"));
                BackendResult::passed(id, started.elapsed())
            }
            Err(failure) => {
                ui::error(&format!("{id}: {failure}"));
                BackendResult::failed(
                    id,
                    started.elapsed(),
                    failure.phase.as_str(),
                    format!("{:#}", failure.error),
                )
            }
        };
        summary.record(result);
    }

    summary.finish();
    ui::print_summary(&summary);

    let log_dir = expand_path(&host.settings.batch.log_dir);
    match summary.write_log(&log_dir) {
        Ok(path) => ui::info(&format!("log written to {}", path.display())),
        Err(e) => warn!(error = %e, "could not write test run log"),
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_support::FakeAdapter;
    use crate::context::test_support::{context, healthy_runner};
    use rfkube_core::testing::{ScriptedRunner, StaticProbe};
    use rfkube_core::{BackendOutcome, CmdOutput, ErrorKind};
    use std::sync::Arc;

    /// Healthy cluster plus every prerequisite present
    fn ready_runner() -> Arc<ScriptedRunner> {
        let runner = healthy_runner();
        runner
            .on("which", &[])
            .respond(CmdOutput::ok("/usr/local/bin/tool\n"));
        runner
    }

    fn skip_runtime() -> RunOptions {
        RunOptions {
            skip_runtime: true,
            skip_coverage: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_one_failing_backend_does_not_stop_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let host = context(dir.path(), ready_runner(), Arc::new(StaticProbe::new(vec![200])));
        let adapters = AdapterSet::from_adapters([
            Box::new(FakeAdapter::new(BackendId::Kubeadm)) as Box<dyn BackendAdapter>,
            Box::new(FakeAdapter::new(BackendId::K0s).failing_provision()),
            Box::new(FakeAdapter::new(BackendId::K3s)),
        ]);

        let summary = test_all(&host, &adapters, &skip_runtime()).await;

        assert_eq!(summary.outcome_of(BackendId::Kubeadm), Some(BackendOutcome::Passed));
        assert_eq!(summary.outcome_of(BackendId::K0s), Some(BackendOutcome::Failed));
        assert_eq!(summary.outcome_of(BackendId::K3s), Some(BackendOutcome::Passed));
        assert_eq!(summary.outcome_of(BackendId::Kind), Some(BackendOutcome::Skipped));
        assert_eq!(summary.entries.len(), BackendId::ALL.len());
        assert!(!summary.is_success());

        let failed = summary
            .entries
            .iter()
            .find(|e| e.backend == BackendId::K0s)
            .unwrap();
        assert_eq!(failed.failed_phase.as_deref(), Some("install"));
        assert!(failed.message.as_deref().unwrap().contains("port 6443"));

        // the failed cluster is left for inspection
        let state = host.store.load(BackendId::K0s).unwrap().unwrap();
        assert_eq!(state.phase, ClusterPhase::Degraded);
        assert!(state.last_error.unwrap().starts_with("install"));
        assert!(host.store.load(BackendId::Kubeadm).unwrap().is_none());

        let logs: Vec<_> = std::fs::read_dir(dir.path().join("logs")).unwrap().collect();
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_before_install() {
        let dir = tempfile::tempdir().unwrap();
        let host = context(dir.path(), ready_runner(), Arc::new(StaticProbe::new(vec![200])));
        let adapter = FakeAdapter::new(BackendId::Kind);

        let failure = test_backend(&host, &adapter, &RunOptions::default())
            .await
            .unwrap_err();
        assert_eq!(failure.phase, Phase::Preflight);
        assert_eq!(
            failure.error.downcast_ref::<Error>().unwrap().kind(),
            ErrorKind::Precondition
        );
        assert_eq!(adapter.provisions(), 0);
        assert!(host.store.load(BackendId::Kind).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keep_cluster_leaves_it_running() {
        let dir = tempfile::tempdir().unwrap();
        let host = context(dir.path(), ready_runner(), Arc::new(StaticProbe::new(vec![200])));
        let adapter = FakeAdapter::new(BackendId::Kind);
        let options = RunOptions {
            keep_cluster: true,
            ..skip_runtime()
        };

        let report = test_backend(&host, &adapter, &options).await.unwrap();
        assert!(report.uninstall.is_none());
        assert!(report.runtime.is_none());
        assert_eq!(report.state.phase, ClusterPhase::Running);
        assert_eq!(report.registry.address, "10.0.0.5:5000");
        assert!(host.store.load(BackendId::Kind).unwrap().unwrap().is_running());
    }

    #[tokio::test]
    async fn test_coverage_hook_gets_kubeconfig() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ready_runner();
        let mut host = context(dir.path(), runner.clone(), Arc::new(StaticProbe::new(vec![200])));
        host.settings.coverage.command = vec!["./coverage.sh".into(), "--quick".into()];
        let adapter = FakeAdapter::new(BackendId::K3s);
        let options = RunOptions {
            skip_coverage: false,
            ..skip_runtime()
        };

        test_backend(&host, &adapter, &options).await.unwrap();
        let hook = runner
            .calls()
            .into_iter()
            .find(|c| c.program == "./coverage.sh")
            .unwrap();
        assert_eq!(hook.args, vec!["--quick"]);
        assert!(hook.env.iter().any(|(k, v)| k == "KUBECONFIG" && v.ends_with(".kube/config")));
        assert_eq!(hook.timeout, Some(Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn test_failing_coverage_is_reported_as_its_phase() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ready_runner();
        runner
            .on("./coverage.sh", &[])
            .respond(CmdOutput::failed(2, "3 checks failed"));
        let mut host = context(dir.path(), runner, Arc::new(StaticProbe::new(vec![200])));
        host.settings.coverage.command = vec!["./coverage.sh".into()];
        let adapter = FakeAdapter::new(BackendId::K3s);
        let options = RunOptions {
            skip_coverage: false,
            ..skip_runtime()
        };

        let failure = test_backend(&host, &adapter, &options).await.unwrap_err();
        assert_eq!(failure.phase, Phase::Coverage);
        let state = host.store.load(BackendId::K3s).unwrap().unwrap();
        assert_eq!(state.phase, ClusterPhase::Degraded);
    }
}
