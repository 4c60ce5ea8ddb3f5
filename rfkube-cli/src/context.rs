//! Shared handles every phase works through

use std::sync::Arc;

use rfkube_core::error::Result;
use rfkube_core::settings::EnvSnapshot;
use rfkube_core::{
    CmdOutput, CommandRunner, DuctRunner, HostInfo, HttpProbe, Invocation, KubeconfigGuard,
    ReqwestProbe, Settings, StateStore,
};
use std::time::Duration;

/// Host-level resources for one rfkube process
pub struct HostContext {
    pub runner: Arc<dyn CommandRunner>,
    pub http: Arc<dyn HttpProbe>,
    pub settings: Settings,
    pub env: EnvSnapshot,
    pub host: HostInfo,
    pub store: StateStore,
    pub kubeconfig: KubeconfigGuard,
}

impl HostContext {
    /// Production context: real processes, real HTTP, probed host
    pub async fn detect(settings: Settings, env: EnvSnapshot) -> Result<Self> {
        let runner: Arc<dyn CommandRunner> =
            Arc::new(DuctRunner::new().with_timeout(settings.timeouts.command_timeout()));
        let http: Arc<dyn HttpProbe> = Arc::new(ReqwestProbe::new(Duration::from_secs(5))?);
        let host = HostInfo::probe(runner.as_ref()).await;
        Ok(Self::with_parts(runner, http, settings, env, host))
    }

    pub fn with_parts(
        runner: Arc<dyn CommandRunner>,
        http: Arc<dyn HttpProbe>,
        settings: Settings,
        env: EnvSnapshot,
        host: HostInfo,
    ) -> Self {
        let store = StateStore::new(settings.paths.state_dir());
        let kubeconfig = KubeconfigGuard::new(settings.paths.kubeconfig());
        Self {
            runner,
            http,
            settings,
            env,
            host,
            store,
            kubeconfig,
        }
    }

    pub async fn run(&self, invocation: &Invocation) -> Result<CmdOutput> {
        self.runner.run(invocation).await
    }

    pub async fn run_checked(&self, invocation: &Invocation) -> Result<CmdOutput> {
        self.runner.run_checked(invocation).await
    }

    pub async fn succeeds(&self, invocation: &Invocation) -> bool {
        self.runner.succeeds(invocation).await
    }

    /// kubectl bound to the canonical kubeconfig
    pub fn kubectl<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::new("kubectl", args).env(
            "KUBECONFIG",
            self.kubeconfig.path().to_string_lossy().into_owned(),
        )
    }

    pub fn helm<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::new("helm", args).env(
            "KUBECONFIG",
            self.kubeconfig.path().to_string_lossy().into_owned(),
        )
    }

    /// Write a root-owned file through `sudo tee`, creating its directory
    pub async fn write_root_file(&self, path: &str, content: &str) -> Result<()> {
        if let Some((dir, _)) = path.rsplit_once('/')
            && !dir.is_empty()
        {
            self.run_checked(&Invocation::sudo("mkdir", ["-p", dir]))
                .await?;
        }
        self.run_checked(&Invocation::sudo("tee", [path]).stdin(content))
            .await?;
        Ok(())
    }

    /// Whether a path exists on the host (checked as root)
    pub async fn root_path_exists(&self, path: &str) -> bool {
        self.succeeds(&Invocation::sudo("test", ["-e", path])).await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use rfkube_core::settings::PathSettings;
    use rfkube_core::testing::{ScriptedRunner, StaticProbe};
    use std::net::Ipv4Addr;
    use std::path::Path;

    /// Context rooted in `root` with scripted runner and probe
    pub fn context(root: &Path, runner: Arc<ScriptedRunner>, probe: Arc<StaticProbe>) -> HostContext {
        let mut settings = Settings::default();
        settings.paths = PathSettings::rooted_at(root);
        settings.timeouts.poll_interval_secs = 0;
        settings.timeouts.cluster_ready_secs = 1;
        settings.timeouts.pods_ready_secs = 1;
        settings.timeouts.registry_ready_secs = 1;
        settings.timeouts.runtime_ready_secs = 1;
        settings.timeouts.trust_check_secs = 1;
        settings.batch.cooldown_secs = 0;
        settings.batch.log_dir = root.join("logs").to_string_lossy().into_owned();

        let host = HostInfo {
            os: "linux".into(),
            distro: Some("ubuntu".into()),
            distro_version: Some("22.04".into()),
            arch: "amd64".into(),
            advertise_ip: Some(Ipv4Addr::new(10, 0, 0, 5)),
        };
        HostContext::with_parts(runner, probe, settings, EnvSnapshot::default(), host)
    }

    pub const READY_NODES: &str = r#"{"apiVersion":"v1","kind":"List","items":[
        {"apiVersion":"v1","kind":"Node","metadata":{"name":"node-1"},
         "status":{"conditions":[{"type":"Ready","status":"True"}]}}]}"#;

    pub const READY_PODS: &str = r#"{"apiVersion":"v1","kind":"List","items":[
        {"apiVersion":"v1","kind":"Pod","metadata":{"name":"coredns-1","namespace":"kube-system"},
         "status":{"phase":"Running","containerStatuses":[{"name":"coredns","ready":true,"restartCount":0,"image":"coredns","imageID":""}]}},
        {"apiVersion":"v1","kind":"Pod","metadata":{"name":"job-1","namespace":"default"},
         "status":{"phase":"Succeeded"}}]}"#;

    /// Scripted runner where the cluster answers as healthy
    pub fn healthy_runner() -> Arc<ScriptedRunner> {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .on("kubectl", &["get", "nodes"])
            .respond(CmdOutput::ok(READY_NODES));
        runner
            .on("kubectl", &["get", "pods"])
            .respond(CmdOutput::ok(READY_PODS));
        runner
            .on("kubectl", &["config", "view", "--raw"])
            .respond(CmdOutput::ok("apiVersion: v1\nkind: Config\n"));
        runner
    }
}
