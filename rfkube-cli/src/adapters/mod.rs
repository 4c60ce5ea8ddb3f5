//! Backend adapters
//!
//! Every cluster technology implements the hooks of [`BackendAdapter`]; the
//! uniform operations (`install`, `uninstall`, `status`, `deploy_runtime`)
//! are provided by the trait itself so the orchestrator treats all backends
//! identically.

use async_trait::async_trait;
use std::collections::BTreeMap;

use rfkube_core::error::Result;
use rfkube_core::{BackendDescriptor, BackendId, ClusterState, DeploymentPlan, Invocation, RegistrySpec};

use crate::context::HostContext;
use crate::runtime::RuntimeOutcome;

pub mod containerd;
pub mod k0s;
pub mod k3d;
pub mod k3s;
pub mod kind;
pub mod kubeadm;
pub mod lifecycle;
pub mod microk8s;
pub mod minikube;
pub mod zuul;

pub use lifecycle::UninstallReport;

/// What a read-only probe of the host found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveStatus {
    /// No trace of the backend on this host
    Absent,
    /// API server answers
    Running,
    /// Leftovers of a cluster that does not answer
    Degraded(String),
}

/// One best-effort teardown command
#[derive(Debug, Clone)]
pub struct TeardownStep {
    pub name: &'static str,
    pub invocation: Invocation,
}

impl TeardownStep {
    pub fn new(name: &'static str, invocation: Invocation) -> Self {
        Self { name, invocation }
    }
}

#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn descriptor(&self) -> &'static BackendDescriptor;

    fn id(&self) -> BackendId {
        self.descriptor().id
    }

    /// Read-only detection of the backend's current host state
    async fn probe(&self, host: &HostContext) -> LiveStatus;

    /// Bring the cluster up; returns once the backend reports itself started
    async fn provision(&self, host: &HostContext, registry: &RegistrySpec) -> Result<()>;

    /// Ordered teardown commands, each run best-effort
    fn teardown_steps(&self, host: &HostContext) -> Vec<TeardownStep>;

    /// Admin kubeconfig for the freshly provisioned cluster
    async fn fetch_kubeconfig(&self, host: &HostContext) -> Result<String>;

    /// Docker network the host registry container must join, if any
    fn cluster_network(&self) -> Option<&'static str> {
        None
    }

    /// Write the backend-specific insecure-registry trust configuration
    async fn configure_registry_trust(&self, host: &HostContext, registry: &RegistrySpec)
    -> Result<()>;

    /// Restart or signal the daemon that reads the trust configuration
    async fn reload_registry_trust(&self, host: &HostContext) -> Result<()>;

    /// Idempotent install; see [`lifecycle::install`]
    async fn install(&self, host: &HostContext, registry: &RegistrySpec) -> Result<ClusterState> {
        lifecycle::install(self, host, registry).await
    }

    /// Best-effort teardown that always restores local state
    async fn uninstall(&self, host: &HostContext) -> Result<UninstallReport> {
        lifecycle::uninstall(self, host).await
    }

    /// Read-only state report
    async fn status(&self, host: &HostContext) -> Result<ClusterState> {
        lifecycle::status(self, host).await
    }

    /// Deploy the runtime agent once the cluster is Running
    async fn deploy_runtime(&self, host: &HostContext, plan: &DeploymentPlan) -> Result<RuntimeOutcome> {
        lifecycle::deploy_runtime(self, host, plan).await
    }
}

/// Adapter for `id`
pub fn adapter_for(id: BackendId) -> Box<dyn BackendAdapter> {
    match id {
        BackendId::Kubeadm => Box::new(kubeadm::KubeadmAdapter),
        BackendId::K0s => Box::new(k0s::K0sAdapter),
        BackendId::K3s => Box::new(k3s::K3sAdapter),
        BackendId::K3d => Box::new(k3d::K3dAdapter),
        BackendId::Kind => Box::new(kind::KindAdapter),
        BackendId::Microk8s => Box::new(microk8s::Microk8sAdapter),
        BackendId::Minikube => Box::new(minikube::MinikubeAdapter),
        BackendId::Zuul => Box::new(zuul::ZuulAdapter),
    }
}

/// The adapters available to one orchestrator run
pub struct AdapterSet {
    adapters: BTreeMap<BackendId, Box<dyn BackendAdapter>>,
}

impl AdapterSet {
    /// Every built-in backend
    pub fn builtin() -> Self {
        Self::from_adapters(BackendId::ALL.into_iter().map(adapter_for))
    }

    pub fn from_adapters(adapters: impl IntoIterator<Item = Box<dyn BackendAdapter>>) -> Self {
        Self {
            adapters: adapters.into_iter().map(|a| (a.id(), a)).collect(),
        }
    }

    pub fn get(&self, id: BackendId) -> Option<&dyn BackendAdapter> {
        self.adapters.get(&id).map(AsRef::as_ref)
    }
}

/// Run one command and return its stdout, failing on non-zero exit
pub(crate) async fn stdout_of(host: &HostContext, invocation: &Invocation) -> Result<String> {
    Ok(host.run_checked(invocation).await?.stdout)
}
