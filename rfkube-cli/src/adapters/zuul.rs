//! kubeadm as run on a Zuul CI node
//!
//! The control plane comes up exactly as for kubeadm; the local registry is
//! served from inside the cluster on a NodePort instead of a host container,
//! so its data directory is part of the teardown.

use async_trait::async_trait;

use rfkube_core::error::Result;
use rfkube_core::{BackendDescriptor, BackendId, Invocation, RegistrySpec};

use super::containerd::{self, HOST_CERTS_DIR};
use super::kubeadm;
use super::{BackendAdapter, LiveStatus, TeardownStep};
use crate::context::HostContext;

/// hostPath backing the in-cluster registry
pub const REGISTRY_DATA_DIR: &str = "/var/lib/rf-registry";

pub struct ZuulAdapter;

#[async_trait]
impl BackendAdapter for ZuulAdapter {
    fn descriptor(&self) -> &'static BackendDescriptor {
        BackendId::Zuul.descriptor()
    }

    async fn probe(&self, host: &HostContext) -> LiveStatus {
        kubeadm::probe_control_plane(host).await
    }

    async fn provision(&self, host: &HostContext, _registry: &RegistrySpec) -> Result<()> {
        kubeadm::provision_control_plane(host).await
    }

    fn teardown_steps(&self, _host: &HostContext) -> Vec<TeardownStep> {
        let mut steps = kubeadm::control_plane_teardown();
        steps.push(TeardownStep::new(
            "remove registry data",
            Invocation::sudo("rm", ["-rf", REGISTRY_DATA_DIR]),
        ));
        steps
    }

    async fn fetch_kubeconfig(&self, host: &HostContext) -> Result<String> {
        kubeadm::admin_kubeconfig(host).await
    }

    async fn configure_registry_trust(&self, host: &HostContext, registry: &RegistrySpec) -> Result<()> {
        containerd::write_hosts_toml(host, HOST_CERTS_DIR, registry).await
    }

    async fn reload_registry_trust(&self, host: &HostContext) -> Result<()> {
        kubeadm::restart_containerd(host).await
    }
}
