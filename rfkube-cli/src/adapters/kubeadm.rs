//! kubeadm single-node control plane with flannel
//!
//! The bring-up helpers are shared with the zuul adapter, which runs the
//! same kubeadm sequence on a CI node.

use async_trait::async_trait;
use tracing::{debug, info};

use rfkube_core::error::Result;
use rfkube_core::{BackendDescriptor, BackendId, Invocation, RegistrySpec};

use super::containerd::{self, HOST_CERTS_DIR};
use super::{BackendAdapter, LiveStatus, TeardownStep, stdout_of};
use crate::context::HostContext;

pub const ADMIN_CONF: &str = "/etc/kubernetes/admin.conf";
const APISERVER_MANIFEST: &str = "/etc/kubernetes/manifests/kube-apiserver.yaml";
const POD_NETWORK_CIDR: &str = "10.244.0.0/16";
const FLANNEL_MANIFEST: &str =
    "https://github.com/flannel-io/flannel/releases/latest/download/kube-flannel.yml";

const KERNEL_MODULES: &str = "overlay\nbr_netfilter\n";
const SYSCTLS: &str = "net.bridge.bridge-nf-call-iptables  = 1\n\
net.bridge.bridge-nf-call-ip6tables = 1\n\
net.ipv4.ip_forward                 = 1\n";

pub struct KubeadmAdapter;

/// kubectl as root against the admin kubeconfig
pub(super) fn admin_kubectl<I, S>(args: I) -> Invocation
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut inv = Invocation::sudo("kubectl", ["--kubeconfig", ADMIN_CONF]);
    inv.args.extend(args.into_iter().map(Into::into));
    inv
}

pub(super) async fn probe_control_plane(host: &HostContext) -> LiveStatus {
    if host.succeeds(&admin_kubectl(["get", "--raw", "/readyz"])).await {
        return LiveStatus::Running;
    }
    if host.root_path_exists(APISERVER_MANIFEST).await {
        return LiveStatus::Degraded("static pod manifests present but API server unreachable".into());
    }
    LiveStatus::Absent
}

/// Host preparation: swap, kernel modules, sysctls, containerd
async fn prepare_host(host: &HostContext) -> Result<()> {
    host.run_checked(&Invocation::sudo("swapoff", ["-a"])).await?;
    host.run_checked(&Invocation::sudo(
        "sed",
        ["-i", "/ swap / s/^\\(.*\\)$/#\\1/", "/etc/fstab"],
    ))
    .await?;

    host.write_root_file("/etc/modules-load.d/k8s.conf", KERNEL_MODULES)
        .await?;
    for module in KERNEL_MODULES.lines() {
        host.run_checked(&Invocation::sudo("modprobe", [module])).await?;
    }
    host.write_root_file("/etc/sysctl.d/k8s.conf", SYSCTLS).await?;
    host.run_checked(&Invocation::sudo("sysctl", ["--system"])).await?;

    containerd::configure_host_containerd(host, HOST_CERTS_DIR).await
}

pub(super) async fn provision_control_plane(host: &HostContext) -> Result<()> {
    info!("🤓 preparing host for kubeadm");
    prepare_host(host).await?;

    let mut init = Invocation::sudo("kubeadm", ["init"])
        .arg(format!("--pod-network-cidr={POD_NETWORK_CIDR}"));
    if let Some(ip) = host.host.advertise_ip {
        init = init.arg(format!("--apiserver-advertise-address={ip}"));
    }
    host.run_checked(&init).await?;

    // single node: workloads must schedule on the control plane
    let untaint = host
        .run(&admin_kubectl([
            "taint",
            "nodes",
            "--all",
            "node-role.kubernetes.io/control-plane-",
        ]))
        .await?;
    if !untaint.success() {
        debug!(stderr = %untaint.stderr.trim(), "control-plane taint already absent");
    }

    host.run_checked(&admin_kubectl(["apply", "-f", FLANNEL_MANIFEST]))
        .await?;
    Ok(())
}

pub(super) fn control_plane_teardown() -> Vec<TeardownStep> {
    vec![
        TeardownStep::new("kubeadm reset", Invocation::sudo("kubeadm", ["reset", "-f"])),
        TeardownStep::new(
            "remove CNI config",
            Invocation::sudo("rm", ["-rf", "/etc/cni/net.d"]),
        ),
        TeardownStep::new(
            "delete cni0",
            Invocation::sudo("ip", ["link", "delete", "cni0"]),
        ),
        TeardownStep::new(
            "delete flannel.1",
            Invocation::sudo("ip", ["link", "delete", "flannel.1"]),
        ),
        TeardownStep::new(
            "remove registry trust",
            Invocation::sudo("rm", ["-rf", HOST_CERTS_DIR]),
        ),
    ]
}

pub(super) async fn admin_kubeconfig(host: &HostContext) -> Result<String> {
    stdout_of(host, &Invocation::sudo("cat", [ADMIN_CONF])).await
}

pub(super) async fn restart_containerd(host: &HostContext) -> Result<()> {
    host.run_checked(&Invocation::sudo("systemctl", ["restart", "containerd"]))
        .await?;
    Ok(())
}

#[async_trait]
impl BackendAdapter for KubeadmAdapter {
    fn descriptor(&self) -> &'static BackendDescriptor {
        BackendId::Kubeadm.descriptor()
    }

    async fn probe(&self, host: &HostContext) -> LiveStatus {
        probe_control_plane(host).await
    }

    async fn provision(&self, host: &HostContext, _registry: &RegistrySpec) -> Result<()> {
        provision_control_plane(host).await
    }

    fn teardown_steps(&self, _host: &HostContext) -> Vec<TeardownStep> {
        control_plane_teardown()
    }

    async fn fetch_kubeconfig(&self, host: &HostContext) -> Result<String> {
        admin_kubeconfig(host).await
    }

    async fn configure_registry_trust(&self, host: &HostContext, registry: &RegistrySpec) -> Result<()> {
        containerd::write_hosts_toml(host, HOST_CERTS_DIR, registry).await
    }

    async fn reload_registry_trust(&self, host: &HostContext) -> Result<()> {
        restart_containerd(host).await
    }
}
