//! containerd registry-host configuration shared by several backends

use rfkube_core::error::Result;
use rfkube_core::{Invocation, RegistrySpec};

use crate::context::HostContext;
use crate::templates;

/// Host-level certs directory used by kubeadm and zuul
pub const HOST_CERTS_DIR: &str = "/etc/containerd/certs.d";

/// `<certs_dir>/<host:port>/hosts.toml`
pub fn hosts_path(certs_dir: &str, address: &str) -> String {
    format!("{certs_dir}/{address}/hosts.toml")
}

/// Point the CRI registry at `certs_dir` and switch to the systemd cgroup driver
pub fn patch_default_config(default_config: &str, certs_dir: &str) -> String {
    let mut out = String::with_capacity(default_config.len() + certs_dir.len());
    for line in default_config.lines() {
        let trimmed = line.trim_start();
        let indent = &line[..line.len() - trimmed.len()];
        let key = trimmed.split('=').next().unwrap_or_default().trim();
        match key {
            "config_path" if trimmed.contains('=') => {
                out.push_str(&format!("{indent}config_path = \"{certs_dir}\""));
            }
            "SystemdCgroup" if trimmed.contains('=') => {
                out.push_str(&format!("{indent}SystemdCgroup = true"));
            }
            _ => out.push_str(line),
        }
        out.push('\n');
    }
    out
}

/// Regenerate `/etc/containerd/config.toml` from the packaged defaults
pub async fn configure_host_containerd(host: &HostContext, certs_dir: &str) -> Result<()> {
    let default = host
        .run_checked(&Invocation::sudo("containerd", ["config", "default"]))
        .await?
        .stdout;
    let patched = patch_default_config(&default, certs_dir);
    host.write_root_file("/etc/containerd/config.toml", &patched)
        .await?;
    host.run_checked(&Invocation::sudo("mkdir", ["-p", certs_dir]))
        .await?;
    host.run_checked(&Invocation::sudo("systemctl", ["restart", "containerd"]))
        .await?;
    Ok(())
}

/// Trust `registry` over plain HTTP for every containerd reading `certs_dir`
pub async fn write_hosts_toml(host: &HostContext, certs_dir: &str, registry: &RegistrySpec) -> Result<()> {
    let content = templates::hosts_toml(&registry.address)?;
    host.write_root_file(&hosts_path(certs_dir, &registry.address), &content)
        .await
}
