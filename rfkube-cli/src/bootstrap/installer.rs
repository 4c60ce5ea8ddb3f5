//! Auto-installer for missing dependencies
//!
//! Only runs when `INSTALL_DEPS` is truthy. Packages come from apt or dnf
//! depending on the distro; release binaries are downloaded for the host
//! architecture.

use anyhow::{Context, Result};
use tracing::info;

use rfkube_core::{HostInfo, Invocation};

use super::prereq::PrereqResult;
use crate::context::HostContext;
use crate::ui;

const KUBECTL_RELEASE: &str = "v1.30.4";
const KIND_RELEASE: &str = "v0.23.0";
const K8S_PACKAGE_STREAM: &str = "v1.30";
const BIN_DIR: &str = "/usr/local/bin";

/// Install missing required binaries; returns the names that installed cleanly
pub async fn install_missing_required(host: &HostContext, prereq: &PrereqResult) -> Vec<String> {
    let mut installed = Vec::new();

    for binary in prereq.missing_required() {
        ui::info(&format!("🔧 Installing {}...", binary.name));

        match install_binary(host, &binary.name).await {
            Ok(()) => {
                installed.push(binary.name.clone());
                ui::success(&format!("{} installed", binary.name));
            }
            Err(e) => {
                ui::error(&format!("Failed to install {}: {e:#}", binary.name));
            }
        }
    }

    installed
}

async fn install_binary(host: &HostContext, name: &str) -> Result<()> {
    for step in install_steps(&host.host, name)? {
        info!(command = %step.display(), "install step");
        host.run_checked(&step)
            .await
            .with_context(|| format!("installing {name}"))?;
    }
    Ok(())
}

/// Commands that install `name` on this host
fn install_steps(host: &HostInfo, name: &str) -> Result<Vec<Invocation>> {
    if host.os != "linux" {
        anyhow::bail!("Unsupported OS for auto-install: {}", host.os);
    }
    let arch = host.arch.as_str();

    let steps = match name {
        "docker" => vec![
            shell_pipe("https://get.docker.com", "sh", true),
            Invocation::sudo("usermod", ["-aG", "docker", whoami::username().as_str()]),
        ],
        "kubectl" => download(
            &format!("https://dl.k8s.io/release/{KUBECTL_RELEASE}/bin/linux/{arch}/kubectl"),
            "kubectl",
        ),
        "helm" => vec![shell_pipe(
            "https://raw.githubusercontent.com/helm/helm/main/scripts/get-helm-3",
            "bash",
            false,
        )],
        "kind" => download(
            &format!("https://kind.sigs.k8s.io/dl/{KIND_RELEASE}/kind-linux-{arch}"),
            "kind",
        ),
        "minikube" => download(
            &format!("https://storage.googleapis.com/minikube/releases/latest/minikube-linux-{arch}"),
            "minikube",
        ),
        "k3d" => vec![shell_pipe(
            "https://raw.githubusercontent.com/k3d-io/k3d/main/install.sh",
            "bash",
            false,
        )],
        "k0s" => vec![shell_pipe("https://get.k0s.sh", "sh", true)],
        "curl" | "containerd" => package_install(host, &[name]),
        "snap" => {
            let mut steps = package_install(host, &["snapd"]);
            steps.push(Invocation::sudo("systemctl", ["enable", "--now", "snapd.socket"]));
            steps
        }
        "kubeadm" | "kubelet" => kubernetes_packages(host),
        _ => anyhow::bail!("Unknown binary: {name}"),
    };
    Ok(steps)
}

/// `curl <url> | <shell>`
fn shell_pipe(url: &str, shell: &str, privileged: bool) -> Invocation {
    let script = format!("curl -fsSL {url} | {shell}");
    if privileged {
        Invocation::sudo("sh", ["-c", script.as_str()])
    } else {
        Invocation::new("sh", ["-c", script.as_str()])
    }
}

fn download(url: &str, name: &str) -> Vec<Invocation> {
    let target = format!("{BIN_DIR}/{name}");
    vec![
        Invocation::sudo("curl", ["-fsSLo", target.as_str(), url]),
        Invocation::sudo("chmod", ["+x", target.as_str()]),
    ]
}

fn package_install(host: &HostInfo, packages: &[&str]) -> Vec<Invocation> {
    if host.uses_apt() {
        vec![
            Invocation::sudo("apt-get", ["update"]),
            Invocation::sudo("apt-get", install_args(packages)),
        ]
    } else {
        vec![Invocation::sudo("dnf", install_args(packages))]
    }
}

/// kubelet + kubeadm from the pkgs.k8s.io package stream
fn kubernetes_packages(host: &HostInfo) -> Vec<Invocation> {
    let base = format!("https://pkgs.k8s.io/core:/stable:/{K8S_PACKAGE_STREAM}");
    let mut steps = if host.uses_apt() {
        let keyring = "/etc/apt/keyrings/kubernetes-apt-keyring.gpg";
        let key = format!("curl -fsSL {base}/deb/Release.key | gpg --dearmor --yes -o {keyring}");
        vec![
            Invocation::sudo("mkdir", ["-p", "/etc/apt/keyrings"]),
            Invocation::sudo("sh", ["-c", key.as_str()]),
            Invocation::sudo("tee", ["/etc/apt/sources.list.d/kubernetes.list"])
                .stdin(format!("deb [signed-by={keyring}] {base}/deb/ /\n")),
            Invocation::sudo("apt-get", ["update"]),
            Invocation::sudo("apt-get", ["install", "-y", "kubelet", "kubeadm"]),
        ]
    } else {
        let repo = format!(
            "[kubernetes]\nname=Kubernetes\nbaseurl={base}/rpm/\nenabled=1\ngpgcheck=1\ngpgkey={base}/rpm/repodata/repomd.xml.key\n"
        );
        vec![
            Invocation::sudo("tee", ["/etc/yum.repos.d/kubernetes.repo"]).stdin(repo),
            Invocation::sudo("dnf", ["install", "-y", "kubelet", "kubeadm"]),
        ]
    };
    steps.push(Invocation::sudo("systemctl", ["enable", "--now", "kubelet"]));
    steps
}

fn install_args<'a>(packages: &'a [&'a str]) -> impl Iterator<Item = &'a str> {
    ["install", "-y"].into_iter().chain(packages.iter().copied())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::prereq::BinaryCheck;
    use crate::context::test_support::context;
    use rfkube_core::testing::{ScriptedRunner, StaticProbe};
    use rfkube_core::{BackendId, CmdOutput};
    use std::sync::Arc;

    fn host(distro: &str, arch: &str) -> HostInfo {
        HostInfo {
            os: "linux".into(),
            distro: Some(distro.into()),
            distro_version: None,
            arch: arch.into(),
            advertise_ip: None,
        }
    }

    #[test]
    fn test_downloads_follow_architecture() {
        let steps = install_steps(&host("ubuntu", "arm64"), "kind").unwrap();
        assert!(steps[0].matches("curl", &["/usr/local/bin/kind", "kind-linux-arm64"]));
        assert!(steps[0].privileged);
        assert!(steps[1].matches("chmod", &["+x"]));
    }

    #[test]
    fn test_package_manager_follows_distro() {
        let apt = install_steps(&host("ubuntu", "amd64"), "curl").unwrap();
        assert!(apt.last().unwrap().matches("apt-get", &["install", "-y", "curl"]));

        let dnf = install_steps(&host("fedora", "amd64"), "containerd").unwrap();
        assert_eq!(dnf.len(), 1);
        assert!(dnf[0].matches("dnf", &["install", "-y", "containerd"]));
    }

    #[test]
    fn test_unknown_binary_is_rejected() {
        assert!(install_steps(&host("ubuntu", "amd64"), "openshift-install").is_err());
    }

    #[tokio::test]
    async fn test_failed_install_is_not_reported_installed() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .on("sh", &["-c", "get.k0s.sh"])
            .respond(CmdOutput::failed(6, "could not resolve host"));
        let ctx = context(dir.path(), runner.clone(), Arc::new(StaticProbe::new(vec![200])));

        let missing = |name: &str| BinaryCheck {
            name: name.into(),
            found: false,
            installed_version: None,
            required_version: ">=1.0.0".into(),
            meets_requirement: false,
            path: None,
            install_hint: None,
        };
        let prereq = PrereqResult {
            backend: Some(BackendId::K0s),
            required: vec![missing("k0s"), missing("kubectl")],
        };

        let installed = install_missing_required(&ctx, &prereq).await;
        assert_eq!(installed, vec!["kubectl"]);
        assert!(runner.ran("curl", &["/bin/linux/amd64/kubectl"]));
    }
}
