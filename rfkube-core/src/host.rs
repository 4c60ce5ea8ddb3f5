//! Host environment probe
//!
//! Detects OS family, CPU architecture and an address other machines (and
//! cluster nodes running in containers) can use to reach the local registry.

use std::net::Ipv4Addr;
use tracing::debug;

use crate::exec::{CommandRunner, Invocation};

/// Facts about the machine rfkube runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    /// `linux`, `macos`, ...
    pub os: String,
    /// `ID` from /etc/os-release (ubuntu, debian, fedora, ...)
    pub distro: Option<String>,
    pub distro_version: Option<String>,
    /// Architecture in container-image naming (amd64, arm64)
    pub arch: String,
    pub advertise_ip: Option<Ipv4Addr>,
}

impl HostInfo {
    /// Probe the host through the given runner
    pub async fn probe(runner: &dyn CommandRunner) -> Self {
        let (distro, distro_version) = match runner
            .run(&Invocation::new("cat", ["/etc/os-release"]))
            .await
        {
            Ok(out) if out.success() => parse_os_release(&out.stdout),
            _ => (None, None),
        };

        let info = Self {
            os: std::env::consts::OS.to_string(),
            distro,
            distro_version,
            arch: normalize_arch(std::env::consts::ARCH).to_string(),
            advertise_ip: detect_advertise_ip(runner).await,
        };
        debug!(?info, "probed host environment");
        info
    }

    /// Debian family hosts install packages with apt, others with dnf
    pub fn uses_apt(&self) -> bool {
        matches!(
            self.distro.as_deref(),
            Some("ubuntu" | "debian" | "linuxmint" | "pop")
        )
    }
}

/// Map Rust's architecture names to the ones used in release artifacts
pub fn normalize_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "arm" => "armhf",
        other => other,
    }
}

fn parse_os_release(content: &str) -> (Option<String>, Option<String>) {
    let mut id = None;
    let mut version = None;
    for line in content.lines() {
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"').to_string();
            match key.trim() {
                "ID" => id = Some(value),
                "VERSION_ID" => version = Some(value),
                _ => {}
            }
        }
    }
    (id, version)
}

/// Source address of the default route, falling back to the first `hostname -I` entry
async fn detect_advertise_ip(runner: &dyn CommandRunner) -> Option<Ipv4Addr> {
    if let Ok(out) = runner
        .run(&Invocation::new("ip", ["-4", "route", "get", "1.1.1.1"]))
        .await
        && out.success()
        && let Some(ip) = parse_route_src(&out.stdout)
    {
        return Some(ip);
    }

    let out = runner
        .run(&Invocation::new("hostname", ["-I"]))
        .await
        .ok()?;
    out.stdout
        .split_whitespace()
        .filter_map(|s| s.parse::<Ipv4Addr>().ok())
        .find(|ip| !ip.is_loopback())
}

fn parse_route_src(output: &str) -> Option<Ipv4Addr> {
    let mut tokens = output.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "src" {
            return tokens.next()?.parse().ok();
        }
    }
    None
}

/// Whether the current process already has root privileges
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}
