//! Prerequisite checker
//!
//! Reads the built-in dependency catalog and validates that the binaries a
//! backend needs are installed with acceptable versions.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

use rfkube_core::{BackendId, Error, Invocation};

use super::installer;
use crate::context::HostContext;
use crate::ui;

const CATALOG: &str = include_str!("deps.toml");

/// Dependency catalog matching `deps.toml`
#[derive(Debug, Deserialize)]
pub struct DepsCatalog {
    #[serde(default)]
    pub common: BTreeMap<String, BinarySpec>,
    #[serde(default)]
    pub backends: BTreeMap<String, BTreeMap<String, BinarySpec>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BinarySpec {
    pub version: String, // Format: ">=1.0.0"
    #[serde(default = "default_version_args")]
    pub version_args: Vec<String>,
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub install_hint: Option<String>,
}

fn default_version_args() -> Vec<String> {
    vec!["--version".to_string()]
}

impl DepsCatalog {
    pub fn builtin() -> Result<Self> {
        toml::from_str(CATALOG).context("Failed to parse the built-in dependency catalog")
    }

    /// Binaries needed for `backend`, or for every backend when `None`
    pub fn requirements(&self, backend: Option<BackendId>) -> Vec<(&str, &BinarySpec)> {
        let mut wanted: BTreeMap<&str, &BinarySpec> = self
            .common
            .iter()
            .map(|(name, spec)| (name.as_str(), spec))
            .collect();
        for (id, bins) in &self.backends {
            if backend.is_none_or(|b| b.as_str() == id) {
                for (name, spec) in bins {
                    wanted.entry(name.as_str()).or_insert(spec);
                }
            }
        }
        let mut wanted: Vec<_> = wanted.into_iter().collect();
        wanted.sort_by_key(|(name, spec)| (spec.priority, *name));
        wanted
    }
}

/// Result of prerequisite check for a single binary
#[derive(Debug, Clone)]
pub struct BinaryCheck {
    pub name: String,
    pub found: bool,
    pub installed_version: Option<String>,
    pub required_version: String,
    pub meets_requirement: bool,
    pub path: Option<String>,
    pub install_hint: Option<String>,
}

/// Overall prerequisite check result
#[derive(Debug)]
pub struct PrereqResult {
    pub backend: Option<BackendId>,
    pub required: Vec<BinaryCheck>,
}

impl PrereqResult {
    /// Get list of missing required binaries
    pub fn missing_required(&self) -> Vec<&BinaryCheck> {
        self.required
            .iter()
            .filter(|b| !b.found || !b.meets_requirement)
            .collect()
    }

    pub fn all_required_met(&self) -> bool {
        self.missing_required().is_empty()
    }
}

/// Extract semantic version from version output
/// Handles various formats:
///   "Client Version: v1.30.2" -> "1.30.2"
///   "Docker version 24.0.7, build afdd53b" -> "24.0.7"
///   "kind v0.23.0 go1.21.10 linux/amd64" -> "0.23.0"
pub(crate) fn extract_version(output: &str) -> Option<String> {
    let re = regex::Regex::new(r"v?(\d+\.\d+\.\d+)").ok()?;
    re.captures(output)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
}

/// Check if installed version meets requirement
/// Parses requirement like ">=1.0.0" and compares versions
pub(crate) fn version_meets_requirement(installed: &str, requirement: &str) -> Result<bool> {
    let requirement = requirement.trim();

    let (op, required_ver_str) = if let Some(rest) = requirement.strip_prefix(">=") {
        (">=", rest)
    } else if let Some(rest) = requirement.strip_prefix("<=") {
        ("<=", rest)
    } else if let Some(rest) = requirement.strip_prefix('>') {
        (">", rest)
    } else if let Some(rest) = requirement.strip_prefix('<') {
        ("<", rest)
    } else if let Some(rest) = requirement.strip_prefix('=') {
        ("=", rest)
    } else {
        ("=", requirement)
    };

    let installed_ver = semver::Version::parse(installed.trim())
        .with_context(|| format!("Failed to parse installed version: {installed}"))?;

    let required_ver = semver::Version::parse(required_ver_str.trim())
        .with_context(|| format!("Failed to parse required version: {required_ver_str}"))?;

    Ok(match op {
        ">=" => installed_ver >= required_ver,
        "<=" => installed_ver <= required_ver,
        ">" => installed_ver > required_ver,
        "<" => installed_ver < required_ver,
        "=" => installed_ver == required_ver,
        _ => false,
    })
}

/// Check a single binary against its catalog entry
async fn check_binary(host: &HostContext, name: &str, spec: &BinarySpec) -> BinaryCheck {
    let path = match host.run(&Invocation::new("which", [name])).await {
        Ok(out) if out.success() && !out.stdout.trim().is_empty() => {
            Some(out.stdout.trim().to_string())
        }
        _ => None,
    };

    let mut check = BinaryCheck {
        name: name.to_string(),
        found: path.is_some(),
        installed_version: None,
        required_version: spec.version.clone(),
        meets_requirement: false,
        path,
        install_hint: spec.install_hint.clone(),
    };
    if !check.found {
        return check;
    }

    // several tools print their version on stderr
    check.installed_version = match host
        .run(&Invocation::new(name, spec.version_args.iter().cloned()))
        .await
    {
        Ok(out) => extract_version(&format!("{}\n{}", out.stdout, out.stderr)),
        Err(e) => {
            debug!(binary = name, error = %e, "version query failed");
            None
        }
    };

    check.meets_requirement = match &check.installed_version {
        Some(installed) => version_meets_requirement(installed, &spec.version).unwrap_or_else(|e| {
            debug!(binary = name, error = %e, "unparseable version");
            false
        }),
        // present but silent about its version
        None => true,
    };
    check
}

/// Check every binary `backend` needs (all backends when `None`)
pub async fn check_prerequisites(
    host: &HostContext,
    backend: Option<BackendId>,
) -> Result<PrereqResult> {
    let catalog = DepsCatalog::builtin()?;
    let mut required = Vec::new();
    for (name, spec) in catalog.requirements(backend) {
        required.push(check_binary(host, name, spec).await);
    }
    Ok(PrereqResult { backend, required })
}

/// Check prerequisites, installing missing ones when `INSTALL_DEPS` is set
///
/// Fails with [`Error::MissingBinary`] for the first binary still missing.
pub async fn ensure_prerequisites(host: &HostContext, backend: BackendId) -> Result<PrereqResult> {
    let mut result = check_prerequisites(host, Some(backend)).await?;
    if !result.all_required_met() && host.env.install_deps() {
        let installed = installer::install_missing_required(host, &result).await;
        if !installed.is_empty() {
            result = check_prerequisites(host, Some(backend)).await?;
        }
    }

    if let Some(missing) = result.missing_required().first() {
        if let Some(hint) = &missing.install_hint {
            ui::detail(&format!("install {}: {hint}", missing.name));
        }
        return Err(Error::MissingBinary {
            binary: missing.name.clone(),
        }
        .into());
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::context;
    use rfkube_core::testing::{ScriptedRunner, StaticProbe};
    use rfkube_core::{CmdOutput, ErrorKind};
    use std::sync::Arc;

    #[test]
    fn test_extract_version() {
        assert_eq!(
            extract_version("Client Version: v1.30.2\nKustomize Version: v5.0.4"),
            Some("1.30.2".to_string())
        );
        assert_eq!(
            extract_version("Docker version 24.0.7, build afdd53b"),
            Some("24.0.7".to_string())
        );
        assert_eq!(
            extract_version("v3.14.4+g81c902a"),
            Some("3.14.4".to_string())
        );
        assert_eq!(extract_version("no version here"), None);
    }

    #[test]
    fn test_version_meets_requirement() {
        assert!(version_meets_requirement("1.30.2", ">=1.28.0").unwrap());
        assert!(!version_meets_requirement("1.27.9", ">=1.28.0").unwrap());
        assert!(version_meets_requirement("0.23.0", "=0.23.0").unwrap());
        assert!(version_meets_requirement("0.23.0", "<1.0.0").unwrap());
        assert!(version_meets_requirement("not-a-version", ">=1.0.0").is_err());
    }

    #[test]
    fn test_catalog_requirements_per_backend() {
        let catalog = DepsCatalog::builtin().unwrap();

        let kind: Vec<_> = catalog
            .requirements(Some(BackendId::Kind))
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert!(kind.contains(&"kind"));
        assert!(kind.contains(&"helm"));
        assert!(!kind.contains(&"kubeadm"));

        let all: Vec<_> = catalog
            .requirements(None)
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(all.iter().filter(|n| **n == "kubeadm").count(), 1);
        assert!(all.contains(&"minikube"));
    }

    fn runner_with(present: &[(&str, &str)]) -> Arc<ScriptedRunner> {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("which", &[]).respond(CmdOutput::failed(1, ""));
        for (name, version) in present {
            runner
                .on("which", &[*name])
                .respond(CmdOutput::ok(format!("/usr/bin/{name}\n")));
            runner.on(name, &[]).respond(CmdOutput::ok(*version));
        }
        runner
    }

    const KIND_HOST: &[(&str, &str)] = &[
        ("kubectl", "Client Version: v1.30.2"),
        ("helm", "v3.14.4+g81c902a"),
        ("docker", "Docker version 24.0.7, build afdd53b"),
        ("curl", "curl 8.5.0 (x86_64-pc-linux-gnu)"),
        ("kind", "kind v0.23.0 go1.21.10 linux/amd64"),
    ];

    #[tokio::test]
    async fn test_satisfied_host_passes() {
        let dir = tempfile::tempdir().unwrap();
        let host = context(
            dir.path(),
            runner_with(KIND_HOST),
            Arc::new(StaticProbe::new(vec![200])),
        );

        let result = ensure_prerequisites(&host, BackendId::Kind).await.unwrap();
        assert!(result.all_required_met());
        let kind = result.required.iter().find(|b| b.name == "kind").unwrap();
        assert_eq!(kind.installed_version.as_deref(), Some("0.23.0"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_precondition_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_with(&KIND_HOST[..4]);
        let host = context(dir.path(), runner.clone(), Arc::new(StaticProbe::new(vec![200])));

        let err = ensure_prerequisites(&host, BackendId::Kind)
            .await
            .unwrap_err();
        let err = err.downcast_ref::<Error>().unwrap();
        assert!(matches!(err, Error::MissingBinary { binary } if binary == "kind"));
        assert_eq!(err.kind(), ErrorKind::Precondition);
        // INSTALL_DEPS is off by default
        assert_eq!(runner.count("sh", &[]), 0);
    }

    #[tokio::test]
    async fn test_outdated_version_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_with(KIND_HOST);
        runner
            .on("kind", &["version"])
            .respond(CmdOutput::ok("kind v0.11.1 go1.16.4 linux/amd64"));
        let host = context(dir.path(), runner, Arc::new(StaticProbe::new(vec![200])));

        let result = check_prerequisites(&host, Some(BackendId::Kind))
            .await
            .unwrap();
        let missing: Vec<_> = result
            .missing_required()
            .into_iter()
            .map(|b| b.name.as_str())
            .collect();
        assert_eq!(missing, vec!["kind"]);
    }
}
