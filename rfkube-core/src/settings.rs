//! Settings and environment
//!
//! Every field has a default; an optional TOML file (`~/.rapidfort/rfkube.toml`
//! or `--config`) overrides any subset of them.

use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{IoSnafu, Result, TomlParseSnafu};
use crate::poll::PollSpec;
use crate::registry::is_truthy;

/// Default settings file location
pub const DEFAULT_SETTINGS_PATH: &str = "~/.rapidfort/rfkube.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub timeouts: Timeouts,
    pub registry: RegistrySettings,
    pub runtime: RuntimeSettings,
    pub batch: BatchSettings,
    pub coverage: CoverageSettings,
    pub paths: PathSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub poll_interval_secs: u64,
    /// API reachable and all nodes Ready
    pub cluster_ready_secs: u64,
    /// Every pod in every namespace Running or Completed
    pub pods_ready_secs: u64,
    pub registry_ready_secs: u64,
    pub runtime_ready_secs: u64,
    pub trust_check_secs: u64,
    /// Upper bound for any single external command
    pub command_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            cluster_ready_secs: 600,
            pods_ready_secs: 600,
            registry_ready_secs: 120,
            runtime_ready_secs: 600,
            trust_check_secs: 180,
            command_secs: 1800,
        }
    }
}

impl Timeouts {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Poll spec for `description` with a budget of `secs`
    pub fn spec(&self, description: impl Into<String>, secs: u64) -> PollSpec {
        PollSpec::new(description, self.poll_interval(), Duration::from_secs(secs))
    }

    /// Apply one budget to every readiness wait (`--timeout`)
    pub fn override_all(&mut self, secs: u64) {
        self.cluster_ready_secs = secs;
        self.pods_ready_secs = secs;
        self.registry_ready_secs = secs;
        self.runtime_ready_secs = secs;
        self.trust_check_secs = secs;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub container_name: String,
    pub image: String,
    pub volume: String,
    /// Namespace of the in-cluster registry (NodePort provisioner)
    pub namespace: String,
    /// Image round-tripped through the registry to verify trust
    pub test_image: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            container_name: "rf-registry".to_string(),
            image: "registry:2".to_string(),
            volume: "rf-registry-data".to_string(),
            namespace: "rf-registry".to_string(),
            test_image: "busybox:1.36".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub repo_name: String,
    pub repo_url: String,
    pub chart: String,
    pub release: String,
    pub namespace: String,
    /// Registry the runtime images are mirrored from in local mode
    pub public_registry: String,
    pub mirror_images: Vec<String>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            repo_name: "rapidfort".to_string(),
            repo_url: "https://rapidfort.github.io/helm-charts".to_string(),
            chart: "rfruntime".to_string(),
            release: "rfruntime".to_string(),
            namespace: "rapidfort".to_string(),
            public_registry: "quay.io/rapidfort".to_string(),
            mirror_images: vec!["rfruntime".to_string()],
        }
    }
}

impl RuntimeSettings {
    pub fn chart_ref(&self) -> String {
        format!("{}/{}", self.repo_name, self.chart)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Pause between backends so interfaces and ports settle
    pub cooldown_secs: u64,
    pub log_dir: String,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            cooldown_secs: 30,
            log_dir: "~/.rapidfort/rfkube/logs".to_string(),
        }
    }
}

/// External coverage/test hook run after the runtime is ready
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageSettings {
    /// argv of the hook; empty disables it
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for CoverageSettings {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub kubeconfig: String,
    pub state_dir: String,
    pub credentials: String,
    pub registry_secret: String,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            kubeconfig: "~/.kube/config".to_string(),
            state_dir: "~/.rapidfort/rfkube/state".to_string(),
            credentials: "~/.rapidfort/credentials".to_string(),
            registry_secret: "~/.rapidfort/rapidfort-registry-secret.yaml".to_string(),
        }
    }
}

impl PathSettings {
    pub fn kubeconfig(&self) -> PathBuf {
        expand_path(&self.kubeconfig)
    }

    pub fn state_dir(&self) -> PathBuf {
        expand_path(&self.state_dir)
    }

    pub fn credentials(&self) -> PathBuf {
        expand_path(&self.credentials)
    }

    pub fn registry_secret(&self) -> PathBuf {
        expand_path(&self.registry_secret)
    }

    /// Point every path below `root`; used by tests and sandboxed runs
    pub fn rooted_at(root: &Path) -> Self {
        let sub = |p: &str| root.join(p).to_string_lossy().into_owned();
        Self {
            kubeconfig: sub(".kube/config"),
            state_dir: sub(".rapidfort/rfkube/state"),
            credentials: sub(".rapidfort/credentials"),
            registry_secret: sub(".rapidfort/rapidfort-registry-secret.yaml"),
        }
    }
}

impl Settings {
    /// Load settings; an explicit path must exist, the default path is optional
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let default = expand_path(DEFAULT_SETTINGS_PATH);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = std::fs::read_to_string(&path).context(IoSnafu { path: &path })?;
        toml::from_str(&content).context(TomlParseSnafu { path })
    }
}

/// Expand `~` and environment variables in a configured path
pub fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        // unset variable; still resolve a leading `~`
        Err(_) => match (path.strip_prefix("~/"), dirs::home_dir()) {
            (Some(rest), Some(home)) => home.join(rest),
            _ => PathBuf::from(path),
        },
    }
}

/// Environment variables rfkube reacts to, captured once
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    pub rf_local_registry: Option<String>,
    pub rf_use_local_registry: Option<String>,
    pub install_deps: Option<String>,
}

impl EnvSnapshot {
    pub fn from_process() -> Self {
        Self {
            rf_local_registry: std::env::var("RF_LOCAL_REGISTRY").ok(),
            rf_use_local_registry: std::env::var("RF_USE_LOCAL_REGISTRY").ok(),
            install_deps: std::env::var("INSTALL_DEPS").ok(),
        }
    }

    pub fn install_deps(&self) -> bool {
        self.install_deps.as_deref().is_some_and(is_truthy)
    }
}
