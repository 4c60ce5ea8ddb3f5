//! CLI commands

use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;

use rfkube_core::{EnvSnapshot, Settings};

use crate::context::HostContext;
use crate::orchestrator::RunOptions;

pub mod batch;
pub mod cluster;
pub mod deps;
pub mod list;

/// Flags shared by every command that installs or tests a cluster
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Registry host or host:port (overridden by RF_LOCAL_REGISTRY)
    #[arg(long = "registry-ip", value_name = "ADDR")]
    pub registry_ip: Option<String>,

    /// Pull the runtime images from the local registry
    #[arg(long)]
    pub local_registry: bool,

    /// Runtime image tag
    #[arg(long, value_name = "TAG")]
    pub image_tag: Option<String>,

    /// Do not deploy the runtime agent
    #[arg(long)]
    pub skip_runtime: bool,

    /// Do not run the coverage hook
    #[arg(long)]
    pub skip_coverage: bool,

    /// Leave the cluster running after a test
    #[arg(long)]
    pub keep_cluster: bool,

    /// One budget in seconds for every readiness wait
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

impl RunArgs {
    pub fn options(&self) -> RunOptions {
        RunOptions {
            registry_flag: self.registry_ip.clone(),
            local_registry: self.local_registry,
            image_tag: self.image_tag.clone(),
            skip_runtime: self.skip_runtime,
            skip_coverage: self.skip_coverage,
            keep_cluster: self.keep_cluster,
        }
    }
}

pub(crate) fn load_settings(config: Option<&Path>, timeout: Option<u64>) -> Result<Settings> {
    let mut settings = Settings::load(config).context("Failed to load settings")?;
    if let Some(secs) = timeout {
        settings.timeouts.override_all(secs);
    }
    Ok(settings)
}

/// Probe the host and build the shared context for one command
pub(crate) async fn host_context(config: Option<&Path>, timeout: Option<u64>) -> Result<HostContext> {
    let settings = load_settings(config, timeout)?;
    HostContext::detect(settings, EnvSnapshot::from_process())
        .await
        .context("Failed to set up host context")
}
