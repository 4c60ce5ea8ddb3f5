//! `rfkube check-deps [backend]`

use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;

use rfkube_core::BackendId;

use crate::bootstrap::{self, installer};
use crate::ui;

/// Check host prerequisites
#[derive(Args, Debug)]
pub struct DepsArgs {
    /// Limit the check to one backend
    pub backend: Option<BackendId>,
}

pub async fn run(args: DepsArgs, config: Option<&Path>) -> Result<()> {
    let host = super::host_context(config, None).await?;

    let mut result = bootstrap::check_prerequisites(&host, args.backend)
        .await
        .context("Failed to check prerequisites")?;

    if !result.all_required_met() && host.env.install_deps() {
        ui::header("Installing missing dependencies");
        let installed = installer::install_missing_required(&host, &result).await;
        if !installed.is_empty() {
            ui::success(&format!("Installed: {}", installed.join(", ")));
            result = bootstrap::check_prerequisites(&host, args.backend).await?;
        }
    }

    bootstrap::print_report(&result);
    let missing = result.missing_required();
    if !missing.is_empty() {
        let names: Vec<_> = missing.iter().map(|b| b.name.as_str()).collect();
        anyhow::bail!("missing prerequisites: {}", names.join(", "));
    }
    Ok(())
}
