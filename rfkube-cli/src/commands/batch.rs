//! `rfkube test-all`

use anyhow::Result;
use clap::Args;
use std::path::Path;

use rfkube_core::BackendOutcome;

use super::RunArgs;
use crate::adapters::AdapterSet;
use crate::orchestrator;

/// Test every backend in turn
#[derive(Args, Debug)]
pub struct BatchArgs {
    #[command(flatten)]
    pub run: RunArgs,
}

pub async fn run(args: BatchArgs, config: Option<&Path>) -> Result<()> {
    let host = super::host_context(config, args.run.timeout).await?;
    let adapters = AdapterSet::builtin();

    let summary = orchestrator::test_all(&host, &adapters, &args.run.options()).await;
    if !summary.is_success() {
        anyhow::bail!(
            "{} failed and {} skipped of {} backends",
            summary.count(BackendOutcome::Failed),
            summary.count(BackendOutcome::Skipped),
            summary.entries.len()
        );
    }
    Ok(())
}
