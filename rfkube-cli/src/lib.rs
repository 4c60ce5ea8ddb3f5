//! rfkube command line
//!
//! Installs, verifies and tears down local Kubernetes clusters across eight
//! backends, provisions a trusted insecure registry next to them and deploys
//! the RapidFort runtime agent with Helm.

pub mod adapters;
pub mod bootstrap;
pub mod commands;
pub mod context;
pub mod kube;
pub mod orchestrator;
pub mod reconciler;
pub mod runtime;
pub mod templates;
pub mod ui;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::batch::BatchArgs;
use commands::cluster::ClusterArgs;
use commands::deps::DepsArgs;

/// rfkube - Kubernetes cluster lifecycle orchestrator
#[derive(Parser, Debug)]
#[command(name = "rfkube")]
#[command(version = rfkube_core::VERSION, about, long_about = None)]
pub struct Cli {
    /// Settings file (default: ~/.rapidfort/rfkube.toml)
    #[arg(long, global = true, env = "RFKUBE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install, uninstall, inspect or test one backend
    Cluster(ClusterArgs),
    /// Test every backend sequentially and write a summary log
    TestAll(BatchArgs),
    /// Backends with their recorded state
    List,
    /// Check (and with INSTALL_DEPS, install) host prerequisites
    CheckDeps(DepsArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> anyhow::Result<()> {
        let config = self.config.as_deref();
        match self.command {
            Commands::Cluster(args) => commands::cluster::run(args, config).await,
            Commands::TestAll(args) => commands::batch::run(args, config).await,
            Commands::List => commands::list::run(config),
            Commands::CheckDeps(args) => commands::deps::run(args, config).await,
        }
    }
}
