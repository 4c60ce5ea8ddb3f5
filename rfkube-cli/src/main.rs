//! rfkube binary

use clap::Parser;

use rfkube_cli::{Cli, ui};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_secs()
        .init();

    if let Err(e) = cli.run().await {
        ui::error(&format!("{e:#}"));
        std::process::exit(1);
    }
}
