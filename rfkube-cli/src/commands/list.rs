//! `rfkube list`

use anyhow::Result;
use colored::Colorize;
use std::path::Path;

use rfkube_core::{BackendId, ClusterPhase, RegistryProvisioner, StateStore};

/// Context selected in the canonical kubeconfig, if any
fn current_context(path: &Path) -> Option<String> {
    ::kube::config::Kubeconfig::read_from(path)
        .ok()
        .and_then(|config| config.current_context)
}

fn phase_label(phase: ClusterPhase) -> colored::ColoredString {
    let text = format!("{:<12}", phase.to_string());
    match phase {
        ClusterPhase::Running => text.green(),
        ClusterPhase::Degraded => text.red(),
        ClusterPhase::Installing | ClusterPhase::Uninstalling => text.yellow(),
        ClusterPhase::Absent => text.dimmed(),
    }
}

pub fn run(config: Option<&Path>) -> Result<()> {
    let settings = super::load_settings(config, None)?;
    let store = StateStore::new(settings.paths.state_dir());

    println!(
        "{:<10} {:<12} {:<10} {:<13} {}",
        "BACKEND".bold(),
        "PHASE".bold(),
        "VARIANT".bold(),
        "REGISTRY".bold(),
        "ADDRESS".bold()
    );
    for id in BackendId::ALL {
        let descriptor = id.descriptor();
        let record = store.load(id)?;
        let phase = record.as_ref().map_or(ClusterPhase::Absent, |s| s.phase);
        let provisioner = match descriptor.registry_provisioner {
            RegistryProvisioner::HostContainer => format!("host:{}", descriptor.registry_port),
            RegistryProvisioner::InClusterNodePort => format!("nodeport:{}", descriptor.registry_port),
        };
        let address = record
            .and_then(|s| s.registry_address)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<10} {} {:<10} {:<13} {}",
            id.as_str(),
            phase_label(phase),
            descriptor.default_runtime_variant,
            provisioner,
            address
        );
    }

    println!();
    let kubeconfig = settings.paths.kubeconfig();
    match current_context(&kubeconfig) {
        Some(ctx) => println!("current context: {ctx} ({})", kubeconfig.display()),
        None => println!("current context: {}", "none".dimmed()),
    }
    Ok(())
}
