//! Prerequisite report printing

use colored::Colorize;

use super::prereq::{BinaryCheck, PrereqResult};

fn status_mark(bin: &BinaryCheck) -> colored::ColoredString {
    if bin.found && bin.meets_requirement {
        "✅".green()
    } else if bin.found {
        "⚠️ ".yellow()
    } else {
        "❌".red()
    }
}

/// One line per binary: mark, name, installed vs required version
pub fn format_check(bin: &BinaryCheck) -> String {
    let mut line = format!("{} {}", status_mark(bin), bin.name);
    match (&bin.installed_version, bin.meets_requirement) {
        (Some(installed), true) => line.push_str(&format!(" (installed: {installed}, OK)")),
        (Some(installed), false) => line.push_str(&format!(
            " (installed: {installed}, requires: {})",
            bin.required_version
        )),
        (None, true) => line.push_str(" (version unknown)"),
        (None, false) => {
            line.push_str(&format!(" (not installed) - requires: {}", bin.required_version));
            if let Some(hint) = &bin.install_hint {
                line.push_str(&format!(" - {hint}"));
            }
        }
    }
    line
}

pub fn print_report(result: &PrereqResult) {
    let scope = result
        .backend
        .map_or_else(|| "all backends".to_string(), |b| b.to_string());
    println!("{}", format!("📦 Prerequisites for {scope}").bold());
    println!("{}", "━".repeat(40).dimmed());
    println!("Checked: {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
    println!();

    for bin in &result.required {
        println!("  {}", format_check(bin));
    }

    println!();
    let missing = result.missing_required().len();
    if missing == 0 {
        println!("{}", "All required binaries present".green().bold());
    } else {
        println!(
            "{}",
            format!("{missing} required binaries missing or outdated (set INSTALL_DEPS=1 to install)")
                .red()
                .bold()
        );
    }
}
