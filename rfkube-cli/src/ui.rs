//! Colored terminal lines
//!
//! Every user-facing line is classified as info, success, warning or error.
//! Structured detail goes to `tracing`; these helpers are for the operator.

use colored::Colorize;
use rfkube_core::summary::format_duration;
use rfkube_core::{BackendOutcome, TestRunSummary};
use std::time::Duration;

pub fn header(text: &str) {
    println!();
    println!("{}", format!("🚀 {text}").bold().cyan());
}

pub fn info(text: &str) {
    println!("{} {}", "ℹ️ ".blue(), text);
}

pub fn success(text: &str) {
    println!("{} {}", "✅".green(), text.green());
}

pub fn warning(text: &str) {
    println!("{} {}", "⚠️ ".yellow(), text.yellow());
}

pub fn error(text: &str) {
    eprintln!("{} {}", "❌".red(), text.red().bold());
}

/// Indented secondary line (diagnostic dumps, step detail)
pub fn detail(text: &str) {
    for line in text.lines() {
        println!("   {}", line.dimmed());
    }
}

/// Batch summary with colored outcome column
pub fn print_summary(summary: &TestRunSummary) {
    println!();
    println!("{}", "📊 Test run summary".bold());
    println!(
        "{:<10} {:<8} {:>9}  {}",
        "BACKEND".bold(),
        "RESULT".bold(),
        "DURATION".bold(),
        "DETAIL".bold()
    );
    println!("{}", "─".repeat(60).dimmed());
    for entry in &summary.entries {
        let outcome = format!("{:<8}", format!("{:?}", entry.outcome));
        let outcome = match entry.outcome {
            BackendOutcome::Passed => outcome.green(),
            BackendOutcome::Failed => outcome.red().bold(),
            BackendOutcome::Skipped => outcome.yellow(),
        };
        let detail = match (&entry.failed_phase, &entry.message) {
            (Some(phase), Some(msg)) => format!("{phase}: {msg}"),
            (None, Some(msg)) => msg.clone(),
            (Some(phase), None) => phase.clone(),
            (None, None) => String::new(),
        };
        println!(
            "{:<10} {} {:>9}  {}",
            entry.backend.as_str(),
            outcome,
            format_duration(Duration::from_secs(entry.duration_secs)),
            detail.dimmed()
        );
    }
    println!("{}", "─".repeat(60).dimmed());

    let totals = format!(
        "passed: {}  failed: {}  skipped: {}",
        summary.count(BackendOutcome::Passed),
        summary.count(BackendOutcome::Failed),
        summary.count(BackendOutcome::Skipped)
    );
    if summary.is_success() {
        println!("{}", totals.green().bold());
    } else {
        println!("{}", totals.red().bold());
    }
}
