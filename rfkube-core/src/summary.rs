//! Batch run summary
//!
//! Accumulated append-only while backends run, then rendered once as a
//! table for the terminal and once as a TOML log file.

use chrono::{DateTime, Utc};
use serde::Serialize;
use snafu::ResultExt;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backend::BackendId;
use crate::error::{IoSnafu, Result, TomlSerializeSnafu};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BackendOutcome {
    Passed,
    Failed,
    /// No adapter implementation was available
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendResult {
    pub backend: BackendId,
    pub outcome: BackendOutcome,
    pub duration_secs: u64,
    /// Phase that aborted the backend's sequence
    pub failed_phase: Option<String>,
    pub message: Option<String>,
}

impl BackendResult {
    pub fn passed(backend: BackendId, duration: Duration) -> Self {
        Self {
            backend,
            outcome: BackendOutcome::Passed,
            duration_secs: duration.as_secs(),
            failed_phase: None,
            message: None,
        }
    }

    pub fn failed(backend: BackendId, duration: Duration, phase: &str, message: String) -> Self {
        Self {
            backend,
            outcome: BackendOutcome::Failed,
            duration_secs: duration.as_secs(),
            failed_phase: Some(phase.to_string()),
            message: Some(message),
        }
    }

    pub fn skipped(backend: BackendId, reason: &str) -> Self {
        Self {
            backend,
            outcome: BackendOutcome::Skipped,
            duration_secs: 0,
            failed_phase: None,
            message: Some(reason.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TestRunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub host: String,
    #[serde(rename = "backend")]
    pub entries: Vec<BackendResult>,
}

impl TestRunSummary {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            host: host.into(),
            entries: Vec::new(),
        }
    }

    pub fn record(&mut self, result: BackendResult) {
        self.entries.push(result);
    }

    pub fn outcome_of(&self, backend: BackendId) -> Option<BackendOutcome> {
        self.entries
            .iter()
            .find(|e| e.backend == backend)
            .map(|e| e.outcome)
    }

    pub fn count(&self, outcome: BackendOutcome) -> usize {
        self.entries.iter().filter(|e| e.outcome == outcome).count()
    }

    /// Success only when every backend ran and passed
    pub fn is_success(&self) -> bool {
        !self.entries.is_empty()
            && self
                .entries
                .iter()
                .all(|e| e.outcome == BackendOutcome::Passed)
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context(TomlSerializeSnafu {
            what: "test run summary",
        })
    }

    /// Write `test-all-<timestamp>.log` (table header + TOML body) into `dir`
    pub fn write_log(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir).context(IoSnafu { path: dir })?;
        let path = dir.join(format!(
            "test-all-{}.log",
            self.started_at.format("%Y%m%d-%H%M%S")
        ));

        let mut content = String::new();
        for line in self.render_table().lines() {
            let _ = writeln!(content, "# {line}");
        }
        content.push('\n');
        content.push_str(&self.to_toml()?);

        std::fs::write(&path, content).context(IoSnafu { path: &path })?;
        Ok(path)
    }

    /// Plain-text table, one row per backend
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{:<10} {:<8} {:>9}  {}", "BACKEND", "RESULT", "DURATION", "DETAIL");
        let _ = writeln!(out, "{}", "-".repeat(60));
        for entry in &self.entries {
            let detail = match (&entry.failed_phase, &entry.message) {
                (Some(phase), Some(msg)) => format!("{phase}: {msg}"),
                (None, Some(msg)) => msg.clone(),
                (Some(phase), None) => phase.clone(),
                (None, None) => String::new(),
            };
            let _ = writeln!(
                out,
                "{:<10} {:<8} {:>9}  {}",
                entry.backend.as_str(),
                format!("{:?}", entry.outcome),
                format_duration(Duration::from_secs(entry.duration_secs)),
                detail
            );
        }
        let _ = writeln!(out, "{}", "-".repeat(60));
        let _ = writeln!(
            out,
            "passed: {}  failed: {}  skipped: {}",
            self.count(BackendOutcome::Passed),
            self.count(BackendOutcome::Failed),
            self.count(BackendOutcome::Skipped)
        );
        out
    }
}

/// `4m12s`, `37s`, `1h02m`
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    match secs {
        0..=59 => format!("{secs}s"),
        60..=3599 => format!("{}m{:02}s", secs / 60, secs % 60),
        _ => format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60),
    }
}
