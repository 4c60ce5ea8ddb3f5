//! Error types shared by every rfkube phase
//!
//! Variants are grouped by [`ErrorKind`] so callers can tell a precondition
//! failure (nothing was mutated) from a convergence timeout or a failing
//! external tool.

use snafu::Snafu;
use std::path::PathBuf;
use std::time::Duration;

/// Result alias used across rfkube-core
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("required binary `{binary}` is not installed"))]
    MissingBinary { binary: String },

    #[snafu(display("runtime credentials are incomplete: `{field}` is empty"))]
    IncompleteCredentials { field: &'static str },

    #[snafu(display("failed to read credentials file {}", path.display()))]
    CredentialsUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("no registry address could be determined (set RF_LOCAL_REGISTRY or --registry-ip)"))]
    RegistryAddressUnset {},

    #[snafu(display("invalid registry address `{address}`: {reason}"))]
    InvalidRegistryAddress { address: String, reason: String },

    #[snafu(display("{backend} cannot pull from a local insecure registry"))]
    LocalRegistryUnsupported { backend: String },

    #[snafu(display("cluster for {backend} is {phase}, expected Running"))]
    NotRunning { backend: String, phase: String },

    #[snafu(display("unknown backend `{name}`"))]
    UnknownBackend { name: String },

    #[snafu(display("{what} did not become ready within {}s{}", timeout.as_secs(), last_status.as_deref().map(|s| format!(" (last status: {s})")).unwrap_or_default()))]
    Timeout {
        what: String,
        timeout: Duration,
        last_status: Option<String>,
    },

    #[snafu(display("`{command}` did not finish within {}s and was killed", timeout.as_secs()))]
    CommandTimeout { command: String, timeout: Duration },

    #[snafu(display("`{command}` exited with status {status}: {stderr}"))]
    ExternalTool {
        command: String,
        status: i32,
        stderr: String,
        /// Diagnostic dump of the affected resource (e.g. `kubectl describe`)
        diagnostics: Option<String>,
    },

    #[snafu(display("failed to launch `{command}`"))]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("HTTP probe of {url} failed"))]
    Http { url: String, source: reqwest::Error },

    #[snafu(display("I/O error on {}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to parse {what} as JSON"))]
    Json {
        what: String,
        source: serde_json::Error,
    },

    #[snafu(display("failed to parse {what} as YAML"))]
    Yaml {
        what: String,
        source: serde_yaml::Error,
    },

    #[snafu(display("failed to parse {}", path.display()))]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[snafu(display("failed to serialize {what} as TOML"))]
    TomlSerialize {
        what: String,
        source: toml::ser::Error,
    },

    #[snafu(display("failed to render template {name}: {message}"))]
    Render { name: String, message: String },

    #[snafu(display("{message}"))]
    Phase { message: String },
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Detected before any host mutation
    Precondition,
    /// A readiness predicate never held within its budget
    Timeout,
    /// A non-zero exit or launch failure of an external tool
    ExternalTool,
    /// Local I/O, parsing or rendering failures
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingBinary { .. }
            | Error::IncompleteCredentials { .. }
            | Error::CredentialsUnreadable { .. }
            | Error::RegistryAddressUnset {}
            | Error::InvalidRegistryAddress { .. }
            | Error::LocalRegistryUnsupported { .. }
            | Error::NotRunning { .. }
            | Error::UnknownBackend { .. } => ErrorKind::Precondition,
            Error::Timeout { .. } | Error::CommandTimeout { .. } => ErrorKind::Timeout,
            Error::ExternalTool { .. } | Error::Spawn { .. } | Error::Http { .. } => {
                ErrorKind::ExternalTool
            }
            Error::Io { .. }
            | Error::Json { .. }
            | Error::Yaml { .. }
            | Error::TomlParse { .. }
            | Error::TomlSerialize { .. }
            | Error::Render { .. }
            | Error::Phase { .. } => ErrorKind::Internal,
        }
    }

    /// Build a free-form phase error
    pub fn phase(message: impl Into<String>) -> Self {
        Error::Phase {
            message: message.into(),
        }
    }

    /// Attach a diagnostic dump to an external tool failure; other errors pass through
    #[must_use]
    pub fn with_diagnostics(self, dump: String) -> Self {
        match self {
            Error::ExternalTool {
                command,
                status,
                stderr,
                ..
            } => Error::ExternalTool {
                command,
                status,
                stderr,
                diagnostics: Some(dump),
            },
            other => other,
        }
    }

    /// Diagnostic output collected alongside the failure, if any
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Error::ExternalTool { diagnostics, .. } => diagnostics.as_deref(),
            _ => None,
        }
    }
}
