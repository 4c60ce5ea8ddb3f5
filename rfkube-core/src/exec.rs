//! External process and HTTP seams
//!
//! Every interaction with cluster binaries, kubectl, helm or the container
//! runtime goes through [`CommandRunner`], and registry health checks go
//! through [`HttpProbe`]. The production implementations wrap `duct` and
//! `reqwest`; tests substitute scripted doubles.

use async_trait::async_trait;
use snafu::ResultExt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Error, HttpSnafu, Result};

/// Bound applied when neither the invocation nor the runner sets one
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(1800);

const EXIT_POLL: Duration = Duration::from_millis(20);

/// One external command, described as data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
    /// Needs root; the runner prefixes `sudo` when not already root
    pub privileged: bool,
    /// Values masked when the invocation is displayed or logged
    pub redact: Vec<String>,
    /// Kill the command after this long; the runner's default applies when unset
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Same as [`Invocation::new`] but run as root
    pub fn sudo<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            privileged: true,
            ..Self::new(program, args)
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.push((key.to_string(), value.into()));
        self
    }

    #[must_use]
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    #[must_use]
    pub fn redacting(mut self, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.redact.push(value);
        }
        self
    }

    /// Shell-like rendering with redacted values masked
    pub fn display(&self) -> String {
        let mut rendered = std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        for secret in &self.redact {
            rendered = rendered.replace(secret.as_str(), "****");
        }
        if self.privileged {
            format!("sudo {rendered}")
        } else {
            rendered
        }
    }

    /// True when `program` matches and every fragment appears in the argument list in order
    pub fn matches(&self, program: &str, fragments: &[&str]) -> bool {
        if self.program != program {
            return false;
        }
        let mut remaining = self.args.iter();
        fragments
            .iter()
            .all(|fragment| remaining.any(|arg| arg.contains(fragment)))
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Convert a non-zero exit into [`Error::ExternalTool`] carrying the tool's own output
    pub fn into_result(self, invocation: &Invocation) -> Result<CmdOutput> {
        if self.success() {
            return Ok(self);
        }
        let stderr = if self.stderr.trim().is_empty() {
            self.stdout.trim().to_string()
        } else {
            self.stderr.trim().to_string()
        };
        Err(Error::ExternalTool {
            command: invocation.display(),
            status: self.status,
            stderr,
            diagnostics: None,
        })
    }
}

/// Runs external commands to completion
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command; `Err` only when it could not be launched
    async fn run(&self, invocation: &Invocation) -> Result<CmdOutput>;

    /// Run the command and fail on a non-zero exit
    async fn run_checked(&self, invocation: &Invocation) -> Result<CmdOutput> {
        self.run(invocation).await?.into_result(invocation)
    }

    /// Exit-code predicate; launch failures count as `false`
    async fn succeeds(&self, invocation: &Invocation) -> bool {
        matches!(self.run(invocation).await, Ok(out) if out.success())
    }
}

/// Production runner backed by `duct`
///
/// Every command is bounded: it is killed when its timeout expires or when
/// the caller stops waiting for it (the future is dropped).
#[derive(Debug, Clone)]
pub struct DuctRunner {
    use_sudo: bool,
    default_timeout: Duration,
}

/// Child process that is killed unless it has been reaped
struct RunningChild {
    handle: duct::Handle,
    reaped: bool,
}

impl Drop for RunningChild {
    fn drop(&mut self) {
        if !self.reaped
            && let Err(e) = self.handle.kill()
        {
            warn!(error = %e, "could not kill abandoned command");
        }
    }
}

impl DuctRunner {
    /// Privileged invocations get `sudo` unless the process already runs as root
    pub fn new() -> Self {
        Self {
            use_sudo: !crate::host::is_root(),
            default_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.default_timeout = limit;
        self
    }

    fn argv(&self, invocation: &Invocation) -> (String, Vec<String>) {
        let needs_sudo = invocation.privileged && self.use_sudo;
        if !needs_sudo {
            return (invocation.program.clone(), invocation.args.clone());
        }
        // sudo resets the environment, so route variables through env(1)
        let mut args = Vec::with_capacity(invocation.args.len() + invocation.env.len() + 2);
        if !invocation.env.is_empty() {
            args.push("env".to_string());
            args.extend(invocation.env.iter().map(|(k, v)| format!("{k}={v}")));
        }
        args.push(invocation.program.clone());
        args.extend(invocation.args.iter().cloned());
        ("sudo".to_string(), args)
    }
}

impl Default for DuctRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for DuctRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CmdOutput> {
        debug!(command = %invocation.display(), "running external command");

        let (program, args) = self.argv(invocation);
        let mut expr = duct::cmd(program, args)
            .stdout_capture()
            .stderr_capture()
            .unchecked();
        for (key, value) in &invocation.env {
            expr = expr.env(key, value);
        }
        if let Some(input) = &invocation.stdin {
            expr = expr.stdin_bytes(input.clone());
        }

        let command = invocation.display();
        let limit = invocation.timeout.unwrap_or(self.default_timeout);
        let deadline = Instant::now() + limit;
        let mut child = RunningChild {
            handle: expr.start().map_err(|source| Error::Spawn {
                command: command.clone(),
                source,
            })?,
            reaped: false,
        };

        loop {
            let finished = child
                .handle
                .try_wait()
                .map_err(|source| Error::Spawn {
                    command: command.clone(),
                    source,
                })?
                .map(|output| CmdOutput {
                    status: output.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                });
            if let Some(output) = finished {
                child.reaped = true;
                return Ok(output);
            }
            if Instant::now() >= deadline {
                warn!(command = %command, timeout_s = limit.as_secs(), "killing command");
                return Err(Error::CommandTimeout {
                    command,
                    timeout: limit,
                });
            }
            tokio::time::sleep(EXIT_POLL).await;
        }
    }
}

/// Answers "what HTTP status does this URL return"
#[async_trait]
pub trait HttpProbe: Send + Sync {
    async fn status(&self, url: &str) -> Result<u16>;
}

/// Production probe backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestProbe {
    client: reqwest::Client,
}

impl ReqwestProbe {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context(HttpSnafu { url: "<client>" })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn status(&self, url: &str) -> Result<u16> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context(HttpSnafu { url })?;
        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn local_runner() -> DuctRunner {
        DuctRunner {
            use_sudo: false,
            default_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_display_masks_redacted_values() {
        let inv = Invocation::new("helm", ["--set-string", "secret=hunter2"]).redacting("hunter2");
        assert_eq!(inv.display(), "helm --set-string secret=****");
    }

    #[test]
    fn test_matches_fragments_in_order() {
        let inv = Invocation::new("kubectl", ["get", "nodes", "-o", "json"]);
        assert!(inv.matches("kubectl", &["get", "nodes"]));
        assert!(!inv.matches("kubectl", &["nodes", "get"]));
        assert!(!inv.matches("helm", &["get"]));
    }

    #[test]
    fn test_sudo_argv_routes_env_through_env_binary() {
        let runner = DuctRunner {
            use_sudo: true,
            default_timeout: DEFAULT_COMMAND_TIMEOUT,
        };
        let inv = Invocation::sudo("sh", ["-c", "true"]).env("K3S_KUBECONFIG_MODE", "644");
        let (program, args) = runner.argv(&inv);
        assert_eq!(program, "sudo");
        assert_eq!(args, vec!["env", "K3S_KUBECONFIG_MODE=644", "sh", "-c", "true"]);
    }

    #[test]
    fn test_into_result_prefers_stderr() {
        let inv = Invocation::new("kubectl", ["apply"]);
        let err = CmdOutput {
            status: 1,
            stdout: "partial".into(),
            stderr: "forbidden".into(),
        }
        .into_result(&inv)
        .unwrap_err();
        assert!(err.to_string().contains("forbidden"));
    }

    #[tokio::test]
    async fn test_duct_runner_captures_output() {
        let runner = local_runner();
        let out = runner
            .run(&Invocation::new("sh", ["-c", "echo ready; exit 3"]))
            .await
            .unwrap();
        assert_eq!(out.status, 3);
        assert_eq!(out.stdout.trim(), "ready");
    }

    #[tokio::test]
    async fn test_duct_runner_feeds_stdin() {
        let runner = local_runner();
        let out = runner
            .run(&Invocation::new("cat", Vec::<String>::new()).stdin("hosts.toml"))
            .await
            .unwrap();
        assert_eq!(out.stdout, "hosts.toml");
    }

    #[tokio::test]
    async fn test_command_past_its_timeout_is_killed() {
        let runner = local_runner().with_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = runner
            .run(&Invocation::new("sleep", ["5"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandTimeout { .. }));
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_invocation_timeout_overrides_runner_default() {
        let runner = local_runner().with_timeout(Duration::from_millis(100));
        let out = runner
            .run(&Invocation::new("sh", ["-c", "sleep 0.3; echo done"]).timeout(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "done");
    }

    #[tokio::test]
    async fn test_abandoned_command_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let script = format!("sleep 1; touch {}", marker.display());
        let runner = local_runner();

        let cut_off = tokio::time::timeout(
            Duration::from_millis(200),
            runner.run(&Invocation::new("sh", ["-c", script.as_str()])),
        )
        .await;
        assert!(cut_off.is_err());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }
}
