//! Timeout-bounded readiness polling
//!
//! One primitive replaces every "wait for X" loop: cluster API, registry
//! `/v2/`, add-on rollouts, runtime pods. A check reports either
//! [`Check::Ready`] or [`Check::Pending`] with a short observation; the poller
//! never performs corrective action and returns a [`PollTimeout`] value once
//! the deadline passes.

use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, info};

use crate::error::Error;

/// Outcome of one readiness check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check<T> {
    Ready(T),
    /// Not ready yet; carries what was observed
    Pending(String),
}

/// What to wait for and for how long
#[derive(Debug, Clone)]
pub struct PollSpec {
    pub description: String,
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSpec {
    pub fn new(description: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        Self {
            description: description.into(),
            interval,
            timeout,
        }
    }
}

/// The deadline passed before the check held
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTimeout {
    pub description: String,
    pub timeout: Duration,
    pub attempts: u32,
    pub last_observation: Option<String>,
}

impl From<PollTimeout> for Error {
    fn from(t: PollTimeout) -> Self {
        Error::Timeout {
            what: t.description,
            timeout: t.timeout,
            last_status: t.last_observation,
        }
    }
}

/// Evaluate `check` every `spec.interval` until it is ready or `spec.timeout` elapses.
///
/// Returns as soon as the check first reports ready. A single evaluation that
/// hangs is cut off one interval past the deadline, so the call always
/// returns within `timeout + interval`.
pub async fn poll_until<T, F, Fut>(spec: &PollSpec, mut check: F) -> Result<T, PollTimeout>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Check<T>>,
{
    let started = Instant::now();
    let deadline = started + spec.timeout;
    let hard_stop = deadline + spec.interval;
    let mut attempts = 0u32;
    let mut last_observation: Option<String>;

    info!(what = %spec.description, timeout_s = spec.timeout.as_secs(), "waiting");

    loop {
        attempts += 1;
        match timeout_at(hard_stop, check()).await {
            Ok(Check::Ready(value)) => {
                info!(
                    what = %spec.description,
                    attempts,
                    elapsed_ms = started.elapsed().as_millis(),
                    "ready"
                );
                return Ok(value);
            }
            Ok(Check::Pending(observation)) => {
                debug!(what = %spec.description, attempts, %observation, "not ready yet");
                last_observation = Some(observation);
            }
            Err(_) => {
                last_observation = Some("readiness check did not return".to_string());
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(PollTimeout {
                description: spec.description.clone(),
                timeout: spec.timeout,
                attempts,
                last_observation,
            });
        }
        sleep(spec.interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn spec(interval_ms: u64, timeout_ms: u64) -> PollSpec {
        PollSpec::new(
            "test condition",
            Duration::from_millis(interval_ms),
            Duration::from_millis(timeout_ms),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_on_first_success() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let result = poll_until(&spec(100, 1_000), || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Check::Pending("starting".into())
                } else {
                    Check::Ready(42)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_ready_times_out_within_bound() {
        let started = Instant::now();
        let result: Result<(), _> = poll_until(&spec(50, 200), || async {
            Check::Pending("still waiting".into())
        })
        .await;
        let elapsed = started.elapsed();

        let timeout = result.unwrap_err();
        assert_eq!(timeout.last_observation.as_deref(), Some("still waiting"));
        assert!(timeout.attempts >= 4);
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed <= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_check_is_cut_off() {
        let started = Instant::now();
        let result: Result<(), _> = poll_until(&spec(50, 200), || async {
            std::future::pending::<Check<()>>().await
        })
        .await;
        let timeout = result.unwrap_err();
        assert!(started.elapsed() <= Duration::from_millis(250));
        assert_eq!(
            timeout.last_observation.as_deref(),
            Some("readiness check did not return")
        );
    }

    #[test]
    fn test_timeout_converts_into_error() {
        let err: Error = PollTimeout {
            description: "registry /v2/".into(),
            timeout: Duration::from_secs(120),
            attempts: 24,
            last_observation: Some("HTTP 502".into()),
        }
        .into();
        assert_eq!(err.kind(), crate::ErrorKind::Timeout);
    }
}
