//! Bounded fixed-interval polling.
//!
//! Drives a fetch closure until the fetched status is terminal or the
//! attempt budget runs out. Used for both challenge and order waits.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How often and how many times to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub interval_ms: u64,
    pub max_attempts: u32,
}

impl PollPolicy {
    /// Millisecond resolution; intervals beyond `u64::MAX` ms saturate.
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            max_attempts,
        }
    }

    /// 2 s between attempts, 5 attempts.
    pub fn challenge_default() -> Self {
        Self {
            interval_ms: 2_000,
            max_attempts: 5,
        }
    }

    /// 3 s between attempts, 10 attempts.
    pub fn order_default() -> Self {
        Self {
            interval_ms: 3_000,
            max_attempts: 10,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Terminal outcome of a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Polled<S> {
    Succeeded(S),
    Failed(S),
}

/// Polling stopped without reaching a terminal status.
#[derive(Debug)]
pub enum PollError<S, E> {
    /// Attempts exhausted. `last_status` is `None` only when `max_attempts` is 0.
    Timeout { last_status: Option<S>, attempts: u32 },
    /// The fetch itself failed.
    Fetch(E),
}

impl<S: fmt::Debug, E: fmt::Display> fmt::Display for PollError<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollError::Timeout {
                last_status,
                attempts,
            } => write!(
                f,
                "no terminal status after {} attempts (last: {:?})",
                attempts, last_status
            ),
            PollError::Fetch(e) => write!(f, "poll fetch failed: {}", e),
        }
    }
}

impl<S, E> std::error::Error for PollError<S, E>
where
    S: fmt::Debug,
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PollError::Fetch(e) => Some(e),
            PollError::Timeout { .. } => None,
        }
    }
}

/// Call `fetch` until `is_terminal` holds, at most `policy.max_attempts` times.
///
/// Sleeps `policy.interval()` between attempts, never after the last one.
pub async fn poll_until<S, E, F, Fut>(
    mut fetch: F,
    is_terminal: impl Fn(&S) -> bool,
    is_success: impl Fn(&S) -> bool,
    policy: &PollPolicy,
) -> Result<Polled<S>, PollError<S, E>>
where
    S: fmt::Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<S, E>>,
{
    let mut last_status = None;

    for attempt in 1..=policy.max_attempts {
        let status = fetch().await.map_err(PollError::Fetch)?;
        tracing::debug!(
            attempt,
            max_attempts = policy.max_attempts,
            status = ?status,
            "Poll attempt"
        );

        if is_terminal(&status) {
            return Ok(if is_success(&status) {
                Polled::Succeeded(status)
            } else {
                Polled::Failed(status)
            });
        }

        last_status = Some(status);
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval()).await;
        }
    }

    Err(PollError::Timeout {
        last_status,
        attempts: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Step {
        Pending,
        Valid,
        Invalid,
    }

    fn terminal(s: &Step) -> bool {
        matches!(s, Step::Valid | Step::Invalid)
    }

    fn success(s: &Step) -> bool {
        *s == Step::Valid
    }

    fn instant(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            interval_ms: 0,
            max_attempts,
        }
    }

    #[tokio::test]
    async fn test_success_on_third_call() {
        let calls = &AtomicU32::new(0);
        let result = poll_until(
            || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok::<_, String>(if n == 3 { Step::Valid } else { Step::Pending })
            },
            terminal,
            success,
            &instant(5),
        )
        .await
        .unwrap();

        assert_eq!(result, Polled::Succeeded(Step::Valid));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_never_terminal_times_out() {
        let calls = &AtomicU32::new(0);
        let err = poll_until(
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(Step::Pending)
            },
            terminal,
            success,
            &instant(3),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            PollError::Timeout {
                last_status: Some(Step::Pending),
                attempts: 3
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failure_stops_immediately() {
        let calls = &AtomicU32::new(0);
        let result = poll_until(
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(Step::Invalid)
            },
            terminal,
            success,
            &instant(5),
        )
        .await
        .unwrap();

        assert_eq!(result, Polled::Failed(Step::Invalid));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_error_aborts() {
        let calls = &AtomicU32::new(0);
        let err = poll_until(
            || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 2 {
                    Err("connection reset".to_string())
                } else {
                    Ok(Step::Pending)
                }
            },
            terminal,
            success,
            &instant(5),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PollError::Fetch(ref e) if e == "connection reset"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_attempts_never_fetches() {
        let calls = &AtomicU32::new(0);
        let err = poll_until(
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(Step::Valid)
            },
            terminal,
            success,
            &instant(0),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PollError::Timeout { last_status: None, attempts: 0 }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_sleep_after_last_attempt() {
        let policy = PollPolicy::new(Duration::from_millis(200), 2);
        let start = std::time::Instant::now();
        let _ = poll_until(
            || async move { Ok::<_, String>(Step::Pending) },
            terminal,
            success,
            &policy,
        )
        .await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(400), "slept after final attempt: {:?}", elapsed);
    }

    #[test]
    fn test_default_policies() {
        let challenge = PollPolicy::challenge_default();
        assert_eq!(challenge.interval(), Duration::from_secs(2));
        assert_eq!(challenge.max_attempts, 5);

        let order = PollPolicy::order_default();
        assert_eq!(order.interval(), Duration::from_secs(3));
        assert_eq!(order.max_attempts, 10);
    }

    #[test]
    fn test_oversized_interval_saturates() {
        let policy = PollPolicy::new(Duration::MAX, 1);
        assert_eq!(policy.interval_ms, u64::MAX);
        assert_eq!(PollPolicy::new(Duration::from_millis(1500), 1).interval_ms, 1500);
    }
}
