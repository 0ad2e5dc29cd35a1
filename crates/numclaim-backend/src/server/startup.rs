//! Bounded retry of the initial store connection.
//!
//! The connector is a small state machine:
//!
//! ```text
//! Connecting { attempt } --ok--------------------------> Ready(store)
//! Connecting { attempt } --err, attempt < max----------> Connecting { attempt + 1 }
//! Connecting { attempt } --err, attempt == max---------> Failed { attempts, last_error }
//! ```
//!
//! [`ConnectState::advance`] is the pure transition. [`connect_with_retry`]
//! drives it, sleeping a fixed delay between attempts through a
//! [`SleepProvider`] so tests can run without real time passing.

use crate::server::config::RetryPolicy;
use core::{fmt, time::Duration};

/// Abstracts over how to sleep between attempts.
pub trait SleepProvider {
    type Sleep: Future<Output = ()> + Send;

    fn sleep_for(dur: Duration) -> Self::Sleep;
}

/// [`SleepProvider`] backed by Tokio's timer.
pub struct TokioSleep;

impl SleepProvider for TokioSleep {
    type Sleep = tokio::time::Sleep;

    fn sleep_for(dur: Duration) -> Self::Sleep {
        tokio::time::sleep(dur)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConnectState<T> {
    /// About to make attempt number `attempt` (1-based).
    Connecting { attempt: u32 },
    Ready(T),
    Failed { attempts: u32, last_error: String },
}

impl<T> ConnectState<T> {
    pub const fn start() -> Self {
        Self::Connecting { attempt: 1 }
    }

    /// State after attempt number `attempt` finished with `outcome`.
    pub fn advance<E: fmt::Display>(attempt: u32, outcome: Result<T, E>, max_attempts: u32) -> Self {
        match outcome {
            Ok(value) => Self::Ready(value),
            Err(e) if attempt >= max_attempts => Self::Failed {
                attempts: attempt,
                last_error: e.to_string(),
            },
            Err(_) => Self::Connecting {
                attempt: attempt + 1,
            },
        }
    }
}

/// The retry budget was exhausted.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("could not connect to the store after {attempts} attempts: {last_error}")]
pub struct StartupError {
    pub attempts: u32,
    pub last_error: String,
}

/// Calls `connect` until it succeeds or `policy.max_attempts` attempts have
/// failed, sleeping `policy.delay` between attempts.
///
/// # Errors
///
/// Returns [`StartupError`] with the last failure once the budget is spent.
pub async fn connect_with_retry<S, T, E, F, Fut>(
    policy: RetryPolicy,
    mut connect: F,
) -> Result<T, StartupError>
where
    S: SleepProvider,
    E: fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut state = ConnectState::start();
    loop {
        state = match state {
            ConnectState::Connecting { attempt } => {
                tracing::info!(
                    "Attempt {attempt}/{} to connect to the store...",
                    policy.max_attempts
                );
                let outcome = connect(attempt).await;
                if let Err(e) = &outcome {
                    tracing::warn!("Store connection attempt {attempt} failed: {e}");
                }

                let next = ConnectState::advance(attempt, outcome, policy.max_attempts);
                if matches!(next, ConnectState::Connecting { .. }) {
                    tracing::info!("Retrying in {:?}", policy.delay);
                    S::sleep_for(policy.delay).await;
                }
                next
            }
            ConnectState::Ready(value) => {
                tracing::info!("Store connected");
                return Ok(value);
            }
            ConnectState::Failed {
                attempts,
                last_error,
            } => {
                tracing::error!("Max attempts reached, could not connect to the store");
                return Err(StartupError {
                    attempts,
                    last_error,
                });
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct NoSleep;

    impl SleepProvider for NoSleep {
        type Sleep = core::future::Ready<()>;

        fn sleep_for(_dur: Duration) -> Self::Sleep {
            core::future::ready(())
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_secs(5),
        }
    }

    #[test]
    fn transitions() {
        assert_eq!(
            ConnectState::advance(1, Ok::<_, &str>("pool"), 3),
            ConnectState::Ready("pool")
        );
        assert_eq!(
            ConnectState::advance(1, Err::<(), _>("refused"), 3),
            ConnectState::Connecting { attempt: 2 }
        );
        assert_eq!(
            ConnectState::advance(3, Err::<(), _>("refused"), 3),
            ConnectState::Failed {
                attempts: 3,
                last_error: "refused".to_string()
            }
        );
        // Success on the final attempt still counts.
        assert_eq!(
            ConnectState::advance(3, Ok::<_, &str>(7), 3),
            ConnectState::Ready(7)
        );
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);

        let value = connect_with_retry::<NoSleep, _, _, _, _>(policy(5), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(format!("refused on attempt {attempt}"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let calls = AtomicU32::new(0);

        let err = connect_with_retry::<NoSleep, (), _, _, _>(policy(4), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(format!("refused on attempt {attempt}")) }
        })
        .await
        .unwrap_err();

        assert_eq!(
            err,
            StartupError {
                attempts: 4,
                last_error: "refused on attempt 4".to_string()
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn single_attempt_never_sleeps() {
        let start = std::time::Instant::now();
        let err = connect_with_retry::<TokioSleep, (), _, _, _>(policy(1), |_| async {
            Err("refused")
        })
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
