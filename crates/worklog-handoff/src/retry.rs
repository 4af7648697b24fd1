use std::time::{Duration, Instant};

use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, warn};
use worklog_config::RetryConfig;
use worklog_core::{RowId, WorklogError};
use worklog_store::{Statement, WorklogStore};

/// Anything that can apply a [`Statement`]. The store is the real one; tests
/// substitute executors that fail on demand.
pub trait StatementExecutor {
    fn execute(&self, statement: &Statement) -> worklog_core::Result<Option<RowId>>;
}

impl StatementExecutor for WorklogStore {
    fn execute(&self, statement: &Statement) -> worklog_core::Result<Option<RowId>> {
        WorklogStore::execute(self, statement)
    }
}

impl<T: StatementExecutor + ?Sized> StatementExecutor for &T {
    fn execute(&self, statement: &Statement) -> worklog_core::Result<Option<RowId>> {
        (**self).execute(statement)
    }
}

impl<T: StatementExecutor + ?Sized> StatementExecutor for std::sync::Arc<T> {
    fn execute(&self, statement: &Statement) -> worklog_core::Result<Option<RowId>> {
        (**self).execute(statement)
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    /// Cap on total time spent; no attempt starts after it.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_min: Duration::from_secs(5),
            backoff_max: Duration::from_secs(10),
            deadline: None,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff_min: config.backoff_min(),
            backoff_max: config.backoff_max(),
            deadline: config.deadline(),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts (tests).
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_min: Duration::ZERO,
            backoff_max: Duration::ZERO,
            deadline: None,
        }
    }

    /// A delay drawn uniformly from `[backoff_min, backoff_max]`.
    pub fn next_delay(&self) -> Duration {
        let (lo, hi) = if self.backoff_min <= self.backoff_max {
            (self.backoff_min, self.backoff_max)
        } else {
            (self.backoff_max, self.backoff_min)
        };
        lo + (hi - lo).mul_f64(rand::random::<f64>())
    }
}

/// The write did not go through.
#[derive(Debug)]
pub struct AttemptError {
    pub attempts: u32,
    pub error: WorklogError,
}

/// Run a synchronous database call from async code. On a multi-thread runtime
/// the worker is handed off for the duration, so a busy wait on a locked
/// database does not stall other tasks. A current-thread runtime has nothing
/// to hand off to and runs the call in place.
pub(crate) fn run_blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// Execute `statement`, retrying only errors that may clear up on their own
/// (lock contention, an unreachable share). Other errors return at once.
pub async fn write_with_retry<E: StatementExecutor + ?Sized>(
    executor: &E,
    statement: &Statement,
    policy: &RetryPolicy,
) -> Result<Option<RowId>, AttemptError> {
    let started = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match run_blocking(|| executor.execute(statement)) {
            Ok(id) => {
                if attempt > 1 {
                    debug!(attempt, "write succeeded after retry");
                }
                return Ok(id);
            }
            Err(error) if !error.is_retryable() => {
                return Err(AttemptError {
                    attempts: attempt,
                    error,
                });
            }
            Err(error) => {
                if attempt >= max_attempts {
                    warn!(attempt, error = %error, "write failed, attempts exhausted");
                    return Err(AttemptError {
                        attempts: attempt,
                        error,
                    });
                }
                let delay = policy.next_delay();
                if let Some(deadline) = policy.deadline {
                    if started.elapsed() + delay >= deadline {
                        warn!(attempt, error = %error, "write failed, retry deadline reached");
                        return Err(AttemptError {
                            attempts: attempt,
                            error,
                        });
                    }
                }
                warn!(attempt, ?delay, error = %error, "write failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
