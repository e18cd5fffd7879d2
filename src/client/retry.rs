use crate::client::error::QueryError;
use crate::client::loki::{LogEntry, QueryBackend};
use crate::config::types::Endpoint;
use crate::timerange::TimeWindow;
use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;
use tracing::warn;

/// Exponential backoff with jitter, capped, with a raised floor for
/// rate-limit responses.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub rate_limit_floor: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            rate_limit_floor: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`: `base * 2^attempt`,
    /// capped, with ±25% jitter to avoid synchronized retry storms
    /// against the same endpoint.
    pub fn delay_for(&self, error: &QueryError, attempt: u32) -> Duration {
        let exponential = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        let capped = std::cmp::min(exponential, self.max_delay);
        let jittered = apply_jitter(capped);

        if let QueryError::RateLimited { retry_after, .. } = error {
            let floor = retry_after.unwrap_or(self.rate_limit_floor);
            return std::cmp::max(jittered, floor);
        }
        jittered
    }
}

fn apply_jitter(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.75..=1.25);
    delay.mul_f64(factor)
}

/// Terminal failure of one task: the last error observed and whether the
/// retry budget was actually spent getting there.
#[derive(Debug)]
pub struct TaskFailure {
    pub error: QueryError,
    pub retries_exhausted: bool,
}

/// Resolves when the cancellation flag is set. Never resolves if the
/// sender is dropped without cancelling.
pub async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Execute one query, retrying transient failures per policy.
///
/// Cancellation is honored between attempts: an in-flight request runs to
/// its own completion or timeout, but no new attempt starts after the
/// flag is set.
pub async fn query_with_retry(
    backend: &dyn QueryBackend,
    policy: &RetryPolicy,
    endpoint: &Endpoint,
    query: &str,
    window: &TimeWindow,
    limit: usize,
    cancel: &mut watch::Receiver<bool>,
) -> Result<Vec<LogEntry>, TaskFailure> {
    let mut attempt: u32 = 0;

    loop {
        match backend.query_range(endpoint, query, window, limit).await {
            Ok(entries) => return Ok(entries),
            Err(error) if !error.is_retryable() => {
                return Err(TaskFailure {
                    error,
                    retries_exhausted: false,
                });
            }
            Err(error) => {
                if attempt >= policy.max_retries {
                    warn!(
                        endpoint = %endpoint.name,
                        window = %window,
                        attempts = attempt + 1,
                        error = %error,
                        "Retries exhausted"
                    );
                    return Err(TaskFailure {
                        error,
                        retries_exhausted: true,
                    });
                }

                let delay = policy.delay_for(&error, attempt);
                warn!(
                    endpoint = %endpoint.name,
                    window = %window,
                    attempt = attempt + 1,
                    backoff_ms = delay.as_millis() as u64,
                    error = %error,
                    "Query failed, retrying"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = wait_cancelled(cancel) => {
                        return Err(TaskFailure {
                            error,
                            retries_exhausted: false,
                        });
                    }
                }
                attempt += 1;
            }
        }
    }
}
