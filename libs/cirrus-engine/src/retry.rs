use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

/// Bounded fixed-delay retry policy for remote management calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay", rename = "delay_ms", with = "crate::config::millis")]
    pub delay: Duration,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_delay() -> Duration {
    Duration::from_millis(500)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay: default_delay(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    /// Single attempt, no sleeping. Handy for tests and dry runs.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

/// Run `op` until it succeeds or `policy.max_attempts` attempts are spent.
///
/// Sleeps `policy.delay` between attempts. Returns the last error.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts => {
                tracing::debug!(operation = %operation, attempt, error = %e, "attempt failed, retrying");
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::warn!(operation = %operation, attempts = max_attempts, error = %e, "giving up");
                return Err(e);
            }
        }
    }
}
