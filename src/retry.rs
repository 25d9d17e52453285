use std::future::Future;
use std::time::Duration;
use tracing::warn;

const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Bounded exponential back-off for flaky network calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay: MAX_RETRY_DELAY,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}

/// Calls `f` until it succeeds, `should_retry` rejects the error, or the policy
/// runs out of attempts. The last error is returned.
pub async fn with_retries<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    should_retry: R,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 < policy.max_attempts && should_retry(&e) => {
                let delay = policy.delay_for(attempt);
                warn!(error = %e, ?delay, attempt = attempt + 1, "request failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
