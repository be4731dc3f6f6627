//! Bounded retry with exponential backoff.
//!
//! Every retryable operation carries both an attempt budget and a deadline;
//! whichever runs out first terminates the loop. This keeps "no more time"
//! distinguishable from "no more attempts" at the call site.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Backoff policy for transient provider failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Fractional jitter applied to each delay (0.25 = ±25%).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given 1-based retry attempt, jittered.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis() as f64 * 2f64.powi(attempt.saturating_sub(1) as i32);
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::from_millis((exp * factor).max(0.0) as u64)
    }
}

/// Run `op` until it succeeds, fails permanently, or the budget runs out.
///
/// `is_transient` classifies errors; permanent errors return immediately.
/// When `deadline` is reached the most recent error is returned.
pub async fn retry<T, E, F, Fut>(
    policy: RetryPolicy,
    deadline: Option<Instant>,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !is_transient(&e) => return Err(e),
            Err(e) if attempt >= policy.max_attempts => return Err(e),
            Err(e) => {
                let delay = policy.delay_for(attempt);
                if let Some(deadline) = deadline {
                    if Instant::now() + delay >= deadline {
                        return Err(e);
                    }
                }
                tracing::debug!(attempt, ?delay, "transient failure, backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
