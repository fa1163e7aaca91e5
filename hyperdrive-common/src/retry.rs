//! Backoff schedule and bounded waits for adapter calls.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryPolicy;
use crate::error::{HdResult, HyperDriveError};

impl RetryPolicy {
    /// Delay to sleep after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let raw = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Runs `fut` with an upper bound, mapping expiry to a `Timeout` error.
pub async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> HdResult<T>
where
    F: Future<Output = HdResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(HyperDriveError::timeout(format!(
            "{what} did not complete within {}ms",
            limit.as_millis()
        ))),
    }
}
