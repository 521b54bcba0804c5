use tokio::time::{sleep, Duration};
use tracing::{error, warn};

use crate::cache::error::CacheError;
use crate::config::settings::RetryConfig;

/// Caller-side retry around credential reads.
///
/// The cache never retries a failed refresh on its own; a collaborator that
/// wants retries wraps `get_value` with this.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { attempts: 3, base_delay_ms: 200, max_delay_ms: 1000 }
    }
}

impl RetrySettings {
    pub fn from_config(retry: Option<&RetryConfig>) -> Self {
        let defaults = Self::default();
        Self {
            attempts: retry.and_then(|r| r.attempts).unwrap_or(defaults.attempts).max(1),
            base_delay_ms: retry.and_then(|r| r.base_delay_ms).unwrap_or(defaults.base_delay_ms),
            max_delay_ms: retry.and_then(|r| r.max_delay_ms).unwrap_or(defaults.max_delay_ms),
        }
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempts are used up.
    pub async fn run_with_retry<F, Fut, T>(&self, mut operation: F) -> Result<T, CacheError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, CacheError>>,
    {
        let attempts = self.attempts.max(1);
        let mut delay = self.base_delay_ms.min(self.max_delay_ms);
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        credential = e.credential(),
                        "Attempt {attempt}/{} failed: {e}",
                        attempts
                    );
                    sleep(Duration::from_millis(delay)).await;
                    delay = delay.saturating_mul(2).min(self.max_delay_ms);
                    attempt += 1;
                }
                Err(e) => {
                    error!(credential = e.credential(), "giving up after {attempt} attempts: {e}");
                    return Err(e);
                }
            }
        }
    }
}
