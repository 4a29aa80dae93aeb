//! Backoff loop for provider fetches.

use marketsync_core::{ProviderError, RetryClass, RetrySettings};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// What the loop should do after one attempt.
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Success(T),
    /// Try again, after at least `after` when the provider asked for it.
    Retry {
        after: Option<Duration>,
        error: ProviderError,
    },
    GiveUp(ProviderError),
}

impl<T> AttemptOutcome<T> {
    /// Classify a fetch result.
    pub fn from_result(result: Result<T, ProviderError>) -> Self {
        match result {
            Ok(value) => AttemptOutcome::Success(value),
            Err(error) => match error.retry_class() {
                RetryClass::Never => AttemptOutcome::GiveUp(error),
                RetryClass::WithBackoff => AttemptOutcome::Retry { after: None, error },
                RetryClass::RetryAfter(wait) => AttemptOutcome::Retry {
                    after: Some(wait),
                    error,
                },
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    ladder: Vec<Duration>,
    max_attempts: u32,
    jitter_ratio: f64,
    retry_after_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        let ladder = if settings.ladder_ms.is_empty() {
            vec![Duration::from_secs(1)]
        } else {
            settings.ladder_ms.iter().map(|ms| Duration::from_millis(*ms)).collect()
        };
        Self {
            ladder,
            max_attempts: settings.max_attempts.max(1),
            jitter_ratio: settings.jitter_ratio.clamp(0.0, 1.0),
            retry_after_cap: Duration::from_secs(settings.retry_after_cap_secs),
        }
    }

    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            ladder: vec![Duration::ZERO],
            max_attempts: max_attempts.max(1),
            jitter_ratio: 0.0,
            retry_after_cap: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `retry` (0-based). A `Retry-After` hint wins
    /// over the ladder, capped.
    pub fn delay(&self, retry: u32, hint: Option<Duration>) -> Duration {
        if let Some(wait) = hint {
            return wait.min(self.retry_after_cap);
        }
        let idx = (retry as usize).min(self.ladder.len() - 1);
        let step = self.ladder[idx];
        if self.jitter_ratio <= 0.0 || step.is_zero() {
            return step;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter_ratio);
        step + step.mul_f64(extra)
    }

    /// Run `attempt` until it succeeds, gives up, or attempts run out. The
    /// last error is returned.
    pub async fn run<T, F, Fut>(&self, label: &str, mut attempt: F) -> Result<T, ProviderError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut n = 0;
        loop {
            n += 1;
            match AttemptOutcome::from_result(attempt(n).await) {
                AttemptOutcome::Success(value) => return Ok(value),
                AttemptOutcome::GiveUp(error) => {
                    tracing::warn!(label, attempt = n, error = %error, "Giving up, error is not retryable");
                    return Err(error);
                }
                AttemptOutcome::Retry { after, error } => {
                    if n >= self.max_attempts {
                        tracing::warn!(label, attempts = n, error = %error, "Retries exhausted");
                        return Err(error);
                    }
                    let delay = self.delay(n - 1, after);
                    tracing::info!(
                        label,
                        attempt = n,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
