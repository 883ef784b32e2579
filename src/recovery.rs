use crate::config::RetryConfig;
use crate::error::UploadError;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Recovery action to take after a failed protocol step
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// Retry after a delay
    RetryAfterDelay(Duration),
    /// Surface the error to the caller
    GiveUp,
}

/// Bounded retry policy with optional exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first failure
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Whether to use exponential backoff
    pub exponential_backoff: bool,
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            exponential_backoff: false,
        }
    }

    /// Calculate delay for retry with exponential backoff
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        if !self.exponential_backoff {
            return self.base_delay;
        }

        let factor = 2_u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            exponential_backoff: config.exponential_backoff,
        }
    }
}

/// Tracks retry attempts per protocol step
pub struct RecoveryManager {
    policy: RetryPolicy,
    retry_counts: HashMap<String, u32>,
}

impl RecoveryManager {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            retry_counts: HashMap::new(),
        }
    }

    /// Determine recovery action for an error
    pub fn handle_error(&mut self, step: &str, error: &UploadError) -> RecoveryAction {
        if !error.is_retryable() {
            debug!("Non-retryable error during {}: {}", step, error);
            return RecoveryAction::GiveUp;
        }

        let retry_count = self.get_retry_count(step);
        if retry_count >= self.policy.max_retries {
            if self.policy.max_retries > 0 {
                error!(
                    "Maximum retries ({}) exceeded for {}: {}",
                    self.policy.max_retries, step, error
                );
            }
            return RecoveryAction::GiveUp;
        }

        self.retry_counts.insert(step.to_string(), retry_count + 1);
        let delay = self.policy.delay_for(retry_count);

        info!(
            "Retrying {} (attempt {}/{}) in {:?}: {}",
            step,
            retry_count + 1,
            self.policy.max_retries,
            delay,
            error
        );

        RecoveryAction::RetryAfterDelay(delay)
    }

    /// Reset retry count for a step after success
    pub fn reset_retry_count(&mut self, step: &str) {
        self.retry_counts.remove(step);
    }

    /// Get current retry count for a step
    pub fn get_retry_count(&self, step: &str) -> u32 {
        self.retry_counts.get(step).copied().unwrap_or(0)
    }
}

/// Run one protocol step under the retry policy.
///
/// The backoff sleep is interrupted by cancellation, in which case
/// `UploadError::Cancelled` is returned.
pub async fn retry_step<T, F, Fut>(
    policy: &RetryPolicy,
    step: &str,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, UploadError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UploadError>>,
{
    let mut manager = RecoveryManager::new(policy.clone());

    loop {
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        match operation().await {
            Ok(value) => {
                manager.reset_retry_count(step);
                return Ok(value);
            }
            Err(err) => match manager.handle_error(step, &err) {
                RecoveryAction::RetryAfterDelay(delay) => {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            warn!("Cancelled while waiting to retry {}", step);
                            return Err(UploadError::Cancelled);
                        }
                        _ = sleep(delay) => {}
                    }
                }
                RecoveryAction::GiveUp => return Err(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            exponential_backoff: true,
        }
    }

    fn transfer_error() -> UploadError {
        UploadError::PartTransferFailed {
            part_number: 1,
            details: "503".to_string(),
        }
    }

    #[test]
    fn test_backoff_delays() {
        let policy = policy(5);
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for(40), Duration::from_millis(350));

        let flat = RetryPolicy {
            exponential_backoff: false,
            ..policy
        };
        assert_eq!(flat.delay_for(3), Duration::from_millis(100));
    }

    #[test]
    fn test_recovery_manager_retry_logic() {
        let mut manager = RecoveryManager::new(policy(2));
        let error = transfer_error();

        assert!(matches!(
            manager.handle_error("transfer", &error),
            RecoveryAction::RetryAfterDelay(_)
        ));
        assert!(matches!(
            manager.handle_error("transfer", &error),
            RecoveryAction::RetryAfterDelay(_)
        ));
        assert_eq!(manager.get_retry_count("transfer"), 2);
        assert_eq!(
            manager.handle_error("transfer", &error),
            RecoveryAction::GiveUp
        );

        manager.reset_retry_count("transfer");
        assert_eq!(manager.get_retry_count("transfer"), 0);

        assert_eq!(
            manager.handle_error("finalize", &UploadError::Cancelled),
            RecoveryAction::GiveUp
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_step_recovers() {
        let attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let counter = Arc::clone(&attempts);
        let result = retry_step(&policy(3), "transfer", &cancel, || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transfer_error())
                } else {
                    Ok("etag")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "etag");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_step_without_retries_surfaces_first_error() {
        let attempts = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: Result<(), UploadError> =
            retry_step(&RetryPolicy::none(), "transfer", &cancel, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(transfer_error()) }
            })
            .await;

        assert_eq!(result.unwrap_err(), transfer_error());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_step_respects_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), UploadError> =
            retry_step(&policy(3), "register", &cancel, || async { Ok(()) }).await;
        assert_eq!(result.unwrap_err(), UploadError::Cancelled);
    }
}
