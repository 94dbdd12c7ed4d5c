//! Bounded retry of provider calls

use crate::model::ResourceRef;
use crate::provider::ProviderError;
use backon::{ExponentialBuilder, Retryable};
use oidc_deploy_common::defaults::DEFAULT_MAX_ATTEMPTS;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff for transient provider errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per call, including the first
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Millisecond delays, for tests
    pub fn fast(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
            .with_jitter()
    }
}

/// Run `call`, retrying transient failures under `policy`
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    resource: &ResourceRef,
    operation: &'static str,
    call: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    call.retry(policy.backoff())
        .when(ProviderError::is_transient)
        .notify(|e, dur| match e {
            ProviderError::PropagationDelay(_) => warn!(
                resource = %resource,
                operation,
                delay = ?dur,
                error = %e,
                "New IAM principal not yet visible, retrying..."
            ),
            ProviderError::Throttled => warn!(
                resource = %resource,
                operation,
                delay = ?dur,
                "AWS rate limited, backing off..."
            ),
            _ => warn!(
                resource = %resource,
                operation,
                delay = ?dur,
                error = %e,
                "Transient error, retrying..."
            ),
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use oidc_deploy_common::ResourceKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn target() -> ResourceRef {
        ResourceRef::new(ResourceKind::IamRole, "r")
    }

    #[tokio::test]
    async fn test_transient_errors_retried_until_success() {
        let attempts = AtomicU32::new(0);
        let result = with_retry(RetryPolicy::fast(5), &target(), "create", || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(ProviderError::Throttled)
            } else {
                Ok("done")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(RetryPolicy::fast(5), &target(), "create", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::InProgress("busy".into()))
        })
        .await;
        assert!(matches!(result, Err(ProviderError::InProgress(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_permanent_errors_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(RetryPolicy::fast(5), &target(), "create", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::AccessDenied("no".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
