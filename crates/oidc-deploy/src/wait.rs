//! Resource waiting with exponential backoff.
//!
//! App Runner creates, updates and deletes services asynchronously; the
//! provider polls through [`wait_for_resource`] until the operation settles.
//! A wait belongs to an operation that was already sent, so it ends on its
//! own timeout and never on run cancellation.

use crate::provider::ProviderError;
use backon::{BackoffBuilder, ExponentialBuilder};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for resource waiting with exponential backoff.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Initial delay between checks
    pub initial_delay: Duration,
    /// Maximum delay between checks (cap for exponential growth)
    pub max_delay: Duration,
    /// Maximum total time to wait before timeout
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            timeout: Duration::from_secs(60),
        }
    }
}

impl WaitConfig {
    /// App Runner service operations take minutes
    pub fn apprunner() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            timeout: Duration::from_secs(20 * 60),
        }
    }
}

/// Wait for a resource to settle with exponential backoff.
///
/// `check` returns `Ok(true)` when ready and `Ok(false)` to poll again; an
/// error ends the wait. Running out of time ends it with
/// [`ProviderError::Timeout`].
pub async fn wait_for_resource<F, Fut>(
    config: WaitConfig,
    check: F,
    resource_name: &str,
) -> Result<(), ProviderError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<bool, ProviderError>>,
{
    let start = std::time::Instant::now();
    let mut attempts = 0u32;

    let mut delays = ExponentialBuilder::default()
        .with_min_delay(config.initial_delay)
        .with_max_delay(config.max_delay)
        .with_factor(2.0)
        .with_jitter()
        .build();

    loop {
        attempts += 1;

        if start.elapsed() >= config.timeout {
            return Err(ProviderError::Timeout(format!(
                "{resource_name} not ready after {:?} ({attempts} attempts)",
                config.timeout
            )));
        }

        match check().await {
            Ok(true) => {
                debug!(resource = %resource_name, attempts, "Resource ready");
                return Ok(());
            }
            Ok(false) => {
                let delay = delays.next().unwrap_or(config.max_delay);
                debug!(
                    resource = %resource_name,
                    attempt = attempts,
                    delay_ms = delay.as_millis(),
                    "Resource not ready, retrying"
                );

                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!(resource = %resource_name, error = ?e, "Resource check failed");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> WaitConfig {
        WaitConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_ready_after_polls() {
        let polls = AtomicU32::new(0);
        let counter = &polls;
        wait_for_resource(
            fast(),
            move || async move { Ok(counter.fetch_add(1, Ordering::SeqCst) >= 2) },
            "svc",
        )
        .await
        .unwrap();
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout() {
        let config = WaitConfig {
            timeout: Duration::from_millis(20),
            ..fast()
        };
        let err = wait_for_resource(config, || async { Ok(false) }, "svc")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_check_error_ends_wait() {
        let err = wait_for_resource(
            fast(),
            || async { Err(ProviderError::AccessDenied("no".into())) },
            "svc",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProviderError::AccessDenied(_)));
    }
}
