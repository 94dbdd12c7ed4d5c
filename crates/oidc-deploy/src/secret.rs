//! Secret value injection
//!
//! The secret container is reconciled like any other resource. Its value
//! takes this separate path: a version is written only when a non-empty
//! value is declared and it differs from the last known one. "Last known"
//! is the fingerprint of the last value this stack wrote, falling back to
//! the remote current version when the state store has no record. A value
//! rotated out of band therefore survives until the declared value changes.
//! A secret with no current value, such as one recreated after a destroy,
//! always gets the declared value.

use crate::error::DeployError;
use crate::model::{ResourceRef, Sensitive};
use crate::provider::{CloudProvider, ProviderError};
use crate::reconcile::{RetryPolicy, StepError, with_retry};
use crate::state::{DbPool, last_secret_fingerprint, record_secret_version};
use tracing::{debug, info};

/// What the injector did, or would do in a plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Injection {
    /// No value declared; the current version is left alone
    Skipped,
    /// The declared value is already the last known one
    Unchanged,
    /// A new version is written
    Written {
        /// No version was known before
        first: bool,
        /// `None` in a plan
        version_id: Option<String>,
    },
}

/// Whether `value` must be written given the last known fingerprint
pub fn needs_write(value: Option<&Sensitive>, last_known: Option<&str>) -> bool {
    match value {
        Some(v) if !v.is_empty() => last_known != Some(v.fingerprint().as_str()),
        _ => false,
    }
}

pub struct SecretInjector<'a, P> {
    provider: &'a P,
    pool: &'a DbPool,
    stack: &'a str,
    retry: RetryPolicy,
}

impl<'a, P: CloudProvider> SecretInjector<'a, P> {
    pub fn new(provider: &'a P, pool: &'a DbPool, stack: &'a str, retry: RetryPolicy) -> Self {
        Self {
            provider,
            pool,
            stack,
            retry,
        }
    }

    /// Fingerprint of the last value written by this stack, else of the
    /// remote current version
    ///
    /// A record only counts while the secret holds a value: a recreated
    /// secret starts empty and needs the value again.
    pub(crate) async fn last_known(
        &self,
        id: &ResourceRef,
        secret_id: &str,
    ) -> Result<Option<String>, StepError> {
        let current = with_retry(self.retry, id, "read secret value", || {
            self.provider.current_secret_version(secret_id)
        })
        .await;
        let current = match current {
            Ok(version) => version.map(|v| v.fingerprint),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };
        if current.is_none() {
            return Ok(None);
        }

        let recorded = last_secret_fingerprint(self.pool, self.stack, id)
            .await
            .map_err(DeployError::state)?;
        Ok(recorded.or(current))
    }

    /// One write attempt
    ///
    /// When the outcome is unknown the current version decides: if it
    /// already holds `value` the lost attempt took effect and is not
    /// repeated.
    async fn put_once(&self, secret_id: &str, value: &Sensitive) -> Result<String, ProviderError> {
        let error = match self.provider.put_secret_value(secret_id, value).await {
            Err(e) if e.is_ambiguous() => e,
            other => return other,
        };
        match self.provider.current_secret_version(secret_id).await {
            Ok(Some(current)) if current.fingerprint == value.fingerprint() => {
                debug!(
                    secret = %secret_id,
                    version_id = %current.version_id,
                    "Earlier write took effect"
                );
                Ok(current.version_id)
            }
            _ => Err(error),
        }
    }

    /// Write `value` to `secret_id` when needed
    ///
    /// Without a `run_id` nothing is written and the result describes what
    /// an apply would do.
    pub(crate) async fn inject(
        &self,
        id: &ResourceRef,
        secret_id: &str,
        value: Option<&Sensitive>,
        run_id: Option<&str>,
    ) -> Result<Injection, StepError> {
        let Some(value) = value.filter(|v| !v.is_empty()) else {
            debug!(resource = %id, "No secret value declared, keeping the current version");
            return Ok(Injection::Skipped);
        };

        let last_known = self.last_known(id, secret_id).await?;
        if !needs_write(Some(value), last_known.as_deref()) {
            debug!(resource = %id, "Secret value unchanged");
            return Ok(Injection::Unchanged);
        }
        let first = last_known.is_none();

        let Some(run_id) = run_id else {
            return Ok(Injection::Written {
                first,
                version_id: None,
            });
        };

        info!(resource = %id, first, "Writing new secret version");
        let version_id = with_retry(self.retry, id, "put secret value", || {
            self.put_once(secret_id, value)
        })
        .await?;
        record_secret_version(
            self.pool,
            self.stack,
            run_id,
            id,
            &value.fingerprint(),
            &version_id,
        )
        .await
        .map_err(DeployError::state)?;

        Ok(Injection::Written {
            first,
            version_id: Some(version_id),
        })
    }
}
