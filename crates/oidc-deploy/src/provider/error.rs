//! Provider error classification
//!
//! AWS SDK errors are classified by their error code (`.code()` from
//! `ProvideErrorMetadata`), not by string matching on Debug output. The
//! reconciler only needs to know whether to retry, whether a resource is
//! simply gone, and what to tell the operator.

use aws_sdk_iam::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use thiserror::Error;

/// Provider error categories for retry and reconcile logic
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Resource was not found (safe to skip on delete)
    #[error("Resource not found: {resource_type} '{resource_id}'")]
    NotFound {
        resource_type: &'static str,
        resource_id: String,
    },

    /// Resource already exists
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// Rate limit exceeded (retryable with backoff)
    #[error("Rate limit exceeded")]
    Throttled,

    /// A new principal or role is not yet visible to the consuming service (retryable)
    #[error("Not yet visible to the consuming service (eventual consistency): {0}")]
    PropagationDelay(String),

    /// Another operation on the resource is still running (retryable)
    #[error("Operation in progress: {0}")]
    InProgress(String),

    /// Network dispatch failure or timeout (retryable)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed policy document or invalid parameter
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Credentials lack the required permission
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// A resource did not settle in time, or the wait was cancelled
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The provider cannot perform this operation on this kind
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Generic AWS SDK error with code and message
    #[error("AWS error: {message}")]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

impl ProviderError {
    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound { .. })
    }

    /// Check if this is an "already exists" error
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ProviderError::AlreadyExists(_))
    }

    /// Check if retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Throttled
                | ProviderError::PropagationDelay(_)
                | ProviderError::InProgress(_)
                | ProviderError::Transport(_)
        )
    }

    /// Check if the request may have taken effect even though it failed
    ///
    /// A dispatch failure or timeout leaves the outcome unknown, so a retry
    /// of a non-idempotent call can find its own earlier write.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, ProviderError::Transport(_))
    }

    pub fn not_found(resource_type: &'static str, resource_id: impl Into<String>) -> Self {
        ProviderError::NotFound {
            resource_type,
            resource_id: resource_id.into(),
        }
    }

    /// Error for a provider response missing a field the engine needs
    pub fn missing(what: &str) -> Self {
        ProviderError::Sdk {
            code: None,
            message: format!("response is missing {what}"),
        }
    }

    /// Get a user-friendly suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            ProviderError::Sdk { code: Some(c), .. } => suggestion_for_code(c),
            ProviderError::AccessDenied(_) => suggestion_for_code("AccessDenied"),
            ProviderError::InvalidDocument(_) => suggestion_for_code("MalformedPolicyDocument"),
            ProviderError::Throttled => suggestion_for_code("Throttling"),
            _ => None,
        }
    }
}

/// Known AWS error codes for "not found" conditions
const NOT_FOUND_CODES: &[&str] = &[
    "NoSuchEntity",
    "RepositoryNotFoundException",
    "ResourceNotFoundException",
];

/// Known AWS error codes for "already exists" conditions
const ALREADY_EXISTS_CODES: &[&str] = &[
    "EntityAlreadyExists",
    "RepositoryAlreadyExistsException",
    "ResourceExistsException",
];

/// Known AWS error codes for throttling/rate limiting
const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
];

/// Known AWS error codes for concurrent modification
const IN_PROGRESS_CODES: &[&str] = &[
    "ConcurrentModification",
    "ConcurrentModificationException",
    "InvalidStateException",
];

/// Known AWS error codes for authorization failures
const ACCESS_DENIED_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "UnauthorizedOperation",
];

/// Classify an AWS SDK error using the error code.
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>) -> ProviderError {
    let message = message.unwrap_or("Unknown error").to_string();

    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => ProviderError::NotFound {
            resource_type: "resource",
            resource_id: message,
        },
        Some(c) if ALREADY_EXISTS_CODES.contains(&c) => ProviderError::AlreadyExists(message),
        Some(c) if THROTTLING_CODES.contains(&c) => ProviderError::Throttled,
        Some(c) if IN_PROGRESS_CODES.contains(&c) => ProviderError::InProgress(message),
        Some(c) if ACCESS_DENIED_CODES.contains(&c) => ProviderError::AccessDenied(message),
        // A freshly created OIDC provider or role is not yet a valid principal
        Some("MalformedPolicyDocument") if message.contains("Invalid principal") => {
            ProviderError::PropagationDelay(message)
        }
        Some("MalformedPolicyDocument") => ProviderError::InvalidDocument(message),
        Some("InvalidRequestException") if is_apprunner_role_delay(&message) => {
            ProviderError::PropagationDelay(message)
        }
        Some("InvalidRequestException") if message.contains("OPERATION_IN_PROGRESS") => {
            ProviderError::InProgress(message)
        }
        Some("InvalidParameterException")
        | Some("InvalidParameterValue")
        | Some("ValidationError") => {
            ProviderError::InvalidDocument(message)
        }
        _ => ProviderError::Sdk {
            code: code.map(|s| s.to_string()),
            message,
        },
    }
}

/// App Runner rejects roles it cannot assume yet
fn is_apprunner_role_delay(message: &str) -> bool {
    message.contains("Error in assuming instance role")
        || message.contains("Error in assuming access role")
}

/// Classify an error returned by any AWS SDK client.
///
/// Dispatch failures and timeouts never reached the service and are always
/// transient; everything else is classified by its error code.
pub fn from_sdk_error<E, R>(err: SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
            ProviderError::Transport(DisplayErrorContext(&err).to_string())
        }
        _ => {
            let message = err
                .message()
                .map(str::to_string)
                .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
            classify_aws_error(err.code(), Some(&message))
        }
    }
}

/// Error code to user-friendly suggestion mapping
const SUGGESTIONS: &[(&str, &str)] = &[
    (
        "AccessDenied",
        "Check that the credentials in use may manage IAM, ECR, Secrets Manager and App Runner.",
    ),
    (
        "AccessDeniedException",
        "Check that the credentials in use may manage IAM, ECR, Secrets Manager and App Runner.",
    ),
    (
        "MalformedPolicyDocument",
        "A policy document was rejected. Check the org/repo values substituted into the trust policy.",
    ),
    (
        "LimitExceeded",
        "An IAM quota was hit. Remove unused policy versions or request a limit increase.",
    ),
    (
        "LimitExceededException",
        "A service quota was hit. Request a limit increase via the Service Quotas console.",
    ),
    (
        "ServiceQuotaExceededException",
        "A service quota was hit. Request a limit increase via the Service Quotas console.",
    ),
    (
        "InvalidRequestException",
        "If the secret is scheduled for deletion, restore it or wait for the recovery window to end.",
    ),
    (
        "Throttling",
        "AWS API rate limit hit. The operation will be retried automatically.",
    ),
    (
        "ThrottlingException",
        "AWS API rate limit hit. The operation will be retried automatically.",
    ),
    (
        "ExpiredToken",
        "AWS credentials have expired. Refresh them and re-run.",
    ),
];

/// Get a user-friendly suggestion for a known error code.
fn suggestion_for_code(code: &str) -> Option<String> {
    SUGGESTIONS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, s)| (*s).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_codes() {
        for code in NOT_FOUND_CODES {
            let err = classify_aws_error(Some(code), Some("some message"));
            assert!(err.is_not_found(), "Expected NotFound for code: {code}");
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn already_exists_codes() {
        for code in ALREADY_EXISTS_CODES {
            let err = classify_aws_error(Some(code), Some("msg"));
            assert!(
                err.is_already_exists(),
                "Expected AlreadyExists for code: {code}"
            );
        }
    }

    #[test]
    fn throttling_codes() {
        for code in THROTTLING_CODES {
            let err = classify_aws_error(Some(code), Some("msg"));
            assert!(err.is_transient(), "Expected transient for code: {code}");
            assert!(matches!(err, ProviderError::Throttled));
        }
    }

    #[test]
    fn in_progress_codes_are_transient() {
        for code in IN_PROGRESS_CODES {
            assert!(classify_aws_error(Some(code), Some("busy")).is_transient());
        }
        let err = classify_aws_error(
            Some("InvalidRequestException"),
            Some("Service cannot be updated in the current state: OPERATION_IN_PROGRESS"),
        );
        assert!(matches!(err, ProviderError::InProgress(_)));
    }

    #[test]
    fn principal_propagation_is_transient() {
        let err = classify_aws_error(
            Some("MalformedPolicyDocument"),
            Some("Invalid principal in policy: \"AWS\":\"arn:aws:iam::1:role/new\""),
        );
        assert!(matches!(err, ProviderError::PropagationDelay(_)));
        assert!(err.is_transient());

        let err = classify_aws_error(
            Some("InvalidRequestException"),
            Some("Error in assuming instance role arn:aws:iam::1:role/x"),
        );
        assert!(err.is_transient());
    }

    #[test]
    fn permanent_errors() {
        let err =
            classify_aws_error(Some("MalformedPolicyDocument"), Some("Syntax errors in policy"));
        assert!(matches!(err, ProviderError::InvalidDocument(_)));
        assert!(!err.is_transient());

        for code in ACCESS_DENIED_CODES {
            let err = classify_aws_error(Some(code), Some("not authorized"));
            assert!(matches!(err, ProviderError::AccessDenied(_)));
            assert!(!err.is_transient());
            assert!(err.suggestion().is_some());
        }
    }

    #[test]
    fn unknown_and_missing_codes() {
        let err = classify_aws_error(Some("SomeNewError"), Some("details"));
        assert!(matches!(err, ProviderError::Sdk { .. }));
        assert!(!err.is_transient());

        let err2 = classify_aws_error(None, Some("something failed"));
        assert!(matches!(err2, ProviderError::Sdk { code: None, .. }));
    }

    #[test]
    fn suggestions_for_known_codes() {
        for (code, _) in SUGGESTIONS {
            assert!(
                suggestion_for_code(code).is_some(),
                "No suggestion for code: {code}"
            );
        }
        assert!(suggestion_for_code("SomeUnknownCode").is_none());
    }

    #[test]
    fn transport_is_transient() {
        assert!(ProviderError::Transport("connection reset".into()).is_transient());
        assert!(!ProviderError::Unsupported("x".into()).is_transient());
    }

    #[test]
    fn only_transport_is_ambiguous() {
        assert!(ProviderError::Transport("operation timed out".into()).is_ambiguous());
        assert!(!ProviderError::Throttled.is_ambiguous());
        assert!(!ProviderError::AlreadyExists("x".into()).is_ambiguous());
    }
}
