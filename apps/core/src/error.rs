use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a failed call to the generative-language service.
///
/// Only the two transient kinds are ever retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The service (or our own throttle) refused the call for quota reasons.
    TransientQuota,
    /// Connection failures, timeouts and 5xx responses.
    TransientNetwork,
    /// The service answered, but not in the shape we asked for.
    MalformedResponse,
    /// Credentials missing or rejected.
    FatalAuth,
    /// The service rejected the request itself (too long, bad argument).
    FatalInput,
}

impl FailureKind {
    /// Whether a failure of this kind is worth another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::TransientQuota | FailureKind::TransientNetwork)
    }

    /// Returns a stable snake_case label, used in logs and reports.
    pub fn label(self) -> &'static str {
        match self {
            FailureKind::TransientQuota => "transient_quota",
            FailureKind::TransientNetwork => "transient_network",
            FailureKind::MalformedResponse => "malformed_response",
            FailureKind::FatalAuth => "fatal_auth",
            FailureKind::FatalInput => "fatal_input",
        }
    }

    /// Maps an HTTP status returned by the service to a failure kind.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => FailureKind::TransientQuota,
            401 | 403 => FailureKind::FatalAuth,
            408 => FailureKind::TransientNetwork,
            s if s >= 500 => FailureKind::TransientNetwork,
            _ => FailureKind::FatalInput,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Application-wide error type.
///
/// Every variant carries owned strings only, so the type is cheap to clone:
/// callers that coalesce onto one in-flight analysis all receive the same error.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum AppError {
    /// The caller's input violates the length/emptiness contract.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Rate limit or network failure, surfaced once retries are exhausted.
    #[error("Transient service error ({kind}): {message}")]
    TransientService { kind: FailureKind, message: String },

    /// The service returned something that does not decode into the expected shape.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Missing or rejected credential for the service.
    #[error("Authentication/configuration error: {0}")]
    AuthConfiguration(String),

    /// The service rejected the request as invalid.
    #[error("Request rejected by service: {0}")]
    InvalidInput(String),

    /// Invalid process configuration (bad environment values).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected internal failure that indicates a bug.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Builds the error matching a classified service failure.
    pub fn from_failure(kind: FailureKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            FailureKind::TransientQuota | FailureKind::TransientNetwork => {
                AppError::TransientService { kind, message }
            }
            FailureKind::MalformedResponse => AppError::MalformedResponse(message),
            FailureKind::FatalAuth => AppError::AuthConfiguration(message),
            FailureKind::FatalInput => AppError::InvalidInput(message),
        }
    }

    /// The service failure kind this error represents, if any.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            AppError::TransientService { kind, .. } => Some(*kind),
            AppError::MalformedResponse(_) => Some(FailureKind::MalformedResponse),
            AppError::AuthConfiguration(_) => Some(FailureKind::FatalAuth),
            AppError::InvalidInput(_) => Some(FailureKind::FatalInput),
            AppError::Validation(_) | AppError::Config(_) | AppError::Internal(_) => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_some_and(FailureKind::is_retryable)
    }
}

impl From<tokio::time::error::Elapsed> for AppError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        AppError::TransientService {
            kind: FailureKind::TransientNetwork,
            message: format!("Request timed out: {}", err),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::MalformedResponse(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return AppError::from_failure(
                FailureKind::from_status(status.as_u16()),
                format!("HTTP error: {}", err),
            );
        }
        if err.is_decode() {
            return AppError::MalformedResponse(format!("HTTP body decode error: {}", err));
        }
        AppError::TransientService {
            kind: FailureKind::TransientNetwork,
            message: format!("HTTP error: {}", err),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Config(format!("Validation errors: {}", err))
    }
}

impl From<url::ParseError> for AppError {
    fn from(err: url::ParseError) -> Self {
        AppError::Config(format!("URL parse error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_kinds_retry() {
        assert!(FailureKind::TransientQuota.is_retryable());
        assert!(FailureKind::TransientNetwork.is_retryable());
        assert!(!FailureKind::MalformedResponse.is_retryable());
        assert!(!FailureKind::FatalAuth.is_retryable());
        assert!(!FailureKind::FatalInput.is_retryable());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(FailureKind::from_status(429), FailureKind::TransientQuota);
        assert_eq!(FailureKind::from_status(503), FailureKind::TransientNetwork);
        assert_eq!(FailureKind::from_status(408), FailureKind::TransientNetwork);
        assert_eq!(FailureKind::from_status(401), FailureKind::FatalAuth);
        assert_eq!(FailureKind::from_status(403), FailureKind::FatalAuth);
        assert_eq!(FailureKind::from_status(400), FailureKind::FatalInput);
        assert_eq!(FailureKind::from_status(413), FailureKind::FatalInput);
    }

    #[test]
    fn test_from_failure_round_trips_kind() {
        for kind in [
            FailureKind::TransientQuota,
            FailureKind::TransientNetwork,
            FailureKind::MalformedResponse,
            FailureKind::FatalAuth,
            FailureKind::FatalInput,
        ] {
            assert_eq!(AppError::from_failure(kind, "x").kind(), Some(kind));
        }
        assert_eq!(AppError::Validation("empty".into()).kind(), None);
    }

    #[test]
    fn test_serialized_shape() {
        let err = AppError::from_failure(FailureKind::TransientQuota, "slow down");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error_type"], "transient_service");
        assert_eq!(json["details"]["kind"], "transient_quota");
        assert_eq!(json["details"]["message"], "slow down");
    }
}
