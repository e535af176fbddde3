//! Engine-wide error taxonomy.
//!
//! Every failure a caller can observe is one of these variants. Callers get
//! a stable, non-sensitive reason code; internal detail stays in tracing and
//! the audit trail.

use std::time::Duration;
use thiserror::Error;

use crate::decoder::DecodeFailure;

/// Errors surfaced by the transaction engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Scan input could not be resolved to a code.
    #[error(transparent)]
    Decode(#[from] DecodeFailure),

    /// Admission denied by the rate limiter (or its store was unreachable).
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// No valid session was presented.
    #[error("authentication required")]
    Unauthenticated,

    /// Presented CSRF token does not match the session's current token.
    #[error("csrf token mismatch")]
    CsrfMismatch,

    /// Session exists but exceeded the inactivity or absolute lifetime.
    #[error("session expired")]
    SessionExpired,

    /// The requested transition is not legal from the asset's current state.
    #[error("invalid transition for asset {asset_tag}: {detail}")]
    InvalidTransition { asset_tag: String, detail: String },

    /// The remote system of record rejected the transition, or its state
    /// changed between re-validation and commit. Authoritative, not retried.
    #[error("remote conflict on asset {asset_tag}: {detail}")]
    RemoteConflict { asset_tag: String, detail: String },

    /// The remote inventory could not be reached or answered 5xx.
    #[error("remote inventory unavailable: {detail}")]
    RemoteUnavailable { retryable: bool, detail: String },

    /// Request input failed validation before touching any subsystem.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Asset tag or identity does not resolve to a remote record.
    #[error("not found: {0}")]
    NotFound(String),
}

impl EngineError {
    /// Stable machine-readable reason code, safe to expose to callers.
    pub fn reason_code(&self) -> &'static str {
        match self {
            EngineError::Decode(DecodeFailure::InvalidInput(_)) => "DECODE_INVALID_INPUT",
            EngineError::Decode(DecodeFailure::Timeout(_)) => "DECODE_TIMEOUT",
            EngineError::Decode(DecodeFailure::NoMatch) => "DECODE_NO_MATCH",
            EngineError::RateLimited { .. } => "RATE_LIMITED",
            EngineError::Unauthenticated => "UNAUTHENTICATED",
            EngineError::CsrfMismatch => "CSRF_MISMATCH",
            EngineError::SessionExpired => "SESSION_EXPIRED",
            EngineError::InvalidTransition { .. } => "INVALID_TRANSITION",
            EngineError::RemoteConflict { .. } => "REMOTE_CONFLICT",
            EngineError::RemoteUnavailable { .. } => "REMOTE_UNAVAILABLE",
            EngineError::Validation(_) => "VALIDATION_FAILED",
            EngineError::NotFound(_) => "NOT_FOUND",
        }
    }

    /// Whether a retry can plausibly change the outcome. Mirrors
    /// [`InventoryError::is_transient`] after mapping into the engine taxonomy:
    /// only a retryable remote-unavailable is transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::RemoteUnavailable { retryable: true, .. }
        )
    }
}

/// Result alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_are_stable() {
        let err = EngineError::RateLimited {
            retry_after: Duration::from_secs(30),
        };
        assert_eq!(err.reason_code(), "RATE_LIMITED");

        let err = EngineError::InvalidTransition {
            asset_tag: "A1".into(),
            detail: "already checked out".into(),
        };
        assert_eq!(err.reason_code(), "INVALID_TRANSITION");
        assert!(err.to_string().contains("A1"));
    }

    #[test]
    fn test_decode_failure_converts() {
        let err: EngineError = DecodeFailure::NoMatch.into();
        assert_eq!(err.reason_code(), "DECODE_NO_MATCH");
    }
}
