//! Source error types.

use std::fmt;
use std::time::Duration;

use super::SourceKind;

/// Pause applied when a source rate-limits us without saying for how long.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Why a source refused our credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// Key missing, malformed, or revoked.
    InvalidCredential,
    /// Key is valid but its request quota is used up.
    QuotaExhausted,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthFailure::InvalidCredential => f.write_str("invalid credential"),
            AuthFailure::QuotaExhausted => f.write_str("quota exhausted"),
        }
    }
}

/// Coarse classification the scheduler's state machine branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Auth,
    Malformed,
}

/// Errors from a single upstream call.
///
/// Every failure an adapter or the normalizer can produce is one of these;
/// none of them is fatal to the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Network failure, 5xx, timeout, or rate limiting.
    #[error("{kind} source unavailable: {reason}")]
    Transient {
        kind: SourceKind,
        reason: String,
        /// Upstream-requested pause before the next request to this source.
        retry_after: Option<Duration>,
    },

    /// Credential rejected or quota exhausted.
    #[error("{kind} source refused access: {failure}")]
    Auth { kind: SourceKind, failure: AuthFailure },

    /// Body did not have the expected shape.
    #[error("{kind} source sent an unexpected payload: {message}")]
    Malformed { kind: SourceKind, message: String },
}

impl SourceError {
    pub fn transient(kind: SourceKind, reason: impl Into<String>) -> Self {
        SourceError::Transient {
            kind,
            reason: reason.into(),
            retry_after: None,
        }
    }

    /// A rate-limit rejection. Always carries a pause, defaulting to
    /// [`DEFAULT_RETRY_AFTER`].
    pub fn rate_limited(kind: SourceKind, retry_after: Option<Duration>) -> Self {
        SourceError::Transient {
            kind,
            reason: "rate limited".to_string(),
            retry_after: Some(retry_after.unwrap_or(DEFAULT_RETRY_AFTER)),
        }
    }

    pub fn timed_out(kind: SourceKind, after: Duration) -> Self {
        SourceError::transient(kind, format!("no response within {}s", after.as_secs()))
    }

    pub fn malformed(kind: SourceKind, message: impl Into<String>) -> Self {
        SourceError::Malformed {
            kind,
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            SourceError::Transient { .. } => ErrorClass::Transient,
            SourceError::Auth { .. } => ErrorClass::Auth,
            SourceError::Malformed { .. } => ErrorClass::Malformed,
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            SourceError::Transient { kind, .. }
            | SourceError::Auth { kind, .. }
            | SourceError::Malformed { kind, .. } => *kind,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SourceError::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SourceError::transient(SourceKind::Direct, "HTTP 503");
        assert_eq!(err.to_string(), "direct source unavailable: HTTP 503");

        let err = SourceError::Auth {
            kind: SourceKind::Direct,
            failure: AuthFailure::QuotaExhausted,
        };
        assert_eq!(err.to_string(), "direct source refused access: quota exhausted");

        let err = SourceError::malformed(SourceKind::Fallback, "missing crs");
        assert_eq!(
            err.to_string(),
            "fallback source sent an unexpected payload: missing crs"
        );
    }

    #[test]
    fn classification() {
        let limited = SourceError::rate_limited(SourceKind::Direct, Some(Duration::from_secs(90)));
        assert_eq!(limited.class(), ErrorClass::Transient);
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(90)));
        assert_eq!(limited.kind(), SourceKind::Direct);

        let unhinted = SourceError::rate_limited(SourceKind::Fallback, None);
        assert_eq!(unhinted.retry_after(), Some(DEFAULT_RETRY_AFTER));

        let timeout = SourceError::timed_out(SourceKind::Fallback, Duration::from_secs(10));
        assert_eq!(timeout.class(), ErrorClass::Transient);
        assert_eq!(timeout.retry_after(), None);
        assert!(timeout.to_string().contains("10s"));

        let auth = SourceError::Auth {
            kind: SourceKind::Direct,
            failure: AuthFailure::InvalidCredential,
        };
        assert_eq!(auth.class(), ErrorClass::Auth);
        assert_eq!(auth.retry_after(), None);

        assert_eq!(
            SourceError::malformed(SourceKind::Tfl, "x").class(),
            ErrorClass::Malformed
        );
    }
}
