//! Response classification shared by the HTTP adapters.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;

use crate::domain::StationQuery;

use super::error::{AuthFailure, SourceError};
use super::{RawSourceResponse, Schema, SourceKind};

pub(crate) const USER_AGENT: &str = concat!("transport-engine/", env!("CARGO_PKG_VERSION"));

/// Body excerpt length kept in error messages.
const EXCERPT_CHARS: usize = 200;

/// A successful upstream reply, before it is tied to a query.
#[derive(Debug)]
pub(crate) struct HttpReply {
    pub status: u16,
    pub retry_after: Option<Duration>,
    pub received_at: DateTime<Utc>,
    pub body: String,
}

impl HttpReply {
    pub fn into_raw(self, source: SourceKind, schema: Schema, query: &StationQuery) -> RawSourceResponse {
        RawSourceResponse {
            source,
            schema,
            station: query.station(),
            mode: query.mode(),
            status: self.status,
            received_at: self.received_at,
            retry_after: self.retry_after,
            body: self.body,
        }
    }
}

/// Read a response, turning error statuses and empty bodies into
/// classified errors.
pub(crate) async fn read_reply(
    kind: SourceKind,
    response: reqwest::Response,
) -> Result<HttpReply, SourceError> {
    let received_at = Utc::now();
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_retry_after(v, received_at));

    let body = response
        .text()
        .await
        .map_err(|e| request_error(kind, &e))?;

    if let Some(err) = classify_status(kind, status, retry_after, &body) {
        return Err(err);
    }

    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed == "null" || trimmed == "{}" {
        return Err(SourceError::malformed(kind, "empty response body"));
    }

    Ok(HttpReply {
        status: status.as_u16(),
        retry_after,
        received_at,
        body,
    })
}

/// Map an HTTP status to an error, or `None` for success.
pub(crate) fn classify_status(
    kind: SourceKind,
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> Option<SourceError> {
    if status.is_success() {
        return None;
    }

    let err = match status {
        StatusCode::UNAUTHORIZED => SourceError::Auth {
            kind,
            failure: AuthFailure::InvalidCredential,
        },
        StatusCode::FORBIDDEN => {
            let failure = if body.to_ascii_lowercase().contains("quota") {
                AuthFailure::QuotaExhausted
            } else {
                AuthFailure::InvalidCredential
            };
            SourceError::Auth { kind, failure }
        }
        StatusCode::TOO_MANY_REQUESTS => SourceError::rate_limited(kind, retry_after),
        StatusCode::REQUEST_TIMEOUT => SourceError::transient(kind, "HTTP 408"),
        s if s.is_server_error() => SourceError::Transient {
            kind,
            reason: format!("HTTP {}", s.as_u16()),
            retry_after,
        },
        s => SourceError::malformed(
            kind,
            format!("HTTP {}: {}", s.as_u16(), excerpt(body)),
        ),
    };

    Some(err)
}

/// Parse a `Retry-After` header: delta seconds or an HTTP date.
pub(crate) fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let when = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = when.with_timezone(&Utc).signed_duration_since(now);
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// Classify a transport-level reqwest failure.
pub(crate) fn request_error(kind: SourceKind, err: &reqwest::Error) -> SourceError {
    if err.is_timeout() {
        SourceError::transient(kind, "request timed out")
    } else if err.is_connect() {
        SourceError::transient(kind, format!("connection failed: {err}"))
    } else if err.is_decode() {
        SourceError::malformed(kind, err.to_string())
    } else {
        SourceError::transient(kind, err.to_string())
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(EXCERPT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ErrorClass;
    use chrono::TimeZone;

    #[test]
    fn success_is_not_an_error() {
        assert!(classify_status(SourceKind::Direct, StatusCode::OK, None, "{}").is_none());
    }

    #[test]
    fn unauthorized_is_auth() {
        let err = classify_status(SourceKind::Direct, StatusCode::UNAUTHORIZED, None, "").unwrap();
        assert_eq!(
            err,
            SourceError::Auth {
                kind: SourceKind::Direct,
                failure: AuthFailure::InvalidCredential
            }
        );
    }

    #[test]
    fn forbidden_quota_is_quota_exhausted() {
        let err = classify_status(
            SourceKind::Direct,
            StatusCode::FORBIDDEN,
            None,
            r#"{"message":"Quota exceeded for this product"}"#,
        )
        .unwrap();
        assert_eq!(
            err,
            SourceError::Auth {
                kind: SourceKind::Direct,
                failure: AuthFailure::QuotaExhausted
            }
        );
    }

    #[test]
    fn rate_limit_carries_hint() {
        let hint = Some(Duration::from_secs(120));
        let err =
            classify_status(SourceKind::Fallback, StatusCode::TOO_MANY_REQUESTS, hint, "").unwrap();
        assert_eq!(err.class(), ErrorClass::Transient);
        assert_eq!(err.retry_after(), hint);
    }

    #[test]
    fn server_errors_are_transient() {
        for code in [500u16, 502, 503, 504] {
            let status = StatusCode::from_u16(code).unwrap();
            let err = classify_status(SourceKind::Direct, status, None, "oops").unwrap();
            assert_eq!(err.class(), ErrorClass::Transient, "status {code}");
        }
    }

    #[test]
    fn other_client_errors_are_malformed() {
        let err = classify_status(SourceKind::Fallback, StatusCode::NOT_FOUND, None, "no such crs")
            .unwrap();
        assert_eq!(err.class(), ErrorClass::Malformed);
        assert!(err.to_string().contains("no such crs"));
    }

    #[test]
    fn retry_after_seconds() {
        let now = Utc::now();
        assert_eq!(parse_retry_after("30", now), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after(" 5 ", now), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[test]
    fn retry_after_http_date() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap();
        assert_eq!(
            parse_retry_after("Fri, 15 Mar 2024 10:02:00 GMT", now),
            Some(Duration::from_secs(120))
        );
        // Dates in the past mean "now".
        assert_eq!(
            parse_retry_after("Fri, 15 Mar 2024 09:00:00 GMT", now),
            Some(Duration::ZERO)
        );
    }
}
