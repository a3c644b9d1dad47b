//! Failure classification.
//!
//! Responses and transport errors are decoded into a classified
//! [`HttpError`] at the point they are received. [`RetryClassifier`] then
//! reads that class, and only falls back to message matching for errors that
//! could not be classified.

use reqwest::{header::HeaderMap, StatusCode};

use crate::{
    backoff::{RateLimitHints, RATE_LIMIT_REMAINING},
    error::{BusinessRule, HttpError},
    sanitize::sanitize_url,
};

/// Message fragments that mark a failure as rate limiting.
const RATE_LIMIT_PATTERNS: &[&str] = &["rate limit", "429", "too many requests", "throttl"];

/// Message fragments that mark a failure as a gateway or availability problem.
const UNAVAILABLE_PATTERNS: &[&str] = &[
    "503",
    "service unavailable",
    "gateway timeout",
    "502",
    "504",
];

/// Transport error fragments that indicate a dropped or flaky connection.
const RECOVERABLE_CONNECTION_PATTERNS: &[&str] = &[
    "broken pipe",
    "connection reset",
    "connection refused",
    "connection closed",
    "timed out",
    "timeout",
    "network is unreachable",
    "host is unreachable",
    "connection lost",
    "socket closed",
    "unexpected eof",
    "unexpected end of stream",
    "end of stream",
    "handshake",
];

const NO_SUCH_PARENT_EPIC: &str = "No issues have a parent epic with key or name";

/// Decides whether a failed attempt should be retried.
#[derive(Clone, Copy, Debug, Default)]
pub struct RetryClassifier;

impl RetryClassifier {
    pub fn is_retryable(&self, error: &HttpError) -> bool {
        match error.class() {
            Some(class) => class.is_retryable(),
            None => is_retryable_message(&error_chain_text(error)),
        }
    }
}

/// Case-insensitive check for rate-limit and gateway failure wording.
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    contains_any(&lower, RATE_LIMIT_PATTERNS) || contains_any(&lower, UNAVAILABLE_PATTERNS)
}

fn contains_any(lower: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|pattern| lower.contains(pattern))
}

/// Turns a non-success response into a classified error.
pub fn classify_status(url: &str, status: StatusCode, headers: &HeaderMap, body: String) -> HttpError {
    let url = sanitize_url(url);
    let lower_body = body.to_lowercase();

    let exhausted_quota = headers
        .get(RATE_LIMIT_REMAINING)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim() == "0");

    let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN
            && (exhausted_quota || lower_body.contains("rate limit")));

    if rate_limited {
        return HttpError::RateLimited {
            url,
            status: status.as_u16(),
            message: summarize(status, &body),
            hints: RateLimitHints::from_headers(headers),
        };
    }

    match status {
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            HttpError::Transient {
                url,
                status: Some(status.as_u16()),
                message: summarize(status, &body),
                source: None,
            }
        }
        StatusCode::BAD_REQUEST if body.contains(NO_SUCH_PARENT_EPIC) => HttpError::BusinessRule {
            url,
            rule: BusinessRule::NoSuchParentEpic,
            body,
        },
        // Upstreams that report throttling with an unexpected status still
        // get retried.
        _ if contains_any(&lower_body, RATE_LIMIT_PATTERNS) => HttpError::RateLimited {
            url,
            status: status.as_u16(),
            message: summarize(status, &body),
            hints: RateLimitHints::from_headers(headers),
        },
        _ if contains_any(&lower_body, UNAVAILABLE_PATTERNS) => HttpError::Transient {
            url,
            status: Some(status.as_u16()),
            message: summarize(status, &body),
            source: None,
        },
        _ => HttpError::Http {
            url,
            status: status.as_u16(),
            body,
        },
    }
}

/// Turns a `reqwest` transport failure into a classified error.
///
/// Timeouts, connect failures and recoverable connection drops become
/// [`HttpError::Transient`]; everything else stays unclassified.
pub fn classify_transport(url: &str, error: reqwest::Error) -> HttpError {
    let url = sanitize_url(url);
    let message = error_chain_text(&error);
    let lower = message.to_lowercase();

    let recoverable = error.is_timeout()
        || error.is_connect()
        || RECOVERABLE_CONNECTION_PATTERNS
            .iter()
            .any(|pattern| lower.contains(pattern));

    if recoverable {
        HttpError::Transient {
            url,
            status: error.status().map(|status| status.as_u16()),
            message,
            source: Some(error),
        }
    } else {
        HttpError::Transport { url, source: error }
    }
}

/// Joins an error and all of its sources into one message.
fn error_chain_text(error: &(dyn std::error::Error + 'static)) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

fn summarize(status: StatusCode, body: &str) -> String {
    let reason = status.canonical_reason().unwrap_or("unknown status");
    let snippet: String = body.chars().take(200).collect();
    if snippet.is_empty() {
        format!("{} {reason}", status.as_u16())
    } else {
        format!("{} {reason}: {snippet}", status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use reqwest::{
        header::{HeaderMap, HeaderValue},
        StatusCode,
    };

    use super::{classify_status, is_retryable_message, RetryClassifier};
    use crate::{
        error::{BusinessRule, ErrorClass},
        HttpError,
    };

    #[test]
    fn retryable_messages() {
        for message in [
            "HTTP 429 from upstream",
            "Rate Limit exceeded",
            "503",
            "Too Many Requests",
            "request throttled",
            "Service Unavailable",
            "Gateway Timeout",
            "status 502",
            "got 504",
        ] {
            assert!(is_retryable_message(message), "{message}");
        }
    }

    #[test]
    fn unrelated_messages_are_terminal() {
        assert!(!is_retryable_message("invalid field name"));
        assert!(!is_retryable_message(""));
        assert!(!is_retryable_message("permission denied"));
    }

    #[test]
    fn too_many_requests_is_rate_limited_with_hints() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("7"));
        let err = classify_status(
            "https://api.test/x?token=abc",
            StatusCode::TOO_MANY_REQUESTS,
            &headers,
            "slow down".to_owned(),
        );
        match &err {
            HttpError::RateLimited { url, hints, .. } => {
                assert!(!url.contains("abc"));
                assert_eq!(hints.retry_after_secs, Some(7));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(RetryClassifier.is_retryable(&err));
    }

    #[test]
    fn forbidden_with_exhausted_quota_is_rate_limited() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        let err = classify_status("https://api.test", StatusCode::FORBIDDEN, &headers, String::new());
        assert_eq!(err.class(), Some(ErrorClass::RateLimit));

        let plain = classify_status(
            "https://api.test",
            StatusCode::FORBIDDEN,
            &HeaderMap::new(),
            "no access".to_owned(),
        );
        assert_eq!(plain.class(), Some(ErrorClass::Terminal));
    }

    #[test]
    fn gateway_failures_are_transient() {
        for status in [
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::GATEWAY_TIMEOUT,
        ] {
            let err = classify_status("https://api.test", status, &HeaderMap::new(), String::new());
            assert_eq!(err.class(), Some(ErrorClass::Transient));
            assert!(RetryClassifier.is_retryable(&err));
        }
    }

    #[test]
    fn throttling_body_with_bad_request_is_rate_limited() {
        let err = classify_status(
            "https://api.test",
            StatusCode::BAD_REQUEST,
            &HeaderMap::new(),
            "ThrottlingException: Rate limit exceeded, too many requests".to_owned(),
        );
        assert_eq!(err.class(), Some(ErrorClass::RateLimit));
        assert!(RetryClassifier.is_retryable(&err));
    }

    #[test]
    fn gateway_wording_in_body_is_transient() {
        let err = classify_status(
            "https://api.test",
            StatusCode::NOT_FOUND,
            &HeaderMap::new(),
            "upstream returned 503 Service Unavailable".to_owned(),
        );
        assert_eq!(err.class(), Some(ErrorClass::Transient));
        assert!(RetryClassifier.is_retryable(&err));
    }

    #[test]
    fn plain_client_errors_stay_terminal() {
        let err = classify_status(
            "https://api.test/issue/ABC-1",
            StatusCode::NOT_FOUND,
            &HeaderMap::new(),
            "Issue does not exist".to_owned(),
        );
        assert!(matches!(err, HttpError::Http { status: 404, .. }));
        assert!(!RetryClassifier.is_retryable(&err));
    }

    #[test]
    fn missing_parent_epic_is_business_rule() {
        let err = classify_status(
            "https://jira.test/search",
            StatusCode::BAD_REQUEST,
            &HeaderMap::new(),
            "No issues have a parent epic with key or name 'ABC-9'".to_owned(),
        );
        assert!(matches!(
            err,
            HttpError::BusinessRule {
                rule: BusinessRule::NoSuchParentEpic,
                ..
            }
        ));
        assert!(!RetryClassifier.is_retryable(&err));
    }
}
