use std::path::PathBuf;

use crate::{backoff::RateLimitHints, redirect::RedirectError};

/// Structured classification attached to an [`HttpError`] when the response
/// or transport failure is decoded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    /// Server asked the caller to slow down.
    RateLimit,
    /// Temporary failure; worth another attempt.
    Transient,
    /// Retrying will not help.
    Terminal,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimit | Self::Transient)
    }
}

/// Failure conditions recognized from specific upstream response bodies.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BusinessRule {
    /// Issue search referenced a parent epic that does not exist.
    NoSuchParentEpic,
}

impl std::fmt::Display for BusinessRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSuchParentEpic => f.write_str("no such parent epic"),
        }
    }
}

/// Error type returned by this crate.
///
/// URLs carried by the variants are already sanitized and safe to log.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// Rate limited by the server; retry after the hinted delay.
    #[error("rate limited by {url} (status {status}): {message}")]
    RateLimited {
        url: String,
        status: u16,
        message: String,
        hints: RateLimitHints,
    },
    /// Timeout, gateway failure or dropped connection.
    #[error("transient failure for {url}: {message}")]
    Transient {
        url: String,
        /// HTTP status, when the failure came from a response.
        status: Option<u16>,
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },
    /// Non-success HTTP status that retrying cannot fix.
    #[error("http error {status} for {url}: {body}")]
    Http {
        url: String,
        status: u16,
        body: String,
    },
    /// Upstream rejected the request for a recognized business reason.
    #[error("{rule} ({url})")]
    BusinessRule {
        url: String,
        rule: BusinessRule,
        body: String,
    },
    /// Redirect chain could not be resolved.
    #[error(transparent)]
    Redirect(#[from] RedirectError),
    /// A retryable failure persisted through every allowed attempt.
    #[error("gave up on {url} after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        #[source]
        last: Box<HttpError>,
    },
    /// Transport failure that could not be classified when it was decoded.
    #[error("transport error for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// The underlying `reqwest` client could not be constructed.
    #[error("failed to build http client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    /// The descriptor could not be turned into a request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// `execute` was called without a request descriptor.
    #[error("no request descriptor supplied")]
    MissingDescriptor,
}

impl HttpError {
    /// Structured class decided at decode time, if any.
    ///
    /// `None` means the error was not classified and callers have to fall
    /// back to inspecting the message.
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            Self::RateLimited { .. } => Some(ErrorClass::RateLimit),
            Self::Transient { .. } => Some(ErrorClass::Transient),
            Self::Transport { .. } => None,
            Self::Http { .. }
            | Self::BusinessRule { .. }
            | Self::Redirect(_)
            | Self::RetriesExhausted { .. }
            | Self::ClientBuild(_)
            | Self::InvalidRequest(_)
            | Self::MissingDescriptor => Some(ErrorClass::Terminal),
        }
    }

    /// Server-provided backoff hints carried by this error.
    pub fn rate_limit_hints(&self) -> Option<&RateLimitHints> {
        match self {
            Self::RateLimited { hints, .. } => Some(hints),
            Self::RetriesExhausted { last, .. } => last.rate_limit_hints(),
            _ => None,
        }
    }

    /// HTTP status code of the failing response, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { status, .. }
            | Self::Http { status, .. } => Some(*status),
            Self::Transient { status, .. } => *status,
            Self::BusinessRule { .. } => Some(400),
            Self::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}

/// Disk cache read/write failure.
///
/// Never fails an HTTP call; the executor logs it and treats the cache as
/// unavailable for that attempt.
#[derive(Debug, thiserror::Error)]
#[error("cache {op} failed for {}: {source}", path.display())]
pub struct CacheIoError {
    pub op: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl CacheIoError {
    pub(crate) fn new(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self {
            op,
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_and_retryable_classes() {
        let http = HttpError::Http {
            url: "https://example.test/a".to_owned(),
            status: 404,
            body: "not found".to_owned(),
        };
        assert_eq!(http.class(), Some(ErrorClass::Terminal));
        assert_eq!(http.status(), Some(404));

        let limited = HttpError::RateLimited {
            url: "https://example.test/a".to_owned(),
            status: 429,
            message: "slow down".to_owned(),
            hints: RateLimitHints::default(),
        };
        assert!(limited.class().is_some_and(ErrorClass::is_retryable));
        assert!(limited.rate_limit_hints().is_some());
    }

    #[test]
    fn exhausted_error_reports_last_status_and_hints() {
        let last = HttpError::RateLimited {
            url: "u".to_owned(),
            status: 429,
            message: "m".to_owned(),
            hints: RateLimitHints {
                retry_after_secs: Some(3),
                reset_epoch_secs: None,
            },
        };
        let exhausted = HttpError::RetriesExhausted {
            url: "u".to_owned(),
            attempts: 4,
            last: Box::new(last),
        };
        assert_eq!(exhausted.class(), Some(ErrorClass::Terminal));
        assert_eq!(exhausted.status(), Some(429));
        assert_eq!(
            exhausted.rate_limit_hints().and_then(|h| h.retry_after_secs),
            Some(3)
        );
        assert!(exhausted.to_string().contains("after 4 attempt(s)"));
    }

    #[test]
    fn cache_error_names_operation_and_path() {
        let err = CacheIoError::new(
            "write",
            "/tmp/cache/abc",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let text = err.to_string();
        assert!(text.contains("cache write failed"));
        assert!(text.contains("/tmp/cache/abc"));
    }
}
