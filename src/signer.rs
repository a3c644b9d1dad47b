use std::fmt;

use reqwest::{blocking::RequestBuilder, header};

/// Attaches authentication to an outgoing request.
///
/// Called once per attempt, including retries and redirect probes, so
/// signatures that depend on the current time stay fresh.
pub trait Signer: Send + Sync {
    fn sign(&self, request: RequestBuilder) -> RequestBuilder;
}

impl<F> Signer for F
where
    F: Fn(RequestBuilder) -> RequestBuilder + Send + Sync,
{
    fn sign(&self, request: RequestBuilder) -> RequestBuilder {
        self(request)
    }
}

/// Leaves requests untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unsigned;

impl Signer for Unsigned {
    fn sign(&self, request: RequestBuilder) -> RequestBuilder {
        request
    }
}

/// Sends a fixed `Authorization` header value.
#[derive(Clone)]
pub struct AuthorizationSigner {
    value: String,
}

impl AuthorizationSigner {
    /// Uses `value` verbatim, e.g. `"Basic dXNlcjpwYXNz"`.
    pub fn raw(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Bearer token; the `Bearer ` prefix is added when missing.
    pub fn bearer(token: impl AsRef<str>) -> Self {
        Self::raw(normalize_bearer_authorization(token.as_ref()))
    }
}

impl fmt::Debug for AuthorizationSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationSigner")
            .field("value", &"<redacted>")
            .finish()
    }
}

impl Signer for AuthorizationSigner {
    fn sign(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(header::AUTHORIZATION, &self.value)
    }
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}
