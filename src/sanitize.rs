//! Credential redaction for URLs that end up in logs and error messages.

use url::Url;

const SENSITIVE_PARAMS: &[&str] = &["key", "token", "password", "secret", "auth", "signature"];

const REDACTED: &str = "***REDACTED***";

/// Redacts userinfo and the values of query parameters whose names look like
/// credentials.
///
/// URLs that fail to parse keep only the part before `?`.
pub fn sanitize_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return match raw.split_once('?') {
            Some((base, _)) => format!("{base}?[QUERY_PARAMS_REDACTED]"),
            None => raw.to_owned(),
        };
    };

    // Either half of `user:pass@` may be a token.
    if !url.username().is_empty() || url.password().is_some() {
        let _ = url.set_password(None);
        let _ = url.set_username(REDACTED);
    }

    if url.query().is_none() {
        return url.into();
    }

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(name, value)| {
            if is_sensitive(&name) {
                (name.into_owned(), REDACTED.to_owned())
            } else {
                (name.into_owned(), value.into_owned())
            }
        })
        .collect();

    url.query_pairs_mut().clear().extend_pairs(pairs);
    url.into()
}

fn is_sensitive(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SENSITIVE_PARAMS.iter().any(|param| lower.contains(param))
}
