use std::{borrow::Cow, collections::BTreeMap};

use reqwest::Method;
use serde::Serialize;

use crate::{fingerprint::Fingerprint, HttpError, Result};

/// Immutable description of one logical HTTP call.
///
/// Built with consuming `with_*` methods; once handed to the executor it is
/// only ever read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestDescriptor {
    method: Method,
    url: String,
    body: Option<Vec<u8>>,
    headers: BTreeMap<String, String>,
    bypass_cache: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            headers: BTreeMap::new(),
            bypass_cache: false,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Sets the raw request body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `value` as the JSON request body and sets the content type.
    pub fn with_json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|err| HttpError::InvalidRequest(format!("json body: {err}")))?;
        Ok(self
            .with_header("Content-Type", "application/json")
            .with_body(body))
    }

    /// Adds a header; a later value for the same name replaces the earlier one.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Skips the cache lookup for this call. The response is still written
    /// through to the cache when caching applies.
    pub fn bypassing_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn bypass_cache(&self) -> bool {
        self.bypass_cache
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }

    /// True if a header with this name is present, ignoring ASCII case.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.keys().any(|key| key.eq_ignore_ascii_case(name))
    }

    /// Returns this descriptor with `method`, cloning only when it differs.
    pub(crate) fn as_method(&self, method: Method) -> Cow<'_, Self> {
        if self.method == method {
            Cow::Borrowed(self)
        } else {
            let mut owned = self.clone();
            owned.method = method;
            Cow::Owned(owned)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use reqwest::Method;
    use serde_json::json;

    use super::RequestDescriptor;

    #[test]
    fn builder_sets_fields() {
        let desc = RequestDescriptor::post("https://example.test/issues")
            .with_body("payload")
            .with_header("X-Trace", "1")
            .bypassing_cache();

        assert_eq!(desc.method(), &Method::POST);
        assert_eq!(desc.url(), "https://example.test/issues");
        assert_eq!(desc.body(), Some(&b"payload"[..]));
        assert_eq!(desc.headers().get("X-Trace").map(String::as_str), Some("1"));
        assert!(desc.bypass_cache());
    }

    #[test]
    fn json_body_sets_content_type() {
        let desc = RequestDescriptor::post("https://example.test")
            .with_json(&json!({"summary": "hello"}))
            .expect("json body must serialize");

        assert!(desc.has_header("content-type"));
        let body: serde_json::Value =
            serde_json::from_slice(desc.body().expect("body must be set")).expect("valid json");
        assert_eq!(body["summary"], "hello");
    }

    #[test]
    fn as_method_borrows_when_unchanged() {
        let desc = RequestDescriptor::get("https://example.test");
        assert!(matches!(desc.as_method(Method::GET), Cow::Borrowed(_)));

        let changed = desc.as_method(Method::POST);
        assert!(matches!(changed, Cow::Owned(_)));
        assert_eq!(changed.method(), &Method::POST);
        assert_eq!(desc.method(), &Method::GET);
    }
}
