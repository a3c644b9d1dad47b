use serde::{Deserialize, Serialize};

use crate::policy::{parse_flag, parse_or};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;
/// Timeout used when running inside Google Cloud, where cold upstreams are slower.
pub const CLOUD_TIMEOUT_MS: u64 = 120_000;

/// Configures transport timeouts, caching scope and throttling.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// `User-Agent` sent with every request.
    pub user_agent: String,
    /// Serve and store GET responses through the cache.
    pub cache_get_requests: bool,
    /// Serve and store POST responses through the cache. Only safe for
    /// read-only POST endpoints such as search.
    pub cache_post_requests: bool,
    /// Pause before every network attempt, in milliseconds.
    pub throttle_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            connect_timeout_ms: 30_000,
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_owned(),
            cache_get_requests: true,
            cache_post_requests: false,
            throttle_ms: 0,
        }
    }
}

impl ClientOptions {
    /// Reads `HTTP_TIMEOUT_MS`, `HTTP_CACHE_GET`, `HTTP_CACHE_POST`,
    /// `HTTP_THROTTLE_MS` and `GOOGLE_CLOUD_PROJECT`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        let mut options = Self::default();
        if read("GOOGLE_CLOUD_PROJECT").is_some() {
            options.timeout_ms = CLOUD_TIMEOUT_MS;
        }
        options.timeout_ms = parse_or(read("HTTP_TIMEOUT_MS"), "HTTP_TIMEOUT_MS", options.timeout_ms);
        options.throttle_ms = parse_or(read("HTTP_THROTTLE_MS"), "HTTP_THROTTLE_MS", options.throttle_ms);
        if let Some(flag) = read("HTTP_CACHE_GET") {
            options.cache_get_requests = parse_flag(&flag);
        }
        if let Some(flag) = read("HTTP_CACHE_POST") {
            options.cache_post_requests = parse_flag(&flag);
        }
        options
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_throttle_ms(mut self, throttle_ms: u64) -> Self {
        self.throttle_ms = throttle_ms;
        self
    }

    pub fn with_post_caching(mut self, enabled: bool) -> Self {
        self.cache_post_requests = enabled;
        self
    }

    pub fn with_get_caching(mut self, enabled: bool) -> Self {
        self.cache_get_requests = enabled;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{ClientOptions, CLOUD_TIMEOUT_MS, DEFAULT_TIMEOUT_MS};

    #[test]
    fn defaults_cache_get_only() {
        let options = ClientOptions::default();
        assert_eq!(options.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert!(options.cache_get_requests);
        assert!(!options.cache_post_requests);
        assert_eq!(options.throttle_ms, 0);
        assert!(options.user_agent.starts_with("resilient-http/"));
    }

    #[test]
    fn cloud_project_raises_timeout() {
        let options = ClientOptions::from_lookup(|name| {
            (name == "GOOGLE_CLOUD_PROJECT").then(|| "my-project".to_owned())
        });
        assert_eq!(options.timeout_ms, CLOUD_TIMEOUT_MS);
    }

    #[test]
    fn explicit_settings_win() {
        let options = ClientOptions::from_lookup(|name| match name {
            "GOOGLE_CLOUD_PROJECT" => Some("p".to_owned()),
            "HTTP_TIMEOUT_MS" => Some("5000".to_owned()),
            "HTTP_CACHE_GET" => Some("false".to_owned()),
            "HTTP_CACHE_POST" => Some("1".to_owned()),
            "HTTP_THROTTLE_MS" => Some("250".to_owned()),
            _ => None,
        });
        assert_eq!(options.timeout_ms, 5_000);
        assert!(!options.cache_get_requests);
        assert!(options.cache_post_requests);
        assert_eq!(options.throttle_ms, 250);
    }

    #[test]
    fn deserializes_with_defaults() {
        let options: ClientOptions =
            serde_json::from_str(r#"{"cache_post_requests": true}"#).expect("valid");
        assert!(options.cache_post_requests);
        assert_eq!(options.timeout_ms, DEFAULT_TIMEOUT_MS);
    }
}
