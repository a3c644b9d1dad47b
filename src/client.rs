use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use reqwest::{blocking::Client, header, Method};
use url::Url;

use crate::{
    backoff::BackoffScheduler,
    cache::{CacheLookup, FingerprintCache},
    classify::{classify_status, classify_transport, RetryClassifier},
    error::CacheIoError,
    redirect::RedirectResolver,
    sanitize::sanitize_url,
    signer::{Signer, Unsigned},
    ClientOptions, HttpError, RequestDescriptor, Result, RetryPolicy,
};

/// Blocks the calling thread between retry attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, delay: Duration);
}

/// [`Sleeper`] backed by [`std::thread::sleep`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// Blocking HTTP client with response caching, retries and signing.
///
/// Cloning is cheap; clones share the connection pool, signer and sleeper.
#[derive(Clone)]
pub struct HttpExecutor {
    http: Client,
    redirect_http: Client,
    options: ClientOptions,
    cache: Option<FingerprintCache>,
    backoff: BackoffScheduler,
    classifier: RetryClassifier,
    signer: Arc<dyn Signer>,
    sleeper: Arc<dyn Sleeper>,
}

impl fmt::Debug for HttpExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpExecutor")
            .field("options", &self.options)
            .field("cache", &self.cache)
            .field("policy", self.backoff.policy())
            .field("signer", &"<redacted>")
            .finish()
    }
}

impl HttpExecutor {
    /// Creates an unsigned executor with the default retry policy and no
    /// cache.
    pub fn new(options: ClientOptions) -> Result<Self> {
        let http = Self::builder(&options)
            .build()
            .map_err(HttpError::ClientBuild)?;
        let redirect_http = Self::builder(&options)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(HttpError::ClientBuild)?;

        Ok(Self {
            http,
            redirect_http,
            options,
            cache: None,
            backoff: BackoffScheduler::new(RetryPolicy::default()),
            classifier: RetryClassifier,
            signer: Arc::new(Unsigned),
            sleeper: Arc::new(ThreadSleeper),
        })
    }

    /// Creates an executor configured entirely from the environment.
    ///
    /// See [`ClientOptions::from_env`] and [`RetryPolicy::from_env`].
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(ClientOptions::from_env())?.with_retry_policy(RetryPolicy::from_env()))
    }

    fn builder(options: &ClientOptions) -> reqwest::blocking::ClientBuilder {
        Client::builder()
            .timeout(Duration::from_millis(options.timeout_ms))
            .connect_timeout(Duration::from_millis(options.connect_timeout_ms))
            .user_agent(options.user_agent.clone())
    }

    /// Signs every network attempt, including retries and redirect probes.
    pub fn with_signer(mut self, signer: impl Signer + 'static) -> Self {
        self.signer = Arc::new(signer);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.backoff = BackoffScheduler::new(policy);
        self
    }

    pub fn with_cache(mut self, cache: FingerprintCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        self.backoff.policy()
    }

    pub fn cache(&self) -> Option<&FingerprintCache> {
        self.cache.as_ref()
    }

    pub fn get(&self, request: &RequestDescriptor) -> Result<String> {
        self.run(&request.as_method(Method::GET))
    }

    pub fn post(&self, request: &RequestDescriptor) -> Result<String> {
        self.run(&request.as_method(Method::POST))
    }

    pub fn put(&self, request: &RequestDescriptor) -> Result<String> {
        self.run(&request.as_method(Method::PUT))
    }

    pub fn patch(&self, request: &RequestDescriptor) -> Result<String> {
        self.run(&request.as_method(Method::PATCH))
    }

    pub fn delete(&self, request: &RequestDescriptor) -> Result<String> {
        self.run(&request.as_method(Method::DELETE))
    }

    /// Runs `request` with its own method.
    ///
    /// Returns [`HttpError::MissingDescriptor`] when no descriptor is given.
    pub fn execute(&self, request: Option<&RequestDescriptor>) -> Result<String> {
        let request = request.ok_or(HttpError::MissingDescriptor)?;
        self.run(request)
    }

    /// Follows the redirect chain at `url` with signed `HEAD` probes.
    pub fn resolve_redirect(&self, url: &str) -> Result<String> {
        let resolver = RedirectResolver::new(self.redirect_http.clone(), Arc::clone(&self.signer));
        Ok(resolver.resolve(url)?)
    }

    /// Drops the cached response for `request`, if any.
    pub fn invalidate(&self, request: &RequestDescriptor) -> std::result::Result<bool, CacheIoError> {
        match &self.cache {
            Some(cache) => cache.invalidate(request),
            None => Ok(false),
        }
    }

    /// Drops the cached response for `request` if it predates `updated_at`.
    pub fn invalidate_if_stale(
        &self,
        request: &RequestDescriptor,
        updated_at: DateTime<Utc>,
    ) -> std::result::Result<bool, CacheIoError> {
        match &self.cache {
            Some(cache) => cache.invalidate_if_stale(request, updated_at),
            None => Ok(false),
        }
    }

    pub fn clear_cache(&self) -> std::result::Result<(), CacheIoError> {
        match &self.cache {
            Some(cache) => cache.clear(),
            None => Ok(()),
        }
    }

    fn run(&self, request: &RequestDescriptor) -> Result<String> {
        Url::parse(request.url()).map_err(|err| {
            HttpError::InvalidRequest(format!("{}: {err}", sanitize_url(request.url())))
        })?;

        let cache = self.cache_for(request.method());
        if let Some(cache) = cache {
            if !request.bypass_cache() {
                if let Some(body) = Self::lookup(cache, request) {
                    return Ok(body);
                }
            }
        }

        let started = Instant::now();
        let result = self.send_with_retry(request);
        tracing::info!(
            method = %request.method(),
            url = %sanitize_url(request.url()),
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "http request finished"
        );

        let raw = result?;
        if let Some(cache) = cache {
            if let Err(err) = cache.write(request, &raw) {
                tracing::warn!(error = %err, "failed to store response in cache");
            }
        }
        Ok(decode_body(raw))
    }

    /// Cache that applies to `method` under the current options.
    fn cache_for(&self, method: &Method) -> Option<&FingerprintCache> {
        let enabled = if method == Method::GET {
            self.options.cache_get_requests
        } else if method == Method::POST {
            self.options.cache_post_requests
        } else {
            false
        };
        if enabled {
            self.cache.as_ref()
        } else {
            None
        }
    }

    fn lookup(cache: &FingerprintCache, request: &RequestDescriptor) -> Option<String> {
        let url = sanitize_url(request.url());
        match cache.read(request) {
            Ok(CacheLookup::Hit(bytes)) => {
                tracing::debug!(%url, "cache hit");
                Some(decode_body(bytes))
            }
            Ok(CacheLookup::Miss) => {
                tracing::debug!(%url, "cache miss");
                None
            }
            Err(err) => {
                tracing::warn!(%url, error = %err, "cache read failed");
                None
            }
        }
    }

    fn send_with_retry(&self, request: &RequestDescriptor) -> Result<Vec<u8>> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if self.options.throttle_ms > 0 {
                self.sleeper
                    .sleep(Duration::from_millis(self.options.throttle_ms));
            }

            let err = match self.send_once(request, attempt) {
                Ok(body) => return Ok(body),
                Err(err) => err,
            };

            if !self.classifier.is_retryable(&err) {
                return Err(err);
            }

            if !self.backoff.should_retry(attempt) {
                tracing::error!(
                    url = %sanitize_url(request.url()),
                    attempts = attempt,
                    error = %err,
                    "retries exhausted"
                );
                return Err(HttpError::RetriesExhausted {
                    url: sanitize_url(request.url()),
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.backoff.next_delay(attempt, err.rate_limit_hints());
            tracing::warn!(
                url = %sanitize_url(request.url()),
                attempt,
                max_retries = self.backoff.policy().max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying request"
            );
            self.sleeper.sleep(delay);
        }
    }

    /// Returns the raw body of a successful response.
    fn send_once(&self, request: &RequestDescriptor, attempt: u32) -> Result<Vec<u8>> {
        let url = request.url();
        tracing::debug!(method = %request.method(), url = %sanitize_url(url), attempt, "sending request");

        let mut builder = self.http.request(request.method().clone(), url);
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body() {
            if !request.has_header(header::CONTENT_TYPE.as_str()) {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
            }
            builder = builder.body(body.to_vec());
        }
        let builder = self.signer.sign(builder);

        let response = builder.send().map_err(|err| classify_transport(url, err))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .map_err(|err| classify_transport(url, err))?
            .to_vec();

        if status.is_success() {
            Ok(body)
        } else {
            Err(classify_status(url, status, &headers, decode_body(body)))
        }
    }
}

/// UTF-8 text of a response body; invalid sequences become U+FFFD.
fn decode_body(raw: Vec<u8>) -> String {
    String::from_utf8(raw)
        .unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned())
}
