//! Manual redirect chasing with signed `HEAD` probes.
//!
//! Automatic redirect following would drop credentials on cross-host hops,
//! so the resolver walks the chain itself and signs every probe.

use std::sync::Arc;

use reqwest::{blocking::Client, header, StatusCode};
use url::Url;

use crate::{sanitize::sanitize_url, signer::Signer};

/// Most `HEAD` probes sent while resolving one chain.
pub const MAX_REDIRECTS: usize = 10;

/// Result of probing a single URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Hop {
    /// The server pointed somewhere else.
    Redirect(Url),
    /// The URL answered without redirecting.
    Final(Url),
}

#[derive(Debug, thiserror::Error)]
pub enum RedirectError {
    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("redirect from {url} has no Location header")]
    MissingLocation { url: String },
    #[error("invalid redirect location {location}: {source}")]
    InvalidLocation {
        location: String,
        #[source]
        source: url::ParseError,
    },
    #[error("too many redirects (limit {max}) starting from {original}")]
    TooManyRedirects { original: String, max: usize },
    #[error("redirect probe failed for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Follows a redirect chain to its final URL.
#[derive(Clone)]
pub struct RedirectResolver {
    http: Client,
    signer: Arc<dyn Signer>,
    max_hops: usize,
}

impl RedirectResolver {
    /// `http` must have automatic redirects disabled.
    pub fn new(http: Client, signer: Arc<dyn Signer>) -> Self {
        Self {
            http,
            signer,
            max_hops: MAX_REDIRECTS,
        }
    }

    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    /// Returns the URL the chain starting at `url` settles on.
    pub fn resolve(&self, url: &str) -> Result<String, RedirectError> {
        let mut current = Url::parse(url).map_err(|source| RedirectError::InvalidUrl {
            url: sanitize_url(url),
            source,
        })?;

        // At most `max_hops` probes; a redirect on the last one is an error.
        for hops in 0..self.max_hops {
            match self.probe(&current)? {
                Hop::Final(done) => {
                    if hops > 0 {
                        tracing::debug!(
                            from = %sanitize_url(url),
                            to = %sanitize_url(done.as_str()),
                            hops,
                            "redirect resolved"
                        );
                    }
                    return Ok(done.into());
                }
                Hop::Redirect(next) => {
                    tracing::debug!(
                        from = %sanitize_url(current.as_str()),
                        to = %sanitize_url(next.as_str()),
                        "following redirect"
                    );
                    current = next;
                }
            }
        }

        Err(RedirectError::TooManyRedirects {
            original: sanitize_url(url),
            max: self.max_hops,
        })
    }

    /// Sends one signed `HEAD` request and reports where it points.
    pub fn probe(&self, url: &Url) -> Result<Hop, RedirectError> {
        let response = self
            .signer
            .sign(self.http.head(url.clone()))
            .send()
            .map_err(|source| RedirectError::Transport {
                url: sanitize_url(url.as_str()),
                source,
            })?;

        if !is_redirect(response.status()) {
            return Ok(Hop::Final(url.clone()));
        }

        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| RedirectError::MissingLocation {
                url: sanitize_url(url.as_str()),
            })?;

        url.join(location)
            .map(Hop::Redirect)
            .map_err(|source| RedirectError::InvalidLocation {
                location: sanitize_url(location),
                source,
            })
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MULTIPLE_CHOICES
            | StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}
