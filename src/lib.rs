//! `resilient-http` is a blocking HTTP execution layer for REST integrations.
//!
//! Every call goes through [`HttpExecutor`], which adds:
//! - a content-addressed disk cache keyed by request [`Fingerprint`]
//! - retries with exponential backoff that honor `Retry-After` and
//!   `X-RateLimit-Reset`
//! - per-attempt request signing through a [`Signer`]
//! - bounded, signed redirect resolution
//!
//! ```no_run
//! use resilient_http::{
//!     AuthorizationSigner, ClientOptions, FingerprintCache, HttpExecutor, RequestDescriptor,
//!     RetryPolicy,
//! };
//!
//! # fn main() -> resilient_http::Result<()> {
//! let http = HttpExecutor::new(ClientOptions::from_env())?
//!     .with_retry_policy(RetryPolicy::cloud())
//!     .with_cache(FingerprintCache::new("/tmp/http-cache", "JiraClient"))
//!     .with_signer(AuthorizationSigner::bearer("my-token"));
//!
//! let issue = http.get(&RequestDescriptor::get("https://jira.example/rest/api/2/issue/ABC-1"))?;
//! println!("{issue}");
//! # Ok(())
//! # }
//! ```

mod backoff;
mod cache;
mod classify;
mod client;
mod descriptor;
mod error;
mod fingerprint;
mod options;
mod policy;
mod redirect;
mod sanitize;
mod signer;

pub use backoff::{BackoffScheduler, RateLimitHints};
pub use cache::{CacheLookup, FingerprintCache};
pub use classify::{classify_status, classify_transport, is_retryable_message, RetryClassifier};
pub use client::{HttpExecutor, Sleeper, ThreadSleeper};
pub use descriptor::RequestDescriptor;
pub use error::{BusinessRule, CacheIoError, ErrorClass, HttpError};
pub use fingerprint::Fingerprint;
pub use options::ClientOptions;
pub use policy::RetryPolicy;
pub use redirect::{Hop, RedirectError, RedirectResolver, MAX_REDIRECTS};
pub use sanitize::sanitize_url;
pub use signer::{AuthorizationSigner, Signer, Unsigned};

pub type Result<T> = std::result::Result<T, HttpError>;
