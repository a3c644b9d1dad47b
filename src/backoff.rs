use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;

use crate::RetryPolicy;

/// Header carrying the server's requested wait in seconds.
pub const RETRY_AFTER: &str = "retry-after";
/// Header carrying the epoch second at which the rate-limit window resets.
pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";
/// Header carrying the number of calls left in the current window.
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Buffer added on top of a rate-limit reset time.
const RESET_BUFFER_MS: i64 = 1_000;

/// Server-provided hints about when a retry is safe.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RateLimitHints {
    /// `Retry-After`, when given as whole seconds.
    pub retry_after_secs: Option<u64>,
    /// `X-RateLimit-Reset` as epoch seconds.
    pub reset_epoch_secs: Option<i64>,
}

impl RateLimitHints {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
        };

        let retry_after_secs = text(RETRY_AFTER).and_then(|raw| {
            let parsed = raw.parse().ok();
            if parsed.is_none() {
                // HTTP-date form; fall through to the other strategies.
                tracing::debug!(value = raw, "could not parse Retry-After header");
            }
            parsed
        });
        let reset_epoch_secs = text(RATE_LIMIT_RESET).and_then(|raw| {
            let parsed = raw.parse().ok();
            if parsed.is_none() {
                tracing::debug!(value = raw, "could not parse X-RateLimit-Reset header");
            }
            parsed
        });

        Self {
            retry_after_secs,
            reset_epoch_secs,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.retry_after_secs.is_none() && self.reset_epoch_secs.is_none()
    }
}

/// Computes how long to wait before the next attempt.
#[derive(Clone, Debug)]
pub struct BackoffScheduler {
    policy: RetryPolicy,
}

impl BackoffScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// True while `attempt` (1-based, the attempt that just failed) is within
    /// the retry budget.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt >= 1 && attempt <= self.policy.max_retries
    }

    /// Delay before retrying after `attempt` failed.
    pub fn next_delay(&self, attempt: u32, hints: Option<&RateLimitHints>) -> Duration {
        self.next_delay_at(attempt, hints, Utc::now(), rand::random::<f64>())
    }

    /// Deterministic core of [`next_delay`](Self::next_delay).
    ///
    /// `sample` is the uniform random value in `[0, 1)` used for jitter.
    ///
    /// Priority: `Retry-After` seconds (jittered), then a future rate-limit
    /// reset plus one second (capped, not jittered), then exponential
    /// backoff (capped, jittered).
    pub fn next_delay_at(
        &self,
        attempt: u32,
        hints: Option<&RateLimitHints>,
        now: DateTime<Utc>,
        sample: f64,
    ) -> Duration {
        if let Some(hints) = hints {
            if let Some(seconds) = hints.retry_after_secs {
                tracing::info!(seconds, "server provided Retry-After");
                let delay = seconds.saturating_mul(1_000);
                return Duration::from_millis(self.apply_jitter(delay, sample));
            }

            if let Some(reset_secs) = hints.reset_epoch_secs {
                let reset_ms = reset_secs.saturating_mul(1_000);
                let now_ms = now.timestamp_millis();
                if reset_ms > now_ms {
                    let wait = (reset_ms - now_ms).saturating_add(RESET_BUFFER_MS);
                    let capped = (wait as u64).min(self.policy.max_delay_ms);
                    tracing::info!(reset_ms, wait_ms = capped, "waiting for rate limit reset");
                    return Duration::from_millis(capped);
                }
            }
        }

        let delay = self.base_delay(attempt).as_millis() as u64;
        Duration::from_millis(self.apply_jitter(delay, sample))
    }

    /// Exponential delay for `attempt` before jitter, capped at the maximum.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.policy.base_delay_ms as f64 * self.policy.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.policy.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// `max(0, delay + delay * jitter_factor * (sample - 0.5))`.
    ///
    /// Computed in floating point; the cast back saturates at `0` and
    /// `u64::MAX`.
    pub fn apply_jitter(&self, delay_ms: u64, sample: f64) -> u64 {
        let delay = delay_ms as f64;
        let jittered = delay + delay * self.policy.jitter_factor * (sample - 0.5);
        jittered.max(0.0) as u64
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use reqwest::header::{HeaderMap, HeaderValue};

    use super::{BackoffScheduler, RateLimitHints};
    use crate::RetryPolicy;

    fn scheduler(max_retries: u32, jitter: f64) -> BackoffScheduler {
        BackoffScheduler::new(RetryPolicy::new(max_retries, 1_000, 30_000, 2.0, jitter))
    }

    fn at(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    #[test]
    fn exponential_sequence_without_jitter() {
        let s = scheduler(3, 0.0);
        let delays: Vec<u64> = (1..=3)
            .map(|attempt| s.next_delay(attempt, None).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000]);
    }

    #[test]
    fn base_delay_is_monotonic_and_capped() {
        let s = scheduler(20, 0.5);
        let mut previous = Duration::ZERO;
        for attempt in 1..=40 {
            let delay = s.base_delay(attempt);
            assert!(delay >= previous, "attempt {attempt} decreased");
            assert!(delay <= Duration::from_millis(30_000));
            previous = delay;
        }
        assert_eq!(s.base_delay(40), Duration::from_millis(30_000));
    }

    #[test]
    fn retry_after_takes_priority_over_attempt() {
        let s = scheduler(10, 0.3);
        let hints = RateLimitHints {
            retry_after_secs: Some(5),
            reset_epoch_secs: Some(i64::MAX / 2_000),
        };
        for attempt in [1, 4, 9] {
            for sample in [0.0, 0.5, 0.999] {
                let delay = s.next_delay_at(attempt, Some(&hints), at(0), sample);
                let ms = delay.as_millis() as u64;
                assert!((4_250..=5_750).contains(&ms), "got {ms}");
            }
        }
    }

    #[test]
    fn retry_after_jitter_envelope() {
        let s = scheduler(3, 0.3);
        let hints = RateLimitHints {
            retry_after_secs: Some(2),
            reset_epoch_secs: None,
        };
        assert_eq!(s.next_delay_at(1, Some(&hints), at(0), 0.0).as_millis(), 1_700);
        assert_eq!(s.next_delay_at(1, Some(&hints), at(0), 0.5).as_millis(), 2_000);
        for _ in 0..50 {
            let ms = s.next_delay(1, Some(&hints)).as_millis();
            assert!((1_700..=2_300).contains(&ms), "got {ms}");
        }
    }

    #[test]
    fn future_reset_waits_until_reset_plus_buffer() {
        let s = scheduler(3, 0.5);
        let hints = RateLimitHints {
            retry_after_secs: None,
            reset_epoch_secs: Some(1_010),
        };
        let delay = s.next_delay_at(1, Some(&hints), at(1_000), 0.9);
        assert_eq!(delay, Duration::from_millis(11_000));

        let far = RateLimitHints {
            retry_after_secs: None,
            reset_epoch_secs: Some(10_000),
        };
        assert_eq!(
            s.next_delay_at(1, Some(&far), at(1_000), 0.9),
            Duration::from_millis(30_000)
        );
    }

    #[test]
    fn past_reset_falls_back_to_exponential() {
        let s = scheduler(3, 0.0);
        let hints = RateLimitHints {
            retry_after_secs: None,
            reset_epoch_secs: Some(500),
        };
        assert_eq!(
            s.next_delay_at(2, Some(&hints), at(1_000), 0.5),
            Duration::from_millis(2_000)
        );
    }

    #[test]
    fn jitter_never_goes_negative() {
        let s = BackoffScheduler::new(RetryPolicy::new(3, 100, 1_000, 2.0, 5.0));
        assert_eq!(s.apply_jitter(100, 0.0), 0);
        assert_eq!(s.apply_jitter(0, 0.9), 0);
    }

    #[test]
    fn huge_retry_after_does_not_wrap() {
        let s = scheduler(3, 0.3);
        let hints = RateLimitHints {
            retry_after_secs: Some(u64::MAX),
            reset_epoch_secs: None,
        };
        let delay = s.next_delay_at(1, Some(&hints), at(0), 0.0);
        assert!(delay >= Duration::from_millis(u64::MAX / 2), "got {delay:?}");
        assert!(s.apply_jitter(u64::MAX, 0.999) > 0);
    }

    #[test]
    fn should_retry_bounds() {
        let s = scheduler(3, 0.0);
        assert!(!s.should_retry(0));
        assert!(s.should_retry(1));
        assert!(s.should_retry(3));
        assert!(!s.should_retry(4));
        assert!(!scheduler(0, 0.0).should_retry(1));
    }

    #[test]
    fn hints_parse_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("2"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1700000000"));
        let hints = RateLimitHints::from_headers(&headers);
        assert_eq!(hints.retry_after_secs, Some(2));
        assert_eq!(hints.reset_epoch_secs, Some(1_700_000_000));

        let mut dated = HeaderMap::new();
        dated.insert(
            "retry-after",
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert!(RateLimitHints::from_headers(&dated).is_empty());
    }
}
