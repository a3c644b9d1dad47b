use serde::{Deserialize, Serialize};

/// Environment variable prefix read by [`RetryPolicy::from_env`].
pub const ENV_PREFIX: &str = "HTTP_RETRY_";

/// Immutable retry configuration, constructed once per client.
///
/// The presets differ by environment: hosted services hit rate limits often
/// and reset slowly, self-hosted servers recover quickly, tests want tiny
/// delays.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for computed delays, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor between consecutive retries.
    pub backoff_multiplier: f64,
    /// Fraction of the delay used as symmetric random jitter (0.0 - 1.0).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.3,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        base_delay_ms: u64,
        max_delay_ms: u64,
        backoff_multiplier: f64,
        jitter_factor: f64,
    ) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
            backoff_multiplier,
            jitter_factor,
        }
    }

    /// Cloud-hosted trackers: frequent rate limits, hourly resets.
    pub fn cloud() -> Self {
        Self::new(7, 2_000, 120_000, 2.0, 0.4)
    }

    /// Self-hosted servers: rare rate limits, fast recovery.
    pub fn self_hosted() -> Self {
        Self::new(3, 500, 30_000, 2.0, 0.2)
    }

    /// Minimal delays for automated tests.
    pub fn testing() -> Self {
        Self::new(3, 10, 100, 2.0, 0.1)
    }

    /// Operations that must succeed if at all possible.
    pub fn aggressive() -> Self {
        Self::new(10, 3_000, 300_000, 1.5, 0.5)
    }

    /// Non-critical operations that should fail fast.
    pub fn conservative() -> Self {
        Self::new(2, 1_000, 5_000, 2.0, 0.2)
    }

    /// Never retries.
    pub fn disabled() -> Self {
        Self::new(0, 0, 0, 1.0, 0.0)
    }

    /// Reads the policy from `HTTP_RETRY_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the policy from an arbitrary variable lookup.
    ///
    /// Recognized names (prefixed with [`ENV_PREFIX`]): `ENABLED`,
    /// `MAX_ATTEMPTS`, `BASE_DELAY_MS`, `MAX_DELAY_MS`, `BACKOFF_MULTIPLIER`,
    /// `JITTER_FACTOR`. Missing or unparseable values keep the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |suffix: &str| {
            lookup(&format!("{ENV_PREFIX}{suffix}"))
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        if let Some(enabled) = read("ENABLED") {
            if !parse_flag(&enabled) {
                tracing::info!("retries disabled by {ENV_PREFIX}ENABLED");
                return Self::disabled();
            }
        }

        let defaults = Self::default();
        let policy = Self {
            max_retries: parse_or(read("MAX_ATTEMPTS"), "MAX_ATTEMPTS", defaults.max_retries),
            base_delay_ms: parse_or(read("BASE_DELAY_MS"), "BASE_DELAY_MS", defaults.base_delay_ms),
            max_delay_ms: parse_or(read("MAX_DELAY_MS"), "MAX_DELAY_MS", defaults.max_delay_ms),
            backoff_multiplier: parse_or(
                read("BACKOFF_MULTIPLIER"),
                "BACKOFF_MULTIPLIER",
                defaults.backoff_multiplier,
            ),
            jitter_factor: parse_or(
                read("JITTER_FACTOR"),
                "JITTER_FACTOR",
                defaults.jitter_factor,
            ),
        };

        tracing::info!(
            max_retries = policy.max_retries,
            base_delay_ms = policy.base_delay_ms,
            max_delay_ms = policy.max_delay_ms,
            backoff_multiplier = policy.backoff_multiplier,
            jitter_factor = policy.jitter_factor,
            "retry policy configured from environment"
        );
        policy
    }
}

/// Accepts `true`, `1` and `yes` (any case) as enabled.
pub(crate) fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1" || value.eq_ignore_ascii_case("yes")
}

pub(crate) fn parse_or<T>(value: Option<String>, name: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    match value {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(variable = name, value = %raw, "ignoring unparseable setting");
            default
        }),
        None => default,
    }
}
