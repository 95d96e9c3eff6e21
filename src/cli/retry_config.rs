//! Signing retry policy overrides from the environment.
//!
//! Timestamp servers are the only flaky network dependency, so signing is
//! the only operation with a tunable retry count. The delay between
//! attempts stays fixed.

use crate::bundler::SigningSettings;

/// Environment variable overriding the number of signing attempts.
pub const SIGN_RETRIES_ENV: &str = "OMAHA_PACKAGER_SIGN_RETRIES";

/// Environment variable overriding the fixed delay between attempts.
pub const SIGN_BACKOFF_ENV: &str = "OMAHA_PACKAGER_SIGN_BACKOFF_SECS";

const MAX_ATTEMPTS: u32 = 20;
const MAX_BACKOFF_SECS: u64 = 60;

/// Signing retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Attempts per signing pass
    pub sign_attempts: u32,

    /// Fixed delay between attempts, in seconds
    pub sign_backoff_secs: u64,
}

impl RetryConfig {
    /// Parse a value with clamping to `[min, max]`
    ///
    /// Missing or unparsable values fall back to `default`.
    fn parse_value<T>(raw: Option<String>, default: T, min: T, max: T) -> T
    where
        T: std::str::FromStr + Ord,
    {
        raw.and_then(|s| s.trim().parse::<T>().ok())
            .map(|v| v.clamp(min, max))
            .unwrap_or(default)
    }

    /// Read the policy from the environment, falling back to `settings`
    pub fn from_env(settings: &SigningSettings) -> Self {
        Self {
            sign_attempts: Self::parse_value(std::env::var(SIGN_RETRIES_ENV).ok(), settings.attempts, 1, MAX_ATTEMPTS),
            sign_backoff_secs: Self::parse_value(
                std::env::var(SIGN_BACKOFF_ENV).ok(),
                settings.backoff_secs,
                0,
                MAX_BACKOFF_SECS,
            ),
        }
    }

    /// Apply the policy to signing settings
    pub fn apply(&self, settings: &mut SigningSettings) {
        settings.attempts = self.sign_attempts;
        settings.backoff_secs = self.sign_backoff_secs;
    }
}
