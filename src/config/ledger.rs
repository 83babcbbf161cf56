//! Ledger tuning loaded from environment variables.
//!
//! `LEDGER_MAX_RETRIES` bounds how many times a conflicting posting is retried and
//! `LEDGER_RETRY_BACKOFF_MS` is the base delay, multiplied by the attempt number.

use std::time::Duration;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_MS: u64 = 25;

/// Retry policy for concurrency conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerSettings {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Base delay between attempts
    pub retry_backoff: Duration,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
        }
    }
}

impl LedgerSettings {
    /// Reads the settings from the environment, keeping defaults for unset or
    /// unparsable values.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_retries = std::env::var("LEDGER_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_retries);
        let retry_backoff = std::env::var("LEDGER_RETRY_BACKOFF_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map_or(defaults.retry_backoff, Duration::from_millis);
        Self {
            max_retries,
            retry_backoff,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_backoff.saturating_mul(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_linear() {
        let settings = LedgerSettings {
            max_retries: 3,
            retry_backoff: Duration::from_millis(10),
        };
        assert_eq!(settings.backoff_for(1), Duration::from_millis(10));
        assert_eq!(settings.backoff_for(3), Duration::from_millis(30));
    }

    #[test]
    fn test_backoff_saturates_instead_of_overflowing() {
        let settings = LedgerSettings {
            max_retries: 3,
            retry_backoff: Duration::from_millis(u64::MAX),
        };
        assert_eq!(settings.backoff_for(u32::MAX), Duration::MAX);
    }

    #[test]
    fn test_defaults() {
        let settings = LedgerSettings::default();
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.retry_backoff, Duration::from_millis(25));
    }
}
