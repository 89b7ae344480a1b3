//! Retry policy for throttled and transiently failing requests

use std::time::Duration;

use rand::Rng;

/// Bounded-attempt retry with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Fewer attempts, longer pauses; for busy production tenants
    pub fn conservative() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 3.0,
            jitter: true,
        }
    }

    /// More attempts, shorter pauses; for development and tests
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Single attempt, no backoff
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Backoff delay before retrying after the given zero-based attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let delay = self.base_delay.mul_f64(factor).min(self.max_delay);
        if self.jitter && delay > Duration::ZERO {
            delay.mul_f64(rand::rng().random_range(0.75..=1.25))
        } else {
            delay
        }
    }
}

/// Server-signaled throttling statuses
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 503)
}

/// Delay from a `Retry-After` header; seconds form only, dates are ignored
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay, Duration::from_millis(500));
        assert!(config.jitter);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        };
        assert_eq!(config.delay_for(0), Duration::from_millis(500));
        assert_eq!(config.delay_for(1), Duration::from_secs(1));
        assert_eq!(config.delay_for(2), Duration::from_secs(2));
        assert_eq!(config.delay_for(30), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_band() {
        let config = RetryConfig::default();
        for attempt in 0..4 {
            let base = RetryConfig {
                jitter: false,
                ..config.clone()
            }
            .delay_for(attempt);
            let jittered = config.delay_for(attempt);
            assert!(jittered >= base.mul_f64(0.75));
            assert!(jittered <= base.mul_f64(1.25));
        }
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(500));
        assert!(!is_retryable_status(404));
    }

    #[test]
    fn retry_after_seconds_form() {
        assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after(" 10 "), Some(Duration::from_secs(10)));
        assert_eq!(parse_retry_after("Fri, 07 Aug 2026 07:28:00 GMT"), None);
    }
}
