//! Reconnection Backoff
//!
//! Bounded exponential backoff with jitter between reconnect attempts of a
//! feed connection. The delay for attempt `n` (1-based) is
//! `initial * multiplier^(n-1)`, capped at `max_delay`, then jittered.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::FeedSettings;

/// Backoff parameters.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Upper bound of the un-jittered delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::from_feed_settings(&FeedSettings::default())
    }
}

impl BackoffConfig {
    /// Backoff of a feed connection.
    #[must_use]
    pub const fn from_feed_settings(settings: &FeedSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter_factor: 0.1,
            max_attempts: settings.max_reconnect_attempts,
        }
    }

    /// Same parameters without jitter.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    /// Un-jittered delay before attempt `attempt` (1-based).
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let max = self.max_delay.as_secs_f64();
        let secs = self.initial_delay.as_secs_f64() * factor;
        if secs.is_finite() && secs < max {
            Duration::from_secs_f64(secs)
        } else {
            self.max_delay
        }
    }
}

/// Attempt counter producing successive backoff delays.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    /// Create a backoff with no attempts made.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempt += 1;
        Some(jitter(
            self.config.base_delay(self.attempt),
            self.config.jitter_factor,
        ))
    }

    /// Start over after a connection reached LIVE.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Configured attempt budget (0 = unlimited).
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Whether no further attempt is allowed.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.config.max_attempts > 0 && self.attempt >= self.config.max_attempts
    }
}

fn jitter(delay: Duration, factor: f64) -> Duration {
    if factor <= 0.0 || delay.is_zero() {
        return delay;
    }
    let secs = delay.as_secs_f64();
    let spread = secs * factor.min(1.0);
    let offset: f64 = rand::rng().random_range(-spread..=spread);
    Duration::from_secs_f64((secs + offset).max(0.001))
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn config(max_attempts: u32) -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    #[test_case(1, 100)]
    #[test_case(2, 200)]
    #[test_case(3, 400)]
    #[test_case(4, 800)]
    #[test_case(5, 1000)]
    #[test_case(40, 1000)]
    fn delay_grows_then_caps(attempt: u32, expected_ms: u64) {
        assert_eq!(
            config(0).base_delay(attempt),
            Duration::from_millis(expected_ms)
        );
    }

    #[test]
    fn budget_is_bounded() {
        let mut backoff = Backoff::new(config(3));

        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(400)));
        assert!(backoff.is_exhausted());
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempt(), 3);
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut backoff = Backoff::new(config(3));
        let _ = backoff.next_delay();
        let _ = backoff.next_delay();

        backoff.reset();

        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn zero_budget_is_unlimited() {
        let mut backoff = Backoff::new(config(0));
        for _ in 0..500 {
            assert!(backoff.next_delay().is_some());
        }
        assert!(!backoff.is_exhausted());
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = BackoffConfig {
            jitter_factor: 0.1,
            initial_delay: Duration::from_secs(1),
            ..config(0)
        };
        for _ in 0..100 {
            let mut backoff = Backoff::new(config.clone());
            let millis = backoff.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&millis), "{millis}ms out of range");
        }
    }

    #[test]
    fn follows_feed_settings() {
        let settings = FeedSettings {
            reconnect_delay_initial: Duration::from_millis(250),
            max_reconnect_attempts: 4,
            ..FeedSettings::default()
        };
        let config = BackoffConfig::from_feed_settings(&settings).without_jitter();

        assert_eq!(config.base_delay(1), Duration::from_millis(250));
        assert_eq!(config.max_attempts, 4);
    }
}
