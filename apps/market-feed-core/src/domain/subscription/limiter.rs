//! Subscription limit guard.

use super::FeedMode;

/// Errors raised when a subscribe request is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// Requested instrument count exceeds the mode's individual limit.
    #[error("subscription limit exceeded: {count} instruments requested, {limit} allowed for {mode}")]
    LimitExceeded {
        /// Requested instrument count.
        count: usize,
        /// Limit for the mode.
        limit: usize,
        /// Requested mode.
        mode: FeedMode,
    },

    /// Subscribe request without instruments.
    #[error("subscribe request has no instrument keys")]
    EmptyRequest,
}

/// Validates instrument counts against fixed per-mode limits.
///
/// # Example
///
/// ```rust
/// use market_feed_core::domain::subscription::{FeedMode, SubscriptionLimiter};
///
/// assert!(SubscriptionLimiter::validate(1000, FeedMode::FullD30).is_ok());
/// assert!(SubscriptionLimiter::validate(1001, FeedMode::FullD30).is_err());
/// assert_eq!(SubscriptionLimiter::remaining(1500, FeedMode::Full), 500);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscriptionLimiter;

impl SubscriptionLimiter {
    /// Fail if `count` exceeds the individual limit of `mode`.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::LimitExceeded`] when `count > limit`.
    pub const fn validate(count: usize, mode: FeedMode) -> Result<(), SubscriptionError> {
        let limit = mode.individual_limit();
        if count > limit {
            return Err(SubscriptionError::LimitExceeded { count, limit, mode });
        }
        Ok(())
    }

    /// Non-failing equivalent of [`Self::validate`].
    #[must_use]
    pub const fn is_valid(count: usize, mode: FeedMode) -> bool {
        count <= mode.individual_limit()
    }

    /// Instruments that can still be added on top of `count`.
    #[must_use]
    pub const fn remaining(count: usize, mode: FeedMode) -> usize {
        mode.individual_limit().saturating_sub(count)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    #[test_case(FeedMode::Ltpc, 5000)]
    #[test_case(FeedMode::Full, 2000)]
    #[test_case(FeedMode::FullD30, 1000)]
    #[test_case(FeedMode::OptionGreeks, 2000)]
    fn boundary(mode: FeedMode, limit: usize) {
        assert!(SubscriptionLimiter::validate(limit, mode).is_ok());
        assert_eq!(
            SubscriptionLimiter::validate(limit + 1, mode),
            Err(SubscriptionError::LimitExceeded {
                count: limit + 1,
                limit,
                mode,
            })
        );
    }

    #[test]
    fn zero_is_valid() {
        assert!(SubscriptionLimiter::is_valid(0, FeedMode::FullD30));
    }

    #[test]
    fn remaining_saturates() {
        assert_eq!(SubscriptionLimiter::remaining(0, FeedMode::Ltpc), 5000);
        assert_eq!(SubscriptionLimiter::remaining(5000, FeedMode::Ltpc), 0);
        assert_eq!(SubscriptionLimiter::remaining(9000, FeedMode::Ltpc), 0);
    }

    #[test]
    fn error_message_names_mode() {
        let err = SubscriptionLimiter::validate(1001, FeedMode::FullD30).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("1001"));
        assert!(msg.contains("1000"));
        assert!(msg.contains("full_d30"));
    }

    proptest! {
        #[test]
        fn validate_agrees_with_is_valid(count in 0usize..10_000, idx in 0usize..4) {
            let mode = FeedMode::all()[idx];
            prop_assert_eq!(
                SubscriptionLimiter::validate(count, mode).is_ok(),
                SubscriptionLimiter::is_valid(count, mode)
            );
        }
    }
}
