//! Subscription Types
//!
//! Feed modes, per-mode instrument limits and client subscription tracking.
//!
//! # Design
//!
//! - [`SubscriptionLimiter`] is a fail-fast guard every subscribe request
//!   passes through before anything is sent upstream.
//! - [`SubscriptionRegistry`] reference-counts client subscriptions so that
//!   many clients watching the same instrument share one upstream
//!   subscription.

mod limiter;
mod registry;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

pub use limiter::{SubscriptionError, SubscriptionLimiter};
pub use registry::{ClientId, RegistryStats, SubscriptionPlan, SubscriptionRegistry};

use crate::domain::market::InstrumentKey;

// =============================================================================
// Feed Mode
// =============================================================================

/// Subscription granularity requested from the exchange feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedMode {
    /// Last traded price and close only.
    Ltpc,
    /// Full quote with 5-level depth.
    Full,
    /// Full quote with 30-level depth.
    FullD30,
    /// First level with option greeks.
    OptionGreeks,
}

impl FeedMode {
    /// Get all modes.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Ltpc, Self::Full, Self::FullD30, Self::OptionGreeks]
    }

    /// Maximum instrument count for an individual (non-combined) subscription.
    #[must_use]
    pub const fn individual_limit(&self) -> usize {
        match self {
            Self::Ltpc => 5000,
            Self::Full | Self::OptionGreeks => 2000,
            Self::FullD30 => 1000,
        }
    }

    /// Mode name used on the wire.
    #[must_use]
    pub const fn as_wire(&self) -> &'static str {
        match self {
            Self::Ltpc => "ltpc",
            Self::Full => "full",
            Self::FullD30 => "full_d30",
            Self::OptionGreeks => "option_greeks",
        }
    }

    /// Parse a mode name (case-insensitive).
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "ltpc" => Some(Self::Ltpc),
            "full" => Some(Self::Full),
            "full_d30" | "fulld30" => Some(Self::FullD30),
            "option_greeks" | "optiongreeks" => Some(Self::OptionGreeks),
            _ => None,
        }
    }

    /// Relative payload richness, used when several clients ask for the same
    /// instrument in different modes.
    const fn richness(self) -> u8 {
        match self {
            Self::Ltpc => 0,
            Self::OptionGreeks => 1,
            Self::Full => 2,
            Self::FullD30 => 3,
        }
    }

    /// The richer of two modes.
    #[must_use]
    pub const fn richest(self, other: Self) -> Self {
        if other.richness() > self.richness() {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for FeedMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire())
    }
}

// =============================================================================
// Subscription Changes
// =============================================================================

/// Changes to upstream subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Keys to subscribe upstream.
    pub subscribe: HashSet<InstrumentKey>,
    /// Keys to unsubscribe upstream.
    pub unsubscribe: HashSet<InstrumentKey>,
}

impl SubscriptionChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }

    /// Create changes with only subscribes.
    #[must_use]
    pub fn subscribe_only(keys: impl IntoIterator<Item = InstrumentKey>) -> Self {
        Self {
            subscribe: keys.into_iter().collect(),
            unsubscribe: HashSet::new(),
        }
    }

    /// Create changes with only unsubscribes.
    #[must_use]
    pub fn unsubscribe_only(keys: impl IntoIterator<Item = InstrumentKey>) -> Self {
        Self {
            subscribe: HashSet::new(),
            unsubscribe: keys.into_iter().collect(),
        }
    }
}
