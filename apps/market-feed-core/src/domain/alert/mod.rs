//! Alert Rules
//!
//! Price, change and volume rules evaluated against incoming ticks.
//!
//! # Design
//!
//! Rule evaluation goes through a dispatch table mapping each rule type to a
//! value extractor and a strict comparator, so adding a rule type is one new
//! table row. Comparisons are strict: a PRICE_ABOVE(100) rule does not fire at
//! exactly 100.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::market::{CanonicalTick, InstrumentKey};

// =============================================================================
// Rule Type & Dispatch
// =============================================================================

/// Condition a rule checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleType {
    /// Last traded price strictly above threshold.
    PriceAbove,
    /// Last traded price strictly below threshold.
    PriceBelow,
    /// Change percent strictly above threshold.
    ChangePercentGreater,
    /// Change percent strictly below threshold.
    ChangePercentLess,
    /// Volume strictly above threshold.
    VolumeGreater,
}

type Extractor = fn(&CanonicalTick) -> Decimal;
type Comparator = fn(Decimal, Decimal) -> bool;

/// Value extractor and comparator for one rule type.
#[derive(Clone, Copy)]
struct Evaluator {
    extract: Extractor,
    compare: Comparator,
}

fn ltp(tick: &CanonicalTick) -> Decimal {
    tick.ltp
}

fn change_percent(tick: &CanonicalTick) -> Decimal {
    tick.change_percent
}

fn volume(tick: &CanonicalTick) -> Decimal {
    Decimal::from(tick.volume)
}

fn greater(value: Decimal, threshold: Decimal) -> bool {
    value > threshold
}

fn less(value: Decimal, threshold: Decimal) -> bool {
    value < threshold
}

/// Indexed by `RuleType as usize`.
const DISPATCH: [Evaluator; 5] = [
    Evaluator { extract: ltp, compare: greater },
    Evaluator { extract: ltp, compare: less },
    Evaluator { extract: change_percent, compare: greater },
    Evaluator { extract: change_percent, compare: less },
    Evaluator { extract: volume, compare: greater },
];

impl RuleType {
    /// Get the rule type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PriceAbove => "PRICE_ABOVE",
            Self::PriceBelow => "PRICE_BELOW",
            Self::ChangePercentGreater => "CHANGE_PERCENT_GREATER",
            Self::ChangePercentLess => "CHANGE_PERCENT_LESS",
            Self::VolumeGreater => "VOLUME_GREATER",
        }
    }

    const fn evaluator(self) -> Evaluator {
        DISPATCH[self as usize]
    }

    /// Value this rule type reads from a tick.
    #[must_use]
    pub fn extract(self, tick: &CanonicalTick) -> Decimal {
        (self.evaluator().extract)(tick)
    }

    /// Whether `value` satisfies this rule type against `threshold`.
    #[must_use]
    pub fn is_met(self, value: Decimal, threshold: Decimal) -> bool {
        (self.evaluator().compare)(value, threshold)
    }
}

// =============================================================================
// Alert Rule
// =============================================================================

/// A client-registered alert rule.
///
/// Rules default to active and one-shot.
#[derive(Debug)]
pub struct AlertRule {
    id: Uuid,
    client_id: String,
    instrument_key: InstrumentKey,
    rule_type: RuleType,
    threshold: Decimal,
    message: String,
    active: AtomicBool,
    one_shot: bool,
}

impl AlertRule {
    /// Create an active one-shot rule with a fresh id.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        instrument_key: impl Into<InstrumentKey>,
        rule_type: RuleType,
        threshold: Decimal,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_id: client_id.into(),
            instrument_key: instrument_key.into(),
            rule_type,
            threshold,
            message: message.into(),
            active: AtomicBool::new(true),
            one_shot: true,
        }
    }

    /// Use an id assigned by the rule store instead of a fresh one.
    #[must_use]
    pub const fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Keep the rule after it fires.
    #[must_use]
    pub const fn repeating(mut self) -> Self {
        self.one_shot = false;
        self
    }

    /// Register the rule disabled.
    #[must_use]
    pub fn inactive(self) -> Self {
        self.active.store(false, Ordering::Release);
        self
    }

    /// Rule id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Owning client.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Watched instrument.
    #[must_use]
    pub fn instrument_key(&self) -> &str {
        &self.instrument_key
    }

    /// Rule type.
    #[must_use]
    pub const fn rule_type(&self) -> RuleType {
        self.rule_type
    }

    /// Threshold.
    #[must_use]
    pub const fn threshold(&self) -> Decimal {
        self.threshold
    }

    /// Message delivered with the alert.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the rule fires at most once.
    #[must_use]
    pub const fn is_one_shot(&self) -> bool {
        self.one_shot
    }

    /// Whether the rule is evaluated.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop evaluating the rule.
    ///
    /// Returns `true` if this call deactivated it.
    pub fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }

    /// Evaluate against a tick; returns the trigger value when the rule fires.
    #[must_use]
    pub fn evaluate(&self, tick: &CanonicalTick) -> Option<Decimal> {
        if !self.is_active() || tick.instrument_key != self.instrument_key {
            return None;
        }
        let value = self.rule_type.extract(tick);
        self.rule_type
            .is_met(value, self.threshold)
            .then_some(value)
    }

    /// Build the event emitted when this rule fires.
    #[must_use]
    pub fn trigger(&self, value: Decimal) -> AlertEvent {
        AlertEvent {
            rule_id: self.id,
            client_id: self.client_id.clone(),
            instrument_key: self.instrument_key.clone(),
            rule_type: self.rule_type,
            message: self.message.clone(),
            trigger_value: value,
            triggered_at: Utc::now(),
        }
    }
}

// =============================================================================
// Alert Event
// =============================================================================

/// Emitted once per rule trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Rule that fired.
    pub rule_id: Uuid,
    /// Owning client.
    pub client_id: String,
    /// Instrument.
    pub instrument_key: InstrumentKey,
    /// Rule type that fired.
    pub rule_type: RuleType,
    /// Rule message.
    pub message: String,
    /// Value that satisfied the rule.
    pub trigger_value: Decimal,
    /// Trigger time.
    pub triggered_at: DateTime<Utc>,
}
