//! Alert Engine
//!
//! Evaluates registered rules against every tick of their instrument and
//! hands triggered events to an [`AlertNotifier`].
//!
//! Rule lists are copy-on-write: evaluation iterates an `Arc` snapshot taken
//! under a short read lock, so a one-shot rule removing itself mid-iteration
//! only affects the next tick.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::application::ports::AlertNotifier;
use crate::domain::alert::AlertRule;
use crate::domain::market::{CanonicalDepth, CanonicalTick, InstrumentKey};
use crate::infrastructure::metrics;

type RuleList = Arc<Vec<Arc<AlertRule>>>;

/// Rule index keyed by instrument.
pub struct AlertEngine {
    rules: RwLock<HashMap<InstrumentKey, RuleList>>,
    notifier: Arc<dyn AlertNotifier>,
}

impl std::fmt::Debug for AlertEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertEngine")
            .field("rule_count", &self.rule_count())
            .finish_non_exhaustive()
    }
}

impl AlertEngine {
    /// Create an engine delivering events to `notifier`.
    #[must_use]
    pub fn new(notifier: Arc<dyn AlertNotifier>) -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            notifier,
        }
    }

    /// Register a rule under its instrument.
    pub fn add_rule(&self, rule: AlertRule) -> Arc<AlertRule> {
        let rule = Arc::new(rule);
        let mut rules = self.rules.write();
        let list = rules.entry(rule.instrument_key().to_string()).or_default();

        let mut next = Vec::with_capacity(list.len() + 1);
        next.extend(list.iter().cloned());
        next.push(Arc::clone(&rule));
        *list = Arc::new(next);

        let count = rules.values().map(|l| l.len()).sum();
        drop(rules);
        metrics::set_active_rules(count);

        tracing::info!(
            rule_id = %rule.id(),
            client_id = rule.client_id(),
            instrument = rule.instrument_key(),
            rule_type = ?rule.rule_type(),
            threshold = %rule.threshold(),
            "Alert rule added"
        );
        rule
    }

    /// Remove a rule by id, scanning every instrument.
    ///
    /// Returns `true` if a rule was removed.
    pub fn remove_rule(&self, rule_id: Uuid) -> bool {
        let mut rules = self.rules.write();
        let mut removed = false;

        rules.retain(|_, list| {
            if list.iter().any(|r| r.id() == rule_id) {
                removed = true;
                let next: Vec<Arc<AlertRule>> =
                    list.iter().filter(|r| r.id() != rule_id).cloned().collect();
                *list = Arc::new(next);
            }
            !list.is_empty()
        });

        let count = rules.values().map(|l| l.len()).sum();
        drop(rules);
        if removed {
            metrics::set_active_rules(count);
            tracing::debug!(%rule_id, "Alert rule removed");
        }
        removed
    }

    /// Evaluate the rules of the tick's instrument.
    ///
    /// Returns the number of alerts fired.
    pub fn on_tick(&self, tick: &CanonicalTick) -> usize {
        let Some(snapshot) = self.rules.read().get(&tick.instrument_key).cloned() else {
            return 0;
        };

        let mut fired = 0;
        for rule in snapshot.iter() {
            let Some(value) = rule.evaluate(tick) else {
                continue;
            };
            // Deactivation decides the winner when two ticks race on a one-shot rule.
            if rule.is_one_shot() && !rule.deactivate() {
                continue;
            }

            tracing::info!(
                rule_id = %rule.id(),
                client_id = rule.client_id(),
                instrument = rule.instrument_key(),
                trigger_value = %value,
                message = rule.message(),
                "Alert triggered"
            );
            metrics::record_alert_fired(rule.rule_type().as_str());
            self.notifier.accept(rule.trigger(value));
            fired += 1;

            if rule.is_one_shot() {
                self.remove_rule(rule.id());
            }
        }
        fired
    }

    /// Book updates carry no rules yet.
    pub const fn on_depth(&self, _depth: &CanonicalDepth) {}

    /// Rules registered for an instrument.
    #[must_use]
    pub fn rules_for(&self, key: &str) -> Vec<Arc<AlertRule>> {
        self.rules
            .read()
            .get(key)
            .map(|list| list.to_vec())
            .unwrap_or_default()
    }

    /// Total registered rules.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.read().values().map(|l| l.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::application::ports::MockAlertNotifier;
    use crate::domain::alert::{AlertEvent, RuleType};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<AlertEvent>>);

    impl AlertNotifier for Recorder {
        fn accept(&self, event: AlertEvent) {
            self.0.lock().push(event);
        }
    }

    fn tick(ltp: Decimal) -> CanonicalTick {
        CanonicalTick::new("NSE_EQ|X", ltp, dec!(100))
    }

    #[test]
    fn one_shot_fires_once_and_is_removed() {
        let recorder = Arc::new(Recorder::default());
        let engine = AlertEngine::new(recorder.clone());
        let rule = engine.add_rule(AlertRule::new(
            "client-1",
            "NSE_EQ|X",
            RuleType::PriceAbove,
            dec!(100),
            "above 100",
        ));

        assert_eq!(engine.on_tick(&tick(dec!(99))), 0);
        assert_eq!(engine.on_tick(&tick(dec!(101))), 1);
        assert_eq!(engine.on_tick(&tick(dec!(105))), 0);

        let events = recorder.0.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].trigger_value, dec!(101));
        assert_eq!(events[0].rule_id, rule.id());
        assert!(!rule.is_active());
        assert_eq!(engine.rule_count(), 0);
    }

    #[test]
    fn stored_rule_id_is_kept_through_firing_and_removal() {
        let recorder = Arc::new(Recorder::default());
        let engine = AlertEngine::new(recorder.clone());
        let stored = Uuid::new_v4();

        engine.add_rule(
            AlertRule::new("client-1", "NSE_EQ|X", RuleType::PriceBelow, dec!(90), "below 90")
                .with_id(stored)
                .repeating(),
        );
        engine.on_tick(&tick(dec!(89)));

        assert_eq!(recorder.0.lock()[0].rule_id, stored);
        assert!(engine.remove_rule(stored));
        assert_eq!(engine.rule_count(), 0);
    }

    #[test]
    fn threshold_edge_does_not_fire() {
        let mut notifier = MockAlertNotifier::new();
        notifier.expect_accept().never();
        let engine = AlertEngine::new(Arc::new(notifier));
        engine.add_rule(AlertRule::new(
            "c",
            "NSE_EQ|X",
            RuleType::PriceAbove,
            dec!(100),
            "m",
        ));

        assert_eq!(engine.on_tick(&tick(dec!(100))), 0);
        assert_eq!(engine.rule_count(), 1);
    }

    #[test]
    fn repeating_rule_stays() {
        let mut notifier = MockAlertNotifier::new();
        notifier.expect_accept().times(2).return_const(());
        let engine = AlertEngine::new(Arc::new(notifier));
        engine.add_rule(
            AlertRule::new("c", "NSE_EQ|X", RuleType::PriceBelow, dec!(50), "m").repeating(),
        );

        engine.on_tick(&tick(dec!(49)));
        engine.on_tick(&tick(dec!(48)));
        assert_eq!(engine.rule_count(), 1);
    }

    #[test]
    fn only_matching_instrument_is_evaluated() {
        let recorder = Arc::new(Recorder::default());
        let engine = AlertEngine::new(recorder.clone());
        engine.add_rule(AlertRule::new(
            "c",
            "NSE_EQ|Y",
            RuleType::PriceAbove,
            dec!(1),
            "m",
        ));

        assert_eq!(engine.on_tick(&tick(dec!(500))), 0);
        assert!(recorder.0.lock().is_empty());
    }

    #[test]
    fn inactive_rule_is_skipped() {
        let recorder = Arc::new(Recorder::default());
        let engine = AlertEngine::new(recorder.clone());
        engine.add_rule(
            AlertRule::new("c", "NSE_EQ|X", RuleType::PriceAbove, dec!(1), "m").inactive(),
        );

        assert_eq!(engine.on_tick(&tick(dec!(500))), 0);
    }

    #[test]
    fn several_one_shots_fire_in_same_tick() {
        let recorder = Arc::new(Recorder::default());
        let engine = AlertEngine::new(recorder.clone());
        for threshold in [dec!(100), dec!(101), dec!(102)] {
            engine.add_rule(AlertRule::new(
                "c",
                "NSE_EQ|X",
                RuleType::PriceAbove,
                threshold,
                "m",
            ));
        }

        assert_eq!(engine.on_tick(&tick(dec!(110))), 3);
        assert_eq!(engine.rule_count(), 0);
        assert_eq!(recorder.0.lock().len(), 3);
    }

    #[test]
    fn remove_rule_by_id() {
        let recorder = Arc::new(Recorder::default());
        let engine = AlertEngine::new(recorder);
        let a = engine.add_rule(AlertRule::new("c", "NSE_EQ|X", RuleType::PriceAbove, dec!(1), "a"));
        let b = engine.add_rule(AlertRule::new("c", "NSE_EQ|Z", RuleType::PriceAbove, dec!(1), "b"));

        assert!(engine.remove_rule(a.id()));
        assert!(!engine.remove_rule(a.id()));
        assert!(engine.rules_for("NSE_EQ|X").is_empty());
        assert_eq!(engine.rules_for("NSE_EQ|Z")[0].id(), b.id());
    }

    #[test]
    fn depth_is_ignored() {
        let mut notifier = MockAlertNotifier::new();
        notifier.expect_accept().never();
        let engine = AlertEngine::new(Arc::new(notifier));
        engine.add_rule(AlertRule::new("c", "NSE_EQ|X", RuleType::PriceAbove, dec!(1), "m"));

        engine.on_depth(&CanonicalDepth::empty("NSE_EQ|X"));
        assert_eq!(engine.rule_count(), 1);
    }
}
