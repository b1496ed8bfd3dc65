//! Broadcast Channels
//!
//! Fan-out of live market records and alert events to in-process consumers
//! over tokio broadcast channels.
//!
//! # Architecture
//!
//! The [`BroadcastHub`] keeps one channel per record kind:
//! - Ticks from every connection
//! - Order books (only for modes that carry depth)
//! - Alert events from the alert engine
//!
//! Slow receivers lag and lose the oldest records; a send never blocks the
//! socket read loop.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::application::ports::{AlertNotifier, FeedListener};
use crate::domain::alert::AlertEvent;
use crate::domain::market::{CanonicalDepth, CanonicalTick};
use crate::infrastructure::config::BroadcastSettings;

/// Channel capacities.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Capacity of the tick channel.
    pub ticks_capacity: usize,
    /// Capacity of the depth channel.
    pub depth_capacity: usize,
    /// Capacity of the alert channel.
    pub alerts_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self::from(&BroadcastSettings::default())
    }
}

impl From<&BroadcastSettings> for BroadcastConfig {
    fn from(settings: &BroadcastSettings) -> Self {
        // tokio panics on a zero capacity.
        Self {
            ticks_capacity: settings.ticks_capacity.max(1),
            depth_capacity: settings.depth_capacity.max(1),
            alerts_capacity: settings.alerts_capacity.max(1),
        }
    }
}

/// Hub of broadcast channels for ticks, books and alerts.
#[derive(Debug)]
pub struct BroadcastHub {
    ticks_tx: broadcast::Sender<Arc<CanonicalTick>>,
    depth_tx: broadcast::Sender<Arc<CanonicalDepth>>,
    alerts_tx: broadcast::Sender<AlertEvent>,
}

impl BroadcastHub {
    /// Create a hub with the given capacities.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            ticks_tx: broadcast::channel(config.ticks_capacity).0,
            depth_tx: broadcast::channel(config.depth_capacity).0,
            alerts_tx: broadcast::channel(config.alerts_capacity).0,
        }
    }

    /// Create a hub with default capacities.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    /// Publish a tick. Returns the number of receivers reached, or `None`
    /// when nobody is listening.
    pub fn send_tick(&self, tick: CanonicalTick) -> Option<usize> {
        self.ticks_tx.send(Arc::new(tick)).ok()
    }

    /// New tick receiver.
    #[must_use]
    pub fn ticks_rx(&self) -> broadcast::Receiver<Arc<CanonicalTick>> {
        self.ticks_tx.subscribe()
    }

    /// Publish a book.
    pub fn send_depth(&self, depth: CanonicalDepth) -> Option<usize> {
        self.depth_tx.send(Arc::new(depth)).ok()
    }

    /// New book receiver.
    #[must_use]
    pub fn depth_rx(&self) -> broadcast::Receiver<Arc<CanonicalDepth>> {
        self.depth_tx.subscribe()
    }

    /// Publish an alert event.
    pub fn send_alert(&self, event: AlertEvent) -> Option<usize> {
        self.alerts_tx.send(event).ok()
    }

    /// New alert receiver.
    #[must_use]
    pub fn alerts_rx(&self) -> broadcast::Receiver<AlertEvent> {
        self.alerts_tx.subscribe()
    }

    /// Receiver counts of every channel.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            tick_receivers: self.ticks_tx.receiver_count(),
            depth_receivers: self.depth_tx.receiver_count(),
            alert_receivers: self.alerts_tx.receiver_count(),
        }
    }
}

impl FeedListener for BroadcastHub {
    fn on_tick(&self, tick: CanonicalTick) {
        let _ = self.send_tick(tick);
    }

    fn on_depth(&self, depth: CanonicalDepth) {
        let _ = self.send_depth(depth);
    }
}

/// Shared hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

/// [`AlertNotifier`] publishing on the hub's alert channel.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    hub: SharedBroadcastHub,
}

impl BroadcastNotifier {
    /// Notifier over `hub`.
    #[must_use]
    pub const fn new(hub: SharedBroadcastHub) -> Self {
        Self { hub }
    }
}

impl AlertNotifier for BroadcastNotifier {
    fn accept(&self, event: AlertEvent) {
        let rule_id = event.rule_id;
        if self.hub.send_alert(event).is_none() {
            tracing::debug!(rule_id = %rule_id, "Alert fired with no listeners");
        }
    }
}

/// Receiver counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Tick receivers.
    pub tick_receivers: usize,
    /// Book receivers.
    pub depth_receivers: usize,
    /// Alert receivers.
    pub alert_receivers: usize,
}

impl BroadcastStats {
    /// Receivers across all channels.
    #[must_use]
    pub const fn total_receivers(&self) -> usize {
        self.tick_receivers + self.depth_receivers + self.alert_receivers
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::alert::{AlertRule, RuleType};

    fn tick(key: &str) -> CanonicalTick {
        CanonicalTick::new(key, dec!(101.5), dec!(100))
    }

    #[test]
    fn hub_starts_without_receivers() {
        let hub = BroadcastHub::with_defaults();
        assert_eq!(hub.stats(), BroadcastStats::default());
    }

    #[test]
    fn receiver_count_follows_drops() {
        let hub = BroadcastHub::with_defaults();
        let rx1 = hub.ticks_rx();
        let _rx2 = hub.ticks_rx();
        let _rx3 = hub.alerts_rx();
        assert_eq!(hub.stats().tick_receivers, 2);
        assert_eq!(hub.stats().total_receivers(), 3);

        drop(rx1);
        assert_eq!(hub.stats().tick_receivers, 1);
    }

    #[test]
    fn send_without_receivers_is_none() {
        let hub = BroadcastHub::with_defaults();
        assert!(hub.send_tick(tick("NSE_EQ|A")).is_none());
        assert!(hub.send_depth(CanonicalDepth::empty("NSE_EQ|A")).is_none());
    }

    #[tokio::test]
    async fn listener_fans_out_ticks() {
        let hub = BroadcastHub::with_defaults();
        let mut rx1 = hub.ticks_rx();
        let mut rx2 = hub.ticks_rx();

        hub.on_tick(tick("NSE_EQ|A"));

        assert_eq!(rx1.recv().await.unwrap().instrument_key, "NSE_EQ|A");
        assert_eq!(rx2.recv().await.unwrap().ltp, dec!(101.5));
    }

    #[tokio::test]
    async fn listener_forwards_books() {
        let hub = BroadcastHub::with_defaults();
        let mut rx = hub.depth_rx();

        hub.on_depth(CanonicalDepth::empty("NSE_FO|B"));

        assert_eq!(rx.recv().await.unwrap().instrument_key, "NSE_FO|B");
    }

    #[tokio::test]
    async fn notifier_publishes_alerts() {
        let hub = Arc::new(BroadcastHub::with_defaults());
        let mut rx = hub.alerts_rx();
        let notifier = BroadcastNotifier::new(Arc::clone(&hub));
        let rule = AlertRule::new("client", "NSE_EQ|A", RuleType::PriceAbove, dec!(100), "up");

        notifier.accept(rule.trigger(dec!(101)));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.client_id, "client");
        assert_eq!(event.trigger_value, dec!(101));
    }

    #[tokio::test]
    async fn slow_receiver_lags() {
        let hub = BroadcastHub::new(BroadcastConfig {
            ticks_capacity: 2,
            depth_capacity: 1,
            alerts_capacity: 1,
        });
        let mut rx = hub.ticks_rx();
        for key in ["a", "b", "c"] {
            hub.on_tick(tick(key));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
        assert_eq!(rx.recv().await.unwrap().instrument_key, "b");
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let config = BroadcastConfig::from(&BroadcastSettings {
            ticks_capacity: 0,
            depth_capacity: 0,
            alerts_capacity: 0,
        });
        assert_eq!(config.ticks_capacity, 1);
        let _hub = BroadcastHub::new(config);
    }
}
