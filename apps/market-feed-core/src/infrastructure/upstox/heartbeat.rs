//! Heartbeat
//!
//! Liveness monitoring for a feed socket. A monitor task asks the read loop
//! to ping on every interval; any inbound frame counts as proof of life. If
//! nothing arrives within the timeout after a ping, the monitor reports the
//! connection as lost.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::FeedSettings;

/// Ping cadence and liveness timeout.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Silence after a ping before the connection is considered lost.
    pub timeout: Duration,
}

impl HeartbeatConfig {
    /// Heartbeat of a feed connection.
    #[must_use]
    pub const fn from_feed_settings(settings: &FeedSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
            timeout: settings.heartbeat_timeout,
        }
    }
}

/// Request from the monitor to the read loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatSignal {
    /// Send a ping frame.
    Ping,
    /// No inbound traffic within the timeout.
    Expired,
}

/// Liveness shared by the read loop and the monitor.
#[derive(Debug)]
pub struct Liveness {
    last_seen: Mutex<Instant>,
    awaiting: AtomicBool,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness {
    /// Fresh liveness, seen now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_seen: Mutex::new(Instant::now()),
            awaiting: AtomicBool::new(false),
        }
    }

    /// Any inbound frame arrived.
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
        self.awaiting.store(false, Ordering::Release);
    }

    /// A ping went out.
    pub fn ping_sent(&self) {
        self.awaiting.store(true, Ordering::Release);
    }

    /// Whether a ping is unanswered.
    #[must_use]
    pub fn is_awaiting(&self) -> bool {
        self.awaiting.load(Ordering::Acquire)
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn silence(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Whether the connection has been silent past `timeout` with a ping out.
    #[must_use]
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.is_awaiting() && self.silence() > timeout
    }
}

/// Spawn the monitor for one connection attempt.
///
/// The task stops when `cancel` fires, the receiver is dropped or the
/// connection expires.
pub fn spawn_monitor(
    config: HeartbeatConfig,
    liveness: Arc<Liveness>,
    cancel: CancellationToken,
) -> mpsc::Receiver<HeartbeatSignal> {
    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.ping_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; the socket was just opened.
        interval.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if liveness.is_expired(config.timeout) {
                        tracing::warn!(
                            silence_ms = u64::try_from(liveness.silence().as_millis()).unwrap_or(u64::MAX),
                            timeout_ms = u64::try_from(config.timeout.as_millis()).unwrap_or(u64::MAX),
                            "Heartbeat expired"
                        );
                        let _ = tx.send(HeartbeatSignal::Expired).await;
                        break;
                    }
                    if tx.send(HeartbeatSignal::Ping).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_liveness_is_not_expired() {
        let liveness = Liveness::new();
        assert!(!liveness.is_awaiting());
        assert!(!liveness.is_expired(Duration::ZERO));
    }

    #[test]
    fn touch_clears_pending_ping() {
        let liveness = Liveness::new();
        liveness.ping_sent();
        assert!(liveness.is_awaiting());

        liveness.touch();
        assert!(!liveness.is_awaiting());
    }

    #[test]
    fn unanswered_ping_expires() {
        let liveness = Liveness::new();
        liveness.ping_sent();
        std::thread::sleep(Duration::from_millis(5));
        assert!(liveness.is_expired(Duration::from_millis(1)));
        assert!(!liveness.is_expired(Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_pings_then_expires() {
        let config = HeartbeatConfig {
            ping_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(15),
        };
        let liveness = Arc::new(Liveness::new());
        let cancel = CancellationToken::new();
        let mut rx = spawn_monitor(config, Arc::clone(&liveness), cancel.clone());

        assert_eq!(rx.recv().await, Some(HeartbeatSignal::Ping));
        liveness.touch();
        liveness.ping_sent();
        // Silent for 10s: still within the timeout.
        assert_eq!(rx.recv().await, Some(HeartbeatSignal::Ping));
        assert_eq!(rx.recv().await, Some(HeartbeatSignal::Expired));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_stops_on_cancel() {
        let config = HeartbeatConfig::from_feed_settings(&FeedSettings::default());
        let cancel = CancellationToken::new();
        let mut rx = spawn_monitor(config, Arc::new(Liveness::new()), cancel.clone());

        cancel.cancel();
        assert_eq!(rx.recv().await, None);
    }
}
