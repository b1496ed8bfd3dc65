//! Service Health Tracking
//!
//! Shared, lock-light status of every feed connection. Connections write to
//! their own [`FeedStatus`]; the health server reads snapshots.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::domain::sync::ConnectionState;
use crate::infrastructure::metrics;

// =============================================================================
// Feed Status
// =============================================================================

/// Tracks the state of one upstream feed connection.
#[derive(Debug)]
pub struct FeedStatus {
    name: String,
    state: AtomicU8,
    last_live_at: RwLock<Option<DateTime<Utc>>>,
    last_frame_at: RwLock<Option<DateTime<Utc>>>,
    error_message: RwLock<Option<String>>,
    credential_id: RwLock<Option<String>>,
    subscription_count: AtomicU32,
    reconnect_attempts: AtomicU32,
    frames_received: AtomicU64,
    frames_discarded: AtomicU64,
    frames_skipped: AtomicU64,
}

impl FeedStatus {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            last_live_at: RwLock::new(None),
            last_frame_at: RwLock::new(None),
            error_message: RwLock::new(None),
            credential_id: RwLock::new(None),
            subscription_count: AtomicU32::new(0),
            reconnect_attempts: AtomicU32::new(0),
            frames_received: AtomicU64::new(0),
            frames_discarded: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
        }
    }

    /// Connection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the connection state.
    pub fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
        metrics::set_connection_state(&self.name, state);
        if state == ConnectionState::Live {
            *self.last_live_at.write() = Some(Utc::now());
            self.reconnect_attempts.store(0, Ordering::Relaxed);
            *self.error_message.write() = None;
        }
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Record the last error seen by the connection.
    pub fn set_error(&self, message: impl Into<String>) {
        *self.error_message.write() = Some(message.into());
    }

    /// Record the credential the connection authenticated with.
    pub fn set_credential(&self, credential_id: Option<String>) {
        *self.credential_id.write() = credential_id;
    }

    /// Increment reconnect attempts.
    pub fn increment_reconnect_attempts(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
        metrics::record_reconnect(&self.name);
    }

    /// Update subscription count.
    pub fn set_subscription_count(&self, count: usize) {
        self.subscription_count
            .store(u32::try_from(count).unwrap_or(u32::MAX), Ordering::Relaxed);
    }

    /// Count a frame read from the transport.
    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        *self.last_frame_at.write() = Some(Utc::now());
    }

    /// Count a frame dropped before the connection was synchronized.
    pub fn record_discarded(&self) {
        self.frames_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a frame dropped because it could not be decoded.
    pub fn record_skipped(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get reconnect attempts count.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Get frames received count.
    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Serializable point-in-time view.
    #[must_use]
    pub fn snapshot(&self) -> FeedStatusSnapshot {
        FeedStatusSnapshot {
            name: self.name.clone(),
            state: self.state(),
            credential_id: self.credential_id.read().clone(),
            last_live_at: *self.last_live_at.read(),
            last_frame_at: *self.last_frame_at.read(),
            error_message: self.error_message.read().clone(),
            subscription_count: self.subscription_count.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts(),
            frames_received: self.frames_received(),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a [`FeedStatus`].
#[derive(Debug, Clone, Serialize)]
pub struct FeedStatusSnapshot {
    /// Connection name.
    pub name: String,
    /// Connection state.
    pub state: ConnectionState,
    /// Credential in use.
    pub credential_id: Option<String>,
    /// Last time the connection reached LIVE.
    pub last_live_at: Option<DateTime<Utc>>,
    /// Last frame read.
    pub last_frame_at: Option<DateTime<Utc>>,
    /// Last error.
    pub error_message: Option<String>,
    /// Held subscriptions.
    pub subscription_count: u32,
    /// Reconnect attempts since the last LIVE.
    pub reconnect_attempts: u32,
    /// Frames read.
    pub frames_received: u64,
    /// Frames dropped before sync.
    pub frames_discarded: u64,
    /// Frames that failed to decode.
    pub frames_skipped: u64,
}

// =============================================================================
// Service Health
// =============================================================================

/// Registry of feed statuses shared between connections and the health server.
#[derive(Debug)]
pub struct ServiceHealth {
    feeds: RwLock<Vec<Arc<FeedStatus>>>,
    started_at: Instant,
}

impl Default for ServiceHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceHealth {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            feeds: RwLock::new(Vec::new()),
            started_at: Instant::now(),
        }
    }

    /// Register a connection and get its status handle.
    pub fn register_feed(&self, name: impl Into<String>) -> Arc<FeedStatus> {
        let status = Arc::new(FeedStatus::new(name));
        self.feeds.write().push(Arc::clone(&status));
        status
    }

    /// Snapshots of every registered connection.
    #[must_use]
    pub fn feeds(&self) -> Vec<FeedStatusSnapshot> {
        self.feeds.read().iter().map(|f| f.snapshot()).collect()
    }

    /// Number of connections currently LIVE.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.feeds
            .read()
            .iter()
            .filter(|f| f.state() == ConnectionState::Live)
            .count()
    }

    /// Number of connections with an open socket, synced or not.
    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.feeds
            .read()
            .iter()
            .filter(|f| f.state().is_connected())
            .count()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn feed_count(&self) -> usize {
        self.feeds.read().len()
    }

    /// Seconds since startup.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_resets_reconnects_and_error() {
        let health = ServiceHealth::new();
        let feed = health.register_feed("ws-1");

        feed.increment_reconnect_attempts();
        feed.set_error("boom");
        feed.set_state(ConnectionState::Reconnecting);
        assert_eq!(feed.reconnect_attempts(), 1);

        feed.set_state(ConnectionState::Live);
        let snapshot = feed.snapshot();
        assert_eq!(snapshot.reconnect_attempts, 0);
        assert!(snapshot.error_message.is_none());
        assert!(snapshot.last_live_at.is_some());
    }

    #[test]
    fn live_count_tracks_states() {
        let health = ServiceHealth::new();
        let a = health.register_feed("ws-1");
        let b = health.register_feed("ws-2");

        assert_eq!(health.feed_count(), 2);
        assert_eq!(health.live_count(), 0);

        a.set_state(ConnectionState::Live);
        b.set_state(ConnectionState::AwaitingSnapshot);
        assert_eq!(health.live_count(), 1);
        assert_eq!(health.connected_count(), 2);

        b.set_state(ConnectionState::Reconnecting);
        assert_eq!(health.connected_count(), 1);
    }

    #[test]
    fn frame_counters() {
        let health = ServiceHealth::new();
        let feed = health.register_feed("ws-1");

        feed.record_frame();
        feed.record_frame();
        feed.record_discarded();
        feed.record_skipped();

        let snapshot = &health.feeds()[0];
        assert_eq!(snapshot.frames_received, 2);
        assert_eq!(snapshot.frames_discarded, 1);
        assert_eq!(snapshot.frames_skipped, 1);
        assert!(snapshot.last_frame_at.is_some());
    }
}
