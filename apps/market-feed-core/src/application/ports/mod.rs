//! Port Interfaces
//!
//! Contracts between the core and its collaborators, following the
//! Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`MarketFeed`]: an exchange feed connection (one implementation per exchange)
//! - [`HealthProbe`]: verifies a credential against the exchange
//! - [`AlertNotifier`]: fire-and-forget sink for alert events
//!
//! ## Driver Ports (Inbound)
//!
//! - [`FeedListener`]: receives canonical records from a feed. Callbacks run
//!   on the feed's read loop and must not block.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::alert::AlertEvent;
use crate::domain::credential::{Credential, CredentialError};
use crate::domain::market::{CanonicalDepth, CanonicalTick, InstrumentKey, MarketInfo};
use crate::domain::subscription::{FeedMode, SubscriptionError};
use crate::domain::sync::ConnectionState;

// =============================================================================
// Feed
// =============================================================================

/// Errors surfaced by a feed connection.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Subscribe request rejected before anything was sent.
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    /// No credential available to open the connection.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Exchange rejected the credential during the handshake.
    #[error("credential {credential} rejected with status {status}")]
    AuthRejected {
        /// Credential id.
        credential: String,
        /// HTTP status of the handshake.
        status: u16,
    },

    /// Connection closed by the peer or heartbeat timeout.
    #[error("connection closed")]
    ConnectionClosed,

    /// Too many consecutive undecodable frames.
    #[error("{0} consecutive frames could not be decoded")]
    DecodeSkipThreshold(u32),

    /// Reconnect budget spent.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    ReconnectExhausted(u32),

    /// Connection was disconnected and cannot be reused.
    #[error("feed connection is shut down")]
    ShutDown,
}

/// Receives canonical records and lifecycle events from a feed.
pub trait FeedListener: Send + Sync {
    /// A tick was decoded from a live frame.
    fn on_tick(&self, tick: CanonicalTick);

    /// A book was decoded from a live frame.
    fn on_depth(&self, depth: CanonicalDepth);

    /// Market status was reported.
    fn on_market_info(&self, _info: &MarketInfo) {}

    /// The connection reached LIVE.
    fn on_connected(&self, _connection: &str) {}

    /// The connection lost its transport.
    fn on_disconnected(&self, _connection: &str) {}

    /// A non-fatal error occurred.
    fn on_error(&self, _connection: &str, _error: &FeedError) {}
}

/// Exchange-agnostic feed connection.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Start the connection in the background.
    async fn connect(&self) -> Result<(), FeedError>;

    /// Terminal shutdown; the read loop exits and the transport is released.
    async fn disconnect(&self);

    /// Subscribe `keys` in `mode`; validated against the mode limit first.
    async fn subscribe(&self, keys: &[InstrumentKey], mode: FeedMode) -> Result<(), FeedError>;

    /// Unsubscribe `keys`.
    async fn unsubscribe(&self, keys: &[InstrumentKey]) -> Result<(), FeedError>;

    /// Register the listener receiving decoded records.
    fn set_listener(&self, listener: Arc<dyn FeedListener>);

    /// Currently held subscriptions.
    fn subscriptions(&self) -> HashMap<InstrumentKey, FeedMode>;

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Name of the exchange source.
    fn source_name(&self) -> &'static str;
}

// =============================================================================
// Credential Probe
// =============================================================================

/// Classified result of a credential probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Credential accepted.
    Healthy,
    /// Definitive rejection (401/410).
    AuthRejected {
        /// Response status.
        status: u16,
    },
    /// Could not decide (timeout, DNS, 5xx, other statuses).
    Indeterminate {
        /// Reason for diagnostics.
        reason: String,
    },
}

impl ProbeOutcome {
    /// Classify an HTTP status.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Self::Healthy,
            401 | 410 => Self::AuthRejected { status },
            other => Self::Indeterminate {
                reason: format!("unexpected status {other}"),
            },
        }
    }
}

/// Verifies a credential against the exchange.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe one credential. Never fails; errors classify as indeterminate.
    async fn probe(&self, credential: &Credential) -> ProbeOutcome;
}

// =============================================================================
// Alert Notifier
// =============================================================================

/// Fire-and-forget sink for alert events.
#[cfg_attr(test, mockall::automock)]
pub trait AlertNotifier: Send + Sync {
    /// Hand off an event; must not block.
    fn accept(&self, event: AlertEvent);
}
