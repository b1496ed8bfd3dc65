//! Feed Synchronization
//!
//! Per-connection state machine deciding when incoming frames may reach the
//! cache. A freshly (re)connected feed first reports market status, then sends
//! a full snapshot; only from then on is the book consistent.
//!
//! ```text
//! DISCONNECTED -> CONNECTING -> AWAITING_MARKET_INFO -> AWAITING_SNAPSHOT -> LIVE
//!        ^                                                                   |
//!        +------------------------ RECONNECTING <----------------------------+
//! ```

use serde::Serialize;

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of one feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ConnectionState {
    /// Not connected and not trying to.
    Disconnected = 0,
    /// Transport handshake in progress.
    Connecting = 1,
    /// Connected, waiting for the market status frame.
    AwaitingMarketInfo = 2,
    /// Market status seen, waiting for the initial snapshot.
    AwaitingSnapshot = 3,
    /// Synchronized; frames are applied.
    Live = 4,
    /// Transport lost, backing off before the next attempt.
    Reconnecting = 5,
}

impl ConnectionState {
    /// Decode from the atomic representation.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::AwaitingMarketInfo,
            3 => Self::AwaitingSnapshot,
            4 => Self::Live,
            5 => Self::Reconnecting,
            _ => Self::Disconnected,
        }
    }

    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::AwaitingMarketInfo => "AWAITING_MARKET_INFO",
            Self::AwaitingSnapshot => "AWAITING_SNAPSHOT",
            Self::Live => "LIVE",
            Self::Reconnecting => "RECONNECTING",
        }
    }

    /// Whether a transport is established.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(
            self,
            Self::AwaitingMarketInfo | Self::AwaitingSnapshot | Self::Live
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tracker
// =============================================================================

/// What to do with a frame after the tracker has observed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Not synchronized yet; drop the frame.
    Discard,
    /// Synchronized; decode and apply the frame.
    Forward,
}

/// Tracks the market-info and snapshot handshake of one connection.
///
/// The frame that completes the handshake is the snapshot itself and is
/// forwarded; every frame before it is discarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedSyncTracker {
    has_market_info: bool,
    has_snapshot: bool,
}

impl FeedSyncTracker {
    /// Create a tracker awaiting market info.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            has_market_info: false,
            has_snapshot: false,
        }
    }

    /// Forget all progress (reconnect).
    pub const fn reset(&mut self) {
        self.has_market_info = false;
        self.has_snapshot = false;
    }

    /// Whether the market status frame has been seen.
    #[must_use]
    pub const fn has_market_info(&self) -> bool {
        self.has_market_info
    }

    /// Whether the snapshot frame has been seen.
    #[must_use]
    pub const fn has_snapshot(&self) -> bool {
        self.has_snapshot
    }

    /// Ready once both handshake frames have arrived.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.has_market_info && self.has_snapshot
    }

    /// Connection state implied by the handshake progress.
    #[must_use]
    pub const fn phase(&self) -> ConnectionState {
        match (self.has_market_info, self.has_snapshot) {
            (true, true) => ConnectionState::Live,
            (true, false) => ConnectionState::AwaitingSnapshot,
            _ => ConnectionState::AwaitingMarketInfo,
        }
    }

    /// Advance on a received frame.
    pub const fn observe(&mut self, carries_market_info: bool) -> FrameDisposition {
        if self.is_ready() {
            return FrameDisposition::Forward;
        }

        if !self.has_market_info {
            // Anything before the market status is stale.
            self.has_market_info = carries_market_info;
            return FrameDisposition::Discard;
        }

        if carries_market_info {
            return FrameDisposition::Discard;
        }

        self.has_snapshot = true;
        FrameDisposition::Forward
    }
}
