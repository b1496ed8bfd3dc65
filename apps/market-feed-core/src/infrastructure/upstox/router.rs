//! Frame Router
//!
//! Per-connection gate between the socket and the listener. Every binary
//! frame is decoded, shown to the [`FeedSyncTracker`], then either discarded
//! (not yet synchronized) or dispatched as canonical records.

use std::sync::Arc;

use crate::application::ports::{FeedError, FeedListener};
use crate::application::services::FeedStatus;
use crate::domain::sync::{ConnectionState, FeedSyncTracker, FrameDisposition};
use crate::infrastructure::metrics::{self, FrameOutcome};

use super::decoder::FrameDecoder;

/// Result of routing one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Records were dispatched to the listener.
    Applied {
        /// Ticks dispatched.
        ticks: usize,
        /// Books dispatched.
        depths: usize,
    },
    /// Frame arrived before the connection was synchronized.
    Discarded,
    /// Frame could not be decoded.
    Skipped,
}

/// Sync gate and skip accounting for one connection.
#[derive(Debug)]
pub struct FrameRouter {
    tracker: FeedSyncTracker,
    status: Arc<FeedStatus>,
    skip_threshold: u32,
    consecutive_skips: u32,
}

impl FrameRouter {
    /// Create a router; `skip_threshold` of 0 tolerates any number of
    /// consecutive undecodable frames.
    #[must_use]
    pub const fn new(status: Arc<FeedStatus>, skip_threshold: u32) -> Self {
        Self {
            tracker: FeedSyncTracker::new(),
            status,
            skip_threshold,
            consecutive_skips: 0,
        }
    }

    /// Start over on a fresh transport.
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.consecutive_skips = 0;
        self.status.set_state(self.tracker.phase());
    }

    /// Current sync phase.
    #[must_use]
    pub const fn phase(&self) -> ConnectionState {
        self.tracker.phase()
    }

    /// Route one binary frame.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::DecodeSkipThreshold`] once more than the allowed
    /// number of consecutive frames failed to decode.
    pub fn route(&mut self, raw: &[u8], listener: &dyn FeedListener) -> Result<Routed, FeedError> {
        let connection = self.status.name().to_string();
        self.status.record_frame();

        let frame = match FrameDecoder::decode_frame(raw) {
            Ok(frame) => frame,
            Err(skip) => {
                self.consecutive_skips = self.consecutive_skips.saturating_add(1);
                self.status.record_skipped();
                metrics::record_frame(&connection, FrameOutcome::Skipped);
                tracing::warn!(
                    connection = %connection,
                    bytes = raw.len(),
                    consecutive = self.consecutive_skips,
                    error = %skip,
                    "Dropping undecodable frame"
                );
                if self.skip_threshold > 0 && self.consecutive_skips > self.skip_threshold {
                    return Err(FeedError::DecodeSkipThreshold(self.consecutive_skips));
                }
                return Ok(Routed::Skipped);
            }
        };
        self.consecutive_skips = 0;

        if let Some(info) = &frame.market_info {
            listener.on_market_info(info);
        }

        let before = self.tracker.phase();
        let disposition = self.tracker.observe(frame.carries_market_info());
        let after = self.tracker.phase();
        if after != before {
            self.status.set_state(after);
            tracing::info!(
                connection = %connection,
                from = %before,
                to = %after,
                "Feed sync phase changed"
            );
            if after == ConnectionState::Live {
                listener.on_connected(&connection);
            }
        }

        if disposition == FrameDisposition::Discard {
            self.status.record_discarded();
            metrics::record_frame(&connection, FrameOutcome::Discarded);
            tracing::trace!(connection = %connection, phase = %after, "Frame discarded before sync");
            return Ok(Routed::Discarded);
        }

        let ticks = frame.ticks.len();
        let depths = frame.depths.len();
        for tick in frame.ticks {
            listener.on_tick(tick);
        }
        for depth in frame.depths {
            listener.on_depth(depth);
        }
        metrics::record_frame(&connection, FrameOutcome::Applied);
        Ok(Routed::Applied { ticks, depths })
    }
}
