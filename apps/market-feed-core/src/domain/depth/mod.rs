//! Depth Compression
//!
//! Projects a full-depth book into a reduced-level view for
//! bandwidth-limited consumers. Compression copies prefixes and never
//! touches the source book.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::market::{BookLevel, CanonicalDepth, InstrumentKey};

/// Supported compressed depths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DepthLevels {
    /// Top 5 levels.
    Five,
    /// Top 10 levels.
    Ten,
    /// Top 30 levels (full depth).
    Thirty,
}

impl DepthLevels {
    /// Number of levels per side.
    #[must_use]
    pub const fn count(&self) -> usize {
        match self {
            Self::Five => 5,
            Self::Ten => 10,
            Self::Thirty => 30,
        }
    }

    /// Parse a level count; only 5, 10 and 30 are supported.
    #[must_use]
    pub const fn from_count(count: usize) -> Option<Self> {
        match count {
            5 => Some(Self::Five),
            10 => Some(Self::Ten),
            30 => Some(Self::Thirty),
            _ => None,
        }
    }
}

/// Reduced-level view of a book.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderBookSnapshot {
    /// Instrument key.
    pub instrument_key: InstrumentKey,
    /// Leading bid levels.
    pub bids: Vec<BookLevel>,
    /// Leading ask levels.
    pub asks: Vec<BookLevel>,
    /// Requested depth.
    pub levels: DepthLevels,
    /// Compression wall-clock time (not exchange time).
    pub snapshot_at: DateTime<Utc>,
}

/// Stateless depth compressor.
#[derive(Debug, Clone, Copy, Default)]
pub struct DepthCompressor;

impl DepthCompressor {
    /// Take the first `levels` bids and asks of `book`.
    ///
    /// An absent book yields an absent snapshot.
    #[must_use]
    pub fn compress(book: Option<&CanonicalDepth>, levels: DepthLevels) -> Option<OrderBookSnapshot> {
        let book = book?;
        let n = levels.count();
        Some(OrderBookSnapshot {
            instrument_key: book.instrument_key.clone(),
            bids: book.bids.iter().take(n).copied().collect(),
            asks: book.asks.iter().take(n).copied().collect(),
            levels,
            snapshot_at: Utc::now(),
        })
    }

    /// Top 5 levels.
    #[must_use]
    pub fn compress5(book: Option<&CanonicalDepth>) -> Option<OrderBookSnapshot> {
        Self::compress(book, DepthLevels::Five)
    }

    /// Top 10 levels.
    #[must_use]
    pub fn compress10(book: Option<&CanonicalDepth>) -> Option<OrderBookSnapshot> {
        Self::compress(book, DepthLevels::Ten)
    }
}
