//! Market Data Types
//!
//! Canonical, exchange-agnostic representation of quotes and order books.
//! Every record is replaced wholesale on update; there is no partial-field
//! merge.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Exchange instrument key (e.g. `NSE_EQ|INE002A01018`).
pub type InstrumentKey = String;

/// Maximum number of levels per side in a canonical book.
pub const MAX_DEPTH_LEVELS: usize = 30;

// =============================================================================
// Tick
// =============================================================================

/// Session OHLC values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ohlc {
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
}

/// Latest quote for an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalTick {
    /// Instrument key.
    pub instrument_key: InstrumentKey,
    /// Last traded price.
    pub ltp: Decimal,
    /// Previous close.
    pub close: Decimal,
    /// Derived change versus previous close, in percent.
    pub change_percent: Decimal,
    /// Volume traded in the session.
    pub volume: i64,
    /// Session OHLC when the feed carries it.
    pub ohlc: Option<Ohlc>,
    /// Exchange timestamp of the last trade.
    pub exchange_ts: Option<DateTime<Utc>>,
    /// Local receive time.
    pub received_at: DateTime<Utc>,
}

impl CanonicalTick {
    /// Create a tick, deriving the change percent from `ltp` and `close`.
    #[must_use]
    pub fn new(instrument_key: impl Into<InstrumentKey>, ltp: Decimal, close: Decimal) -> Self {
        Self {
            instrument_key: instrument_key.into(),
            ltp,
            close,
            change_percent: change_percent(ltp, close),
            volume: 0,
            ohlc: None,
            exchange_ts: None,
            received_at: Utc::now(),
        }
    }

    /// Set the session volume.
    #[must_use]
    pub const fn with_volume(mut self, volume: i64) -> Self {
        self.volume = volume;
        self
    }

    /// Set the session OHLC.
    #[must_use]
    pub const fn with_ohlc(mut self, ohlc: Ohlc) -> Self {
        self.ohlc = Some(ohlc);
        self
    }

    /// Set the exchange timestamp.
    #[must_use]
    pub const fn with_exchange_ts(mut self, ts: DateTime<Utc>) -> Self {
        self.exchange_ts = Some(ts);
        self
    }
}

/// Change of `ltp` versus `close` in percent; zero when `close` is zero.
#[must_use]
pub fn change_percent(ltp: Decimal, close: Decimal) -> Decimal {
    if close.is_zero() {
        return Decimal::ZERO;
    }
    (ltp - close)
        .checked_div(close)
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .unwrap_or(Decimal::ZERO)
}

// =============================================================================
// Depth
// =============================================================================

/// One price level of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    /// Level price.
    pub price: Decimal,
    /// Resting quantity.
    pub quantity: i64,
    /// Number of orders, zero when the feed does not report it.
    pub orders: u32,
}

impl BookLevel {
    /// Create a level.
    #[must_use]
    pub const fn new(price: Decimal, quantity: i64, orders: u32) -> Self {
        Self {
            price,
            quantity,
            orders,
        }
    }
}

/// Option risk sensitivities.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Greeks {
    /// Delta.
    pub delta: f64,
    /// Gamma.
    pub gamma: f64,
    /// Theta.
    pub theta: f64,
    /// Vega.
    pub vega: f64,
    /// Rho.
    pub rho: f64,
}

/// Full-depth order book as delivered by the feed.
///
/// Bids are conventionally price-descending and asks price-ascending, but
/// levels keep the delivered order and are never re-sorted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CanonicalDepth {
    /// Instrument key.
    pub instrument_key: InstrumentKey,
    /// Bid levels in source order.
    pub bids: Vec<BookLevel>,
    /// Ask levels in source order.
    pub asks: Vec<BookLevel>,
    /// Last traded price.
    pub ltp: Option<Decimal>,
    /// Previous close.
    pub close: Option<Decimal>,
    /// Exchange timestamp of the last trade.
    pub exchange_ts: Option<DateTime<Utc>>,
    /// Option greeks.
    pub greeks: Option<Greeks>,
    /// Open interest.
    pub open_interest: i64,
    /// Total buy quantity.
    pub total_buy_quantity: i64,
    /// Total sell quantity.
    pub total_sell_quantity: i64,
    /// Average traded price.
    pub average_traded_price: Option<Decimal>,
}

impl CanonicalDepth {
    /// Create an empty book for an instrument.
    #[must_use]
    pub fn empty(instrument_key: impl Into<InstrumentKey>) -> Self {
        Self {
            instrument_key: instrument_key.into(),
            ..Self::default()
        }
    }

    /// Number of levels on the deeper side.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.bids.len().max(self.asks.len())
    }

    /// Best bid (first delivered bid level).
    #[must_use]
    pub fn best_bid(&self) -> Option<&BookLevel> {
        self.bids.first()
    }

    /// Best ask (first delivered ask level).
    #[must_use]
    pub fn best_ask(&self) -> Option<&BookLevel> {
        self.asks.first()
    }
}

// =============================================================================
// Market Status
// =============================================================================

/// Trading status of an exchange segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketStatus {
    /// Pre-open session started.
    PreOpenStart,
    /// Pre-open session ended.
    PreOpenEnd,
    /// Normal session open.
    NormalOpen,
    /// Normal session closed.
    NormalClose,
    /// Closing session started.
    ClosingStart,
    /// Closing session ended.
    ClosingEnd,
}

impl MarketStatus {
    /// Whether orders can trade in this status.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::NormalOpen | Self::PreOpenStart | Self::ClosingStart)
    }
}

/// Per-segment market status as reported at the start of a session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MarketInfo {
    /// Segment name (e.g. `NSE_EQ`) to status.
    pub segments: BTreeMap<String, MarketStatus>,
}

impl MarketInfo {
    /// Number of segments currently open.
    #[must_use]
    pub fn open_segments(&self) -> usize {
        self.segments.values().filter(|s| s.is_open()).count()
    }
}
