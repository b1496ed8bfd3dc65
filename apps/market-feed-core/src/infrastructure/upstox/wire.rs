//! Upstox V3 Market Data Frames
//!
//! Protobuf messages of the `MarketDataFeedV3` schema. Every binary frame on
//! the market data socket is one [`FeedResponse`].
//!
//! Field names follow Rust conventions; tags match the published schema.

#![allow(missing_docs, clippy::derive_partial_eq_without_eq)]

use std::collections::HashMap;

/// Last traded price, time, quantity and previous close.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Ltpc {
    #[prost(double, tag = "1")]
    pub ltp: f64,
    /// Last trade time, epoch milliseconds.
    #[prost(int64, tag = "2")]
    pub ltt: i64,
    #[prost(int64, tag = "3")]
    pub ltq: i64,
    /// Previous close.
    #[prost(double, tag = "4")]
    pub cp: f64,
}

/// One bid/ask pair of the book.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Quote {
    #[prost(int64, tag = "1")]
    pub bid_q: i64,
    #[prost(double, tag = "2")]
    pub bid_p: f64,
    #[prost(int64, tag = "3")]
    pub ask_q: i64,
    #[prost(double, tag = "4")]
    pub ask_p: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MarketLevel {
    #[prost(message, repeated, tag = "1")]
    pub bid_ask_quote: Vec<Quote>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OptionGreeks {
    #[prost(double, tag = "1")]
    pub delta: f64,
    #[prost(double, tag = "2")]
    pub theta: f64,
    #[prost(double, tag = "3")]
    pub gamma: f64,
    #[prost(double, tag = "4")]
    pub vega: f64,
    #[prost(double, tag = "5")]
    pub rho: f64,
}

/// Candle for one interval (`1d`, `I1`, `I30`).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Ohlc {
    #[prost(string, tag = "1")]
    pub interval: String,
    #[prost(double, tag = "2")]
    pub open: f64,
    #[prost(double, tag = "3")]
    pub high: f64,
    #[prost(double, tag = "4")]
    pub low: f64,
    #[prost(double, tag = "5")]
    pub close: f64,
    #[prost(int64, tag = "6")]
    pub vol: i64,
    #[prost(int64, tag = "7")]
    pub ts: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MarketOhlc {
    #[prost(message, repeated, tag = "1")]
    pub ohlc: Vec<Ohlc>,
}

/// Full feed of a tradable instrument.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MarketFullFeed {
    #[prost(message, optional, tag = "1")]
    pub ltpc: Option<Ltpc>,
    #[prost(message, optional, tag = "2")]
    pub market_level: Option<MarketLevel>,
    #[prost(message, optional, tag = "3")]
    pub option_greeks: Option<OptionGreeks>,
    #[prost(message, optional, tag = "4")]
    pub market_ohlc: Option<MarketOhlc>,
    /// Average traded price.
    #[prost(double, tag = "5")]
    pub atp: f64,
    /// Volume traded today.
    #[prost(int64, tag = "6")]
    pub vtt: i64,
    /// Open interest.
    #[prost(double, tag = "7")]
    pub oi: f64,
    /// Implied volatility.
    #[prost(double, tag = "8")]
    pub iv: f64,
    /// Total buy quantity.
    #[prost(double, tag = "9")]
    pub tbq: f64,
    /// Total sell quantity.
    #[prost(double, tag = "10")]
    pub tsq: f64,
}

/// Full feed of an index (no book).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IndexFullFeed {
    #[prost(message, optional, tag = "1")]
    pub ltpc: Option<Ltpc>,
    #[prost(message, optional, tag = "2")]
    pub market_ohlc: Option<MarketOhlc>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FullFeed {
    #[prost(oneof = "full_feed::FullFeedUnion", tags = "1, 2")]
    pub full_feed_union: Option<full_feed::FullFeedUnion>,
}

pub mod full_feed {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum FullFeedUnion {
        #[prost(message, tag = "1")]
        MarketFf(super::MarketFullFeed),
        #[prost(message, tag = "2")]
        IndexFf(super::IndexFullFeed),
    }
}

/// Option greeks mode payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FirstLevelWithGreeks {
    #[prost(message, optional, tag = "1")]
    pub ltpc: Option<Ltpc>,
    #[prost(message, optional, tag = "2")]
    pub first_depth: Option<Quote>,
    #[prost(message, optional, tag = "3")]
    pub option_greeks: Option<OptionGreeks>,
    #[prost(int64, tag = "4")]
    pub vtt: i64,
    #[prost(double, tag = "5")]
    pub oi: f64,
    #[prost(double, tag = "6")]
    pub iv: f64,
}

/// Payload of one instrument.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Feed {
    #[prost(oneof = "feed::FeedUnion", tags = "1, 2, 3")]
    pub feed_union: Option<feed::FeedUnion>,
    #[prost(enumeration = "RequestMode", tag = "4")]
    pub request_mode: i32,
}

pub mod feed {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum FeedUnion {
        #[prost(message, tag = "1")]
        Ltpc(super::Ltpc),
        #[prost(message, tag = "2")]
        FullFeed(super::FullFeed),
        #[prost(message, tag = "3")]
        FirstLevelWithGreeks(super::FirstLevelWithGreeks),
    }
}

/// Frame kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Type {
    InitialFeed = 0,
    LiveFeed = 1,
    MarketInfo = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum RequestMode {
    Ltpc = 0,
    FullD5 = 1,
    OptionGreeks = 2,
    FullD30 = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MarketStatus {
    PreOpenStart = 0,
    PreOpenEnd = 1,
    NormalOpen = 2,
    NormalClose = 3,
    ClosingStart = 4,
    ClosingEnd = 5,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MarketInfo {
    #[prost(map = "string, enumeration(MarketStatus)", tag = "1")]
    pub segment_status: HashMap<String, i32>,
}

/// One frame of the market data socket.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FeedResponse {
    #[prost(enumeration = "Type", tag = "1")]
    pub r#type: i32,
    #[prost(map = "string, message", tag = "2")]
    pub feeds: HashMap<String, Feed>,
    /// Server time, epoch milliseconds.
    #[prost(int64, tag = "3")]
    pub current_ts: i64,
    #[prost(message, optional, tag = "4")]
    pub market_info: Option<MarketInfo>,
}
