//! Frame Decoder
//!
//! Turns binary [`FeedResponse`] frames into canonical ticks and books.
//!
//! # Mapping
//!
//! | Wire                        | Canonical                          |
//! |-----------------------------|------------------------------------|
//! | `ltpc.ltp` / `ltpc.cp`      | last price / previous close        |
//! | `ltpc.ltt`                  | exchange timestamp (ms)            |
//! | `marketLevel.bidAskQuote[i]`| `bids[i]` and `asks[i]`            |
//! | `oi`, `tbq`, `tsq`          | integer quantities, truncated      |
//! | `vtt`, else `1d` candle vol | volume                             |
//!
//! Every section is optional. A missing section leaves the corresponding
//! canonical fields empty; only bytes that do not parse are a [`DecodeSkip`].

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use prost::Message;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

use super::wire::{self, feed::FeedUnion, full_feed::FullFeedUnion};
use crate::domain::market::{
    BookLevel, CanonicalDepth, CanonicalTick, Greeks, MAX_DEPTH_LEVELS, MarketInfo,
    MarketStatus, Ohlc,
};
use crate::infrastructure::metrics;

/// Interval of the session candle used for the tick OHLC.
const DAILY_INTERVAL: &str = "1d";

/// A frame that could not be decoded. Logged and dropped by the caller.
#[derive(Debug, thiserror::Error)]
pub enum DecodeSkip {
    /// Zero-length frame.
    #[error("empty frame")]
    Empty,

    /// Bytes are not a valid feed response.
    #[error("malformed frame: {0}")]
    Malformed(#[from] prost::DecodeError),
}

/// Kind of a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Snapshot sent after subscribe.
    InitialFeed,
    /// Incremental update.
    LiveFeed,
    /// Market status report.
    MarketInfo,
}

impl From<wire::Type> for FrameKind {
    fn from(value: wire::Type) -> Self {
        match value {
            wire::Type::InitialFeed => Self::InitialFeed,
            wire::Type::LiveFeed => Self::LiveFeed,
            wire::Type::MarketInfo => Self::MarketInfo,
        }
    }
}

/// Everything carried by one frame, in canonical form.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    /// Frame kind.
    pub kind: FrameKind,
    /// Server timestamp.
    pub current_ts: Option<DateTime<Utc>>,
    /// Segment status, when the frame carries it.
    pub market_info: Option<MarketInfo>,
    /// One tick per instrument with a price section.
    pub ticks: Vec<CanonicalTick>,
    /// One book per instrument with a depth or greeks section.
    pub depths: Vec<CanonicalDepth>,
}

impl DecodedFrame {
    /// Whether the frame has a market-status section.
    #[must_use]
    pub const fn carries_market_info(&self) -> bool {
        self.market_info.is_some() || matches!(self.kind, FrameKind::MarketInfo)
    }

    /// Whether the frame has no instrument data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty() && self.depths.is_empty()
    }
}

/// Stateless decoder for Upstox V3 frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameDecoder;

impl FrameDecoder {
    /// Decode a whole frame.
    ///
    /// Instruments are emitted in key order so output is deterministic.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeSkip`] if the frame is empty or not valid protobuf.
    pub fn decode_frame(raw: &[u8]) -> Result<DecodedFrame, DecodeSkip> {
        let started = Instant::now();
        let response = parse(raw)?;

        let kind = wire::Type::try_from(response.r#type)
            .map_or(FrameKind::LiveFeed, FrameKind::from);
        let market_info = response.market_info.as_ref().map(market_info);

        let feeds: BTreeMap<&String, &wire::Feed> = response.feeds.iter().collect();
        let mut ticks = Vec::new();
        let mut depths = Vec::new();
        for (key, feed) in feeds {
            if let Some(tick) = tick_from(key, feed) {
                ticks.push(tick);
            }
            if carries_book(feed) {
                depths.push(depth_from(key, feed));
            }
        }

        metrics::record_decode_duration(started.elapsed());
        Ok(DecodedFrame {
            kind,
            current_ts: timestamp(response.current_ts),
            market_info,
            ticks,
            depths,
        })
    }

    /// Decode the book of one instrument.
    ///
    /// An instrument missing from the frame yields an empty book.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeSkip`] if the frame is empty or not valid protobuf.
    pub fn decode(raw: &[u8], instrument_key: &str) -> Result<CanonicalDepth, DecodeSkip> {
        let response = parse(raw)?;
        Ok(response
            .feeds
            .get(instrument_key)
            .map_or_else(|| CanonicalDepth::empty(instrument_key), |feed| {
                depth_from(instrument_key, feed)
            }))
    }
}

fn parse(raw: &[u8]) -> Result<wire::FeedResponse, DecodeSkip> {
    if raw.is_empty() {
        return Err(DecodeSkip::Empty);
    }
    Ok(wire::FeedResponse::decode(raw)?)
}

// =============================================================================
// Sections
// =============================================================================

fn ltpc_of(feed: &wire::Feed) -> Option<&wire::Ltpc> {
    match feed.feed_union.as_ref()? {
        FeedUnion::Ltpc(ltpc) => Some(ltpc),
        FeedUnion::FullFeed(full) => match full.full_feed_union.as_ref()? {
            FullFeedUnion::MarketFf(ff) => ff.ltpc.as_ref(),
            FullFeedUnion::IndexFf(index) => index.ltpc.as_ref(),
        },
        FeedUnion::FirstLevelWithGreeks(first) => first.ltpc.as_ref(),
    }
}

fn ohlc_of(feed: &wire::Feed) -> Option<&wire::MarketOhlc> {
    match feed.feed_union.as_ref()? {
        FeedUnion::FullFeed(full) => match full.full_feed_union.as_ref()? {
            FullFeedUnion::MarketFf(ff) => ff.market_ohlc.as_ref(),
            FullFeedUnion::IndexFf(index) => index.market_ohlc.as_ref(),
        },
        _ => None,
    }
}

fn carries_book(feed: &wire::Feed) -> bool {
    matches!(
        feed.feed_union,
        Some(
            FeedUnion::FirstLevelWithGreeks(_)
                | FeedUnion::FullFeed(wire::FullFeed {
                    full_feed_union: Some(FullFeedUnion::MarketFf(_))
                })
        )
    )
}

fn tick_from(key: &str, feed: &wire::Feed) -> Option<CanonicalTick> {
    let ltpc = ltpc_of(feed);
    let daily = ohlc_of(feed).and_then(|m| {
        m.ohlc
            .iter()
            .find(|c| c.interval == DAILY_INTERVAL)
            .or_else(|| m.ohlc.first())
    });
    if ltpc.is_none() && daily.is_none() {
        return None;
    }

    let ltp = ltpc.map_or_else(|| daily.map_or(0.0, |c| c.close), |l| l.ltp);
    let close = ltpc.map_or(0.0, |l| l.cp);
    let vtt = match feed.feed_union.as_ref() {
        Some(FeedUnion::FullFeed(wire::FullFeed {
            full_feed_union: Some(FullFeedUnion::MarketFf(ff)),
        })) => ff.vtt,
        Some(FeedUnion::FirstLevelWithGreeks(first)) => first.vtt,
        _ => 0,
    };
    let volume = if vtt > 0 {
        vtt
    } else {
        daily.map_or(0, |c| c.vol)
    };

    let mut tick = CanonicalTick::new(key, price(ltp), price(close)).with_volume(volume);
    if let Some(candle) = daily {
        tick = tick.with_ohlc(Ohlc {
            open: price(candle.open),
            high: price(candle.high),
            low: price(candle.low),
            close: price(candle.close),
        });
    }
    if let Some(ts) = ltpc.and_then(|l| timestamp(l.ltt)) {
        tick = tick.with_exchange_ts(ts);
    }
    Some(tick)
}

fn depth_from(key: &str, feed: &wire::Feed) -> CanonicalDepth {
    let mut depth = CanonicalDepth::empty(key);

    if let Some(ltpc) = ltpc_of(feed) {
        depth.ltp = Some(price(ltpc.ltp));
        depth.close = Some(price(ltpc.cp));
        depth.exchange_ts = timestamp(ltpc.ltt);
    }

    match feed.feed_union.as_ref() {
        Some(FeedUnion::FullFeed(wire::FullFeed {
            full_feed_union: Some(FullFeedUnion::MarketFf(ff)),
        })) => {
            if let Some(level) = &ff.market_level {
                push_levels(&mut depth, &level.bid_ask_quote);
            }
            depth.greeks = ff.option_greeks.as_ref().map(greeks);
            depth.open_interest = quantity(ff.oi);
            depth.total_buy_quantity = quantity(ff.tbq);
            depth.total_sell_quantity = quantity(ff.tsq);
            depth.average_traded_price = (ff.atp != 0.0).then(|| price(ff.atp));
        }
        Some(FeedUnion::FirstLevelWithGreeks(first)) => {
            if let Some(quote) = &first.first_depth {
                push_levels(&mut depth, std::slice::from_ref(quote));
            }
            depth.greeks = first.option_greeks.as_ref().map(greeks);
            depth.open_interest = quantity(first.oi);
        }
        _ => {}
    }

    depth
}

/// Quotes are bid/ask pairs; the pair at index `i` is level `i` of each side.
fn push_levels(depth: &mut CanonicalDepth, quotes: &[wire::Quote]) {
    for quote in quotes.iter().take(MAX_DEPTH_LEVELS) {
        depth
            .bids
            .push(BookLevel::new(price(quote.bid_p), quote.bid_q, 0));
        depth
            .asks
            .push(BookLevel::new(price(quote.ask_p), quote.ask_q, 0));
    }
}

const fn greeks(g: &wire::OptionGreeks) -> Greeks {
    Greeks {
        delta: g.delta,
        gamma: g.gamma,
        theta: g.theta,
        vega: g.vega,
        rho: g.rho,
    }
}

fn market_info(info: &wire::MarketInfo) -> MarketInfo {
    let segments = info
        .segment_status
        .iter()
        .filter_map(|(segment, status)| {
            let status = match wire::MarketStatus::try_from(*status).ok()? {
                wire::MarketStatus::PreOpenStart => MarketStatus::PreOpenStart,
                wire::MarketStatus::PreOpenEnd => MarketStatus::PreOpenEnd,
                wire::MarketStatus::NormalOpen => MarketStatus::NormalOpen,
                wire::MarketStatus::NormalClose => MarketStatus::NormalClose,
                wire::MarketStatus::ClosingStart => MarketStatus::ClosingStart,
                wire::MarketStatus::ClosingEnd => MarketStatus::ClosingEnd,
            };
            Some((segment.clone(), status))
        })
        .collect();
    MarketInfo { segments }
}

// =============================================================================
// Scalars
// =============================================================================

/// Wire prices are doubles; non-finite values become zero.
fn price(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

/// Truncates toward zero; NaN becomes zero and infinities saturate.
#[allow(clippy::cast_possible_truncation)]
fn quantity(value: f64) -> i64 {
    value as i64
}

fn timestamp(millis: i64) -> Option<DateTime<Utc>> {
    (millis > 0)
        .then(|| DateTime::from_timestamp_millis(millis))
        .flatten()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rust_decimal_macros::dec;
    use test_case::test_case;

    use super::*;

    fn market_ff(ff: wire::MarketFullFeed) -> wire::Feed {
        wire::Feed {
            feed_union: Some(FeedUnion::FullFeed(wire::FullFeed {
                full_feed_union: Some(FullFeedUnion::MarketFf(ff)),
            })),
            request_mode: wire::RequestMode::FullD30 as i32,
        }
    }

    fn frame(feeds: Vec<(&str, wire::Feed)>) -> Vec<u8> {
        wire::FeedResponse {
            r#type: wire::Type::LiveFeed as i32,
            feeds: feeds
                .into_iter()
                .map(|(k, f)| (k.to_string(), f))
                .collect::<HashMap<_, _>>(),
            current_ts: 1_700_000_000_000,
            market_info: None,
        }
        .encode_to_vec()
    }

    fn quote(bid_p: f64, bid_q: i64, ask_p: f64, ask_q: i64) -> wire::Quote {
        wire::Quote {
            bid_q,
            bid_p,
            ask_q,
            ask_p,
        }
    }

    #[test]
    fn levels_pair_positionally_in_source_order() {
        let raw = frame(vec![(
            "NSE_FO|1",
            market_ff(wire::MarketFullFeed {
                market_level: Some(wire::MarketLevel {
                    // Deliberately unsorted: order must survive.
                    bid_ask_quote: vec![
                        quote(99.5, 10, 100.5, 20),
                        quote(99.75, 11, 100.25, 21),
                        quote(0.0, 0, 101.0, 22),
                    ],
                }),
                ..Default::default()
            }),
        )]);

        let depth = FrameDecoder::decode(&raw, "NSE_FO|1").unwrap();

        assert_eq!(depth.bids.len(), 3);
        assert_eq!(depth.asks.len(), 3);
        assert_eq!(depth.bids[0], BookLevel::new(dec!(99.5), 10, 0));
        assert_eq!(depth.bids[1], BookLevel::new(dec!(99.75), 11, 0));
        assert_eq!(depth.asks[1], BookLevel::new(dec!(100.25), 21, 0));
        assert_eq!(depth.bids[2].quantity, 0);
        assert_eq!(depth.asks[2].price, dec!(101));
    }

    #[test_case(1234.99, 1234)]
    #[test_case(0.999, 0)]
    #[test_case(-7.8, -7)]
    #[test_case(f64::NAN, 0)]
    fn quantities_truncate(raw: f64, expected: i64) {
        assert_eq!(quantity(raw), expected);
    }

    #[test]
    fn extended_stats() {
        let raw = frame(vec![(
            "NSE_FO|1",
            market_ff(wire::MarketFullFeed {
                oi: 15_000.9,
                tbq: 420.5,
                tsq: 380.99,
                atp: 101.25,
                option_greeks: Some(wire::OptionGreeks {
                    delta: 0.5,
                    theta: -1.2,
                    gamma: 0.01,
                    vega: 3.3,
                    rho: 0.02,
                }),
                ..Default::default()
            }),
        )]);

        let depth = FrameDecoder::decode(&raw, "NSE_FO|1").unwrap();

        assert_eq!(depth.open_interest, 15_000);
        assert_eq!(depth.total_buy_quantity, 420);
        assert_eq!(depth.total_sell_quantity, 380);
        assert_eq!(depth.average_traded_price, Some(dec!(101.25)));
        let greeks = depth.greeks.unwrap();
        assert_eq!(greeks.delta, 0.5);
        assert_eq!(greeks.theta, -1.2);
        assert_eq!(greeks.rho, 0.02);
    }

    #[test]
    fn missing_sections_yield_empty_fields() {
        let raw = frame(vec![("NSE_FO|1", market_ff(wire::MarketFullFeed::default()))]);

        let depth = FrameDecoder::decode(&raw, "NSE_FO|1").unwrap();

        assert!(depth.bids.is_empty());
        assert!(depth.asks.is_empty());
        assert!(depth.greeks.is_none());
        assert!(depth.ltp.is_none());
        assert!(depth.average_traded_price.is_none());
        assert_eq!(depth.open_interest, 0);
    }

    #[test]
    fn absent_instrument_yields_empty_book() {
        let raw = frame(vec![("NSE_FO|1", market_ff(wire::MarketFullFeed::default()))]);
        let depth = FrameDecoder::decode(&raw, "NSE_FO|2").unwrap();
        assert_eq!(depth, CanonicalDepth::empty("NSE_FO|2"));
    }

    #[test]
    fn book_is_capped_at_thirty_levels() {
        let quotes = (0..40)
            .map(|i| quote(100.0 - f64::from(i), 1, 101.0 + f64::from(i), 1))
            .collect();
        let raw = frame(vec![(
            "NSE_FO|1",
            market_ff(wire::MarketFullFeed {
                market_level: Some(wire::MarketLevel {
                    bid_ask_quote: quotes,
                }),
                ..Default::default()
            }),
        )]);

        let depth = FrameDecoder::decode(&raw, "NSE_FO|1").unwrap();
        assert_eq!(depth.depth(), MAX_DEPTH_LEVELS);
    }

    #[test]
    fn corrupt_bytes_are_skipped() {
        assert!(matches!(
            FrameDecoder::decode_frame(&[0xff, 0xff, 0xff]),
            Err(DecodeSkip::Malformed(_))
        ));
        assert!(matches!(
            FrameDecoder::decode(&[], "NSE_FO|1"),
            Err(DecodeSkip::Empty)
        ));
    }

    #[test]
    fn tick_from_ltpc_and_daily_candle() {
        let raw = frame(vec![(
            "NSE_EQ|A",
            market_ff(wire::MarketFullFeed {
                ltpc: Some(wire::Ltpc {
                    ltp: 105.0,
                    ltt: 1_700_000_000_500,
                    ltq: 10,
                    cp: 100.0,
                }),
                market_ohlc: Some(wire::MarketOhlc {
                    ohlc: vec![
                        wire::Ohlc {
                            interval: "I1".into(),
                            open: 104.0,
                            high: 105.0,
                            low: 103.0,
                            close: 105.0,
                            vol: 50,
                            ts: 0,
                        },
                        wire::Ohlc {
                            interval: "1d".into(),
                            open: 101.0,
                            high: 106.0,
                            low: 99.0,
                            close: 105.0,
                            vol: 9_000,
                            ts: 0,
                        },
                    ],
                }),
                ..Default::default()
            }),
        )]);

        let decoded = FrameDecoder::decode_frame(&raw).unwrap();
        let tick = &decoded.ticks[0];

        assert_eq!(tick.ltp, dec!(105));
        assert_eq!(tick.close, dec!(100));
        assert_eq!(tick.change_percent, dec!(5));
        assert_eq!(tick.volume, 9_000);
        assert_eq!(tick.ohlc.unwrap().open, dec!(101));
        assert_eq!(
            tick.exchange_ts.map(|t| t.timestamp_millis()),
            Some(1_700_000_000_500)
        );
        assert_eq!(decoded.depths.len(), 1);
    }

    #[test]
    fn vtt_takes_precedence_for_volume() {
        let raw = frame(vec![(
            "NSE_EQ|A",
            market_ff(wire::MarketFullFeed {
                ltpc: Some(wire::Ltpc {
                    ltp: 1.0,
                    ..Default::default()
                }),
                vtt: 777,
                ..Default::default()
            }),
        )]);

        let decoded = FrameDecoder::decode_frame(&raw).unwrap();
        assert_eq!(decoded.ticks[0].volume, 777);
    }

    #[test]
    fn ltpc_feed_has_tick_but_no_book() {
        let raw = frame(vec![(
            "NSE_EQ|A",
            wire::Feed {
                feed_union: Some(FeedUnion::Ltpc(wire::Ltpc {
                    ltp: 10.0,
                    ltt: 0,
                    ltq: 0,
                    cp: 8.0,
                })),
                request_mode: wire::RequestMode::Ltpc as i32,
            },
        )]);

        let decoded = FrameDecoder::decode_frame(&raw).unwrap();
        assert_eq!(decoded.ticks.len(), 1);
        assert!(decoded.ticks[0].exchange_ts.is_none());
        assert!(decoded.depths.is_empty());
    }

    #[test]
    fn first_level_with_greeks() {
        let raw = frame(vec![(
            "NSE_FO|9",
            wire::Feed {
                feed_union: Some(FeedUnion::FirstLevelWithGreeks(wire::FirstLevelWithGreeks {
                    ltpc: Some(wire::Ltpc {
                        ltp: 12.5,
                        ..Default::default()
                    }),
                    first_depth: Some(quote(12.4, 75, 12.6, 150)),
                    option_greeks: Some(wire::OptionGreeks {
                        delta: -0.3,
                        ..Default::default()
                    }),
                    vtt: 0,
                    oi: 99.9,
                    iv: 0.2,
                })),
                request_mode: wire::RequestMode::OptionGreeks as i32,
            },
        )]);

        let decoded = FrameDecoder::decode_frame(&raw).unwrap();
        let depth = &decoded.depths[0];
        assert_eq!(depth.best_bid().unwrap().quantity, 75);
        assert_eq!(depth.best_ask().unwrap().price, dec!(12.6));
        assert_eq!(depth.open_interest, 99);
        assert_eq!(depth.greeks.unwrap().delta, -0.3);
    }

    #[test]
    fn market_info_frame() {
        let raw = wire::FeedResponse {
            r#type: wire::Type::MarketInfo as i32,
            feeds: HashMap::new(),
            current_ts: 1,
            market_info: Some(wire::MarketInfo {
                segment_status: HashMap::from([
                    ("NSE_EQ".to_string(), wire::MarketStatus::NormalOpen as i32),
                    ("MCX_FO".to_string(), wire::MarketStatus::NormalClose as i32),
                    ("BAD".to_string(), 42),
                ]),
            }),
        }
        .encode_to_vec();

        let decoded = FrameDecoder::decode_frame(&raw).unwrap();
        assert!(decoded.carries_market_info());
        assert!(decoded.is_empty());
        let info = decoded.market_info.unwrap();
        assert_eq!(info.segments.len(), 2);
        assert_eq!(info.segments["NSE_EQ"], MarketStatus::NormalOpen);
        assert_eq!(info.open_segments(), 1);
    }

    #[test]
    fn instruments_are_emitted_in_key_order() {
        let ltpc = |ltp: f64| wire::Feed {
            feed_union: Some(FeedUnion::Ltpc(wire::Ltpc {
                ltp,
                ..Default::default()
            })),
            request_mode: 0,
        };
        let raw = frame(vec![
            ("NSE_EQ|C", ltpc(3.0)),
            ("NSE_EQ|A", ltpc(1.0)),
            ("NSE_EQ|B", ltpc(2.0)),
        ]);

        let keys: Vec<String> = FrameDecoder::decode_frame(&raw)
            .unwrap()
            .ticks
            .into_iter()
            .map(|t| t.instrument_key)
            .collect();
        assert_eq!(keys, vec!["NSE_EQ|A", "NSE_EQ|B", "NSE_EQ|C"]);
    }
}
