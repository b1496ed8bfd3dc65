//! Upstox Adapter
//!
//! Exchange adapter for the Upstox V3 market data feed.
//!
//! # Components
//!
//! - [`wire`]: protobuf messages of the binary feed
//! - [`decoder`]: frame to canonical tick/book conversion
//! - [`router`]: per-connection sync gate in front of the listener
//! - [`connection`]: [`UpstoxFeed`], the [`MarketFeed`](crate::application::ports::MarketFeed)
//!   implementation
//! - [`reconnect`] / [`heartbeat`]: backoff and liveness of the socket
//! - [`request`]: subscribe/unsubscribe commands
//! - [`probe`]: HTTP credential health probe

pub mod connection;
pub mod decoder;
pub mod heartbeat;
pub mod probe;
pub mod reconnect;
pub mod request;
pub mod router;
pub mod wire;

pub use connection::UpstoxFeed;
pub use decoder::{DecodeSkip, DecodedFrame, FrameDecoder, FrameKind};
pub use probe::{HttpHealthProbe, ProbeError};
pub use router::{FrameRouter, Routed};
