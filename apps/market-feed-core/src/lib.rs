#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Feed Core - Exchange Market Data Ingestion
//!
//! Keeps a set of parallel WebSocket connections to the exchange market data
//! feed, each bound to a leased credential, and turns their binary frames
//! into canonical ticks and order books for the hot cache, the alert engine
//! and in-process broadcast consumers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: pure types and rules
//!   - `credential`: capability-scoped credentials and health
//!   - `market`: canonical ticks, books and market status
//!   - `subscription`: feed modes, per-mode limits, client registry
//!   - `sync`: per-connection snapshot synchronization
//!   - `depth`: reduced-level book views
//!   - `alert`: alert rules and events
//!
//! - **Application**: ports and shared services
//!   - `ports`: feed, listener, credential probe and alert sink traits
//!   - `services`: credential pool, cache, alert engine, pipeline, health
//!
//! - **Infrastructure**: adapters
//!   - `upstox`: socket connection, frame decoder, credential probe
//!   - `broadcast`: channel fan-out
//!   - `config`: environment configuration
//!   - `health`: health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! socket 0 ──┐
//! socket 1 ──┼─► FrameRouter ─► MarketPipeline ─► MarketCache
//! socket N ──┘   (sync gate)                   ├─► AlertEngine ─► alerts
//!                                              └─► BroadcastHub ─► consumers
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core market data types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::alert::{AlertEvent, AlertRule, RuleType};
pub use domain::credential::{Capability, Credential, CredentialError, HealthState};
pub use domain::depth::{DepthCompressor, DepthLevels, OrderBookSnapshot};
pub use domain::market::{
    BookLevel, CanonicalDepth, CanonicalTick, InstrumentKey, MarketInfo, MarketStatus,
};
pub use domain::subscription::{FeedMode, SubscriptionError, SubscriptionLimiter};
pub use domain::sync::{ConnectionState, FeedSyncTracker};

// Ports and services
pub use application::ports::{FeedError, FeedListener, MarketFeed};
pub use application::services::{
    AlertEngine, CredentialPool, MarketCache, MarketPipeline, ServiceHealth, SubscriptionService,
};

// Infrastructure config
pub use infrastructure::config::{
    BroadcastSettings, ConfigError, CredentialSettings, FeedCoreConfig, FeedSettings,
    ServerSettings,
};

// Exchange adapter
pub use infrastructure::upstox::{FrameDecoder, FrameRouter, HttpHealthProbe, UpstoxFeed};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Broadcast hub
pub use infrastructure::broadcast::{
    BroadcastConfig, BroadcastHub, BroadcastNotifier, BroadcastStats, SharedBroadcastHub,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
