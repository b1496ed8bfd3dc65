//! Domain Layer - Core market data types and rules.
//!
//! Pure types with no I/O: credentials and their health, canonical market
//! records, subscription limits, the feed synchronization state machine,
//! depth compression and alert rules.

/// Alert rules, dispatch table and alert events.
pub mod alert;

/// Credentials grouped by capability with atomic health.
pub mod credential;

/// Order book depth compression.
pub mod depth;

/// Canonical ticks, order books and market status.
pub mod market;

/// Feed modes, limits and client subscription tracking.
pub mod subscription;

/// Per-connection feed synchronization state machine.
pub mod sync;
