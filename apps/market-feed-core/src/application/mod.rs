//! Application Layer - Use cases and port definitions.
//!
//! Ports describe what the core needs from exchanges and sinks; services
//! hold the shared ingestion state.

/// Port interfaces for feeds, credential probes and alert sinks.
pub mod ports;

/// Credential pool, cache, alerts, pipeline and health tracking.
pub mod services;
