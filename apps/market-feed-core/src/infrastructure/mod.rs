//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Upstox market data feed adapter (socket, decoder, credential probe).
pub mod upstox;

/// Broadcast channel adapters for record and alert distribution.
pub mod broadcast;

/// Configuration from the environment.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber and OpenTelemetry export.
pub mod telemetry;
