//! Prometheus Metrics Module
//!
//! Exposes ingestion metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Frames received per connection by outcome (applied,
//!   discarded before sync, skipped as undecodable)
//! - **Records**: Ticks and books applied to the cache, alerts fired
//! - **Connections**: Connection state and reconnect attempts
//! - **Credentials**: Health transitions and healthy counts per capability
//! - **Latency**: Frame decode duration
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::credential::{Capability, HealthState};
use crate::domain::sync::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "market_feed_frames_total",
        "Frames received from the exchange feed by outcome"
    );
    describe_counter!(
        "market_feed_ticks_applied_total",
        "Ticks written to the market cache"
    );
    describe_counter!(
        "market_feed_depth_applied_total",
        "Order books written to the market cache"
    );
    describe_counter!(
        "market_feed_alerts_fired_total",
        "Alert rules triggered by rule type"
    );
    describe_counter!(
        "market_feed_reconnects_total",
        "Feed reconnection attempts"
    );
    describe_counter!(
        "market_feed_credential_transitions_total",
        "Credential health transitions by capability and new state"
    );

    describe_gauge!(
        "market_feed_connection_state",
        "Connection state (0=disconnected .. 4=live, 5=reconnecting)"
    );
    describe_gauge!(
        "market_feed_cached_instruments",
        "Instruments with a cached tick"
    );
    describe_gauge!(
        "market_feed_healthy_credentials",
        "Selectable credentials per capability"
    );
    describe_gauge!("market_feed_active_rules", "Registered alert rules");

    describe_histogram!(
        "market_feed_decode_seconds",
        "Time to decode one frame into canonical records"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// What happened to a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Decoded and dispatched.
    Applied,
    /// Dropped because the connection was not synchronized.
    Discarded,
    /// Dropped because it could not be decoded.
    Skipped,
}

impl FrameOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Discarded => "discarded",
            Self::Skipped => "skipped",
        }
    }
}

/// Record a received frame.
pub fn record_frame(connection: &str, outcome: FrameOutcome) {
    counter!(
        "market_feed_frames_total",
        "connection" => connection.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record a tick written to the cache.
pub fn record_tick_applied() {
    counter!("market_feed_ticks_applied_total").increment(1);
}

/// Record a book written to the cache.
pub fn record_depth_applied() {
    counter!("market_feed_depth_applied_total").increment(1);
}

/// Record a triggered alert.
pub fn record_alert_fired(rule_type: &'static str) {
    counter!("market_feed_alerts_fired_total", "rule_type" => rule_type).increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect(connection: &str) {
    counter!(
        "market_feed_reconnects_total",
        "connection" => connection.to_string()
    )
    .increment(1);
}

/// Record a credential health transition.
pub fn record_credential_transition(capability: Capability, state: HealthState) {
    counter!(
        "market_feed_credential_transitions_total",
        "capability" => capability.as_str(),
        "state" => state.as_str()
    )
    .increment(1);
}

/// Update the state gauge of a connection.
pub fn set_connection_state(connection: &str, state: ConnectionState) {
    gauge!(
        "market_feed_connection_state",
        "connection" => connection.to_string()
    )
    .set(f64::from(state as u8));
}

/// Update the cached instrument gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_cached_instruments(count: usize) {
    gauge!("market_feed_cached_instruments").set(count as f64);
}

/// Update the healthy credential gauge of a capability.
#[allow(clippy::cast_precision_loss)]
pub fn set_healthy_credentials(capability: Capability, count: usize) {
    gauge!(
        "market_feed_healthy_credentials",
        "capability" => capability.as_str()
    )
    .set(count as f64);
}

/// Update the registered rule gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_rules(count: usize) {
    gauge!("market_feed_active_rules").set(count as f64);
}

/// Record frame decode duration.
pub fn record_decode_duration(duration: Duration) {
    histogram!("market_feed_decode_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_outcome_as_str() {
        assert_eq!(FrameOutcome::Applied.as_str(), "applied");
        assert_eq!(FrameOutcome::Discarded.as_str(), "discarded");
        assert_eq!(FrameOutcome::Skipped.as_str(), "skipped");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame("ws-1", FrameOutcome::Applied);
        record_credential_transition(Capability::MarketDataWs, HealthState::Unknown);
        set_connection_state("ws-1", ConnectionState::Live);
        set_cached_instruments(3);
        record_decode_duration(Duration::from_micros(15));
    }
}
