//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, connection and credential status
//! reporting, and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON status of every connection and credential pool
//! - `GET /healthz` - liveness probe (simple OK)
//! - `GET /readyz` - readiness probe (a LIVE connection and a usable
//!   market data credential)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{
    CredentialCounts, CredentialPool, FeedStatusSnapshot, MarketCache, ServiceHealth,
};
use crate::domain::credential::{Capability, CredentialSummary};
use crate::infrastructure::broadcast::SharedBroadcastHub;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Connections with an open socket.
    pub connected_feeds: usize,
    /// Per-connection status.
    pub feeds: Vec<FeedStatusSnapshot>,
    /// Per-capability credential health.
    pub capabilities: Vec<CapabilityHealth>,
    /// Every credential, without secrets.
    pub credentials: Vec<CredentialSummary>,
    /// Instruments with a cached tick.
    pub cached_instruments: usize,
    /// Broadcast receivers across all channels.
    pub broadcast_receivers: usize,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every connection is LIVE.
    Healthy,
    /// Some connections are LIVE.
    Degraded,
    /// No LIVE connection, or market data credentials are all rejected.
    Unhealthy,
}

/// Credential health of one capability.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityHealth {
    /// Capability.
    pub capability: Capability,
    /// Health breakdown.
    #[serde(flatten)]
    pub counts: CredentialCounts,
    /// Every active credential was rejected by the exchange.
    pub definitive_auth_failure: bool,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    health: Arc<ServiceHealth>,
    pool: Arc<CredentialPool>,
    cache: Arc<MarketCache>,
    broadcast_hub: SharedBroadcastHub,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub const fn new(
        version: String,
        health: Arc<ServiceHealth>,
        pool: Arc<CredentialPool>,
        cache: Arc<MarketCache>,
        broadcast_hub: SharedBroadcastHub,
    ) -> Self {
        Self {
            version,
            health,
            pool,
            cache,
            broadcast_hub,
        }
    }

    fn market_data_rejected(&self) -> bool {
        self.pool.is_definitive_auth_failure(Capability::MarketDataWs)
    }

    fn is_ready(&self) -> bool {
        self.health.live_count() > 0 && !self.market_data_rejected()
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Routes served by the health server.
    pub fn router(state: Arc<HealthServerState>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Self::router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let capabilities = state
        .pool
        .capabilities()
        .into_iter()
        .map(|capability| CapabilityHealth {
            capability,
            counts: state.pool.counts(capability),
            definitive_auth_failure: state.pool.is_definitive_auth_failure(capability),
        })
        .collect();

    HealthResponse {
        status: determine_health_status(
            state.health.live_count(),
            state.health.feed_count(),
            state.market_data_rejected(),
        ),
        version: state.version.clone(),
        uptime_secs: state.health.uptime_secs(),
        current_time: Utc::now(),
        connected_feeds: state.health.connected_count(),
        feeds: state.health.feeds(),
        capabilities,
        credentials: state.pool.summaries(),
        cached_instruments: state.cache.size(),
        broadcast_receivers: state.broadcast_hub.stats().total_receivers(),
    }
}

const fn determine_health_status(live: usize, total: usize, rejected: bool) -> HealthStatus {
    if rejected || live == 0 {
        HealthStatus::Unhealthy
    } else if live < total {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use chrono::Utc;
    use serde_json::Value;
    use test_case::test_case;
    use tower::ServiceExt;

    use super::*;
    use crate::domain::credential::Credential;
    use crate::domain::sync::ConnectionState;
    use crate::infrastructure::broadcast::BroadcastHub;

    struct Fixture {
        health: Arc<ServiceHealth>,
        pool: Arc<CredentialPool>,
        router: Router,
    }

    fn fixture() -> Fixture {
        let health = Arc::new(ServiceHealth::new());
        let pool = Arc::new(CredentialPool::new(Duration::from_secs(60)));
        let state = Arc::new(HealthServerState::new(
            "test".to_string(),
            Arc::clone(&health),
            Arc::clone(&pool),
            Arc::new(MarketCache::new()),
            Arc::new(BroadcastHub::with_defaults()),
        ));
        Fixture {
            health,
            pool,
            router: HealthServer::router(state),
        }
    }

    fn ws_credential(id: &str) -> Credential {
        Credential::new(
            id,
            Capability::MarketDataWs,
            "secret",
            Utc::now() + chrono::Duration::hours(1),
        )
    }

    async fn get(router: &Router, path: &str) -> (StatusCode, String) {
        let response = router
            .clone()
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test_case(2, 2, false, HealthStatus::Healthy)]
    #[test_case(1, 2, false, HealthStatus::Degraded)]
    #[test_case(0, 2, false, HealthStatus::Unhealthy)]
    #[test_case(2, 2, true, HealthStatus::Unhealthy)]
    #[test_case(0, 0, false, HealthStatus::Unhealthy)]
    fn status_from_connections(live: usize, total: usize, rejected: bool, expected: HealthStatus) {
        assert_eq!(determine_health_status(live, total, rejected), expected);
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
    }

    #[tokio::test]
    async fn liveness_always_ok() {
        let fixture = fixture();
        assert_eq!(get(&fixture.router, "/healthz").await, (StatusCode::OK, "OK".to_string()));
    }

    #[tokio::test]
    async fn readiness_needs_a_live_connection() {
        let fixture = fixture();
        let status = fixture.health.register_feed("conn-0");
        fixture.pool.register(Capability::MarketDataWs, ws_credential("ws-1")).unwrap();

        assert_eq!(get(&fixture.router, "/readyz").await.0, StatusCode::SERVICE_UNAVAILABLE);

        status.set_state(ConnectionState::Live);
        assert_eq!(get(&fixture.router, "/readyz").await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_fails_when_market_data_rejected() {
        let fixture = fixture();
        fixture.health.register_feed("conn-0").set_state(ConnectionState::Live);
        let credential = fixture
            .pool
            .register(Capability::MarketDataWs, ws_credential("ws-1"))
            .unwrap();

        fixture.pool.mark_unhealthy_auth(&credential);

        assert_eq!(get(&fixture.router, "/readyz").await.0, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn health_reports_feeds_and_credentials() {
        let fixture = fixture();
        fixture.health.register_feed("conn-0").set_state(ConnectionState::Live);
        fixture.health.register_feed("conn-1");
        fixture.pool.register(Capability::MarketDataWs, ws_credential("ws-1")).unwrap();

        let (code, body) = get(&fixture.router, "/health").await;
        let json: Value = serde_json::from_str(&body).unwrap();

        assert_eq!(code, StatusCode::OK);
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["feeds"].as_array().unwrap().len(), 2);
        assert_eq!(json["connected_feeds"], 1);
        assert_eq!(json["capabilities"][0]["healthy"], 1);
        assert_eq!(json["credentials"][0]["id"], "ws-1");
        assert!(!body.contains("secret"));
    }
}
