//! Ingestion Pipeline
//!
//! Listener installed on every feed connection. Each live record goes to the
//! cache first, then the alert engine, then downstream listeners such as the
//! broadcast hub, all on the connection's read loop.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::application::ports::{FeedError, FeedListener};
use crate::application::services::{AlertEngine, MarketCache};
use crate::domain::market::{CanonicalDepth, CanonicalTick, MarketInfo};

/// Fan-out from feed connections to the cache, alerts and downstream sinks.
pub struct MarketPipeline {
    cache: Arc<MarketCache>,
    alerts: Arc<AlertEngine>,
    downstream: Vec<Arc<dyn FeedListener>>,
    market_info: RwLock<Option<MarketInfo>>,
}

impl std::fmt::Debug for MarketPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketPipeline")
            .field("cache_size", &self.cache.size())
            .field("downstream", &self.downstream.len())
            .finish_non_exhaustive()
    }
}

impl MarketPipeline {
    /// Create a pipeline without downstream sinks.
    #[must_use]
    pub fn new(cache: Arc<MarketCache>, alerts: Arc<AlertEngine>) -> Self {
        Self {
            cache,
            alerts,
            downstream: Vec::new(),
            market_info: RwLock::new(None),
        }
    }

    /// Add a sink that receives records after the cache and alerts.
    #[must_use]
    pub fn with_downstream(mut self, listener: Arc<dyn FeedListener>) -> Self {
        self.downstream.push(listener);
        self
    }

    /// Latest market status reported by any connection.
    #[must_use]
    pub fn market_info(&self) -> Option<MarketInfo> {
        self.market_info.read().clone()
    }
}

impl FeedListener for MarketPipeline {
    fn on_tick(&self, tick: CanonicalTick) {
        self.cache.update_tick(tick.clone());
        self.alerts.on_tick(&tick);
        for listener in &self.downstream {
            listener.on_tick(tick.clone());
        }
    }

    fn on_depth(&self, depth: CanonicalDepth) {
        self.alerts.on_depth(&depth);
        for listener in &self.downstream {
            listener.on_depth(depth.clone());
        }
        self.cache.update_depth(depth);
    }

    fn on_market_info(&self, info: &MarketInfo) {
        tracing::info!(
            segments = info.segments.len(),
            open = info.open_segments(),
            "Market status updated"
        );
        *self.market_info.write() = Some(info.clone());
        for listener in &self.downstream {
            listener.on_market_info(info);
        }
    }

    fn on_connected(&self, connection: &str) {
        tracing::info!(connection, "Market feed live");
        for listener in &self.downstream {
            listener.on_connected(connection);
        }
    }

    fn on_disconnected(&self, connection: &str) {
        tracing::warn!(connection, "Market feed disconnected");
        for listener in &self.downstream {
            listener.on_disconnected(connection);
        }
    }

    fn on_error(&self, connection: &str, error: &FeedError) {
        tracing::error!(connection, error = %error, "Market feed error");
        for listener in &self.downstream {
            listener.on_error(connection, error);
        }
    }
}
