//! Subscription Service
//!
//! Routes client subscribe/unsubscribe requests through the reference-counted
//! registry so the exchange sees each instrument once, in the richest mode any
//! client asked for.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::application::ports::{FeedError, MarketFeed};
use crate::application::services::MarketCache;
use crate::domain::market::InstrumentKey;
use crate::domain::subscription::{FeedMode, RegistryStats, SubscriptionRegistry};

/// Client-facing subscription management over one feed.
pub struct SubscriptionService {
    registry: SubscriptionRegistry,
    feed: Arc<dyn MarketFeed>,
    cache: Arc<MarketCache>,
    // Serializes registry plans with the upstream calls they cause.
    ops: Mutex<()>,
}

impl std::fmt::Debug for SubscriptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionService")
            .field("registry", &self.registry)
            .field("feed", &self.feed.source_name())
            .finish_non_exhaustive()
    }
}

impl SubscriptionService {
    /// Create a service over `feed`; cache entries of released instruments
    /// are evicted from `cache`.
    #[must_use]
    pub fn new(feed: Arc<dyn MarketFeed>, cache: Arc<MarketCache>) -> Self {
        Self {
            registry: SubscriptionRegistry::new(),
            feed,
            cache,
            ops: Mutex::new(()),
        }
    }

    /// Subscribe `client` to `keys`.
    ///
    /// New instruments and instruments upgraded to a richer mode go upstream
    /// in one request; the registry only records the client once the feed
    /// accepts it. Returns the instruments newly subscribed upstream.
    ///
    /// # Errors
    ///
    /// Returns the feed error; nothing is registered or held in that case.
    pub async fn subscribe(
        &self,
        client: &str,
        keys: &[InstrumentKey],
        mode: FeedMode,
    ) -> Result<Vec<InstrumentKey>, FeedError> {
        let _guard = self.ops.lock().await;

        let plan = self.registry.plan(client, keys, mode);
        if !plan.is_empty() {
            if let Err(err) = self.feed.subscribe(&plan.upstream(), mode).await {
                tracing::warn!(
                    client,
                    new = plan.subscribe.len(),
                    upgraded = plan.upgrade.len(),
                    error = %err,
                    "Subscribe rejected"
                );
                return Err(err);
            }
        }

        self.registry.subscribe(client, keys, mode);
        if !plan.subscribe.is_empty() {
            tracing::info!(client, count = plan.subscribe.len(), %mode, "Subscribed new instruments");
        }
        if !plan.upgrade.is_empty() {
            tracing::info!(client, count = plan.upgrade.len(), %mode, "Upgraded subscription mode");
        }

        Ok(plan.subscribe)
    }

    /// Unsubscribe `client` from `keys`.
    ///
    /// Returns the instruments released upstream.
    ///
    /// # Errors
    ///
    /// Returns the feed error of the upstream unsubscribe.
    pub async fn unsubscribe(
        &self,
        client: &str,
        keys: &[InstrumentKey],
    ) -> Result<Vec<InstrumentKey>, FeedError> {
        let _guard = self.ops.lock().await;
        let changes = self.registry.unsubscribe(client, keys);
        self.release(client, changes.unsubscribe.into_iter().collect())
            .await
    }

    /// Drop every subscription of a departed client.
    ///
    /// # Errors
    ///
    /// Returns the feed error of the upstream unsubscribe.
    pub async fn remove_client(&self, client: &str) -> Result<Vec<InstrumentKey>, FeedError> {
        let _guard = self.ops.lock().await;
        let changes = self.registry.remove_client(client);
        self.release(client, changes.unsubscribe.into_iter().collect())
            .await
    }

    async fn release(
        &self,
        client: &str,
        mut removed: Vec<InstrumentKey>,
    ) -> Result<Vec<InstrumentKey>, FeedError> {
        if removed.is_empty() {
            return Ok(removed);
        }
        removed.sort();
        for key in &removed {
            self.cache.remove(key);
        }
        self.feed.unsubscribe(&removed).await?;
        tracing::info!(client, count = removed.len(), "Released instruments");
        Ok(removed)
    }

    /// Instruments watched by `client`.
    #[must_use]
    pub fn keys_for(&self, client: &str) -> Vec<InstrumentKey> {
        self.registry.keys_for(client)
    }

    /// Registry counters.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Richest mode any client requested for `key`.
    #[must_use]
    pub fn mode_for(&self, key: &str) -> Option<FeedMode> {
        self.registry.mode_for(key)
    }
}
