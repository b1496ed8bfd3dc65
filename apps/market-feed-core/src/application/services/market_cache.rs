//! Market Cache
//!
//! Latest tick and book per instrument. Writes are last-write-wins with no
//! timestamp check: a late frame overwrites a newer one.
//!
//! Both maps are sharded, so writers on different instruments never contend
//! and a reader of one key never waits on another.

use std::sync::Arc;

use dashmap::DashMap;

use crate::domain::market::{CanonicalDepth, CanonicalTick, InstrumentKey};
use crate::infrastructure::metrics;

/// Hot cache of canonical market records.
#[derive(Debug, Default)]
pub struct MarketCache {
    ticks: DashMap<InstrumentKey, Arc<CanonicalTick>>,
    depths: DashMap<InstrumentKey, Arc<CanonicalDepth>>,
}

impl MarketCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest tick.
    ///
    /// Absent ticks and ticks without an instrument key are ignored.
    /// Returns `true` if the tick was stored.
    pub fn update_tick(&self, tick: impl Into<Option<CanonicalTick>>) -> bool {
        let Some(tick) = tick.into() else {
            return false;
        };
        if tick.instrument_key.is_empty() {
            return false;
        }

        tracing::trace!(instrument = %tick.instrument_key, ltp = %tick.ltp, "Tick cached");
        self.ticks.insert(tick.instrument_key.clone(), Arc::new(tick));
        metrics::record_tick_applied();
        metrics::set_cached_instruments(self.ticks.len());
        true
    }

    /// Store the latest book.
    ///
    /// Absent books and books without an instrument key are ignored.
    /// Returns `true` if the book was stored.
    pub fn update_depth(&self, depth: impl Into<Option<CanonicalDepth>>) -> bool {
        let Some(depth) = depth.into() else {
            return false;
        };
        if depth.instrument_key.is_empty() {
            return false;
        }

        self.depths
            .insert(depth.instrument_key.clone(), Arc::new(depth));
        metrics::record_depth_applied();
        true
    }

    /// Latest tick of an instrument.
    #[must_use]
    pub fn get_tick(&self, key: &str) -> Option<Arc<CanonicalTick>> {
        self.ticks.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Latest book of an instrument.
    #[must_use]
    pub fn get_depth(&self, key: &str) -> Option<Arc<CanonicalDepth>> {
        self.depths.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Every cached tick, in no particular order.
    #[must_use]
    pub fn get_all_ticks(&self) -> Vec<Arc<CanonicalTick>> {
        self.ticks.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Every cached book, in no particular order.
    #[must_use]
    pub fn get_all_depths(&self) -> Vec<Arc<CanonicalDepth>> {
        self.depths.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Whether a tick is cached for the instrument.
    #[must_use]
    pub fn has_tick(&self, key: &str) -> bool {
        self.ticks.contains_key(key)
    }

    /// Evict the tick and book of an instrument.
    pub fn remove(&self, key: &str) {
        self.ticks.remove(key);
        self.depths.remove(key);
        metrics::set_cached_instruments(self.ticks.len());
    }

    /// Evict everything.
    pub fn clear(&self) {
        self.ticks.clear();
        self.depths.clear();
        metrics::set_cached_instruments(0);
        tracing::info!("Market cache cleared");
    }

    /// Number of instruments with a cached tick.
    #[must_use]
    pub fn size(&self) -> usize {
        self.ticks.len()
    }
}
