//! Client subscription registry.
//!
//! Tracks which client watches which instrument and reference-counts the
//! upstream subscription. Only the first subscriber of a key triggers an
//! upstream subscribe and only the last one leaving triggers an upstream
//! unsubscribe.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use super::{FeedMode, SubscriptionChanges};
use crate::domain::market::InstrumentKey;

/// Identifier of a downstream client session.
pub type ClientId = String;

#[derive(Debug, Default)]
struct RegistryState {
    client_keys: HashMap<ClientId, HashSet<InstrumentKey>>,
    refcount: HashMap<InstrumentKey, usize>,
    modes: HashMap<InstrumentKey, FeedMode>,
}

impl RegistryState {
    fn add(&mut self, client: &str, keys: &[InstrumentKey], mode: FeedMode) -> Vec<InstrumentKey> {
        let client_set = self.client_keys.entry(client.to_string()).or_default();
        let mut new_upstream = Vec::new();

        for key in keys {
            if !client_set.insert(key.clone()) {
                continue;
            }

            self.modes
                .entry(key.clone())
                .and_modify(|current| *current = current.richest(mode))
                .or_insert(mode);

            let refcount = self.refcount.entry(key.clone()).or_insert(0);
            *refcount += 1;

            if *refcount == 1 {
                new_upstream.push(key.clone());
            }
        }

        if client_set.is_empty() {
            self.client_keys.remove(client);
        }

        new_upstream
    }

    fn plan(&self, client: &str, keys: &[InstrumentKey], mode: FeedMode) -> SubscriptionPlan {
        let held = self.client_keys.get(client);
        let mut seen = HashSet::new();
        let mut plan = SubscriptionPlan::default();

        for key in keys {
            if held.is_some_and(|set| set.contains(key)) || !seen.insert(key) {
                continue;
            }
            match self.modes.get(key) {
                None => plan.subscribe.push(key.clone()),
                Some(current) if current.richest(mode) != *current => {
                    plan.upgrade.push(key.clone());
                }
                Some(_) => {}
            }
        }

        plan.subscribe.sort();
        plan.upgrade.sort();
        plan
    }

    fn release(&mut self, key: &InstrumentKey) -> bool {
        let Some(refcount) = self.refcount.get_mut(key) else {
            return false;
        };
        *refcount = refcount.saturating_sub(1);
        if *refcount > 0 {
            return false;
        }
        self.refcount.remove(key);
        self.modes.remove(key);
        true
    }

    fn remove(&mut self, client: &str, keys: &[InstrumentKey]) -> Vec<InstrumentKey> {
        let Some(client_set) = self.client_keys.get_mut(client) else {
            return vec![];
        };

        let removed: Vec<InstrumentKey> = keys
            .iter()
            .filter(|key| client_set.remove(*key))
            .cloned()
            .collect();

        if client_set.is_empty() {
            self.client_keys.remove(client);
        }

        removed.into_iter().filter(|key| self.release(key)).collect()
    }

    fn remove_client(&mut self, client: &str) -> Vec<InstrumentKey> {
        let Some(client_set) = self.client_keys.remove(client) else {
            return vec![];
        };
        client_set.into_iter().filter(|key| self.release(key)).collect()
    }
}

/// Reference-counted registry of client subscriptions.
///
/// # Example
///
/// ```rust
/// use market_feed_core::domain::subscription::{FeedMode, SubscriptionRegistry};
///
/// let registry = SubscriptionRegistry::new();
/// let key = "NSE_EQ|INE002A01018".to_string();
///
/// let changes = registry.subscribe("a", &[key.clone()], FeedMode::Full);
/// assert!(changes.subscribe.contains(&key));
///
/// // Second client shares the upstream subscription
/// let changes = registry.subscribe("b", &[key.clone()], FeedMode::Full);
/// assert!(changes.is_empty());
///
/// registry.unsubscribe("a", &[key.clone()]);
/// let changes = registry.unsubscribe("b", &[key.clone()]);
/// assert!(changes.unsubscribe.contains(&key));
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Upstream effect of registering `keys` for `client`, without
    /// registering anything.
    #[must_use]
    pub fn plan(&self, client: &str, keys: &[InstrumentKey], mode: FeedMode) -> SubscriptionPlan {
        self.state.read().plan(client, keys, mode)
    }

    /// Register `keys` for `client`.
    ///
    /// Returns the keys that need an upstream subscribe.
    pub fn subscribe(
        &self,
        client: &str,
        keys: &[InstrumentKey],
        mode: FeedMode,
    ) -> SubscriptionChanges {
        let added = self.state.write().add(client, keys, mode);
        if !added.is_empty() {
            tracing::debug!(client, count = added.len(), %mode, "New upstream subscriptions");
        }
        SubscriptionChanges::subscribe_only(added)
    }

    /// Drop `keys` for `client`.
    ///
    /// Returns the keys that no client watches any more.
    pub fn unsubscribe(&self, client: &str, keys: &[InstrumentKey]) -> SubscriptionChanges {
        let removed = self.state.write().remove(client, keys);
        if !removed.is_empty() {
            tracing::debug!(client, count = removed.len(), "Upstream subscriptions released");
        }
        SubscriptionChanges::unsubscribe_only(removed)
    }

    /// Drop every subscription of `client` (client disconnected).
    pub fn remove_client(&self, client: &str) -> SubscriptionChanges {
        SubscriptionChanges::unsubscribe_only(self.state.write().remove_client(client))
    }

    /// Richest mode requested for `key`.
    #[must_use]
    pub fn mode_for(&self, key: &str) -> Option<FeedMode> {
        self.state.read().modes.get(key).copied()
    }

    /// Clients watching `key`.
    #[must_use]
    pub fn clients_for(&self, key: &str) -> Vec<ClientId> {
        self.state
            .read()
            .client_keys
            .iter()
            .filter(|(_, keys)| keys.contains(key))
            .map(|(client, _)| client.clone())
            .collect()
    }

    /// Keys watched by `client`.
    #[must_use]
    pub fn keys_for(&self, client: &str) -> Vec<InstrumentKey> {
        self.state
            .read()
            .client_keys
            .get(client)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether any client watches `key`.
    #[must_use]
    pub fn has_subscribers(&self, key: &str) -> bool {
        self.state.read().refcount.contains_key(key)
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let state = self.state.read();
        RegistryStats {
            key_count: state.refcount.len(),
            client_count: state.client_keys.len(),
        }
    }
}

/// Upstream work a subscribe request would cause.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionPlan {
    /// Keys no client watches yet, sorted.
    pub subscribe: Vec<InstrumentKey>,
    /// Keys already upstream in a poorer mode, sorted.
    pub upgrade: Vec<InstrumentKey>,
}

impl SubscriptionPlan {
    /// Every key the feed must be asked for.
    #[must_use]
    pub fn upstream(&self) -> Vec<InstrumentKey> {
        let mut keys: Vec<InstrumentKey> =
            self.subscribe.iter().chain(&self.upgrade).cloned().collect();
        keys.sort();
        keys
    }

    /// Whether the request changes nothing upstream.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.upgrade.is_empty()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of keys with at least one subscriber.
    pub key_count: usize,
    /// Number of clients with at least one key.
    pub client_count: usize,
}
