//! Credential Pool
//!
//! Holds hydrated credentials per capability, hands out healthy ones and
//! reclassifies them from call outcomes and periodic probe sweeps.
//!
//! # Health model
//!
//! | Outcome              | State            |
//! |----------------------|------------------|
//! | success              | `HEALTHY`        |
//! | 401 / 410            | `UNHEALTHY_AUTH` |
//! | timeout, DNS, 5xx .. | `UNKNOWN`        |
//!
//! A capability is in *definitive* auth failure only when every credential is
//! `UNHEALTHY_AUTH`. A single `UNKNOWN` credential means the failure may be
//! the network, not the credentials.
//!
//! # Leases
//!
//! Parallel feed connections lease distinct credentials so one rejected
//! token does not take every connection down at once. Leases expire after a
//! TTL unless renewed.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::application::ports::{HealthProbe, ProbeOutcome};
use crate::domain::credential::{
    Capability, Credential, CredentialError, CredentialSummary, HealthState,
};
use crate::infrastructure::metrics;

// =============================================================================
// Reports
// =============================================================================

/// Health breakdown of the active credentials of one capability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CredentialCounts {
    /// Active credentials.
    pub total: usize,
    /// Selectable right now (healthy and unexpired).
    pub healthy: usize,
    /// Rejected by the exchange.
    pub unhealthy_auth: usize,
    /// Could not be verified.
    pub unknown: usize,
    /// Past their validity window.
    pub expired: usize,
}

/// Result of one probe sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Credentials probed.
    pub probed: usize,
    /// Classified healthy.
    pub healthy: usize,
    /// Classified `UNHEALTHY_AUTH`.
    pub unhealthy_auth: usize,
    /// Classified `UNKNOWN`.
    pub unknown: usize,
}

#[derive(Debug)]
struct Lease {
    capability: Capability,
    credential: Arc<Credential>,
    expires_at: Instant,
}

// =============================================================================
// Pool
// =============================================================================

/// Capability-scoped credential pool.
#[derive(Debug)]
pub struct CredentialPool {
    credentials: RwLock<HashMap<Capability, Vec<Arc<Credential>>>>,
    cursors: HashMap<Capability, AtomicUsize>,
    leases: Mutex<HashMap<String, Lease>>,
    lease_ttl: Duration,
}

impl CredentialPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new(lease_ttl: Duration) -> Self {
        Self {
            credentials: RwLock::new(HashMap::new()),
            cursors: Capability::all()
                .iter()
                .map(|c| (*c, AtomicUsize::new(0)))
                .collect(),
            leases: Mutex::new(HashMap::new()),
            lease_ttl,
        }
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Register a credential under `capability`.
    ///
    /// A credential with an id already present supersedes the old one, and a
    /// new `CORE_REST` primary supersedes the previous primary. Superseded
    /// credentials are deactivated, not removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential serves another capability or is
    /// flagged primary outside `CORE_REST`.
    pub fn register(
        &self,
        capability: Capability,
        credential: Credential,
    ) -> Result<Arc<Credential>, CredentialError> {
        if credential.capability() != capability {
            return Err(CredentialError::CapabilityMismatch {
                id: credential.id().to_string(),
                expected: capability,
                actual: credential.capability(),
            });
        }
        if credential.is_primary() && capability != Capability::CoreRest {
            return Err(CredentialError::PrimaryNotAllowed {
                id: credential.id().to_string(),
                capability,
            });
        }

        let credential = Arc::new(credential);
        let mut all = self.credentials.write();
        let list = all.entry(capability).or_default();

        for existing in list.iter().filter(|c| c.is_active()) {
            let same_id = existing.id() == credential.id();
            let replaced_primary = credential.is_primary() && existing.is_primary();
            if same_id || replaced_primary {
                existing.deactivate();
                tracing::info!(
                    capability = %capability,
                    superseded = existing.id(),
                    by = credential.id(),
                    "Credential superseded"
                );
            }
        }

        list.push(Arc::clone(&credential));
        metrics::set_healthy_credentials(capability, healthy_in(list));
        drop(all);

        tracing::debug!(
            capability = %capability,
            credential = credential.id(),
            primary = credential.is_primary(),
            valid_until = %credential.valid_until(),
            "Credential registered"
        );
        Ok(credential)
    }

    /// Seed the pool at startup.
    ///
    /// Returns the number of credentials registered.
    ///
    /// # Errors
    ///
    /// Returns the first registration error; credentials before it stay
    /// registered.
    pub fn hydrate(
        &self,
        credentials: impl IntoIterator<Item = Credential>,
    ) -> Result<usize, CredentialError> {
        let mut registered = 0;
        for credential in credentials {
            self.register(credential.capability(), credential)?;
            registered += 1;
        }
        tracing::info!(registered, "Credential pool hydrated");
        Ok(registered)
    }

    // -------------------------------------------------------------------------
    // Selection
    // -------------------------------------------------------------------------

    /// Pick a healthy credential for `capability`, round robin.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::NoHealthyCredential`] with the health
    /// breakdown when nothing is selectable.
    pub fn select_healthy(&self, capability: Capability) -> Result<Arc<Credential>, CredentialError> {
        let now = Utc::now();
        let all = self.credentials.read();
        let list = all.get(&capability).map_or(&[][..], Vec::as_slice);

        let candidates: Vec<&Arc<Credential>> =
            list.iter().filter(|c| c.is_selectable(now)).collect();
        if candidates.is_empty() {
            return Err(no_healthy(capability, counts_in(list, now)));
        }

        let index = self.next_index(capability, candidates.len());
        Ok(Arc::clone(candidates[index]))
    }

    /// Pick a healthy credential for `capability`, otherwise the healthy
    /// `CORE_REST` primary.
    ///
    /// # Errors
    ///
    /// Returns the error for `capability` when neither is available.
    pub fn select_with_fallback(
        &self,
        capability: Capability,
    ) -> Result<Arc<Credential>, CredentialError> {
        match self.select_healthy(capability) {
            Ok(credential) => Ok(credential),
            Err(err) => {
                let Some(primary) = self.healthy_primary() else {
                    return Err(err);
                };
                tracing::warn!(
                    capability = %capability,
                    fallback = primary.id(),
                    "No healthy credential for capability, falling back to primary"
                );
                Ok(primary)
            }
        }
    }

    fn healthy_primary(&self) -> Option<Arc<Credential>> {
        let now = Utc::now();
        self.credentials
            .read()
            .get(&Capability::CoreRest)?
            .iter()
            .find(|c| c.is_primary() && c.is_selectable(now))
            .cloned()
    }

    fn next_index(&self, capability: Capability, len: usize) -> usize {
        self.cursors
            .get(&capability)
            .map_or(0, |cursor| cursor.fetch_add(1, Ordering::Relaxed))
            % len
    }

    // -------------------------------------------------------------------------
    // Classification
    // -------------------------------------------------------------------------

    /// The exchange rejected the credential (401/410).
    pub fn mark_unhealthy_auth(&self, credential: &Credential) {
        self.transition(credential, HealthState::UnhealthyAuth);
    }

    /// The credential could not be verified (network, timeout, DNS).
    pub fn mark_unknown(&self, credential: &Credential) {
        self.transition(credential, HealthState::Unknown);
    }

    /// A probe or call with the credential succeeded.
    pub fn mark_healthy(&self, credential: &Credential) {
        self.transition(credential, HealthState::Healthy);
    }

    fn transition(&self, credential: &Credential, state: HealthState) {
        let previous = credential.set_health(state, Utc::now());
        if previous == state {
            return;
        }

        match state {
            HealthState::UnhealthyAuth => tracing::warn!(
                capability = %credential.capability(),
                credential = credential.id(),
                from = previous.as_str(),
                "Credential rejected by exchange"
            ),
            HealthState::Unknown => tracing::warn!(
                capability = %credential.capability(),
                credential = credential.id(),
                from = previous.as_str(),
                "Credential health unknown"
            ),
            HealthState::Healthy => tracing::info!(
                capability = %credential.capability(),
                credential = credential.id(),
                from = previous.as_str(),
                "Credential healthy"
            ),
        }
        metrics::record_credential_transition(credential.capability(), state);
        metrics::set_healthy_credentials(
            credential.capability(),
            self.counts(credential.capability()).healthy,
        );
    }

    /// Whether every active credential of `capability` was rejected by the
    /// exchange.
    ///
    /// `false` for a capability without credentials and whenever at least one
    /// credential is `UNKNOWN` or healthy.
    #[must_use]
    pub fn is_definitive_auth_failure(&self, capability: Capability) -> bool {
        let all = self.credentials.read();
        let mut active = all
            .get(&capability)
            .into_iter()
            .flatten()
            .filter(|c| c.is_active())
            .peekable();
        active.peek().is_some() && active.all(|c| c.health() == HealthState::UnhealthyAuth)
    }

    /// Health breakdown of `capability`.
    #[must_use]
    pub fn counts(&self, capability: Capability) -> CredentialCounts {
        let all = self.credentials.read();
        counts_in(
            all.get(&capability).map_or(&[][..], Vec::as_slice),
            Utc::now(),
        )
    }

    /// Capabilities with at least one active credential.
    #[must_use]
    pub fn capabilities(&self) -> Vec<Capability> {
        let all = self.credentials.read();
        let mut capabilities: Vec<Capability> = all
            .iter()
            .filter(|(_, list)| list.iter().any(|c| c.is_active()))
            .map(|(capability, _)| *capability)
            .collect();
        capabilities.sort();
        capabilities
    }

    /// Summaries of every credential, superseded ones included.
    #[must_use]
    pub fn summaries(&self) -> Vec<CredentialSummary> {
        let now = Utc::now();
        let all = self.credentials.read();
        let mut summaries: Vec<CredentialSummary> =
            all.values().flatten().map(|c| c.summary(now)).collect();
        summaries.sort_by(|a, b| (a.capability, &a.id).cmp(&(b.capability, &b.id)));
        summaries
    }

    // -------------------------------------------------------------------------
    // Sweep
    // -------------------------------------------------------------------------

    /// Probe every active credential and reclassify it.
    ///
    /// Probes run concurrently; the pool lock is not held while they run.
    pub async fn sweep(&self, probe: &dyn HealthProbe) -> SweepReport {
        let targets: Vec<Arc<Credential>> = self
            .credentials
            .read()
            .values()
            .flatten()
            .filter(|c| c.is_active())
            .cloned()
            .collect();

        let outcomes = join_all(targets.iter().map(|c| probe.probe(c))).await;

        let mut report = SweepReport {
            probed: targets.len(),
            ..SweepReport::default()
        };
        for (credential, outcome) in targets.iter().zip(outcomes) {
            match outcome {
                ProbeOutcome::Healthy => {
                    report.healthy += 1;
                    self.mark_healthy(credential);
                }
                ProbeOutcome::AuthRejected { status } => {
                    report.unhealthy_auth += 1;
                    tracing::debug!(credential = credential.id(), status, "Probe rejected");
                    self.mark_unhealthy_auth(credential);
                }
                ProbeOutcome::Indeterminate { reason } => {
                    report.unknown += 1;
                    tracing::debug!(credential = credential.id(), %reason, "Probe indeterminate");
                    self.mark_unknown(credential);
                }
            }
        }

        tracing::info!(
            probed = report.probed,
            healthy = report.healthy,
            unhealthy_auth = report.unhealthy_auth,
            unknown = report.unknown,
            "Credential sweep complete"
        );
        report
    }

    // -------------------------------------------------------------------------
    // Leases
    // -------------------------------------------------------------------------

    /// Lease a healthy credential not held by any other holder.
    ///
    /// A holder that already leases a selectable credential of `capability`
    /// gets the same one back with a renewed expiry.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::LeasesExhausted`] when every healthy
    /// credential is leased elsewhere, or
    /// [`CredentialError::NoHealthyCredential`] when none is healthy.
    pub fn acquire_lease(
        &self,
        capability: Capability,
        holder: &str,
    ) -> Result<Arc<Credential>, CredentialError> {
        let now = Utc::now();
        let at = Instant::now();
        let mut leases = self.leases.lock();
        leases.retain(|_, lease| lease.expires_at > at);

        if let Some(lease) = leases.get_mut(holder) {
            if lease.capability == capability && lease.credential.is_selectable(now) {
                lease.expires_at = at + self.lease_ttl;
                return Ok(Arc::clone(&lease.credential));
            }
        }

        let all = self.credentials.read();
        let list = all.get(&capability).map_or(&[][..], Vec::as_slice);
        let selectable: Vec<&Arc<Credential>> =
            list.iter().filter(|c| c.is_selectable(now)).collect();
        if selectable.is_empty() {
            return Err(no_healthy(capability, counts_in(list, now)));
        }

        let free: Vec<&Arc<Credential>> = selectable
            .into_iter()
            .filter(|c| {
                !leases
                    .iter()
                    .any(|(h, l)| h != holder && Arc::ptr_eq(&l.credential, c))
            })
            .collect();
        if free.is_empty() {
            return Err(CredentialError::LeasesExhausted { capability });
        }

        let credential = Arc::clone(free[self.next_index(capability, free.len())]);
        drop(all);

        leases.insert(
            holder.to_string(),
            Lease {
                capability,
                credential: Arc::clone(&credential),
                expires_at: at + self.lease_ttl,
            },
        );
        tracing::debug!(
            capability = %capability,
            holder,
            credential = credential.id(),
            "Credential leased"
        );
        Ok(credential)
    }

    /// Extend the lease of `holder`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::LeaseNotHeld`] if the holder has no live
    /// lease.
    pub fn renew_lease(&self, holder: &str) -> Result<(), CredentialError> {
        let at = Instant::now();
        let mut leases = self.leases.lock();
        match leases.get_mut(holder) {
            Some(lease) if lease.expires_at > at => {
                lease.expires_at = at + self.lease_ttl;
                Ok(())
            }
            _ => {
                leases.remove(holder);
                Err(CredentialError::LeaseNotHeld {
                    holder: holder.to_string(),
                })
            }
        }
    }

    /// Release the lease of `holder`. Returns `true` if one was held.
    pub fn release_lease(&self, holder: &str) -> bool {
        let released = self.leases.lock().remove(holder).is_some();
        if released {
            tracing::debug!(holder, "Credential lease released");
        }
        released
    }

    /// Number of live leases.
    #[must_use]
    pub fn lease_count(&self) -> usize {
        let at = Instant::now();
        self.leases
            .lock()
            .values()
            .filter(|l| l.expires_at > at)
            .count()
    }
}

fn counts_in(list: &[Arc<Credential>], now: chrono::DateTime<Utc>) -> CredentialCounts {
    let mut counts = CredentialCounts::default();
    for credential in list.iter().filter(|c| c.is_active()) {
        counts.total += 1;
        if credential.is_expired(now) {
            counts.expired += 1;
        }
        match credential.health() {
            HealthState::Healthy if !credential.is_expired(now) => counts.healthy += 1,
            HealthState::Healthy => {}
            HealthState::UnhealthyAuth => counts.unhealthy_auth += 1,
            HealthState::Unknown => counts.unknown += 1,
        }
    }
    counts
}

fn healthy_in(list: &[Arc<Credential>]) -> usize {
    counts_in(list, Utc::now()).healthy
}

const fn no_healthy(capability: Capability, counts: CredentialCounts) -> CredentialError {
    CredentialError::NoHealthyCredential {
        capability,
        total: counts.total,
        unhealthy_auth: counts.unhealthy_auth,
        unknown: counts.unknown,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use mockall::predicate::always;

    use super::*;
    use crate::application::ports::MockHealthProbe;

    fn ws(id: &str) -> Credential {
        Credential::new(
            id,
            Capability::MarketDataWs,
            format!("secret-{id}"),
            Utc::now() + ChronoDuration::hours(1),
        )
    }

    fn primary(id: &str) -> Credential {
        Credential::new(
            id,
            Capability::CoreRest,
            "secret",
            Utc::now() + ChronoDuration::hours(1),
        )
        .with_primary()
    }

    fn pool_with(ids: &[&str]) -> (CredentialPool, Vec<Arc<Credential>>) {
        let pool = CredentialPool::new(Duration::from_secs(300));
        let creds = ids
            .iter()
            .map(|id| pool.register(Capability::MarketDataWs, ws(id)).unwrap())
            .collect();
        (pool, creds)
    }

    #[test]
    fn three_rejected_is_definitive() {
        let (pool, creds) = pool_with(&["WEBSOCKET1", "WEBSOCKET2", "WEBSOCKET3"]);
        for c in &creds {
            pool.mark_unhealthy_auth(c);
        }
        assert!(pool.is_definitive_auth_failure(Capability::MarketDataWs));
    }

    #[test]
    fn one_unknown_is_not_definitive() {
        let (pool, creds) = pool_with(&["WEBSOCKET1", "WEBSOCKET2", "WEBSOCKET3"]);
        pool.mark_unhealthy_auth(&creds[0]);
        pool.mark_unhealthy_auth(&creds[1]);
        pool.mark_unknown(&creds[2]);
        assert!(!pool.is_definitive_auth_failure(Capability::MarketDataWs));
    }

    #[test]
    fn empty_capability_is_not_definitive() {
        let pool = CredentialPool::new(Duration::from_secs(300));
        assert!(!pool.is_definitive_auth_failure(Capability::OptionChain));
    }

    #[test]
    fn no_healthy_reports_breakdown() {
        let (pool, creds) = pool_with(&["WEBSOCKET1", "WEBSOCKET2", "WEBSOCKET3"]);
        pool.mark_unhealthy_auth(&creds[0]);
        pool.mark_unhealthy_auth(&creds[1]);
        pool.mark_unknown(&creds[2]);

        let err = pool.select_healthy(Capability::MarketDataWs).unwrap_err();
        assert_eq!(
            err,
            CredentialError::NoHealthyCredential {
                capability: Capability::MarketDataWs,
                total: 3,
                unhealthy_auth: 2,
                unknown: 1,
            }
        );
    }

    #[test]
    fn selection_skips_unhealthy_and_rotates() {
        let (pool, creds) = pool_with(&["WEBSOCKET1", "WEBSOCKET2", "WEBSOCKET3"]);
        pool.mark_unhealthy_auth(&creds[1]);

        let picked: Vec<String> = (0..4)
            .map(|_| {
                pool.select_healthy(Capability::MarketDataWs)
                    .unwrap()
                    .id()
                    .to_string()
            })
            .collect();

        assert!(picked.iter().all(|id| id != "WEBSOCKET2"));
        assert!(picked.contains(&"WEBSOCKET1".to_string()));
        assert!(picked.contains(&"WEBSOCKET3".to_string()));
    }

    #[test]
    fn expired_credentials_count_but_are_not_selected() {
        let pool = CredentialPool::new(Duration::from_secs(300));
        pool.register(
            Capability::MarketDataWs,
            Credential::new(
                "WEBSOCKET1",
                Capability::MarketDataWs,
                "s",
                Utc::now() - ChronoDuration::minutes(1),
            ),
        )
        .unwrap();

        let counts = pool.counts(Capability::MarketDataWs);
        assert_eq!(counts.total, 1);
        assert_eq!(counts.expired, 1);
        assert_eq!(counts.healthy, 0);
        assert!(pool.select_healthy(Capability::MarketDataWs).is_err());
    }

    #[test]
    fn recovery_makes_credential_selectable_again() {
        let (pool, creds) = pool_with(&["WEBSOCKET1"]);
        pool.mark_unknown(&creds[0]);
        assert!(pool.select_healthy(Capability::MarketDataWs).is_err());

        pool.mark_healthy(&creds[0]);
        assert_eq!(
            pool.select_healthy(Capability::MarketDataWs).unwrap().id(),
            "WEBSOCKET1"
        );
    }

    #[test]
    fn fallback_to_primary() {
        let (pool, creds) = pool_with(&["WEBSOCKET1"]);
        pool.register(Capability::CoreRest, primary("PRIMARY")).unwrap();
        pool.mark_unhealthy_auth(&creds[0]);

        let picked = pool.select_with_fallback(Capability::MarketDataWs).unwrap();
        assert_eq!(picked.id(), "PRIMARY");
    }

    #[test]
    fn fallback_without_primary_keeps_original_error() {
        let (pool, creds) = pool_with(&["WEBSOCKET1"]);
        pool.mark_unknown(&creds[0]);

        let err = pool.select_with_fallback(Capability::MarketDataWs).unwrap_err();
        assert!(matches!(
            err,
            CredentialError::NoHealthyCredential {
                capability: Capability::MarketDataWs,
                ..
            }
        ));
    }

    #[test]
    fn new_primary_supersedes_previous() {
        let pool = CredentialPool::new(Duration::from_secs(300));
        let old = pool.register(Capability::CoreRest, primary("PRIMARY-A")).unwrap();
        let new = pool.register(Capability::CoreRest, primary("PRIMARY-B")).unwrap();

        assert!(!old.is_active());
        assert!(new.is_active());
        assert_eq!(pool.counts(Capability::CoreRest).total, 1);
        assert_eq!(pool.summaries().len(), 2);
    }

    #[test]
    fn same_id_supersedes_previous() {
        let (pool, creds) = pool_with(&["WEBSOCKET1"]);
        let replacement = pool.register(Capability::MarketDataWs, ws("WEBSOCKET1")).unwrap();

        assert!(!creds[0].is_active());
        assert!(replacement.is_active());
        assert_eq!(pool.counts(Capability::MarketDataWs).total, 1);
    }

    #[test]
    fn primary_outside_core_rest_is_rejected() {
        let pool = CredentialPool::new(Duration::from_secs(300));
        let err = pool
            .register(Capability::MarketDataWs, ws("WEBSOCKET1").with_primary())
            .unwrap_err();
        assert!(matches!(err, CredentialError::PrimaryNotAllowed { .. }));
    }

    #[test]
    fn capability_mismatch_is_rejected() {
        let pool = CredentialPool::new(Duration::from_secs(300));
        let err = pool.register(Capability::OptionChain, ws("WEBSOCKET1")).unwrap_err();
        assert!(matches!(err, CredentialError::CapabilityMismatch { .. }));
    }

    #[test]
    fn hydrate_registers_all() {
        let pool = CredentialPool::new(Duration::from_secs(300));
        let count = pool
            .hydrate([primary("PRIMARY"), ws("WEBSOCKET1"), ws("WEBSOCKET2")])
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(
            pool.capabilities(),
            vec![Capability::CoreRest, Capability::MarketDataWs]
        );
    }

    #[test]
    fn leases_are_distinct_until_exhausted() {
        let (pool, _) = pool_with(&["WEBSOCKET1", "WEBSOCKET2"]);

        let a = pool.acquire_lease(Capability::MarketDataWs, "ws-1").unwrap();
        let b = pool.acquire_lease(Capability::MarketDataWs, "ws-2").unwrap();
        assert_ne!(a.id(), b.id());

        let err = pool.acquire_lease(Capability::MarketDataWs, "ws-3").unwrap_err();
        assert_eq!(
            err,
            CredentialError::LeasesExhausted {
                capability: Capability::MarketDataWs
            }
        );

        assert!(pool.release_lease("ws-1"));
        let c = pool.acquire_lease(Capability::MarketDataWs, "ws-3").unwrap();
        assert_eq!(c.id(), a.id());
    }

    #[test]
    fn holder_keeps_its_lease() {
        let (pool, _) = pool_with(&["WEBSOCKET1", "WEBSOCKET2"]);
        let first = pool.acquire_lease(Capability::MarketDataWs, "ws-1").unwrap();
        let again = pool.acquire_lease(Capability::MarketDataWs, "ws-1").unwrap();
        assert_eq!(first.id(), again.id());
        assert_eq!(pool.lease_count(), 1);
    }

    #[test]
    fn rejected_lease_is_replaced() {
        let (pool, _) = pool_with(&["WEBSOCKET1", "WEBSOCKET2"]);
        let first = pool.acquire_lease(Capability::MarketDataWs, "ws-1").unwrap();
        pool.mark_unhealthy_auth(&first);

        let next = pool.acquire_lease(Capability::MarketDataWs, "ws-1").unwrap();
        assert_ne!(first.id(), next.id());
    }

    #[test]
    fn expired_leases_free_their_credential() {
        let pool = CredentialPool::new(Duration::ZERO);
        pool.register(Capability::MarketDataWs, ws("WEBSOCKET1")).unwrap();

        pool.acquire_lease(Capability::MarketDataWs, "ws-1").unwrap();
        assert_eq!(pool.lease_count(), 0);
        assert!(pool.acquire_lease(Capability::MarketDataWs, "ws-2").is_ok());
        assert!(matches!(
            pool.renew_lease("ws-1"),
            Err(CredentialError::LeaseNotHeld { .. })
        ));
    }

    #[test]
    fn renew_live_lease() {
        let (pool, _) = pool_with(&["WEBSOCKET1"]);
        pool.acquire_lease(Capability::MarketDataWs, "ws-1").unwrap();
        assert!(pool.renew_lease("ws-1").is_ok());
        assert!(pool.renew_lease("ws-9").is_err());
    }

    #[tokio::test]
    async fn sweep_reclassifies_from_probe() {
        let (pool, creds) = pool_with(&["WEBSOCKET1", "WEBSOCKET2", "WEBSOCKET3"]);
        pool.mark_unknown(&creds[0]);

        let mut probe = MockHealthProbe::new();
        probe.expect_probe().with(always()).times(3).returning(|c| {
            match c.id() {
                "WEBSOCKET1" => ProbeOutcome::Healthy,
                "WEBSOCKET2" => ProbeOutcome::AuthRejected { status: 401 },
                _ => ProbeOutcome::Indeterminate {
                    reason: "timeout".into(),
                },
            }
        });

        let report = pool.sweep(&probe).await;

        assert_eq!(
            report,
            SweepReport {
                probed: 3,
                healthy: 1,
                unhealthy_auth: 1,
                unknown: 1,
            }
        );
        assert_eq!(creds[0].health(), HealthState::Healthy);
        assert_eq!(creds[1].health(), HealthState::UnhealthyAuth);
        assert_eq!(creds[2].health(), HealthState::Unknown);
        assert!(creds[1].last_checked().is_some());
    }

    #[tokio::test]
    async fn sweep_skips_superseded() {
        let (pool, _) = pool_with(&["WEBSOCKET1"]);
        pool.register(Capability::MarketDataWs, ws("WEBSOCKET1")).unwrap();

        let mut probe = MockHealthProbe::new();
        probe
            .expect_probe()
            .times(1)
            .returning(|_| ProbeOutcome::Healthy);

        assert_eq!(pool.sweep(&probe).await.probed, 1);
    }
}
