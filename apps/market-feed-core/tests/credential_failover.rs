//! Credential Failover Integration Tests
//!
//! Exercises pool classification, fallback selection, leases across parallel
//! connections and probe sweeps.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_test::{assert_err, assert_ok};

use market_feed_core::application::ports::{HealthProbe, ProbeOutcome};
use market_feed_core::{Capability, Credential, CredentialError, CredentialPool, HealthState};

fn credential(id: &str, capability: Capability) -> Credential {
    Credential::new(id, capability, format!("token-{id}"), Utc::now() + chrono::Duration::hours(8))
}

fn ws_pool(ids: &[&str]) -> (CredentialPool, Vec<Arc<Credential>>) {
    let pool = CredentialPool::new(Duration::from_secs(60));
    let registered = ids
        .iter()
        .map(|id| {
            pool.register(Capability::MarketDataWs, credential(id, Capability::MarketDataWs))
                .unwrap()
        })
        .collect();
    (pool, registered)
}

/// Probe answering from a fixed table of secrets.
struct TableProbe(HashMap<String, ProbeOutcome>);

#[async_trait]
impl HealthProbe for TableProbe {
    async fn probe(&self, credential: &Credential) -> ProbeOutcome {
        self.0
            .get(credential.secret())
            .cloned()
            .unwrap_or(ProbeOutcome::Indeterminate {
                reason: "unlisted".to_string(),
            })
    }
}

#[test]
fn all_rejected_is_definitive() {
    let (pool, all) = ws_pool(&["ws-1", "ws-2", "ws-3"]);
    for c in &all {
        pool.mark_unhealthy_auth(c);
    }

    assert!(pool.is_definitive_auth_failure(Capability::MarketDataWs));
    let err = assert_err!(pool.select_healthy(Capability::MarketDataWs));
    assert_eq!(
        err,
        CredentialError::NoHealthyCredential {
            capability: Capability::MarketDataWs,
            total: 3,
            unhealthy_auth: 3,
            unknown: 0,
        }
    );
}

#[test]
fn one_unknown_keeps_failure_indefinite() {
    let (pool, all) = ws_pool(&["ws-1", "ws-2", "ws-3"]);
    pool.mark_unhealthy_auth(&all[0]);
    pool.mark_unhealthy_auth(&all[1]);
    pool.mark_unknown(&all[2]);

    assert!(!pool.is_definitive_auth_failure(Capability::MarketDataWs));
    assert!(matches!(
        pool.select_healthy(Capability::MarketDataWs),
        Err(CredentialError::NoHealthyCredential { unknown: 1, .. })
    ));
}

#[test]
fn empty_capability_is_not_definitive() {
    let pool = CredentialPool::new(Duration::from_secs(60));
    assert!(!pool.is_definitive_auth_failure(Capability::OptionChain));
}

#[test]
fn falls_back_to_primary_then_recovers() {
    let (pool, registered) = ws_pool(&["ws-1"]);
    pool.register(
        Capability::CoreRest,
        credential("primary", Capability::CoreRest).with_primary(),
    )
    .unwrap();
    let ws = &registered[0];
    pool.mark_unknown(ws);

    let fallback = assert_ok!(pool.select_with_fallback(Capability::MarketDataWs));
    assert_eq!(fallback.id(), "primary");

    pool.mark_healthy(ws);
    assert_eq!(
        pool.select_with_fallback(Capability::MarketDataWs).unwrap().id(),
        "ws-1"
    );
}

#[test]
fn parallel_connections_lease_distinct_credentials() {
    let (pool, _) = ws_pool(&["ws-1", "ws-2"]);

    let a = pool.acquire_lease(Capability::MarketDataWs, "conn-0").unwrap();
    let b = pool.acquire_lease(Capability::MarketDataWs, "conn-1").unwrap();
    assert_ne!(a.id(), b.id());
    assert!(matches!(
        pool.acquire_lease(Capability::MarketDataWs, "conn-2"),
        Err(CredentialError::LeasesExhausted {
            capability: Capability::MarketDataWs
        })
    ));

    // Same holder gets its credential back.
    assert_eq!(
        pool.acquire_lease(Capability::MarketDataWs, "conn-0").unwrap().id(),
        a.id()
    );

    assert!(pool.release_lease("conn-1"));
    assert_eq!(
        pool.acquire_lease(Capability::MarketDataWs, "conn-2").unwrap().id(),
        b.id()
    );
}

#[tokio::test]
async fn sweep_reclassifies_every_credential() {
    let (pool, _) = ws_pool(&["ws-1", "ws-2", "ws-3"]);
    let probe = TableProbe(HashMap::from([
        ("token-ws-1".to_string(), ProbeOutcome::Healthy),
        ("token-ws-2".to_string(), ProbeOutcome::AuthRejected { status: 401 }),
    ]));

    let report = pool.sweep(&probe).await;

    assert_eq!(report.probed, 3);
    assert_eq!((report.healthy, report.unhealthy_auth, report.unknown), (1, 1, 1));
    let health: HashMap<String, HealthState> = pool
        .summaries()
        .into_iter()
        .map(|s| (s.id, s.health))
        .collect();
    assert_eq!(health["ws-1"], HealthState::Healthy);
    assert_eq!(health["ws-2"], HealthState::UnhealthyAuth);
    assert_eq!(health["ws-3"], HealthState::Unknown);
    assert!(!pool.is_definitive_auth_failure(Capability::MarketDataWs));
}
