//! Credential Types
//!
//! Access credentials for the exchange APIs, grouped by capability.
//!
//! # Design
//!
//! A credential is created by an external hydration step and afterwards only
//! its health changes. Health lives in atomics so any task can read it without
//! taking a lock; a selection racing a concurrent downgrade is tolerated and
//! corrected by the next call or sweep.
//!
//! Superseded credentials are deactivated, never deleted.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Capability
// =============================================================================

/// A class of API or feed access that needs its own credential pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    /// Core REST API (orders, profile, instruments).
    CoreRest,
    /// Market data WebSocket stream.
    MarketDataWs,
    /// Portfolio (orders and positions) WebSocket stream.
    PortfolioWs,
    /// Option chain burst REST calls.
    OptionChain,
}

impl Capability {
    /// Get all capabilities.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::CoreRest,
            Self::MarketDataWs,
            Self::PortfolioWs,
            Self::OptionChain,
        ]
    }

    /// Get the capability name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CoreRest => "CORE_REST",
            Self::MarketDataWs => "MARKET_DATA_WS",
            Self::PortfolioWs => "PORTFOLIO_WS",
            Self::OptionChain => "OPTION_CHAIN",
        }
    }

    /// Resolve the capability served by a credential slot name.
    ///
    /// Slots follow the hydration naming: `PRIMARY`, `WEBSOCKET1..n`,
    /// `PORTFOLIO1..n` and `OPTIONCHAIN1..n`.
    #[must_use]
    pub fn from_slot(slot: &str) -> Option<Self> {
        let slot = slot.trim().to_uppercase();
        if slot == "PRIMARY" {
            return Some(Self::CoreRest);
        }

        let (prefix, capability) = [
            ("WEBSOCKET", Self::MarketDataWs),
            ("PORTFOLIO", Self::PortfolioWs),
            ("OPTIONCHAIN", Self::OptionChain),
        ]
        .into_iter()
        .find(|(prefix, _)| slot.starts_with(prefix))?;

        let suffix = &slot[prefix.len()..];
        (!suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit())).then_some(capability)
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Health State
// =============================================================================

/// Health classification of a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum HealthState {
    /// Last probe or call succeeded.
    Healthy = 0,
    /// Definitively rejected by the exchange (401/410).
    UnhealthyAuth = 1,
    /// Could not be verified (timeout, DNS, 5xx).
    Unknown = 2,
}

impl HealthState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Healthy,
            1 => Self::UnhealthyAuth,
            _ => Self::Unknown,
        }
    }

    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "HEALTHY",
            Self::UnhealthyAuth => "UNHEALTHY_AUTH",
            Self::Unknown => "UNKNOWN",
        }
    }
}

// =============================================================================
// Credential
// =============================================================================

/// A single access credential bound to one capability.
pub struct Credential {
    id: String,
    capability: Capability,
    secret: String,
    valid_until: DateTime<Utc>,
    primary: bool,
    health: AtomicU8,
    /// Milliseconds since epoch of the last health change, 0 when never checked.
    last_checked_ms: AtomicI64,
    active: AtomicBool,
}

impl Credential {
    /// Create a new credential. Hydrated credentials start healthy.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        capability: Capability,
        secret: impl Into<String>,
        valid_until: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            capability,
            secret: secret.into(),
            valid_until,
            primary: false,
            health: AtomicU8::new(HealthState::Healthy as u8),
            last_checked_ms: AtomicI64::new(0),
            active: AtomicBool::new(true),
        }
    }

    /// Flag this credential as the primary one for its capability.
    #[must_use]
    pub const fn with_primary(mut self) -> Self {
        self.primary = true;
        self
    }

    /// Credential identifier (slot name).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Capability served by this credential.
    #[must_use]
    pub const fn capability(&self) -> Capability {
        self.capability
    }

    /// Opaque secret material (bearer token).
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// End of the validity window.
    #[must_use]
    pub const fn valid_until(&self) -> DateTime<Utc> {
        self.valid_until
    }

    /// Whether this is the primary credential.
    #[must_use]
    pub const fn is_primary(&self) -> bool {
        self.primary
    }

    /// Current health.
    #[must_use]
    pub fn health(&self) -> HealthState {
        HealthState::from_u8(self.health.load(Ordering::Acquire))
    }

    /// When the health was last set by a probe or call outcome.
    #[must_use]
    pub fn last_checked(&self) -> Option<DateTime<Utc>> {
        match self.last_checked_ms.load(Ordering::Acquire) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    /// Whether the credential is still in service.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Whether the validity window has passed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.valid_until
    }

    /// Whether the credential can be handed out right now.
    #[must_use]
    pub fn is_selectable(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.health() == HealthState::Healthy && !self.is_expired(now)
    }

    /// Record a health outcome.
    ///
    /// Returns the previous state.
    pub(crate) fn set_health(&self, state: HealthState, now: DateTime<Utc>) -> HealthState {
        self.last_checked_ms
            .store(now.timestamp_millis(), Ordering::Release);
        HealthState::from_u8(self.health.swap(state as u8, Ordering::AcqRel))
    }

    /// Take the credential out of service.
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Serializable view without the secret.
    #[must_use]
    pub fn summary(&self, now: DateTime<Utc>) -> CredentialSummary {
        CredentialSummary {
            id: self.id.clone(),
            capability: self.capability,
            health: self.health(),
            primary: self.primary,
            active: self.is_active(),
            expired: self.is_expired(now),
            last_checked: self.last_checked(),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("capability", &self.capability)
            .field("secret", &"[REDACTED]")
            .field("valid_until", &self.valid_until)
            .field("primary", &self.primary)
            .field("health", &self.health())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Credential state without secret material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialSummary {
    /// Credential identifier.
    pub id: String,
    /// Capability served.
    pub capability: Capability,
    /// Current health.
    pub health: HealthState,
    /// Primary flag.
    pub primary: bool,
    /// Still in service.
    pub active: bool,
    /// Validity window passed.
    pub expired: bool,
    /// Last health change.
    pub last_checked: Option<DateTime<Utc>>,
}

// =============================================================================
// Errors
// =============================================================================

/// Credential pool errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// No selectable credential for the capability.
    #[error(
        "no healthy credential for {capability}: total={total}, unhealthy_auth={unhealthy_auth}, unknown={unknown}"
    )]
    NoHealthyCredential {
        /// Requested capability.
        capability: Capability,
        /// Active credentials registered.
        total: usize,
        /// Credentials rejected by the exchange.
        unhealthy_auth: usize,
        /// Credentials that could not be verified.
        unknown: usize,
    },

    /// Primary flag on a capability that has no primary slot.
    #[error("credential {id} cannot be primary for {capability}")]
    PrimaryNotAllowed {
        /// Credential id.
        id: String,
        /// Capability it was registered under.
        capability: Capability,
    },

    /// Capability mismatch between registration and credential.
    #[error("credential {id} serves {actual}, not {expected}")]
    CapabilityMismatch {
        /// Credential id.
        id: String,
        /// Capability requested at registration.
        expected: Capability,
        /// Capability carried by the credential.
        actual: Capability,
    },

    /// Every healthy credential is leased by another holder.
    #[error("all healthy credentials for {capability} are leased")]
    LeasesExhausted {
        /// Requested capability.
        capability: Capability,
    },

    /// Renewal requested by a holder without a live lease.
    #[error("{holder} holds no credential lease")]
    LeaseNotHeld {
        /// Lease holder.
        holder: String,
    },
}
