//! Feed Core Configuration Settings
//!
//! Configuration types for the ingestion core, loaded from environment
//! variables.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::credential::{Capability, Credential};
use crate::domain::subscription::FeedMode;

/// Slot names read from `CREDENTIAL_<SLOT>`.
const CREDENTIAL_SLOTS: &[&str] = &[
    "PRIMARY",
    "WEBSOCKET1",
    "WEBSOCKET2",
    "WEBSOCKET3",
    "OPTIONCHAIN1",
    "OPTIONCHAIN2",
    "PORTFOLIO1",
];

/// One configured credential secret.
#[derive(Clone)]
pub struct CredentialSlot {
    name: String,
    capability: Capability,
    secret: String,
}

impl CredentialSlot {
    /// Create a slot; returns `None` for names that map to no capability.
    #[must_use]
    pub fn new(name: impl Into<String>, secret: impl Into<String>) -> Option<Self> {
        let name = name.into();
        let capability = Capability::from_slot(&name)?;
        Some(Self {
            name,
            capability,
            secret: secret.into(),
        })
    }

    /// Slot name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capability served by the slot.
    #[must_use]
    pub const fn capability(&self) -> Capability {
        self.capability
    }

    /// Build the pool credential; the `PRIMARY` slot is flagged primary.
    #[must_use]
    pub fn to_credential(&self, valid_until: DateTime<Utc>) -> Credential {
        let credential = Credential::new(
            self.name.to_lowercase(),
            self.capability,
            self.secret.clone(),
            valid_until,
        );
        if self.name.eq_ignore_ascii_case("PRIMARY") {
            credential.with_primary()
        } else {
            credential
        }
    }
}

impl std::fmt::Debug for CredentialSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSlot")
            .field("name", &self.name)
            .field("capability", &self.capability)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Market data socket settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Market data WebSocket URL, used as is when `authorize_url` is unset.
    pub ws_url: String,
    /// Endpoint returning a pre-authorized socket URL; `None` connects to
    /// `ws_url` directly.
    pub authorize_url: Option<String>,
    /// Number of parallel connections.
    pub connections: usize,
    /// Mode for instruments subscribed at startup.
    pub mode: FeedMode,
    /// Instruments subscribed at startup.
    pub instruments: Vec<String>,
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Pong timeout before the connection is considered lost.
    pub heartbeat_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Consecutive undecodable frames tolerated (0 = unlimited).
    pub decode_skip_threshold: u32,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            ws_url: "wss://api.upstox.com/v3/feed/market-data-feed".to_string(),
            authorize_url: Some(
                "https://api.upstox.com/v3/feed/market-data-feed/authorize".to_string(),
            ),
            connections: 1,
            mode: FeedMode::Full,
            instruments: Vec::new(),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            reconnect_delay_initial: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 10,
            decode_skip_threshold: 100,
        }
    }
}

/// Credential pool settings.
#[derive(Debug, Clone)]
pub struct CredentialSettings {
    /// Endpoint probed by the health sweep.
    pub probe_url: String,
    /// Probe request timeout.
    pub probe_timeout: Duration,
    /// Interval between health sweeps.
    pub sweep_interval: Duration,
    /// Lease time-to-live for connection credentials.
    pub lease_ttl: Duration,
    /// Validity of hydrated credentials.
    pub credential_ttl: Duration,
    /// Configured secrets.
    pub slots: Vec<CredentialSlot>,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            probe_url: "https://api.upstox.com/v2/user/profile".to_string(),
            probe_timeout: Duration::from_millis(2000),
            sweep_interval: Duration::from_secs(300),
            lease_ttl: Duration::from_secs(300),
            credential_ttl: Duration::from_secs(24 * 3600),
            slots: Vec::new(),
        }
    }
}

impl CredentialSettings {
    /// Build the credentials to hydrate the pool with.
    #[must_use]
    pub fn credentials(&self, now: DateTime<Utc>) -> Vec<Credential> {
        let valid_until = chrono::Duration::from_std(self.credential_ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.slots
            .iter()
            .map(|slot| slot.to_credential(valid_until))
            .collect()
    }
}

/// Broadcast channel settings.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// Capacity of the tick channel.
    pub ticks_capacity: usize,
    /// Capacity of the depth channel.
    pub depth_capacity: usize,
    /// Capacity of the alert channel.
    pub alerts_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            ticks_capacity: 10_000,
            depth_capacity: 5_000,
            alerts_capacity: 1_000,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8082 }
    }
}

/// Complete feed core configuration.
#[derive(Debug, Clone, Default)]
pub struct FeedCoreConfig {
    /// Market data socket settings.
    pub feed: FeedSettings,
    /// Credential pool settings.
    pub credentials: CredentialSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Broadcast channel settings.
    pub broadcast: BroadcastSettings,
}

impl FeedCoreConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if no credential slot is configured or a slot is set
    /// to an empty value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`FeedCoreConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut slots = Vec::new();
        for name in CREDENTIAL_SLOTS {
            let key = format!("CREDENTIAL_{name}");
            let Some(secret) = lookup(&key) else {
                continue;
            };
            if secret.trim().is_empty() {
                return Err(ConfigError::EmptyValue(key));
            }
            if let Some(slot) = CredentialSlot::new(*name, secret.trim()) {
                slots.push(slot);
            }
        }
        if !slots.iter().any(|s| {
            matches!(
                s.capability(),
                Capability::MarketDataWs | Capability::CoreRest
            )
        }) {
            return Err(ConfigError::MissingEnvVar(
                "CREDENTIAL_PRIMARY or CREDENTIAL_WEBSOCKET1".to_string(),
            ));
        }

        let env = Env(&lookup);
        let feed_defaults = FeedSettings::default();
        let feed = FeedSettings {
            ws_url: env.string("FEED_WS_URL", feed_defaults.ws_url),
            authorize_url: match env.get("FEED_AUTHORIZE_URL") {
                Some(url) if url.trim().eq_ignore_ascii_case("none") => None,
                Some(url) => Some(url.trim().to_string()),
                None => feed_defaults.authorize_url,
            },
            connections: env.parse("FEED_CONNECTIONS", feed_defaults.connections).max(1),
            mode: env
                .get("FEED_MODE")
                .and_then(|s| FeedMode::from_str_case_insensitive(&s))
                .unwrap_or(feed_defaults.mode),
            instruments: env
                .get("FEED_INSTRUMENTS")
                .map(|s| parse_list(&s))
                .unwrap_or_default(),
            heartbeat_interval: env.secs(
                "FEED_HEARTBEAT_INTERVAL_SECS",
                feed_defaults.heartbeat_interval,
            ),
            heartbeat_timeout: env.secs(
                "FEED_HEARTBEAT_TIMEOUT_SECS",
                feed_defaults.heartbeat_timeout,
            ),
            reconnect_delay_initial: env.millis(
                "FEED_RECONNECT_DELAY_INITIAL_MS",
                feed_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.secs(
                "FEED_RECONNECT_DELAY_MAX_SECS",
                feed_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "FEED_RECONNECT_DELAY_MULTIPLIER",
                feed_defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: env.parse(
                "FEED_MAX_RECONNECT_ATTEMPTS",
                feed_defaults.max_reconnect_attempts,
            ),
            decode_skip_threshold: env.parse(
                "FEED_DECODE_SKIP_THRESHOLD",
                feed_defaults.decode_skip_threshold,
            ),
        };

        let cred_defaults = CredentialSettings::default();
        let credentials = CredentialSettings {
            probe_url: env.string("CREDENTIAL_PROBE_URL", cred_defaults.probe_url),
            probe_timeout: env.millis("CREDENTIAL_PROBE_TIMEOUT_MS", cred_defaults.probe_timeout),
            sweep_interval: env.secs(
                "CREDENTIAL_SWEEP_INTERVAL_SECS",
                cred_defaults.sweep_interval,
            ),
            lease_ttl: env.secs("CREDENTIAL_LEASE_TTL_SECS", cred_defaults.lease_ttl),
            credential_ttl: env
                .get("CREDENTIAL_TTL_HOURS")
                .and_then(|v| v.parse::<u64>().ok())
                .map_or(cred_defaults.credential_ttl, |h| {
                    Duration::from_secs(h.saturating_mul(3600))
                }),
            slots,
        };

        let server = ServerSettings {
            health_port: env.parse("FEED_HEALTH_PORT", ServerSettings::default().health_port),
        };

        let broadcast_defaults = BroadcastSettings::default();
        let broadcast = BroadcastSettings {
            ticks_capacity: env.parse(
                "FEED_BROADCAST_TICKS_CAPACITY",
                broadcast_defaults.ticks_capacity,
            ),
            depth_capacity: env.parse(
                "FEED_BROADCAST_DEPTH_CAPACITY",
                broadcast_defaults.depth_capacity,
            ),
            alerts_capacity: env.parse(
                "FEED_BROADCAST_ALERTS_CAPACITY",
                broadcast_defaults.alerts_capacity,
            ),
        };

        Ok(Self {
            feed,
            credentials,
            server,
            broadcast,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

/// Typed reads over a variable lookup; absent or invalid values fall back to
/// the default.
struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, key: &str, default: String) -> String {
        self.get(key).unwrap_or(default)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}
