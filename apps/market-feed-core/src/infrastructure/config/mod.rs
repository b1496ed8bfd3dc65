//! Configuration Module
//!
//! Environment-driven configuration for the feed core.

mod settings;

pub use settings::{
    BroadcastSettings, ConfigError, CredentialSettings, CredentialSlot, FeedCoreConfig,
    FeedSettings, ServerSettings,
};
