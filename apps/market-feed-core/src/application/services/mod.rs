//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - [`CredentialPool`]: credential selection, classification and leases
//! - [`MarketCache`]: latest tick and book per instrument
//! - [`AlertEngine`]: rule evaluation against ticks
//! - [`MarketPipeline`]: fan-out from feed connections
//! - [`SubscriptionService`]: reference-counted client subscriptions
//! - [`ServiceHealth`]: connection status shared with the health server

mod alert_engine;
mod credential_pool;
mod market_cache;
mod pipeline;
mod service_health;
mod subscription_service;

pub use alert_engine::AlertEngine;
pub use credential_pool::{CredentialCounts, CredentialPool, SweepReport};
pub use market_cache::MarketCache;
pub use pipeline::MarketPipeline;
pub use service_health::{FeedStatus, FeedStatusSnapshot, ServiceHealth};
pub use subscription_service::SubscriptionService;
