//! Market Feed Core Binary
//!
//! Starts the market data ingestion core.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-feed-core
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `CREDENTIAL_PRIMARY` or `CREDENTIAL_WEBSOCKET1`: access token
//!
//! ## Optional
//! - `CREDENTIAL_WEBSOCKET2..3`, `CREDENTIAL_OPTIONCHAIN1..2`,
//!   `CREDENTIAL_PORTFOLIO1`: additional tokens
//! - `FEED_CONNECTIONS`: parallel sockets (default: 1)
//! - `FEED_MODE`: ltpc | full | full_d30 | option_greeks (default: full)
//! - `FEED_INSTRUMENTS`: comma separated instrument keys
//! - `FEED_HEALTH_PORT`: health and metrics HTTP port (default: 8082)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: log filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use market_feed_core::application::ports::MarketFeed;
use market_feed_core::infrastructure::telemetry;
use market_feed_core::{
    AlertEngine, BroadcastConfig, BroadcastHub, BroadcastNotifier, CredentialPool, FeedCoreConfig,
    HealthServer, HealthServerState, HttpHealthProbe, InstrumentKey, MarketCache, MarketPipeline,
    ServiceHealth, UpstoxFeed, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "rustls crypto provider already installed")?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Market Feed Core");

    init_metrics()?;

    let config = FeedCoreConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Credentials
    let pool = Arc::new(CredentialPool::new(config.credentials.lease_ttl));
    pool.hydrate(config.credentials.credentials(Utc::now()))?;
    let probe = HttpHealthProbe::from_settings(&config.credentials)?;
    spawn_sweeper(
        Arc::clone(&pool),
        probe,
        config.credentials.sweep_interval,
        shutdown_token.child_token(),
    );

    // Ingestion pipeline
    let broadcast_hub = Arc::new(BroadcastHub::new(BroadcastConfig::from(&config.broadcast)));
    let cache = Arc::new(MarketCache::new());
    let alerts = Arc::new(AlertEngine::new(Arc::new(BroadcastNotifier::new(
        Arc::clone(&broadcast_hub),
    ))));
    let pipeline = Arc::new(
        MarketPipeline::new(Arc::clone(&cache), Arc::clone(&alerts))
            .with_downstream(Arc::clone(&broadcast_hub) as _),
    );

    // Connections
    let health = Arc::new(ServiceHealth::new());
    let mut feeds: Vec<Arc<UpstoxFeed>> = Vec::with_capacity(config.feed.connections);
    for index in 0..config.feed.connections {
        let status = health.register_feed(format!("conn-{index}"));
        let feed = Arc::new(UpstoxFeed::new(
            config.feed.clone(),
            Arc::clone(&pool),
            status,
        )?);
        feed.set_listener(Arc::clone(&pipeline) as _);
        feeds.push(feed);
    }

    for (feed, keys) in feeds
        .iter()
        .zip(partition(&config.feed.instruments, feeds.len()))
    {
        if keys.is_empty() {
            continue;
        }
        if let Err(e) = feed.subscribe(&keys, config.feed.mode).await {
            tracing::error!(connection = feed.name(), error = %e, "Startup subscription rejected");
        }
    }

    for feed in &feeds {
        feed.connect().await?;
    }

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&health),
        Arc::clone(&pool),
        Arc::clone(&cache),
        Arc::clone(&broadcast_hub),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!(connections = feeds.len(), "Market feed core ready");

    await_shutdown(shutdown_token).await;

    let disconnect_all = futures_util::future::join_all(feeds.iter().map(|f| f.disconnect()));
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, disconnect_all)
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Connections did not close in time"
        );
    }

    tracing::info!("Market feed core stopped");
    Ok(())
}

/// Spread `keys` over `buckets` connections round robin.
fn partition(keys: &[InstrumentKey], buckets: usize) -> Vec<Vec<InstrumentKey>> {
    let mut out = vec![Vec::new(); buckets.max(1)];
    let len = out.len();
    for (i, key) in keys.iter().enumerate() {
        out[i % len].push(key.clone());
    }
    out
}

/// Re-probe every credential on a fixed interval.
fn spawn_sweeper(
    pool: Arc<CredentialPool>,
    probe: HttpHealthProbe,
    every: Duration,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; credentials start healthy.
        interval.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let report = pool.sweep(&probe).await;
                    tracing::info!(
                        probed = report.probed,
                        healthy = report.healthy,
                        unhealthy_auth = report.unhealthy_auth,
                        unknown = report.unknown,
                        "Credential sweep finished"
                    );
                }
            }
        }
    });
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &FeedCoreConfig) {
    tracing::info!(
        connections = config.feed.connections,
        mode = %config.feed.mode,
        instruments = config.feed.instruments.len(),
        credentials = config.credentials.slots.len(),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        ws_url = %config.feed.ws_url,
        authorize_url = config.feed.authorize_url.as_deref().unwrap_or("none"),
        probe_url = %config.credentials.probe_url,
        "Endpoints"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
