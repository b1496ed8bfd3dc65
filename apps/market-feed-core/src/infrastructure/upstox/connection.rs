//! Market Data Connection
//!
//! One WebSocket connection to the Upstox V3 market data feed, bound to a
//! leased `MARKET_DATA_WS` credential.
//!
//! # Lifecycle
//!
//! ```text
//! connect() ─► CONNECTING ─► AWAITING_MARKET_INFO ─► AWAITING_SNAPSHOT ─► LIVE
//!                  ▲                                                      │
//!                  └──────── RECONNECTING (backoff) ◄── transport lost ◄──┘
//! disconnect() ─► DISCONNECTED (terminal)
//! ```
//!
//! Each attempt leases a credential, authorizes the socket URL, opens the
//! socket with a bearer header and replays every held subscription. A
//! 401/410 during the handshake marks the credential `UNHEALTHY_AUTH`; any
//! other handshake failure marks it `UNKNOWN`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::heartbeat::{HeartbeatConfig, HeartbeatSignal, Liveness, spawn_monitor};
use super::reconnect::{Backoff, BackoffConfig};
use super::request::FeedRequest;
use super::router::FrameRouter;
use crate::application::ports::{FeedError, FeedListener, MarketFeed};
use crate::application::services::{CredentialPool, FeedStatus};
use crate::domain::credential::{Capability, Credential};
use crate::domain::market::{CanonicalDepth, CanonicalTick, InstrumentKey};
use crate::domain::subscription::{FeedMode, SubscriptionError, SubscriptionLimiter};
use crate::domain::sync::ConnectionState;
use crate::infrastructure::config::FeedSettings;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CAPABILITY: Capability = Capability::MarketDataWs;
const AUTHORIZE_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Connection
// =============================================================================

/// Upstox V3 market data connection implementing [`MarketFeed`].
pub struct UpstoxFeed {
    shared: Arc<Shared>,
    commands: Mutex<Option<mpsc::UnboundedSender<FeedRequest>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    name: String,
    settings: FeedSettings,
    pool: Arc<CredentialPool>,
    status: Arc<FeedStatus>,
    http: reqwest::Client,
    listener: RwLock<Arc<dyn FeedListener>>,
    subscriptions: RwLock<HashMap<InstrumentKey, FeedMode>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for UpstoxFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstoxFeed")
            .field("name", &self.shared.name)
            .field("state", &self.shared.status.state())
            .field("subscriptions", &self.shared.subscriptions.read().len())
            .finish_non_exhaustive()
    }
}

impl UpstoxFeed {
    /// Create a connection named after `status`.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Transport`] if the HTTP client for socket
    /// authorization cannot be built.
    pub fn new(
        settings: FeedSettings,
        pool: Arc<CredentialPool>,
        status: Arc<FeedStatus>,
    ) -> Result<Self, FeedError> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(AUTHORIZE_TIMEOUT)
            .build()
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        Ok(Self {
            shared: Arc::new(Shared {
                name: status.name().to_string(),
                settings,
                pool,
                status,
                http,
                listener: RwLock::new(Arc::new(NoListener)),
                subscriptions: RwLock::new(HashMap::new()),
                cancel: CancellationToken::new(),
            }),
            commands: Mutex::new(None),
            task: Mutex::new(None),
        })
    }

    /// Connection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Hand a request to the read loop.
    ///
    /// Returns whether a running loop took it. Held subscriptions are
    /// replayed on the next connect either way.
    fn send(&self, request: FeedRequest) -> bool {
        let mut commands = self.commands.lock();
        let Some(tx) = commands.as_ref() else {
            tracing::debug!(connection = %self.shared.name, "No read loop, request held for replay");
            return false;
        };
        if tx.send(request).is_ok() {
            return true;
        }
        // Loop has exited; later requests skip the dead channel.
        commands.take();
        tracing::debug!(
            connection = %self.shared.name,
            state = %self.shared.status.state(),
            "Read loop stopped, request held for replay"
        );
        false
    }

    /// Whether a read loop is accepting requests.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.commands.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

#[async_trait]
impl MarketFeed for UpstoxFeed {
    async fn connect(&self) -> Result<(), FeedError> {
        if self.shared.cancel.is_cancelled() {
            return Err(FeedError::ShutDown);
        }

        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.commands.lock() = Some(tx);
        *task = Some(tokio::spawn(run(Arc::clone(&self.shared), rx)));
        tracing::info!(connection = %self.shared.name, "Feed connection started");
        Ok(())
    }

    async fn disconnect(&self) {
        self.shared.cancel.cancel();
        self.commands.lock().take();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::warn!(connection = %self.shared.name, error = %err, "Feed task ended abnormally");
            }
        }
        self.shared.pool.release_lease(&self.shared.name);
        self.shared.status.set_credential(None);
        self.shared.status.set_state(ConnectionState::Disconnected);
        tracing::info!(connection = %self.shared.name, "Feed connection shut down");
    }

    async fn subscribe(&self, keys: &[InstrumentKey], mode: FeedMode) -> Result<(), FeedError> {
        if self.shared.cancel.is_cancelled() {
            return Err(FeedError::ShutDown);
        }
        if keys.is_empty() {
            return Err(SubscriptionError::EmptyRequest.into());
        }

        let mut seen = HashSet::with_capacity(keys.len());
        let unique: Vec<&InstrumentKey> = keys.iter().filter(|key| seen.insert(*key)).collect();

        let (added, changed) = {
            let mut held = self.shared.subscriptions.write();
            let in_mode = held
                .iter()
                .filter(|(key, m)| **m == mode && !seen.contains(key))
                .count();
            SubscriptionLimiter::validate(in_mode + unique.len(), mode)?;

            let mut added = Vec::new();
            let mut changed = Vec::new();
            for key in unique {
                match held.insert(key.clone(), mode) {
                    None => added.push(key.clone()),
                    Some(previous) if previous != mode => changed.push(key.clone()),
                    Some(_) => {}
                }
            }
            self.shared.status.set_subscription_count(held.len());
            (added, changed)
        };

        tracing::debug!(
            connection = %self.shared.name,
            %mode,
            added = added.len(),
            changed = changed.len(),
            "Subscription updated"
        );
        if !added.is_empty() {
            self.send(FeedRequest::subscribe(added, mode));
        }
        if !changed.is_empty() {
            self.send(FeedRequest::change_mode(changed, mode));
        }
        Ok(())
    }

    async fn unsubscribe(&self, keys: &[InstrumentKey]) -> Result<(), FeedError> {
        if self.shared.cancel.is_cancelled() {
            return Err(FeedError::ShutDown);
        }

        let removed: Vec<InstrumentKey> = {
            let mut held = self.shared.subscriptions.write();
            let removed = keys
                .iter()
                .filter(|key| held.remove(*key).is_some())
                .cloned()
                .collect();
            self.shared.status.set_subscription_count(held.len());
            removed
        };
        if !removed.is_empty() {
            self.send(FeedRequest::unsubscribe(removed));
        }
        Ok(())
    }

    fn set_listener(&self, listener: Arc<dyn FeedListener>) {
        *self.shared.listener.write() = listener;
    }

    fn subscriptions(&self) -> HashMap<InstrumentKey, FeedMode> {
        self.shared.subscriptions.read().clone()
    }

    fn state(&self) -> ConnectionState {
        self.shared.status.state()
    }

    fn source_name(&self) -> &'static str {
        "upstox"
    }
}

// =============================================================================
// Read Loop
// =============================================================================

/// How far one attempt got.
#[derive(Debug, Default, Clone, Copy)]
struct Progress {
    opened: bool,
    live: bool,
}

async fn run(shared: Arc<Shared>, mut commands: mpsc::UnboundedReceiver<FeedRequest>) {
    let mut backoff = Backoff::new(BackoffConfig::from_feed_settings(&shared.settings));
    let mut router = FrameRouter::new(
        Arc::clone(&shared.status),
        shared.settings.decode_skip_threshold,
    );

    loop {
        let mut progress = Progress::default();
        let result = shared
            .session(&mut router, &mut commands, &mut progress)
            .await;
        if progress.live {
            backoff.reset();
        }

        let err = match result {
            Ok(()) => break,
            Err(_) if shared.cancel.is_cancelled() => break,
            Err(err) => err,
        };

        let listener = shared.listener();
        shared.status.set_error(err.to_string());
        if progress.opened {
            listener.on_disconnected(&shared.name);
        }
        listener.on_error(&shared.name, &err);

        let Some(delay) = backoff.next_delay() else {
            let exhausted = FeedError::ReconnectExhausted(backoff.max_attempts());
            tracing::error!(
                connection = %shared.name,
                last_error = %err,
                "Giving up on feed connection"
            );
            shared.status.set_error(exhausted.to_string());
            listener.on_error(&shared.name, &exhausted);
            break;
        };

        shared.status.set_state(ConnectionState::Reconnecting);
        shared.status.increment_reconnect_attempts();
        tracing::warn!(
            connection = %shared.name,
            attempt = backoff.attempt(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "Feed connection lost, reconnecting"
        );

        tokio::select! {
            () = shared.cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    shared.pool.release_lease(&shared.name);
    shared.status.set_credential(None);
    shared.status.set_state(ConnectionState::Disconnected);
}

impl Shared {
    fn listener(&self) -> Arc<dyn FeedListener> {
        Arc::clone(&self.listener.read())
    }

    /// One connection attempt, from credential lease to transport loss.
    ///
    /// Returns `Ok(())` only when cancelled.
    async fn session(
        &self,
        router: &mut FrameRouter,
        commands: &mut mpsc::UnboundedReceiver<FeedRequest>,
        progress: &mut Progress,
    ) -> Result<(), FeedError> {
        self.status.set_state(ConnectionState::Connecting);
        let credential = self.acquire_credential()?;
        self.status.set_credential(Some(credential.id().to_string()));

        let socket = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            opened = self.open(&credential) => match opened {
                Ok(socket) => socket,
                Err(err) => {
                    self.classify_handshake_failure(&credential, &err);
                    return Err(err);
                }
            },
        };
        progress.opened = true;
        self.pool.mark_healthy(&credential);
        router.reset();
        tracing::info!(
            connection = %self.name,
            credential = credential.id(),
            "Feed socket open, awaiting market info"
        );

        let (mut write, mut read) = socket.split();

        // Held subscriptions are authoritative; queued requests are stale.
        while commands.try_recv().is_ok() {}
        for request in self.resubscribe_requests() {
            send_request(&mut write, &request).await?;
        }

        let liveness = Arc::new(Liveness::new());
        let heartbeat_cancel = self.cancel.child_token();
        let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
        let mut heartbeat = spawn_monitor(
            HeartbeatConfig::from_feed_settings(&self.settings),
            Arc::clone(&liveness),
            heartbeat_cancel,
        );

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                signal = heartbeat.recv() => match signal {
                    Some(HeartbeatSignal::Ping) => {
                        liveness.ping_sent();
                        write.send(Message::Ping(Vec::new().into())).await.map_err(transport)?;
                        self.renew_lease();
                    }
                    Some(HeartbeatSignal::Expired) | None => return Err(FeedError::ConnectionClosed),
                },
                request = commands.recv() => {
                    if let Some(request) = request {
                        send_request(&mut write, &request).await?;
                    }
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Binary(data))) => {
                        liveness.touch();
                        let listener = self.listener();
                        router.route(&data, listener.as_ref())?;
                        if !progress.live && router.phase() == ConnectionState::Live {
                            progress.live = true;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        liveness.touch();
                        write.send(Message::Pong(data)).await.map_err(transport)?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(connection = %self.name, ?frame, "Server closed feed socket");
                        return Err(FeedError::ConnectionClosed);
                    }
                    Some(Ok(Message::Text(text))) => {
                        liveness.touch();
                        tracing::debug!(connection = %self.name, bytes = text.len(), "Text frame ignored");
                    }
                    Some(Ok(_)) => liveness.touch(),
                    Some(Err(err)) => return Err(transport(err)),
                    None => return Err(FeedError::ConnectionClosed),
                },
            }
        }
    }

    /// Lease a credential, falling back to any healthy one (or the primary)
    /// when every credential is leased elsewhere.
    fn acquire_credential(&self) -> Result<Arc<Credential>, FeedError> {
        match self.pool.acquire_lease(CAPABILITY, &self.name) {
            Ok(credential) => Ok(credential),
            Err(lease_err) => {
                let credential = self.pool.select_with_fallback(CAPABILITY)?;
                tracing::warn!(
                    connection = %self.name,
                    credential = credential.id(),
                    reason = %lease_err,
                    "Connecting with an unleased credential"
                );
                Ok(credential)
            }
        }
    }

    fn renew_lease(&self) {
        if let Err(err) = self.pool.renew_lease(&self.name) {
            tracing::debug!(connection = %self.name, error = %err, "Lease not renewed");
        }
    }

    async fn open(&self, credential: &Credential) -> Result<Socket, FeedError> {
        let url = match &self.settings.authorize_url {
            Some(authorize_url) => self.authorize(authorize_url, credential).await?,
            None => self.settings.ws_url.clone(),
        };

        let mut request = url.as_str().into_client_request().map_err(transport)?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", credential.secret()))
            .map_err(|e| FeedError::Transport(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        match tokio_tungstenite::connect_async(request).await {
            Ok((socket, _response)) => Ok(socket),
            Err(WsError::Http(response)) => {
                Err(handshake_status(credential, response.status().as_u16()))
            }
            Err(err) => Err(transport(err)),
        }
    }

    /// Resolve the pre-authorized socket URL.
    async fn authorize(&self, url: &str, credential: &Credential) -> Result<String, FeedError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(credential.secret())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_redirection() {
            return response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string)
                .ok_or_else(|| FeedError::Transport("authorize redirect without location".into()));
        }
        if !status.is_success() {
            return Err(handshake_status(credential, status.as_u16()));
        }

        let body: AuthorizeResponse = response
            .json()
            .await
            .map_err(|e| FeedError::Transport(format!("authorize response: {e}")))?;
        Ok(body.data.authorized_redirect_uri)
    }

    fn classify_handshake_failure(&self, credential: &Credential, err: &FeedError) {
        match err {
            FeedError::AuthRejected { .. } => {
                self.pool.mark_unhealthy_auth(credential);
                self.pool.release_lease(&self.name);
                if self.pool.is_definitive_auth_failure(CAPABILITY) {
                    tracing::error!(
                        connection = %self.name,
                        capability = %CAPABILITY,
                        "Every market data credential is rejected"
                    );
                }
            }
            FeedError::Transport(_) => self.pool.mark_unknown(credential),
            _ => {}
        }
    }

    /// One request per mode covering every held subscription.
    fn resubscribe_requests(&self) -> Vec<FeedRequest> {
        let mut by_mode: HashMap<FeedMode, Vec<InstrumentKey>> = HashMap::new();
        for (key, mode) in self.subscriptions.read().iter() {
            by_mode.entry(*mode).or_default().push(key.clone());
        }
        FeedMode::all()
            .iter()
            .filter_map(|mode| {
                let mut keys = by_mode.remove(mode)?;
                keys.sort();
                Some(FeedRequest::subscribe(keys, *mode))
            })
            .collect()
    }
}

async fn send_request<W>(write: &mut W, request: &FeedRequest) -> Result<(), FeedError>
where
    W: futures_util::Sink<Message, Error = WsError> + Unpin,
{
    let payload = request
        .encode()
        .map_err(|e| FeedError::Transport(format!("failed to encode request: {e}")))?;
    tracing::debug!(method = ?request.method(), count = request.keys().len(), "Sending feed request");
    write
        .send(Message::Binary(payload.into()))
        .await
        .map_err(transport)
}

fn handshake_status(credential: &Credential, status: u16) -> FeedError {
    match status {
        401 | 410 => FeedError::AuthRejected {
            credential: credential.id().to_string(),
            status,
        },
        other => FeedError::Transport(format!("handshake rejected with status {other}")),
    }
}

fn transport(err: WsError) -> FeedError {
    FeedError::Transport(err.to_string())
}

#[derive(Debug, Deserialize)]
struct AuthorizeResponse {
    data: AuthorizeData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeData {
    authorized_redirect_uri: String,
}

/// Listener used until one is registered.
struct NoListener;

impl FeedListener for NoListener {
    fn on_tick(&self, _tick: CanonicalTick) {}

    fn on_depth(&self, _depth: CanonicalDepth) {}
}
