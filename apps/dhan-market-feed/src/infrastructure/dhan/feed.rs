//! Market Feed Client
//!
//! Connects to Dhan's live market feed, keeps the subscription set in sync
//! with the server and delivers decoded packets to the consumer handler.
//!
//! # Stream URL
//!
//! - Production: `wss://api-feed.dhan.co/?version=2&token=<token>&clientId=<id>&authType=2`
//!
//! # Protocol
//!
//! Subscriptions are JSON text frames; market data arrives as binary frames
//! (see [`super::codec`]). There is no subscription acknowledgment.
//!
//! # Session Tasks
//!
//! Each connection runs four cooperating tasks:
//!
//! - **writer**: sole owner of the sink; writes control frames, pings and
//!   the close frame, and commits each control frame to the subscription
//!   registry right after writing it, so the tracked set follows wire order
//! - **reader**: reassembles binary frames, decodes them and forwards events
//! - **heartbeat**: asks the writer to ping and detects silent peers
//! - **dispatch**: hands events to the [`FeedDispatcher`]
//!
//! The subscription registry is the only state shared with callers and is
//! never locked across an await. Pongs are answered by tungstenite itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::codec::{FrameBuffer, JsonCodec};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{DisconnectReason, FeedError, FeedEvent, FeedHandler};
use crate::application::services::FeedDispatcher;
use crate::domain::instrument::Instrument;
use crate::domain::subscription::{SubscriptionRegistry, SubscriptionRequest};
use crate::infrastructure::config::FeedConfig;
use crate::infrastructure::metrics::{self, FeedType};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long `disconnect` waits for the close frame and the reader to finish.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle of the feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Session live.
    Connected,
    /// `disconnect` in progress.
    Closing,
    /// Supervisor waiting to reconnect.
    Reconnecting,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Session Plumbing
// =============================================================================

/// Commands for the writer task.
#[derive(Debug)]
enum Outbound {
    /// JSON control frame; the reply carries the write result.
    Control {
        request: SubscriptionRequest,
        text: String,
        reply: oneshot::Sender<Result<(), FeedError>>,
    },
    /// Write a close frame and stop.
    Close { reply: oneshot::Sender<()> },
}

/// State shared by one session's tasks.
#[derive(Debug)]
struct SessionShared {
    cancel: CancellationToken,
    closing: AtomicBool,
    reason: Mutex<Option<DisconnectReason>>,
    state: Arc<RwLock<ConnectionState>>,
}

impl SessionShared {
    fn new(state: Arc<RwLock<ConnectionState>>) -> Self {
        Self {
            cancel: CancellationToken::new(),
            closing: AtomicBool::new(false),
            reason: Mutex::new(None),
            state,
        }
    }

    /// End the session; the first reason wins. Ignored once the user is
    /// closing the session.
    ///
    /// The client state leaves `Connected` before the session token fires,
    /// so the supervisor never observes a dead session as connected.
    fn end(&self, reason: DisconnectReason) {
        if !self.is_closing() {
            let first = {
                let mut slot = self.reason.lock();
                let first = slot.is_none();
                if first {
                    *slot = Some(reason);
                }
                first
            };

            if first {
                {
                    let mut state = self.state.write();
                    if *state == ConnectionState::Connected {
                        *state = ConnectionState::Disconnected;
                    }
                }
                metrics::set_connected(FeedType::MarketFeed, false);
            }
        }
        self.cancel.cancel();
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

/// Handle to a live session.
struct Session {
    outbound: mpsc::Sender<Outbound>,
    shared: Arc<SessionShared>,
    reader: JoinHandle<()>,
}

// =============================================================================
// Market Feed Client
// =============================================================================

/// Live market feed client.
///
/// Manages:
/// - The connection lifecycle (handshake timeout, keepalive, close)
/// - The subscription registry, restored after every reconnect
/// - Delivery of packets and session events to the [`FeedHandler`]
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use dhan_market_feed::{
///     Credentials, ExchangeSegment, FeedConfig, FeedEvent, Instrument, MarketFeedClient,
/// };
///
/// async fn example() -> Result<(), Box<dyn std::error::Error>> {
///     let config = FeedConfig::new(Credentials::new("1000000001", "token")?);
///     let client = Arc::new(MarketFeedClient::with_handler(config, |event: FeedEvent| {
///         println!("{event:?}");
///     }));
///
///     client.connect().await?;
///     client
///         .subscribe(&[Instrument::ticker(ExchangeSegment::NseEquity, "1333")])
///         .await?;
///     client.disconnect().await?;
///     Ok(())
/// }
/// ```
pub struct MarketFeedClient {
    config: FeedConfig,
    codec: JsonCodec,
    dispatcher: Arc<FeedDispatcher>,
    registry: Arc<Mutex<SubscriptionRegistry>>,
    state: Arc<RwLock<ConnectionState>>,
    session: Mutex<Option<Session>>,
    stop: Mutex<CancellationToken>,
}

impl std::fmt::Debug for MarketFeedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketFeedClient")
            .field("feed_url", &self.config.feed_url)
            .field("state", &self.state())
            .field("subscriptions", &self.registry.lock().len())
            .finish_non_exhaustive()
    }
}

impl MarketFeedClient {
    /// Create a client with no handler; packets are dropped until one is set.
    #[must_use]
    pub fn new(config: FeedConfig) -> Self {
        Self {
            config,
            codec: JsonCodec::new(),
            dispatcher: Arc::new(FeedDispatcher::new()),
            registry: Arc::new(Mutex::new(SubscriptionRegistry::new())),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            session: Mutex::new(None),
            stop: Mutex::new(CancellationToken::new()),
        }
    }

    /// Create a client with a handler.
    #[must_use]
    pub fn with_handler(config: FeedConfig, handler: impl FeedHandler) -> Self {
        let client = Self::new(config);
        client.set_handler(handler);
        client
    }

    /// Register or replace the consumer handler.
    pub fn set_handler(&self, handler: impl FeedHandler) {
        self.dispatcher.set_handler(handler);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether a session is live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Instruments currently tracked as subscribed.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Instrument> {
        self.registry.lock().snapshot()
    }

    /// Feed configuration.
    #[must_use]
    pub const fn config(&self) -> &FeedConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Connect
    // -------------------------------------------------------------------------

    /// Open a session.
    ///
    /// Resolves the authenticated feed URL, completes the WebSocket handshake
    /// within the configured timeout, spawns the session tasks and re-sends
    /// any tracked subscriptions. Calling this while connected is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Timeout`] if the handshake does not finish in
    /// time and [`FeedError::Connection`] if it fails. The state returns to
    /// `Disconnected`; no retry is attempted here (see [`Self::run`]).
    pub async fn connect(&self) -> Result<(), FeedError> {
        {
            let mut state = self.state.write();
            if matches!(
                *state,
                ConnectionState::Connected | ConnectionState::Connecting
            ) {
                return Ok(());
            }
            *state = ConnectionState::Connecting;
        }

        self.dispatcher.reopen();

        let stale = self.session.lock().take();
        if let Some(stale) = stale {
            stale.shared.cancel.cancel();
        }

        tracing::info!(url = %self.config.feed_url, "Connecting to market feed");

        let handshake_timeout = self.config.websocket.handshake_timeout;
        let url = self.config.feed_connect_url();
        let ws = match tokio::time::timeout(handshake_timeout, tokio_tungstenite::connect_async(url.as_str()))
            .await
        {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Disconnected);
                metrics::record_websocket_error(FeedType::MarketFeed, "handshake");
                return Err(FeedError::Connection(e.to_string()));
            }
            Err(_) => {
                self.set_state(ConnectionState::Disconnected);
                metrics::record_websocket_error(FeedType::MarketFeed, "handshake_timeout");
                return Err(FeedError::Timeout(handshake_timeout));
            }
        };

        let session = self.spawn_session(ws);
        let outbound = session.outbound.clone();
        *self.session.lock() = Some(session);

        self.set_state(ConnectionState::Connected);
        metrics::set_connected(FeedType::MarketFeed, true);
        tracing::info!("Market feed connected");

        let restore = self.registry.lock().resubscribe_requests();
        if !restore.is_empty() {
            tracing::info!(frames = restore.len(), "Restoring subscriptions");
        }
        for request in &restore {
            if let Err(e) = self.write_control(&outbound, request).await {
                tracing::warn!(error = %e, "Failed to restore subscriptions");
                break;
            }
        }

        Ok(())
    }

    fn spawn_session(&self, ws: WsStream) -> Session {
        let (sink, stream) = ws.split();
        let shared = Arc::new(SessionShared::new(Arc::clone(&self.state)));

        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.channels.outbound_capacity);
        let (event_tx, event_rx) = mpsc::channel(self.config.channels.event_capacity);
        let (heartbeat_tx, heartbeat_rx) = mpsc::channel(8);
        let heartbeat_state = Arc::new(HeartbeatState::new());

        tokio::spawn(
            HeartbeatManager::new(
                HeartbeatConfig::from_websocket_settings(&self.config.websocket),
                Arc::clone(&heartbeat_state),
                heartbeat_tx,
                shared.cancel.clone(),
            )
            .run(),
        );

        tokio::spawn(
            Writer {
                sink,
                outbound_rx,
                heartbeat_rx,
                heartbeat: Arc::clone(&heartbeat_state),
                registry: Arc::clone(&self.registry),
                shared: Arc::clone(&shared),
            }
            .run(),
        );

        tokio::spawn(dispatch_loop(event_rx, Arc::clone(&self.dispatcher)));

        let reader = tokio::spawn(
            Reader {
                stream,
                event_tx,
                heartbeat: heartbeat_state,
                shared: Arc::clone(&shared),
            }
            .run(),
        );

        Session {
            outbound: outbound_tx,
            shared,
            reader,
        }
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Subscribe to instruments.
    ///
    /// Sends one control frame per batch of at most 100 instruments of the
    /// same subscription type and returns once every frame is written. Each
    /// batch is tracked only after its frame was written.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::NotConnected`] without a live session, or the
    /// write error of the first failed frame.
    pub async fn subscribe(&self, instruments: &[Instrument]) -> Result<(), FeedError> {
        let requests = self.registry.lock().add(instruments);
        self.send_all(&requests).await
    }

    /// Unsubscribe from instruments.
    ///
    /// Frames are sent even for untracked instruments. Each batch is removed
    /// from the tracked set once its write was attempted.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::NotConnected`] without a live session, or the
    /// write error of the first failed frame.
    pub async fn unsubscribe(&self, instruments: &[Instrument]) -> Result<(), FeedError> {
        let requests = self.registry.lock().remove(instruments);
        self.send_all(&requests).await
    }

    /// Write one control request and commit it to the registry.
    ///
    /// Subscribe requests are committed only if the write succeeded;
    /// unsubscribe requests are committed regardless. The writer commits
    /// each request as soon as its frame is written, so concurrent calls are
    /// tracked in the order the server received them.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::NotConnected`] without a live session, or the
    /// write error.
    pub async fn send(&self, request: &SubscriptionRequest) -> Result<(), FeedError> {
        let outbound = self.outbound()?;
        let result = self.write_control(&outbound, request).await;

        // The session died before the writer saw the request.
        if matches!(result, Err(FeedError::ChannelClosed)) && !request.is_subscribe() {
            commit(&self.registry, request);
        }

        result
    }

    async fn send_all(&self, requests: &[SubscriptionRequest]) -> Result<(), FeedError> {
        if requests.is_empty() {
            return Ok(());
        }
        // Fail fast before any frame is queued.
        self.outbound()?;

        for request in requests {
            self.send(request).await?;
        }
        Ok(())
    }

    fn outbound(&self) -> Result<mpsc::Sender<Outbound>, FeedError> {
        if self.state() != ConnectionState::Connected {
            return Err(FeedError::NotConnected);
        }
        self.session
            .lock()
            .as_ref()
            .map(|session| session.outbound.clone())
            .ok_or(FeedError::NotConnected)
    }

    async fn write_control(
        &self,
        outbound: &mpsc::Sender<Outbound>,
        request: &SubscriptionRequest,
    ) -> Result<(), FeedError> {
        let text = self.codec.encode_subscription(request)?;
        let (reply, written) = oneshot::channel();

        outbound
            .send(Outbound::Control {
                request: request.clone(),
                text,
                reply,
            })
            .await
            .map_err(|_| FeedError::ChannelClosed)?;
        written.await.map_err(|_| FeedError::ChannelClosed)??;

        metrics::record_control_frame(request.request_code.code());
        tracing::debug!(
            request_code = request.request_code.code(),
            instruments = request.instrument_count(),
            "Control frame written"
        );
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Disconnect
    // -------------------------------------------------------------------------

    /// Close the session.
    ///
    /// Stops delivery to the handler, unsubscribes the tracked set, writes a
    /// close frame and clears the registry. Safe to call while a read is in
    /// flight and when already disconnected. Also stops [`Self::run`].
    ///
    /// # Errors
    ///
    /// Currently infallible; unsubscribe and close failures are logged.
    pub async fn disconnect(&self) -> Result<(), FeedError> {
        self.stop.lock().cancel();
        self.dispatcher.close();

        let session = self.session.lock().take();
        let Some(session) = session else {
            self.registry.lock().clear();
            metrics::set_subscriptions(0);
            self.set_state(ConnectionState::Disconnected);
            return Ok(());
        };

        session.shared.closing.store(true, Ordering::SeqCst);
        self.set_state(ConnectionState::Closing);
        tracing::info!("Disconnecting from market feed");

        if !session.shared.cancel.is_cancelled() {
            let teardown = self.registry.lock().unsubscribe_all_requests();
            for request in &teardown {
                if let Err(e) = self.write_control(&session.outbound, request).await {
                    tracing::debug!(error = %e, "Unsubscribe during disconnect failed");
                    break;
                }
            }

            let (reply, closed) = oneshot::channel();
            if session
                .outbound
                .send(Outbound::Close { reply })
                .await
                .is_ok()
            {
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, closed).await;
            }
        }

        session.shared.cancel.cancel();
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, session.reader).await;

        self.registry.lock().clear();
        metrics::set_subscriptions(0);
        metrics::set_connected(FeedType::MarketFeed, false);
        self.set_state(ConnectionState::Disconnected);
        tracing::info!("Market feed disconnected");

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Supervisor
    // -------------------------------------------------------------------------

    /// Keep the feed connected until [`Self::disconnect`] is called.
    ///
    /// Connects, waits for the session to end, then reconnects with
    /// exponential backoff. Tracked subscriptions are restored on every
    /// reconnect.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::MaxReconnectAttemptsExceeded`] once the backoff
    /// policy gives up.
    pub async fn run(self: Arc<Self>) -> Result<(), FeedError> {
        let stop = {
            let mut stop = self.stop.lock();
            if stop.is_cancelled() {
                *stop = CancellationToken::new();
            }
            stop.clone()
        };
        let mut policy =
            ReconnectPolicy::new(ReconnectConfig::from_websocket_settings(&self.config.websocket));

        loop {
            if stop.is_cancelled() {
                tracing::info!("Market feed supervisor stopped");
                return Ok(());
            }

            match self.connect().await {
                Ok(()) if stop.is_cancelled() => {
                    // disconnect() raced the handshake
                    self.disconnect().await?;
                    return Ok(());
                }
                Ok(()) => {
                    policy.reset();

                    let session_cancel = self
                        .session
                        .lock()
                        .as_ref()
                        .map(|session| session.shared.cancel.clone());

                    if let Some(session_cancel) = session_cancel {
                        tokio::select! {
                            () = stop.cancelled() => {
                                tracing::info!("Market feed supervisor stopped");
                                return Ok(());
                            }
                            () = session_cancel.cancelled() => {}
                        }
                    }

                    if stop.is_cancelled() {
                        return Ok(());
                    }
                    tracing::warn!("Market feed session ended");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Market feed connection error");
                }
            }

            let Some(delay) = policy.next_delay() else {
                self.set_state(ConnectionState::Disconnected);
                return Err(FeedError::MaxReconnectAttemptsExceeded(
                    policy.attempt_count(),
                ));
            };

            self.set_state(ConnectionState::Reconnecting);
            metrics::record_reconnect(FeedType::MarketFeed);
            tracing::info!(
                attempt = policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Reconnecting to market feed"
            );

            tokio::select! {
                () = stop.cancelled() => {
                    tracing::info!("Market feed supervisor cancelled during reconnect delay");
                    return Ok(());
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "Connection state changed");
        }
    }
}

// =============================================================================
// Writer Task
// =============================================================================

struct Writer {
    sink: SplitSink<WsStream, Message>,
    outbound_rx: mpsc::Receiver<Outbound>,
    heartbeat_rx: mpsc::Receiver<HeartbeatEvent>,
    heartbeat: Arc<HeartbeatState>,
    registry: Arc<Mutex<SubscriptionRegistry>>,
    shared: Arc<SessionShared>,
}

impl Writer {
    async fn run(mut self) {
        let mut heartbeat_open = true;

        loop {
            tokio::select! {
                () = self.shared.cancel.cancelled() => break,
                command = self.outbound_rx.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle(command).await {
                        break;
                    }
                }
                event = self.heartbeat_rx.recv(), if heartbeat_open => {
                    match event {
                        Some(HeartbeatEvent::SendPing) => {
                            self.heartbeat.mark_ping_sent();
                            if let Err(e) = self.sink.send(Message::Ping(Bytes::new())).await {
                                self.fail(&e);
                                break;
                            }
                        }
                        Some(HeartbeatEvent::Timeout) => {
                            self.shared.end(DisconnectReason::HeartbeatTimeout);
                            break;
                        }
                        None => heartbeat_open = false,
                    }
                }
            }
        }

        tracing::debug!("Writer task stopped");
    }

    /// Returns `false` when the writer should stop.
    async fn handle(&mut self, command: Outbound) -> bool {
        match command {
            Outbound::Control {
                request,
                text,
                reply,
            } => {
                let written = self.sink.send(Message::Text(text.into())).await;
                if written.is_ok() || !request.is_subscribe() {
                    commit(&self.registry, &request);
                }

                match written {
                    Ok(()) => {
                        let _ = reply.send(Ok(()));
                        true
                    }
                    Err(e) => {
                        self.fail(&e);
                        let _ = reply.send(Err(e.into()));
                        false
                    }
                }
            }
            Outbound::Close { reply } => {
                if let Err(e) = self.sink.send(Message::Close(None)).await {
                    tracing::debug!(error = %e, "Close frame not written");
                }
                let _ = reply.send(());
                false
            }
        }
    }

    fn fail(&self, error: &tokio_tungstenite::tungstenite::Error) {
        if !self.shared.is_closing() {
            tracing::warn!(error = %error, "Market feed write failed");
            metrics::record_websocket_error(FeedType::MarketFeed, "write");
        }
        self.shared
            .end(DisconnectReason::Transport(error.to_string()));
    }
}

/// Apply a written request to the tracked set.
fn commit(registry: &Mutex<SubscriptionRegistry>, request: &SubscriptionRequest) {
    let tracked = {
        let mut registry = registry.lock();
        registry.apply(request);
        registry.len()
    };
    metrics::set_subscriptions(tracked);
}

// =============================================================================
// Reader Task
// =============================================================================

struct Reader {
    stream: SplitStream<WsStream>,
    event_tx: mpsc::Sender<FeedEvent>,
    heartbeat: Arc<HeartbeatState>,
    shared: Arc<SessionShared>,
}

impl Reader {
    async fn run(mut self) {
        let mut buffer = FrameBuffer::new();

        loop {
            let message = tokio::select! {
                () = self.shared.cancel.cancelled() => break,
                message = self.stream.next() => message,
            };

            match message {
                Some(Ok(Message::Binary(data))) => {
                    self.heartbeat.record_activity();
                    buffer.extend(&data);
                    if !self.drain(&mut buffer).await {
                        break;
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    self.heartbeat.record_activity();
                    tracing::debug!(text = %text.as_str(), "Text frame on market feed");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    self.heartbeat.record_activity();
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame.map_or((None, String::new()), |f| {
                        (Some(u16::from(f.code)), f.reason.as_str().to_string())
                    });
                    tracing::info!(?code, reason = %reason, "Server sent close frame");
                    self.shared
                        .end(DisconnectReason::ClosedByServer { code, reason });
                    break;
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    if !self.shared.is_closing() {
                        metrics::record_websocket_error(FeedType::MarketFeed, "read");
                    }
                    self.shared.end(DisconnectReason::Transport(e.to_string()));
                    break;
                }
                None => {
                    self.shared.end(DisconnectReason::StreamEnded);
                    break;
                }
            }
        }

        self.finish().await;
    }

    /// Decode every complete frame in the buffer.
    ///
    /// Returns `false` when the session ended.
    async fn drain(&self, buffer: &mut FrameBuffer) -> bool {
        while let Some(decoded) = buffer.next_packet() {
            match decoded {
                Ok(packet) if packet.is_disconnect() => {
                    tracing::info!(
                        exchange_segment = packet.header().exchange_segment,
                        "Server disconnect packet received"
                    );
                    self.shared
                        .end(DisconnectReason::ServerDisconnect(*packet.header()));
                    return false;
                }
                Ok(packet) => {
                    metrics::record_packet_received(packet.kind());
                    if !self.forward(FeedEvent::Packet(packet)).await {
                        return false;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping undecodable frame");
                    metrics::record_decode_error();
                    if !self.forward(FeedEvent::Error(e.into())).await {
                        return false;
                    }
                }
            }
        }
        true
    }

    async fn forward(&self, event: FeedEvent) -> bool {
        tokio::select! {
            () = self.shared.cancel.cancelled() => false,
            sent = self.event_tx.send(event) => sent.is_ok(),
        }
    }

    async fn finish(self) {
        self.shared.cancel.cancel();

        if self.shared.is_closing() {
            return;
        }

        let reason = self
            .shared
            .reason
            .lock()
            .take()
            .unwrap_or(DisconnectReason::StreamEnded);

        tracing::warn!(reason = %reason, "Market feed session ended");

        if self
            .event_tx
            .send(FeedEvent::Disconnected(reason))
            .await
            .is_err()
        {
            metrics::record_event_dropped(metrics::DropReason::ChannelFull);
        }
    }
}

// =============================================================================
// Dispatch Task
// =============================================================================

async fn dispatch_loop(mut event_rx: mpsc::Receiver<FeedEvent>, dispatcher: Arc<FeedDispatcher>) {
    while let Some(event) = event_rx.recv().await {
        match event {
            FeedEvent::Packet(packet) => dispatcher.on_packet(packet),
            other => dispatcher.on_event(other),
        };
    }
    tracing::debug!("Dispatch task stopped");
}
