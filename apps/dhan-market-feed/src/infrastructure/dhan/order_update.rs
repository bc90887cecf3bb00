//! Order Update Client
//!
//! Streams order alerts for the authenticated account.
//!
//! # Stream URL
//!
//! - Production: `wss://api-order-update.dhan.co`
//!
//! # Protocol
//!
//! 1. Connect
//! 2. Send the login frame (`LoginReq`, `MsgCode` 42) immediately
//! 3. Receive JSON order alerts (`{"Type": "order_alert", "Data": {...}}`)
//!
//! The server does not acknowledge the login; an invalid token shows up as
//! the server closing the socket.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, JsonCodec};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::messages::{OrderUpdateLogin, OrderUpdateMessage};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::infrastructure::config::{Credentials, DEFAULT_ORDER_UPDATE_URL, FeedConfig};
use crate::infrastructure::metrics::{self, FeedType};

// =============================================================================
// Errors
// =============================================================================

/// Order update client errors.
#[derive(Debug, thiserror::Error)]
pub enum OrderUpdateError {
    /// WebSocket connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Handshake did not complete in time.
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Login frame could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Connection closed by the server or the peer went silent.
    #[error("connection closed")]
    ConnectionClosed,

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,
}

// =============================================================================
// Events
// =============================================================================

/// Events emitted by the order update client.
#[derive(Debug, Clone)]
pub enum OrderUpdateEvent {
    /// Connected and login sent.
    Connected,
    /// Connection lost.
    Disconnected,
    /// Reconnecting after a disconnect.
    Reconnecting {
        /// Current attempt number.
        attempt: u32,
    },
    /// Order alert received.
    OrderUpdate(Box<OrderUpdateMessage>),
    /// A message could not be decoded; the stream continues.
    Error(String),
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the order update client.
#[derive(Debug, Clone)]
pub struct OrderUpdateConfig {
    /// WebSocket URL.
    pub url: String,
    /// Account credentials.
    pub credentials: Credentials,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
    /// Bound on the WebSocket handshake.
    pub handshake_timeout: Duration,
}

impl OrderUpdateConfig {
    /// Create a configuration with default timings.
    #[must_use]
    pub fn new(url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            url: url.into(),
            credentials,
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            handshake_timeout: Duration::from_secs(10),
        }
    }

    /// Production endpoint.
    #[must_use]
    pub fn production(credentials: Credentials) -> Self {
        Self::new(DEFAULT_ORDER_UPDATE_URL, credentials)
    }
}

impl From<&FeedConfig> for OrderUpdateConfig {
    fn from(config: &FeedConfig) -> Self {
        Self {
            url: config.order_update_url.clone(),
            credentials: config.credentials.clone(),
            reconnect: ReconnectConfig::from_websocket_settings(&config.websocket),
            heartbeat: HeartbeatConfig::from_websocket_settings(&config.websocket),
            handshake_timeout: config.websocket.handshake_timeout,
        }
    }
}

// =============================================================================
// Order Update Client
// =============================================================================

/// Order update WebSocket client.
///
/// Manages:
/// - Login on every (re)connect
/// - Heartbeat monitoring
/// - Automatic reconnection with exponential backoff
pub struct OrderUpdateClient {
    config: OrderUpdateConfig,
    codec: JsonCodec,
    event_tx: mpsc::Sender<OrderUpdateEvent>,
    cancel: CancellationToken,
}

impl OrderUpdateClient {
    /// Create a new order update client.
    #[must_use]
    pub const fn new(
        config: OrderUpdateConfig,
        event_tx: mpsc::Sender<OrderUpdateEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            codec: JsonCodec::new(),
            event_tx,
            cancel,
        }
    }

    /// Run the connection loop until cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`OrderUpdateError::MaxReconnectAttemptsExceeded`] once the
    /// backoff policy gives up.
    pub async fn run(self: Arc<Self>) -> Result<(), OrderUpdateError> {
        let mut reconnect_policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Order update client cancelled");
                return Ok(());
            }

            match self.connect_and_run(&mut reconnect_policy).await {
                Ok(()) => {
                    tracing::info!("Order update connection closed gracefully");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Order update connection error");
                    metrics::set_connected(FeedType::OrderUpdate, false);
                    let _ = self.event_tx.send(OrderUpdateEvent::Disconnected).await;

                    let Some(delay) = reconnect_policy.next_delay() else {
                        return Err(OrderUpdateError::MaxReconnectAttemptsExceeded);
                    };

                    let attempt = reconnect_policy.attempt_count();
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Reconnecting to order update stream"
                    );
                    metrics::record_reconnect(FeedType::OrderUpdate);
                    let _ = self
                        .event_tx
                        .send(OrderUpdateEvent::Reconnecting { attempt })
                        .await;

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("Order update client cancelled during reconnect delay");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Connect, log in and stream until error or cancellation.
    async fn connect_and_run(
        &self,
        reconnect_policy: &mut ReconnectPolicy,
    ) -> Result<(), OrderUpdateError> {
        tracing::info!(url = %self.config.url, "Connecting to order update stream");

        let handshake = tokio_tungstenite::connect_async(self.config.url.as_str());
        let (ws_stream, _response) =
            match tokio::time::timeout(self.config.handshake_timeout, handshake).await {
                Ok(Ok(connected)) => connected,
                Ok(Err(e)) => {
                    metrics::record_websocket_error(FeedType::OrderUpdate, "handshake");
                    return Err(OrderUpdateError::ConnectionFailed(e.to_string()));
                }
                Err(_) => {
                    metrics::record_websocket_error(FeedType::OrderUpdate, "handshake_timeout");
                    return Err(OrderUpdateError::Timeout(self.config.handshake_timeout));
                }
            };
        let (mut write, mut read) = ws_stream.split();

        let login = OrderUpdateLogin::new(
            self.config.credentials.client_id(),
            self.config.credentials.access_token(),
        );
        let json = self.codec.encode(&login)?;
        write.send(Message::Text(json.into())).await.map_err(|e| {
            OrderUpdateError::ConnectionFailed(format!("failed to send login: {e}"))
        })?;

        reconnect_policy.reset();
        metrics::set_connected(FeedType::OrderUpdate, true);
        tracing::info!("Order update stream connected");
        let _ = self.event_tx.send(OrderUpdateEvent::Connected).await;

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(8);
        let heartbeat_cancel = self.cancel.child_token();
        tokio::spawn(
            HeartbeatManager::new(
                self.config.heartbeat.clone(),
                Arc::clone(&heartbeat_state),
                heartbeat_tx,
                heartbeat_cancel.clone(),
            )
            .run(),
        );
        let _heartbeat_guard = heartbeat_cancel.drop_guard();
        let mut heartbeat_open = true;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                heartbeat_event = heartbeat_rx.recv(), if heartbeat_open => {
                    match heartbeat_event {
                        Some(HeartbeatEvent::SendPing) => {
                            heartbeat_state.mark_ping_sent();
                            write.send(Message::Ping(Vec::new().into())).await?;
                        }
                        Some(HeartbeatEvent::Timeout) => {
                            tracing::warn!("Order update heartbeat timeout");
                            return Err(OrderUpdateError::ConnectionClosed);
                        }
                        None => heartbeat_open = false,
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            heartbeat_state.record_activity();
                            self.handle_text(text.as_str()).await;
                        }
                        Some(Ok(Message::Binary(data))) => {
                            heartbeat_state.record_activity();
                            match std::str::from_utf8(&data) {
                                Ok(text) => self.handle_text(text).await,
                                Err(_) => {
                                    tracing::warn!(len = data.len(), "Received non-UTF8 binary message");
                                }
                            }
                        }
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                            heartbeat_state.record_activity();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(frame = ?frame, "Order update server sent close frame");
                            return Err(OrderUpdateError::ConnectionClosed);
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => {
                            metrics::record_websocket_error(FeedType::OrderUpdate, "read");
                            return Err(e.into());
                        }
                        None => {
                            tracing::info!("Order update stream ended");
                            return Err(OrderUpdateError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    async fn handle_text(&self, text: &str) {
        match self.codec.decode_order_update(text) {
            Ok(update) => {
                tracing::debug!(
                    message_type = %update.message_type,
                    order_no = ?update.data.order_no,
                    status = ?update.data.status,
                    "Order update received"
                );
                metrics::record_order_update();
                let _ = self
                    .event_tx
                    .send(OrderUpdateEvent::OrderUpdate(Box::new(update)))
                    .await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Undecodable order update message");
                let _ = self.event_tx.send(OrderUpdateEvent::Error(e.to_string())).await;
            }
        }
    }
}
