//! Port Interfaces
//!
//! Contracts between the feed client and its consumer.
//!
//! ## Driver Ports (Inbound)
//!
//! - [`FeedHandler`]: callback invoked for every [`FeedEvent`]. Any
//!   `Fn(FeedEvent) + Send + Sync` closure implements it.
//!
//! ## Events
//!
//! Data packets, terminal disconnects and non-fatal errors all travel
//! through the same handler as [`FeedEvent`] variants; nothing is thrown
//! out of the read loop.

use std::fmt;
use std::time::Duration;

use crate::domain::packet::{DecodeError, Packet, PacketHeader};

// =============================================================================
// Events
// =============================================================================

/// What the consumer handler receives.
#[derive(Debug)]
pub enum FeedEvent {
    /// A decoded data packet.
    Packet(Packet),
    /// The session ended. Delivered once per session.
    Disconnected(DisconnectReason),
    /// A non-fatal error; the session continues.
    Error(FeedError),
}

impl FeedEvent {
    /// The packet, if this is a data event.
    #[must_use]
    pub const fn as_packet(&self) -> Option<&Packet> {
        match self {
            Self::Packet(packet) => Some(packet),
            _ => None,
        }
    }

    /// Whether this event ends the session.
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected(_))
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Server sent a disconnect packet (code 50).
    ServerDisconnect(PacketHeader),
    /// Server sent a WebSocket close frame.
    ClosedByServer {
        /// Close code, if any.
        code: Option<u16>,
        /// Close reason text.
        reason: String,
    },
    /// Stream ended without a close frame.
    StreamEnded,
    /// No pong within the heartbeat timeout.
    HeartbeatTimeout,
    /// Transport read or write failed.
    Transport(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerDisconnect(header) => write!(
                f,
                "server disconnect (segment {}, security {})",
                header.exchange_segment, header.security_id
            ),
            Self::ClosedByServer { code, reason } => match code {
                Some(code) => write!(f, "closed by server ({code}): {reason}"),
                None => write!(f, "closed by server: {reason}"),
            },
            Self::StreamEnded => f.write_str("stream ended"),
            Self::HeartbeatTimeout => f.write_str("heartbeat timeout"),
            Self::Transport(err) => write!(f, "transport error: {err}"),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors surfaced by the feed client.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Handshake or transport-open failure.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Handshake did not complete in time.
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    /// WebSocket protocol or I/O error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Inbound frame could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Control frame could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation requires a live session.
    #[error("not connected")]
    NotConnected,

    /// Session task went away mid-request.
    #[error("session channel closed")]
    ChannelClosed,

    /// Supervisor gave up.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),
}

// =============================================================================
// Handler
// =============================================================================

/// Consumer callback.
///
/// Called from the dispatch task, one event at a time and in arrival order.
/// A slow handler backs up the dispatch channel, not the socket reader.
pub trait FeedHandler: Send + Sync + 'static {
    /// Handle one event.
    fn on_event(&self, event: FeedEvent);
}

impl<F> FeedHandler for F
where
    F: Fn(FeedEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: FeedEvent) {
        self(event);
    }
}
