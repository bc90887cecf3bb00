//! Feed Codec Module
//!
//! Encoding and decoding for the Dhan WebSocket streams.
//!
//! - **Market feed (server → client)**: fixed-layout little-endian binary
//!   frames, decoded by [`decode`] and reassembled by [`FrameBuffer`]
//! - **Market feed (client → server)**: JSON control frames via [`JsonCodec`]
//! - **Order updates**: JSON in both directions via [`JsonCodec`]
//!
//! # Binary Frame Layout
//!
//! ```text
//! offset  width  field
//! 0       1      feed_response_code
//! 1       2      message_length
//! 3       1      exchange_segment
//! 4       4      security_id
//! 8..     n      payload (shape selected by feed_response_code)
//! ```
//!
//! Every field is fixed-width at a fixed offset, so decoding never backtracks.

use bytes::{Buf, BytesMut};

use super::messages::{OrderUpdateMessage, SubscriptionMessage};
use crate::domain::packet::{
    DecodeError, FeedResponseCode, FullPacket, OpenInterestPacket, Packet, PacketHeader,
    PreviousClosePacket, QuotePacket, TickerPacket,
};
use crate::domain::subscription::SubscriptionRequest;

// =============================================================================
// Frame Sizes
// =============================================================================

/// Header size shared by every frame.
pub const HEADER_SIZE: usize = 8;

/// Index and ticker frames: ltp (f32) + ltt (u32).
pub const TICKER_FRAME_SIZE: usize = HEADER_SIZE + 8;

/// Quote frames.
pub const QUOTE_FRAME_SIZE: usize = HEADER_SIZE + 42;

/// Open interest frames: oi (u32).
pub const OPEN_INTEREST_FRAME_SIZE: usize = HEADER_SIZE + 4;

/// Previous close frames: close (f32) + oi (u32).
pub const PREVIOUS_CLOSE_FRAME_SIZE: usize = HEADER_SIZE + 8;

/// Market status frames carry no payload.
pub const MARKET_STATUS_FRAME_SIZE: usize = HEADER_SIZE;

/// Full frames: quote payload plus three open interest fields.
pub const FULL_FRAME_SIZE: usize = QUOTE_FRAME_SIZE + 12;

/// Disconnect frames carry no payload.
pub const DISCONNECT_FRAME_SIZE: usize = HEADER_SIZE;

// =============================================================================
// Errors
// =============================================================================

/// JSON codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

// =============================================================================
// Binary Decoding
// =============================================================================

/// Decode the 8-byte header at the start of `bytes`.
///
/// # Errors
///
/// Returns [`DecodeError::Incomplete`] if fewer than 8 bytes are available.
pub fn decode_header(bytes: &[u8]) -> Result<PacketHeader, DecodeError> {
    if bytes.len() < HEADER_SIZE {
        return Err(DecodeError::Incomplete {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let mut cur = &bytes[..HEADER_SIZE];
    Ok(PacketHeader {
        feed_response_code: cur.get_u8(),
        message_length: cur.get_u16_le(),
        exchange_segment: cur.get_u8(),
        security_id: cur.get_u32_le(),
    })
}

/// Encode a header into its 8-byte wire form.
#[must_use]
pub fn encode_header(header: &PacketHeader) -> [u8; HEADER_SIZE] {
    let mut out = [0u8; HEADER_SIZE];
    out[0] = header.feed_response_code;
    out[1..3].copy_from_slice(&header.message_length.to_le_bytes());
    out[3] = header.exchange_segment;
    out[4..8].copy_from_slice(&header.security_id.to_le_bytes());
    out
}

/// Total frame size (header included) implied by a header.
///
/// Known codes have fixed sizes. Unknown codes fall back to the announced
/// `message_length` so the stream can skip them.
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] for an unknown code whose announced
/// length is shorter than a header.
pub fn frame_len(header: &PacketHeader) -> Result<usize, DecodeError> {
    let len = match header.response_code() {
        Some(FeedResponseCode::Index | FeedResponseCode::Ticker) => TICKER_FRAME_SIZE,
        Some(FeedResponseCode::Quote) => QUOTE_FRAME_SIZE,
        Some(FeedResponseCode::OpenInterest) => OPEN_INTEREST_FRAME_SIZE,
        Some(FeedResponseCode::PreviousClose) => PREVIOUS_CLOSE_FRAME_SIZE,
        Some(FeedResponseCode::MarketStatus) => MARKET_STATUS_FRAME_SIZE,
        Some(FeedResponseCode::Full) => FULL_FRAME_SIZE,
        Some(FeedResponseCode::Disconnect) => DISCONNECT_FRAME_SIZE,
        None => {
            let announced = usize::from(header.message_length);
            if announced < HEADER_SIZE {
                return Err(DecodeError::Malformed(format!(
                    "unknown response code {} announces {announced} bytes",
                    header.feed_response_code
                )));
            }
            announced
        }
    };

    Ok(len)
}

/// Decode one frame from the start of `bytes`.
///
/// Trailing bytes beyond the frame are ignored. Unknown response codes
/// decode to [`Packet::Unknown`].
///
/// # Errors
///
/// Returns [`DecodeError::Incomplete`] when `bytes` is shorter than the
/// header or the payload shape the header selects.
pub fn decode(bytes: &[u8]) -> Result<Packet, DecodeError> {
    let header = decode_header(bytes)?;

    let Some(code) = header.response_code() else {
        return Ok(Packet::Unknown(header));
    };

    let needed = frame_len(&header)?;
    if bytes.len() < needed {
        return Err(DecodeError::Incomplete {
            needed,
            available: bytes.len(),
        });
    }

    let mut payload = &bytes[HEADER_SIZE..needed];

    let packet = match code {
        FeedResponseCode::Index => Packet::Index(read_ticker(header, &mut payload)),
        FeedResponseCode::Ticker => Packet::Ticker(read_ticker(header, &mut payload)),
        FeedResponseCode::Quote => Packet::Quote(read_quote(header, &mut payload)),
        FeedResponseCode::OpenInterest => Packet::OpenInterest(OpenInterestPacket {
            header,
            open_interest: payload.get_u32_le(),
        }),
        FeedResponseCode::PreviousClose => Packet::PreviousClose(PreviousClosePacket {
            header,
            previous_close: payload.get_f32_le(),
            previous_open_interest: payload.get_u32_le(),
        }),
        FeedResponseCode::MarketStatus => Packet::MarketStatus(header),
        FeedResponseCode::Full => Packet::Full(read_full(header, &mut payload)),
        FeedResponseCode::Disconnect => Packet::Disconnect(header),
    };

    Ok(packet)
}

fn read_ticker(header: PacketHeader, payload: &mut &[u8]) -> TickerPacket {
    TickerPacket {
        header,
        last_traded_price: payload.get_f32_le(),
        last_trade_time: payload.get_u32_le(),
    }
}

fn read_quote(header: PacketHeader, payload: &mut &[u8]) -> QuotePacket {
    QuotePacket {
        header,
        last_traded_price: payload.get_f32_le(),
        last_traded_quantity: payload.get_u16_le(),
        last_trade_time: payload.get_u32_le(),
        average_trade_price: payload.get_f32_le(),
        volume: payload.get_u32_le(),
        total_sell_quantity: payload.get_u32_le(),
        total_buy_quantity: payload.get_u32_le(),
        day_open: payload.get_f32_le(),
        day_close: payload.get_f32_le(),
        day_high: payload.get_f32_le(),
        day_low: payload.get_f32_le(),
    }
}

fn read_full(header: PacketHeader, payload: &mut &[u8]) -> FullPacket {
    FullPacket {
        header,
        last_traded_price: payload.get_f32_le(),
        last_traded_quantity: payload.get_u16_le(),
        last_trade_time: payload.get_u32_le(),
        average_trade_price: payload.get_f32_le(),
        volume: payload.get_u32_le(),
        total_sell_quantity: payload.get_u32_le(),
        total_buy_quantity: payload.get_u32_le(),
        open_interest: payload.get_u32_le(),
        highest_open_interest: payload.get_u32_le(),
        lowest_open_interest: payload.get_u32_le(),
        day_open: payload.get_f32_le(),
        day_close: payload.get_f32_le(),
        day_high: payload.get_f32_le(),
        day_low: payload.get_f32_le(),
    }
}

// =============================================================================
// Frame Buffer
// =============================================================================

/// Reassembles frames from arbitrarily split binary messages.
///
/// Bytes are appended with [`FrameBuffer::extend`]; [`FrameBuffer::next_packet`]
/// yields a packet only once the whole frame is buffered. A frame whose
/// boundary cannot be determined clears the buffer so the stream can resync
/// on the next message.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pop the next complete frame.
    ///
    /// Returns `None` when more data is needed.
    pub fn next_packet(&mut self) -> Option<Result<Packet, DecodeError>> {
        let header = decode_header(&self.buf).ok()?;

        let len = match frame_len(&header) {
            Ok(len) => len,
            Err(e) => {
                self.buf.clear();
                return Some(Err(e));
            }
        };

        if self.buf.len() < len {
            return None;
        }

        let frame = self.buf.split_to(len);
        Some(decode(&frame))
    }

    /// Buffered byte count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drop buffered bytes.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

// =============================================================================
// JSON Codec
// =============================================================================

/// JSON codec for control frames and order updates.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Serialize a subscription request into a control frame.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode_subscription(
        &self,
        request: &SubscriptionRequest,
    ) -> Result<String, serde_json::Error> {
        serde_json::to_string(&SubscriptionMessage::from(request))
    }

    /// Encode a value to JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode<T: serde::Serialize>(&self, value: &T) -> Result<String, CodecError> {
        Ok(serde_json::to_string(value)?)
    }

    /// Decode an order update text message.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object or does not match
    /// the order update shape.
    pub fn decode_order_update(&self, text: &str) -> Result<OrderUpdateMessage, CodecError> {
        let trimmed = text.trim();

        if !trimmed.starts_with('{') {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}...",
                trimmed.chars().take(50).collect::<String>()
            )));
        }

        Ok(serde_json::from_str(trimmed)?)
    }
}
