//! Market Feed Packet Types
//!
//! Typed representation of the binary frames pushed by the live market feed.
//! These types are codec-agnostic; the wire decoding lives in
//! `infrastructure::dhan::codec`.
//!
//! Every frame starts with an 8-byte [`PacketHeader`]. Its
//! `feed_response_code` selects the payload shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::instrument::ExchangeSegment;

// =============================================================================
// Response Codes
// =============================================================================

/// Known feed response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FeedResponseCode {
    /// Index value update.
    Index = 1,
    /// Last traded price and time.
    Ticker = 2,
    /// Quote with volume, totals and day OHLC.
    Quote = 4,
    /// Open interest update.
    OpenInterest = 5,
    /// Previous session close.
    PreviousClose = 6,
    /// Market status change.
    MarketStatus = 7,
    /// Quote plus open interest.
    Full = 8,
    /// Server-initiated disconnect.
    Disconnect = 50,
}

impl FeedResponseCode {
    /// Look up a response code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Index),
            2 => Some(Self::Ticker),
            4 => Some(Self::Quote),
            5 => Some(Self::OpenInterest),
            6 => Some(Self::PreviousClose),
            7 => Some(Self::MarketStatus),
            8 => Some(Self::Full),
            50 => Some(Self::Disconnect),
            _ => None,
        }
    }

    /// Numeric wire code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

// =============================================================================
// Header
// =============================================================================

/// First 8 bytes of every inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    /// Payload shape selector.
    pub feed_response_code: u8,
    /// Length announced by the server.
    pub message_length: u16,
    /// Exchange segment wire code.
    pub exchange_segment: u8,
    /// Numeric security id.
    pub security_id: u32,
}

impl PacketHeader {
    /// Known response code, if recognised.
    #[must_use]
    pub const fn response_code(&self) -> Option<FeedResponseCode> {
        FeedResponseCode::from_code(self.feed_response_code)
    }

    /// Exchange segment, if the code is recognised.
    #[must_use]
    pub const fn segment(&self) -> Option<ExchangeSegment> {
        ExchangeSegment::from_code(self.exchange_segment)
    }
}

// =============================================================================
// Payload Shapes
// =============================================================================

/// Last traded price update. Also used for index packets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickerPacket {
    /// Frame header.
    pub header: PacketHeader,
    /// Last traded price.
    pub last_traded_price: f32,
    /// Last trade time, epoch seconds.
    pub last_trade_time: u32,
}

impl TickerPacket {
    /// Numeric security id.
    #[must_use]
    pub const fn security_id(&self) -> u32 {
        self.header.security_id
    }

    /// Exchange segment wire code.
    #[must_use]
    pub const fn exchange_segment(&self) -> u8 {
        self.header.exchange_segment
    }

    /// Last trade time as a UTC timestamp.
    #[must_use]
    pub fn last_trade_datetime(&self) -> Option<DateTime<Utc>> {
        epoch_to_datetime(self.last_trade_time)
    }
}

/// Quote update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuotePacket {
    /// Frame header.
    pub header: PacketHeader,
    /// Last traded price.
    pub last_traded_price: f32,
    /// Last traded quantity.
    pub last_traded_quantity: u16,
    /// Last trade time, epoch seconds.
    pub last_trade_time: u32,
    /// Volume-weighted average trade price.
    pub average_trade_price: f32,
    /// Day volume.
    pub volume: u32,
    /// Total pending sell quantity.
    pub total_sell_quantity: u32,
    /// Total pending buy quantity.
    pub total_buy_quantity: u32,
    /// Day open.
    pub day_open: f32,
    /// Day close.
    pub day_close: f32,
    /// Day high.
    pub day_high: f32,
    /// Day low.
    pub day_low: f32,
}

impl QuotePacket {
    /// Numeric security id.
    #[must_use]
    pub const fn security_id(&self) -> u32 {
        self.header.security_id
    }

    /// Last trade time as a UTC timestamp.
    #[must_use]
    pub fn last_trade_datetime(&self) -> Option<DateTime<Utc>> {
        epoch_to_datetime(self.last_trade_time)
    }
}

/// Quote update with open interest.
///
/// On the wire the open-interest fields sit between `total_buy_quantity`
/// and the day OHLC values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FullPacket {
    /// Frame header.
    pub header: PacketHeader,
    /// Last traded price.
    pub last_traded_price: f32,
    /// Last traded quantity.
    pub last_traded_quantity: u16,
    /// Last trade time, epoch seconds.
    pub last_trade_time: u32,
    /// Volume-weighted average trade price.
    pub average_trade_price: f32,
    /// Day volume.
    pub volume: u32,
    /// Total pending sell quantity.
    pub total_sell_quantity: u32,
    /// Total pending buy quantity.
    pub total_buy_quantity: u32,
    /// Current open interest.
    pub open_interest: u32,
    /// Highest open interest of the day.
    pub highest_open_interest: u32,
    /// Lowest open interest of the day.
    pub lowest_open_interest: u32,
    /// Day open.
    pub day_open: f32,
    /// Day close.
    pub day_close: f32,
    /// Day high.
    pub day_high: f32,
    /// Day low.
    pub day_low: f32,
}

impl FullPacket {
    /// Numeric security id.
    #[must_use]
    pub const fn security_id(&self) -> u32 {
        self.header.security_id
    }

    /// Last trade time as a UTC timestamp.
    #[must_use]
    pub fn last_trade_datetime(&self) -> Option<DateTime<Utc>> {
        epoch_to_datetime(self.last_trade_time)
    }
}

/// Open interest update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenInterestPacket {
    /// Frame header.
    pub header: PacketHeader,
    /// Current open interest.
    pub open_interest: u32,
}

/// Previous session close.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreviousClosePacket {
    /// Frame header.
    pub header: PacketHeader,
    /// Previous close price.
    pub previous_close: f32,
    /// Previous session open interest.
    pub previous_open_interest: u32,
}

// =============================================================================
// Decode Errors
// =============================================================================

/// Binary decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Not enough bytes for the frame the header announces.
    #[error("incomplete frame: need {needed} bytes, have {available}")]
    Incomplete {
        /// Bytes required for a complete frame.
        needed: usize,
        /// Bytes currently available.
        available: usize,
    },

    /// Frame boundary cannot be determined.
    #[error("malformed frame: {0}")]
    Malformed(String),
}

// =============================================================================
// Packet
// =============================================================================

/// A decoded feed frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    /// Index value (ticker layout).
    Index(TickerPacket),
    /// Ticker update.
    Ticker(TickerPacket),
    /// Quote update.
    Quote(QuotePacket),
    /// Open interest update.
    OpenInterest(OpenInterestPacket),
    /// Previous close.
    PreviousClose(PreviousClosePacket),
    /// Market status change (header only).
    MarketStatus(PacketHeader),
    /// Full update.
    Full(FullPacket),
    /// Server-initiated disconnect (header only).
    Disconnect(PacketHeader),
    /// Unrecognised response code; carries the raw header.
    Unknown(PacketHeader),
}

impl Packet {
    /// Frame header.
    #[must_use]
    pub const fn header(&self) -> &PacketHeader {
        match self {
            Self::Index(p) | Self::Ticker(p) => &p.header,
            Self::Quote(p) => &p.header,
            Self::OpenInterest(p) => &p.header,
            Self::PreviousClose(p) => &p.header,
            Self::Full(p) => &p.header,
            Self::MarketStatus(h) | Self::Disconnect(h) | Self::Unknown(h) => h,
        }
    }

    /// Numeric security id.
    #[must_use]
    pub const fn security_id(&self) -> u32 {
        self.header().security_id
    }

    /// Whether this packet ends the stream.
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnect(_))
    }

    /// Short label for logging and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Index(_) => "index",
            Self::Ticker(_) => "ticker",
            Self::Quote(_) => "quote",
            Self::OpenInterest(_) => "open_interest",
            Self::PreviousClose(_) => "previous_close",
            Self::MarketStatus(_) => "market_status",
            Self::Full(_) => "full",
            Self::Disconnect(_) => "disconnect",
            Self::Unknown(_) => "unknown",
        }
    }
}

fn epoch_to_datetime(seconds: u32) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(i64::from(seconds), 0)
}
