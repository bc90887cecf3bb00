//! Instrument Types
//!
//! Identifies tradable securities on the feed and the granularity of updates
//! requested for them.
//!
//! An instrument's identity is the pair `(exchange_segment, security_id)`.
//! The subscription type is a property of the subscription, not of the
//! instrument, so two instruments that differ only in type are equal.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// Exchange Segment
// =============================================================================

/// Market segment an instrument trades in.
///
/// The discriminant is the numeric code used on the wire, both in control
/// frames and in the binary packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ExchangeSegment {
    /// Index values.
    Index = 0,
    /// NSE cash equity.
    NseEquity = 1,
    /// NSE futures and options.
    NseFno = 2,
    /// NSE currency derivatives.
    NseCurrency = 3,
    /// BSE cash equity.
    BseEquity = 4,
    /// MCX commodities.
    McxCommodity = 5,
    /// BSE currency derivatives.
    BseCurrency = 7,
    /// BSE futures and options.
    BseFno = 8,
}

impl ExchangeSegment {
    /// Get all exchange segments.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Index,
            Self::NseEquity,
            Self::NseFno,
            Self::NseCurrency,
            Self::BseEquity,
            Self::McxCommodity,
            Self::BseCurrency,
            Self::BseFno,
        ]
    }

    /// Numeric wire code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Look up a segment by its wire code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Index),
            1 => Some(Self::NseEquity),
            2 => Some(Self::NseFno),
            3 => Some(Self::NseCurrency),
            4 => Some(Self::BseEquity),
            5 => Some(Self::McxCommodity),
            7 => Some(Self::BseCurrency),
            8 => Some(Self::BseFno),
            _ => None,
        }
    }

    /// Segment name as used by the REST API (`NSE_EQ`, `IDX_I`, ...).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Index => "IDX_I",
            Self::NseEquity => "NSE_EQ",
            Self::NseFno => "NSE_FNO",
            Self::NseCurrency => "NSE_CURRENCY",
            Self::BseEquity => "BSE_EQ",
            Self::McxCommodity => "MCX_COMM",
            Self::BseCurrency => "BSE_CURRENCY",
            Self::BseFno => "BSE_FNO",
        }
    }
}

impl fmt::Display for ExchangeSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeSegment {
    type Err = InstrumentParseError;

    /// Accepts the REST segment name (case-insensitive) or the numeric code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();

        if let Ok(code) = trimmed.parse::<u8>() {
            return Self::from_code(code)
                .ok_or_else(|| InstrumentParseError::UnknownSegment(trimmed.to_string()));
        }

        let upper = trimmed.to_uppercase();
        Self::all()
            .iter()
            .copied()
            .find(|segment| segment.as_str() == upper)
            .ok_or_else(|| InstrumentParseError::UnknownSegment(trimmed.to_string()))
    }
}

// =============================================================================
// Subscription Type
// =============================================================================

/// Granularity of updates requested for an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum SubscriptionType {
    /// Last traded price and time.
    #[default]
    Ticker,
    /// Ticker plus volume, totals and day OHLC.
    Quote,
    /// Quote plus open interest.
    Full,
}

impl SubscriptionType {
    /// Get all subscription types.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Ticker, Self::Quote, Self::Full]
    }

    /// Request code that subscribes to this type.
    #[must_use]
    pub const fn subscribe_code(self) -> RequestCode {
        match self {
            Self::Ticker => RequestCode::SubscribeTicker,
            Self::Quote => RequestCode::SubscribeQuote,
            Self::Full => RequestCode::SubscribeFull,
        }
    }

    /// Request code that unsubscribes from this type.
    #[must_use]
    pub const fn unsubscribe_code(self) -> RequestCode {
        match self {
            Self::Ticker => RequestCode::UnsubscribeTicker,
            Self::Quote => RequestCode::UnsubscribeQuote,
            Self::Full => RequestCode::UnsubscribeFull,
        }
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Quote => "quote",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionType {
    type Err = InstrumentParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ticker" => Ok(Self::Ticker),
            "quote" => Ok(Self::Quote),
            "full" => Ok(Self::Full),
            other => Err(InstrumentParseError::UnknownSubscriptionType(
                other.to_string(),
            )),
        }
    }
}

// =============================================================================
// Request Code
// =============================================================================

/// Control frame request codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestCode {
    /// Subscribe to ticker packets.
    SubscribeTicker = 15,
    /// Unsubscribe from ticker packets.
    UnsubscribeTicker = 16,
    /// Subscribe to quote packets.
    SubscribeQuote = 17,
    /// Unsubscribe from quote packets.
    UnsubscribeQuote = 18,
    /// Subscribe to full packets.
    SubscribeFull = 21,
    /// Unsubscribe from full packets.
    UnsubscribeFull = 22,
}

impl RequestCode {
    /// Numeric wire code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Whether this code subscribes (as opposed to unsubscribes).
    #[must_use]
    pub const fn is_subscribe(self) -> bool {
        matches!(
            self,
            Self::SubscribeTicker | Self::SubscribeQuote | Self::SubscribeFull
        )
    }

    /// Subscription type this code applies to.
    #[must_use]
    pub const fn subscription_type(self) -> SubscriptionType {
        match self {
            Self::SubscribeTicker | Self::UnsubscribeTicker => SubscriptionType::Ticker,
            Self::SubscribeQuote | Self::UnsubscribeQuote => SubscriptionType::Quote,
            Self::SubscribeFull | Self::UnsubscribeFull => SubscriptionType::Full,
        }
    }
}

// =============================================================================
// Instrument
// =============================================================================

/// Key identifying an instrument: segment plus security id.
pub type InstrumentKey = (ExchangeSegment, String);

/// A tradable security together with the requested update granularity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    /// Market segment.
    pub exchange_segment: ExchangeSegment,
    /// Vendor security id (numeric string, e.g. `"1333"`).
    pub security_id: String,
    /// Requested packet granularity.
    pub subscription_type: SubscriptionType,
}

impl Instrument {
    /// Create a new instrument.
    #[must_use]
    pub fn new(
        exchange_segment: ExchangeSegment,
        security_id: impl Into<String>,
        subscription_type: SubscriptionType,
    ) -> Self {
        Self {
            exchange_segment,
            security_id: security_id.into(),
            subscription_type,
        }
    }

    /// Ticker subscription for an instrument.
    #[must_use]
    pub fn ticker(exchange_segment: ExchangeSegment, security_id: impl Into<String>) -> Self {
        Self::new(exchange_segment, security_id, SubscriptionType::Ticker)
    }

    /// Quote subscription for an instrument.
    #[must_use]
    pub fn quote(exchange_segment: ExchangeSegment, security_id: impl Into<String>) -> Self {
        Self::new(exchange_segment, security_id, SubscriptionType::Quote)
    }

    /// Full subscription for an instrument.
    #[must_use]
    pub fn full(exchange_segment: ExchangeSegment, security_id: impl Into<String>) -> Self {
        Self::new(exchange_segment, security_id, SubscriptionType::Full)
    }

    /// Identity key.
    #[must_use]
    pub fn key(&self) -> InstrumentKey {
        (self.exchange_segment, self.security_id.clone())
    }
}

impl PartialEq for Instrument {
    fn eq(&self, other: &Self) -> bool {
        self.exchange_segment == other.exchange_segment && self.security_id == other.security_id
    }
}

impl Eq for Instrument {}

impl Hash for Instrument {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.exchange_segment.hash(state);
        self.security_id.hash(state);
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.exchange_segment, self.security_id, self.subscription_type
        )
    }
}

impl FromStr for Instrument {
    type Err = InstrumentParseError;

    /// Parse `SEGMENT:SECURITY_ID[:TYPE]`, e.g. `NSE_EQ:1333:quote`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split(':');

        let segment = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| InstrumentParseError::InvalidFormat(s.to_string()))?
            .parse::<ExchangeSegment>()?;

        let security_id = parts
            .next()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| InstrumentParseError::InvalidFormat(s.to_string()))?;

        let subscription_type = match parts.next() {
            Some(kind) => kind.parse::<SubscriptionType>()?,
            None => SubscriptionType::default(),
        };

        if parts.next().is_some() {
            return Err(InstrumentParseError::InvalidFormat(s.to_string()));
        }

        Ok(Self::new(segment, security_id, subscription_type))
    }
}

/// Errors produced when parsing instrument descriptors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstrumentParseError {
    /// Segment name or code not recognised.
    #[error("unknown exchange segment: {0}")]
    UnknownSegment(String),
    /// Subscription type not recognised.
    #[error("unknown subscription type: {0}")]
    UnknownSubscriptionType(String),
    /// Descriptor is not `SEGMENT:SECURITY_ID[:TYPE]`.
    #[error("invalid instrument descriptor: {0}")]
    InvalidFormat(String),
}
