//! Dhan WebSocket Message Types
//!
//! JSON wire types for the two Dhan streams.
//!
//! # Market Feed (client → server)
//! - [`SubscriptionMessage`]: subscribe/unsubscribe control frame
//!
//! # Order Updates
//! - [`OrderUpdateLogin`]: login frame sent after connecting
//! - [`OrderUpdateMessage`]: order alert pushed by the server
//!
//! # References
//!
//! - [Live Market Feed](https://dhanhq.co/docs/v2/live-market-feed/)
//! - [Live Order Update](https://dhanhq.co/docs/v2/order-update/)

use serde::{Deserialize, Serialize};

use crate::domain::subscription::SubscriptionRequest;

// =============================================================================
// Market Feed Control Frames
// =============================================================================

/// Subscribe/unsubscribe control frame.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "RequestCode": 15,
///   "InstrumentCount": 2,
///   "InstrumentList": [
///     {"ExchangeSegment": 1, "SecurityId": "1333"},
///     {"ExchangeSegment": 0, "SecurityId": "13"}
///   ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubscriptionMessage {
    /// Request code (15/16, 17/18, 21/22).
    pub request_code: u8,
    /// Number of entries in `instrument_list`.
    pub instrument_count: usize,
    /// Instruments covered by this frame.
    pub instrument_list: Vec<InstrumentEntry>,
}

/// One instrument inside a control frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstrumentEntry {
    /// Exchange segment wire code.
    pub exchange_segment: u8,
    /// Security id, sent as a string.
    pub security_id: String,
}

impl From<&SubscriptionRequest> for SubscriptionMessage {
    fn from(request: &SubscriptionRequest) -> Self {
        let instrument_list: Vec<InstrumentEntry> = request
            .instruments
            .iter()
            .map(|inst| InstrumentEntry {
                exchange_segment: inst.exchange_segment.code(),
                security_id: inst.security_id.clone(),
            })
            .collect();

        Self {
            request_code: request.request_code.code(),
            instrument_count: instrument_list.len(),
            instrument_list,
        }
    }
}

// =============================================================================
// Order Update Stream
// =============================================================================

/// Message code identifying a login request.
pub const LOGIN_MSG_CODE: u16 = 42;

/// Login frame for the order update stream.
///
/// # Wire Format (JSON)
/// ```json
/// {"LoginReq": {"MsgCode": 42, "ClientId": "1000000001", "Token": "..."}, "UserType": "SELF"}
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderUpdateLogin {
    /// Login body.
    pub login_req: LoginRequest,
    /// Account type; always `SELF` for individual accounts.
    pub user_type: String,
}

/// Body of [`OrderUpdateLogin`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginRequest {
    /// Always [`LOGIN_MSG_CODE`].
    pub msg_code: u16,
    /// Dhan client id.
    pub client_id: String,
    /// Access token.
    pub token: String,
}

impl OrderUpdateLogin {
    /// Build the login frame for an individual account.
    #[must_use]
    pub fn new(client_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            login_req: LoginRequest {
                msg_code: LOGIN_MSG_CODE,
                client_id: client_id.into(),
                token: token.into(),
            },
            user_type: "SELF".to_string(),
        }
    }
}

impl std::fmt::Debug for OrderUpdateLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderUpdateLogin")
            .field("client_id", &self.login_req.client_id)
            .field("token", &"[REDACTED]")
            .field("user_type", &self.user_type)
            .finish()
    }
}

/// Order alert pushed on the order update stream.
///
/// # Wire Format (JSON)
/// ```json
/// {"Type": "order_alert", "Data": {"OrderNo": "1124091136546", "Status": "TRADED", ...}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdateMessage {
    /// Message type, e.g. `order_alert`.
    #[serde(rename = "Type")]
    pub message_type: String,
    /// Order details.
    #[serde(rename = "Data", default)]
    pub data: OrderUpdateData,
}

impl OrderUpdateMessage {
    /// Whether this is an order alert.
    #[must_use]
    pub fn is_order_alert(&self) -> bool {
        self.message_type == "order_alert"
    }
}

/// Order fields carried by an alert.
///
/// Only the commonly used fields are typed; everything else lands in
/// `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderUpdateData {
    /// Dhan order number.
    #[serde(default)]
    pub order_no: Option<String>,
    /// Exchange order number.
    #[serde(default)]
    pub exch_order_no: Option<String>,
    /// Exchange, e.g. `NSE`.
    #[serde(default)]
    pub exchange: Option<String>,
    /// Segment letter, e.g. `E` or `D`.
    #[serde(default)]
    pub segment: Option<String>,
    /// Security id.
    #[serde(default)]
    pub security_id: Option<String>,
    /// Trading symbol.
    #[serde(default)]
    pub symbol: Option<String>,
    /// `B` or `S`.
    #[serde(default)]
    pub txn_type: Option<String>,
    /// Order type, e.g. `LMT`.
    #[serde(default)]
    pub order_type: Option<String>,
    /// Product, e.g. `I` or `C`.
    #[serde(default)]
    pub product: Option<String>,
    /// Order status, e.g. `TRADED`.
    #[serde(default)]
    pub status: Option<String>,
    /// Order quantity.
    #[serde(default)]
    pub quantity: Option<i64>,
    /// Filled quantity.
    #[serde(default)]
    pub traded_qty: Option<i64>,
    /// Limit price.
    #[serde(default)]
    pub price: Option<f64>,
    /// Average fill price.
    #[serde(default)]
    pub avg_traded_price: Option<f64>,
    /// Rejection or status reason.
    #[serde(default)]
    pub reason_description: Option<String>,
    /// Last update time as sent by the server.
    #[serde(default)]
    pub last_updated_time: Option<String>,
    /// Caller-supplied correlation id.
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Remaining fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
