//! Dhan WebSocket Adapters
//!
//! Implements the clients for Dhan's two streaming endpoints:
//!
//! - **Market feed**: binary tick/quote/full packets, JSON control frames
//! - **Order updates**: JSON order alerts after a JSON login

pub mod codec;
pub mod feed;
pub mod heartbeat;
pub mod messages;
pub mod order_update;
pub mod reconnect;

pub use codec::{CodecError, FrameBuffer, JsonCodec, decode, decode_header, encode_header, frame_len};
pub use feed::{ConnectionState, MarketFeedClient};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
pub use messages::{
    InstrumentEntry, LoginRequest, OrderUpdateData, OrderUpdateLogin, OrderUpdateMessage,
    SubscriptionMessage,
};
pub use order_update::{OrderUpdateClient, OrderUpdateConfig, OrderUpdateError, OrderUpdateEvent};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
