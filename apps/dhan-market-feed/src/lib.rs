#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_possible_truncation
    )
)]

//! Dhan Market Feed - Live Market Data Client
//!
//! Keeps a WebSocket connection to Dhan's live market feed, manages the
//! instrument subscription set and decodes the compact binary packets the
//! feed pushes (ticker, quote, full, open interest, previous close, market
//! status, disconnect).
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Wire-level types with no I/O
//!   - `instrument`: Exchange segments, subscription types, request codes
//!   - `packet`: Decoded packets and decode errors
//!   - `subscription`: Subscription registry and request batching
//!
//! - **Application**: Consumer-facing contracts
//!   - `ports`: Handler trait, feed events, error taxonomy
//!   - `services`: Dispatcher delivering events to the handler
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `dhan`: Market feed and order update WebSocket clients
//!   - `config`: Environment-driven configuration
//!   - `metrics`: Prometheus counters and gauges
//!   - `telemetry`: Tracing subscriber setup
//!
//! # Data Flow
//!
//! ```text
//!                    ┌────────┐   ┌──────────┐   ┌────────────┐
//! Dhan feed WS ────► │ reader │──►│ dispatch │──►│ FeedHandler│
//!                    └────────┘   └──────────┘   └────────────┘
//!                    ┌────────┐
//! subscribe() ─────► │ writer │────► Dhan feed WS
//! heartbeat ───────► └────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Feed types with no external dependencies.
pub mod domain;

/// Application layer - Ports and event dispatch.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::instrument::{
    ExchangeSegment, Instrument, InstrumentKey, InstrumentParseError, RequestCode,
    SubscriptionType,
};
pub use domain::packet::{
    DecodeError, FeedResponseCode, FullPacket, OpenInterestPacket, Packet, PacketHeader,
    PreviousClosePacket, QuotePacket, TickerPacket,
};
pub use domain::subscription::{
    MAX_INSTRUMENTS_PER_REQUEST, SubscriptionRegistry, SubscriptionRequest,
};

// Ports
pub use application::ports::{DisconnectReason, FeedError, FeedEvent, FeedHandler};
pub use application::services::FeedDispatcher;

// Clients
pub use infrastructure::dhan::{
    ConnectionState, MarketFeedClient, OrderUpdateClient, OrderUpdateConfig, OrderUpdateError,
    OrderUpdateEvent, OrderUpdateMessage,
};

// Infrastructure config
pub use infrastructure::config::{
    ChannelSettings, ConfigError, Credentials, FeedConfig, WebSocketSettings,
};

// Metrics
pub use infrastructure::metrics::{FeedType as MetricsFeedType, init_metrics};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, init as init_telemetry};
