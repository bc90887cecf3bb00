//! Prometheus Metrics Module
//!
//! Counters and gauges for the feed clients.
//!
//! # Metrics Categories
//!
//! - **Packets**: decoded packets by kind, decode failures, dropped events
//! - **Connections**: per-stream connection state and reconnects
//! - **Subscriptions**: tracked instrument count and control frames sent
//!
//! # Integration
//!
//! Recording is always safe; without an installed recorder the macros are
//! no-ops. The binary installs the Prometheus exporter with
//! [`init_metrics`] when a metrics port is configured.

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// =============================================================================
// Exporter
// =============================================================================

static EXPORTER_INSTALLED: OnceLock<SocketAddr> = OnceLock::new();

/// Install the Prometheus exporter with an HTTP listener on `port`.
///
/// Subsequent calls are no-ops. Must be called inside a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the recorder or listener cannot be installed.
pub fn init_metrics(port: u16) -> Result<SocketAddr, BuildError> {
    if let Some(addr) = EXPORTER_INSTALLED.get() {
        return Ok(*addr);
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    register_metrics();
    Ok(*EXPORTER_INSTALLED.get_or_init(|| addr))
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "dhan_feed_packets_received_total",
        "Total packets decoded from the market feed"
    );
    describe_counter!(
        "dhan_feed_decode_errors_total",
        "Total frames that could not be decoded"
    );
    describe_counter!(
        "dhan_feed_events_dropped_total",
        "Total events dropped before reaching a handler"
    );
    describe_counter!(
        "dhan_feed_order_updates_total",
        "Total order updates received"
    );

    describe_gauge!(
        "dhan_feed_connected",
        "Whether the stream is connected (1) or not (0)"
    );
    describe_counter!(
        "dhan_feed_reconnects_total",
        "Total reconnection attempts"
    );
    describe_counter!(
        "dhan_feed_websocket_errors_total",
        "Total WebSocket errors by type"
    );

    describe_gauge!(
        "dhan_feed_subscriptions",
        "Number of tracked instrument subscriptions"
    );
    describe_counter!(
        "dhan_feed_control_frames_sent_total",
        "Total subscribe/unsubscribe frames written"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for stream types.
#[derive(Debug, Clone, Copy)]
pub enum FeedType {
    /// Binary market feed.
    MarketFeed,
    /// JSON order update stream.
    OrderUpdate,
}

impl FeedType {
    const fn as_str(self) -> &'static str {
        match self {
            Self::MarketFeed => "market_feed",
            Self::OrderUpdate => "order_update",
        }
    }
}

/// Why an event never reached a handler.
#[derive(Debug, Clone, Copy)]
pub enum DropReason {
    /// No handler registered.
    NoHandler,
    /// Dispatcher closed.
    Closed,
    /// Dispatch channel full or gone.
    ChannelFull,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::NoHandler => "no_handler",
            Self::Closed => "closed",
            Self::ChannelFull => "channel_full",
        }
    }
}

/// Record a decoded packet.
pub fn record_packet_received(kind: &'static str) {
    counter!(
        "dhan_feed_packets_received_total",
        "kind" => kind
    )
    .increment(1);
}

/// Record a frame that failed to decode.
pub fn record_decode_error() {
    counter!("dhan_feed_decode_errors_total").increment(1);
}

/// Record an event dropped before delivery.
pub fn record_event_dropped(reason: DropReason) {
    counter!(
        "dhan_feed_events_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record an order update.
pub fn record_order_update() {
    counter!("dhan_feed_order_updates_total").increment(1);
}

/// Update the connection gauge for a stream.
pub fn set_connected(feed: FeedType, connected: bool) {
    gauge!(
        "dhan_feed_connected",
        "feed" => feed.as_str()
    )
    .set(if connected { 1.0 } else { 0.0 });
}

/// Record a reconnection attempt.
pub fn record_reconnect(feed: FeedType) {
    counter!(
        "dhan_feed_reconnects_total",
        "feed" => feed.as_str()
    )
    .increment(1);
}

/// Record a WebSocket error.
pub fn record_websocket_error(feed: FeedType, error_type: &'static str) {
    counter!(
        "dhan_feed_websocket_errors_total",
        "feed" => feed.as_str(),
        "error_type" => error_type
    )
    .increment(1);
}

/// Update the tracked subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(count: usize) {
    gauge!("dhan_feed_subscriptions").set(count as f64);
}

/// Record a control frame written to the feed.
pub fn record_control_frame(request_code: u8) {
    counter!(
        "dhan_feed_control_frames_sent_total",
        "request_code" => request_code.to_string()
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================
