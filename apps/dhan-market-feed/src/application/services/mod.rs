//! Feed Dispatcher
//!
//! Delivers decoded packets and session events to the consumer handler.
//!
//! - Disconnect packets are surfaced as [`FeedEvent::Disconnected`], never as
//!   data.
//! - Without a handler, events are dropped (logged and counted, not queued).
//! - Once [`FeedDispatcher::close`] is called nothing further is delivered,
//!   even if the socket still yields frames.
//!
//! The handler slot is read under a short lock and the handler is invoked
//! after the guard is released, so a handler may safely swap itself out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::application::ports::{DisconnectReason, FeedEvent, FeedHandler};
use crate::domain::packet::Packet;
use crate::infrastructure::metrics::{self, DropReason};

/// Routes feed events to the registered [`FeedHandler`].
#[derive(Default)]
pub struct FeedDispatcher {
    handler: RwLock<Option<Arc<dyn FeedHandler>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for FeedDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedDispatcher")
            .field("has_handler", &self.has_handler())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl FeedDispatcher {
    /// Create a dispatcher with no handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dispatcher with a handler.
    #[must_use]
    pub fn with_handler(handler: impl FeedHandler) -> Self {
        let dispatcher = Self::new();
        dispatcher.set_handler(handler);
        dispatcher
    }

    /// Register or replace the handler.
    pub fn set_handler(&self, handler: impl FeedHandler) {
        *self.handler.write() = Some(Arc::new(handler));
    }

    /// Remove the handler; subsequent events are dropped.
    pub fn clear_handler(&self) {
        *self.handler.write() = None;
    }

    /// Whether a handler is registered.
    #[must_use]
    pub fn has_handler(&self) -> bool {
        self.handler.read().is_some()
    }

    /// Deliver a decoded packet.
    ///
    /// Returns whether the handler was invoked.
    pub fn on_packet(&self, packet: Packet) -> bool {
        let event = match packet {
            Packet::Disconnect(header) => {
                FeedEvent::Disconnected(DisconnectReason::ServerDisconnect(header))
            }
            other => FeedEvent::Packet(other),
        };
        self.on_event(event)
    }

    /// Deliver an event.
    ///
    /// Returns whether the handler was invoked.
    pub fn on_event(&self, event: FeedEvent) -> bool {
        if self.is_closed() {
            tracing::trace!("Dispatcher closed, dropping event");
            metrics::record_event_dropped(DropReason::Closed);
            return false;
        }

        let handler = self.handler.read().clone();
        let Some(handler) = handler else {
            match &event {
                FeedEvent::Packet(packet) => tracing::debug!(
                    kind = packet.kind(),
                    security_id = packet.security_id(),
                    "No handler registered, dropping packet"
                ),
                other => tracing::debug!(event = ?other, "No handler registered, dropping event"),
            }
            metrics::record_event_dropped(DropReason::NoHandler);
            return false;
        };

        handler.on_event(event);
        true
    }

    /// Stop delivering events.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Resume delivery after [`FeedDispatcher::close`].
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    /// Whether delivery is stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::application::ports::FeedError;
    use crate::domain::packet::{PacketHeader, TickerPacket};

    fn header(code: u8) -> PacketHeader {
        PacketHeader {
            feed_response_code: code,
            message_length: 16,
            exchange_segment: 1,
            security_id: 1333,
        }
    }

    fn ticker() -> Packet {
        Packet::Ticker(TickerPacket {
            header: header(2),
            last_traded_price: 100.5,
            last_trade_time: 1_700_000_000,
        })
    }

    fn recording() -> (FeedDispatcher, Arc<Mutex<Vec<FeedEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let dispatcher = FeedDispatcher::with_handler(move |event| sink.lock().push(event));
        (dispatcher, events)
    }

    #[test]
    fn delivers_packets_in_order() {
        let (dispatcher, events) = recording();

        assert!(dispatcher.on_packet(ticker()));
        assert!(dispatcher.on_packet(Packet::MarketStatus(header(7))));

        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], FeedEvent::Packet(Packet::Ticker(_))));
        assert!(matches!(events[1], FeedEvent::Packet(Packet::MarketStatus(_))));
    }

    #[test]
    fn disconnect_packet_becomes_disconnect_event() {
        let (dispatcher, events) = recording();

        dispatcher.on_packet(Packet::Disconnect(header(50)));

        let events = events.lock();
        assert!(matches!(
            events[0],
            FeedEvent::Disconnected(DisconnectReason::ServerDisconnect(h)) if h.feed_response_code == 50
        ));
    }

    #[test]
    fn drops_without_handler() {
        let dispatcher = FeedDispatcher::new();
        assert!(!dispatcher.has_handler());
        assert!(!dispatcher.on_packet(ticker()));
        assert!(!dispatcher.on_event(FeedEvent::Error(FeedError::NotConnected)));
    }

    #[test]
    fn clear_handler_stops_delivery() {
        let (dispatcher, events) = recording();
        dispatcher.on_packet(ticker());
        dispatcher.clear_handler();
        dispatcher.on_packet(ticker());

        assert_eq!(events.lock().len(), 1);
    }

    #[test]
    fn nothing_delivered_after_close() {
        let (dispatcher, events) = recording();

        dispatcher.close();
        assert!(dispatcher.is_closed());
        assert!(!dispatcher.on_packet(ticker()));
        assert!(!dispatcher.on_event(FeedEvent::Disconnected(DisconnectReason::StreamEnded)));
        assert!(events.lock().is_empty());

        dispatcher.reopen();
        assert!(dispatcher.on_packet(ticker()));
        assert_eq!(events.lock().len(), 1);
    }

    #[test]
    fn handler_may_replace_itself() {
        let dispatcher = Arc::new(FeedDispatcher::new());
        let inner = Arc::clone(&dispatcher);
        dispatcher.set_handler(move |_event| inner.clear_handler());

        assert!(dispatcher.on_packet(ticker()));
        assert!(!dispatcher.has_handler());
    }
}
