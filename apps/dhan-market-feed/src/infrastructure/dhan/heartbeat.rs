//! Keepalive
//!
//! The market feed drops idle clients, so each session pings on a fixed
//! interval. Any inbound frame counts as proof of life; if nothing arrives
//! for longer than the pong timeout while a ping is outstanding, the session
//! is declared dead and the supervisor reconnects.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::WebSocketSettings;

/// Keepalive timing.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Silence tolerated after a ping before the session is dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(10),
            pong_timeout: Duration::from_secs(30),
        }
    }
}

impl HeartbeatConfig {
    /// Create a configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }

    /// Create configuration from [`WebSocketSettings`].
    #[must_use]
    pub const fn from_websocket_settings(settings: &WebSocketSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
            pong_timeout: settings.heartbeat_timeout,
        }
    }
}

/// Requests emitted by the [`HeartbeatManager`] to the session writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Write a ping frame.
    SendPing,
    /// Peer went silent; end the session.
    Timeout,
}

/// Liveness state shared by the reader and the heartbeat manager.
#[derive(Debug)]
pub struct HeartbeatState {
    last_seen: RwLock<Instant>,
    waiting_for_pong: AtomicBool,
    pings_sent: AtomicU64,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create fresh state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_seen: RwLock::new(Instant::now()),
            waiting_for_pong: AtomicBool::new(false),
            pings_sent: AtomicU64::new(0),
        }
    }

    /// Record a pong or any other inbound frame.
    pub fn record_activity(&self) {
        *self.last_seen.write() = Instant::now();
        self.waiting_for_pong.store(false, Ordering::SeqCst);
    }

    /// Record that a ping went out.
    pub fn mark_ping_sent(&self) {
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
        self.waiting_for_pong.store(true, Ordering::SeqCst);
    }

    /// Whether a ping is outstanding.
    #[must_use]
    pub fn is_waiting_for_pong(&self) -> bool {
        self.waiting_for_pong.load(Ordering::SeqCst)
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn time_since_activity(&self) -> Duration {
        self.last_seen.read().elapsed()
    }

    /// Pings written during this session.
    #[must_use]
    pub fn pings_sent(&self) -> u64 {
        self.pings_sent.load(Ordering::Relaxed)
    }
}

/// Periodic ping scheduler and silence detector.
///
/// Emits [`HeartbeatEvent::SendPing`] every `ping_interval` and a single
/// [`HeartbeatEvent::Timeout`] once the peer has been silent past
/// `pong_timeout` with a ping outstanding. Exits on timeout, cancellation or
/// when the receiver goes away.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, timed out, or the receiver is dropped.
    pub async fn run(self) {
        let start = tokio::time::Instant::now() + self.config.ping_interval;
        let mut interval = tokio::time::interval_at(start, self.config.ping_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if !self.tick().await {
                        break;
                    }
                }
            }
        }
    }

    /// Returns `false` when the loop should stop.
    async fn tick(&self) -> bool {
        if self.state.is_waiting_for_pong() {
            let silent_for = self.state.time_since_activity();
            if silent_for > self.config.pong_timeout {
                tracing::warn!(
                    silent_ms = silent_for.as_millis(),
                    timeout_ms = self.config.pong_timeout.as_millis(),
                    "Heartbeat timeout detected"
                );
                let _ = self.event_tx.send(HeartbeatEvent::Timeout).await;
                return false;
            }
        }

        if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
            tracing::debug!("Heartbeat receiver closed");
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_pings_every_ten_seconds() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(10));
        assert_eq!(config.pong_timeout, Duration::from_secs(30));
    }

    #[test]
    fn config_from_settings() {
        let settings = WebSocketSettings {
            heartbeat_interval: Duration::from_secs(3),
            heartbeat_timeout: Duration::from_secs(7),
            ..WebSocketSettings::default()
        };
        let config = HeartbeatConfig::from_websocket_settings(&settings);
        assert_eq!(config.ping_interval, Duration::from_secs(3));
        assert_eq!(config.pong_timeout, Duration::from_secs(7));
    }

    #[test]
    fn activity_clears_outstanding_ping() {
        let state = HeartbeatState::new();
        assert!(!state.is_waiting_for_pong());

        state.mark_ping_sent();
        assert!(state.is_waiting_for_pong());
        assert_eq!(state.pings_sent(), 1);

        state.record_activity();
        assert!(!state.is_waiting_for_pong());
        assert!(state.time_since_activity() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn manager_sends_ping_events() {
        let config = HeartbeatConfig::new(Duration::from_millis(50), Duration::from_secs(1));
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            HeartbeatManager::new(config, state, event_tx, cancel.clone()).run(),
        );

        let event = tokio::time::timeout(Duration::from_millis(500), event_rx.recv())
            .await
            .expect("should receive event")
            .expect("channel should not close");
        assert_eq!(event, HeartbeatEvent::SendPing);

        cancel.cancel();
        handle.await.expect("task should complete");
    }

    #[tokio::test]
    async fn manager_detects_silence() {
        let config = HeartbeatConfig::new(Duration::from_millis(30), Duration::from_millis(60));
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        state.mark_ping_sent();
        *state.last_seen.write() = Instant::now()
            .checked_sub(Duration::from_millis(200))
            .unwrap();

        let handle = tokio::spawn(
            HeartbeatManager::new(config, state, event_tx, cancel.clone()).run(),
        );

        let mut received_timeout = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(500), event_rx.recv()).await
        {
            if event == HeartbeatEvent::Timeout {
                received_timeout = true;
                break;
            }
        }
        assert!(received_timeout, "should receive timeout event");

        let finished = tokio::time::timeout(Duration::from_millis(200), handle).await;
        assert!(finished.is_ok(), "manager should exit after timeout");
    }

    #[tokio::test]
    async fn manager_stops_when_receiver_dropped() {
        let config = HeartbeatConfig::new(Duration::from_millis(10), Duration::from_secs(1));
        let (event_tx, event_rx) = mpsc::channel(1);
        drop(event_rx);

        let handle = tokio::spawn(
            HeartbeatManager::new(
                config,
                Arc::new(HeartbeatState::new()),
                event_tx,
                CancellationToken::new(),
            )
            .run(),
        );

        let finished = tokio::time::timeout(Duration::from_millis(200), handle).await;
        assert!(finished.is_ok());
    }

    #[tokio::test]
    async fn manager_cancellation() {
        let config = HeartbeatConfig::new(Duration::from_secs(10), Duration::from_secs(10));
        let (event_tx, _event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            HeartbeatManager::new(config, Arc::new(HeartbeatState::new()), event_tx, cancel.clone())
                .run(),
        );

        cancel.cancel();

        let joined = tokio_test::assert_ok!(
            tokio::time::timeout(Duration::from_millis(100), handle).await,
            "manager should shut down on cancellation"
        );
        tokio_test::assert_ok!(joined);
    }
}
