//! Market Feed Integration Tests
//!
//! Runs the client against a local WebSocket server speaking the feed's
//! control and binary protocol.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use dhan_market_feed::infrastructure::dhan::encode_header;
use dhan_market_feed::{
    ConnectionState, Credentials, DecodeError, DisconnectReason, ExchangeSegment, FeedConfig, FeedError,
    FeedEvent, Instrument, MarketFeedClient, Packet, PacketHeader, WebSocketSettings,
};

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Mock Feed Server
// =============================================================================

enum ServerCommand {
    Binary(Vec<u8>),
    Ping,
    /// Drop the TCP connection without a close handshake.
    Drop,
}

/// Accepts one connection at a time and records every text frame as
/// `(connection index, json)`.
struct MockFeed {
    addr: SocketAddr,
    frames: mpsc::UnboundedReceiver<(usize, serde_json::Value)>,
    commands: mpsc::UnboundedSender<ServerCommand>,
    uris: Arc<Mutex<Vec<String>>>,
    pongs: Arc<AtomicUsize>,
}

impl MockFeed {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let (commands, mut commands_rx) = mpsc::unbounded_channel();
        let uris = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&uris);
        let pongs = Arc::new(AtomicUsize::new(0));
        let pongs_seen = Arc::clone(&pongs);

        tokio::spawn(async move {
            let mut connection = 0;
            while let Ok((socket, _)) = listener.accept().await {
                let seen = Arc::clone(&seen);
                let record = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                    seen.lock().push(request.uri().to_string());
                    Ok(response)
                };
                let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(socket, record).await else {
                    continue;
                };

                loop {
                    tokio::select! {
                        message = ws.next() => match message {
                            Some(Ok(Message::Text(text))) => {
                                let json = serde_json::from_str(text.as_str()).unwrap();
                                let _ = frames_tx.send((connection, json));
                            }
                            Some(Ok(Message::Pong(_))) => {
                                pongs_seen.fetch_add(1, Ordering::SeqCst);
                            }
                            Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                            Some(Ok(_)) => {}
                        },
                        command = commands_rx.recv() => match command {
                            Some(ServerCommand::Binary(bytes)) => {
                                if ws.send(Message::Binary(bytes.into())).await.is_err() {
                                    break;
                                }
                            }
                            Some(ServerCommand::Ping) => {
                                if ws.send(Message::Ping(b"alive".to_vec().into())).await.is_err() {
                                    break;
                                }
                            }
                            Some(ServerCommand::Drop) | None => break,
                        },
                    }
                }

                connection += 1;
            }
        });

        Self {
            addr,
            frames,
            commands,
            uris,
            pongs,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    fn send_binary(&self, bytes: Vec<u8>) {
        self.commands.send(ServerCommand::Binary(bytes)).unwrap();
    }

    fn drop_connection(&self) {
        self.commands.send(ServerCommand::Drop).unwrap();
    }

    fn ping(&self) {
        self.commands.send(ServerCommand::Ping).unwrap();
    }

    async fn next_frame(&mut self) -> (usize, serde_json::Value) {
        timeout(WAIT, self.frames.recv())
            .await
            .expect("control frame in time")
            .expect("server running")
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn header(code: u8, len: u16, segment: u8, security_id: u32) -> Vec<u8> {
    encode_header(&PacketHeader {
        feed_response_code: code,
        message_length: len,
        exchange_segment: segment,
        security_id,
    })
    .to_vec()
}

fn ticker_frame(security_id: u32, ltp: f32, ltt: u32) -> Vec<u8> {
    // Captured ticker frames announce 13 bytes; the code fixes the size.
    let mut frame = header(2, 13, 1, security_id);
    frame.extend_from_slice(&ltp.to_le_bytes());
    frame.extend_from_slice(&ltt.to_le_bytes());
    frame
}

fn config(url: &str) -> FeedConfig {
    FeedConfig::new(Credentials::new("CID1", "tok-123").unwrap()).with_feed_url(url)
}

fn recording_client(config: FeedConfig) -> (Arc<MarketFeedClient>, mpsc::UnboundedReceiver<FeedEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let client = MarketFeedClient::with_handler(config, move |event: FeedEvent| {
        let _ = tx.send(event);
    });
    (Arc::new(client), rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<FeedEvent>) -> FeedEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("event in time")
        .expect("handler alive")
}

async fn wait_for_state(client: &MarketFeedClient, state: ConnectionState) {
    timeout(WAIT, async {
        while client.state() != state {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("state reached in time");
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn ticker_flows_from_subscribe_to_handler() {
    let mut server = MockFeed::start().await;
    let (client, mut events) = recording_client(config(&server.url()));

    client.connect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);

    // Request line is `GET /?version=2&...`, never a bare query.
    let uri = server.uris.lock()[0].clone();
    assert!(uri.starts_with("/?version=2&"), "{uri}");
    assert!(uri.contains("token=tok-123"), "{uri}");
    assert!(uri.contains("clientId=CID1"), "{uri}");
    assert!(uri.contains("authType=2"), "{uri}");

    client
        .subscribe(&[Instrument::ticker(ExchangeSegment::NseEquity, "1333")])
        .await
        .unwrap();

    let (_, frame) = server.next_frame().await;
    assert_eq!(frame["RequestCode"], 15);
    assert_eq!(frame["InstrumentCount"], 1);
    assert_eq!(frame["InstrumentList"][0]["ExchangeSegment"], 1);
    assert_eq!(frame["InstrumentList"][0]["SecurityId"], "1333");
    assert_eq!(client.subscriptions().len(), 1);

    server.send_binary(ticker_frame(1333, 100.5, 1_700_000_000));

    match next_event(&mut events).await {
        FeedEvent::Packet(Packet::Ticker(tick)) => {
            assert_eq!(tick.security_id(), 1333);
            assert_eq!(tick.exchange_segment(), 1);
            assert!((tick.last_traded_price - 100.5).abs() < f32::EPSILON);
            assert_eq!(tick.last_trade_time, 1_700_000_000);
        }
        other => panic!("expected ticker, got {other:?}"),
    }

    client.disconnect().await.unwrap();

    let (_, frame) = server.next_frame().await;
    assert_eq!(frame["RequestCode"], 16);
    assert_eq!(frame["InstrumentList"][0]["SecurityId"], "1333");
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.subscriptions().is_empty());
}

#[tokio::test]
async fn large_subscription_is_split_into_batches() {
    let mut server = MockFeed::start().await;
    let (client, _events) = recording_client(config(&server.url()));
    client.connect().await.unwrap();

    let instruments: Vec<_> = (0..250)
        .map(|id| Instrument::ticker(ExchangeSegment::NseEquity, id.to_string()))
        .collect();
    client.subscribe(&instruments).await.unwrap();

    let mut counts = Vec::new();
    for _ in 0..3 {
        let (_, frame) = server.next_frame().await;
        assert_eq!(frame["RequestCode"], 15);
        assert_eq!(
            frame["InstrumentList"].as_array().unwrap().len() as u64,
            frame["InstrumentCount"].as_u64().unwrap()
        );
        counts.push(frame["InstrumentCount"].as_u64().unwrap());
    }
    assert_eq!(counts, vec![100, 100, 50]);
    assert_eq!(client.subscriptions().len(), 250);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn split_and_coalesced_frames_are_decoded() {
    let server = MockFeed::start().await;
    let (client, mut events) = recording_client(config(&server.url()));
    client.connect().await.unwrap();

    let frame = ticker_frame(1, 10.0, 1);
    server.send_binary(frame[..5].to_vec());
    server.send_binary(frame[5..].to_vec());

    let mut two = ticker_frame(2, 20.0, 2);
    two.extend(header(7, 8, 0, 0));
    server.send_binary(two);

    let first = next_event(&mut events).await;
    assert_eq!(first.as_packet().map(Packet::security_id), Some(1));
    let second = next_event(&mut events).await;
    assert_eq!(second.as_packet().map(Packet::security_id), Some(2));
    let third = next_event(&mut events).await;
    assert!(matches!(third, FeedEvent::Packet(Packet::MarketStatus(_))));

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn server_disconnect_packet_ends_session() {
    let server = MockFeed::start().await;
    let (client, mut events) = recording_client(config(&server.url()));
    client.connect().await.unwrap();

    server.send_binary(header(50, 8, 1, 0));

    match next_event(&mut events).await {
        FeedEvent::Disconnected(DisconnectReason::ServerDisconnect(h)) => {
            assert_eq!(h.feed_response_code, 50);
        }
        other => panic!("expected server disconnect, got {other:?}"),
    }

    wait_for_state(&client, ConnectionState::Disconnected).await;
    let result = client
        .subscribe(&[Instrument::ticker(ExchangeSegment::NseEquity, "1333")])
        .await;
    assert!(matches!(result, Err(FeedError::NotConnected)));

    // Exactly one disconnect event per session.
    assert!(
        timeout(Duration::from_millis(200), events.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn nothing_delivered_after_user_disconnect() {
    let server = MockFeed::start().await;
    let (client, mut events) = recording_client(config(&server.url()));
    client.connect().await.unwrap();

    server.send_binary(ticker_frame(1333, 1.0, 1));
    assert!(next_event(&mut events).await.as_packet().is_some());

    client.disconnect().await.unwrap();
    server.send_binary(ticker_frame(1333, 2.0, 2));

    // A user disconnect is not reported, and no late packets slip through.
    assert!(
        timeout(Duration::from_millis(200), events.recv())
            .await
            .map_or(true, |event| event.is_none())
    );
}

#[tokio::test]
async fn supervisor_reconnects_and_restores_subscriptions() {
    let mut server = MockFeed::start().await;
    let settings = WebSocketSettings {
        reconnect_delay_initial: Duration::from_millis(20),
        reconnect_delay_max: Duration::from_millis(100),
        reconnect_jitter: 0.0,
        max_reconnect_attempts: 5,
        ..WebSocketSettings::default()
    };
    let (client, mut events) = recording_client(config(&server.url()).with_websocket(settings));

    let supervisor = tokio::spawn(Arc::clone(&client).run());
    wait_for_state(&client, ConnectionState::Connected).await;

    client
        .subscribe(&[
            Instrument::ticker(ExchangeSegment::NseEquity, "1333"),
            Instrument::quote(ExchangeSegment::NseFno, "52175"),
        ])
        .await
        .unwrap();
    let mut first = vec![server.next_frame().await, server.next_frame().await];
    first.sort_by_key(|(_, frame)| frame["RequestCode"].as_u64());
    assert!(first.iter().all(|(connection, _)| *connection == 0));

    server.drop_connection();

    assert!(next_event(&mut events).await.is_disconnect());

    let mut restored = vec![server.next_frame().await, server.next_frame().await];
    restored.sort_by_key(|(_, frame)| frame["RequestCode"].as_u64());
    assert!(restored.iter().all(|(connection, _)| *connection == 1));
    assert_eq!(restored[0].1["RequestCode"], 15);
    assert_eq!(restored[0].1["InstrumentList"][0]["SecurityId"], "1333");
    assert_eq!(restored[1].1["RequestCode"], 17);
    assert_eq!(restored[1].1["InstrumentList"][0]["SecurityId"], "52175");

    wait_for_state(&client, ConnectionState::Connected).await;
    assert_eq!(client.subscriptions().len(), 2);

    client.disconnect().await.unwrap();
    let result = timeout(WAIT, supervisor).await.expect("supervisor stops");
    assert!(result.unwrap().is_ok());
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn malformed_frame_is_reported_and_session_continues() {
    let server = MockFeed::start().await;
    let (client, mut events) = recording_client(config(&server.url()));
    client.connect().await.unwrap();

    // Unknown code announcing fewer bytes than a header.
    server.send_binary(header(99, 4, 1, 0));
    server.send_binary(ticker_frame(1333, 42.0, 7));

    match next_event(&mut events).await {
        FeedEvent::Error(FeedError::Decode(DecodeError::Malformed(_))) => {}
        other => panic!("expected malformed decode error, got {other:?}"),
    }
    match next_event(&mut events).await {
        FeedEvent::Packet(Packet::Ticker(tick)) => assert_eq!(tick.security_id(), 1333),
        other => panic!("expected ticker, got {other:?}"),
    }
    assert_eq!(client.state(), ConnectionState::Connected);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn server_ping_gets_a_single_pong() {
    let server = MockFeed::start().await;
    let (client, mut events) = recording_client(config(&server.url()));
    client.connect().await.unwrap();

    server.ping();
    server.send_binary(ticker_frame(1333, 1.0, 1));
    assert!(next_event(&mut events).await.as_packet().is_some());

    timeout(WAIT, async {
        while server.pongs.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("pong in time");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.pongs.load(Ordering::SeqCst), 1);

    client.disconnect().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tracked_set_follows_wire_order_under_concurrency() {
    let mut server = MockFeed::start().await;
    let (client, _events) = recording_client(config(&server.url()));
    client.connect().await.unwrap();

    let instrument = Instrument::ticker(ExchangeSegment::NseEquity, "1333");

    for round in 0..200 {
        let subscriber = {
            let client = Arc::clone(&client);
            let instrument = instrument.clone();
            tokio::spawn(async move { client.subscribe(&[instrument]).await })
        };
        let unsubscriber = {
            let client = Arc::clone(&client);
            let instrument = instrument.clone();
            tokio::spawn(async move { client.unsubscribe(&[instrument]).await })
        };
        subscriber.await.unwrap().unwrap();
        unsubscriber.await.unwrap().unwrap();

        server.next_frame().await;
        let (_, last) = server.next_frame().await;
        let subscribed_last = last["RequestCode"] == 15;

        assert_eq!(
            client.subscriptions().contains(&instrument),
            subscribed_last,
            "round {round}: tracked set disagrees with the last frame on the wire"
        );
    }

    client.disconnect().await.unwrap();
}
