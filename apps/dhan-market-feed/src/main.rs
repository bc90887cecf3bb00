//! Dhan Market Feed Binary
//!
//! Connects to the live market feed, subscribes the configured instruments
//! and logs every decoded packet.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin dhan-market-feed
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `DHAN_CLIENT_ID`: Dhan client id
//! - `DHAN_ACCESS_TOKEN`: Dhan access token
//!
//! ## Optional
//! - `DHAN_FEED_INSTRUMENTS`: comma-separated `SEGMENT:SECURITY_ID[:TYPE]`
//!   entries, e.g. `NSE_EQ:1333,IDX_I:13:quote`
//! - `DHAN_FEED_URL`: market feed endpoint (default: <wss://api-feed.dhan.co>)
//! - `DHAN_ORDER_UPDATE_URL`: order update endpoint
//! - `DHAN_FEED_ORDER_UPDATES`: also stream order updates (default: false)
//! - `DHAN_FEED_METRICS_PORT`: Prometheus metrics port (default: 0, disabled)
//! - `DHAN_FEED_LOG_FORMAT`: `json` or `pretty` (default: pretty)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dhan_market_feed::infrastructure::telemetry;
use dhan_market_feed::{
    FeedConfig, FeedEvent, MarketFeedClient, OrderUpdateClient, OrderUpdateConfig,
    OrderUpdateEvent, Packet, init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// How often startup checks whether the first session is up.
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    telemetry::init().context("failed to initialize tracing")?;

    tracing::info!("Starting Dhan market feed");

    let config = FeedConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    if config.metrics_port > 0 {
        let addr = init_metrics(config.metrics_port).context("failed to start metrics exporter")?;
        tracing::info!(addr = %addr, "Prometheus metrics listening");
    }

    let shutdown_token = CancellationToken::new();

    let client = Arc::new(MarketFeedClient::with_handler(config.clone(), log_feed_event));

    let supervisor = {
        let client = Arc::clone(&client);
        let shutdown_token = shutdown_token.clone();
        tokio::spawn(async move {
            if let Err(e) = client.run().await {
                tracing::error!(error = %e, "Market feed supervisor gave up");
                shutdown_token.cancel();
            }
        })
    };

    let subscriber = {
        let client = Arc::clone(&client);
        let shutdown_token = shutdown_token.clone();
        let instruments = config.instruments.clone();
        tokio::spawn(async move {
            subscribe_when_connected(&client, &instruments, &shutdown_token).await;
        })
    };

    let order_updates = config
        .order_updates
        .then(|| spawn_order_updates(&config, shutdown_token.clone()));

    tracing::info!("Market feed ready");

    await_shutdown(shutdown_token.clone()).await;

    subscriber.abort();
    if let Err(e) = client.disconnect().await {
        tracing::warn!(error = %e, "Disconnect failed");
    }
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, supervisor).await.is_err() {
        tracing::warn!("Market feed supervisor did not stop in time");
    }
    if let Some(handle) = order_updates
        && tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err()
    {
        tracing::warn!("Order update client did not stop in time");
    }

    tracing::info!("Market feed stopped");
    Ok(())
}

/// Subscribe the configured instruments once the first session is up.
///
/// Later reconnects restore the subscription set on their own.
async fn subscribe_when_connected(
    client: &MarketFeedClient,
    instruments: &[dhan_market_feed::Instrument],
    shutdown_token: &CancellationToken,
) {
    if instruments.is_empty() {
        tracing::warn!("No instruments configured; set DHAN_FEED_INSTRUMENTS");
        return;
    }

    loop {
        if client.is_connected() {
            match client.subscribe(instruments).await {
                Ok(()) => {
                    tracing::info!(count = instruments.len(), "Instruments subscribed");
                    return;
                }
                Err(e) => tracing::warn!(error = %e, "Subscribe failed, retrying"),
            }
        }

        tokio::select! {
            () = shutdown_token.cancelled() => return,
            () = tokio::time::sleep(CONNECT_POLL_INTERVAL) => {}
        }
    }
}

/// Start the order update client and its event logger.
fn spawn_order_updates(config: &FeedConfig, shutdown_token: CancellationToken) -> JoinHandle<()> {
    let (event_tx, event_rx) = mpsc::channel::<OrderUpdateEvent>(256);
    let client = Arc::new(OrderUpdateClient::new(
        OrderUpdateConfig::from(config),
        event_tx,
        shutdown_token,
    ));

    tokio::spawn(handle_order_update_events(event_rx));

    tokio::spawn(async move {
        if let Err(e) = client.run().await {
            tracing::error!(error = %e, "Order update client error");
        }
    })
}

/// Log feed events.
fn log_feed_event(event: FeedEvent) {
    match event {
        FeedEvent::Packet(Packet::Ticker(tick) | Packet::Index(tick)) => {
            tracing::info!(
                segment = tick.exchange_segment(),
                security_id = tick.security_id(),
                ltp = tick.last_traded_price,
                ltt = tick.last_trade_time,
                "Tick"
            );
        }
        FeedEvent::Packet(Packet::Quote(quote)) => {
            tracing::info!(
                security_id = quote.security_id(),
                ltp = quote.last_traded_price,
                volume = quote.volume,
                "Quote"
            );
        }
        FeedEvent::Packet(Packet::Full(full)) => {
            tracing::info!(
                security_id = full.security_id(),
                ltp = full.last_traded_price,
                oi = full.open_interest,
                "Full"
            );
        }
        FeedEvent::Packet(packet) => {
            tracing::debug!(
                kind = packet.kind(),
                security_id = packet.security_id(),
                "Packet"
            );
        }
        FeedEvent::Disconnected(reason) => {
            tracing::warn!(reason = %reason, "Market feed disconnected");
        }
        FeedEvent::Error(e) => {
            tracing::warn!(error = %e, "Market feed error");
        }
    }
}

/// Log events from the order update client.
async fn handle_order_update_events(mut rx: mpsc::Receiver<OrderUpdateEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            OrderUpdateEvent::Connected => tracing::info!("Order update stream connected"),
            OrderUpdateEvent::Disconnected => tracing::warn!("Order update stream disconnected"),
            OrderUpdateEvent::Reconnecting { attempt } => {
                tracing::info!(attempt, "Order update stream reconnecting");
            }
            OrderUpdateEvent::OrderUpdate(update) => {
                tracing::info!(
                    message_type = %update.message_type,
                    order_no = ?update.data.order_no,
                    status = ?update.data.status,
                    "Order update"
                );
            }
            OrderUpdateEvent::Error(msg) => tracing::error!(error = %msg, "Order update error"),
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &FeedConfig) {
    tracing::info!(
        client_id = config.credentials.client_id(),
        instruments = config.instruments.len(),
        order_updates = config.order_updates,
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        feed_url = %config.feed_url,
        order_update_url = %config.order_update_url,
        "WebSocket endpoints"
    );
}

/// Load .env file from the current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT), or for a component to
/// request shutdown.
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::info!("Shutdown requested");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
