//! Feed Configuration Settings
//!
//! Configuration types for the market feed client, loaded from environment
//! variables.

use std::time::Duration;

use crate::domain::instrument::Instrument;

/// Production market feed endpoint.
pub const DEFAULT_FEED_URL: &str = "wss://api-feed.dhan.co";

/// Production order update endpoint.
pub const DEFAULT_ORDER_UPDATE_URL: &str = "wss://api-order-update.dhan.co";

/// Market feed protocol version.
pub const FEED_API_VERSION: u8 = 2;

/// Authentication type for token-based access.
pub const FEED_AUTH_TYPE: u8 = 2;

/// Dhan account credentials.
#[derive(Clone)]
pub struct Credentials {
    client_id: String,
    access_token: String,
}

impl Credentials {
    /// Create new credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if either value is empty.
    pub fn new(
        client_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let client_id = client_id.into();
        let access_token = access_token.into();

        if client_id.is_empty() {
            return Err(ConfigError::EmptyValue("DHAN_CLIENT_ID".to_string()));
        }
        if access_token.is_empty() {
            return Err(ConfigError::EmptyValue("DHAN_ACCESS_TOKEN".to_string()));
        }

        Ok(Self {
            client_id,
            access_token,
        })
    }

    /// Get the client id.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Get the access token.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Upper bound on the opening handshake.
    pub handshake_timeout: Duration,
    /// Keepalive ping interval.
    pub heartbeat_interval: Duration,
    /// Time without a pong before the session is considered dead.
    pub heartbeat_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Jitter fraction applied to each delay.
    pub reconnect_jitter: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(30),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            reconnect_jitter: 0.1,
            max_reconnect_attempts: 10,
        }
    }
}

/// Internal channel capacities.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// Pending outbound frames for the writer task.
    pub outbound_capacity: usize,
    /// Pending events for the dispatch task.
    pub event_capacity: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            event_capacity: 10_000,
        }
    }
}

/// Complete feed configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Account credentials.
    pub credentials: Credentials,
    /// Market feed base URL (without query string).
    pub feed_url: String,
    /// Order update URL.
    pub order_update_url: String,
    /// WebSocket connection settings.
    pub websocket: WebSocketSettings,
    /// Channel capacities.
    pub channels: ChannelSettings,
    /// Instruments to subscribe at startup.
    pub instruments: Vec<Instrument>,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
    /// Whether the binary also streams order updates.
    pub order_updates: bool,
}

impl FeedConfig {
    /// Create configuration with production endpoints and default settings.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            feed_url: DEFAULT_FEED_URL.to_string(),
            order_update_url: DEFAULT_ORDER_UPDATE_URL.to_string(),
            websocket: WebSocketSettings::default(),
            channels: ChannelSettings::default(),
            instruments: Vec::new(),
            metrics_port: 0,
            order_updates: false,
        }
    }

    /// Override the market feed base URL.
    #[must_use]
    pub fn with_feed_url(mut self, url: impl Into<String>) -> Self {
        self.feed_url = url.into();
        self
    }

    /// Override the order update URL.
    #[must_use]
    pub fn with_order_update_url(mut self, url: impl Into<String>) -> Self {
        self.order_update_url = url.into();
        self
    }

    /// Override the WebSocket settings.
    #[must_use]
    pub fn with_websocket(mut self, websocket: WebSocketSettings) -> Self {
        self.websocket = websocket;
        self
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or
    /// `DHAN_FEED_INSTRUMENTS` contains an unparsable entry.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`FeedConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let client_id = lookup("DHAN_CLIENT_ID")
            .ok_or_else(|| ConfigError::MissingEnvVar("DHAN_CLIENT_ID".to_string()))?;

        let access_token = lookup("DHAN_ACCESS_TOKEN")
            .ok_or_else(|| ConfigError::MissingEnvVar("DHAN_ACCESS_TOKEN".to_string()))?;

        let credentials = Credentials::new(client_id, access_token)?;

        let defaults = WebSocketSettings::default();
        let websocket = WebSocketSettings {
            handshake_timeout: parse_env_duration_secs(
                &lookup,
                "DHAN_FEED_HANDSHAKE_TIMEOUT_SECS",
                defaults.handshake_timeout,
            ),
            heartbeat_interval: parse_env_duration_secs(
                &lookup,
                "DHAN_FEED_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            heartbeat_timeout: parse_env_duration_secs(
                &lookup,
                "DHAN_FEED_HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat_timeout,
            ),
            reconnect_delay_initial: parse_env_duration_millis(
                &lookup,
                "DHAN_FEED_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                &lookup,
                "DHAN_FEED_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env(
                &lookup,
                "DHAN_FEED_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            ),
            reconnect_jitter: parse_env(
                &lookup,
                "DHAN_FEED_RECONNECT_JITTER",
                defaults.reconnect_jitter,
            ),
            max_reconnect_attempts: parse_env(
                &lookup,
                "DHAN_FEED_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
        };

        let channel_defaults = ChannelSettings::default();
        let channels = ChannelSettings {
            outbound_capacity: parse_env(
                &lookup,
                "DHAN_FEED_OUTBOUND_CAPACITY",
                channel_defaults.outbound_capacity,
            )
            .max(1),
            event_capacity: parse_env(
                &lookup,
                "DHAN_FEED_EVENT_CAPACITY",
                channel_defaults.event_capacity,
            )
            .max(1),
        };

        let instruments = lookup("DHAN_FEED_INSTRUMENTS")
            .map(|raw| parse_instruments(&raw))
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            credentials,
            feed_url: lookup("DHAN_FEED_URL").unwrap_or_else(|| DEFAULT_FEED_URL.to_string()),
            order_update_url: lookup("DHAN_ORDER_UPDATE_URL")
                .unwrap_or_else(|| DEFAULT_ORDER_UPDATE_URL.to_string()),
            websocket,
            channels,
            instruments,
            metrics_port: parse_env(&lookup, "DHAN_FEED_METRICS_PORT", 0),
            order_updates: parse_env(&lookup, "DHAN_FEED_ORDER_UPDATES", false),
        })
    }

    /// Market feed URL with the authentication query string.
    ///
    /// `<base>/?version=2&token=<token>&clientId=<id>&authType=2`. A base
    /// without a path gets the root path so the request target stays valid.
    #[must_use]
    pub fn feed_connect_url(&self) -> String {
        let base = with_root_path(&self.feed_url);
        let separator = if base.contains('?') { '&' } else { '?' };
        format!(
            "{base}{separator}version={FEED_API_VERSION}&token={}&clientId={}&authType={FEED_AUTH_TYPE}",
            self.credentials.access_token(),
            self.credentials.client_id(),
        )
    }
}

/// Insert `/` after the authority when the URL has no path.
fn with_root_path(url: &str) -> String {
    let authority_start = url.find("://").map_or(0, |i| i + 3);
    let authority_end = url[authority_start..]
        .find(['/', '?', '#'])
        .map_or(url.len(), |i| authority_start + i);

    if url[authority_end..].starts_with('/') {
        url.to_string()
    } else {
        format!("{}/{}", &url[..authority_end], &url[authority_end..])
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Parse failure.
        reason: String,
    },
}

/// Parse a comma-separated `SEGMENT:SECURITY_ID[:TYPE]` list.
fn parse_instruments(raw: &str) -> Result<Vec<Instrument>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Instrument>()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "DHAN_FEED_INSTRUMENTS".to_string(),
                    reason: e.to_string(),
                })
        })
        .collect()
}

fn parse_env<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::domain::instrument::{ExchangeSegment, SubscriptionType};

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn creds() -> Credentials {
        Credentials::new("1000000001", "token-abc").unwrap()
    }

    #[test]
    fn credentials_redacted_debug() {
        let debug = format!("{:?}", creds());
        assert!(debug.contains("1000000001"));
        assert!(!debug.contains("token-abc"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn credentials_reject_empty() {
        assert!(matches!(
            Credentials::new("", "t"),
            Err(ConfigError::EmptyValue(_))
        ));
        assert!(matches!(
            Credentials::new("c", ""),
            Err(ConfigError::EmptyValue(_))
        ));
    }

    #[test]
    fn websocket_settings_defaults() {
        let settings = WebSocketSettings::default();
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(settings.heartbeat_timeout, Duration::from_secs(30));
        assert_eq!(settings.handshake_timeout, Duration::from_secs(10));
        assert_eq!(settings.reconnect_delay_initial, Duration::from_millis(500));
        assert!((settings.reconnect_delay_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(settings.max_reconnect_attempts, 10);
    }

    #[test]
    fn feed_connect_url_carries_auth_query() {
        let config = FeedConfig::new(creds());
        assert_eq!(
            config.feed_connect_url(),
            "wss://api-feed.dhan.co/?version=2&token=token-abc&clientId=1000000001&authType=2"
        );
    }

    #[test]
    fn feed_connect_url_keeps_existing_path() {
        let config = FeedConfig::new(creds()).with_feed_url("ws://127.0.0.1:9001/feed");
        assert!(
            config
                .feed_connect_url()
                .starts_with("ws://127.0.0.1:9001/feed?version=2&")
        );
    }

    #[test]
    fn feed_connect_url_roots_bare_query() {
        let config = FeedConfig::new(creds()).with_feed_url("ws://127.0.0.1:9001?region=in");
        assert!(
            config
                .feed_connect_url()
                .starts_with("ws://127.0.0.1:9001/?region=in&version=2&")
        );
    }

    #[test]
    fn feed_connect_url_appends_to_existing_query() {
        let config = FeedConfig::new(creds()).with_feed_url("ws://127.0.0.1:9000/feed?x=1");
        assert!(
            config
                .feed_connect_url()
                .starts_with("ws://127.0.0.1:9000/feed?x=1&version=2")
        );
    }

    #[test]
    fn from_lookup_requires_credentials() {
        let err = FeedConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "DHAN_CLIENT_ID"));

        let err =
            FeedConfig::from_lookup(lookup_from(&[("DHAN_CLIENT_ID", "1")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "DHAN_ACCESS_TOKEN"));

        let err = FeedConfig::from_lookup(lookup_from(&[
            ("DHAN_CLIENT_ID", "1"),
            ("DHAN_ACCESS_TOKEN", ""),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(_)));
    }

    #[test]
    fn from_lookup_defaults() {
        let config = FeedConfig::from_lookup(lookup_from(&[
            ("DHAN_CLIENT_ID", "1000000001"),
            ("DHAN_ACCESS_TOKEN", "token-abc"),
        ]))
        .unwrap();

        assert_eq!(config.feed_url, DEFAULT_FEED_URL);
        assert_eq!(config.order_update_url, DEFAULT_ORDER_UPDATE_URL);
        assert!(config.instruments.is_empty());
        assert_eq!(config.metrics_port, 0);
        assert!(!config.order_updates);
        assert_eq!(config.channels.outbound_capacity, 256);
    }

    #[test]
    fn from_lookup_overrides() {
        let config = FeedConfig::from_lookup(lookup_from(&[
            ("DHAN_CLIENT_ID", "1000000001"),
            ("DHAN_ACCESS_TOKEN", "token-abc"),
            ("DHAN_FEED_URL", "ws://localhost:9001"),
            ("DHAN_FEED_HEARTBEAT_INTERVAL_SECS", "5"),
            ("DHAN_FEED_RECONNECT_DELAY_INITIAL_MS", "250"),
            ("DHAN_FEED_MAX_RECONNECT_ATTEMPTS", "0"),
            ("DHAN_FEED_OUTBOUND_CAPACITY", "0"),
            ("DHAN_FEED_METRICS_PORT", "9100"),
            ("DHAN_FEED_ORDER_UPDATES", "true"),
            ("DHAN_FEED_INSTRUMENTS", "NSE_EQ:1333, IDX_I:13:quote ,2:52175:full"),
        ]))
        .unwrap();

        assert_eq!(config.feed_url, "ws://localhost:9001");
        assert_eq!(config.websocket.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(
            config.websocket.reconnect_delay_initial,
            Duration::from_millis(250)
        );
        assert_eq!(config.websocket.max_reconnect_attempts, 0);
        assert_eq!(config.channels.outbound_capacity, 1);
        assert_eq!(config.metrics_port, 9100);
        assert!(config.order_updates);

        assert_eq!(config.instruments.len(), 3);
        assert_eq!(config.instruments[0].exchange_segment, ExchangeSegment::NseEquity);
        assert_eq!(config.instruments[1].subscription_type, SubscriptionType::Quote);
        assert_eq!(config.instruments[2].exchange_segment, ExchangeSegment::NseFno);
        assert_eq!(config.instruments[2].subscription_type, SubscriptionType::Full);
    }

    #[test]
    fn from_lookup_ignores_unparsable_tuning() {
        let config = FeedConfig::from_lookup(lookup_from(&[
            ("DHAN_CLIENT_ID", "1"),
            ("DHAN_ACCESS_TOKEN", "t"),
            ("DHAN_FEED_HEARTBEAT_INTERVAL_SECS", "soon"),
        ]))
        .unwrap();

        assert_eq!(config.websocket.heartbeat_interval, Duration::from_secs(10));
    }

    #[test]
    fn from_lookup_rejects_bad_instrument() {
        let err = FeedConfig::from_lookup(lookup_from(&[
            ("DHAN_CLIENT_ID", "1"),
            ("DHAN_ACCESS_TOKEN", "t"),
            ("DHAN_FEED_INSTRUMENTS", "NYSE:AAPL"),
        ]))
        .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
