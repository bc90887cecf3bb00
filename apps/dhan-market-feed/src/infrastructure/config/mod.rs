//! Configuration Module
//!
//! Configuration loading for the feed client and binary.

mod settings;

pub use settings::{
    ChannelSettings, ConfigError, Credentials, DEFAULT_FEED_URL, DEFAULT_ORDER_UPDATE_URL,
    FeedConfig, WebSocketSettings,
};
