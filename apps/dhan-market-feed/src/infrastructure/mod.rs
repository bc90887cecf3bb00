//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete WebSocket clients plus the configuration, metrics and tracing
//! plumbing around them.

/// Dhan WebSocket clients (market feed, order updates).
pub mod dhan;

/// Configuration loading.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber setup.
pub mod telemetry;
