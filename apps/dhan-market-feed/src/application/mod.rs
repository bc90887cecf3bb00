//! Application Layer - Consumer-facing ports and event dispatch.
//!
//! This layer defines what a feed consumer sees (events, the handler trait,
//! the error taxonomy) and the dispatcher that delivers events to it.

/// Consumer-facing contracts: handler trait, events and errors.
pub mod ports;

/// Event dispatch to the registered handler.
pub mod services;
