//! Domain Layer - Core feed types and subscription bookkeeping.
//!
//! Pure Rust types with no I/O: instruments, decoded packets and the
//! subscription registry.

/// Instruments, exchange segments and request codes.
pub mod instrument;

/// Decoded market feed packets.
pub mod packet;

/// Subscription tracking and request batching.
pub mod subscription;
