//! Domain Layer - Channel naming and fan-out bookkeeping.
//!
//! This layer contains the core relay state with no external I/O. All
//! types here are pure Rust; the only runtime dependency is the channel
//! primitives carried inside session handles.

/// Canonical channel naming and feed classification.
pub mod channel;

/// Symbol to market-index resolution.
pub mod catalog;

/// Channel-to-session subscription bookkeeping.
pub mod registry;
