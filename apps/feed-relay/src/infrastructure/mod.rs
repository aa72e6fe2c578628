//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Upstream broker bridge and fan-out dispatcher.
pub mod broker;

/// Snapshot store adapter.
pub mod snapshot;

/// Client-facing WebSocket server and session handling.
pub mod ws;

/// Slow-consumer sweep.
pub mod backpressure;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging initialization.
pub mod telemetry;
