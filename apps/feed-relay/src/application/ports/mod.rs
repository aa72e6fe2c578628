//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `ChannelGateway`: Subscribe/unsubscribe the shared upstream broker
//!   connection to a canonical channel
//! - `SnapshotStore`: Fetch the last cached payload of a snapshot-class
//!   channel for replay to a new subscriber

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::channel::ChannelName;

// =============================================================================
// Errors
// =============================================================================

/// Error from the upstream broker gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The broker connection is down; the command could not be delivered.
    #[error("broker gateway unavailable")]
    Unavailable,

    /// The broker rejected or failed the command.
    #[error("broker command failed: {0}")]
    Command(String),
}

/// Error from the snapshot store.
#[derive(Debug, Error)]
#[error("snapshot fetch failed: {0}")]
pub struct SnapshotError(pub String);

// =============================================================================
// Driven Ports
// =============================================================================

/// Outbound port managing the shared broker connection's subscription set.
///
/// Implementations must be idempotent: subscribing an already-subscribed
/// channel or unsubscribing an unknown one succeeds without effect, so
/// callers can reconcile freely after errors.
#[async_trait]
pub trait ChannelGateway: Send + Sync {
    /// Subscribe the shared broker connection to a canonical channel.
    async fn subscribe(&self, channel: &ChannelName) -> Result<(), GatewayError>;

    /// Unsubscribe the shared broker connection from a canonical channel.
    async fn unsubscribe(&self, channel: &ChannelName) -> Result<(), GatewayError>;
}

/// Outbound port fetching the last cached payload for a snapshot key.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Fetch the cached payload under a snapshot key, or `None` if the
    /// key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>, SnapshotError>;
}
