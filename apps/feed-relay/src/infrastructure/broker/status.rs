//! Broker Connection Status
//!
//! Shared view of the upstream broker connection, written by the bridge
//! task and read by the health endpoint.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Connection state of the upstream broker link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected and not currently retrying.
    Disconnected,
    /// Connected and subscribed.
    Connected,
    /// Connection lost; retrying with backoff.
    Reconnecting,
}

/// Live status of the broker bridge.
#[derive(Debug)]
pub struct BrokerStatus {
    state: parking_lot::RwLock<ConnectionState>,
    last_connected_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    error_message: parking_lot::RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    messages_received: AtomicU64,
}

impl Default for BrokerStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerStatus {
    /// Create a status record in the disconnected state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: parking_lot::RwLock::new(ConnectionState::Disconnected),
            last_connected_at: parking_lot::RwLock::new(None),
            error_message: parking_lot::RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            messages_received: AtomicU64::new(0),
        }
    }

    /// Mark the connection established. Clears any error and resets the
    /// reconnect attempt counter.
    pub fn set_connected(&self) {
        *self.state.write() = ConnectionState::Connected;
        *self.last_connected_at.write() = Some(Utc::now());
        *self.error_message.write() = None;
        self.reconnect_attempts.store(0, Ordering::Relaxed);
    }

    /// Mark a reconnection attempt in progress.
    pub fn set_reconnecting(&self, attempt: u32) {
        *self.state.write() = ConnectionState::Reconnecting;
        self.reconnect_attempts.store(attempt, Ordering::Relaxed);
    }

    /// Mark the connection lost with the failure reason.
    pub fn set_disconnected(&self, error: String) {
        *self.state.write() = ConnectionState::Disconnected;
        *self.error_message.write() = Some(error);
    }

    /// Count one message received from the broker.
    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether the broker link is currently up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.state.read() == ConnectionState::Connected
    }

    /// Take a point-in-time snapshot for the health endpoint.
    #[must_use]
    pub fn snapshot(&self) -> BrokerStatusSnapshot {
        BrokerStatusSnapshot {
            state: *self.state.read(),
            last_connected_at: *self.last_connected_at.read(),
            error_message: self.error_message.read().clone(),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
        }
    }
}

/// Serializable point-in-time broker status.
#[derive(Debug, Clone, Serialize)]
pub struct BrokerStatusSnapshot {
    /// Current connection state.
    pub state: ConnectionState,
    /// When the connection was last established.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last failure reason, cleared on reconnect.
    pub error_message: Option<String>,
    /// Attempts since the connection was last up.
    pub reconnect_attempts: u32,
    /// Messages received from the broker since startup.
    pub messages_received: u64,
}
