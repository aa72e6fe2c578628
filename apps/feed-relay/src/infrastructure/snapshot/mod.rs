//! Snapshot Store
//!
//! Redis-backed implementation of the [`SnapshotStore`] port. The broker
//! side caches the last payload of each snapshot-class channel under a
//! `last_update_<channel>` key; this adapter only ever reads those keys,
//! on the shared multiplexed connection.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use crate::application::ports::{SnapshotError, SnapshotStore};

/// Read-only snapshot fetcher over a multiplexed redis connection.
///
/// The connection is cheap to clone and reconnects internally, so one
/// store instance is shared across all session tasks.
#[derive(Debug, Clone)]
pub struct RedisSnapshotStore {
    connection: MultiplexedConnection,
}

impl RedisSnapshotStore {
    /// Connect to the snapshot store.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the initial connection
    /// fails.
    pub async fn connect(url: &str) -> Result<Self, SnapshotError> {
        let client = redis::Client::open(url).map_err(|e| SnapshotError(e.to_string()))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| SnapshotError(e.to_string()))?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl SnapshotStore for RedisSnapshotStore {
    async fn get(&self, key: &str) -> Result<Option<String>, SnapshotError> {
        let mut connection = self.connection.clone();
        connection
            .get(key)
            .await
            .map_err(|e| SnapshotError(e.to_string()))
    }
}
