//! Backpressure Monitor
//!
//! Periodic sweep over every session present in any registry entry,
//! force-closing those whose outbound backlog exceeds the threshold.
//! This is the only path that closes a session for slowness; the
//! dispatcher merely drops frames when a buffer is full.
//!
//! The policy is deliberately blunt: it cannot tell a transient burst
//! from a chronically slow reader, and a closed client may reconnect
//! fresh immediately.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::domain::registry::FanoutRegistry;

/// Periodic slow-consumer sweep.
pub struct BackpressureMonitor {
    registry: Arc<FanoutRegistry>,
    threshold: usize,
    period: Duration,
    cancel: CancellationToken,
}

impl BackpressureMonitor {
    /// Create a monitor over the given registry.
    #[must_use]
    pub const fn new(
        registry: Arc<FanoutRegistry>,
        threshold: usize,
        period: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            threshold,
            period,
            cancel,
        }
    }

    /// Run sweeps on a fixed period until cancelled.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.period);
        // The immediate first tick would sweep an empty registry.
        interval.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("backpressure monitor cancelled");
                    return;
                }
                _ = interval.tick() => {
                    let closed = self.sweep();
                    if closed > 0 {
                        tracing::warn!(closed, "closed slow sessions");
                    }
                }
            }
        }
    }

    /// Evaluate each subscribed session once against the threshold,
    /// closing those over it. Returns the number of sessions closed.
    ///
    /// The working set is snapshotted up front, so closures during the
    /// walk cannot disturb it.
    pub fn sweep(&self) -> usize {
        let sessions = self.registry.subscribed_sessions();
        let mut closed = 0;
        for handle in sessions {
            if handle.is_closed() {
                continue;
            }
            let backlog = handle.backlog();
            if backlog > self.threshold {
                tracing::warn!(
                    session = handle.id(),
                    backlog,
                    threshold = self.threshold,
                    "backlog over threshold, closing session"
                );
                handle.force_close();
                closed += 1;
            }
        }
        closed
    }
}
