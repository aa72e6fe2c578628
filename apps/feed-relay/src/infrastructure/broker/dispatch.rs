//! Fan-out Dispatcher
//!
//! Single task consuming broker events in arrival order and delivering
//! data frames to every subscribed session. One consumer on one ordered
//! channel is what preserves per-channel delivery order end to end.
//!
//! Delivery to a session never blocks: sessions already over the
//! backlog threshold are skipped, and otherwise the frame is queued
//! with `try_send` and dropped for that session if its buffer is full.
//! Slow consumers are closed by the backpressure monitor, not here.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::domain::registry::FanoutRegistry;
use crate::infrastructure::ws::protocol::data_frame;

use super::BrokerEvent;

/// Consume broker events until the bridge side closes the channel.
pub async fn run_dispatch(
    mut event_rx: mpsc::Receiver<BrokerEvent>,
    registry: Arc<FanoutRegistry>,
    backlog_threshold: usize,
) {
    while let Some(event) = event_rx.recv().await {
        match event {
            BrokerEvent::Message { channel, payload } => {
                fan_out(&registry, &channel, &payload, backlog_threshold);
            }
            BrokerEvent::Connected => {
                tracing::debug!("dispatcher observed broker connect");
            }
            BrokerEvent::Disconnected | BrokerEvent::Reconnecting { .. } => {
                tracing::debug!("dispatcher observed broker disconnect");
            }
        }
    }
    tracing::info!("dispatcher stopped: event channel closed");
}

/// Deliver one payload to every current subscriber of a channel.
///
/// The frame is serialized once and cloned per subscriber. Sessions
/// already marked for closure or already over the backlog threshold are
/// skipped; a full buffer drops the frame for that session.
pub fn fan_out(registry: &FanoutRegistry, channel: &str, payload: &str, backlog_threshold: usize) {
    let subscribers = registry.subscribers(channel);
    if subscribers.is_empty() {
        // Races with the last unsubscribe; the broker-side unsubscribe is
        // in flight.
        tracing::debug!(channel, "message on channel with no subscribers");
        return;
    }

    let frame = data_frame(channel, payload);
    for handle in subscribers {
        if handle.is_closed() {
            continue;
        }
        if handle.backlog() > backlog_threshold {
            metrics::counter!("feed_relay_messages_dropped_total").increment(1);
            continue;
        }
        if handle.push(frame.clone()) {
            metrics::counter!("feed_relay_messages_relayed_total").increment(1);
        } else {
            metrics::counter!("feed_relay_messages_dropped_total").increment(1);
            tracing::debug!(channel, session = handle.id(), "frame dropped: buffer full");
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use crate::domain::channel::{ChannelName, FeedKind, MarketType};
    use crate::domain::registry::SessionHandle;

    use super::*;

    fn registry_with_session(
        id: u64,
        buffer: usize,
    ) -> (Arc<FanoutRegistry>, mpsc::Receiver<String>) {
        let registry = Arc::new(FanoutRegistry::new());
        let (tx, rx) = mpsc::channel(buffer);
        registry.register_session(SessionHandle::new(id, tx, CancellationToken::new()));
        registry.subscribe(id, ChannelName::new(FeedKind::Trades, MarketType::Perp, 0));
        (registry, rx)
    }

    #[tokio::test]
    async fn delivers_to_subscriber() {
        let (registry, mut rx) = registry_with_session(1, 8);

        fan_out(&registry, "trades_perp_0", r#"{"px":"1.5"}"#, 64);

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame, r#"{"channel":"trades_perp_0","data":{"px":"1.5"}}"#);
    }

    #[tokio::test]
    async fn non_subscriber_receives_nothing() {
        let (registry, _rx) = registry_with_session(1, 8);
        let (tx, mut other_rx) = mpsc::channel(8);
        registry.register_session(SessionHandle::new(2, tx, CancellationToken::new()));

        fan_out(&registry, "trades_perp_0", "{}", 64);

        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_channel_is_dropped() {
        let (registry, mut rx) = registry_with_session(1, 8);

        fan_out(&registry, "trades_perp_9", "{}", 64);

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_buffer_drops_without_closing() {
        let (registry, _rx) = registry_with_session(1, 1);

        fan_out(&registry, "trades_perp_0", "{}", 64);
        // Buffer of one is now full; this frame is dropped for the session.
        fan_out(&registry, "trades_perp_0", "{}", 64);

        let handle = &registry.subscribers("trades_perp_0")[0];
        assert_eq!(handle.backlog(), 1);
        assert!(!handle.is_closed());
    }

    #[tokio::test]
    async fn session_over_threshold_is_skipped() {
        let (registry, _rx) = registry_with_session(1, 8);

        fan_out(&registry, "trades_perp_0", "{}", 1);
        fan_out(&registry, "trades_perp_0", "{}", 1);
        // Backlog is now two, over the threshold of one.
        fan_out(&registry, "trades_perp_0", "{}", 1);

        let handle = &registry.subscribers("trades_perp_0")[0];
        assert_eq!(handle.backlog(), 2);
        assert!(!handle.is_closed());
    }

    #[tokio::test]
    async fn closed_session_is_skipped() {
        let (registry, mut rx) = registry_with_session(1, 8);
        registry.subscribers("trades_perp_0")[0].force_close();

        fan_out(&registry, "trades_perp_0", "{}", 64);

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dispatch_preserves_arrival_order() {
        let (registry, mut rx) = registry_with_session(1, 8);
        let (event_tx, event_rx) = mpsc::channel(8);

        let task = tokio::spawn(run_dispatch(event_rx, Arc::clone(&registry), 64));

        for i in 0..3 {
            event_tx
                .send(BrokerEvent::Message {
                    channel: "trades_perp_0".to_string(),
                    payload: format!(r#"{{"seq":{i}}}"#),
                })
                .await
                .unwrap();
        }
        drop(event_tx);
        task.await.unwrap();

        for i in 0..3 {
            let frame = rx.recv().await.unwrap();
            assert!(frame.contains(&format!(r#"{{"seq":{i}}}"#)), "frame {frame}");
        }
    }
}
