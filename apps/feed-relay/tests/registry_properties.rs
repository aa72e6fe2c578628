//! Registry Property Tests
//!
//! Exercises the subscription bookkeeping invariants: restore-on-
//! unsubscribe, exactly-once empty/non-empty transitions under
//! interleaving, and sweep-set deduplication.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use feed_relay::{
    ChannelName, FanoutRegistry, FeedKind, MarketType, SessionHandle, SubscribeOutcome,
};

fn registry_with_sessions(ids: &[u64]) -> (Arc<FanoutRegistry>, Vec<mpsc::Receiver<String>>) {
    let registry = Arc::new(FanoutRegistry::new());
    let mut receivers = Vec::new();
    for &id in ids {
        let (tx, rx) = mpsc::channel(16);
        registry.register_session(SessionHandle::new(id, tx, CancellationToken::new()));
        receivers.push(rx);
    }
    (registry, receivers)
}

fn all_channels() -> Vec<ChannelName> {
    let mut channels = Vec::new();
    for kind in [FeedKind::Trades, FeedKind::Orderbook] {
        for market_type in [MarketType::Spot, MarketType::Perp] {
            for index in 0..3 {
                channels.push(ChannelName::new(kind, market_type, index));
            }
        }
    }
    channels
}

#[test]
fn subscribe_then_unsubscribe_restores_prior_state_for_every_channel() {
    let (registry, _rx) = registry_with_sessions(&[1]);

    for channel in all_channels() {
        assert_eq!(
            registry.subscribe(1, channel.clone()),
            SubscribeOutcome::FirstSubscriber,
            "channel {channel}"
        );
        assert!(
            registry.unsubscribe(1, channel.as_str()),
            "channel {channel}"
        );
        assert_eq!(registry.channel_count(), 0, "leaked entry for {channel}");
        assert!(registry.subscribers(channel.as_str()).is_empty());
    }

    assert_eq!(registry.session_count(), 1);
}

#[test]
fn broker_transitions_fire_exactly_once_per_boundary() {
    let (registry, _rx) = registry_with_sessions(&[1, 2, 3]);
    let channel = ChannelName::new(FeedKind::Orderbook, MarketType::Spot, 1);

    // Three sessions join in sequence; only the first crosses the
    // empty -> non-empty boundary.
    let outcomes = [
        registry.subscribe(1, channel.clone()),
        registry.subscribe(2, channel.clone()),
        registry.subscribe(3, channel.clone()),
    ];
    let first_count = outcomes
        .iter()
        .filter(|o| **o == SubscribeOutcome::FirstSubscriber)
        .count();
    assert_eq!(first_count, 1);

    // Duplicate subscribes never look like a boundary crossing.
    assert_eq!(
        registry.subscribe(2, channel.clone()),
        SubscribeOutcome::AlreadySubscribed
    );

    // Leaving in any order: only the last one empties the set.
    let emptied = [
        registry.unsubscribe(3, channel.as_str()),
        registry.unsubscribe(1, channel.as_str()),
        registry.unsubscribe(2, channel.as_str()),
    ];
    assert_eq!(emptied.iter().filter(|e| **e).count(), 1);
    assert!(emptied[2], "the final unsubscribe crosses the boundary");
    assert_eq!(registry.channel_count(), 0);
}

#[test]
fn reentry_after_empty_is_a_fresh_first_subscriber() {
    let (registry, _rx) = registry_with_sessions(&[1, 2]);
    let channel = ChannelName::new(FeedKind::Trades, MarketType::Perp, 0);

    registry.subscribe(1, channel.clone());
    registry.unsubscribe(1, channel.as_str());

    assert_eq!(
        registry.subscribe(2, channel.clone()),
        SubscribeOutcome::FirstSubscriber
    );
}

#[test]
fn disconnect_of_one_subscriber_keeps_shared_entries_alive() {
    let (registry, _rx) = registry_with_sessions(&[1, 2]);
    let shared = ChannelName::new(FeedKind::Orderbook, MarketType::Spot, 1);

    registry.subscribe(1, shared.clone());
    registry.subscribe(2, shared.clone());

    // Session 1 disconnects; the shared entry persists and no broker
    // unsubscribe is due.
    let emptied = registry.remove_session(1);
    assert!(emptied.is_empty());
    assert_eq!(registry.subscribers(shared.as_str()).len(), 1);
}

#[test]
fn remove_session_reports_every_channel_it_emptied() {
    let (registry, _rx) = registry_with_sessions(&[1, 2]);

    let solo_a = ChannelName::new(FeedKind::Trades, MarketType::Spot, 0);
    let solo_b = ChannelName::new(FeedKind::Orderbook, MarketType::Perp, 2);
    let shared = ChannelName::new(FeedKind::Trades, MarketType::Perp, 1);

    registry.subscribe(1, solo_a.clone());
    registry.subscribe(1, solo_b.clone());
    registry.subscribe(1, shared.clone());
    registry.subscribe(2, shared.clone());

    let mut emptied = registry.remove_session(1);
    emptied.sort();
    let mut expected = vec![solo_a, solo_b];
    expected.sort();
    assert_eq!(emptied, expected);
    assert_eq!(registry.channel_count(), 1);
}

#[test]
fn sweep_set_evaluates_each_session_once() {
    let (registry, _rx) = registry_with_sessions(&[1, 2, 3]);

    // Session 1 subscribes to five channels, session 2 to one, session 3
    // to none.
    for index in 0..5 {
        registry.subscribe(1, ChannelName::new(FeedKind::Trades, MarketType::Perp, index));
    }
    registry.subscribe(2, ChannelName::new(FeedKind::Trades, MarketType::Perp, 0));

    let swept = registry.subscribed_sessions();
    let mut ids: Vec<_> = swept.iter().map(SessionHandle::id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2]);
}

#[test]
fn interleaved_sessions_across_channels_stay_independent() {
    let (registry, _rx) = registry_with_sessions(&[1, 2]);
    let trades = ChannelName::new(FeedKind::Trades, MarketType::Perp, 0);
    let orderbook = ChannelName::new(FeedKind::Orderbook, MarketType::Perp, 0);

    registry.subscribe(1, trades.clone());
    registry.subscribe(2, orderbook.clone());
    registry.subscribe(1, orderbook.clone());

    assert!(registry.unsubscribe(1, trades.as_str()));
    assert!(!registry.unsubscribe(1, orderbook.as_str()));
    assert!(registry.is_subscribed(2, orderbook.as_str()));
    assert_eq!(registry.channel_count(), 1);
}
