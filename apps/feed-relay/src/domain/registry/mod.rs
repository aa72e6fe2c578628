//! Fan-out Registry
//!
//! The sole shared mutable state of the relay: the mapping from canonical
//! channel name to the set of sessions currently interested in it, plus
//! the handle needed to push frames to each session.
//!
//! # Design
//!
//! The registry tracks:
//! - Which sessions are subscribed to each canonical channel
//! - The outbound frame sender and cancellation token per session
//!
//! Subscribe/unsubscribe report the empty/non-empty transitions of a
//! channel's subscriber set, so the caller can keep the broker
//! subscription in lockstep: a channel is broker-subscribed if and only
//! if its subscriber set is non-empty.
//!
//! Written by session tasks (subscribe, unsubscribe, teardown), read by
//! the dispatcher on message arrival and by the backpressure monitor.
//! Readers always work on a snapshot taken under the lock, so closures
//! triggered mid-sweep cannot corrupt the set being walked.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::channel::ChannelName;

// =============================================================================
// Session Handle
// =============================================================================

/// Unique identifier for a client session, assigned per accepted connection.
pub type SessionId = u64;

/// Clonable handle to one client session.
///
/// The WebSocket itself is owned by the session task; the registry holds
/// only this handle: a bounded sender feeding the session's outbound
/// queue and a token that force-closes the transport when cancelled.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    frame_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Create a handle for a session's outbound queue.
    #[must_use]
    pub const fn new(
        id: SessionId,
        frame_tx: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            frame_tx,
            cancel,
        }
    }

    /// Get the session identifier.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Outbound frames queued but not yet flushed to the transport.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.frame_tx.max_capacity() - self.frame_tx.capacity()
    }

    /// Queue a pre-serialized frame without blocking.
    ///
    /// Returns `false` if the session's buffer is full or the session is
    /// gone; the frame is dropped for this session, no retry.
    pub fn push(&self, frame: String) -> bool {
        self.frame_tx.try_send(frame).is_ok()
    }

    /// Force-close the session's transport. No explanatory frame is sent;
    /// closure itself is the signal.
    pub fn force_close(&self) {
        self.cancel.cancel();
    }

    /// Whether the session has been closed or marked for closure.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Result of adding a session to a channel's subscriber set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// The set transitioned empty -> non-empty; the caller must issue a
    /// broker subscribe for this channel.
    FirstSubscriber,
    /// Added to an already-subscribed channel.
    Added,
    /// The session was already in the set; no state changed.
    AlreadySubscribed,
    /// The session is no longer registered; nothing changed.
    SessionGone,
}

#[derive(Debug, Default)]
struct RegistryInner {
    channels: HashMap<ChannelName, HashSet<SessionId>>,
    sessions: HashMap<SessionId, SessionHandle>,
}

/// Mapping from canonical channel to current subscriber set.
///
/// # Example
///
/// ```rust
/// use feed_relay::domain::channel::{ChannelName, FeedKind, MarketType};
/// use feed_relay::domain::registry::{FanoutRegistry, SessionHandle, SubscribeOutcome};
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
///
/// let registry = FanoutRegistry::new();
/// let (tx, _rx) = mpsc::channel(8);
/// registry.register_session(SessionHandle::new(1, tx, CancellationToken::new()));
///
/// let channel = ChannelName::new(FeedKind::Trades, MarketType::Perp, 0);
/// let outcome = registry.subscribe(1, channel.clone());
/// assert_eq!(outcome, SubscribeOutcome::FirstSubscriber);
///
/// // Last subscriber leaving empties and deletes the entry.
/// assert!(registry.unsubscribe(1, channel.as_str()));
/// ```
#[derive(Debug, Default)]
pub struct FanoutRegistry {
    inner: RwLock<RegistryInner>,
}

impl FanoutRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly accepted session.
    pub fn register_session(&self, handle: SessionHandle) {
        let mut inner = self.inner.write();
        inner.sessions.insert(handle.id(), handle);
    }

    /// Add a session to a channel's subscriber set, creating the entry on
    /// first subscriber. Idempotent per session.
    pub fn subscribe(&self, session: SessionId, channel: ChannelName) -> SubscribeOutcome {
        let mut inner = self.inner.write();
        if !inner.sessions.contains_key(&session) {
            return SubscribeOutcome::SessionGone;
        }

        let set = inner.channels.entry(channel).or_default();
        let first = set.is_empty();
        if !set.insert(session) {
            return SubscribeOutcome::AlreadySubscribed;
        }
        if first {
            SubscribeOutcome::FirstSubscriber
        } else {
            SubscribeOutcome::Added
        }
    }

    /// Remove a session from a channel's subscriber set.
    ///
    /// Returns `true` if the set transitioned non-empty -> empty (the
    /// entry is deleted and the caller must issue a broker unsubscribe).
    /// Removing a session that is not subscribed is a no-op.
    pub fn unsubscribe(&self, session: SessionId, channel: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(set) = inner.channels.get_mut(channel) else {
            return false;
        };
        if !set.remove(&session) {
            return false;
        }
        if set.is_empty() {
            inner.channels.remove(channel);
            return true;
        }
        false
    }

    /// Remove a session entirely: from the session table and from every
    /// channel set it belongs to.
    ///
    /// Returns the channels whose sets became empty; their entries are
    /// deleted and the caller must issue broker unsubscribes for them.
    pub fn remove_session(&self, session: SessionId) -> Vec<ChannelName> {
        let mut inner = self.inner.write();
        inner.sessions.remove(&session);

        let mut emptied = Vec::new();
        inner.channels.retain(|channel, set| {
            if set.remove(&session) && set.is_empty() {
                emptied.push(channel.clone());
                return false;
            }
            true
        });
        emptied
    }

    /// Current subscribers of a channel, by raw channel string.
    ///
    /// Returns clones of the session handles so delivery happens outside
    /// the lock.
    #[must_use]
    pub fn subscribers(&self, channel: &str) -> Vec<SessionHandle> {
        let inner = self.inner.read();
        let Some(set) = inner.channels.get(channel) else {
            return Vec::new();
        };
        set.iter()
            .filter_map(|id| inner.sessions.get(id).cloned())
            .collect()
    }

    /// All channels currently present in the registry. Used to replay
    /// local subscription state after a broker reconnect.
    #[must_use]
    pub fn active_channels(&self) -> Vec<ChannelName> {
        self.inner.read().channels.keys().cloned().collect()
    }

    /// Deduplicated union of all sessions present in any channel entry.
    /// A session subscribed to N channels appears once.
    #[must_use]
    pub fn subscribed_sessions(&self) -> Vec<SessionHandle> {
        let inner = self.inner.read();
        let ids: HashSet<SessionId> = inner.channels.values().flatten().copied().collect();
        ids.iter()
            .filter_map(|id| inner.sessions.get(id).cloned())
            .collect()
    }

    /// Whether a session is currently in a channel's subscriber set.
    #[must_use]
    pub fn is_subscribed(&self, session: SessionId, channel: &str) -> bool {
        self.inner
            .read()
            .channels
            .get(channel)
            .is_some_and(|set| set.contains(&session))
    }

    /// Number of channels with at least one subscriber.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.inner.read().channels.len()
    }

    /// Number of registered sessions, subscribed or not.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.read().sessions.len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::domain::channel::{FeedKind, MarketType};

    use super::*;

    fn handle(id: SessionId) -> SessionHandle {
        let (tx, rx) = mpsc::channel(8);
        // Keep the receiver alive for the duration of the test.
        std::mem::forget(rx);
        SessionHandle::new(id, tx, CancellationToken::new())
    }

    fn channel(index: u16) -> ChannelName {
        ChannelName::new(FeedKind::Trades, MarketType::Perp, index)
    }

    #[test]
    fn first_subscriber_transition() {
        let registry = FanoutRegistry::new();
        registry.register_session(handle(1));

        assert_eq!(
            registry.subscribe(1, channel(0)),
            SubscribeOutcome::FirstSubscriber
        );
        assert!(registry.is_subscribed(1, "trades_perp_0"));
    }

    #[test]
    fn second_subscriber_is_not_first() {
        let registry = FanoutRegistry::new();
        registry.register_session(handle(1));
        registry.register_session(handle(2));

        assert_eq!(
            registry.subscribe(1, channel(0)),
            SubscribeOutcome::FirstSubscriber
        );
        assert_eq!(registry.subscribe(2, channel(0)), SubscribeOutcome::Added);
    }

    #[test]
    fn duplicate_subscribe_is_idempotent() {
        let registry = FanoutRegistry::new();
        registry.register_session(handle(1));

        registry.subscribe(1, channel(0));
        assert_eq!(
            registry.subscribe(1, channel(0)),
            SubscribeOutcome::AlreadySubscribed
        );
        assert_eq!(registry.subscribers("trades_perp_0").len(), 1);
    }

    #[test]
    fn subscribe_unknown_session_is_noop() {
        let registry = FanoutRegistry::new();
        assert_eq!(
            registry.subscribe(99, channel(0)),
            SubscribeOutcome::SessionGone
        );
        assert_eq!(registry.channel_count(), 0);
    }

    #[test]
    fn subscribe_then_unsubscribe_restores_prior_state() {
        let registry = FanoutRegistry::new();
        registry.register_session(handle(1));

        registry.subscribe(1, channel(0));
        assert!(registry.unsubscribe(1, "trades_perp_0"));

        assert_eq!(registry.channel_count(), 0);
        assert!(registry.active_channels().is_empty());
        assert!(registry.subscribers("trades_perp_0").is_empty());
        // The session itself stays registered.
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn last_unsubscribe_empties_exactly_once() {
        let registry = FanoutRegistry::new();
        registry.register_session(handle(1));
        registry.register_session(handle(2));

        registry.subscribe(1, channel(0));
        registry.subscribe(2, channel(0));

        // One of two leaving does not empty the set.
        assert!(!registry.unsubscribe(1, "trades_perp_0"));
        assert_eq!(registry.channel_count(), 1);

        // The last one does.
        assert!(registry.unsubscribe(2, "trades_perp_0"));
        assert_eq!(registry.channel_count(), 0);
    }

    #[test]
    fn unsubscribe_not_subscribed_is_noop() {
        let registry = FanoutRegistry::new();
        registry.register_session(handle(1));
        registry.register_session(handle(2));
        registry.subscribe(1, channel(0));

        assert!(!registry.unsubscribe(2, "trades_perp_0"));
        assert!(!registry.unsubscribe(1, "trades_perp_9"));
        assert_eq!(registry.subscribers("trades_perp_0").len(), 1);
    }

    #[test]
    fn remove_session_reports_emptied_channels() {
        let registry = FanoutRegistry::new();
        registry.register_session(handle(1));
        registry.register_session(handle(2));

        registry.subscribe(1, channel(0));
        registry.subscribe(1, channel(1));
        registry.subscribe(2, channel(1));

        let mut emptied = registry.remove_session(1);
        emptied.sort();
        assert_eq!(emptied, vec![channel(0)]);

        // channel(1) persists with one subscriber; no unsubscribe due.
        assert_eq!(registry.subscribers("trades_perp_1").len(), 1);
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn remove_unknown_session_is_noop() {
        let registry = FanoutRegistry::new();
        registry.register_session(handle(1));
        registry.subscribe(1, channel(0));

        assert!(registry.remove_session(42).is_empty());
        assert_eq!(registry.channel_count(), 1);
    }

    #[test]
    fn subscribed_sessions_deduplicates() {
        let registry = FanoutRegistry::new();
        registry.register_session(handle(1));
        registry.register_session(handle(2));
        registry.register_session(handle(3));

        // Session 1 subscribes to two channels; session 3 to none.
        registry.subscribe(1, channel(0));
        registry.subscribe(1, channel(1));
        registry.subscribe(2, channel(0));

        let swept = registry.subscribed_sessions();
        assert_eq!(swept.len(), 2);
        let mut ids: Vec<_> = swept.iter().map(SessionHandle::id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn backlog_tracks_queued_frames() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = SessionHandle::new(1, tx, CancellationToken::new());

        assert_eq!(handle.backlog(), 0);
        assert!(handle.push("a".to_string()));
        assert!(handle.push("b".to_string()));
        assert_eq!(handle.backlog(), 2);

        rx.try_recv().ok();
        assert_eq!(handle.backlog(), 1);
    }

    #[test]
    fn push_drops_when_full() {
        let (tx, _rx) = mpsc::channel(2);
        let handle = SessionHandle::new(1, tx, CancellationToken::new());

        assert!(handle.push("a".to_string()));
        assert!(handle.push("b".to_string()));
        assert!(!handle.push("c".to_string()));
        assert_eq!(handle.backlog(), 2);
    }

    #[test]
    fn force_close_marks_session() {
        let (tx, _rx) = mpsc::channel(2);
        let handle = SessionHandle::new(1, tx, CancellationToken::new());

        assert!(!handle.is_closed());
        handle.force_close();
        assert!(handle.is_closed());
    }
}
