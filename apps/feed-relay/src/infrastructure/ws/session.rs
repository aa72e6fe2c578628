//! Session Lifecycle
//!
//! One task per client connection, owning both halves of the WebSocket.
//! The task services four event sources in a single select loop: forced
//! closure, queued fan-out frames, the heartbeat timer, and inbound
//! control frames. Handlers do not run concurrently with each other, so
//! registry mutations from one session are naturally serialized.
//!
//! Error and snapshot frames are written directly to the transport
//! rather than queued, so a snapshot always precedes the live frames
//! that accumulate in the queue while it is being fetched.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ChannelGateway, SnapshotStore};
use crate::domain::catalog::MarketCatalog;
use crate::domain::channel::{ChannelName, FeedKind};
use crate::domain::registry::{FanoutRegistry, SessionHandle, SessionId, SubscribeOutcome};

use super::protocol::{ControlDecision, classify, data_frame, error_frame, heartbeat_frame};

// =============================================================================
// Configuration and Context
// =============================================================================

/// Per-session tunables.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Period of the liveness frame.
    pub heartbeat_period: Duration,
    /// Capacity of the outbound frame queue.
    pub frame_buffer: usize,
    /// Whether a failed broker subscribe removes the local registry
    /// entry. Off by default: the entry is retained and heals on the
    /// next broker reconnect.
    pub rollback_on_subscribe_failure: bool,
}

/// Shared collaborators handed to every session task.
pub struct SessionContext {
    /// The fan-out registry.
    pub registry: Arc<FanoutRegistry>,
    /// Market symbol resolution.
    pub catalog: Arc<MarketCatalog>,
    /// The upstream broker gateway.
    pub gateway: Arc<dyn ChannelGateway>,
    /// Snapshot replay source.
    pub snapshots: Arc<dyn SnapshotStore>,
    /// Per-session tunables.
    pub config: SessionConfig,
}

/// Whether the select loop keeps running after a control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Continue,
    Close,
}

/// Outcome of a guarded transport write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOutcome {
    Sent,
    /// The transport failed or the peer went away.
    Failed,
    /// The session was cancelled while the write was blocked.
    Cancelled,
}

/// Write one frame, racing the send against forced closure.
///
/// A peer that stops reading stalls the transport once the kernel
/// buffers fill; without the race, a force-closed session would sit in
/// the blocked send and never observe its token.
async fn write_guarded<S>(cancel: &CancellationToken, out: &mut S, msg: Message) -> WriteOutcome
where
    S: Sink<Message> + Unpin,
{
    tokio::select! {
        () = cancel.cancelled() => WriteOutcome::Cancelled,
        sent = out.send(msg) => {
            if sent.is_ok() {
                WriteOutcome::Sent
            } else {
                WriteOutcome::Failed
            }
        }
    }
}

// =============================================================================
// Session Task
// =============================================================================

/// Run one client session to completion.
///
/// `cancel` doubles as the forced-close signal: the backpressure monitor
/// cancels it for this session alone, and service shutdown cancels its
/// parent.
pub async fn run_session(
    ctx: Arc<SessionContext>,
    socket: WebSocket,
    session: SessionId,
    cancel: CancellationToken,
) {
    let (frame_tx, mut frame_rx) = mpsc::channel(ctx.config.frame_buffer);
    ctx.registry
        .register_session(SessionHandle::new(session, frame_tx, cancel.clone()));

    metrics::gauge!("feed_relay_active_sessions").increment(1.0);
    metrics::counter!("feed_relay_sessions_total").increment(1);
    tracing::info!(session, "session established");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + ctx.config.heartbeat_period,
        ctx.config.heartbeat_period,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // Cancellation first, so a write interrupted by forced
            // closure always breaks on the next iteration.
            biased;

            // Forced closure by the backpressure monitor. No explanatory
            // frame; closure itself is the signal.
            () = cancel.cancelled() => {
                metrics::counter!("feed_relay_forced_closes_total", "reason" => "backpressure")
                    .increment(1);
                tracing::info!(session, "session force-closed");
                break;
            }
            frame = frame_rx.recv() => {
                match frame {
                    Some(frame) => {
                        let msg = Message::Text(frame.into());
                        if write_guarded(&cancel, &mut ws_tx, msg).await == WriteOutcome::Failed {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = heartbeat.tick() => {
                let msg = Message::Text(heartbeat_frame().into());
                if write_guarded(&cancel, &mut ws_tx, msg).await == WriteOutcome::Failed {
                    break;
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let disposition =
                            handle_control(&ctx, session, text.as_str(), &mut ws_tx, &cancel)
                                .await;
                        if disposition == Disposition::Close {
                            metrics::counter!(
                                "feed_relay_forced_closes_total",
                                "reason" => "protocol_violation"
                            )
                            .increment(1);
                            break;
                        }
                    }
                    // Binary control frames are undecodable with no
                    // salvageable channel hint.
                    Some(Ok(Message::Binary(_))) => {
                        reject_and_close(&mut ws_tx, "binary frames are not supported", &cancel)
                            .await;
                        metrics::counter!(
                            "feed_relay_forced_closes_total",
                            "reason" => "protocol_violation"
                        )
                        .increment(1);
                        break;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Ping/pong are answered by the transport layer.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(session, error = %e, "transport error");
                        break;
                    }
                }
            }
        }
    }

    teardown(&ctx, session).await;
}

/// Release everything the session holds: registry membership, broker
/// subscriptions that it was the last subscriber of, and the session
/// gauge.
async fn teardown(ctx: &SessionContext, session: SessionId) {
    let emptied = ctx.registry.remove_session(session);
    for channel in emptied {
        if let Err(e) = ctx.gateway.unsubscribe(&channel).await {
            tracing::warn!(session, channel = %channel, error = %e,
                "broker unsubscribe failed during teardown");
        }
    }
    metrics::gauge!("feed_relay_active_sessions").decrement(1.0);
    tracing::info!(session, "session closed");
}

// =============================================================================
// Control Frame Handling
// =============================================================================

async fn handle_control<S>(
    ctx: &SessionContext,
    session: SessionId,
    text: &str,
    out: &mut S,
    cancel: &CancellationToken,
) -> Disposition
where
    S: Sink<Message> + Unpin,
{
    match classify(text, &ctx.catalog) {
        ControlDecision::Subscribe {
            channel,
            kind,
            raw_channel,
        } => {
            handle_subscribe(ctx, session, channel, kind, &raw_channel, out, cancel).await;
            Disposition::Continue
        }
        ControlDecision::Unsubscribe {
            channel,
            raw_channel,
        } => {
            handle_unsubscribe(ctx, session, &channel, &raw_channel, out, cancel).await;
            Disposition::Continue
        }
        ControlDecision::Ignore => Disposition::Continue,
        ControlDecision::Reject {
            hint: Some(hint),
            reason,
        } => {
            metrics::counter!("feed_relay_invalid_requests_total").increment(1);
            tracing::debug!(session, hint, reason, "rejected control frame");
            let msg = Message::Text(error_frame(Some(&hint), &reason).into());
            write_guarded(cancel, out, msg).await;
            Disposition::Continue
        }
        ControlDecision::Reject { hint: None, reason } => {
            tracing::debug!(session, reason, "protocol violation");
            reject_and_close(out, &reason, cancel).await;
            Disposition::Close
        }
    }
}

async fn handle_subscribe<S>(
    ctx: &SessionContext,
    session: SessionId,
    channel: ChannelName,
    kind: FeedKind,
    raw_channel: &str,
    out: &mut S,
    cancel: &CancellationToken,
) where
    S: Sink<Message> + Unpin,
{
    let outcome = ctx.registry.subscribe(session, channel.clone());
    if outcome == SubscribeOutcome::SessionGone {
        return;
    }

    if outcome == SubscribeOutcome::FirstSubscriber {
        if let Err(e) = ctx.gateway.subscribe(&channel).await {
            tracing::warn!(session, channel = %channel, error = %e, "broker subscribe failed");
            let msg = Message::Text(
                error_frame(Some(raw_channel), &format!("subscribe failed: {e}")).into(),
            );
            write_guarded(cancel, out, msg).await;
            if ctx.config.rollback_on_subscribe_failure {
                ctx.registry.unsubscribe(session, channel.as_str());
            }
            return;
        }
    }

    if kind.is_snapshot_class() {
        replay_snapshot(ctx, session, &channel, out, cancel).await;
    }
}

/// Best-effort replay of the channel's cached last value. A miss, and
/// even a store failure, degrade to "live updates only".
async fn replay_snapshot<S>(
    ctx: &SessionContext,
    session: SessionId,
    channel: &ChannelName,
    out: &mut S,
    cancel: &CancellationToken,
) where
    S: Sink<Message> + Unpin,
{
    let key = channel.snapshot_key();
    match ctx.snapshots.get(&key).await {
        Ok(Some(payload)) => {
            metrics::counter!("feed_relay_snapshots_replayed_total").increment(1);
            let msg = Message::Text(data_frame(&key, &payload).into());
            write_guarded(cancel, out, msg).await;
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(session, channel = %channel, error = %e, "snapshot fetch failed");
        }
    }
}

async fn handle_unsubscribe<S>(
    ctx: &SessionContext,
    session: SessionId,
    channel: &ChannelName,
    raw_channel: &str,
    out: &mut S,
    cancel: &CancellationToken,
) where
    S: Sink<Message> + Unpin,
{
    if ctx.registry.unsubscribe(session, channel.as_str())
        && let Err(e) = ctx.gateway.unsubscribe(channel).await
    {
        tracing::warn!(session, channel = %channel, error = %e, "broker unsubscribe failed");
        let msg = Message::Text(
            error_frame(Some(raw_channel), &format!("unsubscribe failed: {e}")).into(),
        );
        write_guarded(cancel, out, msg).await;
    }
}

async fn reject_and_close<S>(out: &mut S, reason: &str, cancel: &CancellationToken)
where
    S: Sink<Message> + Unpin,
{
    let msg = Message::Text(error_frame(None, reason).into());
    if write_guarded(cancel, out, msg).await != WriteOutcome::Sent {
        return;
    }
    let close = Message::Close(Some(CloseFrame {
        code: close_code::PROTOCOL,
        reason: "protocol violation".into(),
    }));
    write_guarded(cancel, out, close).await;
}

// =============================================================================
// Tests
// =============================================================================
