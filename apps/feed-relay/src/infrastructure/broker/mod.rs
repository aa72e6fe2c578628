//! Broker Bridge
//!
//! Owns the single pub/sub connection to the upstream redis broker and
//! keeps its subscription set in lockstep with the fan-out registry.
//!
//! # Architecture
//!
//! The connection is private to one task. Session tasks drive it through
//! [`BrokerHandle`] (the [`ChannelGateway`] port): each subscribe or
//! unsubscribe is a command with a oneshot acknowledgement, so the caller
//! learns whether the broker accepted it before replying to the client.
//! Inbound broker messages are forwarded in arrival order to the fan-out
//! dispatcher over a bounded channel.
//!
//! On connection loss the bridge reconnects with exponential backoff and
//! replays every channel the registry still holds, so local subscription
//! state is authoritative across broker restarts.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::PubSubSink;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ChannelGateway, GatewayError};
use crate::domain::channel::ChannelName;
use crate::domain::registry::FanoutRegistry;

pub mod dispatch;
pub mod reconnect;
pub mod status;

use reconnect::{Backoff, BackoffConfig};
use status::BrokerStatus;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur in the broker bridge.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Redis connection or command failure.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The pub/sub stream ended without cancellation.
    #[error("broker connection closed")]
    ConnectionClosed,

    /// The dispatcher side of the event channel is gone.
    #[error("event channel closed")]
    EventChannelClosed,
}

// =============================================================================
// Events and Commands
// =============================================================================

/// Events emitted by the broker bridge to the fan-out dispatcher.
#[derive(Debug)]
pub enum BrokerEvent {
    /// Connected and resubscribed.
    Connected,
    /// Connection lost.
    Disconnected,
    /// Reconnecting with backoff.
    Reconnecting {
        /// Reconnection attempt number.
        attempt: u32,
    },
    /// A payload arrived on a subscribed channel.
    Message {
        /// Raw channel name the broker delivered on.
        channel: String,
        /// Payload exactly as published.
        payload: String,
    },
}

enum BrokerCommand {
    Subscribe {
        channel: ChannelName,
        ack: oneshot::Sender<Result<(), GatewayError>>,
    },
    Unsubscribe {
        channel: ChannelName,
        ack: oneshot::Sender<Result<(), GatewayError>>,
    },
}

// =============================================================================
// Gateway Handle
// =============================================================================

/// Clonable handle through which session tasks drive the shared broker
/// connection. Implements the [`ChannelGateway`] port.
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    command_tx: mpsc::Sender<BrokerCommand>,
}

impl BrokerHandle {
    async fn send(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<(), GatewayError>>) -> BrokerCommand,
    ) -> Result<(), GatewayError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.command_tx
            .send(make(ack_tx))
            .await
            .map_err(|_| GatewayError::Unavailable)?;
        ack_rx.await.map_err(|_| GatewayError::Unavailable)?
    }
}

#[async_trait]
impl ChannelGateway for BrokerHandle {
    async fn subscribe(&self, channel: &ChannelName) -> Result<(), GatewayError> {
        self.send(|ack| BrokerCommand::Subscribe {
            channel: channel.clone(),
            ack,
        })
        .await
    }

    async fn unsubscribe(&self, channel: &ChannelName) -> Result<(), GatewayError> {
        self.send(|ack| BrokerCommand::Unsubscribe {
            channel: channel.clone(),
            ack,
        })
        .await
    }
}

// =============================================================================
// Bridge Configuration
// =============================================================================

/// Configuration for the broker bridge.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Redis connection URL.
    pub url: String,
    /// Reconnection backoff settings.
    pub backoff: BackoffConfig,
    /// Capacity of the command channel feeding the bridge.
    pub command_buffer: usize,
}

// =============================================================================
// Broker Bridge
// =============================================================================

/// The task owning the upstream pub/sub connection.
///
/// Runs until cancelled, reconnecting on any failure. Subscription state
/// is never stored here; the registry is the single source of truth and
/// is replayed into the broker after every reconnect.
pub struct BrokerBridge {
    config: BrokerConfig,
    registry: Arc<FanoutRegistry>,
    status: Arc<BrokerStatus>,
    event_tx: mpsc::Sender<BrokerEvent>,
    command_rx: mpsc::Receiver<BrokerCommand>,
    cancel: CancellationToken,
}

impl BrokerBridge {
    /// Create a bridge and the gateway handle that drives it.
    #[must_use]
    pub fn new(
        config: BrokerConfig,
        registry: Arc<FanoutRegistry>,
        status: Arc<BrokerStatus>,
        event_tx: mpsc::Sender<BrokerEvent>,
        cancel: CancellationToken,
    ) -> (Self, BrokerHandle) {
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer);
        let bridge = Self {
            config,
            registry,
            status,
            event_tx,
            command_rx,
            cancel,
        };
        (bridge, BrokerHandle { command_tx })
    }

    /// Run the connection loop until cancelled.
    pub async fn run(mut self) -> Result<(), BrokerError> {
        let mut backoff = Backoff::new(self.config.backoff.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("broker bridge cancelled");
                return Ok(());
            }

            match self.connect_and_run(&mut backoff).await {
                Ok(()) => {
                    tracing::info!("broker connection closed gracefully");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "broker connection error");
                    self.status.set_disconnected(e.to_string());
                    let _ = self.event_tx.send(BrokerEvent::Disconnected).await;

                    let delay = backoff.next_delay();
                    let attempt = backoff.attempt();
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        "reconnecting to broker"
                    );
                    self.status.set_reconnecting(attempt);
                    metrics::counter!("feed_relay_broker_reconnects_total").increment(1);
                    let _ = self
                        .event_tx
                        .send(BrokerEvent::Reconnecting { attempt })
                        .await;

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("broker bridge cancelled during reconnect delay");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Connect, replay registry state, and process commands and messages
    /// until an error or cancellation.
    async fn connect_and_run(&mut self, backoff: &mut Backoff) -> Result<(), BrokerError> {
        tracing::info!(url = %self.config.url, "connecting to broker");

        let client = redis::Client::open(self.config.url.as_str())?;
        let pubsub = client.get_async_pubsub().await?;
        let (mut sink, mut stream) = pubsub.split();

        // Local subscription state is authoritative; replay it before
        // announcing the connection.
        let channels = self.registry.active_channels();
        for channel in &channels {
            sink.subscribe(channel.as_str()).await?;
        }
        if !channels.is_empty() {
            tracing::info!(count = channels.len(), "replayed channel subscriptions");
        }

        self.status.set_connected();
        backoff.reset();
        self.event_tx
            .send(BrokerEvent::Connected)
            .await
            .map_err(|_| BrokerError::EventChannelClosed)?;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    return Ok(());
                }
                command = self.command_rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(&mut sink, command).await?,
                        // All gateway handles dropped; only happens at shutdown.
                        None => return Ok(()),
                    }
                }
                msg = stream.next() => {
                    match msg {
                        Some(msg) => {
                            let channel = msg.get_channel_name().to_string();
                            let payload: String = msg.get_payload()?;
                            self.status.record_message();
                            self.event_tx
                                .send(BrokerEvent::Message { channel, payload })
                                .await
                                .map_err(|_| BrokerError::EventChannelClosed)?;
                        }
                        None => return Err(BrokerError::ConnectionClosed),
                    }
                }
            }
        }
    }

    /// Apply one gateway command to the live connection.
    ///
    /// The redis outcome is acknowledged to the caller either way; a
    /// failed command also tears the connection down, since a sink error
    /// means the link is unusable.
    async fn handle_command(
        &self,
        sink: &mut PubSubSink,
        command: BrokerCommand,
    ) -> Result<(), BrokerError> {
        match command {
            BrokerCommand::Subscribe { channel, ack } => {
                let result = sink.subscribe(channel.as_str()).await;
                match result {
                    Ok(()) => {
                        tracing::debug!(channel = %channel, "broker subscribe");
                        let _ = ack.send(Ok(()));
                        Ok(())
                    }
                    Err(e) => {
                        let _ = ack.send(Err(GatewayError::Command(e.to_string())));
                        Err(BrokerError::Redis(e))
                    }
                }
            }
            BrokerCommand::Unsubscribe { channel, ack } => {
                let result = sink.unsubscribe(channel.as_str()).await;
                match result {
                    Ok(()) => {
                        tracing::debug!(channel = %channel, "broker unsubscribe");
                        let _ = ack.send(Ok(()));
                        Ok(())
                    }
                    Err(e) => {
                        let _ = ack.send(Err(GatewayError::Command(e.to_string())));
                        Err(BrokerError::Redis(e))
                    }
                }
            }
        }
    }
}
