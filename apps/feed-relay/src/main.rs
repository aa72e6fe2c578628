//! Feed Relay Binary
//!
//! Starts the market data fan-out relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin feed-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `RELAY_REDIS_URL`: Upstream broker / snapshot store URL
//!
//! ## Optional
//! - `RELAY_WS_PORT`: WebSocket listen port (default: 8900)
//! - `RELAY_HEALTH_PORT`: Health check HTTP port (default: 8901)
//! - `RELAY_SPOT_MARKETS`: Comma-separated spot symbols, index by position
//! - `RELAY_PERP_MARKETS`: Comma-separated perp symbols, index by position
//! - `RELAY_HEARTBEAT_PERIOD_SECS`: Liveness frame period (default: 5)
//! - `RELAY_SWEEP_PERIOD_SECS`: Backpressure sweep period (default: 10)
//! - `RELAY_BACKLOG_THRESHOLD`: Frames queued before a session is closed (default: 50)
//! - `RELAY_SESSION_BUFFER`: Per-session outbound queue capacity (default: 64)
//! - `RELAY_SUBSCRIBE_ROLLBACK`: Roll back registry entries on failed broker subscribe (default: false)
//! - `RELAY_RESTART_DELAY_SECS`: Supervisor restart delay (default: 5)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use feed_relay::infrastructure::backpressure::BackpressureMonitor;
use feed_relay::infrastructure::broker::dispatch::run_dispatch;
use feed_relay::infrastructure::snapshot::RedisSnapshotStore;
use feed_relay::infrastructure::telemetry;
use feed_relay::infrastructure::ws::WsServer;
use feed_relay::infrastructure::ws::session::{SessionConfig, SessionContext};
use feed_relay::{
    BrokerBridge, BrokerConfig, BrokerStatus, FanoutRegistry, HealthServer, HealthServerState,
    MarketCatalog, RelayConfig, init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init();

    tracing::info!("starting feed relay");

    let _metrics_handle = init_metrics();

    let config = RelayConfig::from_env()?;
    log_config(&config);

    let shutdown = CancellationToken::new();
    tokio::spawn(await_shutdown(shutdown.clone()));

    // Coarse supervisor: any fault below discards the whole service,
    // including the registry, and starts over from scratch. No
    // partially-mutated state survives a fault.
    loop {
        let service_cancel = shutdown.child_token();
        let service = tokio::spawn(run_service(config.clone(), service_cancel.clone()));

        match service.await {
            Ok(Ok(())) => break,
            Ok(Err(e)) => tracing::error!(error = %e, "service failed"),
            Err(e) => tracing::error!(error = %e, "service panicked"),
        }
        service_cancel.cancel();

        if shutdown.is_cancelled() {
            break;
        }

        tracing::info!(
            delay_secs = config.restart_delay.as_secs(),
            "restarting service"
        );
        tokio::select! {
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(config.restart_delay) => {}
        }
    }

    tracing::info!("feed relay stopped");
    Ok(())
}

/// Wire and run one incarnation of the service.
///
/// Returns `Ok(())` on graceful shutdown; any error is a fault the
/// supervisor answers with a full restart.
async fn run_service(config: RelayConfig, cancel: CancellationToken) -> anyhow::Result<()> {
    let registry = Arc::new(FanoutRegistry::new());
    let catalog = Arc::new(MarketCatalog::new(
        &config.spot_markets,
        &config.perp_markets,
    ));
    let status = Arc::new(BrokerStatus::new());

    let (event_tx, event_rx) = mpsc::channel(config.broker.event_buffer);
    let (bridge, gateway) = BrokerBridge::new(
        BrokerConfig {
            url: config.broker.url.clone(),
            backoff: config.broker.backoff(),
            command_buffer: config.broker.command_buffer,
        },
        Arc::clone(&registry),
        Arc::clone(&status),
        event_tx,
        cancel.clone(),
    );

    let snapshots = RedisSnapshotStore::connect(&config.broker.url).await?;

    let ctx = Arc::new(SessionContext {
        registry: Arc::clone(&registry),
        catalog,
        gateway: Arc::new(gateway),
        snapshots: Arc::new(snapshots),
        config: SessionConfig {
            heartbeat_period: config.session.heartbeat_period,
            frame_buffer: config.session.frame_buffer,
            rollback_on_subscribe_failure: config.session.rollback_on_subscribe_failure,
        },
    });

    tokio::spawn(run_dispatch(
        event_rx,
        Arc::clone(&registry),
        config.backpressure.backlog_threshold,
    ));

    let monitor = BackpressureMonitor::new(
        Arc::clone(&registry),
        config.backpressure.backlog_threshold,
        config.backpressure.sweep_period,
        cancel.clone(),
    );
    tokio::spawn(monitor.run());

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&status),
        Arc::clone(&registry),
    ));
    let health_server = HealthServer::new(config.server.health_port, health_state, cancel.clone());
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "health server error");
        }
    });

    let ws_server = WsServer::new(ctx, config.server.ws_port, cancel.clone());

    let bridge_task = tokio::spawn(bridge.run());
    let ws_task = tokio::spawn(ws_server.run());

    tracing::info!("feed relay ready");

    tokio::select! {
        result = ws_task => match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(anyhow::anyhow!("websocket server panicked: {e}")),
        },
        result = bridge_task => match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(anyhow::anyhow!("broker bridge panicked: {e}")),
        },
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        ws_port = config.server.ws_port,
        health_port = config.server.health_port,
        spot_markets = config.spot_markets.len(),
        perp_markets = config.perp_markets.len(),
        backlog_threshold = config.backpressure.backlog_threshold,
        heartbeat_secs = config.session.heartbeat_period.as_secs(),
        "configuration loaded"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
