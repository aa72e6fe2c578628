//! WebSocket Server
//!
//! Accepts client connections on `/ws` and spawns one session task per
//! upgraded socket. Session identifiers are allocated monotonically for
//! the life of the process.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use tokio_util::sync::CancellationToken;

pub mod protocol;
pub mod session;

use session::{SessionContext, run_session};

/// Errors that can occur running the WebSocket server.
#[derive(Debug, thiserror::Error)]
pub enum WsServerError {
    /// Failed to bind the listen address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that could not be bound.
        addr: SocketAddr,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The server loop failed.
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

struct AppState {
    ctx: Arc<SessionContext>,
    next_session: AtomicU64,
    cancel: CancellationToken,
}

/// Client-facing WebSocket endpoint.
pub struct WsServer {
    ctx: Arc<SessionContext>,
    port: u16,
    cancel: CancellationToken,
}

impl WsServer {
    /// Create a server that hands each accepted socket to a session task.
    #[must_use]
    pub const fn new(ctx: Arc<SessionContext>, port: u16, cancel: CancellationToken) -> Self {
        Self { ctx, port, cancel }
    }

    /// Bind and serve until cancelled.
    pub async fn run(self) -> Result<(), WsServerError> {
        let state = Arc::new(AppState {
            ctx: self.ctx,
            next_session: AtomicU64::new(1),
            cancel: self.cancel.clone(),
        });
        let app = Router::new()
            .route("/ws", get(ws_handler))
            .with_state(state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| WsServerError::Bind { addr, source })?;
        tracing::info!(%addr, "websocket server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await?;
        tracing::info!("websocket server stopped");
        Ok(())
    }
}

async fn ws_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    let session = state.next_session.fetch_add(1, Ordering::Relaxed);
    let ctx = Arc::clone(&state.ctx);
    // Child of the service token, so shutdown closes the session while
    // the monitor can still close it individually.
    let cancel = state.cancel.child_token();
    ws.on_upgrade(move |socket| run_session(ctx, socket, session, cancel))
}
