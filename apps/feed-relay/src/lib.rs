#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Feed Relay - Market Data Fan-out
//!
//! A WebSocket relay that maintains a single pub/sub connection to the
//! upstream market-data broker and fans trade prints and order-book
//! updates out to many concurrently connected client sessions, with
//! lazy broker subscriptions, snapshot replay, heartbeats, and a
//! slow-consumer sweep.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Channel naming and fan-out state
//!   - `channel`: Canonical channel names and feed classification
//!   - `catalog`: Symbol to market-index resolution
//!   - `registry`: Channel-to-session subscription bookkeeping
//!
//! - **Application**: Port definitions
//!   - `ports`: Broker gateway and snapshot store contracts
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `broker`: Redis pub/sub bridge and fan-out dispatcher
//!   - `snapshot`: Redis snapshot store adapter
//!   - `ws`: WebSocket server, control protocol, session lifecycle
//!   - `backpressure`: Slow-consumer sweep
//!   - `config`: Configuration loading
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                  ┌──────────────┐     ┌────────────┐──► Session 1
//! Redis pub/sub ──►│ BrokerBridge │────►│ Dispatcher │──► Session 2
//!                  └──────────────┘     └────────────┘──► Session N
//!                         ▲                   │
//!                  subscribe/unsubscribe   FanoutRegistry
//!                         └───────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Channel naming and fan-out bookkeeping.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::catalog::MarketCatalog;
pub use domain::channel::{ChannelName, FeedKind, MarketIndex, MarketType};
pub use domain::registry::{FanoutRegistry, SessionHandle, SessionId, SubscribeOutcome};

// Ports
pub use application::ports::{ChannelGateway, GatewayError, SnapshotError, SnapshotStore};

// Infrastructure config
pub use infrastructure::config::{ConfigError, RelayConfig};

// Broker bridge (for integration tests)
pub use infrastructure::broker::{
    BrokerBridge, BrokerConfig, BrokerEvent, BrokerHandle,
    status::{BrokerStatus, ConnectionState},
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;
