//! Logging Initialization
//!
//! Configures the global `tracing` subscriber. Verbosity is driven by
//! `RUST_LOG` with a sensible default for the relay itself.
//!
//! # Usage
//!
//! ```ignore
//! use feed_relay::infrastructure::telemetry;
//!
//! telemetry::init();
//! tracing::info!("starting");
//! ```

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info,feed_relay=debug";

/// Install the global subscriber. Calling twice is a no-op.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false),
        )
        .try_init();
}
