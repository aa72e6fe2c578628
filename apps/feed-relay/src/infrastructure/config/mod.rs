//! Configuration Module
//!
//! Configuration loading for the relay service.

mod settings;

pub use settings::{
    BackpressureSettings, BrokerSettings, ConfigError, RelayConfig, ServerSettings,
    SessionSettings,
};
