//! Relay Configuration Settings
//!
//! Configuration types for the relay, loaded from environment variables.

use std::time::Duration;

use crate::infrastructure::broker::reconnect::BackoffConfig;

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// WebSocket listen port.
    pub ws_port: u16,
    /// Health check HTTP port. Also serves the Prometheus scrape
    /// endpoint.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ws_port: 8900,
            health_port: 8901,
        }
    }
}

/// Session behavior settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Period of the per-session liveness frame.
    pub heartbeat_period: Duration,
    /// Capacity of each session's outbound frame queue.
    pub frame_buffer: usize,
    /// Whether a failed broker subscribe removes the local registry entry.
    pub rollback_on_subscribe_failure: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            heartbeat_period: Duration::from_secs(5),
            frame_buffer: 64,
            rollback_on_subscribe_failure: false,
        }
    }
}

/// Backpressure sweep settings.
#[derive(Debug, Clone)]
pub struct BackpressureSettings {
    /// Sweep period.
    pub sweep_period: Duration,
    /// Backlog depth (frames) above which a session is closed.
    pub backlog_threshold: usize,
}

impl Default for BackpressureSettings {
    fn default() -> Self {
        Self {
            sweep_period: Duration::from_secs(10),
            backlog_threshold: 50,
        }
    }
}

/// Upstream broker connection settings.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Redis connection URL.
    pub url: String,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Backoff multiplier between attempts.
    pub reconnect_delay_multiplier: f64,
    /// Capacity of the gateway command channel.
    pub command_buffer: usize,
    /// Capacity of the broker-to-dispatcher event channel.
    pub event_buffer: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            command_buffer: 64,
            event_buffer: 1024,
        }
    }
}

impl BrokerSettings {
    /// Derive the backoff configuration for the bridge.
    #[must_use]
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: self.reconnect_delay_initial,
            max_delay: self.reconnect_delay_max,
            multiplier: self.reconnect_delay_multiplier,
            ..BackoffConfig::default()
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Upstream broker settings.
    pub broker: BrokerSettings,
    /// Session behavior settings.
    pub session: SessionSettings,
    /// Backpressure sweep settings.
    pub backpressure: BackpressureSettings,
    /// Spot market symbols, index assigned by position.
    pub spot_markets: Vec<String>,
    /// Perp market symbols, index assigned by position.
    pub perp_markets: Vec<String>,
    /// Delay before the supervisor restarts the service after a fault.
    pub restart_delay: Duration,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `RELAY_REDIS_URL` is missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var("RELAY_REDIS_URL")
            .map_err(|_| ConfigError::MissingEnvVar("RELAY_REDIS_URL".to_string()))?;
        if url.is_empty() {
            return Err(ConfigError::EmptyValue("RELAY_REDIS_URL".to_string()));
        }

        let server = ServerSettings {
            ws_port: parse_env_u16("RELAY_WS_PORT", ServerSettings::default().ws_port),
            health_port: parse_env_u16("RELAY_HEALTH_PORT", ServerSettings::default().health_port),
        };

        let broker = BrokerSettings {
            url,
            reconnect_delay_initial: parse_env_duration_millis(
                "RELAY_RECONNECT_DELAY_INITIAL_MS",
                BrokerSettings::default().reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                "RELAY_RECONNECT_DELAY_MAX_SECS",
                BrokerSettings::default().reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env_f64(
                "RELAY_RECONNECT_DELAY_MULTIPLIER",
                BrokerSettings::default().reconnect_delay_multiplier,
            ),
            command_buffer: parse_env_usize(
                "RELAY_COMMAND_BUFFER",
                BrokerSettings::default().command_buffer,
            ),
            event_buffer: parse_env_usize(
                "RELAY_EVENT_BUFFER",
                BrokerSettings::default().event_buffer,
            ),
        };

        let session = SessionSettings {
            heartbeat_period: parse_env_duration_secs(
                "RELAY_HEARTBEAT_PERIOD_SECS",
                SessionSettings::default().heartbeat_period,
            ),
            frame_buffer: parse_env_usize(
                "RELAY_SESSION_BUFFER",
                SessionSettings::default().frame_buffer,
            ),
            rollback_on_subscribe_failure: parse_env_bool("RELAY_SUBSCRIBE_ROLLBACK", false),
        };

        let backpressure = BackpressureSettings {
            sweep_period: parse_env_duration_secs(
                "RELAY_SWEEP_PERIOD_SECS",
                BackpressureSettings::default().sweep_period,
            ),
            backlog_threshold: parse_env_usize(
                "RELAY_BACKLOG_THRESHOLD",
                BackpressureSettings::default().backlog_threshold,
            ),
        };

        Ok(Self {
            server,
            broker,
            session,
            backpressure,
            spot_markets: parse_env_list("RELAY_SPOT_MARKETS"),
            perp_markets: parse_env_list("RELAY_PERP_MARKETS"),
            restart_delay: parse_env_duration_secs(
                "RELAY_RESTART_DELAY_SECS",
                Duration::from_secs(5),
            ),
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

fn parse_env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        // Two listeners: client WebSocket, and health + Prometheus scrape.
        let server = ServerSettings::default();
        assert_eq!(server.ws_port, 8900);
        assert_eq!(server.health_port, 8901);

        let session = SessionSettings::default();
        assert_eq!(session.heartbeat_period, Duration::from_secs(5));
        assert!(!session.rollback_on_subscribe_failure);

        let backpressure = BackpressureSettings::default();
        assert_eq!(backpressure.sweep_period, Duration::from_secs(10));
        assert_eq!(backpressure.backlog_threshold, 50);
    }

    #[test]
    fn backoff_derives_from_broker_settings() {
        let broker = BrokerSettings {
            reconnect_delay_initial: Duration::from_millis(250),
            reconnect_delay_max: Duration::from_secs(8),
            reconnect_delay_multiplier: 3.0,
            ..Default::default()
        };
        let backoff = broker.backoff();
        assert_eq!(backoff.initial_delay, Duration::from_millis(250));
        assert_eq!(backoff.max_delay, Duration::from_secs(8));
        assert!((backoff.multiplier - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn list_parsing_trims_and_drops_empties() {
        // parse_env_list goes through the environment; exercise the
        // splitting logic directly on a representative value.
        let parsed: Vec<String> = "SOL, BTC,,ETH "
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        assert_eq!(parsed, vec!["SOL", "BTC", "ETH"]);
    }
}
