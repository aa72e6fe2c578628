//! Canonical Channel Naming
//!
//! Domain types for the channel namespace shared between the upstream
//! broker and the fan-out registry. A canonical channel name is the
//! deterministic key `"<feedKind>_<marketType>_<marketIndex>"`, derived
//! from a validated client request. Validation happens entirely before
//! any shared state is touched: an invalid request never produces a
//! `ChannelName`.

use std::borrow::Borrow;
use std::fmt;

// =============================================================================
// Types
// =============================================================================

/// Index of a market in the market catalog.
pub type MarketIndex = u16;

/// Key prefix under which the snapshot store caches the last payload of a
/// snapshot-class channel.
pub const SNAPSHOT_KEY_PREFIX: &str = "last_update_";

/// Channel used for the periodic per-session liveness frame.
pub const HEARTBEAT_CHANNEL: &str = "heartbeat";

/// Category of market data stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    /// Trade prints.
    Trades,
    /// Order-book state updates.
    Orderbook,
}

impl FeedKind {
    /// Parse the client-facing channel kind.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "trades" => Some(Self::Trades),
            "orderbook" => Some(Self::Orderbook),
            _ => None,
        }
    }

    /// Get the wire name used in canonical channel names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trades => "trades",
            Self::Orderbook => "orderbook",
        }
    }

    /// Whether the last payload of this kind is cached externally and
    /// replayed to new subscribers. Only the order book has a meaningful
    /// "current state"; trade prints do not.
    #[must_use]
    pub const fn is_snapshot_class(self) -> bool {
        matches!(self, Self::Orderbook)
    }
}

/// Market segment a symbol trades in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarketType {
    /// Spot markets.
    Spot,
    /// Perpetual futures markets.
    Perp,
}

impl MarketType {
    /// Parse the client-facing market type.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "spot" => Some(Self::Spot),
            "perp" => Some(Self::Perp),
            _ => None,
        }
    }

    /// Get the wire name used in canonical channel names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Perp => "perp",
        }
    }
}

// =============================================================================
// Canonical Channel Name
// =============================================================================

/// Canonical channel name: `"<feedKind>_<marketType>_<marketIndex>"`.
///
/// One-to-one with (feed kind, market). Used identically as the broker
/// subscription key and the registry key, so lookups on inbound broker
/// messages are direct string matches.
///
/// # Example
///
/// ```rust
/// use feed_relay::domain::channel::{ChannelName, FeedKind, MarketType};
///
/// let channel = ChannelName::new(FeedKind::Trades, MarketType::Perp, 0);
/// assert_eq!(channel.as_str(), "trades_perp_0");
/// assert_eq!(channel.snapshot_key(), "last_update_trades_perp_0");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelName(String);

impl ChannelName {
    /// Build the canonical name from already-validated parts.
    #[must_use]
    pub fn new(kind: FeedKind, market_type: MarketType, index: MarketIndex) -> Self {
        Self(format!(
            "{}_{}_{index}",
            kind.as_str(),
            market_type.as_str()
        ))
    }

    /// Get the canonical name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key under which the snapshot store caches this channel's last payload.
    #[must_use]
    pub fn snapshot_key(&self) -> String {
        format!("{SNAPSHOT_KEY_PREFIX}{}", self.0)
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Allows registry lookups keyed by the raw channel string carried on
// inbound broker messages, without allocating.
impl Borrow<str> for ChannelName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Tests
// =============================================================================
