//! Client Control Protocol
//!
//! Classification of inbound control frames and construction of every
//! outbound frame shape. Classification is pure: it validates fully
//! before the caller touches any shared state, so an invalid request can
//! never leave a partial mutation behind.
//!
//! # Inbound
//!
//! ```json
//! {"type": "subscribe", "channel": "trades", "market": "SOL-PERP", "marketType": "perp"}
//! ```
//!
//! The salvage rule for malformed frames: if the raw `channel` field is
//! recoverable, the error is reported inline against it; if not, there is
//! no way to scope the error and the connection is closed with a
//! protocol-violation status.

use serde::Deserialize;
use serde::Serialize;
use serde_json::value::RawValue;

use crate::domain::catalog::MarketCatalog;
use crate::domain::channel::{ChannelName, FeedKind, HEARTBEAT_CHANNEL, MarketType};

// =============================================================================
// Inbound
// =============================================================================

/// Lenient shape of an inbound control frame. Every field is optional so
/// classification, not deserialization, decides how to fail.
#[derive(Debug, Deserialize)]
struct ControlFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    channel: Option<String>,
    market: Option<String>,
    #[serde(rename = "marketType")]
    market_type: Option<String>,
}

/// What to do with an inbound control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlDecision {
    /// Valid subscribe request.
    Subscribe {
        /// Canonical channel derived from the request.
        channel: ChannelName,
        /// Feed kind, for the snapshot-class check.
        kind: FeedKind,
        /// The raw `channel` field, for error reporting.
        raw_channel: String,
    },
    /// Valid unsubscribe request.
    Unsubscribe {
        /// Canonical channel derived from the request.
        channel: ChannelName,
        /// The raw `channel` field, for error reporting.
        raw_channel: String,
    },
    /// Unknown `type` value; ignored without effect.
    Ignore,
    /// Invalid frame. With a hint the error is reported inline; without
    /// one the connection must be closed.
    Reject {
        /// The raw `channel` field, when salvageable.
        hint: Option<String>,
        /// Human-readable rejection reason.
        reason: String,
    },
}

/// Classify one inbound text frame against the market catalog.
#[must_use]
pub fn classify(text: &str, catalog: &MarketCatalog) -> ControlDecision {
    let Ok(mut frame) = serde_json::from_str::<ControlFrame>(text) else {
        return ControlDecision::Reject {
            hint: None,
            reason: "malformed control frame".to_string(),
        };
    };

    let Some(kind) = frame.kind.take() else {
        return ControlDecision::Reject {
            hint: frame.channel,
            reason: "missing type".to_string(),
        };
    };

    match kind.as_str() {
        "subscribe" | "unsubscribe" => classify_subscription(&kind, frame, catalog),
        _ => ControlDecision::Ignore,
    }
}

fn classify_subscription(
    kind: &str,
    frame: ControlFrame,
    catalog: &MarketCatalog,
) -> ControlDecision {
    let Some(raw_channel) = frame.channel else {
        return ControlDecision::Reject {
            hint: None,
            reason: format!("missing channel in {kind} request"),
        };
    };

    let Some(feed_kind) = FeedKind::parse(&raw_channel) else {
        return ControlDecision::Reject {
            reason: format!("unknown channel kind: {raw_channel}"),
            hint: Some(raw_channel),
        };
    };

    let Some(market_type) = frame.market_type.as_deref().and_then(MarketType::parse) else {
        return ControlDecision::Reject {
            hint: Some(raw_channel),
            reason: "marketType must be \"spot\" or \"perp\"".to_string(),
        };
    };

    let Some(market) = frame.market else {
        return ControlDecision::Reject {
            hint: Some(raw_channel),
            reason: format!("missing market in {kind} request"),
        };
    };

    let Some(index) = catalog.resolve(&market, market_type) else {
        return ControlDecision::Reject {
            hint: Some(raw_channel),
            reason: format!("unknown market: {market}"),
        };
    };

    let channel = ChannelName::new(feed_kind, market_type, index);
    if kind == "subscribe" {
        ControlDecision::Subscribe {
            channel,
            kind: feed_kind,
            raw_channel,
        }
    } else {
        ControlDecision::Unsubscribe {
            channel,
            raw_channel,
        }
    }
}

// =============================================================================
// Outbound
// =============================================================================

#[derive(Serialize)]
struct DataFrame<'a> {
    channel: &'a str,
    data: &'a RawValue,
}

#[derive(Serialize)]
struct ErrorFrame<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<&'a str>,
    error: &'a str,
}

#[derive(Serialize)]
struct HeartbeatFrame<'a> {
    channel: &'a str,
}

/// Build a fan-out or snapshot-replay frame, embedding the payload
/// verbatim when it is valid JSON and as a JSON string otherwise.
#[must_use]
pub fn data_frame(channel: &str, payload: &str) -> String {
    serde_json::from_str::<&RawValue>(payload).map_or_else(
        |_| serde_json::json!({ "channel": channel, "data": payload }).to_string(),
        |data| {
            serde_json::to_string(&DataFrame { channel, data }).unwrap_or_else(|_| {
                serde_json::json!({ "channel": channel, "data": payload }).to_string()
            })
        },
    )
}

/// Build an error frame, scoped to the raw requested channel when one
/// was salvageable.
#[must_use]
pub fn error_frame(channel: Option<&str>, error: &str) -> String {
    serde_json::to_string(&ErrorFrame { channel, error })
        .unwrap_or_else(|_| serde_json::json!({ "error": error }).to_string())
}

/// Build the periodic liveness frame.
#[must_use]
pub fn heartbeat_frame() -> String {
    serde_json::to_string(&HeartbeatFrame {
        channel: HEARTBEAT_CHANNEL,
    })
    .unwrap_or_else(|_| r#"{"channel":"heartbeat"}"#.to_string())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> MarketCatalog {
        MarketCatalog::new(&["SOL".to_string()], &["SOL-PERP".to_string()])
    }

    #[test]
    fn valid_subscribe_derives_canonical_channel() {
        let decision = classify(
            r#"{"type":"subscribe","channel":"trades","market":"SOL-PERP","marketType":"perp"}"#,
            &catalog(),
        );
        assert_eq!(
            decision,
            ControlDecision::Subscribe {
                channel: ChannelName::new(FeedKind::Trades, MarketType::Perp, 0),
                kind: FeedKind::Trades,
                raw_channel: "trades".to_string(),
            }
        );
    }

    #[test]
    fn valid_unsubscribe() {
        let decision = classify(
            r#"{"type":"unsubscribe","channel":"orderbook","market":"SOL","marketType":"spot"}"#,
            &catalog(),
        );
        assert_eq!(
            decision,
            ControlDecision::Unsubscribe {
                channel: ChannelName::new(FeedKind::Orderbook, MarketType::Spot, 0),
                raw_channel: "orderbook".to_string(),
            }
        );
    }

    #[test]
    fn unknown_type_is_ignored() {
        let decision = classify(r#"{"type":"ping"}"#, &catalog());
        assert_eq!(decision, ControlDecision::Ignore);
    }

    #[test]
    fn unparseable_frame_has_no_hint() {
        let decision = classify("not json at all", &catalog());
        assert_eq!(
            decision,
            ControlDecision::Reject {
                hint: None,
                reason: "malformed control frame".to_string(),
            }
        );
    }

    #[test]
    fn missing_type_salvages_channel_hint() {
        let decision = classify(r#"{"channel":"trades"}"#, &catalog());
        assert!(matches!(
            decision,
            ControlDecision::Reject { hint: Some(ref h), .. } if h == "trades"
        ));
    }

    #[test]
    fn missing_type_and_channel_has_no_hint() {
        let decision = classify(r#"{"market":"SOL-PERP"}"#, &catalog());
        assert!(matches!(decision, ControlDecision::Reject { hint: None, .. }));
    }

    #[test]
    fn subscribe_without_channel_has_no_hint() {
        let decision = classify(
            r#"{"type":"subscribe","market":"SOL-PERP","marketType":"perp"}"#,
            &catalog(),
        );
        assert!(matches!(decision, ControlDecision::Reject { hint: None, .. }));
    }

    #[test]
    fn invalid_market_type_keeps_hint() {
        let decision = classify(
            r#"{"type":"subscribe","channel":"trades","market":"SOL-PERP","marketType":"margin"}"#,
            &catalog(),
        );
        assert!(matches!(
            decision,
            ControlDecision::Reject { hint: Some(ref h), .. } if h == "trades"
        ));
    }

    #[test]
    fn unknown_market_keeps_hint() {
        let decision = classify(
            r#"{"type":"subscribe","channel":"orderbook","market":"DOGE","marketType":"spot"}"#,
            &catalog(),
        );
        assert!(matches!(
            decision,
            ControlDecision::Reject { hint: Some(ref h), .. } if h == "orderbook"
        ));
    }

    #[test]
    fn unknown_channel_kind_keeps_hint() {
        let decision = classify(
            r#"{"type":"subscribe","channel":"candles","market":"SOL","marketType":"spot"}"#,
            &catalog(),
        );
        assert!(matches!(
            decision,
            ControlDecision::Reject { hint: Some(ref h), .. } if h == "candles"
        ));
    }

    #[test]
    fn data_frame_embeds_json_verbatim() {
        let frame = data_frame("trades_perp_0", r#"{"px":"1.5","sz":3}"#);
        assert_eq!(frame, r#"{"channel":"trades_perp_0","data":{"px":"1.5","sz":3}}"#);
    }

    #[test]
    fn data_frame_wraps_non_json_payload() {
        let frame = data_frame("trades_perp_0", "raw bytes");
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["data"], "raw bytes");
    }

    #[test]
    fn error_frame_shapes() {
        assert_eq!(
            error_frame(Some("trades"), "unknown market: DOGE"),
            r#"{"channel":"trades","error":"unknown market: DOGE"}"#
        );
        assert_eq!(error_frame(None, "malformed"), r#"{"error":"malformed"}"#);
    }

    #[test]
    fn heartbeat_frame_shape() {
        assert_eq!(heartbeat_frame(), r#"{"channel":"heartbeat"}"#);
    }
}
