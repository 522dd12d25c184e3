// =============================================================================
// Streaming wire protocol — subscribe/unsubscribe frames and trade batches
// =============================================================================
//
// Outgoing frames are one JSON object per symbol transition:
//   { "type": "subscribe",   "symbol": "AAPL" }
//   { "type": "unsubscribe", "symbol": "AAPL" }
//
// Inbound frames are trade batches, pings, and error notices:
//   { "type": "trade", "data": [ { "s": "AAPL", "p": 261.74, "t": 1582641900000, "v": 100 } ] }
//   { "type": "ping" }
//   { "type": "error", "symbol": "BOGUS", "msg": "..." }
//
// Unrecognised message shapes are ignored, never propagated.
// =============================================================================

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::warn;

use crate::types::Tick;

/// A frame sent upstream. One per distinct symbol transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutgoingMessage {
    Subscribe { symbol: String },
    Unsubscribe { symbol: String },
}

impl OutgoingMessage {
    pub fn subscribe(symbol: impl Into<String>) -> Self {
        Self::Subscribe {
            symbol: symbol.into(),
        }
    }

    pub fn unsubscribe(symbol: impl Into<String>) -> Self {
        Self::Unsubscribe {
            symbol: symbol.into(),
        }
    }

    /// Wire encoding. Serialisation of this enum cannot fail.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("outgoing frames serialise")
    }
}

/// A frame received from upstream, already classified.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// A batch of trade events, possibly for several symbols.
    Trades(Vec<Tick>),
    /// Upstream error notice. When a symbol is attributed the multiplexer
    /// surfaces it to that symbol's listeners; otherwise it is only logged.
    Rejected {
        symbol: Option<String>,
        reason: String,
    },
    /// Keep-alive from upstream; no action required.
    Ping,
    /// A well-formed JSON message of a shape we do not recognise.
    Ignored,
}

/// Parse one inbound text frame.
///
/// Returns `Err` only when the frame is not valid JSON; recognisable-but-odd
/// shapes degrade to [`InboundMessage::Ignored`] and individually malformed
/// trade entries are skipped with a warning.
pub fn parse_inbound(text: &str) -> Result<InboundMessage> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("inbound frame is not valid JSON")?;

    match root["type"].as_str() {
        Some("trade") => {
            let entries = match root["data"].as_array() {
                Some(a) => a,
                None => {
                    warn!("trade frame missing data array");
                    return Ok(InboundMessage::Ignored);
                }
            };

            let mut ticks = Vec::with_capacity(entries.len());
            for entry in entries {
                match parse_trade_entry(entry) {
                    Ok(tick) => ticks.push(tick),
                    Err(e) => warn!(error = %e, "skipping malformed trade entry"),
                }
            }
            Ok(InboundMessage::Trades(ticks))
        }
        Some("ping") => Ok(InboundMessage::Ping),
        Some("error") => Ok(InboundMessage::Rejected {
            symbol: root["symbol"].as_str().map(str::to_string),
            reason: root["msg"]
                .as_str()
                .unwrap_or("unspecified upstream error")
                .to_string(),
        }),
        _ => Ok(InboundMessage::Ignored),
    }
}

/// Parse one entry of a trade batch.
///
/// Expected shape:
/// ```json
/// { "s": "AAPL", "p": 261.74, "t": 1582641900000, "v": 100 }
/// ```
fn parse_trade_entry(entry: &serde_json::Value) -> Result<Tick> {
    let symbol = entry["s"]
        .as_str()
        .context("missing field s")?
        .to_string();

    let price = entry["p"].as_f64().context("missing field p")?;
    let timestamp = entry["t"].as_i64().context("missing field t")?;
    let volume = entry["v"].as_f64();

    Ok(Tick {
        symbol,
        price,
        timestamp,
        volume,
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outgoing_frames_have_wire_shape() {
        let json = OutgoingMessage::subscribe("AAPL").to_json();
        assert_eq!(json, r#"{"type":"subscribe","symbol":"AAPL"}"#);

        let json = OutgoingMessage::unsubscribe("BINANCE:BTCUSDT").to_json();
        assert_eq!(json, r#"{"type":"unsubscribe","symbol":"BINANCE:BTCUSDT"}"#);
    }

    #[test]
    fn parse_trade_batch() {
        let text = r#"{
            "type": "trade",
            "data": [
                { "s": "AAPL", "p": 261.74, "t": 1582641900000, "v": 100 },
                { "s": "MSFT", "p": 180.25, "t": 1582641900500 }
            ]
        }"#;

        let msg = parse_inbound(text).expect("should parse");
        let ticks = match msg {
            InboundMessage::Trades(t) => t,
            other => panic!("expected trades, got {other:?}"),
        };
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].symbol, "AAPL");
        assert!((ticks[0].price - 261.74).abs() < f64::EPSILON);
        assert_eq!(ticks[0].volume, Some(100.0));
        assert_eq!(ticks[1].volume, None);
    }

    #[test]
    fn malformed_entries_are_skipped_not_fatal() {
        let text = r#"{
            "type": "trade",
            "data": [
                { "s": "AAPL" },
                { "s": "MSFT", "p": 180.25, "t": 1582641900500 }
            ]
        }"#;

        let msg = parse_inbound(text).expect("should parse");
        match msg {
            InboundMessage::Trades(ticks) => {
                assert_eq!(ticks.len(), 1);
                assert_eq!(ticks[0].symbol, "MSFT");
            }
            other => panic!("expected trades, got {other:?}"),
        }
    }

    #[test]
    fn ping_and_unknown_shapes() {
        assert_eq!(
            parse_inbound(r#"{"type":"ping"}"#).unwrap(),
            InboundMessage::Ping
        );
        assert_eq!(
            parse_inbound(r#"{"type":"news","headline":"x"}"#).unwrap(),
            InboundMessage::Ignored
        );
        assert_eq!(
            parse_inbound(r#"{"no_type_at_all":1}"#).unwrap(),
            InboundMessage::Ignored
        );
    }

    #[test]
    fn error_frame_with_and_without_symbol() {
        let msg = parse_inbound(r#"{"type":"error","symbol":"BOGUS","msg":"unknown symbol"}"#)
            .unwrap();
        assert_eq!(
            msg,
            InboundMessage::Rejected {
                symbol: Some("BOGUS".into()),
                reason: "unknown symbol".into()
            }
        );

        let msg = parse_inbound(r#"{"type":"error"}"#).unwrap();
        match msg {
            InboundMessage::Rejected { symbol: None, .. } => {}
            other => panic!("expected rejected, got {other:?}"),
        }
    }

    #[test]
    fn non_json_is_an_error() {
        assert!(parse_inbound("not json at all").is_err());
    }
}
