//! Bitflyer Lightning adapter (JSON-RPC channel protocol)

use crate::adapter::{parse_exchange_timestamp, Decoded, ExchangeAdapter, FeedError, MessageKind};
use chrono::Utc;
use common::{Exchange, PriceLevel, Side, Trade};
use lob::{BookUpdate, DepthPolicy};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Production Lightning stream endpoint
pub const DEFAULT_WS_URL: &str = "wss://ws.lightstream.bitflyer.com/json-rpc";

/// Symbols recorded by default: spot and leveraged BTC/JPY
pub const DEFAULT_SYMBOLS: [&str; 2] = ["BTC_JPY", "FX_BTC_JPY"];

const CHANNEL_BOARD_SNAPSHOT_PREFIX: &str = "lightning_board_snapshot_";
const CHANNEL_BOARD_DELTA_PREFIX: &str = "lightning_board_";
const CHANNEL_EXECUTIONS_PREFIX: &str = "lightning_executions_";

/// Bitflyer wire adapter.
///
/// Boards arrive as a snapshot channel plus a delta channel per symbol; the
/// running book keeps the full received depth. Executions arrive in arrays.
pub struct BitflyerAdapter {
    ws_url: String,
    rpc_id: AtomicU64,
}

/// JSON-RPC notification envelope
#[derive(Debug, Deserialize)]
struct ChannelMessage {
    params: ChannelParams,
}

#[derive(Debug, Deserialize)]
struct ChannelParams {
    channel: String,
    message: Value,
}

#[derive(Debug, Deserialize)]
struct BoardMessage {
    #[serde(default)]
    bids: Vec<WireLevel>,
    #[serde(default)]
    asks: Vec<WireLevel>,
}

#[derive(Debug, Deserialize)]
struct WireLevel {
    price: Decimal,
    size: Decimal,
}

#[derive(Debug, Deserialize)]
struct Execution {
    id: u64,
    side: String,
    price: Decimal,
    size: Decimal,
    exec_date: String,
}

impl BitflyerAdapter {
    /// Create an adapter for the given endpoint
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            rpc_id: AtomicU64::new(1),
        }
    }

    fn convert_execution(&self, symbol: &str, exec: Execution) -> Option<Trade> {
        // Itayose executions carry an empty side; they cannot be attributed
        // to a taker and are skipped.
        let Some(side) = Side::from_wire(&exec.side) else {
            debug!(symbol, id = exec.id, "skipping execution without taker side");
            return None;
        };
        let timestamp = parse_exchange_timestamp(&exec.exec_date).unwrap_or_else(|| {
            warn!(exec_date = %exec.exec_date, "failed to parse bitflyer timestamp");
            Utc::now()
        });
        Some(Trade::new(
            Exchange::Bitflyer,
            symbol,
            &exec.id.to_string(),
            exec.price,
            exec.size,
            side,
            timestamp,
        ))
    }
}

impl ExchangeAdapter for BitflyerAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Bitflyer
    }

    fn ws_url(&self) -> &str {
        &self.ws_url
    }

    fn subscribe_delay(&self) -> Duration {
        Duration::from_secs(1)
    }

    fn depth_policy(&self) -> DepthPolicy {
        DepthPolicy::Full
    }

    fn subscription_requests(&self, symbols: &[String]) -> Vec<String> {
        // Snapshot channels must come before delta channels so the first
        // delta lands on an initialized book; executions go last.
        let mut requests = Vec::with_capacity(symbols.len() * 3);
        for prefix in [
            CHANNEL_BOARD_SNAPSHOT_PREFIX,
            CHANNEL_BOARD_DELTA_PREFIX,
            CHANNEL_EXECUTIONS_PREFIX,
        ] {
            for symbol in symbols {
                let id = self.rpc_id.fetch_add(1, Ordering::Relaxed);
                requests.push(
                    json!({
                        "jsonrpc": "2.0",
                        "method": "subscribe",
                        "params": { "channel": format!("{prefix}{symbol}") },
                        "id": id,
                    })
                    .to_string(),
                );
            }
        }
        requests
    }

    fn classify(&self, raw: &str) -> MessageKind {
        let Ok(value) = serde_json::from_str::<Value>(raw) else {
            return MessageKind::Unrecognized;
        };
        if value.get("method").and_then(Value::as_str) == Some("channelMessage") {
            // The snapshot prefix must be checked before the delta prefix,
            // which it extends.
            match value.pointer("/params/channel").and_then(Value::as_str) {
                Some(c) if c.starts_with(CHANNEL_EXECUTIONS_PREFIX) => MessageKind::TradeBatch,
                Some(c) if c.starts_with(CHANNEL_BOARD_SNAPSHOT_PREFIX) => {
                    MessageKind::BookSnapshot
                }
                Some(c) if c.starts_with(CHANNEL_BOARD_DELTA_PREFIX) => MessageKind::BookDelta,
                _ => MessageKind::Unrecognized,
            }
        } else if value.get("result").is_some() || value.get("error").is_some() {
            MessageKind::Control
        } else {
            MessageKind::Unrecognized
        }
    }

    fn decode(&self, raw: &str, kind: MessageKind) -> Result<Decoded, FeedError> {
        let envelope: ChannelMessage = serde_json::from_str(raw)?;
        let channel = envelope.params.channel;
        match kind {
            MessageKind::TradeBatch => {
                let symbol = channel
                    .strip_prefix(CHANNEL_EXECUTIONS_PREFIX)
                    .ok_or_else(|| FeedError::Shape(format!("not an executions channel: {channel}")))?;
                let executions: Vec<Execution> = serde_json::from_value(envelope.params.message)?;
                let trades = executions
                    .into_iter()
                    .filter_map(|exec| self.convert_execution(symbol, exec))
                    .collect();
                Ok(Decoded::Trades(trades))
            }
            MessageKind::BookSnapshot => {
                let symbol = channel
                    .strip_prefix(CHANNEL_BOARD_SNAPSHOT_PREFIX)
                    .ok_or_else(|| FeedError::Shape(format!("not a snapshot channel: {channel}")))?;
                let board: BoardMessage = serde_json::from_value(envelope.params.message)?;
                Ok(Decoded::Book(BookUpdate::Snapshot {
                    symbol: symbol.to_string(),
                    bids: convert_levels(board.bids),
                    asks: convert_levels(board.asks),
                }))
            }
            MessageKind::BookDelta => {
                let symbol = channel
                    .strip_prefix(CHANNEL_BOARD_DELTA_PREFIX)
                    .ok_or_else(|| FeedError::Shape(format!("not a board channel: {channel}")))?;
                let board: BoardMessage = serde_json::from_value(envelope.params.message)?;
                Ok(Decoded::Book(BookUpdate::Delta {
                    symbol: symbol.to_string(),
                    bids: convert_levels(board.bids),
                    asks: convert_levels(board.asks),
                }))
            }
            MessageKind::Control | MessageKind::Unrecognized => {
                Err(FeedError::Shape("decode called on a non-data frame".to_string()))
            }
        }
    }
}

fn convert_levels(levels: Vec<WireLevel>) -> Vec<PriceLevel> {
    levels
        .into_iter()
        .map(|l| PriceLevel::new(l.price, l.size))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn adapter() -> BitflyerAdapter {
        BitflyerAdapter::new(DEFAULT_WS_URL)
    }

    fn symbols() -> Vec<String> {
        DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn subscriptions_are_snapshot_then_delta_then_executions() {
        let requests = adapter().subscription_requests(&symbols());
        assert_eq!(requests.len(), 6);

        let channels: Vec<String> = requests
            .iter()
            .map(|r| {
                let v: Value = serde_json::from_str(r).unwrap();
                assert_eq!(v["jsonrpc"], "2.0");
                assert_eq!(v["method"], "subscribe");
                v["params"]["channel"].as_str().unwrap().to_string()
            })
            .collect();

        assert_eq!(
            channels,
            vec![
                "lightning_board_snapshot_BTC_JPY",
                "lightning_board_snapshot_FX_BTC_JPY",
                "lightning_board_BTC_JPY",
                "lightning_board_FX_BTC_JPY",
                "lightning_executions_BTC_JPY",
                "lightning_executions_FX_BTC_JPY",
            ]
        );
    }

    #[test]
    fn rpc_ids_increase_monotonically() {
        let adapter = adapter();
        let first: Vec<u64> = adapter
            .subscription_requests(&symbols())
            .iter()
            .map(|r| serde_json::from_str::<Value>(r).unwrap()["id"].as_u64().unwrap())
            .collect();
        assert_eq!(first, vec![1, 2, 3, 4, 5, 6]);

        let again = adapter.subscription_requests(&symbols());
        let v: Value = serde_json::from_str(&again[0]).unwrap();
        assert_eq!(v["id"].as_u64(), Some(7));
    }

    #[test]
    fn snapshot_channel_is_not_mistaken_for_delta() {
        let raw = r#"{"jsonrpc":"2.0","method":"channelMessage","params":{"channel":"lightning_board_snapshot_BTC_JPY","message":{"mid_price":5000000,"bids":[],"asks":[]}}}"#;
        assert_eq!(adapter().classify(raw), MessageKind::BookSnapshot);

        let raw = r#"{"jsonrpc":"2.0","method":"channelMessage","params":{"channel":"lightning_board_BTC_JPY","message":{"mid_price":5000000,"bids":[],"asks":[]}}}"#;
        assert_eq!(adapter().classify(raw), MessageKind::BookDelta);
    }

    #[test]
    fn confirmations_and_errors_classify_as_control() {
        assert_eq!(
            adapter().classify(r#"{"jsonrpc":"2.0","result":true,"id":1}"#),
            MessageKind::Control
        );
        assert_eq!(
            adapter().classify(r#"{"jsonrpc":"2.0","error":{"code":-32600},"id":1}"#),
            MessageKind::Control
        );
        assert_eq!(adapter().classify("not json"), MessageKind::Unrecognized);
    }

    #[test]
    fn decodes_executions_into_trades() {
        let raw = r#"{"jsonrpc":"2.0","method":"channelMessage","params":{"channel":"lightning_executions_FX_BTC_JPY","message":[
            {"id":2438071081,"side":"BUY","price":5250000.0,"size":0.01,"exec_date":"2024-05-01T02:51:38.123Z","buy_child_order_acceptance_id":"a","sell_child_order_acceptance_id":"b"},
            {"id":2438071082,"side":"SELL","price":5249999.0,"size":0.5,"exec_date":"2024-05-01T02:51:38.456Z","buy_child_order_acceptance_id":"c","sell_child_order_acceptance_id":"d"}
        ]}}"#;
        let decoded = adapter().decode(raw, MessageKind::TradeBatch).unwrap();
        let Decoded::Trades(trades) = decoded else {
            panic!("expected trades");
        };
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].trade_id, "BITFLYER-2438071081");
        assert_eq!(trades[0].symbol, "FX_BTC_JPY");
        assert_eq!(trades[0].side, Side::Buy);
        assert_eq!(trades[1].size, dec!(0.5));
    }

    #[test]
    fn executions_without_taker_side_are_skipped() {
        let raw = r#"{"jsonrpc":"2.0","method":"channelMessage","params":{"channel":"lightning_executions_BTC_JPY","message":[
            {"id":1,"side":"","price":5250000.0,"size":0.01,"exec_date":"2024-05-01T02:51:38.123Z"}
        ]}}"#;
        let Decoded::Trades(trades) = adapter().decode(raw, MessageKind::TradeBatch).unwrap()
        else {
            panic!("expected trades");
        };
        assert!(trades.is_empty());
    }

    #[test]
    fn decodes_board_delta_with_zero_size_removals() {
        let raw = r#"{"jsonrpc":"2.0","method":"channelMessage","params":{"channel":"lightning_board_BTC_JPY","message":{"mid_price":5000000,"bids":[{"price":4999999.0,"size":0}],"asks":[{"price":5000001.0,"size":0.2}]}}}"#;
        let Decoded::Book(BookUpdate::Delta { symbol, bids, asks }) =
            adapter().decode(raw, MessageKind::BookDelta).unwrap()
        else {
            panic!("expected delta");
        };
        assert_eq!(symbol, "BTC_JPY");
        assert!(bids[0].size.is_zero());
        assert_eq!(asks[0].size, dec!(0.2));
    }

    #[test]
    fn malformed_payload_yields_parse_error() {
        let raw = r#"{"jsonrpc":"2.0","method":"channelMessage","params":{"channel":"lightning_executions_BTC_JPY","message":{"not":"an array"}}}"#;
        let err = adapter().decode(raw, MessageKind::TradeBatch).unwrap_err();
        assert!(matches!(err, FeedError::Parse(_)));
    }
}
