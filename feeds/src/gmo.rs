//! GMO Coin public stream adapter

use crate::adapter::{parse_exchange_timestamp, Decoded, ExchangeAdapter, FeedError, MessageKind};
use chrono::Utc;
use common::{Exchange, PriceLevel, Side, Trade};
use lob::{BookUpdate, DepthPolicy};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error};

/// Production public stream endpoint
pub const DEFAULT_WS_URL: &str = "wss://api.coin.z.com/ws/public/v1";

/// Symbols recorded by default: spot and leveraged BTC/JPY
pub const DEFAULT_SYMBOLS: [&str; 2] = ["BTC", "BTC_JPY"];

const CHANNEL_ORDERBOOKS: &str = "orderbooks";
const CHANNEL_TRADES: &str = "trades";

/// Book levels retained per side; GMO publishes full replacements and only
/// the top of book is recorded
const BOOK_DEPTH: usize = 8;

/// GMO Coin wire adapter.
///
/// Orderbook frames are full replacements, so every one maps to a snapshot.
/// Trades arrive one execution per frame. Prices and sizes are JSON strings.
pub struct GmoAdapter {
    ws_url: String,
}

#[derive(Debug, Deserialize)]
struct OrderbookMessage {
    symbol: String,
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
struct TradeMessage {
    symbol: String,
    side: String,
    price: Decimal,
    size: Decimal,
    timestamp: String,
    #[serde(rename = "executionId")]
    execution_id: Option<u64>,
}

impl GmoAdapter {
    /// Create an adapter for the given endpoint
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }
}

impl ExchangeAdapter for GmoAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Gmo
    }

    fn ws_url(&self) -> &str {
        &self.ws_url
    }

    fn subscribe_delay(&self) -> Duration {
        Duration::from_secs(2)
    }

    fn depth_policy(&self) -> DepthPolicy {
        DepthPolicy::TopN(BOOK_DEPTH)
    }

    fn subscription_requests(&self, symbols: &[String]) -> Vec<String> {
        let mut requests = Vec::with_capacity(symbols.len() * 2);
        for symbol in symbols {
            let symbol = symbol.to_ascii_uppercase();
            for channel in [CHANNEL_ORDERBOOKS, CHANNEL_TRADES] {
                requests.push(
                    json!({
                        "command": "subscribe",
                        "channel": channel,
                        "symbol": symbol,
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
        match value.get("channel").and_then(Value::as_str) {
            Some(CHANNEL_ORDERBOOKS) => MessageKind::BookSnapshot,
            Some(CHANNEL_TRADES) => MessageKind::TradeBatch,
            Some(_) => MessageKind::Unrecognized,
            // Subscription errors come back as {"error": "..."}
            None if value.get("error").is_some() => {
                error!(payload = raw, "gmo error frame");
                MessageKind::Control
            }
            None => MessageKind::Unrecognized,
        }
    }

    fn decode(&self, raw: &str, kind: MessageKind) -> Result<Decoded, FeedError> {
        match kind {
            MessageKind::TradeBatch => {
                let msg: TradeMessage = serde_json::from_str(raw)?;
                let Some(side) = Side::from_wire(&msg.side) else {
                    debug!(symbol = %msg.symbol, side = %msg.side, "skipping trade with unknown side");
                    return Ok(Decoded::Trades(Vec::new()));
                };
                let timestamp =
                    parse_exchange_timestamp(&msg.timestamp).unwrap_or_else(Utc::now);
                // Older payloads omit executionId; fall back to the local
                // clock so the trade id stays unique enough for dedup.
                let native_id = msg
                    .execution_id
                    .unwrap_or_else(|| Utc::now().timestamp_millis() as u64);
                let trade = Trade::new(
                    Exchange::Gmo,
                    msg.symbol,
                    &native_id.to_string(),
                    msg.price,
                    msg.size,
                    side,
                    timestamp,
                );
                Ok(Decoded::Trades(vec![trade]))
            }
            MessageKind::BookSnapshot => {
                let msg: OrderbookMessage = serde_json::from_str(raw)?;
                Ok(Decoded::Book(BookUpdate::Snapshot {
                    symbol: msg.symbol,
                    bids: convert_levels(msg.bids),
                    asks: convert_levels(msg.asks),
                }))
            }
            MessageKind::BookDelta | MessageKind::Control | MessageKind::Unrecognized => {
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
