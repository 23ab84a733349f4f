//! Trade, order board and best bid/ask value types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Venue a record originated from
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    /// Bitflyer Lightning
    Bitflyer,
    /// GMO Coin
    Gmo,
}

impl Exchange {
    /// Canonical upper-case exchange id used in keys and storage rows
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bitflyer => "BITFLYER",
            Self::Gmo => "GMO",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Taker side of an execution
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Taker bought
    Buy,
    /// Taker sold
    Sell,
}

impl Side {
    /// Wire/storage representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }

    /// Parse an exchange-reported side string (case-insensitive)
    #[must_use]
    pub fn from_wire(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One (price, size) entry on a book side; size zero on a delta means
/// "remove this level"
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Level price
    pub price: Decimal,
    /// Resting size at this price
    pub size: Decimal,
}

impl PriceLevel {
    /// Create a new price level
    #[must_use]
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Immutable fact of a single execution
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trade {
    /// Originating exchange
    pub exchange: Exchange,
    /// Exchange-native symbol, e.g. `BTC_JPY`
    pub symbol: String,
    /// Globally unique key, `{EXCHANGE}-{native id}`
    pub trade_id: String,
    /// Execution price
    pub price: Decimal,
    /// Execution size
    pub size: Decimal,
    /// Taker side
    pub side: Side,
    /// Exchange-reported execution time
    pub timestamp: DateTime<Utc>,
    /// Local ingestion time
    pub recorded_at: DateTime<Utc>,
}

impl Trade {
    /// Build a trade, composing the globally unique id from the exchange id
    /// and the exchange-native execution id
    #[must_use]
    pub fn new(
        exchange: Exchange,
        symbol: impl Into<String>,
        native_id: &str,
        price: Decimal,
        size: Decimal,
        side: Side,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            exchange,
            symbol: symbol.into(),
            trade_id: format!("{}-{}", exchange.as_str(), native_id),
            price,
            size,
            side,
            timestamp,
            recorded_at: Utc::now(),
        }
    }
}

/// Normalized order-book snapshot for one (exchange, symbol).
///
/// Bids are held descending by price, asks ascending; the book engine is the
/// only writer and hands out owned copies at emission time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarketBoard {
    /// Originating exchange
    pub exchange: Exchange,
    /// Exchange-native symbol
    pub symbol: String,
    /// Bid levels, descending by price
    pub bids: Vec<PriceLevel>,
    /// Ask levels, ascending by price
    pub asks: Vec<PriceLevel>,
    /// Last local update time
    pub ts: DateTime<Utc>,
}

impl MarketBoard {
    /// Create an empty board
    #[must_use]
    pub fn new(exchange: Exchange, symbol: impl Into<String>) -> Self {
        Self {
            exchange,
            symbol: symbol.into(),
            bids: Vec::new(),
            asks: Vec::new(),
            ts: Utc::now(),
        }
    }

    /// Derive the top of book. Returns `None` unless both sides are
    /// non-empty.
    #[must_use]
    pub fn best_bid_ask(&self) -> Option<BestBidAsk> {
        let bid = self.bids.first()?;
        let ask = self.asks.first()?;
        Some(BestBidAsk {
            exchange: self.exchange,
            symbol: self.symbol.clone(),
            best_bid: bid.price,
            best_bid_volume: bid.size,
            best_ask: ask.price,
            best_ask_volume: ask.size,
            timestamp: self.ts,
        })
    }
}

/// Top-of-book record derived from a [`MarketBoard`]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BestBidAsk {
    /// Originating exchange
    pub exchange: Exchange,
    /// Exchange-native symbol
    pub symbol: String,
    /// Highest bid price
    pub best_bid: Decimal,
    /// Size at the best bid
    pub best_bid_volume: Decimal,
    /// Lowest ask price
    pub best_ask: Decimal,
    /// Size at the best ask
    pub best_ask_volume: Decimal,
    /// Board timestamp this was derived from
    pub timestamp: DateTime<Utc>,
}
