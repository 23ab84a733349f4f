//! Wire shapes expected by downstream consumers
//!
//! Downstream systems trade in their own symbol universe and take plain
//! floats; conversion away from exact decimals happens here, at the last
//! possible boundary.

use common::{MarketBoard, Trade};
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

/// Levels per side forwarded to market-making consumers
const MAX_FORWARD_LEVELS: usize = 5;

/// One execution, in downstream symbol terms
#[derive(Clone, Debug, Serialize)]
pub struct TradeInsertRequest {
    /// Downstream symbol
    pub symbol: String,
    /// Execution price
    pub price: f64,
    /// Execution size
    pub quantity: f64,
    /// Taker side, `BUY` or `SELL`
    pub side: String,
}

impl TradeInsertRequest {
    /// Build from a normalized trade and its mapped downstream symbol
    #[must_use]
    pub fn new(symbol: impl Into<String>, trade: &Trade) -> Self {
        Self {
            symbol: symbol.into(),
            price: trade.price.to_f64().unwrap_or_default(),
            quantity: trade.size.to_f64().unwrap_or_default(),
            side: trade.side.as_str().to_string(),
        }
    }
}

/// One (price, quantity) level of a forwarded book
#[derive(Clone, Debug, Serialize)]
pub struct LevelRequest {
    /// Level price
    pub price: f64,
    /// Resting size
    pub quantity: f64,
}

/// Top levels of a board, in downstream symbol terms
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketMakeRequest {
    /// Downstream symbol
    pub symbol: String,
    /// Best bids, descending
    pub bid_levels: Vec<LevelRequest>,
    /// Best asks, ascending
    pub ask_levels: Vec<LevelRequest>,
}

impl MarketMakeRequest {
    /// Build from a board and its mapped downstream symbol, keeping at most
    /// [`MAX_FORWARD_LEVELS`] per side
    #[must_use]
    pub fn new(symbol: impl Into<String>, board: &MarketBoard) -> Self {
        let depth = board
            .bids
            .len()
            .max(board.asks.len())
            .min(MAX_FORWARD_LEVELS);
        let convert = |levels: &[common::PriceLevel]| {
            levels
                .iter()
                .take(depth)
                .map(|l| LevelRequest {
                    price: l.price.to_f64().unwrap_or_default(),
                    quantity: l.size.to_f64().unwrap_or_default(),
                })
                .collect()
        };
        Self {
            symbol: symbol.into(),
            bid_levels: convert(&board.bids),
            ask_levels: convert(&board.asks),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{Exchange, PriceLevel, Side};
    use rust_decimal_macros::dec;

    #[test]
    fn trade_request_serializes_with_downstream_fields() {
        let trade = Trade::new(
            Exchange::Bitflyer,
            "FX_BTC_JPY",
            "42",
            dec!(5250000),
            dec!(0.01),
            Side::Buy,
            Utc::now(),
        );
        let req = TradeInsertRequest::new("BTCJPY", &trade);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["symbol"], "BTCJPY");
        assert_eq!(json["price"], 5250000.0);
        assert_eq!(json["quantity"], 0.01);
        assert_eq!(json["side"], "BUY");
    }

    #[test]
    fn market_make_request_uses_camel_case_and_caps_depth() {
        let mut board = MarketBoard::new(Exchange::Bitflyer, "FX_BTC_JPY");
        for i in 0..7u32 {
            let offset = rust_decimal::Decimal::from(i);
            board
                .bids
                .push(PriceLevel::new(dec!(5250000) - offset, dec!(0.1)));
            board
                .asks
                .push(PriceLevel::new(dec!(5250001) + offset, dec!(0.1)));
        }
        let req = MarketMakeRequest::new("BTCJPY", &board);
        assert_eq!(req.bid_levels.len(), 5);
        assert_eq!(req.ask_levels.len(), 5);

        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("bidLevels").is_some());
        assert!(json.get("askLevels").is_some());
    }

    #[test]
    fn shallow_boards_forward_what_they_have() {
        let mut board = MarketBoard::new(Exchange::Gmo, "BTC");
        board.bids.push(PriceLevel::new(dec!(7499000), dec!(0.3)));
        let req = MarketMakeRequest::new("BTCJPY", &board);
        assert_eq!(req.bid_levels.len(), 1);
        assert!(req.ask_levels.is_empty());
    }
}
