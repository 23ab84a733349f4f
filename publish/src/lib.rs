//! Downstream fanout: Redis pub/sub and authenticated HTTP forwarding
//!
//! Recording is the priority; everything in this crate is best effort.
//! Publish failures are logged and never propagate back into the feed or
//! persistence paths.

#![deny(clippy::all)]
#![deny(missing_docs)]

pub mod error;
pub mod exchsim;
pub mod redis;
pub mod requests;

pub use self::error::PublishError;
pub use self::exchsim::{ExchSimClient, ExchSimConfig};
pub use self::redis::{RedisConfig, RedisPublisher};
pub use self::requests::{LevelRequest, MarketMakeRequest, TradeInsertRequest};

use common::{Exchange, MarketBoard, Trade};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Maps (exchange, native symbol) to the downstream symbol universe.
///
/// Symbols without a mapping are recorded but not forwarded.
#[derive(Clone, Debug, Default)]
pub struct SymbolMap {
    map: HashMap<(Exchange, String), String>,
}

impl SymbolMap {
    /// Empty map; nothing gets forwarded
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mapping for one exchange-native symbol
    pub fn insert(
        &mut self,
        exchange: Exchange,
        native: impl Into<String>,
        downstream: impl Into<String>,
    ) {
        self.map
            .insert((exchange, native.into()), downstream.into());
    }

    /// Downstream symbol for an exchange-native one, if mapped
    #[must_use]
    pub fn resolve(&self, exchange: Exchange, native: &str) -> Option<&str> {
        self.map
            .get(&(exchange, native.to_string()))
            .map(String::as_str)
    }
}

/// Combines the symbol map with the optional Redis and simulator legs.
///
/// Cloning is cheap; detached publishing clones the publisher into a spawned
/// task so the caller never waits on the network.
#[derive(Clone)]
pub struct DownstreamPublisher {
    symbols: SymbolMap,
    redis: Option<RedisPublisher>,
    exchsim: Option<ExchSimClient>,
}

impl DownstreamPublisher {
    /// Assemble the fanout; either leg may be absent
    #[must_use]
    pub fn new(
        symbols: SymbolMap,
        redis: Option<RedisPublisher>,
        exchsim: Option<ExchSimClient>,
    ) -> Self {
        Self {
            symbols,
            redis,
            exchsim,
        }
    }

    /// Forward a trade on both legs. Unmapped symbols are skipped silently;
    /// a failure on one leg does not stop the other.
    pub async fn publish_trade(&self, trade: &Trade) -> Result<(), PublishError> {
        let Some(symbol) = self.symbols.resolve(trade.exchange, &trade.symbol) else {
            debug!(exchange = %trade.exchange, symbol = %trade.symbol, "no downstream mapping, trade not forwarded");
            return Ok(());
        };
        let request = TradeInsertRequest::new(symbol, trade);
        let mut result = Ok(());
        if let Some(redis) = &self.redis {
            if let Err(err) = redis.publish_trade(&request).await {
                warn!(error = %err, symbol = %request.symbol, "redis trade publish failed");
                result = Err(err);
            }
        }
        if let Some(sim) = &self.exchsim {
            if let Err(err) = sim.send_trade_insert(&request).await {
                warn!(error = %err, symbol = %request.symbol, "simulator trade forward failed");
                result = Err(err);
            }
        }
        result
    }

    /// Forward a board on both legs, top levels only
    pub async fn publish_board(&self, board: &MarketBoard) -> Result<(), PublishError> {
        let Some(symbol) = self.symbols.resolve(board.exchange, &board.symbol) else {
            debug!(exchange = %board.exchange, symbol = %board.symbol, "no downstream mapping, board not forwarded");
            return Ok(());
        };
        let request = MarketMakeRequest::new(symbol, board);
        let mut result = Ok(());
        if let Some(redis) = &self.redis {
            if let Err(err) = redis.publish_market_make(&request).await {
                warn!(error = %err, symbol = %request.symbol, "redis board publish failed");
                result = Err(err);
            }
        }
        if let Some(sim) = &self.exchsim {
            if let Err(err) = sim.send_market_make(&request).await {
                warn!(error = %err, symbol = %request.symbol, "simulator board forward failed");
                result = Err(err);
            }
        }
        result
    }

    /// Fire-and-forget trade publish; failures end up in the log
    pub fn publish_trade_detached(&self, trade: Trade) {
        let this = self.clone();
        tokio::spawn(async move {
            let _ = this.publish_trade(&trade).await;
        });
    }

    /// Fire-and-forget board publish; failures end up in the log
    pub fn publish_board_detached(&self, board: MarketBoard) {
        let this = self.clone();
        tokio::spawn(async move {
            let _ = this.publish_board(&board).await;
        });
    }
}
