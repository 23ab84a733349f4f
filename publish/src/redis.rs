//! Redis pub/sub fanout for local consumers

use crate::error::PublishError;
use crate::requests::{MarketMakeRequest, TradeInsertRequest};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;
use tracing::{debug, info};

/// Channel naming for the two published record kinds
#[derive(Clone, Debug)]
pub struct RedisConfig {
    /// Server url, e.g. `redis://127.0.0.1:6379`
    pub url: String,
    /// Prefix for trade channels, `{prefix}:{symbol}`
    pub trade_channel_prefix: String,
    /// Prefix for board channels, `{prefix}:{symbol}`
    pub market_make_channel_prefix: String,
}

impl RedisConfig {
    /// Config with the conventional channel prefixes
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            trade_channel_prefix: "trade-insert".to_string(),
            market_make_channel_prefix: "market-make".to_string(),
        }
    }
}

/// Publishes JSON payloads on per-symbol channels.
///
/// Cloning shares the underlying multiplexed connection; the manager
/// reconnects on its own after a broken connection.
#[derive(Clone)]
pub struct RedisPublisher {
    manager: ConnectionManager,
    config: RedisConfig,
}

impl RedisPublisher {
    /// Connect and hand back a cloneable publisher
    pub async fn connect(config: RedisConfig) -> Result<Self, PublishError> {
        let client = redis::Client::open(config.url.as_str())?;
        let manager = ConnectionManager::new(client).await?;
        info!(url = %config.url, "redis publisher connected");
        Ok(Self { manager, config })
    }

    /// Publish a trade on `{trade_prefix}:{symbol}`
    pub async fn publish_trade(&self, request: &TradeInsertRequest) -> Result<(), PublishError> {
        let channel = format!("{}:{}", self.config.trade_channel_prefix, request.symbol);
        self.publish(&channel, request).await
    }

    /// Publish a board on `{market_make_prefix}:{symbol}`
    pub async fn publish_market_make(
        &self,
        request: &MarketMakeRequest,
    ) -> Result<(), PublishError> {
        let channel = format!(
            "{}:{}",
            self.config.market_make_channel_prefix, request.symbol
        );
        self.publish(&channel, request).await
    }

    async fn publish<T: Serialize>(&self, channel: &str, payload: &T) -> Result<(), PublishError> {
        let body = serde_json::to_string(payload)?;
        let mut conn = self.manager.clone();
        let receivers: i64 = conn.publish(channel, body).await?;
        debug!(channel, receivers, "published");
        Ok(())
    }
}
