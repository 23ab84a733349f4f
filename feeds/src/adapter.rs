//! Capability interface implemented once per exchange
//!
//! The supervisor and book engine depend only on this trait; every
//! per-exchange quirk (channel naming, JSON field names, timestamp formats,
//! symbol casing) stays inside the adapter.

use chrono::{DateTime, Utc};
use common::{Exchange, Trade};
use lob::{BookUpdate, DepthPolicy};
use std::time::Duration;

/// Coarse classification of a raw inbound frame
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageKind {
    /// One or more executions
    TradeBatch,
    /// Full book replacement
    BookSnapshot,
    /// Changed levels only
    BookDelta,
    /// Subscription confirmations, exchange errors, heartbeats
    Control,
    /// Anything the adapter does not map
    Unrecognized,
}

/// A successfully decoded frame
#[derive(Clone, Debug)]
pub enum Decoded {
    /// Canonical trades, in wire order
    Trades(Vec<Trade>),
    /// Canonical book update
    Book(BookUpdate),
}

/// Typed parse failure. Consumed by the supervisor's per-message error
/// handling; never escalated to a connection failure.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Payload was not valid JSON or missed required fields
    #[error("malformed payload: {0}")]
    Parse(#[from] serde_json::Error),
    /// Structurally valid JSON that does not match the expected shape
    #[error("unexpected message shape: {0}")]
    Shape(String),
}

/// Exchange-specific wire parsing and subscription building
pub trait ExchangeAdapter: Send + Sync {
    /// Exchange this adapter serves
    fn exchange(&self) -> Exchange;

    /// WebSocket endpoint
    fn ws_url(&self) -> &str;

    /// Pause between consecutive subscription requests; exchanges rate-limit
    /// subscription churn (1 s on Bitflyer, 2 s on GMO)
    fn subscribe_delay(&self) -> Duration;

    /// Book depth retained per side for this exchange
    fn depth_policy(&self) -> DepthPolicy;

    /// Ordered wire messages for the subscription handshake. Order matters:
    /// snapshot channels must be subscribed before delta channels.
    fn subscription_requests(&self, symbols: &[String]) -> Vec<String>;

    /// Cheap classification of a raw frame
    fn classify(&self, raw: &str) -> MessageKind;

    /// Decode a frame already classified as trade or book data
    fn decode(&self, raw: &str, kind: MessageKind) -> Result<Decoded, FeedError>;
}

/// Both exchanges report execution times as RFC 3339 strings
pub(crate) fn parse_exchange_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
