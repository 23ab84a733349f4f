//! Unified event type fanned out by the supervisors

use common::{BestBidAsk, MarketBoard, Trade};
use serde::{Deserialize, Serialize};

/// Normalized market data event crossing the supervisor boundary.
///
/// Every variant is an owned copy; downstream consumers never see live
/// engine state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MarketEvent {
    /// Canonical execution record
    Trade(Trade),
    /// Order board after a snapshot or delta application
    Board(MarketBoard),
    /// Derived top of book
    BestBidAsk(BestBidAsk),
}
