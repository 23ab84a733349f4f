//! Per-symbol book state and the snapshot/delta merge

use chrono::Utc;
use common::{BestBidAsk, Exchange, MarketBoard, PriceLevel};
use std::collections::HashMap;

/// How many levels a side retains after each update.
///
/// This is an adapter-level policy, not an engine invariant: GMO boards are
/// truncated to the top 8, Bitflyer boards keep the full received depth.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DepthPolicy {
    /// Retain every received level
    Full,
    /// Retain only the best N levels per side
    TopN(usize),
}

/// A decoded book message, already normalized to canonical levels
#[derive(Clone, Debug)]
pub enum BookUpdate {
    /// Full replacement of a symbol's book
    Snapshot {
        /// Exchange-native symbol
        symbol: String,
        /// Bid levels as received
        bids: Vec<PriceLevel>,
        /// Ask levels as received
        asks: Vec<PriceLevel>,
    },
    /// Changed levels only; size zero removes the level at that price
    Delta {
        /// Exchange-native symbol
        symbol: String,
        /// Changed bid levels
        bids: Vec<PriceLevel>,
        /// Changed ask levels
        asks: Vec<PriceLevel>,
    },
}

impl BookUpdate {
    /// The symbol this update applies to
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Snapshot { symbol, .. } | Self::Delta { symbol, .. } => symbol,
        }
    }
}

/// Result of applying one update: an owned board copy for the persistence
/// and publish boundaries, plus the derived top of book when both sides are
/// non-empty
#[derive(Clone, Debug)]
pub struct BookOutput {
    /// Owned copy of the board after the update
    pub board: MarketBoard,
    /// Derived top of book, absent while either side is empty
    pub best: Option<BestBidAsk>,
}

/// Owns every per-symbol board for one exchange.
///
/// Single writer: only the task processing that exchange's messages calls
/// [`BookEngine::apply`], so merges for a symbol are strictly sequential.
#[derive(Debug)]
pub struct BookEngine {
    exchange: Exchange,
    depth: DepthPolicy,
    books: HashMap<String, MarketBoard>,
}

impl BookEngine {
    /// Create an engine for one exchange with its depth policy
    #[must_use]
    pub fn new(exchange: Exchange, depth: DepthPolicy) -> Self {
        Self {
            exchange,
            depth,
            books: HashMap::new(),
        }
    }

    /// Apply a snapshot or delta and return the updated board plus the
    /// derived top of book. The board timestamp is stamped with local time;
    /// exchanges do not reliably provide one for deltas.
    pub fn apply(&mut self, update: BookUpdate) -> BookOutput {
        let depth = self.depth;
        let exchange = self.exchange;
        let board = self
            .books
            .entry(update.symbol().to_string())
            .or_insert_with(|| MarketBoard::new(exchange, update.symbol()));

        match update {
            BookUpdate::Snapshot { bids, asks, .. } => {
                board.bids = bids;
                board.asks = asks;
                sort_descending(&mut board.bids);
                sort_ascending(&mut board.asks);
            }
            BookUpdate::Delta { bids, asks, .. } => {
                merge_side(&mut board.bids, bids);
                merge_side(&mut board.asks, asks);
                sort_descending(&mut board.bids);
                sort_ascending(&mut board.asks);
            }
        }
        truncate(&mut board.bids, depth);
        truncate(&mut board.asks, depth);
        board.ts = Utc::now();

        BookOutput {
            best: board.best_bid_ask(),
            board: board.clone(),
        }
    }

    /// Read access to the live board for a symbol
    #[must_use]
    pub fn book(&self, symbol: &str) -> Option<&MarketBoard> {
        self.books.get(symbol)
    }
}

/// Merge rule per changed level: size zero removes the exact price, an
/// existing price has its size replaced, anything else is inserted.
/// Last-applied-wins if the same price repeats within one delta.
fn merge_side(levels: &mut Vec<PriceLevel>, changes: Vec<PriceLevel>) {
    for change in changes {
        if change.size.is_zero() {
            levels.retain(|level| level.price != change.price);
        } else if let Some(existing) = levels.iter_mut().find(|l| l.price == change.price) {
            existing.size = change.size;
        } else {
            levels.push(change);
        }
    }
}

fn sort_descending(levels: &mut [PriceLevel]) {
    levels.sort_by(|a, b| b.price.cmp(&a.price));
}

fn sort_ascending(levels: &mut [PriceLevel]) {
    levels.sort_by(|a, b| a.price.cmp(&b.price));
}

fn truncate(levels: &mut Vec<PriceLevel>, depth: DepthPolicy) {
    if let DepthPolicy::TopN(n) = depth {
        levels.truncate(n);
    }
}
