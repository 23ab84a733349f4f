//! Canonical market data records shared across the recorder

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

pub mod market;

pub use market::{BestBidAsk, Exchange, MarketBoard, PriceLevel, Side, Trade};
