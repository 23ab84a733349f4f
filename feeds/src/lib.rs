//! Exchange feed adapters and the connection supervisor
//!
//! - `bitflyer`: Bitflyer Lightning JSON-RPC stream
//! - `gmo`: GMO Coin public WebSocket stream
//! - `supervisor`: connection lifecycle shared by both

#![deny(clippy::all)]

pub mod adapter;
pub mod bitflyer;
pub mod event;
pub mod gmo;
pub mod supervisor;

pub use adapter::{Decoded, ExchangeAdapter, FeedError, MessageKind};
pub use bitflyer::BitflyerAdapter;
pub use event::MarketEvent;
pub use gmo::GmoAdapter;
pub use supervisor::{FeedSupervisor, SupervisorConfig, SupervisorHandle};
