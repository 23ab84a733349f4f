//! Order book reconstruction engine
//!
//! Reconciles exchange snapshot/delta streams into normalized per-symbol
//! boards and derives top-of-book records.

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

pub mod engine;

pub use engine::{BookEngine, BookOutput, BookUpdate, DepthPolicy};
