//! Persistence: the sink abstraction, the CSV sink and the batching pipeline

#![deny(clippy::all)]
#![deny(missing_docs)]

pub mod pipeline;
pub mod sink;

pub use pipeline::PersistencePipeline;
pub use sink::{CsvSink, StorageError, StorageSink};
