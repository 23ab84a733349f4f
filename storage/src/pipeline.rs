//! Queue-backed persistence decoupling ingestion from disk writes
//!
//! Producers enqueue and return immediately. A single worker drains the
//! three queues in bounded batches and hands them to the sink; a sink
//! failure costs at most one batch, never the feed.

use crate::sink::StorageSink;
use common::{BestBidAsk, MarketBoard, Trade};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Records drained from one queue per worker iteration
const BATCH_LIMIT: usize = 100;
/// Worker sleep when every queue is empty
const IDLE_SLEEP: Duration = Duration::from_millis(100);
/// How long `stop` waits for the worker to drain before abandoning it
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Fan-in point for everything that must reach disk
pub struct PersistencePipeline {
    trade_tx: mpsc::UnboundedSender<Trade>,
    board_tx: mpsc::UnboundedSender<MarketBoard>,
    best_tx: mpsc::UnboundedSender<BestBidAsk>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PersistencePipeline {
    /// Spawn the worker and return the producer side
    #[must_use]
    pub fn start(sink: Box<dyn StorageSink>) -> Self {
        let (trade_tx, trade_rx) = mpsc::unbounded_channel();
        let (board_tx, board_rx) = mpsc::unbounded_channel();
        let (best_tx, best_rx) = mpsc::unbounded_channel();
        let running = Arc::new(AtomicBool::new(true));
        let worker = tokio::spawn(worker_loop(
            sink,
            trade_rx,
            board_rx,
            best_rx,
            Arc::clone(&running),
        ));
        Self {
            trade_tx,
            board_tx,
            best_tx,
            running,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueue a trade; never blocks
    pub fn save_trade(&self, trade: Trade) {
        if self.trade_tx.send(trade).is_err() {
            warn!("persistence worker gone, dropping trade");
        }
    }

    /// Enqueue a board; never blocks
    pub fn save_board(&self, board: MarketBoard) {
        if self.board_tx.send(board).is_err() {
            warn!("persistence worker gone, dropping board");
        }
    }

    /// Enqueue a top-of-book record; never blocks
    pub fn save_best_bid_ask(&self, quote: BestBidAsk) {
        if self.best_tx.send(quote).is_err() {
            warn!("persistence worker gone, dropping best bid/ask");
        }
    }

    /// Stop the worker after it drains what is already queued. Idempotent;
    /// gives up after [`STOP_TIMEOUT`].
    pub async fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            let handle = self.worker.lock().await.take();
            if let Some(mut handle) = handle {
                if tokio::time::timeout(STOP_TIMEOUT, &mut handle).await.is_err() {
                    warn!("persistence worker did not drain in time, aborting");
                    handle.abort();
                }
            }
        }
    }
}

async fn worker_loop(
    mut sink: Box<dyn StorageSink>,
    mut trade_rx: mpsc::UnboundedReceiver<Trade>,
    mut board_rx: mpsc::UnboundedReceiver<MarketBoard>,
    mut best_rx: mpsc::UnboundedReceiver<BestBidAsk>,
    running: Arc<AtomicBool>,
) {
    loop {
        let trades = drain(&mut trade_rx);
        let boards = drain(&mut board_rx);
        let quotes = drain(&mut best_rx);
        let drained = trades.len() + boards.len() + quotes.len();

        if !trades.is_empty() {
            if let Err(err) = sink.insert_trades(&trades).await {
                warn!(error = %err, count = trades.len(), "trade batch write failed, batch dropped");
            }
        }
        if !boards.is_empty() {
            if let Err(err) = sink.insert_boards(&boards).await {
                warn!(error = %err, count = boards.len(), "board batch write failed, batch dropped");
            }
        }
        if !quotes.is_empty() {
            if let Err(err) = sink.insert_best_bid_asks(&quotes).await {
                warn!(error = %err, count = quotes.len(), "best bid/ask batch write failed, batch dropped");
            }
        }

        if drained == 0 {
            if !running.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(IDLE_SLEEP).await;
        }
    }
    debug!("persistence worker drained and stopped");
}

fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut batch = Vec::new();
    while batch.len() < BATCH_LIMIT {
        match rx.try_recv() {
            Ok(item) => batch.push(item),
            Err(_) => break,
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::StorageError;
    use async_trait::async_trait;
    use chrono::Utc;
    use common::{Exchange, Side};
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;

    struct CountingSink {
        trades: Arc<AtomicUsize>,
        boards: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl StorageSink for CountingSink {
        async fn insert_trades(&mut self, trades: &[Trade]) -> Result<(), StorageError> {
            self.trades.fetch_add(trades.len(), Ordering::SeqCst);
            Ok(())
        }
        async fn insert_boards(&mut self, boards: &[MarketBoard]) -> Result<(), StorageError> {
            self.boards.fetch_add(boards.len(), Ordering::SeqCst);
            Ok(())
        }
        async fn insert_best_bid_asks(&mut self, _: &[BestBidAsk]) -> Result<(), StorageError> {
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl StorageSink for FailingSink {
        async fn insert_trades(&mut self, _: &[Trade]) -> Result<(), StorageError> {
            Err(StorageError::Io(std::io::Error::other("disk full")))
        }
        async fn insert_boards(&mut self, _: &[MarketBoard]) -> Result<(), StorageError> {
            Err(StorageError::Io(std::io::Error::other("disk full")))
        }
        async fn insert_best_bid_asks(&mut self, _: &[BestBidAsk]) -> Result<(), StorageError> {
            Err(StorageError::Io(std::io::Error::other("disk full")))
        }
    }

    fn trade(id: &str) -> Trade {
        Trade::new(
            Exchange::Gmo,
            "BTC",
            id,
            dec!(7500000),
            dec!(0.1),
            Side::Sell,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn stop_drains_everything_already_queued() {
        let trades = Arc::new(AtomicUsize::new(0));
        let boards = Arc::new(AtomicUsize::new(0));
        let pipeline = PersistencePipeline::start(Box::new(CountingSink {
            trades: Arc::clone(&trades),
            boards: Arc::clone(&boards),
        }));

        for i in 0..250 {
            pipeline.save_trade(trade(&i.to_string()));
        }
        pipeline.save_board(MarketBoard::new(Exchange::Gmo, "BTC"));
        pipeline.stop().await;

        assert_eq!(trades.load(Ordering::SeqCst), 250);
        assert_eq!(boards.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sink_failures_never_block_producers() {
        let pipeline = PersistencePipeline::start(Box::new(FailingSink));
        for i in 0..10 {
            pipeline.save_trade(trade(&i.to_string()));
        }
        pipeline.stop().await;
        // enqueue after stop is dropped with a log, not a panic
        pipeline.save_trade(trade("late"));
    }

    #[tokio::test]
    async fn stop_twice_is_harmless() {
        let pipeline = PersistencePipeline::start(Box::new(FailingSink));
        pipeline.stop().await;
        pipeline.stop().await;
    }
}
