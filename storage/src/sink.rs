//! Sink abstraction and the hourly-rotated CSV sink

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use common::{BestBidAsk, MarketBoard, PriceLevel, Trade};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Book levels flattened into each board row
const BOARD_COLUMNS: usize = 8;

/// Decimal places kept in CSV output: JPY prices are integral, sizes are
/// satoshi-granular
const PRICE_SCALE: u32 = 0;
const SIZE_SCALE: u32 = 8;

/// Failure writing a batch. The pipeline logs these and drops the batch.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Filesystem failure
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// Row serialization failure
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
}

/// Where batches of normalized records end up.
///
/// Implementations are driven by a single worker task, hence `&mut self`.
#[async_trait]
pub trait StorageSink: Send {
    /// Persist a batch of trades
    async fn insert_trades(&mut self, trades: &[Trade]) -> Result<(), StorageError>;
    /// Persist a batch of boards
    async fn insert_boards(&mut self, boards: &[MarketBoard]) -> Result<(), StorageError>;
    /// Persist a batch of top-of-book records
    async fn insert_best_bid_asks(&mut self, quotes: &[BestBidAsk]) -> Result<(), StorageError>;
}

/// Appends records to hourly CSV files under one directory.
///
/// Files are named `{prefix}_{yyyyMMdd}_{HH}.csv` and get a header row on
/// creation. Trades are deduplicated by trade id so replayed executions
/// after a reconnect are written once.
pub struct CsvSink {
    dir: PathBuf,
    // Grows unbounded over the process lifetime.
    seen_trades: HashSet<String>,
}

impl CsvSink {
    /// Create a sink writing under `dir`; the directory is created if absent
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            seen_trades: HashSet::new(),
        })
    }

    fn open_writer(
        &self,
        prefix: &str,
        header: &[String],
        now: DateTime<Utc>,
    ) -> Result<csv::Writer<File>, StorageError> {
        let path = self
            .dir
            .join(format!("{prefix}_{}.csv", now.format("%Y%m%d_%H")));
        let new_file = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if new_file {
            debug!(path = %path.display(), "starting new csv file");
            writer.write_record(header)?;
        }
        Ok(writer)
    }
}

#[async_trait]
impl StorageSink for CsvSink {
    async fn insert_trades(&mut self, trades: &[Trade]) -> Result<(), StorageError> {
        let fresh: Vec<&Trade> = trades
            .iter()
            .filter(|t| self.seen_trades.insert(t.trade_id.clone()))
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }
        let mut writer = self.open_writer("trades", &trade_header(), Utc::now())?;
        for trade in fresh {
            writer.write_record([
                trade.trade_id.as_str(),
                trade.exchange.as_str(),
                trade.symbol.as_str(),
                trade.side.as_str(),
                &trade.price.round_dp(PRICE_SCALE).to_string(),
                &trade.size.round_dp(SIZE_SCALE).to_string(),
                &format_ts(trade.timestamp),
                &format_ts(trade.recorded_at),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }

    async fn insert_boards(&mut self, boards: &[MarketBoard]) -> Result<(), StorageError> {
        if boards.is_empty() {
            return Ok(());
        }
        let mut writer = self.open_writer("market_boards", &board_header(), Utc::now())?;
        for board in boards {
            let mut row = vec![
                board.exchange.as_str().to_string(),
                board.symbol.clone(),
                format_ts(board.ts),
            ];
            push_side(&mut row, &board.bids);
            push_side(&mut row, &board.asks);
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }

    async fn insert_best_bid_asks(&mut self, quotes: &[BestBidAsk]) -> Result<(), StorageError> {
        if quotes.is_empty() {
            return Ok(());
        }
        let mut writer = self.open_writer("best_bid_ask", &best_header(), Utc::now())?;
        for quote in quotes {
            writer.write_record([
                quote.exchange.as_str(),
                quote.symbol.as_str(),
                &quote.best_bid.round_dp(PRICE_SCALE).to_string(),
                &quote.best_bid_volume.round_dp(SIZE_SCALE).to_string(),
                &quote.best_ask.round_dp(PRICE_SCALE).to_string(),
                &quote.best_ask_volume.round_dp(SIZE_SCALE).to_string(),
                &format_ts(quote.timestamp),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn trade_header() -> Vec<String> {
    [
        "trade_id",
        "exchange",
        "symbol",
        "side",
        "price",
        "size",
        "timestamp",
        "recorded_at",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn board_header() -> Vec<String> {
    let mut header = vec![
        "exchange".to_string(),
        "symbol".to_string(),
        "ts".to_string(),
    ];
    for side in ["bid", "ask"] {
        for i in 1..=BOARD_COLUMNS {
            header.push(format!("{side}_price_{i}"));
            header.push(format!("{side}_size_{i}"));
        }
    }
    header
}

fn best_header() -> Vec<String> {
    [
        "exchange",
        "symbol",
        "best_bid",
        "best_bid_volume",
        "best_ask",
        "best_ask_volume",
        "timestamp",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Flatten one book side to `BOARD_COLUMNS` (price, size) pairs, padding
/// shallow books with blanks
fn push_side(row: &mut Vec<String>, levels: &[PriceLevel]) {
    for i in 0..BOARD_COLUMNS {
        match levels.get(i) {
            Some(level) => {
                row.push(level.price.round_dp(PRICE_SCALE).to_string());
                row.push(level.size.round_dp(SIZE_SCALE).to_string());
            }
            None => {
                row.push(String::new());
                row.push(String::new());
            }
        }
    }
}

/// Read access used by integration checks
pub fn hourly_file(dir: &Path, prefix: &str, now: DateTime<Utc>) -> PathBuf {
    dir.join(format!("{prefix}_{}.csv", now.format("%Y%m%d_%H")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Exchange, Side};
    use rust_decimal_macros::dec;

    fn trade(id: &str) -> Trade {
        Trade::new(
            Exchange::Bitflyer,
            "BTC_JPY",
            id,
            dec!(5250000.4),
            dec!(0.123456789),
            Side::Buy,
            Utc::now(),
        )
    }

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(String::from)
            .collect()
    }

    #[tokio::test]
    async fn trades_are_deduplicated_across_batches() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path()).unwrap();

        sink.insert_trades(&[trade("1"), trade("2")]).await.unwrap();
        sink.insert_trades(&[trade("2"), trade("3")]).await.unwrap();

        let lines = read_lines(&hourly_file(dir.path(), "trades", Utc::now()));
        // header plus three unique trades
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("trade_id,exchange,symbol"));
    }

    #[tokio::test]
    async fn trade_rows_round_price_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path()).unwrap();
        sink.insert_trades(&[trade("7")]).await.unwrap();

        let lines = read_lines(&hourly_file(dir.path(), "trades", Utc::now()));
        let fields: Vec<&str> = lines[1].split(',').collect();
        assert_eq!(fields[4], "5250000");
        assert_eq!(fields[5], "0.12345679");
    }

    #[tokio::test]
    async fn shallow_boards_are_padded_with_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path()).unwrap();

        let mut board = MarketBoard::new(Exchange::Gmo, "BTC");
        board.bids.push(PriceLevel::new(dec!(7499000), dec!(0.3)));
        board.asks.push(PriceLevel::new(dec!(7501000), dec!(0.2)));
        board.asks.push(PriceLevel::new(dec!(7502000), dec!(0.1)));
        sink.insert_boards(&[board]).await.unwrap();

        let lines = read_lines(&hourly_file(dir.path(), "market_boards", Utc::now()));
        let fields: Vec<&str> = lines[1].split(',').collect();
        // 3 fixed columns plus 8 (price, size) pairs per side
        assert_eq!(fields.len(), 3 + 2 * 2 * BOARD_COLUMNS);
        assert_eq!(fields[3], "7499000");
        assert_eq!(fields[5], ""); // second bid level absent
        assert_eq!(fields[3 + 2 * BOARD_COLUMNS], "7501000");
    }

    #[tokio::test]
    async fn best_bid_ask_rows_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path()).unwrap();

        let mut board = MarketBoard::new(Exchange::Gmo, "BTC");
        board.bids.push(PriceLevel::new(dec!(7499000), dec!(0.3)));
        board.asks.push(PriceLevel::new(dec!(7501000), dec!(0.2)));
        let best = board.best_bid_ask().unwrap();
        sink.insert_best_bid_asks(&[best]).await.unwrap();

        let lines = read_lines(&hourly_file(dir.path(), "best_bid_ask", Utc::now()));
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("GMO,BTC,7499000,0.3"));
    }

    #[tokio::test]
    async fn empty_batches_create_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path()).unwrap();
        sink.insert_boards(&[]).await.unwrap();
        assert!(!hourly_file(dir.path(), "market_boards", Utc::now()).exists());
    }
}
