//! Market data recorder
//!
//! Supervises one WebSocket connection per exchange, normalizes everything
//! into trades, boards and best bid/ask records, persists them to hourly
//! CSV files and fans them out to Redis and an exchange simulator.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::RecorderConfig;
use feeds::{
    BitflyerAdapter, FeedSupervisor, GmoAdapter, MarketEvent, SupervisorConfig,
};
use publish::{DownstreamPublisher, ExchSimClient, RedisConfig, RedisPublisher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use storage::{CsvSink, PersistencePipeline};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Queue depth between the supervisors and the routing task
const EVENT_QUEUE: usize = 1024;

#[derive(Parser, Debug)]
#[command(name = "recorder", about = "Records Bitflyer and GMO Coin market data")]
struct Args {
    /// Override the CSV output directory
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = RecorderConfig::from_env().context("invalid configuration")?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    info!(data_dir = %config.data_dir.display(), "starting recorder");

    let sink = CsvSink::new(&config.data_dir).context("cannot open data directory")?;
    let pipeline = Arc::new(PersistencePipeline::start(Box::new(sink)));

    let redis = match &config.redis_url {
        Some(url) => Some(
            RedisPublisher::connect(RedisConfig::new(url))
                .await
                .context("redis connect failed")?,
        ),
        None => None,
    };
    let exchsim = config.exchsim.clone().map(ExchSimClient::new);
    if redis.is_none() && exchsim.is_none() {
        info!("no downstream configured, recording only");
    }
    let publisher = DownstreamPublisher::new(config.symbol_map.clone(), redis, exchsim);

    let (tx, mut rx) = mpsc::channel::<MarketEvent>(EVENT_QUEUE);

    let bitflyer = FeedSupervisor::new(
        BitflyerAdapter::new(&config.bitflyer_ws_url),
        SupervisorConfig::new(config.bitflyer_symbols.clone()),
    );
    let gmo = FeedSupervisor::new(
        GmoAdapter::new(&config.gmo_ws_url),
        SupervisorConfig::new(config.gmo_symbols.clone()),
    );
    let handles = [bitflyer.handle(), gmo.handle()];
    tokio::spawn(bitflyer.run(tx.clone()));
    tokio::spawn(gmo.run(tx.clone()));
    drop(tx);

    let router = {
        let pipeline = Arc::clone(&pipeline);
        let publisher = publisher.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    MarketEvent::Trade(trade) => {
                        pipeline.save_trade(trade.clone());
                        publisher.publish_trade_detached(trade);
                    }
                    MarketEvent::Board(board) => {
                        pipeline.save_board(board.clone());
                        publisher.publish_board_detached(board);
                    }
                    MarketEvent::BestBidAsk(best) => pipeline.save_best_bid_ask(best),
                }
            }
        })
    };

    tokio::signal::ctrl_c().await.context("signal handler failed")?;
    info!("shutdown requested");
    for handle in &handles {
        handle.stop();
    }
    // Supervisors notice the stop within their poll interval, drop their
    // event senders and the router drains out.
    if tokio::time::timeout(Duration::from_secs(10), router).await.is_err() {
        warn!("router did not drain in time");
    }
    pipeline.stop().await;
    info!("recorder stopped");
    Ok(())
}
