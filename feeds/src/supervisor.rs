//! Connection lifecycle shared by every exchange adapter
//!
//! One supervisor owns one WebSocket connection, the adapter that speaks its
//! protocol and the book engine for its exchange. Sessions that fail are
//! retried forever with exponential backoff; a stop request ends the loop.

use crate::adapter::{Decoded, ExchangeAdapter, MessageKind};
use crate::event::MarketEvent;
use anyhow::{anyhow, Context};
use futures_util::{SinkExt, StreamExt};
use lob::BookEngine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Lifecycle of one supervised connection, logged on every transition
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionPhase {
    /// No connection and none in progress
    Disconnected,
    /// TCP/TLS/WebSocket handshake in flight
    Connecting,
    /// Connected, paced subscription requests being sent
    Subscribing,
    /// Fully subscribed, frames flowing
    Streaming,
    /// Session lost, waiting out the backoff
    Reconnecting,
}

/// Tunables for one supervisor
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Symbols to subscribe, in the adapter's native casing
    pub symbols: Vec<String>,
    /// First reconnect delay
    pub reconnect_base: Duration,
    /// Upper bound on the reconnect delay
    pub reconnect_cap: Duration,
}

impl SupervisorConfig {
    /// Config with production reconnect timing
    #[must_use]
    pub fn new(symbols: Vec<String>) -> Self {
        Self {
            symbols,
            reconnect_base: Duration::from_secs(5),
            reconnect_cap: Duration::from_secs(60),
        }
    }
}

/// Cloneable remote control for a running supervisor
#[derive(Clone, Debug)]
pub struct SupervisorHandle {
    stopped: Arc<AtomicBool>,
}

impl SupervisorHandle {
    /// Request a graceful stop. Idempotent; later calls are no-ops.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            info!("supervisor stop requested");
        }
    }
}

/// Owns the connection, the adapter and the book engine for one exchange
pub struct FeedSupervisor<A: ExchangeAdapter> {
    adapter: A,
    config: SupervisorConfig,
    engine: BookEngine,
    stopped: Arc<AtomicBool>,
    reconnecting: AtomicBool,
}

impl<A: ExchangeAdapter> FeedSupervisor<A> {
    /// Build a supervisor; the engine's depth policy comes from the adapter
    #[must_use]
    pub fn new(adapter: A, config: SupervisorConfig) -> Self {
        let engine = BookEngine::new(adapter.exchange(), adapter.depth_policy());
        Self {
            adapter,
            config,
            engine,
            stopped: Arc::new(AtomicBool::new(false)),
            reconnecting: AtomicBool::new(false),
        }
    }

    /// Handle for stopping this supervisor from another task
    #[must_use]
    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            stopped: Arc::clone(&self.stopped),
        }
    }

    /// Run until stopped. Sessions that end in error are retried with
    /// exponential backoff; the attempt counter resets once a session gets
    /// through its full subscription handshake.
    pub async fn run(mut self, tx: mpsc::Sender<MarketEvent>) {
        let exchange = self.adapter.exchange();
        let mut attempts: u32 = 0;
        while !self.stopped.load(Ordering::SeqCst) {
            match self.session(&tx, &mut attempts).await {
                Ok(()) => break,
                Err(err) => {
                    if self.stopped.load(Ordering::SeqCst) {
                        break;
                    }
                    // Single flight: a session failure schedules exactly one
                    // reconnect regardless of how it was torn down.
                    if self
                        .reconnecting
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        let delay = backoff_delay(
                            self.config.reconnect_base,
                            self.config.reconnect_cap,
                            attempts,
                        );
                        attempts = attempts.saturating_add(1);
                        warn!(
                            %exchange,
                            error = %err,
                            attempts,
                            delay_secs = delay.as_secs(),
                            phase = ?ConnectionPhase::Reconnecting,
                            "session lost, reconnecting"
                        );
                        tokio::time::sleep(delay).await;
                        self.reconnecting.store(false, Ordering::SeqCst);
                    }
                }
            }
        }
        info!(%exchange, phase = ?ConnectionPhase::Disconnected, "supervisor stopped");
    }

    /// One connect/subscribe/stream cycle. `Ok(())` means a stop was
    /// requested; any error means the session should be retried.
    async fn session(
        &mut self,
        tx: &mpsc::Sender<MarketEvent>,
        attempts: &mut u32,
    ) -> anyhow::Result<()> {
        let exchange = self.adapter.exchange();
        info!(%exchange, url = self.adapter.ws_url(), phase = ?ConnectionPhase::Connecting, "connecting");
        let (ws, _) = connect_async(self.adapter.ws_url())
            .await
            .context("websocket connect failed")?;
        let (mut write, mut read) = ws.split();

        info!(%exchange, phase = ?ConnectionPhase::Subscribing, "subscribing");
        for request in self.adapter.subscription_requests(&self.config.symbols) {
            if self.stopped.load(Ordering::SeqCst) {
                return Ok(());
            }
            debug!(%exchange, %request, "sending subscription");
            write
                .send(Message::Text(request))
                .await
                .context("subscription send failed")?;
            tokio::time::sleep(self.adapter.subscribe_delay()).await;
        }
        *attempts = 0;
        info!(%exchange, phase = ?ConnectionPhase::Streaming, "streaming");

        let mut stop_poll = tokio::time::interval(Duration::from_millis(500));
        loop {
            tokio::select! {
                _ = stop_poll.tick() => {
                    if self.stopped.load(Ordering::SeqCst) {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.dispatch(&text, tx).await,
                    Some(Ok(Message::Ping(payload))) => {
                        write
                            .send(Message::Pong(payload))
                            .await
                            .context("pong send failed")?;
                    }
                    Some(Ok(Message::Close(reason))) => {
                        return Err(anyhow!("server closed the connection: {reason:?}"));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(err).context("websocket read failed"),
                    None => return Err(anyhow!("websocket stream ended")),
                },
            }
        }
    }

    /// Route one text frame. Errors here are per-message: they are logged
    /// and dropped so a single bad payload never costs the connection.
    async fn dispatch(&mut self, raw: &str, tx: &mpsc::Sender<MarketEvent>) {
        let kind = self.adapter.classify(raw);
        match kind {
            MessageKind::Control => {
                debug!(exchange = %self.adapter.exchange(), %raw, "control frame");
            }
            MessageKind::Unrecognized => {
                debug!(exchange = %self.adapter.exchange(), %raw, "unrecognized frame");
            }
            MessageKind::TradeBatch | MessageKind::BookSnapshot | MessageKind::BookDelta => {
                match self.adapter.decode(raw, kind) {
                    Ok(Decoded::Trades(trades)) => {
                        for trade in trades {
                            self.forward(tx, MarketEvent::Trade(trade)).await;
                        }
                    }
                    Ok(Decoded::Book(update)) => {
                        let output = self.engine.apply(update);
                        self.forward(tx, MarketEvent::Board(output.board)).await;
                        if let Some(best) = output.best {
                            self.forward(tx, MarketEvent::BestBidAsk(best)).await;
                        }
                    }
                    Err(err) => {
                        warn!(
                            exchange = %self.adapter.exchange(),
                            error = %err,
                            %raw,
                            "dropping undecodable frame"
                        );
                    }
                }
            }
        }
    }

    async fn forward(&self, tx: &mpsc::Sender<MarketEvent>, event: MarketEvent) {
        // A closed channel means the consumer is gone; treat it as a stop.
        if tx.send(event).await.is_err() {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }
}

/// Exponential backoff: `base * 2^attempt`, capped. The shift is clamped so
/// large attempt counts cannot overflow.
#[must_use]
pub fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(16)).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{Exchange, Side, Trade};
    use lob::{BookUpdate, DepthPolicy};
    use rust_decimal_macros::dec;

    #[test]
    fn backoff_doubles_then_caps() {
        let base = Duration::from_secs(5);
        let cap = Duration::from_secs(60);
        assert_eq!(backoff_delay(base, cap, 0), Duration::from_secs(5));
        assert_eq!(backoff_delay(base, cap, 1), Duration::from_secs(10));
        assert_eq!(backoff_delay(base, cap, 3), Duration::from_secs(40));
        assert_eq!(backoff_delay(base, cap, 4), Duration::from_secs(60));
        assert_eq!(backoff_delay(base, cap, 63), Duration::from_secs(60));
    }

    /// Test double that emits a canned decode result for any data frame
    struct StubAdapter {
        result: Result<Decoded, &'static str>,
    }

    impl ExchangeAdapter for StubAdapter {
        fn exchange(&self) -> Exchange {
            Exchange::Gmo
        }
        fn ws_url(&self) -> &str {
            "wss://stub.invalid"
        }
        fn subscribe_delay(&self) -> Duration {
            Duration::ZERO
        }
        fn depth_policy(&self) -> DepthPolicy {
            DepthPolicy::Full
        }
        fn subscription_requests(&self, _symbols: &[String]) -> Vec<String> {
            Vec::new()
        }
        fn classify(&self, raw: &str) -> MessageKind {
            match raw {
                "control" => MessageKind::Control,
                _ => MessageKind::TradeBatch,
            }
        }
        fn decode(&self, _raw: &str, _kind: MessageKind) -> Result<Decoded, crate::FeedError> {
            self.result
                .clone()
                .map_err(|msg| crate::FeedError::Shape(msg.to_string()))
        }
    }

    fn stub_trade() -> Trade {
        Trade::new(
            Exchange::Gmo,
            "BTC",
            "1",
            dec!(7500000),
            dec!(0.1),
            Side::Buy,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn dispatch_forwards_decoded_trades() {
        let adapter = StubAdapter {
            result: Ok(Decoded::Trades(vec![stub_trade()])),
        };
        let mut sup = FeedSupervisor::new(adapter, SupervisorConfig::new(vec![]));
        let (tx, mut rx) = mpsc::channel(8);

        sup.dispatch("anything", &tx).await;
        let event = rx.try_recv().expect("one event expected");
        assert!(matches!(event, MarketEvent::Trade(t) if t.trade_id == "GMO-1"));
    }

    #[tokio::test]
    async fn dispatch_emits_board_and_best_for_book_updates() {
        let adapter = StubAdapter {
            result: Ok(Decoded::Book(BookUpdate::Snapshot {
                symbol: "BTC".to_string(),
                bids: vec![common::PriceLevel::new(dec!(100), dec!(1))],
                asks: vec![common::PriceLevel::new(dec!(101), dec!(2))],
            })),
        };
        let mut sup = FeedSupervisor::new(adapter, SupervisorConfig::new(vec![]));
        let (tx, mut rx) = mpsc::channel(8);

        sup.dispatch("anything", &tx).await;
        assert!(matches!(rx.try_recv(), Ok(MarketEvent::Board(_))));
        assert!(matches!(rx.try_recv(), Ok(MarketEvent::BestBidAsk(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn decode_errors_are_dropped_not_fatal() {
        let adapter = StubAdapter {
            result: Err("bad frame"),
        };
        let mut sup = FeedSupervisor::new(adapter, SupervisorConfig::new(vec![]));
        let (tx, mut rx) = mpsc::channel(8);

        sup.dispatch("anything", &tx).await;
        sup.dispatch("control", &tx).await;
        assert!(rx.try_recv().is_err());
        assert!(!sup.stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn stop_is_idempotent() {
        let adapter = StubAdapter {
            result: Err("unused"),
        };
        let sup = FeedSupervisor::new(adapter, SupervisorConfig::new(vec![]));
        let handle = sup.handle();
        handle.stop();
        handle.stop();
        assert!(sup.stopped.load(Ordering::SeqCst));
    }
}
