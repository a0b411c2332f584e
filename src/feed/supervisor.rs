//! Connection supervisor: one generation of feed tasks at a time.

use super::extract::extract_price;
use super::health::FeedHealth;
use super::watchdog::{run_fallback_poller, run_watchdog, StalenessPolicy};
use super::{PriceTick, TickSource};
use crate::config::FeedConfig;
use crate::exchange::{BinanceWebSocket, MarketData, PriceStream, StreamEnd};
use crate::utils::{StopSignal, STOP_POLL_INTERVAL};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tracing::{info, trace, warn};

/// Time allowed for a generation's tasks to notice their stop signal.
const JOIN_GRACE: Duration = Duration::from_secs(5);

/// Runs the websocket streams, watchdog and fallback poller, and rebuilds
/// them whenever a stream drops or the watchdog gives up on it.
///
/// Only the transport is rebuilt. The tick channel sender is shared across
/// generations so the consumer never notices a reconnect.
pub struct FeedSupervisor {
    symbol: String,
    config: FeedConfig,
    websocket: BinanceWebSocket,
    market: Arc<dyn MarketData>,
    health: Arc<FeedHealth>,
}

impl FeedSupervisor {
    pub fn new(
        symbol: &str,
        config: FeedConfig,
        websocket: BinanceWebSocket,
        market: Arc<dyn MarketData>,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            config,
            websocket,
            market,
            health: Arc::new(FeedHealth::new()),
        }
    }

    pub fn health(&self) -> Arc<FeedHealth> {
        self.health.clone()
    }

    fn streams(&self) -> Vec<PriceStream> {
        let mut streams = vec![PriceStream::AggTrade];
        if self.config.use_mark_price {
            streams.push(PriceStream::MarkPrice);
        }
        streams
    }

    fn backoff(&self) -> Duration {
        let min = self.config.reconnect_backoff_min_ms;
        let max = self.config.reconnect_backoff_max_ms.max(min);
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    /// Run until `shutdown` fires or the tick receiver is dropped.
    /// Returns the number of connection generations started.
    pub async fn run(&self, tx: mpsc::Sender<PriceTick>, shutdown: StopSignal) -> u64 {
        let mut generation = 0u64;

        while !shutdown.is_triggered() && !tx.is_closed() {
            generation += 1;
            let stop = StopSignal::new();
            let reconnect = Arc::new(Notify::new());
            self.health.reset_baseline();

            info!(
                symbol = %self.symbol,
                generation,
                streams = self.streams().len(),
                fallback = self.config.fallback_enabled,
                "Starting feed"
            );
            let mut tasks = self.spawn_generation(&tx, &stop, &reconnect);

            let mut shutdown_check = tokio::time::interval(STOP_POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = reconnect.notified() => {
                        info!(generation, "Reconnect requested");
                        break;
                    }
                    _ = shutdown_check.tick() => {
                        if shutdown.is_triggered() || tx.is_closed() {
                            break;
                        }
                    }
                }
            }

            stop.trigger();
            let joined = tokio::time::timeout(JOIN_GRACE, async {
                while let Some(result) = tasks.join_next().await {
                    if let Err(e) = result {
                        warn!(error = %e, "Feed task panicked");
                    }
                }
            })
            .await;
            if joined.is_err() {
                warn!(generation, "Feed tasks did not stop in time, aborting");
                tasks.shutdown().await;
            }

            if shutdown.is_triggered() || tx.is_closed() {
                break;
            }

            let backoff = self.backoff();
            info!(
                generation,
                backoff_ms = backoff.as_millis() as u64,
                "Reconnecting feed"
            );
            tokio::time::sleep(backoff).await;
        }

        info!(symbol = %self.symbol, generations = generation, "Feed supervisor stopped");
        generation
    }

    fn spawn_generation(
        &self,
        tx: &mpsc::Sender<PriceTick>,
        stop: &StopSignal,
        reconnect: &Arc<Notify>,
    ) -> JoinSet<()> {
        let mut tasks = JoinSet::new();
        let ping_every = Duration::from_secs(self.config.ping_interval_secs);

        for stream in self.streams() {
            let websocket = self.websocket.clone();
            let symbol = self.symbol.clone();
            let tx = tx.clone();
            let stop = stop.clone();
            let health = self.health.clone();
            let reconnect = reconnect.clone();
            let source = TickSource::from(stream);

            tasks.spawn(async move {
                let parser = move |text: &str| {
                    let Some(price) = extract_price(text) else {
                        trace!(stream = stream.name(), "Message without price dropped");
                        return None;
                    };
                    health.record_tick();
                    Some(PriceTick::new(price, source))
                };

                match websocket
                    .run_stream(stream, &symbol, tx, stop, ping_every, parser)
                    .await
                {
                    Ok(StreamEnd::Stopped) => {}
                    Ok(end) => {
                        warn!(stream = stream.name(), ?end, "Stream ended");
                        reconnect.notify_one();
                    }
                    Err(e) => {
                        warn!(stream = stream.name(), error = %e, "Stream failed");
                        reconnect.notify_one();
                    }
                }
            });
        }

        tasks.spawn(run_watchdog(
            self.health.clone(),
            StalenessPolicy::from(&self.config),
            stop.clone(),
            reconnect.clone(),
        ));

        if self.config.fallback_enabled {
            tasks.spawn(run_fallback_poller(
                self.market.clone(),
                self.symbol.clone(),
                self.health.clone(),
                Duration::from_secs(self.config.fallback_interval_secs),
                tx.clone(),
                stop.clone(),
            ));
        }

        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockExchange;
    use rust_decimal_macros::dec;

    fn supervisor(config: FeedConfig) -> FeedSupervisor {
        // Nothing listens on port 1, so every connection attempt fails fast
        FeedSupervisor::new(
            "BTCUSDT",
            config,
            BinanceWebSocket::with_base_url("ws://127.0.0.1:1"),
            Arc::new(MockExchange::new(dec!(1000))),
        )
    }

    fn fast_config() -> FeedConfig {
        FeedConfig {
            reconnect_backoff_min_ms: 1,
            reconnect_backoff_max_ms: 5,
            fallback_enabled: false,
            ..FeedConfig::default()
        }
    }

    #[test]
    fn test_streams_follow_mark_price_flag() {
        let both = supervisor(FeedConfig::default());
        assert_eq!(
            both.streams(),
            vec![PriceStream::AggTrade, PriceStream::MarkPrice]
        );

        let trades_only = supervisor(FeedConfig {
            use_mark_price: false,
            ..FeedConfig::default()
        });
        assert_eq!(trades_only.streams(), vec![PriceStream::AggTrade]);
    }

    #[test]
    fn test_backoff_within_bounds() {
        let supervisor = supervisor(FeedConfig::default());
        for _ in 0..100 {
            let backoff = supervisor.backoff();
            assert!(backoff >= Duration::from_millis(500));
            assert!(backoff <= Duration::from_millis(3000));
        }
    }

    #[tokio::test]
    async fn test_failed_streams_trigger_reconnects_until_shutdown() {
        let supervisor = Arc::new(supervisor(fast_config()));
        let (tx, _rx) = mpsc::channel(16);
        let shutdown = StopSignal::new();

        let handle = {
            let supervisor = supervisor.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { supervisor.run(tx, shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(1500)).await;
        shutdown.trigger();

        let generations = tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("supervisor stopped")
            .unwrap();
        assert!(generations >= 2, "only {} generations", generations);
    }

    #[tokio::test]
    async fn test_stops_when_receiver_dropped() {
        let supervisor = supervisor(fast_config());
        let (tx, rx) = mpsc::channel(16);
        drop(rx);

        let generations = tokio::time::timeout(
            Duration::from_secs(5),
            supervisor.run(tx, StopSignal::new()),
        )
        .await
        .expect("supervisor stopped");
        assert_eq!(generations, 0);
    }
}
