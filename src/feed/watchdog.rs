//! Staleness watchdog and REST fallback poller.

use super::health::FeedHealth;
use super::{PriceTick, TickSource};
use crate::config::FeedConfig;
use crate::exchange::MarketData;
use crate::utils::{StopSignal, STOP_POLL_INTERVAL};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

/// Thresholds applied to the age of the last real tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
    pub check_every: Duration,
    pub stale_after: Duration,
    pub reconnect_after: Duration,
}

impl From<&FeedConfig> for StalenessPolicy {
    fn from(config: &FeedConfig) -> Self {
        Self {
            check_every: Duration::from_secs(config.watchdog_interval_secs),
            stale_after: Duration::from_secs(config.stale_after_secs),
            reconnect_after: Duration::from_secs(config.reconnect_after_secs),
        }
    }
}

/// Watch tick age until `stop` fires or a reconnect is requested.
///
/// Marks the feed stale past `stale_after` and notifies `reconnect` past
/// `reconnect_after`, then exits.
pub async fn run_watchdog(
    health: Arc<FeedHealth>,
    policy: StalenessPolicy,
    stop: StopSignal,
    reconnect: Arc<Notify>,
) {
    let mut ticker = tokio::time::interval(policy.check_every);
    ticker.tick().await;
    let mut stop_check = tokio::time::interval(STOP_POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop_check.tick() => {
                if stop.is_triggered() {
                    return;
                }
                continue;
            }
        }
        if stop.is_triggered() {
            return;
        }

        let age = health.tick_age();
        if age > policy.reconnect_after {
            warn!(age_secs = age.as_secs(), "No ticks for too long, requesting reconnect");
            reconnect.notify_one();
            return;
        }

        if age > policy.stale_after && health.mark_stale() {
            warn!(age_secs = age.as_secs(), "Feed is stale");
        }
    }
}

/// Poll the REST price while the feed is stale.
///
/// Synthetic ticks do not refresh the feed health, so polling continues
/// until a real stream tick clears the stale flag.
pub async fn run_fallback_poller(
    market: Arc<dyn MarketData>,
    symbol: String,
    health: Arc<FeedHealth>,
    every: Duration,
    tx: mpsc::Sender<PriceTick>,
    stop: StopSignal,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    let mut stop_check = tokio::time::interval(STOP_POLL_INTERVAL);
    let mut polling = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop_check.tick() => {
                if stop.is_triggered() {
                    return;
                }
                continue;
            }
        }
        if stop.is_triggered() {
            return;
        }

        if !health.is_stale() {
            if polling {
                info!(%symbol, "Stream ticks resumed, fallback polling paused");
                polling = false;
            }
            continue;
        }

        if !polling {
            info!(%symbol, "Feed stale, polling REST price");
            polling = true;
        }

        match market.current_price(&symbol).await {
            Ok(price) => {
                debug!(%symbol, %price, "Fallback tick");
                if tx.send(PriceTick::new(price, TickSource::Fallback)).await.is_err() {
                    return;
                }
            }
            Err(e) => warn!(%symbol, error = %e, "Fallback price query failed"),
        }
    }
}
