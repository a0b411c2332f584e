//! Binance WebSocket client for real-time price streams.

use crate::utils::{StopSignal, STOP_POLL_INTERVAL};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

const FUTURES_WS_URL: &str = "wss://fstream.binance.com";
const FUTURES_TESTNET_WS_URL: &str = "wss://stream.binancefuture.com";

/// Price-bearing market streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceStream {
    /// Aggregate trades, one message per taker fill burst
    AggTrade,
    /// Mark price, pushed every second
    MarkPrice,
}

impl PriceStream {
    /// Raw stream path for `symbol`.
    pub fn path(&self, symbol: &str) -> String {
        let symbol = symbol.to_lowercase();
        match self {
            PriceStream::AggTrade => format!("/ws/{}@aggTrade", symbol),
            PriceStream::MarkPrice => format!("/ws/{}@markPrice@1s", symbol),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PriceStream::AggTrade => "aggTrade",
            PriceStream::MarkPrice => "markPrice",
        }
    }
}

/// Why a stream reader returned without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Our stop signal fired
    Stopped,
    /// Server closed the connection or the stream ended
    Closed,
    /// Nobody is listening for parsed items anymore
    ReceiverDropped,
}

/// Binance WebSocket client.
#[derive(Debug, Clone)]
pub struct BinanceWebSocket {
    base_url: String,
}

impl BinanceWebSocket {
    /// Create a new WebSocket client.
    pub fn new(testnet: bool) -> Self {
        let base_url = if testnet {
            FUTURES_TESTNET_WS_URL
        } else {
            FUTURES_WS_URL
        };
        Self::with_base_url(base_url)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn stream_url(&self, stream: PriceStream, symbol: &str) -> String {
        format!("{}{}", self.base_url, stream.path(symbol))
    }

    /// Connect to `stream` and forward every message `parser` accepts into `tx`.
    ///
    /// Runs until the stop signal fires, the server closes, or the receiver is
    /// dropped. Sends a ping every `ping_every` to keep the connection alive.
    /// Messages the parser rejects are dropped without further action.
    pub async fn run_stream<T, F>(
        &self,
        stream: PriceStream,
        symbol: &str,
        tx: mpsc::Sender<T>,
        stop: StopSignal,
        ping_every: Duration,
        mut parser: F,
    ) -> Result<StreamEnd>
    where
        T: Send,
        F: FnMut(&str) -> Option<T> + Send,
    {
        let url = self.stream_url(stream, symbol);
        info!("Connecting to WebSocket: {}", url);

        let (ws_stream, _) = connect_async(&url)
            .await
            .context("Failed to connect to WebSocket")?;

        let (mut write, mut read) = ws_stream.split();

        let mut ping = tokio::time::interval(ping_every);
        ping.tick().await;
        let mut stop_check = tokio::time::interval(STOP_POLL_INTERVAL);

        loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(item) = parser(text.as_str()) {
                            if tx.send(item).await.is_err() {
                                warn!(stream = stream.name(), "Tick receiver dropped");
                                return Ok(StreamEnd::ReceiverDropped);
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // Pong is handled automatically by tungstenite
                        debug!(stream = stream.name(), "Received ping");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(stream = stream.name(), ?frame, "WebSocket closed by server");
                        return Ok(StreamEnd::Closed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(e).context("WebSocket read failed");
                    }
                    None => return Ok(StreamEnd::Closed),
                },
                _ = ping.tick() => {
                    write
                        .send(Message::Ping(Vec::new().into()))
                        .await
                        .context("WebSocket ping failed")?;
                    debug!(stream = stream.name(), "Ping sent");
                }
                _ = stop_check.tick() => {
                    if stop.is_triggered() {
                        let _ = write.send(Message::Close(None)).await;
                        debug!(stream = stream.name(), "Stream stopped");
                        return Ok(StreamEnd::Stopped);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_paths() {
        assert_eq!(PriceStream::AggTrade.path("BTCUSDT"), "/ws/btcusdt@aggTrade");
        assert_eq!(
            PriceStream::MarkPrice.path("BTCUSDT"),
            "/ws/btcusdt@markPrice@1s"
        );
    }

    #[test]
    fn test_stream_url_uses_network() {
        let live = BinanceWebSocket::new(false);
        let test = BinanceWebSocket::new(true);
        assert_eq!(
            live.stream_url(PriceStream::AggTrade, "ETHUSDT"),
            "wss://fstream.binance.com/ws/ethusdt@aggTrade"
        );
        assert!(test
            .stream_url(PriceStream::MarkPrice, "ETHUSDT")
            .starts_with("wss://stream.binancefuture.com/ws/"));
    }
}
