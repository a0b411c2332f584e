//! Binance USD-M futures REST client.

use crate::config::BinanceConfig;
use crate::exchange::error::{ApiErrorBody, ExchangeError};
use crate::exchange::traits::{AccountService, MarketData};
use crate::exchange::types::*;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Response};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, instrument};

const FUTURES_BASE_URL: &str = "https://fapi.binance.com";
const FUTURES_TESTNET_URL: &str = "https://testnet.binancefuture.com";

/// Binance "No need to change margin type."
const MARGIN_TYPE_UNCHANGED: i64 = -4046;

/// Largest `limit` accepted by `/fapi/v1/klines`.
const MAX_KLINES: u16 = 1500;

/// Binance API client for the futures market.
pub struct BinanceClient {
    http: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
}

impl BinanceClient {
    /// Create a new Binance client from configuration.
    pub fn new(config: &BinanceConfig, timeout: Duration) -> Result<Self, ExchangeError> {
        let base_url = if config.testnet {
            FUTURES_TESTNET_URL
        } else {
            FUTURES_BASE_URL
        };
        Self::with_base_url(config, base_url, timeout)
    }

    /// Create a client against a custom REST endpoint.
    pub fn with_base_url(
        config: &BinanceConfig,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, ExchangeError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExchangeError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Generate HMAC-SHA256 signature for authenticated requests.
    fn sign(&self, query_string: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Get current timestamp in milliseconds.
    fn timestamp() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Append timestamp and signature to `query` and build the full URL.
    fn signed_url(&self, path: &str, query: &str) -> String {
        let query = if query.is_empty() {
            format!("timestamp={}", Self::timestamp())
        } else {
            format!("{}&timestamp={}", query, Self::timestamp())
        };
        let signature = self.sign(&query);
        format!("{}{}?{}&signature={}", self.base_url, path, query, signature)
    }

    /// Decode a response body, mapping Binance error payloads to `ExchangeError::Api`.
    async fn read<T: DeserializeOwned>(response: Response) -> Result<T, ExchangeError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<ApiErrorBody>(&body) {
                Ok(err) => ExchangeError::Api {
                    code: err.code,
                    msg: err.msg,
                },
                Err(_) => ExchangeError::Decode(format!("HTTP {}: {}", status, body)),
            });
        }

        serde_json::from_str(&body).map_err(|e| ExchangeError::Decode(format!("{}: {}", e, body)))
    }

    // ==================== Market Data (Public) ====================

    /// Get the latest price for a symbol.
    #[instrument(skip(self))]
    pub async fn get_ticker_price(&self, symbol: &str) -> Result<TickerPrice, ExchangeError> {
        let url = format!("{}/fapi/v1/ticker/price?symbol={}", self.base_url, symbol);
        let response = self.http.get(&url).send().await?;
        Self::read(response).await
    }

    /// Get recent klines, oldest first.
    #[instrument(skip(self))]
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u16,
    ) -> Result<Vec<Kline>, ExchangeError> {
        let url = format!(
            "{}/fapi/v1/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );
        let response = self.http.get(&url).send().await?;
        Self::read(response).await
    }

    // ==================== Account (Authenticated) ====================

    /// Get account balance information.
    #[instrument(skip(self))]
    pub async fn get_account_balance(&self) -> Result<Vec<AccountBalance>, ExchangeError> {
        let url = self.signed_url("/fapi/v2/balance", "");
        let response = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        Self::read(response).await
    }

    /// Get current positions for a symbol.
    #[instrument(skip(self))]
    pub async fn get_positions(&self, symbol: &str) -> Result<Vec<Position>, ExchangeError> {
        let url = self.signed_url("/fapi/v2/positionRisk", &format!("symbol={}", symbol));
        let response = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        Self::read(response).await
    }

    // ==================== Orders (Authenticated) ====================

    /// Place a new futures order.
    #[instrument(skip(self))]
    pub async fn place_futures_order(
        &self,
        order: &NewOrder,
    ) -> Result<OrderResponse, ExchangeError> {
        let params = [
            ("symbol", order.symbol.clone()),
            ("side", order.side.as_str().to_string()),
            ("type", order.order_type.as_str().to_string()),
            ("quantity", order.quantity.normalize().to_string()),
            ("reduceOnly", order.reduce_only.to_string()),
            ("newOrderRespType", "RESULT".to_string()),
        ];

        let query_string: String = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let url = self.signed_url("/fapi/v1/order", &query_string);

        debug!("Placing futures order: {:?}", order);

        let response = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        Self::read(response).await
    }

    /// Set leverage for a symbol.
    #[instrument(skip(self))]
    pub async fn set_leverage(&self, symbol: &str, leverage: u8) -> Result<(), ExchangeError> {
        let url = self.signed_url(
            "/fapi/v1/leverage",
            &format!("symbol={}&leverage={}", symbol, leverage),
        );
        let response = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        Self::read::<serde_json::Value>(response).await.map(|_| ())
    }

    /// Set margin type (isolated or cross) for a symbol.
    #[instrument(skip(self))]
    pub async fn set_margin_type(
        &self,
        symbol: &str,
        margin_type: MarginType,
    ) -> Result<(), ExchangeError> {
        let margin_type_str = match margin_type {
            MarginType::Isolated => "ISOLATED",
            MarginType::Cross => "CROSSED",
        };
        let url = self.signed_url(
            "/fapi/v1/marginType",
            &format!("symbol={}&marginType={}", symbol, margin_type_str),
        );
        let response = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;

        // The endpoint errors when the margin type is already set
        match Self::read::<serde_json::Value>(response).await {
            Ok(_) => Ok(()),
            Err(ExchangeError::Api { code, .. }) if code == MARGIN_TYPE_UNCHANGED => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl MarketData for BinanceClient {
    async fn current_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        Ok(self.get_ticker_price(symbol).await?.price)
    }

    async fn recent_closes(
        &self,
        symbol: &str,
        interval: &str,
        limit: u16,
    ) -> Result<Vec<Decimal>, ExchangeError> {
        // The newest row is the bar still forming; ask for one extra and keep
        // only bars whose close time has passed.
        let fetch = limit.saturating_add(1).min(MAX_KLINES);
        let now = Self::timestamp();
        let klines = self.get_klines(symbol, interval, fetch).await?;

        let mut closes = klines
            .iter()
            .filter(|k| k.close_time().map_or(true, |t| t < now))
            .map(|k| {
                k.close()
                    .ok_or_else(|| ExchangeError::Decode(format!("kline without close: {:?}", k)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let excess = closes.len().saturating_sub(usize::from(limit));
        closes.drain(..excess);
        Ok(closes)
    }
}

#[async_trait]
impl AccountService for BinanceClient {
    async fn free_balance(&self, asset: &str) -> Result<Decimal, ExchangeError> {
        Ok(self
            .get_account_balance()
            .await?
            .into_iter()
            .find(|b| b.asset == asset)
            .map(|b| b.available_balance)
            .unwrap_or(Decimal::ZERO))
    }

    async fn place_market_order(&self, order: &NewOrder) -> Result<OrderResponse, ExchangeError> {
        self.place_futures_order(order).await
    }

    async fn position(&self, symbol: &str) -> Result<PositionSnapshot, ExchangeError> {
        let positions = self.get_positions(symbol).await?;
        // One-way mode reports a single BOTH row; hedge mode rows are summed
        let snapshot = positions
            .iter()
            .filter(|p| p.symbol == symbol)
            .fold(None::<PositionSnapshot>, |acc, p| {
                let row = PositionSnapshot::from(p);
                Some(match acc {
                    None => row,
                    Some(mut total) => {
                        total.size += row.size;
                        total.unrealized_pnl += row.unrealized_pnl;
                        if row.size != Decimal::ZERO {
                            total.entry_price = row.entry_price;
                        }
                        total
                    }
                })
            });
        Ok(snapshot.unwrap_or_default())
    }
}
