//! Exchange-backed order gateway.

use super::error::OrderFailure;
use super::sizing;
use super::{Execution, OrderFill, OrderRequest, OrderResult};
use crate::config::{ExecutionConfig, SizingConfig};
use crate::exchange::{
    AccountService, ExchangeError, NewOrder, OrderResponse, OrderSide, PositionSnapshot,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Builds a fresh authenticated session.
pub type SessionFactory =
    Box<dyn Fn() -> Result<Arc<dyn AccountService>, ExchangeError> + Send + Sync>;

/// Submits orders for one instrument, renewing its session on recoverable
/// failures.
pub struct OrderGateway {
    symbol: String,
    margin_asset: String,
    sizing: SizingConfig,
    config: ExecutionConfig,
    session: Arc<dyn AccountService>,
    factory: SessionFactory,
    renewals: u64,
}

impl OrderGateway {
    /// Create a gateway, opening the first session through `factory`.
    pub fn new(
        symbol: &str,
        margin_asset: &str,
        sizing: SizingConfig,
        config: ExecutionConfig,
        factory: SessionFactory,
    ) -> Result<Self, ExchangeError> {
        let session = factory()?;
        Ok(Self {
            symbol: symbol.to_string(),
            margin_asset: margin_asset.to_string(),
            sizing,
            config,
            session,
            factory,
            renewals: 0,
        })
    }

    /// Sessions rebuilt since construction.
    pub fn renewals(&self) -> u64 {
        self.renewals
    }

    fn renew_session(&mut self) -> Result<(), OrderFailure> {
        let session = (self.factory)().map_err(|e| OrderFailure::Session(e.to_string()))?;
        self.session = session;
        self.renewals += 1;
        info!(symbol = %self.symbol, renewals = self.renewals, "Session renewed");
        Ok(())
    }

    /// Signed position size before an order, when confirmation is enabled.
    async fn sample_position(&self) -> Option<Decimal> {
        if !self.config.confirm_position {
            return None;
        }
        match self.session.position(&self.symbol).await {
            Ok(snapshot) => Some(snapshot.size),
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "Could not sample position, skipping confirmation");
                None
            }
        }
    }

    fn accepted(&self, order: &NewOrder, response: OrderResponse) -> OrderFill {
        info!(
            symbol = %self.symbol,
            order_id = response.order_id,
            side = ?response.side,
            filled_qty = %response.executed_qty,
            avg_price = %response.avg_price,
            reduce_only = order.reduce_only,
            "Order accepted"
        );
        OrderFill {
            order_id: Some(response.order_id),
            executed_qty: response.executed_qty,
            avg_price: response.avg_price,
        }
    }

    /// Decide whether a failed order may be sent again.
    ///
    /// Returns the inferred fill when the position shows the first attempt
    /// went through, `None` when a resubmit is safe.
    async fn recover(
        &mut self,
        request: &OrderRequest,
        before: Option<Decimal>,
        error: ExchangeError,
    ) -> Result<Option<OrderFill>, OrderFailure> {
        let outcome_unknown = error.outcome_unknown();
        let failure = OrderFailure::from(error);

        if failure.is_terminal() {
            error!(
                symbol = %self.symbol,
                side = ?request.side,
                quantity = %request.quantity,
                error = %failure,
                "Order rejected, not retrying"
            );
            return Err(failure);
        }

        if !outcome_unknown {
            warn!(
                symbol = %self.symbol,
                side = ?request.side,
                kind = ?failure.kind(),
                error = %failure,
                "Order failed, renewing session and retrying once"
            );
            self.renew_session()?;
            return Ok(None);
        }

        let Some(before) = before else {
            error!(
                symbol = %self.symbol,
                side = ?request.side,
                quantity = %request.quantity,
                error = %failure,
                "Order outcome unknown and position not tracked, not retrying"
            );
            return Err(OrderFailure::Indeterminate(failure.to_string()));
        };

        warn!(
            symbol = %self.symbol,
            side = ?request.side,
            error = %failure,
            "Order outcome unknown, checking position before retrying"
        );
        self.renew_session()?;

        match self.await_position(request, before).await {
            Some(snapshot) => {
                let executed_qty = (snapshot.size - before).abs();
                info!(
                    symbol = %self.symbol,
                    side = ?request.side,
                    filled_qty = %executed_qty,
                    size = %snapshot.size,
                    "Order filled despite lost response"
                );
                Ok(Some(OrderFill {
                    order_id: None,
                    executed_qty,
                    avg_price: snapshot.mark_price,
                }))
            }
            None => {
                info!(symbol = %self.symbol, size = %before, "Position unchanged, resubmitting order");
                Ok(None)
            }
        }
    }

    /// Poll the position until it moved away from `before` as `request` implies.
    async fn await_position(&self, request: &OrderRequest, before: Decimal) -> Option<PositionSnapshot> {
        let delay = Duration::from_millis(self.config.confirm_delay_ms);

        for attempt in 1..=self.config.confirm_attempts {
            tokio::time::sleep(delay).await;
            match self.session.position(&self.symbol).await {
                Ok(snapshot) if position_moved(request, before, snapshot.size) => {
                    debug!(symbol = %self.symbol, attempt, size = %snapshot.size, "Position confirmed");
                    return Some(snapshot);
                }
                Ok(snapshot) => {
                    debug!(symbol = %self.symbol, attempt, size = %snapshot.size, "Position not updated yet");
                }
                Err(e) => {
                    warn!(symbol = %self.symbol, attempt, error = %e, "Position check failed");
                }
            }
        }
        None
    }

    async fn confirm(&self, request: &OrderRequest, before: Decimal) -> Result<Decimal, OrderFailure> {
        match self.await_position(request, before).await {
            Some(snapshot) => Ok(snapshot.size),
            None => {
                let attempts = self.config.confirm_attempts;
                error!(
                    symbol = %self.symbol,
                    side = ?request.side,
                    attempts,
                    "Position change never observed"
                );
                Err(OrderFailure::Unconfirmed { attempts })
            }
        }
    }
}

/// Whether a position change from `before` to `after` reflects `request`.
///
/// Buys must raise the signed size and sells must lower it. Reduce-only
/// orders must also shrink the absolute size.
pub fn position_moved(request: &OrderRequest, before: Decimal, after: Decimal) -> bool {
    if request.reduce_only {
        return after.abs() < before.abs();
    }
    match request.side {
        OrderSide::Buy => after > before,
        OrderSide::Sell => after < before,
    }
}

#[async_trait]
impl Execution for OrderGateway {
    async fn entry_quantity(&mut self, reference_price: Decimal) -> Result<Decimal, OrderFailure> {
        let free = self.session.free_balance(&self.margin_asset).await?;
        let quantity = sizing::entry_quantity(
            free,
            self.sizing.balance_fraction,
            reference_price,
            self.sizing.quantity_step,
            self.sizing.min_quantity,
        );
        debug!(free = %free, price = %reference_price, quantity = %quantity, "Entry sized");
        Ok(quantity)
    }

    async fn submit(&mut self, request: &OrderRequest) -> OrderResult {
        let order = NewOrder::market(&self.symbol, request.side, request.quantity, request.reduce_only);
        let before = self.sample_position().await;

        let response = match self.session.place_market_order(&order).await {
            Ok(response) => response,
            Err(e) => {
                if let Some(fill) = self.recover(request, before, e).await? {
                    return Ok(fill);
                }
                self.session.place_market_order(&order).await.map_err(|e| {
                    // An unknown outcome on the retry is terminal as well
                    let failure = if e.outcome_unknown() {
                        OrderFailure::Indeterminate(e.to_string())
                    } else {
                        OrderFailure::from(e)
                    };
                    error!(
                        symbol = %self.symbol,
                        side = ?request.side,
                        error = %failure,
                        "Order retry failed"
                    );
                    failure
                })?
            }
        };

        let mut fill = self.accepted(&order, response);

        if let Some(before) = before {
            let after = self.confirm(request, before).await?;
            if fill.executed_qty.is_zero() {
                fill.executed_qty = (after - before).abs();
            }
        }

        Ok(fill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockExchange;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use wiremock::matchers::any;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn execution_config(confirm: bool) -> ExecutionConfig {
        ExecutionConfig {
            confirm_position: confirm,
            confirm_delay_ms: 100,
            confirm_attempts: 3,
            request_timeout_secs: 10,
        }
    }

    async fn mock_exchange() -> Arc<MockExchange> {
        let exchange = MockExchange::new(dec!(1000));
        exchange.set_price(dec!(20000)).await;
        Arc::new(exchange)
    }

    fn gateway(exchange: &Arc<MockExchange>, confirm: bool) -> (OrderGateway, Arc<AtomicUsize>) {
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = opened.clone();
        let exchange = exchange.clone();
        let factory: SessionFactory = Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(exchange.clone() as Arc<dyn AccountService>)
        });
        let gateway = OrderGateway::new(
            "BTCUSDT",
            "USDT",
            SizingConfig::default(),
            execution_config(confirm),
            factory,
        )
        .unwrap();
        (gateway, opened)
    }

    /// Paper account whose next order fails with `error`, optionally after
    /// the exchange already executed it.
    struct DroppedResponse {
        inner: Arc<MockExchange>,
        executes: bool,
        pending: Mutex<Option<ExchangeError>>,
    }

    impl DroppedResponse {
        fn new(inner: &Arc<MockExchange>, executes: bool, error: ExchangeError) -> Arc<Self> {
            Arc::new(Self {
                inner: inner.clone(),
                executes,
                pending: Mutex::new(Some(error)),
            })
        }
    }

    #[async_trait]
    impl AccountService for DroppedResponse {
        async fn free_balance(&self, asset: &str) -> Result<Decimal, ExchangeError> {
            self.inner.free_balance(asset).await
        }

        async fn place_market_order(&self, order: &NewOrder) -> Result<OrderResponse, ExchangeError> {
            let pending = self.pending.lock().unwrap().take();
            match pending {
                Some(error) => {
                    if self.executes {
                        self.inner.place_market_order(order).await?;
                    }
                    Err(error)
                }
                None => self.inner.place_market_order(order).await,
            }
        }

        async fn position(&self, symbol: &str) -> Result<PositionSnapshot, ExchangeError> {
            self.inner.position(symbol).await
        }
    }

    fn gateway_over(account: Arc<DroppedResponse>, confirm: bool) -> OrderGateway {
        let factory: SessionFactory =
            Box::new(move || Ok(account.clone() as Arc<dyn AccountService>));
        OrderGateway::new(
            "BTCUSDT",
            "USDT",
            SizingConfig::default(),
            execution_config(confirm),
            factory,
        )
        .unwrap()
    }

    /// A request that reached a server but timed out waiting for the answer.
    async fn timed_out() -> ExchangeError {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;
        let err = reqwest::Client::builder()
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap()
            .post(format!("{}/fapi/v1/order", server.uri()))
            .send()
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        ExchangeError::Transport(err)
    }

    async fn connection_refused() -> ExchangeError {
        let err = reqwest::Client::new()
            .post("http://127.0.0.1:1/fapi/v1/order")
            .send()
            .await
            .unwrap_err();
        ExchangeError::Transport(err)
    }

    fn buy(quantity: Decimal) -> OrderRequest {
        OrderRequest {
            side: OrderSide::Buy,
            quantity,
            reduce_only: false,
        }
    }

    // =========================================================================
    // Sizing
    // =========================================================================

    #[tokio::test]
    async fn test_entry_quantity_uses_free_balance() {
        let exchange = mock_exchange().await;
        let (mut gateway, _) = gateway(&exchange, false);

        // 1000 * 0.85 / 20000 = 0.0425 -> 0.042
        let qty = gateway.entry_quantity(dec!(20000)).await.unwrap();
        assert_eq!(qty, dec!(0.042));
    }

    // =========================================================================
    // Failure Handling
    // =========================================================================

    #[tokio::test]
    async fn test_insufficient_margin_not_retried() {
        let exchange = mock_exchange().await;
        let (mut gateway, opened) = gateway(&exchange, false);

        let result = gateway.submit(&buy(dec!(1))).await;

        assert!(matches!(result, Err(OrderFailure::InsufficientMargin(_))));
        assert_eq!(exchange.order_attempts(), 1);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.renewals(), 0);
    }

    #[tokio::test]
    async fn test_session_error_renews_and_retries_once() {
        let exchange = mock_exchange().await;
        exchange
            .fail_next_order(ExchangeError::Api {
                code: -1021,
                msg: "Timestamp outside of recvWindow".to_string(),
            })
            .await;
        let (mut gateway, opened) = gateway(&exchange, false);

        let fill = gateway.submit(&buy(dec!(0.01))).await.unwrap();

        assert_eq!(fill.executed_qty, dec!(0.01));
        assert_eq!(exchange.order_attempts(), 2);
        assert_eq!(opened.load(Ordering::SeqCst), 2);
        assert_eq!(gateway.renewals(), 1);
    }

    #[tokio::test]
    async fn test_second_failure_is_returned() {
        let exchange = mock_exchange().await;
        for _ in 0..2 {
            exchange
                .fail_next_order(ExchangeError::Api {
                    code: -1021,
                    msg: "Timestamp outside of recvWindow".to_string(),
                })
                .await;
        }
        let (mut gateway, _) = gateway(&exchange, false);

        let result = gateway.submit(&buy(dec!(0.01))).await;

        assert!(matches!(result, Err(OrderFailure::Session(_))));
        assert_eq!(exchange.order_attempts(), 2);
        assert_eq!(exchange.get_state().await.position_qty, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_factory_failure_surfaces_as_session_error() {
        let exchange = mock_exchange().await;
        exchange
            .fail_next_order(ExchangeError::Api {
                code: -2015,
                msg: "Invalid API-key".to_string(),
            })
            .await;

        let opened = Arc::new(AtomicUsize::new(0));
        let counter = opened.clone();
        let session = exchange.clone();
        let factory: SessionFactory = Box::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(session.clone() as Arc<dyn AccountService>)
            } else {
                Err(ExchangeError::Config("missing secret".to_string()))
            }
        });
        let mut gateway = OrderGateway::new(
            "BTCUSDT",
            "USDT",
            SizingConfig::default(),
            execution_config(false),
            factory,
        )
        .unwrap();

        let result = gateway.submit(&buy(dec!(0.01))).await;
        assert!(matches!(result, Err(OrderFailure::Session(_))));
        assert_eq!(exchange.order_attempts(), 1);
    }

    // =========================================================================
    // Lost Responses
    // =========================================================================

    #[tokio::test]
    async fn test_filled_order_with_lost_response_is_not_resubmitted() {
        let exchange = mock_exchange().await;
        let account = DroppedResponse::new(&exchange, true, timed_out().await);
        let mut gateway = gateway_over(account, true);

        let fill = gateway.submit(&buy(dec!(0.01))).await.unwrap();

        assert_eq!(fill.executed_qty, dec!(0.01));
        assert_eq!(fill.order_id, None);
        assert_eq!(exchange.order_attempts(), 1);
        assert_eq!(exchange.get_state().await.position_qty, dec!(0.01));
        assert_eq!(gateway.renewals(), 1);
    }

    #[tokio::test]
    async fn test_unfilled_order_with_lost_response_is_resubmitted_once() {
        let exchange = mock_exchange().await;
        let account = DroppedResponse::new(&exchange, false, timed_out().await);
        let mut gateway = gateway_over(account, true);

        let fill = gateway.submit(&buy(dec!(0.01))).await.unwrap();

        assert_eq!(fill.executed_qty, dec!(0.01));
        assert!(fill.order_id.is_some());
        assert_eq!(exchange.order_attempts(), 1);
        assert_eq!(exchange.get_state().await.position_qty, dec!(0.01));
    }

    #[tokio::test]
    async fn test_lost_response_without_confirmation_is_terminal() {
        let exchange = mock_exchange().await;
        let account = DroppedResponse::new(&exchange, true, timed_out().await);
        let mut gateway = gateway_over(account, false);

        let result = gateway.submit(&buy(dec!(0.01))).await;

        assert!(matches!(result, Err(OrderFailure::Indeterminate(_))));
        assert_eq!(exchange.order_attempts(), 1);
        assert_eq!(exchange.get_state().await.position_qty, dec!(0.01));
        assert_eq!(gateway.renewals(), 0);
    }

    #[tokio::test]
    async fn test_refused_connection_is_retried() {
        let exchange = mock_exchange().await;
        let account = DroppedResponse::new(&exchange, false, connection_refused().await);
        let mut gateway = gateway_over(account, false);

        let fill = gateway.submit(&buy(dec!(0.01))).await.unwrap();

        assert_eq!(fill.executed_qty, dec!(0.01));
        assert_eq!(exchange.order_attempts(), 1);
        assert_eq!(exchange.get_state().await.position_qty, dec!(0.01));
        assert_eq!(gateway.renewals(), 1);
    }

    // =========================================================================
    // Position Confirmation
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_waits_for_lagging_position() {
        let exchange = mock_exchange().await;
        exchange.set_position_lag(2);
        let (mut gateway, _) = gateway(&exchange, true);

        let fill = gateway.submit(&buy(dec!(0.01))).await.unwrap();
        assert_eq!(fill.executed_qty, dec!(0.01));
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_never_moving_is_unconfirmed() {
        let exchange = mock_exchange().await;
        exchange.set_position_lag(10);
        let (mut gateway, _) = gateway(&exchange, true);

        let result = gateway.submit(&buy(dec!(0.01))).await;
        assert!(matches!(
            result,
            Err(OrderFailure::Unconfirmed { attempts: 3 })
        ));
        assert_eq!(exchange.order_attempts(), 1);
    }

    #[test]
    fn test_position_moved_rules() {
        let sell = OrderRequest {
            side: OrderSide::Sell,
            quantity: dec!(1),
            reduce_only: false,
        };
        let close_long = OrderRequest {
            reduce_only: true,
            ..sell
        };

        assert!(position_moved(&buy(dec!(1)), dec!(0), dec!(1)));
        assert!(!position_moved(&buy(dec!(1)), dec!(0), dec!(0)));
        assert!(position_moved(&sell, dec!(0), dec!(-1)));
        assert!(position_moved(&close_long, dec!(1), dec!(0)));
        assert!(!position_moved(&close_long, dec!(1), dec!(1)));
    }
}
