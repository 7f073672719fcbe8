// =============================================================================
// Mock Futures Client — deterministic in-memory implementation for dev/backtest
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::warn;

use crate::client::{ClientResult, FuturesClient};
use crate::error::ExchangeError;
use crate::types::{
    AccountInfo, AlgoOrder, AlgoOrderParams, AlgoOrderStatus, ExchangeInfo, FundingRate,
    IncomeRecord, IncomeType, Kline, MarginType, MarkPrice, Order, OrderBook, OrderParams,
    OrderStatus, Position, PositionSide, SymbolInfo, Ticker24h, Trade,
};

/// Supplies a synthetic price for a symbol. Left unset by default; the mock
/// then falls back to zero and logs a single warning per process so a test
/// harness that forgot to configure one notices without being spammed.
pub type PriceProvider = Arc<dyn Fn(&str) -> Decimal + Send + Sync>;

struct Inner {
    positions: HashMap<String, Position>,
    orders: HashMap<u64, Order>,
    algo_orders: HashMap<u64, AlgoOrder>,
    hedge_mode: bool,
    next_order_id: u64,
    wallet_balance: Decimal,
}

pub struct MockFuturesClient {
    inner: RwLock<Inner>,
    price_provider: Option<PriceProvider>,
    zero_price_warned: AtomicBool,
    order_seq: AtomicU64,
}

impl MockFuturesClient {
    pub fn new() -> Self {
        Self::with_price_provider(None)
    }

    pub fn with_price_provider(price_provider: Option<PriceProvider>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                positions: HashMap::new(),
                orders: HashMap::new(),
                algo_orders: HashMap::new(),
                hedge_mode: false,
                next_order_id: 1,
                wallet_balance: Decimal::new(10_000, 0),
            }),
            price_provider,
            zero_price_warned: AtomicBool::new(false),
            order_seq: AtomicU64::new(1),
        }
    }

    fn price_for(&self, symbol: &str) -> Decimal {
        match &self.price_provider {
            Some(f) => f(symbol),
            None => {
                if !self.zero_price_warned.swap(true, Ordering::Relaxed) {
                    warn!("no price provider configured for mock client, defaulting to zero price");
                }
                Decimal::ZERO
            }
        }
    }

    fn next_id(&self) -> u64 {
        self.order_seq.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MockFuturesClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FuturesClient for MockFuturesClient {
    async fn get_account_info(&self) -> ClientResult<AccountInfo> {
        let inner = self.inner.read();
        let unrealized: Decimal = inner.positions.values().map(|p| p.unrealized_profit).sum();
        Ok(AccountInfo {
            total_wallet_balance: inner.wallet_balance,
            total_unrealized_profit: unrealized,
            total_margin_balance: inner.wallet_balance + unrealized,
            available_balance: inner.wallet_balance,
            can_trade: true,
        })
    }

    async fn get_all_positions(&self) -> ClientResult<Vec<Position>> {
        Ok(self.inner.read().positions.values().cloned().collect())
    }

    async fn get_position(&self, symbol: &str) -> ClientResult<Option<Position>> {
        Ok(self.inner.read().positions.get(symbol).cloned())
    }

    async fn get_commission_rate(&self, _symbol: &str) -> ClientResult<(Decimal, Decimal)> {
        Ok((Decimal::new(2, 4), Decimal::new(4, 4))) // 0.0002 / 0.0004
    }

    async fn set_leverage(&self, _symbol: &str, leverage: u32) -> ClientResult<u32> {
        if !(1..=125).contains(&leverage) {
            return Err(ExchangeError::invalid_argument(format!(
                "leverage {leverage} out of range 1..=125"
            )));
        }
        Ok(leverage)
    }

    async fn set_margin_type(&self, symbol: &str, margin_type: MarginType) -> ClientResult<()> {
        let mut inner = self.inner.write();
        if let Some(pos) = inner.positions.get_mut(symbol) {
            pos.margin_type = margin_type;
        }
        Ok(())
    }

    async fn set_position_mode(&self, hedge_mode: bool) -> ClientResult<()> {
        let mut inner = self.inner.write();
        if inner.positions.values().any(|p| !p.is_flat()) {
            return Err(ExchangeError::rejected(
                -4068,
                "cannot switch position mode with an open position",
            ));
        }
        inner.hedge_mode = hedge_mode;
        Ok(())
    }

    async fn get_position_mode(&self) -> ClientResult<bool> {
        Ok(self.inner.read().hedge_mode)
    }

    async fn place_order(&self, params: OrderParams) -> ClientResult<Order> {
        let price = params.price.unwrap_or_else(|| self.price_for(&params.symbol));
        let order_id = self.next_id();

        let order = Order {
            order_id,
            client_order_id: params
                .client_order_id
                .clone()
                .unwrap_or_else(|| format!("mock-{order_id}")),
            symbol: params.symbol.clone(),
            side: params.side,
            position_side: params.position_side,
            order_type: params.order_type,
            status: OrderStatus::Filled,
            price,
            orig_qty: params.quantity,
            executed_qty: params.quantity,
            time_in_force: params.time_in_force.unwrap_or(crate::types::TimeInForce::Gtc),
            reduce_only: params.reduce_only,
            update_time: 0,
        };

        let mut inner = self.inner.write();
        let signed_qty = match params.side {
            crate::types::OrderSide::Buy => params.quantity,
            crate::types::OrderSide::Sell => -params.quantity,
        };

        let entry = inner
            .positions
            .entry(params.symbol.clone())
            .or_insert_with(|| Position {
                symbol: params.symbol.clone(),
                position_side: params.position_side,
                position_amt: Decimal::ZERO,
                entry_price: price,
                mark_price: price,
                unrealized_profit: Decimal::ZERO,
                leverage: 1,
                margin_type: MarginType::Crossed,
                isolated_margin: Decimal::ZERO,
                update_time: 0,
            });
        entry.position_amt += signed_qty;
        entry.mark_price = price;
        if entry.position_amt.is_zero() {
            entry.entry_price = Decimal::ZERO;
        } else if entry.entry_price.is_zero() {
            entry.entry_price = price;
        }

        // Terminal orders are not retained, matching the live order cache's
        // removal rule for orders that reach a terminal status.
        if !order.status.is_terminal() {
            inner.orders.insert(order_id, order.clone());
        }

        Ok(order)
    }

    async fn cancel_order(&self, symbol: &str, order_id: u64) -> ClientResult<Order> {
        let mut inner = self.inner.write();
        let mut order = inner
            .orders
            .remove(&order_id)
            .ok_or_else(|| ExchangeError::rejected(-2011, "unknown order"))?;
        if order.symbol != symbol {
            return Err(ExchangeError::invalid_argument("symbol mismatch for order id"));
        }
        order.status = OrderStatus::Canceled;
        Ok(order)
    }

    async fn cancel_all_open_orders(&self, symbol: &str) -> ClientResult<()> {
        let mut inner = self.inner.write();
        inner.orders.retain(|_, o| o.symbol != symbol);
        Ok(())
    }

    async fn get_open_orders(&self, symbol: Option<&str>) -> ClientResult<Vec<Order>> {
        let inner = self.inner.read();
        Ok(inner
            .orders
            .values()
            .filter(|o| symbol.map(|s| s == o.symbol).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn get_order(&self, symbol: &str, order_id: u64) -> ClientResult<Order> {
        let inner = self.inner.read();
        inner
            .orders
            .get(&order_id)
            .filter(|o| o.symbol == symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::rejected(-2013, "order does not exist"))
    }

    async fn place_algo_order(&self, params: AlgoOrderParams) -> ClientResult<AlgoOrder> {
        let algo_id = self.next_id();
        let algo = AlgoOrder {
            algo_id,
            client_algo_id: params
                .client_algo_id
                .clone()
                .unwrap_or_else(|| format!("mock-algo-{algo_id}")),
            symbol: params.symbol.clone(),
            side: params.side,
            algo_type: params.algo_type,
            status: AlgoOrderStatus::New,
            stop_price: params.stop_price,
            quantity: params.quantity,
            update_time: 0,
        };
        self.inner.write().algo_orders.insert(algo_id, algo.clone());
        Ok(algo)
    }

    async fn get_open_algo_orders(&self, symbol: Option<&str>) -> ClientResult<Vec<AlgoOrder>> {
        let inner = self.inner.read();
        Ok(inner
            .algo_orders
            .values()
            .filter(|a| !a.status.is_terminal())
            .filter(|a| symbol.map(|s| s == a.symbol).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn cancel_algo_order(&self, symbol: &str, algo_id: u64) -> ClientResult<AlgoOrder> {
        let mut inner = self.inner.write();
        let algo = inner
            .algo_orders
            .get_mut(&algo_id)
            .filter(|a| a.symbol == symbol)
            .ok_or_else(|| ExchangeError::rejected(-2011, "unknown algo order"))?;
        algo.status = AlgoOrderStatus::Cancelled;
        Ok(algo.clone())
    }

    async fn cancel_all_algo_orders(&self, symbol: &str) -> ClientResult<()> {
        let mut inner = self.inner.write();
        for algo in inner.algo_orders.values_mut() {
            if algo.symbol == symbol && !algo.status.is_terminal() {
                algo.status = AlgoOrderStatus::Cancelled;
            }
        }
        Ok(())
    }

    async fn get_algo_order_history(&self, symbol: &str) -> ClientResult<Vec<AlgoOrder>> {
        let inner = self.inner.read();
        Ok(inner
            .algo_orders
            .values()
            .filter(|a| a.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn get_funding_rate(&self, symbol: &str) -> ClientResult<FundingRate> {
        Ok(FundingRate {
            symbol: symbol.to_string(),
            funding_rate: Decimal::ZERO,
            funding_time: 0,
        })
    }

    async fn get_funding_rate_history(
        &self,
        _symbol: &str,
        _start_time: Option<i64>,
        _end_time: Option<i64>,
    ) -> ClientResult<Vec<FundingRate>> {
        Ok(Vec::new())
    }

    async fn get_mark_price(&self, symbol: &str) -> ClientResult<MarkPrice> {
        let price = self.price_for(symbol);
        Ok(MarkPrice {
            symbol: symbol.to_string(),
            mark_price: price,
            index_price: price,
            last_funding_rate: Decimal::ZERO,
            next_funding_time: 0,
        })
    }

    async fn get_all_mark_prices(&self) -> ClientResult<Vec<MarkPrice>> {
        let inner = self.inner.read();
        Ok(inner
            .positions
            .keys()
            .map(|symbol| MarkPrice {
                symbol: symbol.clone(),
                mark_price: self.price_for(symbol),
                index_price: self.price_for(symbol),
                last_funding_rate: Decimal::ZERO,
                next_funding_time: 0,
            })
            .collect())
    }

    async fn get_order_book(&self, symbol: &str, _limit: u32) -> ClientResult<OrderBook> {
        let price = self.price_for(symbol);
        Ok(OrderBook {
            symbol: symbol.to_string(),
            last_update_id: 0,
            bids: vec![crate::types::OrderBookLevel {
                price,
                quantity: Decimal::ONE,
            }],
            asks: vec![crate::types::OrderBookLevel {
                price,
                quantity: Decimal::ONE,
            }],
        })
    }

    async fn get_klines(&self, symbol: &str, _interval: &str, limit: u32) -> ClientResult<Vec<Kline>> {
        let price = self.price_for(symbol);
        Ok((0..limit)
            .map(|i| Kline {
                open_time: i as i64 * 60_000,
                open: price,
                high: price,
                low: price,
                close: price,
                volume: Decimal::ZERO,
                close_time: i as i64 * 60_000 + 59_999,
            })
            .collect())
    }

    async fn get_current_price(&self, symbol: &str) -> ClientResult<Decimal> {
        Ok(self.price_for(symbol))
    }

    async fn get_ticker_24h(&self, symbol: &str) -> ClientResult<Ticker24h> {
        let price = self.price_for(symbol);
        Ok(Ticker24h {
            symbol: symbol.to_string(),
            last_price: price,
            price_change_percent: Decimal::ZERO,
            volume: Decimal::ZERO,
            quote_volume: Decimal::ZERO,
        })
    }

    async fn get_all_tickers_24h(&self) -> ClientResult<Vec<Ticker24h>> {
        Ok(Vec::new())
    }

    async fn get_exchange_info(&self) -> ClientResult<ExchangeInfo> {
        Ok(ExchangeInfo {
            symbols: vec![SymbolInfo {
                symbol: "BTCUSDT".into(),
                base_asset: "BTC".into(),
                quote_asset: "USDT".into(),
                price_precision: 2,
                quantity_precision: 3,
            }],
            server_time: 0,
        })
    }

    async fn get_symbols(&self) -> ClientResult<Vec<String>> {
        Ok(self
            .get_exchange_info()
            .await?
            .symbols
            .into_iter()
            .map(|s| s.symbol)
            .collect())
    }

    async fn get_trade_history(
        &self,
        _symbol: &str,
        _start_time: Option<i64>,
        _end_time: Option<i64>,
    ) -> ClientResult<Vec<Trade>> {
        Ok(Vec::new())
    }

    async fn get_funding_fee_history(&self, _symbol: &str) -> ClientResult<Vec<IncomeRecord>> {
        Ok(Vec::new())
    }

    async fn get_all_orders(
        &self,
        symbol: &str,
        _start_time: Option<i64>,
        _end_time: Option<i64>,
    ) -> ClientResult<Vec<Order>> {
        let inner = self.inner.read();
        Ok(inner
            .orders
            .values()
            .filter(|o| o.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn get_income_history(&self, _income_type: IncomeType) -> ClientResult<Vec<IncomeRecord>> {
        Ok(Vec::new())
    }

    async fn get_listen_key(&self) -> ClientResult<String> {
        Ok("mock-listen-key".to_string())
    }

    async fn keep_alive_listen_key(&self, _listen_key: &str) -> ClientResult<()> {
        Ok(())
    }

    async fn close_listen_key(&self, _listen_key: &str) -> ClientResult<()> {
        Ok(())
    }

    fn ws_base_url(&self) -> &str {
        "wss://mock.invalid/ws"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderParams, OrderSide};

    #[tokio::test]
    async fn market_order_updates_position() {
        let client = MockFuturesClient::with_price_provider(Some(Arc::new(|_| Decimal::new(50_000, 0))));
        let order = client
            .place_order(OrderParams::market("BTCUSDT", OrderSide::Buy, Decimal::ONE))
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        let pos = client.get_position("BTCUSDT").await.unwrap().unwrap();
        assert_eq!(pos.position_amt, Decimal::ONE);
    }

    #[tokio::test]
    async fn default_price_provider_is_zero_and_warns_once() {
        let client = MockFuturesClient::new();
        let price = client.get_current_price("ETHUSDT").await.unwrap();
        assert_eq!(price, Decimal::ZERO);
        assert!(client.zero_price_warned.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn position_mode_switch_rejected_with_open_position() {
        let client = MockFuturesClient::with_price_provider(Some(Arc::new(|_| Decimal::new(100, 0))));
        client
            .place_order(OrderParams::market("BTCUSDT", OrderSide::Buy, Decimal::ONE))
            .await
            .unwrap();
        let result = client.set_position_mode(true).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn leverage_validation_rejects_out_of_range() {
        let client = MockFuturesClient::new();
        assert!(client.set_leverage("BTCUSDT", 0).await.is_err());
        assert!(client.set_leverage("BTCUSDT", 200).await.is_err());
        assert!(client.set_leverage("BTCUSDT", 20).await.is_ok());
    }

    #[tokio::test]
    async fn cancel_order_removes_it_from_open_orders() {
        let client = MockFuturesClient::with_price_provider(Some(Arc::new(|_| Decimal::new(100, 0))));
        let order = client
            .place_order(OrderParams {
                price: Some(Decimal::new(99, 0)),
                time_in_force: Some(crate::types::TimeInForce::Gtc),
                ..OrderParams::market("BTCUSDT", OrderSide::Buy, Decimal::ONE)
            })
            .await
            .unwrap();
        // Orders fill immediately in the mock, so cancel on a filled id is
        // expected to fail since it was never retained as open.
        let result = client.cancel_order("BTCUSDT", order.order_id).await;
        assert!(result.is_err());
    }
}
