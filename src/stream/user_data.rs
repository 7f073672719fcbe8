// =============================================================================
// User Data Stream — listen-key lifecycle + reconnecting WebSocket reader
// =============================================================================
//
// State machine: Idle -> ObtainingKey -> Connecting -> Running, falling back
// to Reconnecting on any read error or forced listen-key refresh. Connects
// with connect_async, splits the socket, then matches on read.next() in a
// loop, same shape as the other stream readers in this crate — except this
// one speaks to a private (listen-key gated) endpoint and dispatches typed
// account/order events instead of public trades.
//
// All mutable state lives behind one `parking_lot::RwLock`; handler dispatch
// happens via `tokio::spawn` so a slow callback can never stall the reader.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::RwLock;
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, instrument, warn};

use crate::client::FuturesClient;
use crate::types::{Order, OrderSide, OrderStatus, OrderType, Position, PositionSide};

const DIAL_BACKOFF: Duration = Duration::from_secs(5);
const READ_FAILURE_BACKOFF: Duration = Duration::from_secs(3);
const MAX_LISTEN_KEY_RETRIES: u32 = 3;
const MAX_KEEPALIVE_FAILURES: u32 = 3;
const MAX_KEEPALIVE_ATTEMPTS_PER_WINDOW: u32 = 3;
const KEEPALIVE_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    ObtainingKey,
    Connecting,
    Running,
    Reconnecting,
}

#[derive(Debug, Clone)]
pub enum UserDataEvent {
    AccountUpdate { positions: Vec<Position> },
    OrderUpdate { order: Order },
    MarginCall { symbol: String },
    ListenKeyExpired,
}

/// Receives dispatched stream events. Implementations must return quickly;
/// the stream spawns each call so a slow handler cannot block the reader,
/// but a handler that never returns will still pile up tasks.
pub trait UserDataHandler: Send + Sync {
    fn handle(&self, event: UserDataEvent);
}

impl<F> UserDataHandler for F
where
    F: Fn(UserDataEvent) + Send + Sync,
{
    fn handle(&self, event: UserDataEvent) {
        self(event)
    }
}

/// Show only enough of a secret-bearing string to confirm identity in logs.
fn truncate_for_log(s: &str) -> String {
    if s.len() <= 8 {
        "<redacted>".to_string()
    } else {
        format!("{}...", &s[..8])
    }
}

pub struct UserDataStream {
    client: Arc<dyn FuturesClient>,
    handler: Arc<dyn UserDataHandler>,
    state: RwLock<StreamState>,
    listen_key: RwLock<Option<String>>,
    open_orders: RwLock<HashMap<u64, Order>>,
    keep_alive_interval: Duration,
    listen_key_ttl: Duration,
    shutdown: AtomicBool,
    consecutive_keepalive_failures: AtomicU32,
}

impl UserDataStream {
    pub fn new(
        client: Arc<dyn FuturesClient>,
        handler: Arc<dyn UserDataHandler>,
        keep_alive_interval: Duration,
        listen_key_ttl: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            handler,
            state: RwLock::new(StreamState::Idle),
            listen_key: RwLock::new(None),
            open_orders: RwLock::new(HashMap::new()),
            keep_alive_interval,
            listen_key_ttl,
            shutdown: AtomicBool::new(false),
            consecutive_keepalive_failures: AtomicU32::new(0),
        })
    }

    pub fn state(&self) -> StreamState {
        *self.state.read()
    }

    pub fn open_order_count(&self) -> usize {
        self.open_orders.read().len()
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    fn set_state(&self, state: StreamState) {
        *self.state.write() = state;
    }

    /// Drives the stream forever: obtain a listen key, connect, read until
    /// disconnect or forced refresh, then loop. Returns only after
    /// `shutdown()` is called.
    pub async fn run(self: Arc<Self>) {
        while !self.shutdown.load(Ordering::Relaxed) {
            self.set_state(StreamState::ObtainingKey);
            let listen_key = match self.obtain_listen_key_with_retry().await {
                Some(key) => key,
                None => {
                    error!("exhausted listen-key retries, backing off before trying again");
                    tokio::time::sleep(DIAL_BACKOFF).await;
                    continue;
                }
            };
            *self.listen_key.write() = Some(listen_key.clone());

            let keepalive_handle = {
                let this = self.clone();
                let key = listen_key.clone();
                tokio::spawn(async move { this.keep_alive_loop(key).await })
            };

            self.set_state(StreamState::Connecting);
            self.run_connection(&listen_key).await;

            keepalive_handle.abort();
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            self.set_state(StreamState::Reconnecting);
            tokio::time::sleep(DIAL_BACKOFF).await;
        }
        self.set_state(StreamState::Idle);
    }

    async fn obtain_listen_key_with_retry(&self) -> Option<String> {
        for attempt in 1..=MAX_LISTEN_KEY_RETRIES {
            match self.client.get_listen_key().await {
                Ok(key) => {
                    info!(listen_key = %truncate_for_log(&key), "obtained listen key");
                    return Some(key);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "failed to obtain listen key");
                    tokio::time::sleep(DIAL_BACKOFF).await;
                }
            }
        }
        None
    }

    async fn keep_alive_loop(self: Arc<Self>, listen_key: String) {
        let mut ticker = tokio::time::interval(self.keep_alive_interval);
        ticker.tick().await; // first tick fires immediately, skip it
        loop {
            ticker.tick().await;
            if self.keep_alive_window(&listen_key).await {
                self.consecutive_keepalive_failures.store(0, Ordering::Relaxed);
                continue;
            }

            let failures = self.consecutive_keepalive_failures.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                listen_key = %truncate_for_log(&listen_key),
                failures,
                "keep-alive window failed after exhausting retries"
            );
            if failures >= MAX_KEEPALIVE_FAILURES {
                warn!("forcing listen key refresh after repeated keep-alive window failures");
                self.handler.handle(UserDataEvent::ListenKeyExpired);
                return;
            }
        }
    }

    /// One 15-min keep-alive window: up to `MAX_KEEPALIVE_ATTEMPTS_PER_WINDOW`
    /// attempts, 5 s apart, before the window itself counts as failed.
    /// Returns `true` as soon as any attempt succeeds.
    async fn keep_alive_window(&self, listen_key: &str) -> bool {
        for attempt in 1..=MAX_KEEPALIVE_ATTEMPTS_PER_WINDOW {
            match self.client.keep_alive_listen_key(listen_key).await {
                Ok(()) => return true,
                Err(e) => {
                    warn!(
                        listen_key = %truncate_for_log(listen_key),
                        attempt,
                        error = %e,
                        "keep-alive attempt failed"
                    );
                    if attempt < MAX_KEEPALIVE_ATTEMPTS_PER_WINDOW {
                        tokio::time::sleep(KEEPALIVE_RETRY_DELAY).await;
                    }
                }
            }
        }
        false
    }

    #[instrument(skip(self), fields(listen_key = %truncate_for_log(listen_key)))]
    async fn run_connection(&self, listen_key: &str) {
        let url = format!("{}/ws/{}", self.client.ws_base_url(), listen_key);
        info!(url = %truncate_for_log(&url), "connecting user data stream");

        let ws_stream = match connect_async(&url).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                error!(error = %e, "user data stream dial failed");
                return;
            }
        };

        self.set_state(StreamState::Running);
        let (_write, mut read) = ws_stream.split();

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return;
            }
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = parse_user_data_event(&text) {
                        self.apply_and_dispatch(event);
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "user data stream read error");
                    tokio::time::sleep(READ_FAILURE_BACKOFF).await;
                    return;
                }
                None => {
                    warn!("user data stream ended");
                    return;
                }
            }
        }
    }

    fn apply_and_dispatch(&self, event: UserDataEvent) {
        if let UserDataEvent::OrderUpdate { order } = &event {
            let mut orders = self.open_orders.write();
            if order.status.is_terminal() {
                orders.remove(&order.order_id);
            } else {
                orders.insert(order.order_id, order.clone());
            }
        }
        let handler = self.handler.clone();
        tokio::spawn(async move { handler.handle(event) });
    }
}

fn parse_user_data_event(text: &str) -> Option<UserDataEvent> {
    let root: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "failed to parse user data stream message");
            return None;
        }
    };

    match root["e"].as_str()? {
        "ACCOUNT_UPDATE" => {
            let positions = root["a"]["P"]
                .as_array()
                .cloned()
                .unwrap_or_default()
                .iter()
                .map(|p| Position {
                    symbol: p["s"].as_str().unwrap_or_default().to_string(),
                    position_side: match p["ps"].as_str() {
                        Some("LONG") => PositionSide::Long,
                        Some("SHORT") => PositionSide::Short,
                        _ => PositionSide::Both,
                    },
                    position_amt: p["pa"].as_str().and_then(|s| s.parse().ok()).unwrap_or_default(),
                    entry_price: p["ep"].as_str().and_then(|s| s.parse().ok()).unwrap_or_default(),
                    mark_price: Default::default(),
                    unrealized_profit: p["up"].as_str().and_then(|s| s.parse().ok()).unwrap_or_default(),
                    leverage: 0,
                    margin_type: crate::types::MarginType::Crossed,
                    isolated_margin: p["iw"].as_str().and_then(|s| s.parse().ok()).unwrap_or_default(),
                    update_time: root["E"].as_i64().unwrap_or(0),
                })
                .collect();
            Some(UserDataEvent::AccountUpdate { positions })
        }
        "ORDER_TRADE_UPDATE" => {
            let o = &root["o"];
            let order = Order {
                order_id: o["i"].as_u64().unwrap_or(0),
                client_order_id: o["c"].as_str().unwrap_or_default().to_string(),
                symbol: o["s"].as_str().unwrap_or_default().to_string(),
                side: match o["S"].as_str() {
                    Some("SELL") => OrderSide::Sell,
                    _ => OrderSide::Buy,
                },
                position_side: match o["ps"].as_str() {
                    Some("LONG") => PositionSide::Long,
                    Some("SHORT") => PositionSide::Short,
                    _ => PositionSide::Both,
                },
                order_type: match o["o"].as_str() {
                    Some("MARKET") => OrderType::Market,
                    Some("STOP") => OrderType::Stop,
                    Some("STOP_MARKET") => OrderType::StopMarket,
                    Some("TAKE_PROFIT") => OrderType::TakeProfit,
                    Some("TAKE_PROFIT_MARKET") => OrderType::TakeProfitMarket,
                    Some("TRAILING_STOP_MARKET") => OrderType::TrailingStopMarket,
                    _ => OrderType::Limit,
                },
                status: match o["X"].as_str() {
                    Some("PARTIALLY_FILLED") => OrderStatus::PartiallyFilled,
                    Some("FILLED") => OrderStatus::Filled,
                    Some("CANCELED") => OrderStatus::Canceled,
                    Some("EXPIRED") => OrderStatus::Expired,
                    _ => OrderStatus::New,
                },
                price: o["p"].as_str().and_then(|s| s.parse().ok()).unwrap_or_default(),
                orig_qty: o["q"].as_str().and_then(|s| s.parse().ok()).unwrap_or_default(),
                executed_qty: o["z"].as_str().and_then(|s| s.parse().ok()).unwrap_or_default(),
                time_in_force: match o["f"].as_str() {
                    Some("IOC") => crate::types::TimeInForce::Ioc,
                    Some("FOK") => crate::types::TimeInForce::Fok,
                    Some("GTX") => crate::types::TimeInForce::Gtx,
                    _ => crate::types::TimeInForce::Gtc,
                },
                reduce_only: o["R"].as_bool().unwrap_or(false),
                update_time: root["E"].as_i64().unwrap_or(0),
            };
            Some(UserDataEvent::OrderUpdate { order })
        }
        "MARGIN_CALL" => {
            let symbol = root["p"]
                .as_array()
                .and_then(|arr| arr.first())
                .and_then(|p| p["s"].as_str())
                .unwrap_or_default()
                .to_string();
            Some(UserDataEvent::MarginCall { symbol })
        }
        "listenKeyExpired" => Some(UserDataEvent::ListenKeyExpired),
        other => {
            warn!(event = other, "unrecognised user data stream event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[test]
    fn truncate_for_log_hides_full_secret() {
        let key = "pqia91ma19a5s61cv6a81va65sdf19v8a65a1a5s61cv6a81va65sdf19v8a65a1";
        let shown = truncate_for_log(key);
        assert!(!shown.contains(&key[10..]));
        assert!(shown.ends_with("..."));
    }

    #[test]
    fn truncate_for_log_redacts_short_strings_entirely() {
        assert_eq!(truncate_for_log("short"), "<redacted>");
    }

    #[test]
    fn account_update_parses_positions() {
        let msg = r#"{"e":"ACCOUNT_UPDATE","E":123,"a":{"P":[{"s":"BTCUSDT","ps":"BOTH","pa":"1.000","ep":"50000","up":"10","iw":"0"}]}}"#;
        let event = parse_user_data_event(msg).unwrap();
        match event {
            UserDataEvent::AccountUpdate { positions } => {
                assert_eq!(positions.len(), 1);
                assert_eq!(positions[0].symbol, "BTCUSDT");
            }
            _ => panic!("expected AccountUpdate"),
        }
    }

    #[test]
    fn order_trade_update_parses_terminal_status() {
        let msg = r#"{"e":"ORDER_TRADE_UPDATE","E":123,"o":{"i":42,"c":"abc","s":"BTCUSDT","S":"BUY","ps":"BOTH","o":"MARKET","X":"FILLED","p":"0","q":"1","z":"1","f":"GTC","R":false}}"#;
        let event = parse_user_data_event(msg).unwrap();
        match event {
            UserDataEvent::OrderUpdate { order } => {
                assert_eq!(order.order_id, 42);
                assert!(order.status.is_terminal());
            }
            _ => panic!("expected OrderUpdate"),
        }
    }

    #[test]
    fn listen_key_expired_event_recognised() {
        let msg = r#"{"e":"listenKeyExpired","E":123}"#;
        assert!(matches!(
            parse_user_data_event(msg),
            Some(UserDataEvent::ListenKeyExpired)
        ));
    }

    #[test]
    fn unknown_event_type_is_ignored_not_panicking() {
        let msg = r#"{"e":"SOME_FUTURE_EVENT","E":123}"#;
        assert!(parse_user_data_event(msg).is_none());
    }

    /// Wraps a `MockFuturesClient`, delegating every call except
    /// `keep_alive_listen_key`, which fails the first `fail_count` calls then
    /// succeeds. Lets keep-alive-window retry behavior be exercised without
    /// a real exchange.
    struct FlakyKeepAliveClient {
        inner: crate::client::mock::MockFuturesClient,
        attempts: std::sync::atomic::AtomicU32,
        fail_count: u32,
    }

    #[async_trait]
    impl FuturesClient for FlakyKeepAliveClient {
        async fn get_account_info(&self) -> crate::client::ClientResult<crate::types::AccountInfo> {
            self.inner.get_account_info().await
        }
        async fn get_all_positions(&self) -> crate::client::ClientResult<Vec<Position>> {
            self.inner.get_all_positions().await
        }
        async fn get_position(&self, symbol: &str) -> crate::client::ClientResult<Option<Position>> {
            self.inner.get_position(symbol).await
        }
        async fn get_commission_rate(
            &self,
            symbol: &str,
        ) -> crate::client::ClientResult<(rust_decimal::Decimal, rust_decimal::Decimal)> {
            self.inner.get_commission_rate(symbol).await
        }
        async fn set_leverage(&self, symbol: &str, leverage: u32) -> crate::client::ClientResult<u32> {
            self.inner.set_leverage(symbol, leverage).await
        }
        async fn set_margin_type(
            &self,
            symbol: &str,
            margin_type: crate::types::MarginType,
        ) -> crate::client::ClientResult<()> {
            self.inner.set_margin_type(symbol, margin_type).await
        }
        async fn set_position_mode(&self, hedge_mode: bool) -> crate::client::ClientResult<()> {
            self.inner.set_position_mode(hedge_mode).await
        }
        async fn get_position_mode(&self) -> crate::client::ClientResult<bool> {
            self.inner.get_position_mode().await
        }
        async fn place_order(&self, params: crate::types::OrderParams) -> crate::client::ClientResult<Order> {
            self.inner.place_order(params).await
        }
        async fn cancel_order(&self, symbol: &str, order_id: u64) -> crate::client::ClientResult<Order> {
            self.inner.cancel_order(symbol, order_id).await
        }
        async fn cancel_all_open_orders(&self, symbol: &str) -> crate::client::ClientResult<()> {
            self.inner.cancel_all_open_orders(symbol).await
        }
        async fn get_open_orders(&self, symbol: Option<&str>) -> crate::client::ClientResult<Vec<Order>> {
            self.inner.get_open_orders(symbol).await
        }
        async fn get_order(&self, symbol: &str, order_id: u64) -> crate::client::ClientResult<Order> {
            self.inner.get_order(symbol, order_id).await
        }
        async fn place_algo_order(
            &self,
            params: crate::types::AlgoOrderParams,
        ) -> crate::client::ClientResult<crate::types::AlgoOrder> {
            self.inner.place_algo_order(params).await
        }
        async fn get_open_algo_orders(
            &self,
            symbol: Option<&str>,
        ) -> crate::client::ClientResult<Vec<crate::types::AlgoOrder>> {
            self.inner.get_open_algo_orders(symbol).await
        }
        async fn cancel_algo_order(
            &self,
            symbol: &str,
            algo_id: u64,
        ) -> crate::client::ClientResult<crate::types::AlgoOrder> {
            self.inner.cancel_algo_order(symbol, algo_id).await
        }
        async fn cancel_all_algo_orders(&self, symbol: &str) -> crate::client::ClientResult<()> {
            self.inner.cancel_all_algo_orders(symbol).await
        }
        async fn get_algo_order_history(
            &self,
            symbol: &str,
        ) -> crate::client::ClientResult<Vec<crate::types::AlgoOrder>> {
            self.inner.get_algo_order_history(symbol).await
        }
        async fn get_funding_rate(&self, symbol: &str) -> crate::client::ClientResult<crate::types::FundingRate> {
            self.inner.get_funding_rate(symbol).await
        }
        async fn get_funding_rate_history(
            &self,
            symbol: &str,
            start_time: Option<i64>,
            end_time: Option<i64>,
        ) -> crate::client::ClientResult<Vec<crate::types::FundingRate>> {
            self.inner.get_funding_rate_history(symbol, start_time, end_time).await
        }
        async fn get_mark_price(&self, symbol: &str) -> crate::client::ClientResult<crate::types::MarkPrice> {
            self.inner.get_mark_price(symbol).await
        }
        async fn get_all_mark_prices(&self) -> crate::client::ClientResult<Vec<crate::types::MarkPrice>> {
            self.inner.get_all_mark_prices().await
        }
        async fn get_order_book(&self, symbol: &str, limit: u32) -> crate::client::ClientResult<crate::types::OrderBook> {
            self.inner.get_order_book(symbol, limit).await
        }
        async fn get_klines(
            &self,
            symbol: &str,
            interval: &str,
            limit: u32,
        ) -> crate::client::ClientResult<Vec<crate::types::Kline>> {
            self.inner.get_klines(symbol, interval, limit).await
        }
        async fn get_current_price(&self, symbol: &str) -> crate::client::ClientResult<rust_decimal::Decimal> {
            self.inner.get_current_price(symbol).await
        }
        async fn get_ticker_24h(&self, symbol: &str) -> crate::client::ClientResult<crate::types::Ticker24h> {
            self.inner.get_ticker_24h(symbol).await
        }
        async fn get_all_tickers_24h(&self) -> crate::client::ClientResult<Vec<crate::types::Ticker24h>> {
            self.inner.get_all_tickers_24h().await
        }
        async fn get_exchange_info(&self) -> crate::client::ClientResult<crate::types::ExchangeInfo> {
            self.inner.get_exchange_info().await
        }
        async fn get_symbols(&self) -> crate::client::ClientResult<Vec<String>> {
            self.inner.get_symbols().await
        }
        async fn get_trade_history(
            &self,
            symbol: &str,
            start_time: Option<i64>,
            end_time: Option<i64>,
        ) -> crate::client::ClientResult<Vec<crate::types::Trade>> {
            self.inner.get_trade_history(symbol, start_time, end_time).await
        }
        async fn get_funding_fee_history(
            &self,
            symbol: &str,
        ) -> crate::client::ClientResult<Vec<crate::types::IncomeRecord>> {
            self.inner.get_funding_fee_history(symbol).await
        }
        async fn get_all_orders(
            &self,
            symbol: &str,
            start_time: Option<i64>,
            end_time: Option<i64>,
        ) -> crate::client::ClientResult<Vec<Order>> {
            self.inner.get_all_orders(symbol, start_time, end_time).await
        }
        async fn get_income_history(
            &self,
            income_type: crate::types::IncomeType,
        ) -> crate::client::ClientResult<Vec<crate::types::IncomeRecord>> {
            self.inner.get_income_history(income_type).await
        }
        async fn get_listen_key(&self) -> crate::client::ClientResult<String> {
            self.inner.get_listen_key().await
        }
        async fn keep_alive_listen_key(&self, listen_key: &str) -> crate::client::ClientResult<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
            if attempt <= self.fail_count {
                return Err(ExchangeError::rejected(-1, "simulated keep-alive failure"));
            }
            self.inner.keep_alive_listen_key(listen_key).await
        }
        async fn close_listen_key(&self, listen_key: &str) -> crate::client::ClientResult<()> {
            self.inner.close_listen_key(listen_key).await
        }
        fn ws_base_url(&self) -> &str {
            self.inner.ws_base_url()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_window_retries_up_to_three_times_before_reporting_failure() {
        let client = FlakyKeepAliveClient {
            inner: crate::client::mock::MockFuturesClient::new(),
            attempts: std::sync::atomic::AtomicU32::new(0),
            fail_count: 2,
        };
        let stream = UserDataStream::new(
            Arc::new(client),
            Arc::new({
                struct NullHandler;
                impl UserDataHandler for NullHandler {
                    fn handle(&self, _event: UserDataEvent) {}
                }
                NullHandler
            }),
            Duration::from_secs(900),
            Duration::from_secs(3600),
        );

        // Two failures then a success inside one window: the window as a
        // whole must be reported as succeeded, not failed.
        let succeeded = stream.keep_alive_window("test-key").await;
        assert!(succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_window_fails_after_exhausting_all_retries() {
        let client = FlakyKeepAliveClient {
            inner: crate::client::mock::MockFuturesClient::new(),
            attempts: std::sync::atomic::AtomicU32::new(0),
            fail_count: 10,
        };
        let stream = UserDataStream::new(
            Arc::new(client),
            Arc::new({
                struct NullHandler;
                impl UserDataHandler for NullHandler {
                    fn handle(&self, _event: UserDataEvent) {}
                }
                NullHandler
            }),
            Duration::from_secs(900),
            Duration::from_secs(3600),
        );

        let succeeded = stream.keep_alive_window("test-key").await;
        assert!(!succeeded);
    }

    #[tokio::test]
    async fn terminal_order_update_removes_from_open_order_cache() {
        use crate::client::mock::MockFuturesClient;

        struct NullHandler;
        impl UserDataHandler for NullHandler {
            fn handle(&self, _event: UserDataEvent) {}
        }

        let client: Arc<dyn FuturesClient> = Arc::new(MockFuturesClient::new());
        let stream = UserDataStream::new(
            client,
            Arc::new(NullHandler),
            Duration::from_secs(900),
            Duration::from_secs(3600),
        );

        let new_order = Order {
            order_id: 7,
            client_order_id: "c7".into(),
            symbol: "BTCUSDT".into(),
            side: OrderSide::Buy,
            position_side: PositionSide::Both,
            order_type: OrderType::Limit,
            status: OrderStatus::New,
            price: Default::default(),
            orig_qty: Default::default(),
            executed_qty: Default::default(),
            time_in_force: crate::types::TimeInForce::Gtc,
            reduce_only: false,
            update_time: 0,
        };
        stream.apply_and_dispatch(UserDataEvent::OrderUpdate {
            order: new_order.clone(),
        });
        assert_eq!(stream.open_order_count(), 1);

        let mut filled = new_order;
        filled.status = OrderStatus::Filled;
        stream.apply_and_dispatch(UserDataEvent::OrderUpdate { order: filled });
        assert_eq!(stream.open_order_count(), 0);
    }
}
