// =============================================================================
// Client Contract — the operation surface shared by live and mock clients
// =============================================================================

pub mod cached;
pub mod live;
pub mod mock;

pub use cached::CachedFuturesClient;
pub use live::LiveFuturesClient;
pub use mock::MockFuturesClient;

use async_trait::async_trait;

use crate::error::ExchangeError;
use crate::types::{
    AccountInfo, AlgoOrder, AlgoOrderParams, ExchangeInfo, FundingRate, IncomeRecord, IncomeType,
    Kline, MarginType, MarkPrice, Order, OrderBook, OrderParams, Position, Ticker24h, Trade,
};

pub type ClientResult<T> = Result<T, ExchangeError>;

/// The single polymorphic surface a user-scoped futures client exposes.
/// Implemented once against the real exchange (`LiveFuturesClient`) and once
/// in-memory (`MockFuturesClient`); callers hold `Arc<dyn FuturesClient>` so
/// the two are interchangeable.
#[async_trait]
pub trait FuturesClient: Send + Sync {
    // --- account ------------------------------------------------------------
    async fn get_account_info(&self) -> ClientResult<AccountInfo>;
    async fn get_all_positions(&self) -> ClientResult<Vec<Position>>;
    async fn get_position(&self, symbol: &str) -> ClientResult<Option<Position>>;
    async fn get_commission_rate(&self, symbol: &str) -> ClientResult<(rust_decimal::Decimal, rust_decimal::Decimal)>;

    // --- leverage / margin ----------------------------------------------------
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ClientResult<u32>;
    async fn set_margin_type(&self, symbol: &str, margin_type: MarginType) -> ClientResult<()>;
    async fn set_position_mode(&self, hedge_mode: bool) -> ClientResult<()>;
    async fn get_position_mode(&self) -> ClientResult<bool>;

    // --- orders ---------------------------------------------------------------
    async fn place_order(&self, params: OrderParams) -> ClientResult<Order>;
    async fn cancel_order(&self, symbol: &str, order_id: u64) -> ClientResult<Order>;
    async fn cancel_all_open_orders(&self, symbol: &str) -> ClientResult<()>;
    async fn get_open_orders(&self, symbol: Option<&str>) -> ClientResult<Vec<Order>>;
    async fn get_order(&self, symbol: &str, order_id: u64) -> ClientResult<Order>;

    // --- algo (conditional) orders ----------------------------------------------
    async fn place_algo_order(&self, params: AlgoOrderParams) -> ClientResult<AlgoOrder>;
    async fn get_open_algo_orders(&self, symbol: Option<&str>) -> ClientResult<Vec<AlgoOrder>>;
    async fn cancel_algo_order(&self, symbol: &str, algo_id: u64) -> ClientResult<AlgoOrder>;
    async fn cancel_all_algo_orders(&self, symbol: &str) -> ClientResult<()>;
    async fn get_algo_order_history(&self, symbol: &str) -> ClientResult<Vec<AlgoOrder>>;

    // --- market data ------------------------------------------------------------
    async fn get_funding_rate(&self, symbol: &str) -> ClientResult<FundingRate>;
    async fn get_funding_rate_history(
        &self,
        symbol: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> ClientResult<Vec<FundingRate>>;
    async fn get_mark_price(&self, symbol: &str) -> ClientResult<MarkPrice>;
    async fn get_all_mark_prices(&self) -> ClientResult<Vec<MarkPrice>>;
    async fn get_order_book(&self, symbol: &str, limit: u32) -> ClientResult<OrderBook>;
    async fn get_klines(&self, symbol: &str, interval: &str, limit: u32) -> ClientResult<Vec<Kline>>;
    async fn get_current_price(&self, symbol: &str) -> ClientResult<rust_decimal::Decimal>;
    async fn get_ticker_24h(&self, symbol: &str) -> ClientResult<Ticker24h>;
    async fn get_all_tickers_24h(&self) -> ClientResult<Vec<Ticker24h>>;

    // --- exchange info ----------------------------------------------------------
    async fn get_exchange_info(&self) -> ClientResult<ExchangeInfo>;
    async fn get_symbols(&self) -> ClientResult<Vec<String>>;

    // --- history ------------------------------------------------------------
    async fn get_trade_history(
        &self,
        symbol: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> ClientResult<Vec<Trade>>;
    async fn get_funding_fee_history(&self, symbol: &str) -> ClientResult<Vec<IncomeRecord>>;
    async fn get_all_orders(
        &self,
        symbol: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> ClientResult<Vec<Order>>;
    async fn get_income_history(&self, income_type: IncomeType) -> ClientResult<Vec<IncomeRecord>>;

    // --- websocket plumbing -------------------------------------------------------
    async fn get_listen_key(&self) -> ClientResult<String>;
    async fn keep_alive_listen_key(&self, listen_key: &str) -> ClientResult<()>;
    async fn close_listen_key(&self, listen_key: &str) -> ClientResult<()>;

    /// Base URL for this client's WebSocket host (prod vs testnet).
    fn ws_base_url(&self) -> &str;
}
