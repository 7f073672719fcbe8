// =============================================================================
// Cached Client Wrapper — cache-first reads over any FuturesClient
// =============================================================================
//
// Wraps an inner `Arc<dyn FuturesClient>` and a shared `MarketDataCache`.
// Reads that the cache can answer freshly skip the network entirely; writes
// and cache misses pass through to the inner client. The cache handle is
// swappable under a `parking_lot::RwLock` so a factory can rotate a user's
// cache without tearing down the wrapper.
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::client::{ClientResult, FuturesClient};
use crate::market_data::MarketDataCache;
use crate::types::{
    AccountInfo, AlgoOrder, AlgoOrderParams, ExchangeInfo, FundingRate, IncomeRecord, IncomeType,
    Kline, MarginType, MarkPrice, Order, OrderBook, OrderParams, Position, Ticker24h, Trade,
};

pub struct CachedFuturesClient {
    inner: Arc<dyn FuturesClient>,
    cache: RwLock<Arc<MarketDataCache>>,
}

impl CachedFuturesClient {
    pub fn new(inner: Arc<dyn FuturesClient>, cache: Arc<MarketDataCache>) -> Self {
        Self {
            inner,
            cache: RwLock::new(cache),
        }
    }

    /// Swap in a different cache instance without reconstructing the wrapper.
    pub fn set_cache(&self, cache: Arc<MarketDataCache>) {
        *self.cache.write() = cache;
    }

    fn cache(&self) -> Arc<MarketDataCache> {
        self.cache.read().clone()
    }
}

#[async_trait]
impl FuturesClient for CachedFuturesClient {
    // --- account / orders: no cache story, pass straight through ------------

    async fn get_account_info(&self) -> ClientResult<AccountInfo> {
        self.inner.get_account_info().await
    }

    async fn get_all_positions(&self) -> ClientResult<Vec<Position>> {
        self.inner.get_all_positions().await
    }

    async fn get_position(&self, symbol: &str) -> ClientResult<Option<Position>> {
        self.inner.get_position(symbol).await
    }

    async fn get_commission_rate(&self, symbol: &str) -> ClientResult<(Decimal, Decimal)> {
        self.inner.get_commission_rate(symbol).await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ClientResult<u32> {
        self.inner.set_leverage(symbol, leverage).await
    }

    async fn set_margin_type(&self, symbol: &str, margin_type: MarginType) -> ClientResult<()> {
        self.inner.set_margin_type(symbol, margin_type).await
    }

    async fn set_position_mode(&self, hedge_mode: bool) -> ClientResult<()> {
        self.inner.set_position_mode(hedge_mode).await
    }

    async fn get_position_mode(&self) -> ClientResult<bool> {
        self.inner.get_position_mode().await
    }

    async fn place_order(&self, params: OrderParams) -> ClientResult<Order> {
        self.inner.place_order(params).await
    }

    async fn cancel_order(&self, symbol: &str, order_id: u64) -> ClientResult<Order> {
        self.inner.cancel_order(symbol, order_id).await
    }

    async fn cancel_all_open_orders(&self, symbol: &str) -> ClientResult<()> {
        self.inner.cancel_all_open_orders(symbol).await
    }

    async fn get_open_orders(&self, symbol: Option<&str>) -> ClientResult<Vec<Order>> {
        self.inner.get_open_orders(symbol).await
    }

    async fn get_order(&self, symbol: &str, order_id: u64) -> ClientResult<Order> {
        self.inner.get_order(symbol, order_id).await
    }

    async fn place_algo_order(&self, params: AlgoOrderParams) -> ClientResult<AlgoOrder> {
        self.inner.place_algo_order(params).await
    }

    async fn get_open_algo_orders(&self, symbol: Option<&str>) -> ClientResult<Vec<AlgoOrder>> {
        self.inner.get_open_algo_orders(symbol).await
    }

    async fn cancel_algo_order(&self, symbol: &str, algo_id: u64) -> ClientResult<AlgoOrder> {
        self.inner.cancel_algo_order(symbol, algo_id).await
    }

    async fn cancel_all_algo_orders(&self, symbol: &str) -> ClientResult<()> {
        self.inner.cancel_all_algo_orders(symbol).await
    }

    async fn get_algo_order_history(&self, symbol: &str) -> ClientResult<Vec<AlgoOrder>> {
        self.inner.get_algo_order_history(symbol).await
    }

    // --- market data: cache-first -------------------------------------------

    async fn get_funding_rate(&self, symbol: &str) -> ClientResult<FundingRate> {
        if let Some(rate) = self.cache().get_funding_rate(symbol) {
            return Ok(rate);
        }
        let rate = self.inner.get_funding_rate(symbol).await?;
        Ok(rate)
    }

    async fn get_funding_rate_history(
        &self,
        symbol: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> ClientResult<Vec<FundingRate>> {
        self.inner.get_funding_rate_history(symbol, start_time, end_time).await
    }

    async fn get_mark_price(&self, symbol: &str) -> ClientResult<MarkPrice> {
        if let Some(price) = self.cache().get_mark_price(symbol) {
            return Ok(price);
        }
        let price = self.inner.get_mark_price(symbol).await?;
        self.cache().set_mark_price(symbol, price.clone());
        Ok(price)
    }

    async fn get_all_mark_prices(&self) -> ClientResult<Vec<MarkPrice>> {
        self.inner.get_all_mark_prices().await
    }

    async fn get_order_book(&self, symbol: &str, limit: u32) -> ClientResult<OrderBook> {
        if let Some(book) = self.cache().get_order_book(symbol) {
            return Ok(book);
        }
        let book = self.inner.get_order_book(symbol, limit).await?;
        self.cache().set_order_book(symbol, book.clone());
        Ok(book)
    }

    async fn get_klines(&self, symbol: &str, interval: &str, limit: u32) -> ClientResult<Vec<Kline>> {
        if let Some(klines) = self.cache().get_klines(symbol, interval, limit as usize) {
            return Ok(klines);
        }
        let klines = self.inner.get_klines(symbol, interval, limit).await?;
        self.cache().set_klines(symbol, interval, klines.clone());
        Ok(klines)
    }

    async fn get_current_price(&self, symbol: &str) -> ClientResult<Decimal> {
        if let Some(price) = self.cache().get_mark_price(symbol) {
            return Ok(price.mark_price);
        }
        self.inner.get_current_price(symbol).await
    }

    async fn get_ticker_24h(&self, symbol: &str) -> ClientResult<Ticker24h> {
        self.inner.get_ticker_24h(symbol).await
    }

    async fn get_all_tickers_24h(&self) -> ClientResult<Vec<Ticker24h>> {
        self.inner.get_all_tickers_24h().await
    }

    async fn get_exchange_info(&self) -> ClientResult<ExchangeInfo> {
        self.inner.get_exchange_info().await
    }

    async fn get_symbols(&self) -> ClientResult<Vec<String>> {
        self.inner.get_symbols().await
    }

    async fn get_trade_history(
        &self,
        symbol: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> ClientResult<Vec<Trade>> {
        self.inner.get_trade_history(symbol, start_time, end_time).await
    }

    async fn get_funding_fee_history(&self, symbol: &str) -> ClientResult<Vec<IncomeRecord>> {
        self.inner.get_funding_fee_history(symbol).await
    }

    async fn get_all_orders(
        &self,
        symbol: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> ClientResult<Vec<Order>> {
        self.inner.get_all_orders(symbol, start_time, end_time).await
    }

    async fn get_income_history(&self, income_type: IncomeType) -> ClientResult<Vec<IncomeRecord>> {
        self.inner.get_income_history(income_type).await
    }

    async fn get_listen_key(&self) -> ClientResult<String> {
        self.inner.get_listen_key().await
    }

    async fn keep_alive_listen_key(&self, listen_key: &str) -> ClientResult<()> {
        self.inner.keep_alive_listen_key(listen_key).await
    }

    async fn close_listen_key(&self, listen_key: &str) -> ClientResult<()> {
        self.inner.close_listen_key(listen_key).await
    }

    fn ws_base_url(&self) -> &str {
        self.inner.ws_base_url()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockFuturesClient;
    use std::sync::Arc;

    #[tokio::test]
    async fn mark_price_served_from_cache_without_hitting_inner() {
        let cache = Arc::new(MarketDataCache::new());
        cache.set_mark_price(
            "BTCUSDT",
            MarkPrice {
                symbol: "BTCUSDT".into(),
                mark_price: Decimal::new(42_000, 0),
                index_price: Decimal::new(42_000, 0),
                last_funding_rate: Decimal::ZERO,
                next_funding_time: 0,
            },
        );
        let inner: Arc<dyn FuturesClient> = Arc::new(MockFuturesClient::new());
        let client = CachedFuturesClient::new(inner, cache.clone());
        let price = client.get_mark_price("BTCUSDT").await.unwrap();
        assert_eq!(price.mark_price, Decimal::new(42_000, 0));
        assert_eq!(cache.stats().mark_price_hits, 1);
    }

    #[tokio::test]
    async fn mark_price_miss_falls_through_and_populates_cache() {
        let cache = Arc::new(MarketDataCache::new());
        let inner: Arc<dyn FuturesClient> =
            Arc::new(MockFuturesClient::with_price_provider(Some(Arc::new(|_| {
                Decimal::new(100, 0)
            }))));
        let client = CachedFuturesClient::new(inner, cache.clone());
        let price = client.get_mark_price("ETHUSDT").await.unwrap();
        assert_eq!(price.mark_price, Decimal::new(100, 0));
        assert_eq!(cache.stats().mark_price_misses, 1);
        // Second call should now be served from cache.
        let _ = client.get_mark_price("ETHUSDT").await.unwrap();
        assert_eq!(cache.stats().mark_price_hits, 1);
    }

    #[tokio::test]
    async fn klines_miss_when_cache_holds_fewer_than_requested() {
        let cache = Arc::new(MarketDataCache::new());
        let inner: Arc<dyn FuturesClient> =
            Arc::new(MockFuturesClient::with_price_provider(Some(Arc::new(|_| {
                Decimal::new(1, 0)
            }))));
        let client = CachedFuturesClient::new(inner, cache.clone());
        let klines = client.get_klines("BTCUSDT", "1m", 10).await.unwrap();
        assert_eq!(klines.len(), 10);
        assert_eq!(cache.stats().kline_misses, 1);
    }

    #[tokio::test]
    async fn set_cache_swaps_the_active_cache_handle() {
        let cache_a = Arc::new(MarketDataCache::new());
        let cache_b = Arc::new(MarketDataCache::new());
        cache_b.set_mark_price(
            "BTCUSDT",
            MarkPrice {
                symbol: "BTCUSDT".into(),
                mark_price: Decimal::new(7, 0),
                index_price: Decimal::new(7, 0),
                last_funding_rate: Decimal::ZERO,
                next_funding_time: 0,
            },
        );
        let inner: Arc<dyn FuturesClient> = Arc::new(MockFuturesClient::new());
        let client = CachedFuturesClient::new(inner, cache_a);
        client.set_cache(cache_b);
        let price = client.get_mark_price("BTCUSDT").await.unwrap();
        assert_eq!(price.mark_price, Decimal::new(7, 0));
    }
}
