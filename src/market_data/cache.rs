// =============================================================================
// Market Data Cache — thread-safe store fed by streams and backed by REST
// =============================================================================
//
// Three independent sub-stores keyed by symbol, symbol+interval, and symbol.
// Each sub-store tracks its own freshness window and hit/miss counters.
// Klines follow one update rule: identical `open_time` replaces the last
// candle in place, otherwise the series grows (trimmed to a bound).
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::types::{FundingRate, Kline, MarkPrice, OrderBook};

const MARK_PRICE_FRESHNESS: Duration = Duration::from_secs(30);
const KLINE_FRESHNESS: Duration = Duration::from_secs(60);
const ORDER_BOOK_FRESHNESS: Duration = Duration::from_secs(30);
const FUNDING_RATE_FRESHNESS: Duration = Duration::from_secs(5 * 60);
const MAX_KLINES_PER_SERIES: usize = 100;

struct Entry<T> {
    data: T,
    updated_at: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub mark_price_hits: u64,
    pub mark_price_misses: u64,
    pub kline_hits: u64,
    pub kline_misses: u64,
    pub order_book_hits: u64,
    pub order_book_misses: u64,
    pub funding_rate_hits: u64,
    pub funding_rate_misses: u64,
}

#[derive(Default)]
struct Counters {
    mark_price_hits: AtomicU64,
    mark_price_misses: AtomicU64,
    kline_hits: AtomicU64,
    kline_misses: AtomicU64,
    order_book_hits: AtomicU64,
    order_book_misses: AtomicU64,
    funding_rate_hits: AtomicU64,
    funding_rate_misses: AtomicU64,
}

/// Shared, thread-safe cache of the market data the substrate has observed.
/// Referenced (not owned) by any number of `CachedFuturesClient`s.
pub struct MarketDataCache {
    mark_prices: RwLock<HashMap<String, Entry<MarkPrice>>>,
    klines: RwLock<HashMap<String, Entry<Vec<Kline>>>>,
    order_books: RwLock<HashMap<String, Entry<OrderBook>>>,
    counters: Counters,
}

impl MarketDataCache {
    pub fn new() -> Self {
        Self {
            mark_prices: RwLock::new(HashMap::new()),
            klines: RwLock::new(HashMap::new()),
            order_books: RwLock::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    // --- mark price / funding rate (co-published) ---------------------------

    pub fn set_mark_price(&self, symbol: &str, price: MarkPrice) {
        self.mark_prices.write().insert(
            symbol.to_string(),
            Entry {
                data: price,
                updated_at: Instant::now(),
            },
        );
    }

    pub fn get_mark_price(&self, symbol: &str) -> Option<MarkPrice> {
        let guard = self.mark_prices.read();
        match guard.get(symbol) {
            Some(entry) if entry.updated_at.elapsed() <= MARK_PRICE_FRESHNESS => {
                self.counters.mark_price_hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.data.clone())
            }
            _ => {
                self.counters.mark_price_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn get_funding_rate(&self, symbol: &str) -> Option<FundingRate> {
        let guard = self.mark_prices.read();
        match guard.get(symbol) {
            Some(entry) if entry.updated_at.elapsed() <= FUNDING_RATE_FRESHNESS => {
                self.counters.funding_rate_hits.fetch_add(1, Ordering::Relaxed);
                Some(FundingRate {
                    symbol: symbol.to_string(),
                    funding_rate: entry.data.last_funding_rate,
                    funding_time: entry.data.next_funding_time,
                })
            }
            _ => {
                self.counters.funding_rate_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    // --- klines ---------------------------------------------------------------

    fn kline_key(symbol: &str, interval: &str) -> String {
        format!("{symbol}:{interval}")
    }

    /// Wholesale replace the cached series from a REST response.
    pub fn set_klines(&self, symbol: &str, interval: &str, klines: Vec<Kline>) {
        self.klines.write().insert(
            Self::kline_key(symbol, interval),
            Entry {
                data: klines,
                updated_at: Instant::now(),
            },
        );
    }

    /// Apply one incoming candle from a stream. If its `open_time` matches
    /// the last cached candle's, replace it in place (candle still open);
    /// otherwise append, trimming the front to `MAX_KLINES_PER_SERIES`.
    pub fn update_kline(&self, symbol: &str, interval: &str, candle: Kline) {
        let key = Self::kline_key(symbol, interval);
        let mut guard = self.klines.write();
        let entry = guard.entry(key).or_insert_with(|| Entry {
            data: Vec::new(),
            updated_at: Instant::now(),
        });

        match entry.data.last_mut() {
            Some(last) if last.open_time == candle.open_time => {
                *last = candle;
            }
            _ => {
                entry.data.push(candle);
                if entry.data.len() > MAX_KLINES_PER_SERIES {
                    let overflow = entry.data.len() - MAX_KLINES_PER_SERIES;
                    entry.data.drain(0..overflow);
                }
            }
        }
        entry.updated_at = Instant::now();
    }

    /// Return up to `limit` most recent klines if the cache is fresh and
    /// holds at least `limit` entries; otherwise a miss.
    pub fn get_klines(&self, symbol: &str, interval: &str, limit: usize) -> Option<Vec<Kline>> {
        let key = Self::kline_key(symbol, interval);
        let guard = self.klines.read();
        match guard.get(&key) {
            Some(entry)
                if entry.updated_at.elapsed() <= KLINE_FRESHNESS && entry.data.len() >= limit =>
            {
                self.counters.kline_hits.fetch_add(1, Ordering::Relaxed);
                let start = entry.data.len() - limit;
                Some(entry.data[start..].to_vec())
            }
            _ => {
                self.counters.kline_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    // --- order book -------------------------------------------------------

    pub fn set_order_book(&self, symbol: &str, book: OrderBook) {
        self.order_books.write().insert(
            symbol.to_string(),
            Entry {
                data: book,
                updated_at: Instant::now(),
            },
        );
    }

    pub fn get_order_book(&self, symbol: &str) -> Option<OrderBook> {
        let guard = self.order_books.read();
        match guard.get(symbol) {
            Some(entry) if entry.updated_at.elapsed() <= ORDER_BOOK_FRESHNESS => {
                self.counters.order_book_hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.data.clone())
            }
            _ => {
                self.counters.order_book_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            mark_price_hits: self.counters.mark_price_hits.load(Ordering::Relaxed),
            mark_price_misses: self.counters.mark_price_misses.load(Ordering::Relaxed),
            kline_hits: self.counters.kline_hits.load(Ordering::Relaxed),
            kline_misses: self.counters.kline_misses.load(Ordering::Relaxed),
            order_book_hits: self.counters.order_book_hits.load(Ordering::Relaxed),
            order_book_misses: self.counters.order_book_misses.load(Ordering::Relaxed),
            funding_rate_hits: self.counters.funding_rate_hits.load(Ordering::Relaxed),
            funding_rate_misses: self.counters.funding_rate_misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for MarketDataCache {
    fn default() -> Self {
        Self::new()
    }
}
