// =============================================================================
// Client Factory — per-(user, segment) client lifecycle and caching
// =============================================================================
//
// Clients are expensive to hold open (each owns a reqwest::Client and,
// indirectly, listen-key state) so the factory caches one per (user, market
// segment) behind a TTL and reuses it across callers. The cache is a
// concurrent map keyed by user, with a per-entry `tokio::sync::Mutex` so two
// concurrent callers racing to build the same user's client block on each
// other instead of both dialing the exchange.
//
// There is deliberately no "master" client spanning all users: every call is
// scoped to one user id, matching the multi-tenant shape of the rest of the
// substrate.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, instrument, warn};

use crate::client::{CachedFuturesClient, FuturesClient, LiveFuturesClient, MockFuturesClient};
use crate::config::RuntimeConfig;
use crate::error::ExchangeError;
use crate::market_data::MarketDataCache;
use crate::rate_limit::RateLimiter;
use crate::secrets::CredentialProvider;
use crate::types::MarketSegment;

#[derive(Debug, Clone, Default)]
pub struct FactoryStats {
    pub cached_spot_clients: usize,
    pub cached_futures_clients: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub credential_store_healthy: bool,
}

struct CacheEntry {
    client: Arc<dyn FuturesClient>,
    created_at: Instant,
    last_used: Instant,
}

fn cache_key(user_id: &str, segment: MarketSegment) -> String {
    format!("{user_id}:{segment}")
}

pub struct ClientFactory {
    credentials: Arc<dyn CredentialProvider>,
    market_cache: Arc<MarketDataCache>,
    rate_limiter: Arc<RateLimiter>,
    segment_config: RuntimeConfig,
    mock_mode: bool,
    ttl: RwLock<Duration>,
    entries: RwLock<HashMap<String, Arc<AsyncMutex<Option<CacheEntry>>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    credential_store_healthy: AtomicBool,
}

impl ClientFactory {
    pub fn new(
        config: RuntimeConfig,
        credentials: Arc<dyn CredentialProvider>,
        market_cache: Arc<MarketDataCache>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Arc<Self> {
        let mock_mode = config.binance_mock_mode;
        let ttl = config.client_ttl();
        Arc::new(Self {
            credentials,
            market_cache,
            rate_limiter,
            segment_config: config,
            mock_mode,
            ttl: RwLock::new(ttl),
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            credential_store_healthy: AtomicBool::new(true),
        })
    }

    /// Change the cache TTL at runtime; takes effect for entries created or
    /// revalidated after the call.
    pub fn set_ttl(&self, ttl: Duration) {
        *self.ttl.write() = ttl;
    }

    fn entry_lock(&self, key: &str) -> Arc<AsyncMutex<Option<CacheEntry>>> {
        if let Some(lock) = self.entries.read().get(key) {
            return lock.clone();
        }
        self.entries
            .write()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
            .clone()
    }

    fn build_client(&self, segment: MarketSegment, user_id: &str) -> Result<Arc<dyn FuturesClient>, ExchangeError> {
        let segment_cfg = match segment {
            MarketSegment::Futures => &self.segment_config.futures,
            MarketSegment::Spot => &self.segment_config.binance,
        };

        let inner: Arc<dyn FuturesClient> = if self.mock_mode {
            Arc::new(MockFuturesClient::new())
        } else {
            let creds = match self.credentials.credentials_for(user_id) {
                Ok(creds) => {
                    self.credential_store_healthy.store(true, Ordering::Relaxed);
                    creds
                }
                Err(e) => {
                    self.credential_store_healthy.store(false, Ordering::Relaxed);
                    return Err(e);
                }
            };
            let ws_base = if segment_cfg.testnet {
                "wss://stream.binancefuture.com"
            } else {
                "wss://fstream.binance.com"
            };
            Arc::new(LiveFuturesClient::new(
                creds.api_key,
                creds.api_secret,
                segment_cfg.base_url.clone(),
                ws_base.to_string(),
                self.rate_limiter.clone(),
            ))
        };

        Ok(Arc::new(CachedFuturesClient::new(inner, self.market_cache.clone())))
    }

    /// Return a cached, still-fresh client for `(user_id, segment)`, building
    /// and caching one if absent or expired.
    #[instrument(skip(self), fields(user_id, segment = %segment))]
    pub async fn get_client_for_user(
        &self,
        user_id: &str,
        segment: MarketSegment,
    ) -> Result<Arc<dyn FuturesClient>, ExchangeError> {
        let key = cache_key(user_id, segment);
        let lock = self.entry_lock(&key);
        let mut guard = lock.lock().await;
        let ttl = *self.ttl.read();

        if let Some(entry) = guard.as_mut() {
            if entry.last_used.elapsed() < ttl {
                entry.last_used = Instant::now();
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.client.clone());
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let client = self.build_client(segment, user_id)?;
        info!(user_id, segment = %segment, "built new client");
        let now = Instant::now();
        *guard = Some(CacheEntry {
            client: client.clone(),
            created_at: now,
            last_used: now,
        });
        Ok(client)
    }

    pub fn invalidate_client(&self, user_id: &str, segment: MarketSegment) {
        let key = cache_key(user_id, segment);
        if let Some(lock) = self.entries.read().get(&key) {
            if let Ok(mut guard) = lock.try_lock() {
                *guard = None;
            } else {
                warn!(user_id, segment = %segment, "invalidate raced an in-flight build, will expire naturally");
            }
        }
    }

    pub fn invalidate_all(&self) {
        self.entries.write().clear();
    }

    /// Drop every cached client, releasing their sockets and HTTP pools.
    pub fn close(&self) {
        self.invalidate_all();
    }

    /// The substrate intentionally has no client that spans every tenant;
    /// every call must be scoped to a user id.
    pub fn get_master_client(&self) -> Result<Arc<dyn FuturesClient>, ExchangeError> {
        Err(ExchangeError::invalid_argument(
            "a master client spanning all users is not supported; request a per-user client",
        ))
    }

    /// Count live (non-evicted) entries per segment by peeking each entry's
    /// lock without blocking; an entry mid-build or mid-invalidation is
    /// simply skipped for this tick rather than awaited.
    pub fn stats(&self) -> FactoryStats {
        let spot_suffix = format!(":{}", MarketSegment::Spot);
        let futures_suffix = format!(":{}", MarketSegment::Futures);
        let mut cached_spot_clients = 0;
        let mut cached_futures_clients = 0;
        for (key, lock) in self.entries.read().iter() {
            let Ok(guard) = lock.try_lock() else { continue };
            if guard.is_none() {
                continue;
            }
            if key.ends_with(&spot_suffix) {
                cached_spot_clients += 1;
            } else if key.ends_with(&futures_suffix) {
                cached_futures_clients += 1;
            }
        }

        FactoryStats {
            cached_spot_clients,
            cached_futures_clients,
            cache_hits: self.hits.load(Ordering::Relaxed),
            cache_misses: self.misses.load(Ordering::Relaxed),
            credential_store_healthy: self.credential_store_healthy.load(Ordering::Relaxed),
        }
    }

    /// Periodically sweep entries that have sat idle past the TTL, so a
    /// long-idle tenant's client doesn't sit in memory forever while an
    /// actively-used one survives regardless of how long ago it was built.
    /// Runs until the factory is dropped.
    pub async fn run_cleanup_loop(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ttl = *self.ttl.read();
            let keys: Vec<String> = self.entries.read().keys().cloned().collect();
            let mut removed = 0;
            for key in keys {
                if let Some(lock) = self.entries.read().get(&key).cloned() {
                    if let Ok(guard) = lock.try_lock() {
                        if let Some(entry) = guard.as_ref() {
                            if entry.last_used.elapsed() >= ttl {
                                drop(guard);
                                self.entries.write().remove(&key);
                                removed += 1;
                            }
                        }
                    }
                }
            }
            if removed > 0 {
                info!(removed, "cleanup swept idle-expired clients");
            }
        }
    }
}

/// Thin per-segment adapter over the factory. In dev mode, a credential
/// lookup failure substitutes a mock client instead of failing the call, so
/// a developer without secrets configured can still exercise the rest of
/// the substrate.
pub struct UserClientManager {
    factory: Arc<ClientFactory>,
    dev_mode: bool,
}

impl UserClientManager {
    pub fn new(factory: Arc<ClientFactory>, dev_mode: bool) -> Self {
        Self { factory, dev_mode }
    }

    pub async fn get_spot_client(&self, user_id: &str) -> Result<Arc<dyn FuturesClient>, ExchangeError> {
        self.get_client(user_id, MarketSegment::Spot).await
    }

    pub async fn get_futures_client(&self, user_id: &str) -> Result<Arc<dyn FuturesClient>, ExchangeError> {
        self.get_client(user_id, MarketSegment::Futures).await
    }

    async fn get_client(&self, user_id: &str, segment: MarketSegment) -> Result<Arc<dyn FuturesClient>, ExchangeError> {
        match self.factory.get_client_for_user(user_id, segment).await {
            Ok(client) => Ok(client),
            Err(ExchangeError::CredentialUnavailable { .. }) if self.dev_mode => {
                warn!(user_id, segment = %segment, "no credentials available, substituting mock client (dev mode)");
                Ok(Arc::new(CachedFuturesClient::new(
                    Arc::new(MockFuturesClient::new()),
                    self.factory.market_cache.clone(),
                )))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::MapCredentialProvider;

    fn factory(mock_mode: bool) -> Arc<ClientFactory> {
        let mut config = RuntimeConfig::default();
        config.binance_mock_mode = mock_mode;
        ClientFactory::new(
            config,
            Arc::new(MapCredentialProvider::new()),
            Arc::new(MarketDataCache::new()),
            Arc::new(RateLimiter::new(2400, 1200)),
        )
    }

    #[tokio::test]
    async fn same_user_and_segment_returns_identical_client() {
        let factory = factory(true);
        let a = factory.get_client_for_user("alice", MarketSegment::Futures).await.unwrap();
        let b = factory.get_client_for_user("alice", MarketSegment::Futures).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let stats = factory.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cached_futures_clients, 1);
        assert_eq!(stats.cached_spot_clients, 0);
    }

    #[tokio::test]
    async fn different_users_get_different_clients() {
        let factory = factory(true);
        let a = factory.get_client_for_user("alice", MarketSegment::Futures).await.unwrap();
        let b = factory.get_client_for_user("bob", MarketSegment::Futures).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn expired_entry_is_rebuilt() {
        let factory = factory(true);
        factory.set_ttl(Duration::from_millis(1));
        let a = factory.get_client_for_user("alice", MarketSegment::Futures).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let b = factory.get_client_for_user("alice", MarketSegment::Futures).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(factory.stats().cache_misses, 2);
    }

    #[tokio::test]
    async fn invalidate_client_forces_rebuild() {
        let factory = factory(true);
        let a = factory.get_client_for_user("alice", MarketSegment::Futures).await.unwrap();
        factory.invalidate_client("alice", MarketSegment::Futures);
        let b = factory.get_client_for_user("alice", MarketSegment::Futures).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn live_mode_without_credentials_surfaces_credential_error() {
        let factory = factory(false);
        let err = factory
            .get_client_for_user("alice", MarketSegment::Futures)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::CredentialUnavailable { .. }));
        assert!(!factory.stats().credential_store_healthy);
    }

    #[tokio::test]
    async fn credential_store_health_bit_recovers_after_a_successful_lookup() {
        let credentials = Arc::new(MapCredentialProvider::new());
        let mut config = RuntimeConfig::default();
        config.binance_mock_mode = false;
        let factory = ClientFactory::new(
            config,
            credentials.clone(),
            Arc::new(MarketDataCache::new()),
            Arc::new(RateLimiter::new(2400, 1200)),
        );

        assert!(factory
            .get_client_for_user("alice", MarketSegment::Futures)
            .await
            .is_err());
        assert!(!factory.stats().credential_store_healthy);

        credentials.insert(
            "alice",
            crate::types::Credentials {
                api_key: "k".into(),
                api_secret: "s".into(),
                testnet: true,
            },
        );
        assert!(factory
            .get_client_for_user("alice", MarketSegment::Futures)
            .await
            .is_ok());
        assert!(factory.stats().credential_store_healthy);
    }

    #[tokio::test]
    async fn repeated_access_keeps_a_client_alive_past_its_original_ttl() {
        let factory = factory(true);
        factory.set_ttl(Duration::from_millis(30));
        let a = factory.get_client_for_user("alice", MarketSegment::Futures).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Touches last_used; the entry is still alive even though this is
        // past its original created_at + ttl.
        let b = factory.get_client_for_user("alice", MarketSegment::Futures).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        tokio::time::sleep(Duration::from_millis(20)).await;
        let c = factory.get_client_for_user("alice", MarketSegment::Futures).await.unwrap();
        assert!(Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn idle_client_is_rebuilt_once_unused_past_ttl() {
        let factory = factory(true);
        factory.set_ttl(Duration::from_millis(5));
        let a = factory.get_client_for_user("alice", MarketSegment::Futures).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let b = factory.get_client_for_user("alice", MarketSegment::Futures).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn master_client_is_explicitly_unsupported() {
        let factory = factory(true);
        assert!(factory.get_master_client().is_err());
    }

    #[tokio::test]
    async fn user_client_manager_substitutes_mock_in_dev_mode_on_missing_credentials() {
        let mut config = RuntimeConfig::default();
        config.binance_mock_mode = false;
        let factory = ClientFactory::new(
            config,
            Arc::new(MapCredentialProvider::new()),
            Arc::new(MarketDataCache::new()),
            Arc::new(RateLimiter::new(2400, 1200)),
        );
        let manager = UserClientManager::new(factory, true);
        let client = manager.get_futures_client("alice").await.unwrap();
        // The substituted client is a mock: placing an order succeeds with
        // no network access, which a live client without credentials could
        // never do.
        assert!(client.get_mark_price("BTCUSDT").await.is_ok());
    }

    #[tokio::test]
    async fn user_client_manager_propagates_credential_error_outside_dev_mode() {
        let mut config = RuntimeConfig::default();
        config.binance_mock_mode = false;
        let factory = ClientFactory::new(
            config,
            Arc::new(MapCredentialProvider::new()),
            Arc::new(MarketDataCache::new()),
            Arc::new(RateLimiter::new(2400, 1200)),
        );
        let manager = UserClientManager::new(factory, false);
        let err = manager.get_futures_client("alice").await.unwrap_err();
        assert!(matches!(err, ExchangeError::CredentialUnavailable { .. }));
    }
}
