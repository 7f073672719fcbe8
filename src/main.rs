// =============================================================================
// Derivatives Client Runtime — Demo Entry Point
// =============================================================================
//
// Wires up the shared substrate (rate limiter, market data cache, client
// factory, kline subscription manager) and runs one user's user-data stream
// to demonstrate the whole stack end to end. No strategy, execution, or risk
// logic lives here; this binary exists to prove the substrate runs, not to
// trade.
// =============================================================================

mod client;
mod config;
mod error;
mod factory;
mod market_data;
mod rate_limit;
mod secrets;
mod stream;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::RuntimeConfig;
use crate::factory::{ClientFactory, UserClientManager};
use crate::market_data::{KlineSubscriptionManager, KlineSubscriber, MarketDataCache};
use crate::secrets::{CredentialProvider, EnvCredentialProvider};
use crate::stream::{UserDataEvent, UserDataHandler, UserDataStream};

const CONFIG_PATH: &str = "runtime_config.json";

/// No-op kline subscriber for the demo: a real deployment would hand this
/// role to whatever WebSocket multiplexer actually opens `@kline_*` streams.
struct NoopKlineSubscriber;

impl KlineSubscriber for NoopKlineSubscriber {
    fn subscribe(&self, symbol: &str, timeframe: &str) -> anyhow::Result<()> {
        info!(symbol, timeframe, "kline subscription recorded (demo: no real socket opened)");
        Ok(())
    }

    fn unsubscribe(&self, symbol: &str, timeframe: &str) -> anyhow::Result<()> {
        info!(symbol, timeframe, "kline unsubscription recorded");
        Ok(())
    }
}

struct LoggingUserDataHandler {
    user_id: String,
}

impl UserDataHandler for LoggingUserDataHandler {
    fn handle(&self, event: UserDataEvent) {
        match event {
            UserDataEvent::AccountUpdate { positions } => {
                info!(user_id = %self.user_id, positions = positions.len(), "account update");
            }
            UserDataEvent::OrderUpdate { order } => {
                info!(
                    user_id = %self.user_id,
                    order_id = order.order_id,
                    status = %order.status,
                    "order update"
                );
            }
            UserDataEvent::MarginCall { symbol } => {
                warn!(user_id = %self.user_id, symbol, "margin call");
            }
            UserDataEvent::ListenKeyExpired => {
                warn!(user_id = %self.user_id, "listen key expired, stream will refresh");
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("derivatives client runtime starting up");

    let config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load runtime config, using defaults");
        RuntimeConfig::default()
    });

    if config.binance_mock_mode {
        info!("running in mock mode: no live exchange calls will be made");
    }

    let market_cache = Arc::new(MarketDataCache::new());
    let rate_limiter = Arc::new(rate_limit::RateLimiter::new(config.max_weight, config.max_requests));

    let credentials: Arc<dyn CredentialProvider> =
        Arc::new(EnvCredentialProvider::new("BINANCE_API_KEY", "BINANCE_API_SECRET", config.binance.testnet));

    let cleanup_interval = config.cleanup_interval();
    let factory = ClientFactory::new(config.clone(), credentials, market_cache, rate_limiter);

    {
        let factory = factory.clone();
        tokio::spawn(async move { factory.run_cleanup_loop(cleanup_interval).await });
    }

    let kline_manager = Arc::new(KlineSubscriptionManager::new(
        NoopKlineSubscriber,
        config.enabled_timeframes.clone(),
    ));
    for symbol in ["BTCUSDT", "ETHUSDT"] {
        if let Err(e) = kline_manager.subscribe_symbol(symbol) {
            error!(symbol, error = %e, "failed to subscribe kline streams");
        }
    }
    info!(stats = ?kline_manager.get_stats(), "kline subscriptions established");

    let demo_user = std::env::var("DEMO_USER_ID").unwrap_or_else(|_| "demo-user".to_string());
    let user_clients = UserClientManager::new(factory.clone(), config.dev_mode);
    let client = user_clients.get_futures_client(&demo_user).await?;

    let handler = Arc::new(LoggingUserDataHandler {
        user_id: demo_user.clone(),
    });
    let user_stream = UserDataStream::new(
        client,
        handler,
        config.keep_alive_interval(),
        config.listen_key_ttl(),
    );

    let stream_handle = {
        let user_stream = user_stream.clone();
        tokio::spawn(async move { user_stream.run().await })
    };

    info!("substrate running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    user_stream.shutdown();
    stream_handle.abort();
    factory.close();

    info!("derivatives client runtime stopped");
    Ok(())
}
