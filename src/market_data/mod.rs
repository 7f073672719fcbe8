pub mod cache;
pub mod kline_subscriptions;

pub use cache::{CacheStats, MarketDataCache};
pub use kline_subscriptions::{KlineSubscriber, KlineSubscriptionManager, SubscriptionStats};
