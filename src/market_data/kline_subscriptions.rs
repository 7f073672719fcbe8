// =============================================================================
// Kline Subscription Manager — desired-state table over (symbol x timeframe)
// =============================================================================
//
// Owns what the rest of the system *wants* subscribed and drives a pluggable
// subscriber (the kline WebSocket client) to match it. Stream names follow
// the exchange's `{lowercase_symbol}@kline_{interval}` convention.
// =============================================================================

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tracing::{error, warn};

use crate::types::SubscriptionMode;

/// Implemented by whatever actually opens/multiplexes kline WebSocket
/// streams. Kept separate from the manager so tests can substitute a no-op
/// recorder instead of a real network client.
pub trait KlineSubscriber: Send + Sync {
    fn subscribe(&self, symbol: &str, timeframe: &str) -> anyhow::Result<()>;
    fn unsubscribe(&self, symbol: &str, timeframe: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionStats {
    pub symbols: usize,
    pub total_subscriptions: usize,
    pub subscription_failures: u64,
}

struct Desired {
    table: HashMap<String, HashSet<String>>,
    failures: u64,
}

pub struct KlineSubscriptionManager<S: KlineSubscriber> {
    subscriber: S,
    enabled_timeframes: Vec<String>,
    desired: RwLock<Desired>,
}

fn mode_timeframes(mode: SubscriptionMode) -> &'static [&'static str] {
    match mode {
        SubscriptionMode::Scalp => &["1m", "5m", "15m", "1h"],
        SubscriptionMode::Swing => &["1m", "15m", "1h"],
        SubscriptionMode::Position => &["1m", "15m", "1h", "4h"],
    }
}

impl<S: KlineSubscriber> KlineSubscriptionManager<S> {
    pub fn new(subscriber: S, enabled_timeframes: Vec<String>) -> Self {
        Self {
            subscriber,
            enabled_timeframes,
            desired: RwLock::new(Desired {
                table: HashMap::new(),
                failures: 0,
            }),
        }
    }

    fn normalize(symbol: &str) -> String {
        symbol.to_uppercase()
    }

    pub fn subscribe_symbol(&self, symbol: &str) -> anyhow::Result<()> {
        let timeframes = self.enabled_timeframes.clone();
        self.subscribe_timeframes(symbol, &timeframes)
    }

    pub fn subscribe_symbol_with_mode(&self, symbol: &str, mode: SubscriptionMode) -> anyhow::Result<()> {
        let timeframes: Vec<String> = mode_timeframes(mode).iter().map(|s| s.to_string()).collect();
        self.subscribe_timeframes(symbol, &timeframes)
    }

    fn subscribe_timeframes(&self, symbol: &str, timeframes: &[String]) -> anyhow::Result<()> {
        let symbol = Self::normalize(symbol);
        let mut last_err: Option<anyhow::Error> = None;

        for tf in timeframes {
            let already = {
                let desired = self.desired.read();
                desired
                    .table
                    .get(&symbol)
                    .map(|set| set.contains(tf))
                    .unwrap_or(false)
            };
            if already {
                continue;
            }
            match self.subscriber.subscribe(&symbol, tf) {
                Ok(()) => {
                    self.desired
                        .write()
                        .table
                        .entry(symbol.clone())
                        .or_default()
                        .insert(tf.clone());
                }
                Err(e) => {
                    error!(symbol = %symbol, timeframe = %tf, error = %e, "kline subscribe failed");
                    self.desired.write().failures += 1;
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn subscribe_timeframe(&self, symbol: &str, timeframe: &str) -> anyhow::Result<()> {
        self.subscribe_timeframes(symbol, std::slice::from_ref(&timeframe.to_string()))
    }

    pub fn unsubscribe_timeframe(&self, symbol: &str, timeframe: &str) -> anyhow::Result<()> {
        let symbol = Self::normalize(symbol);
        self.subscriber.unsubscribe(&symbol, timeframe)?;
        if let Some(set) = self.desired.write().table.get_mut(&symbol) {
            set.remove(timeframe);
        }
        Ok(())
    }

    pub fn unsubscribe_symbol(&self, symbol: &str) -> anyhow::Result<()> {
        let symbol = Self::normalize(symbol);
        let timeframes: Vec<String> = self
            .desired
            .read()
            .table
            .get(&symbol)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        let mut last_err = None;
        for tf in &timeframes {
            if let Err(e) = self.subscriber.unsubscribe(&symbol, tf) {
                warn!(symbol = %symbol, timeframe = %tf, error = %e, "kline unsubscribe failed");
                last_err = Some(e);
            }
        }
        self.desired.write().table.remove(&symbol);
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn get_subscribed_symbols(&self) -> Vec<String> {
        self.desired.read().table.keys().cloned().collect()
    }

    pub fn get_symbol_timeframes(&self, symbol: &str) -> Vec<String> {
        let symbol = Self::normalize(symbol);
        self.desired
            .read()
            .table
            .get(&symbol)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, symbol: &str, timeframe: &str) -> bool {
        let symbol = Self::normalize(symbol);
        self.desired
            .read()
            .table
            .get(&symbol)
            .map(|set| set.contains(timeframe))
            .unwrap_or(false)
    }

    /// Build the `{lowercase_symbol}@kline_{interval}` stream names for a
    /// connection-setup call, for each currently-desired (symbol, timeframe).
    pub fn build_stream_list(&self, symbols: &[String]) -> Vec<String> {
        let desired = self.desired.read();
        let mut streams = Vec::new();
        for symbol in symbols {
            let key = Self::normalize(symbol);
            if let Some(timeframes) = desired.table.get(&key) {
                for tf in timeframes {
                    streams.push(format!("{}@kline_{}", key.to_lowercase(), tf));
                }
            }
        }
        streams
    }

    /// Idempotently re-issue subscribe calls for every desired (symbol,
    /// timeframe) pair, e.g. after a reconnect wiped the underlying socket's
    /// subscription state.
    pub fn sync_subscriptions(&self) -> anyhow::Result<()> {
        let snapshot: Vec<(String, Vec<String>)> = {
            let desired = self.desired.read();
            desired
                .table
                .iter()
                .map(|(s, tfs)| (s.clone(), tfs.iter().cloned().collect()))
                .collect()
        };

        let mut last_err = None;
        for (symbol, timeframes) in snapshot {
            for tf in timeframes {
                if let Err(e) = self.subscriber.subscribe(&symbol, &tf) {
                    error!(symbol = %symbol, timeframe = %tf, error = %e, "resync subscribe failed");
                    self.desired.write().failures += 1;
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn clear(&self) {
        let mut desired = self.desired.write();
        desired.table.clear();
    }

    pub fn get_stats(&self) -> SubscriptionStats {
        let desired = self.desired.read();
        SubscriptionStats {
            symbols: desired.table.len(),
            total_subscriptions: desired.table.values().map(|s| s.len()).sum(),
            subscription_failures: desired.failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSubscriber {
        calls: Mutex<Vec<(String, String)>>,
        fail_next: AtomicUsize,
    }

    impl KlineSubscriber for RecordingSubscriber {
        fn subscribe(&self, symbol: &str, timeframe: &str) -> anyhow::Result<()> {
            if self.fail_next.load(Ordering::Relaxed) > 0 {
                self.fail_next.fetch_sub(1, Ordering::Relaxed);
                anyhow::bail!("simulated subscribe failure");
            }
            self.calls
                .lock()
                .unwrap()
                .push((symbol.to_string(), timeframe.to_string()));
            Ok(())
        }

        fn unsubscribe(&self, _symbol: &str, _timeframe: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn default_timeframes() -> Vec<String> {
        vec!["1m".into(), "5m".into(), "15m".into(), "1h".into(), "4h".into()]
    }

    #[test]
    fn resubscribing_same_symbol_is_idempotent() {
        let manager = KlineSubscriptionManager::new(RecordingSubscriber::default(), default_timeframes());
        manager.subscribe_symbol("btcusdt").unwrap();
        let calls_after_first = manager.subscriber.calls.lock().unwrap().len();
        manager.subscribe_symbol("BTCUSDT").unwrap();
        let calls_after_second = manager.subscriber.calls.lock().unwrap().len();
        assert_eq!(calls_after_first, calls_after_second);
    }

    #[test]
    fn mode_preset_scalp_subscribes_expected_timeframes() {
        let manager = KlineSubscriptionManager::new(RecordingSubscriber::default(), default_timeframes());
        manager
            .subscribe_symbol_with_mode("BTCUSDT", SubscriptionMode::Scalp)
            .unwrap();
        let mut tfs = manager.get_symbol_timeframes("BTCUSDT");
        tfs.sort();
        assert_eq!(tfs, vec!["15m", "1h", "1m", "5m"]);
    }

    #[test]
    fn sync_subscriptions_reissues_desired_state() {
        let manager = KlineSubscriptionManager::new(RecordingSubscriber::default(), default_timeframes());
        manager
            .subscribe_symbol_with_mode("BTCUSDT", SubscriptionMode::Scalp)
            .unwrap();
        manager.subscriber.calls.lock().unwrap().clear();
        manager.sync_subscriptions().unwrap();
        assert_eq!(manager.subscriber.calls.lock().unwrap().len(), 4);
    }

    #[test]
    fn build_stream_list_uses_lowercase_symbol_kline_interval_naming() {
        let manager = KlineSubscriptionManager::new(RecordingSubscriber::default(), default_timeframes());
        manager.subscribe_timeframe("BTCUSDT", "1m").unwrap();
        let streams = manager.build_stream_list(&["BTCUSDT".to_string()]);
        assert_eq!(streams, vec!["btcusdt@kline_1m".to_string()]);
    }

    #[test]
    fn partial_failure_reports_last_error_but_applies_successes() {
        let sub = RecordingSubscriber::default();
        sub.fail_next.store(1, Ordering::Relaxed);
        let manager = KlineSubscriptionManager::new(sub, vec!["1m".into(), "5m".into()]);
        let result = manager.subscribe_symbol("BTCUSDT");
        assert!(result.is_err());
        // The 5m attempt (second) should have succeeded even though 1m failed first.
        assert!(manager.is_subscribed("BTCUSDT", "5m"));
        assert_eq!(manager.get_stats().subscription_failures, 1);
    }
}
