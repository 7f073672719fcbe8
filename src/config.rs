// =============================================================================
// Runtime Configuration — closed set of substrate tunables, atomic save
// =============================================================================
//
// Every field carries a serde default so a config file from an older build
// still deserialises cleanly. Persistence uses an atomic tmp + rename write
// to avoid corruption on crash mid-write.
//
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_binance_base_url() -> String {
    "https://fapi.binance.com".to_string()
}

fn default_futures_base_url() -> String {
    "https://fapi.binance.com".to_string()
}

fn default_false() -> bool {
    false
}

fn default_client_ttl_secs() -> u64 {
    30 * 60
}

fn default_cleanup_interval_secs() -> u64 {
    5 * 60
}

fn default_max_weight() -> u32 {
    2400
}

fn default_max_requests() -> u32 {
    1200
}

fn default_keep_alive_interval_secs() -> u64 {
    15 * 60
}

fn default_listen_key_ttl_secs() -> u64 {
    60 * 60
}

fn default_enabled_timeframes() -> Vec<String> {
    vec!["1m", "5m", "15m", "1h", "4h"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Exchange connection settings for one market segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    #[serde(default = "default_binance_base_url")]
    pub base_url: String,
    #[serde(default = "default_false")]
    pub testnet: bool,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            base_url: default_binance_base_url(),
            testnet: false,
        }
    }
}

/// Top-level configuration for the exchange-access substrate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub binance: SegmentConfig,

    #[serde(default = "default_false")]
    pub binance_mock_mode: bool,

    /// When set, a per-user client lookup that fails on missing credentials
    /// falls back to a mock client instead of erroring out, so local/dev
    /// flows never block on secrets the developer hasn't configured yet.
    #[serde(default = "default_false")]
    pub dev_mode: bool,

    #[serde(default = "default_futures_segment")]
    pub futures: SegmentConfig,

    #[serde(default = "default_client_ttl_secs")]
    pub client_ttl_secs: u64,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    #[serde(default = "default_max_weight")]
    pub max_weight: u32,

    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    #[serde(default = "default_keep_alive_interval_secs")]
    pub keep_alive_interval_secs: u64,

    #[serde(default = "default_listen_key_ttl_secs")]
    pub listen_key_ttl_secs: u64,

    #[serde(default = "default_enabled_timeframes")]
    pub enabled_timeframes: Vec<String>,
}

fn default_futures_segment() -> SegmentConfig {
    SegmentConfig {
        base_url: default_futures_base_url(),
        testnet: false,
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binance: SegmentConfig::default(),
            binance_mock_mode: false,
            dev_mode: false,
            futures: default_futures_segment(),
            client_ttl_secs: default_client_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            max_weight: default_max_weight(),
            max_requests: default_max_requests(),
            keep_alive_interval_secs: default_keep_alive_interval_secs(),
            listen_key_ttl_secs: default_listen_key_ttl_secs(),
            enabled_timeframes: default_enabled_timeframes(),
        }
    }
}

impl RuntimeConfig {
    pub fn client_ttl(&self) -> Duration {
        Duration::from_secs(self.client_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval_secs)
    }

    pub fn listen_key_ttl(&self) -> Duration {
        Duration::from_secs(self.listen_key_ttl_secs)
    }

    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(path = %path.display(), "runtime config loaded");
        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.max_weight, 2400);
        assert_eq!(cfg.max_requests, 1200);
        assert_eq!(cfg.client_ttl_secs, 1800);
        assert_eq!(cfg.cleanup_interval_secs, 300);
        assert_eq!(cfg.keep_alive_interval_secs, 900);
        assert_eq!(cfg.listen_key_ttl_secs, 3600);
        assert_eq!(cfg.enabled_timeframes, vec!["1m", "5m", "15m", "1h", "4h"]);
        assert!(!cfg.binance.testnet);
        assert!(!cfg.binance_mock_mode);
        assert!(!cfg.dev_mode);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.max_weight, 2400);
        assert_eq!(cfg.binance.base_url, "https://fapi.binance.com");
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "binance": { "testnet": true }, "max_weight": 1000 }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert!(cfg.binance.testnet);
        assert_eq!(cfg.max_weight, 1000);
        assert_eq!(cfg.max_requests, 1200);
        assert_eq!(cfg.client_ttl_secs, 1800);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.max_weight, cfg2.max_weight);
        assert_eq!(cfg.enabled_timeframes, cfg2.enabled_timeframes);
    }
}
