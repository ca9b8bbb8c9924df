// =============================================================================
// Feed Configuration — deployment settings with atomic save
// =============================================================================
//
// Everything an operator can point the feed at lives here: endpoint base URL,
// API key, the instrument address and its display metadata, plus the
// transport retry policy.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields never
// breaks loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_base_url() -> String {
    "https://api.launchapex.io".to_string()
}

fn default_ticker() -> String {
    "APEX".to_string()
}

fn default_symbol_description() -> String {
    "APEX/USD".to_string()
}

fn default_exchange() -> String {
    "Raydium AMM V4".to_string()
}

fn default_pricescale() -> u64 {
    1_000_000_000
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_history_limit() -> u32 {
    300
}

// =============================================================================
// FeedConfig
// =============================================================================

/// Top-level configuration for the apexfeed pipeline.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    // --- Endpoint -----------------------------------------------------------

    /// Base URL of the event/history service (no trailing slash).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Static API key sent as the `x-api-key` header on every request.
    #[serde(default)]
    pub api_key: String,

    // --- Instrument ---------------------------------------------------------

    /// On-chain address of the instrument the feed follows.
    #[serde(default)]
    pub token_address: String,

    /// Display ticker for the resolved symbol.
    #[serde(default = "default_ticker")]
    pub ticker: String,

    /// Human-readable pair description, e.g. "APEX/USD".
    #[serde(default = "default_symbol_description")]
    pub symbol_description: String,

    /// Venue name shown by the charting widget.
    #[serde(default = "default_exchange")]
    pub exchange: String,

    /// Price scale for the charting widget (decimal places as a power of 10).
    #[serde(default = "default_pricescale")]
    pub pricescale: u64,

    // --- Transport ----------------------------------------------------------

    /// Delay between stream reconnect attempts, in milliseconds.
    /// Fixed delay; there is no exponential growth.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Timeout applied to filter and history requests, in seconds.
    /// The streaming GET itself is exempt (it is long-lived by design).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Maximum number of bars requested per history page.
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            token_address: String::new(),
            ticker: default_ticker(),
            symbol_description: default_symbol_description(),
            exchange: default_exchange(),
            pricescale: default_pricescale(),
            retry_delay_ms: default_retry_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            history_limit: default_history_limit(),
        }
    }
}

impl FeedConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read feed config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse feed config from {}", path.display()))?;

        info!(
            path = %path.display(),
            base_url = %config.base_url,
            token = %config.token_address,
            "feed config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise feed config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "feed config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = FeedConfig::default();
        assert_eq!(cfg.base_url, "https://api.launchapex.io");
        assert!(cfg.api_key.is_empty());
        assert!(cfg.token_address.is_empty());
        assert_eq!(cfg.ticker, "APEX");
        assert_eq!(cfg.exchange, "Raydium AMM V4");
        assert_eq!(cfg.pricescale, 1_000_000_000);
        assert_eq!(cfg.retry_delay_ms, 5_000);
        assert_eq!(cfg.request_timeout_secs, 10);
        assert_eq!(cfg.history_limit, 300);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: FeedConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.base_url, "https://api.launchapex.io");
        assert_eq!(cfg.retry_delay_ms, 5_000);
        assert_eq!(cfg.history_limit, 300);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "base_url": "http://localhost:9999", "token_address": "So1abc" }"#;
        let cfg: FeedConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.base_url, "http://localhost:9999");
        assert_eq!(cfg.token_address, "So1abc");
        assert_eq!(cfg.ticker, "APEX");
        assert_eq!(cfg.retry_delay_ms, 5_000);
    }

    #[test]
    fn roundtrip_serialisation() {
        let mut cfg = FeedConfig::default();
        cfg.token_address = "So1abc".into();
        cfg.retry_delay_ms = 250;

        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: FeedConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.token_address, cfg2.token_address);
        assert_eq!(cfg.retry_delay_ms, cfg2.retry_delay_ms);
        assert_eq!(cfg.base_url, cfg2.base_url);
    }
}
