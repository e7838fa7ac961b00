use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::store::DeletePolicy;

/// Binance refuses any recvWindow above 60000 ms.
pub const MAX_RECV_WINDOW_MS: u64 = 59_000;
pub const MIN_RECV_WINDOW_MS: u64 = 10_000;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub binance: BinanceConfig,
    #[serde(default)]
    pub time_sync: TimeSyncConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceConfig {
    pub rest_base_url: String,
    pub testnet_rest_base_url: String,
    #[serde(default = "default_recv_window")]
    pub recv_window: u64,
    pub kline_interval: String,
    #[serde(default = "default_http_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(skip)]
    pub api_key: String,
    #[serde(skip)]
    pub api_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeSyncConfig {
    /// How far behind the last known server time a signed timestamp is placed.
    pub safety_margin_ms: u64,
    /// Lower bound on timestamp age when the offset has gone stale.
    pub max_staleness_ms: u64,
    /// Margin behind the local clock used before the first successful sync.
    pub fallback_margin_ms: u64,
    pub min_sync_interval_ms: u64,
    pub refresh_interval_secs: u64,
    pub request_timeout_ms: u64,
    pub hysteresis_ms: u64,
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            safety_margin_ms: 1_000,
            max_staleness_ms: 20_000,
            fallback_margin_ms: 1_000,
            min_sync_interval_ms: 15_000,
            refresh_interval_secs: 10,
            request_timeout_ms: 5_000,
            hysteresis_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub poll_interval_secs: u64,
    pub candle_limit: usize,
    pub persist_retries: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            candle_limit: 200,
            persist_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: String,
    pub delete_policy: DeletePolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "data/botdesk.sqlite".to_string(),
            delete_policy: DeletePolicy::Reject,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
}

fn default_recv_window() -> u64 {
    30_000
}

fn default_http_timeout_ms() -> u64 {
    10_000
}

/// Parse a Binance kline interval string (e.g. "1s", "1m", "1h", "1d", "1w", "1M") into milliseconds.
pub fn parse_interval_ms(s: &str) -> Result<u64> {
    if s.len() < 2 {
        bail!("invalid interval '{}': expected format like '1m'", s);
    }

    let (num_str, suffix) = s.split_at(s.len() - 1);
    let n: u64 = num_str.parse().with_context(|| {
        format!(
            "invalid interval '{}': quantity must be a positive integer",
            s
        )
    })?;
    if n == 0 {
        bail!("invalid interval '{}': quantity must be > 0", s);
    }

    let unit_ms = match suffix {
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        "w" => 7 * 86_400_000,
        "M" => 30 * 86_400_000,
        _ => bail!(
            "invalid interval '{}': unsupported suffix '{}', expected one of s/m/h/d/w/M",
            s,
            suffix
        ),
    };

    n.checked_mul(unit_ms)
        .with_context(|| format!("invalid interval '{}': value is too large", s))
}

/// Clamp a configured recvWindow into the range Binance accepts while
/// staying generous enough for loosely synchronised clocks.
pub fn effective_recv_window(configured: u64) -> u64 {
    configured.clamp(MIN_RECV_WINDOW_MS, MAX_RECV_WINDOW_MS)
}

impl BinanceConfig {
    pub fn kline_interval_ms(&self) -> Result<u64> {
        parse_interval_ms(&self.kline_interval)
    }

    pub fn base_url(&self, testnet: bool) -> &str {
        if testnet {
            &self.testnet_rest_base_url
        } else {
            &self.rest_base_url
        }
    }

    /// Whether the process-wide fallback credentials from the environment are
    /// complete.
    pub fn has_fallback_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }
}

impl Config {
    pub fn load_from_path(config_path: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;

        let mut config = Self::from_toml_str(&config_str)
            .with_context(|| format!("failed to parse {}", config_path.display()))?;

        // Per-bot credentials take precedence; these are only the fallback.
        config.binance.api_key = std::env::var("BINANCE_API_KEY").unwrap_or_default();
        config.binance.api_secret = std::env::var("BINANCE_API_SECRET").unwrap_or_default();

        Ok(config)
    }

    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str).context("invalid config toml")?;
        config
            .binance
            .kline_interval_ms()
            .context("binance.kline_interval is invalid")?;
        if config.time_sync.refresh_interval_secs == 0 {
            bail!("time_sync.refresh_interval_secs must be > 0");
        }
        if config.executor.poll_interval_secs == 0 {
            bail!("executor.poll_interval_secs must be > 0");
        }
        Ok(config)
    }
}
