use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

use super::constants;

/// Top-level portal configuration.
///
/// Loaded once at process start and passed by reference into every
/// component constructor; nothing reads configuration globally.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PortalConfig {
    #[serde(default)]
    pub rentcast: RentCastConfig,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub quota: QuotaSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RentCastConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub enabled: bool,
}

impl Default for RentCastConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: constants::RENTCAST_API_BASE.to_string(),
            timeout_secs: constants::DEFAULT_REQUEST_TIMEOUT_SECS,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Path of the shared SQLite database backing the durable cache and
    /// the usage ledger.
    pub database_path: String,
    pub max_memory_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            database_path: "portal_cache.db".to_string(),
            max_memory_entries: constants::DEFAULT_MAX_MEMORY_ENTRIES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub window_secs: u64,
    pub default_per_window: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window_secs: constants::RATE_LIMIT_WINDOW_SECS,
            default_per_window: constants::DEFAULT_RATE_LIMIT_PER_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Connection-refused/reset failures back off from a larger base.
    pub connection_base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: constants::MAX_RETRIES,
            base_delay_ms: constants::BASE_RETRY_DELAY_MS,
            max_delay_ms: constants::MAX_RETRY_DELAY_MS,
            connection_base_delay_ms: constants::CONNECTION_RETRY_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaSettings {
    /// Baseline plan applied to subjects without a `quota_plan` row.
    pub default_limit: u32,
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            default_limit: constants::BASELINE_PLAN_LIMIT,
        }
    }
}

impl PortalConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let config: PortalConfig =
            serde_json::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Check required fields before any component is constructed.
    pub fn validate(&self) -> Result<()> {
        if self.rentcast.api_key.trim().is_empty() {
            bail!("Missing required configuration: rentcast.api_key");
        }
        if self.rentcast.timeout_secs == 0 {
            bail!("rentcast.timeout_secs must be greater than zero");
        }
        if self.rate_limit.window_secs == 0 {
            bail!("rate_limit.window_secs must be greater than zero");
        }
        Ok(())
    }
}
