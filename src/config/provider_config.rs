//! Market data provider configuration parsing from environment variables.

use super::parse_env;
use anyhow::Result;
use std::env;

/// Market data provider environment configuration
#[derive(Debug, Clone)]
pub struct ProviderEnvConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub calls_per_minute: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    /// Bar size requested from the provider (1440 = daily)
    pub bar_interval_minutes: i64,
    /// Seed for the synthetic provider used in mock mode
    pub synthetic_seed: u64,
}

impl Default for ProviderEnvConfig {
    fn default() -> Self {
        Self {
            base_url: "https://data.alpaca.markets".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            calls_per_minute: 5,
            timeout_secs: 30,
            max_retries: 3,
            backoff_base_ms: 500,
            bar_interval_minutes: 1440,
            synthetic_seed: 42,
        }
    }
}

impl ProviderEnvConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let calls_per_minute = parse_env("PROVIDER_CALLS_PER_MINUTE", defaults.calls_per_minute)?;
        let bar_interval_minutes =
            parse_env("BAR_INTERVAL_MINUTES", defaults.bar_interval_minutes)?;

        if calls_per_minute == 0 {
            anyhow::bail!("PROVIDER_CALLS_PER_MINUTE must be at least 1");
        }
        if bar_interval_minutes <= 0 {
            anyhow::bail!("BAR_INTERVAL_MINUTES must be positive");
        }

        Ok(Self {
            base_url: env::var("PROVIDER_BASE_URL").unwrap_or(defaults.base_url),
            api_key: env::var("PROVIDER_API_KEY").unwrap_or_default(),
            api_secret: env::var("PROVIDER_API_SECRET").unwrap_or_default(),
            calls_per_minute,
            timeout_secs: parse_env("PROVIDER_TIMEOUT_SECS", defaults.timeout_secs)?,
            max_retries: parse_env("PROVIDER_MAX_RETRIES", defaults.max_retries)?,
            backoff_base_ms: parse_env("PROVIDER_BACKOFF_BASE_MS", defaults.backoff_base_ms)?,
            bar_interval_minutes,
            synthetic_seed: parse_env("SYNTHETIC_SEED", defaults.synthetic_seed)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_config_defaults() {
        let config = ProviderEnvConfig::default();
        assert!(config.base_url.contains("alpaca.markets"));
        assert_eq!(config.calls_per_minute, 5);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.bar_interval_minutes, 1440);
    }
}
