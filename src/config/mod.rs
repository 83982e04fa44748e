//! Configuration module for AutoTrainer.
//!
//! This module provides structured configuration loading from environment variables,
//! organized by concern: Provider, Training, Persistence, and Observability.

mod observability_config;
mod persistence_config;
mod provider_config;
mod training_config;

pub use observability_config::ObservabilityEnvConfig;
pub use persistence_config::PersistenceEnvConfig;
pub use provider_config::ProviderEnvConfig;
pub use training_config::{DEFAULT_CHATBOT_SYMBOLS, DEFAULT_TRAINING_SYMBOLS, TrainingEnvConfig};

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

/// Where market data comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Deterministic synthetic bars, no network
    Mock,
    /// HTTP market data provider
    Http,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Mode::Mock),
            "http" => Ok(Mode::Http),
            _ => anyhow::bail!("Invalid MODE: {}. Must be 'mock' or 'http'", s),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub provider: ProviderEnvConfig,
    pub training: TrainingEnvConfig,
    pub persistence: PersistenceEnvConfig,
    pub observability: ObservabilityEnvConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Mock,
            provider: ProviderEnvConfig::default(),
            training: TrainingEnvConfig::default(),
            persistence: PersistenceEnvConfig::default(),
            observability: ObservabilityEnvConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let mode_str = env::var("MODE").unwrap_or_else(|_| "mock".to_string());
        let mode = Mode::from_str(&mode_str)?;

        let provider = ProviderEnvConfig::from_env().context("Failed to load provider config")?;
        let training = TrainingEnvConfig::from_env().context("Failed to load training config")?;
        let persistence = PersistenceEnvConfig::from_env();
        let observability =
            ObservabilityEnvConfig::from_env().context("Failed to load observability config")?;

        if mode == Mode::Http && provider.api_key.is_empty() {
            anyhow::bail!("PROVIDER_API_KEY is required when MODE=http");
        }

        Ok(Self {
            mode,
            provider,
            training,
            persistence,
            observability,
        })
    }
}

/// Parses `key` or falls back to `default` when unset
pub(crate) fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .context(format!("Failed to parse {}", key)),
        Err(_) => Ok(default),
    }
}

/// Parses an optional value; unset or empty means `None`
pub(crate) fn parse_env_opt<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .context(format!("Failed to parse {}", key)),
        _ => Ok(None),
    }
}

pub(crate) fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<bool>()
        .unwrap_or(default)
}

/// Comma-separated list, trimmed and uppercased; unset means `default`
pub(crate) fn parse_symbols(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}
