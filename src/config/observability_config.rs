//! Observability configuration parsing from environment variables.
//!
//! This module handles loading the push-based metrics reporter settings.

use super::{parse_bool, parse_env};
use anyhow::Result;

/// Observability environment configuration
#[derive(Debug, Clone)]
pub struct ObservabilityEnvConfig {
    pub enabled: bool,
    /// Seconds between two METRICS_JSON lines
    pub interval_secs: u64,
}

impl Default for ObservabilityEnvConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
        }
    }
}

impl ObservabilityEnvConfig {
    pub fn from_env() -> Result<Self> {
        let interval_secs = parse_env("OBSERVABILITY_INTERVAL", 60u64)?;
        Ok(Self {
            enabled: parse_bool("OBSERVABILITY_ENABLED", true),
            interval_secs: interval_secs.max(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observability_config_defaults() {
        let config = ObservabilityEnvConfig::default();
        assert!(config.enabled);
        assert_eq!(config.interval_secs, 60);
    }
}
