//! Training configuration parsing from environment variables.
//!
//! Covers symbol universes, schedules, data windows, model hyper-parameters and the
//! deployment threshold.

use super::{parse_env, parse_env_opt, parse_symbols};
use anyhow::Result;
use chrono::{DateTime, Utc};

/// Default universe for the analytical model
pub const DEFAULT_TRAINING_SYMBOLS: [&str; 44] = [
    "AAPL", "MSFT", "GOOGL", "AMZN", "TSLA", "META", "NVDA", "BRK.B", "UNH", "JNJ", "JPM", "V",
    "PG", "HD", "MA", "BAC", "ABBV", "PFE", "KO", "AVGO", "PEP", "TMO", "COST", "DIS", "ABT",
    "ACN", "VZ", "ADBE", "DHR", "NEE", "BMY", "CMCSA", "CRM", "NFLX", "NKE", "LLY", "WMT", "XOM",
    "ORCL", "CVX", "AMD", "INTC", "IBM", "CSCO",
];

/// Default universe for the chatbot model
pub const DEFAULT_CHATBOT_SYMBOLS: [&str; 5] = ["AAPL", "MSFT", "GOOGL", "TSLA", "AMZN"];

/// Training environment configuration
#[derive(Debug, Clone)]
pub struct TrainingEnvConfig {
    // Universes
    pub training_symbols: Vec<String>,
    pub chatbot_symbols: Vec<String>,

    // Schedules (0 disables periodic retraining for that type)
    pub analytical_interval_hours: u64,
    pub chatbot_interval_hours: u64,

    // Data windows
    pub history_days: i64,
    pub held_out_days: i64,
    pub feature_window: usize,
    pub label_horizon: usize,
    pub validation_split: f64,
    pub min_training_samples: usize,
    pub min_eval_samples: usize,
    pub min_coverage: f64,

    // Deployment
    pub deploy_accuracy_threshold: f64,
    pub regression_tolerance: Option<f64>,

    // Model
    pub random_seed: u64,
    pub n_trees: u16,
    pub max_depth: u16,
    pub min_split: usize,

    pub stage_timeout_secs: u64,
    /// Fixed end of the collected range for reproducible runs; unset means now
    pub as_of: Option<DateTime<Utc>>,
}

impl Default for TrainingEnvConfig {
    fn default() -> Self {
        Self {
            training_symbols: DEFAULT_TRAINING_SYMBOLS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            chatbot_symbols: DEFAULT_CHATBOT_SYMBOLS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            analytical_interval_hours: 6,
            chatbot_interval_hours: 12,
            history_days: 365,
            held_out_days: 30,
            feature_window: 60,
            label_horizon: 5,
            validation_split: 0.2,
            min_training_samples: 100,
            min_eval_samples: 5,
            min_coverage: 0.5,
            deploy_accuracy_threshold: 0.75,
            regression_tolerance: None,
            random_seed: 42,
            n_trees: 100,
            max_depth: 10,
            min_split: 5,
            stage_timeout_secs: 1800,
            as_of: None,
        }
    }
}

impl TrainingEnvConfig {
    pub fn from_env() -> Result<Self> {
        let d = Self::default();

        let config = Self {
            training_symbols: parse_symbols("TRAINING_SYMBOLS", &DEFAULT_TRAINING_SYMBOLS),
            chatbot_symbols: parse_symbols("CHATBOT_SYMBOLS", &DEFAULT_CHATBOT_SYMBOLS),
            analytical_interval_hours: parse_env(
                "ANALYTICAL_INTERVAL_HOURS",
                d.analytical_interval_hours,
            )?,
            chatbot_interval_hours: parse_env("CHATBOT_INTERVAL_HOURS", d.chatbot_interval_hours)?,
            history_days: parse_env("HISTORY_DAYS", d.history_days)?,
            held_out_days: parse_env("HELD_OUT_DAYS", d.held_out_days)?,
            feature_window: parse_env("FEATURE_WINDOW", d.feature_window)?,
            label_horizon: parse_env("LABEL_HORIZON", d.label_horizon)?,
            validation_split: parse_env("VALIDATION_SPLIT", d.validation_split)?,
            min_training_samples: parse_env("MIN_TRAINING_SAMPLES", d.min_training_samples)?,
            min_eval_samples: parse_env("MIN_EVAL_SAMPLES", d.min_eval_samples)?,
            min_coverage: parse_env("MIN_COVERAGE", d.min_coverage)?,
            deploy_accuracy_threshold: parse_env(
                "DEPLOY_ACCURACY_THRESHOLD",
                d.deploy_accuracy_threshold,
            )?,
            regression_tolerance: parse_env_opt("REGRESSION_TOLERANCE")?,
            random_seed: parse_env("RANDOM_SEED", d.random_seed)?,
            n_trees: parse_env("N_TREES", d.n_trees)?,
            max_depth: parse_env("MAX_DEPTH", d.max_depth)?,
            min_split: parse_env("MIN_SPLIT", d.min_split)?,
            stage_timeout_secs: parse_env("STAGE_TIMEOUT_SECS", d.stage_timeout_secs)?,
            as_of: parse_env_opt("TRAINING_AS_OF")?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.validation_split) {
            anyhow::bail!("VALIDATION_SPLIT must be in [0, 1)");
        }
        if !(0.0..=1.0).contains(&self.min_coverage) {
            anyhow::bail!("MIN_COVERAGE must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.deploy_accuracy_threshold) {
            anyhow::bail!("DEPLOY_ACCURACY_THRESHOLD must be in [0, 1]");
        }
        if let Some(tolerance) = self.regression_tolerance
            && !(tolerance.is_finite() && tolerance >= 0.0)
        {
            anyhow::bail!("REGRESSION_TOLERANCE must be a non-negative number");
        }
        if self.feature_window < 2 || self.label_horizon == 0 {
            anyhow::bail!("FEATURE_WINDOW must be >= 2 and LABEL_HORIZON >= 1");
        }
        if self.held_out_days <= 0 || self.history_days <= self.held_out_days {
            anyhow::bail!("HISTORY_DAYS must exceed HELD_OUT_DAYS, which must be positive");
        }
        if self.n_trees == 0 || self.max_depth == 0 {
            anyhow::bail!("N_TREES and MAX_DEPTH must be positive");
        }
        Ok(())
    }
}
