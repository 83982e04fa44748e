use crate::domain::training::types::{ModelType, TrainingStage};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that terminate (or refuse to start) a training run
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("Data unavailable: {reason}")]
    DataUnavailable { reason: String },

    #[error("Rate limited by market data provider after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("Insufficient data: {available} samples < minimum {required}")]
    InsufficientData { available: usize, required: usize },

    #[error("Evaluation incomplete: {reason}")]
    EvaluationIncomplete { reason: String },

    #[error("Training already running for {model_type} model (run {run_id})")]
    AlreadyRunning { model_type: ModelType, run_id: String },

    #[error("Stage {stage} exceeded maximum duration of {limit_secs}s")]
    Timeout { stage: TrainingStage, limit_secs: u64 },

    #[error("Training cancelled")]
    Cancelled,

    #[error("Invalid stage transition: {from} -> {to}")]
    InvalidTransition {
        from: TrainingStage,
        to: TrainingStage,
    },

    #[error("Model failure: {reason}")]
    Model { reason: String },

    #[error("Persistence failure: {0:#}")]
    Persistence(anyhow::Error),
}

impl TrainingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TrainingError::DataUnavailable { .. } => ErrorKind::DataUnavailable,
            TrainingError::RateLimited { .. } => ErrorKind::RateLimited,
            TrainingError::InsufficientData { .. } => ErrorKind::InsufficientData,
            TrainingError::EvaluationIncomplete { .. } => ErrorKind::EvaluationIncomplete,
            TrainingError::AlreadyRunning { .. } => ErrorKind::AlreadyRunning,
            TrainingError::Timeout { .. } => ErrorKind::Timeout,
            TrainingError::Cancelled => ErrorKind::Cancelled,
            TrainingError::InvalidTransition { .. } | TrainingError::Model { .. } => {
                ErrorKind::Internal
            }
            TrainingError::Persistence(_) => ErrorKind::Persistence,
        }
    }

    pub fn model(reason: impl fmt::Display) -> Self {
        TrainingError::Model {
            reason: reason.to_string(),
        }
    }
}

/// Stable, serializable error classification surfaced in run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DataUnavailable,
    RateLimited,
    InsufficientData,
    EvaluationIncomplete,
    AlreadyRunning,
    Timeout,
    Cancelled,
    Persistence,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::DataUnavailable => "data_unavailable",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::InsufficientData => "insufficient_data",
            ErrorKind::EvaluationIncomplete => "evaluation_incomplete",
            ErrorKind::AlreadyRunning => "already_running",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// Errors returned by a market data provider for a single request
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("Provider throttled the request (retry after {retry_after_secs:?}s)")]
    Throttled { retry_after_secs: Option<u64> },

    #[error("No data available for {symbol}")]
    NotFound { symbol: String },

    #[error("Transport error: {reason}")]
    Transport { reason: String },

    #[error("Malformed provider response: {reason}")]
    Malformed { reason: String },

    #[error("Provider request timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

/// Why a single symbol was excluded from a collection batch
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollectionFailure {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Throttling persisted after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("No valid observations ({dropped} rows dropped by validation)")]
    NoValidRows { dropped: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data_formatting() {
        let error = TrainingError::InsufficientData {
            available: 42,
            required: 100,
        };

        let msg = error.to_string();
        assert!(msg.contains("42"));
        assert!(msg.contains("100"));
        assert_eq!(error.kind(), ErrorKind::InsufficientData);
    }

    #[test]
    fn test_timeout_mentions_stage() {
        let error = TrainingError::Timeout {
            stage: TrainingStage::Training,
            limit_secs: 1800,
        };

        assert!(error.to_string().contains("training"));
        assert_eq!(error.kind().to_string(), "timeout");
    }

    #[test]
    fn test_provider_error_converts_into_collection_failure() {
        let failure: CollectionFailure = ProviderError::NotFound {
            symbol: "BRK.B".to_string(),
        }
        .into();

        assert!(failure.to_string().contains("BRK.B"));
    }
}
