use crate::domain::training::types::ModelType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hyper-parameters and fit statistics recorded with every artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    pub algorithm: String,
    pub seed: u64,
    pub n_trees: u16,
    pub max_depth: u16,
    pub min_samples_split: usize,
    pub window_size: usize,
    pub label_horizon: usize,
    pub validation_split: f64,
    pub training_samples: usize,
    pub validation_samples: usize,
    pub validation_accuracy: f64,
    pub feature_count: usize,
}

/// Support-weighted classification scores over held-out rows
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
}

impl ClassificationMetrics {
    /// Every score NaN: not evaluated yet
    pub fn unscored() -> Self {
        Self {
            accuracy: f64::NAN,
            precision: f64::NAN,
            recall: f64::NAN,
            f1_score: f64::NAN,
        }
    }
}

/// A trained model version. Immutable once produced; the scores are held-out
/// evaluation results and stay NaN until the evaluator has scored the candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model_type: ModelType,
    pub version: String,
    pub trained_at: DateTime<Utc>,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    /// Wall time of the forest fit
    pub training_time_secs: f64,
    pub parameters: ModelParameters,
    pub training_run_id: String,
}

impl ModelArtifact {
    pub fn new(
        model_type: ModelType,
        trained_at: DateTime<Utc>,
        parameters: ModelParameters,
        training_run_id: impl Into<String>,
    ) -> Self {
        let training_run_id = training_run_id.into();
        let unscored = ClassificationMetrics::unscored();
        Self {
            model_type,
            version: Self::version_for(trained_at, &training_run_id),
            trained_at,
            accuracy: unscored.accuracy,
            precision: unscored.precision,
            recall: unscored.recall,
            f1_score: unscored.f1_score,
            training_time_secs: 0.0,
            parameters,
            training_run_id,
        }
    }

    /// `v<unix millis>-<run id prefix>`, unique even for runs finishing together
    pub fn version_for(trained_at: DateTime<Utc>, training_run_id: &str) -> String {
        let run = training_run_id.get(..8).unwrap_or(training_run_id);
        format!("v{}-{}", trained_at.timestamp_millis(), run)
    }

    /// Copy of this artifact carrying the evaluated scores
    pub fn with_metrics(&self, metrics: ClassificationMetrics) -> Self {
        Self {
            accuracy: metrics.accuracy,
            precision: metrics.precision,
            recall: metrics.recall,
            f1_score: metrics.f1_score,
            ..self.clone()
        }
    }
}

/// Append-only history entry, one per completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub model_type: ModelType,
    pub timestamp: DateTime<Utc>,
    pub accuracy: f64,
    pub improvement_delta: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub training_time_secs: f64,
    /// Labeled rows the candidate was fitted and validated on
    pub data_points: usize,
}

impl PerformanceRecord {
    /// Builds the next record, measuring improvement against `previous`
    pub fn next(
        model_type: ModelType,
        timestamp: DateTime<Utc>,
        accuracy: f64,
        previous: Option<&PerformanceRecord>,
    ) -> Self {
        let improvement_delta = previous
            .map(|p| accuracy - p.accuracy)
            .filter(|d| d.is_finite())
            .unwrap_or(0.0);
        Self {
            model_type,
            timestamp,
            accuracy,
            improvement_delta,
            precision: f64::NAN,
            recall: f64::NAN,
            f1_score: f64::NAN,
            training_time_secs: 0.0,
            data_points: 0,
        }
    }

    /// Record for an evaluated candidate
    pub fn for_artifact(
        artifact: &ModelArtifact,
        timestamp: DateTime<Utc>,
        previous: Option<&PerformanceRecord>,
    ) -> Self {
        Self {
            precision: artifact.precision,
            recall: artifact.recall,
            f1_score: artifact.f1_score,
            training_time_secs: artifact.training_time_secs,
            data_points: artifact.parameters.training_samples
                + artifact.parameters.validation_samples,
            ..Self::next(artifact.model_type, timestamp, artifact.accuracy, previous)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub version: String,
    pub trained_at: DateTime<Utc>,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub training_time_secs: f64,
    pub training_run_id: String,
}

impl From<&ModelArtifact> for ModelSummary {
    fn from(a: &ModelArtifact) -> Self {
        Self {
            version: a.version.clone(),
            trained_at: a.trained_at,
            accuracy: a.accuracy,
            precision: a.precision,
            recall: a.recall,
            f1_score: a.f1_score,
            training_time_secs: a.training_time_secs,
            training_run_id: a.training_run_id.clone(),
        }
    }
}

/// Per-type model overview exposed to dashboard consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStatus {
    pub model_type: ModelType,
    pub active: Option<ModelSummary>,
    pub history: Vec<PerformanceRecord>,
    pub training_count: usize,
    pub best_accuracy: Option<f64>,
    pub last_trained: Option<DateTime<Utc>>,
}

impl ModelStatus {
    pub fn from_history(
        model_type: ModelType,
        active: Option<&ModelArtifact>,
        history: Vec<PerformanceRecord>,
    ) -> Self {
        let best_accuracy = history
            .iter()
            .map(|r| r.accuracy)
            .filter(|a| a.is_finite())
            .fold(None, |best: Option<f64>, a| {
                Some(best.map_or(a, |b| b.max(a)))
            });
        let last_trained = history.iter().map(|r| r.timestamp).max();

        Self {
            model_type,
            active: active.map(ModelSummary::from),
            training_count: history.len(),
            best_accuracy,
            last_trained,
            history,
        }
    }
}
