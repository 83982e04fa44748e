use crate::application::training::cancel::CancelToken;
use crate::domain::errors::TrainingError;
use crate::domain::ml::feature_registry::{FEATURE_COUNT, FeatureVector};
use crate::domain::ml::label::Direction;
use crate::domain::ml::model::{ModelArtifact, ModelParameters};
use crate::domain::training::types::ModelType;
use chrono::{DateTime, Utc};
use smartcore::ensemble::random_forest_classifier::{
    RandomForestClassifier, RandomForestClassifierParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

pub const ALGORITHM: &str = "random_forest_classifier";

#[derive(Debug, Clone)]
pub struct TrainerSettings {
    pub min_samples: usize,
    pub validation_split: f64,
    pub seed: u64,
    pub n_trees: u16,
    pub max_depth: u16,
    pub min_samples_split: usize,
    pub window_size: usize,
    pub label_horizon: usize,
}

impl Default for TrainerSettings {
    fn default() -> Self {
        Self {
            min_samples: 100,
            validation_split: 0.2,
            seed: 42,
            n_trees: 100,
            max_depth: 10,
            min_samples_split: 5,
            window_size: 60,
            label_horizon: 5,
        }
    }
}

type Forest = RandomForestClassifier<f64, i32, DenseMatrix<f64>, Vec<i32>>;

/// Fitted five-class direction model
pub struct DirectionClassifier {
    forest: Forest,
}

impl fmt::Debug for DirectionClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectionClassifier").finish_non_exhaustive()
    }
}

impl DirectionClassifier {
    pub fn fit(
        rows: &[Vec<f64>],
        labels: &[Direction],
        settings: &TrainerSettings,
    ) -> Result<Self, TrainingError> {
        let x = DenseMatrix::from_2d_vec(&rows.to_vec()).map_err(TrainingError::model)?;
        let y: Vec<i32> = labels.iter().map(Direction::class_id).collect();

        let params = RandomForestClassifierParameters::default()
            .with_n_trees(settings.n_trees)
            .with_max_depth(settings.max_depth)
            .with_min_samples_split(settings.min_samples_split)
            .with_seed(settings.seed);

        let forest = RandomForestClassifier::fit(&x, &y, params).map_err(TrainingError::model)?;
        Ok(Self { forest })
    }

    pub fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<Direction>, TrainingError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let x = DenseMatrix::from_2d_vec(&rows.to_vec()).map_err(TrainingError::model)?;
        let predictions = self.forest.predict(&x).map_err(TrainingError::model)?;

        predictions
            .into_iter()
            .map(|id| {
                Direction::from_class_id(id)
                    .ok_or_else(|| TrainingError::model(format!("unknown class id {}", id)))
            })
            .collect()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, TrainingError> {
        serde_json::to_vec(&self.forest).map_err(TrainingError::model)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TrainingError> {
        let forest: Forest = serde_json::from_slice(bytes).map_err(TrainingError::model)?;
        Ok(Self { forest })
    }
}

/// Fraction of predictions equal to the realized labels (NaN when empty)
pub fn directional_accuracy(predicted: &[Direction], actual: &[Direction]) -> f64 {
    if predicted.is_empty() || predicted.len() != actual.len() {
        return f64::NAN;
    }
    let correct = predicted.iter().zip(actual).filter(|(p, a)| p == a).count();
    correct as f64 / predicted.len() as f64
}

/// Candidate produced by a training run
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub artifact: ModelArtifact,
    pub model: Arc<DirectionClassifier>,
}

pub struct ModelTrainer {
    settings: TrainerSettings,
}

impl ModelTrainer {
    pub fn new(settings: TrainerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TrainerSettings {
        &self.settings
    }

    /// Splits labeled rows by time: the most recent `validation_split` fraction becomes
    /// validation. Rows sharing the boundary timestamp all go to validation, so no
    /// training row is newer than any validation row.
    pub fn chronological_split(
        mut rows: Vec<FeatureVector>,
        validation_split: f64,
    ) -> (Vec<FeatureVector>, Vec<FeatureVector>) {
        rows.retain(|r| r.label.is_some());
        rows.sort_by_key(|r| r.timestamp);

        let n = rows.len();
        let split = if validation_split.is_finite() {
            validation_split.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let n_validation = ((n as f64) * split).round() as usize;
        let mut cut = n - n_validation.min(n);

        if cut < n {
            let boundary = rows[cut].timestamp;
            while cut > 0 && rows[cut - 1].timestamp == boundary {
                cut -= 1;
            }
        }

        let validation = rows.split_off(cut);
        (rows, validation)
    }

    /// Fits a candidate on labeled `vectors`. CPU bound: call from a blocking worker.
    pub fn train(
        &self,
        model_type: ModelType,
        vectors: Vec<FeatureVector>,
        run_id: &str,
        trained_at: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<TrainedModel, TrainingError> {
        cancel.check()?;

        let labeled = vectors.iter().filter(|v| v.label.is_some()).count();
        if labeled < self.settings.min_samples {
            return Err(TrainingError::InsufficientData {
                available: labeled,
                required: self.settings.min_samples,
            });
        }

        let (train, validation) =
            Self::chronological_split(vectors, self.settings.validation_split);
        if train.is_empty() || validation.is_empty() {
            return Err(TrainingError::InsufficientData {
                available: train.len().min(validation.len()),
                required: 1,
            });
        }

        let (x_train, y_train) = to_matrix(&train);
        let (x_val, y_val) = to_matrix(&validation);

        info!(
            "ModelTrainer: Fitting {} model on {} rows ({} validation, {} trees, seed {})",
            model_type,
            x_train.len(),
            x_val.len(),
            self.settings.n_trees,
            self.settings.seed
        );

        let fit_started = Instant::now();
        let model = DirectionClassifier::fit(&x_train, &y_train, &self.settings)?;
        let training_time_secs = fit_started.elapsed().as_secs_f64();
        cancel.check()?;

        let predicted = model.predict(&x_val)?;
        let validation_accuracy = directional_accuracy(&predicted, &y_val);

        info!(
            "ModelTrainer: {} validation accuracy {:.4} (fit in {:.2}s)",
            model_type, validation_accuracy, training_time_secs
        );

        let parameters = ModelParameters {
            algorithm: ALGORITHM.to_string(),
            seed: self.settings.seed,
            n_trees: self.settings.n_trees,
            max_depth: self.settings.max_depth,
            min_samples_split: self.settings.min_samples_split,
            window_size: self.settings.window_size,
            label_horizon: self.settings.label_horizon,
            validation_split: self.settings.validation_split,
            training_samples: x_train.len(),
            validation_samples: x_val.len(),
            validation_accuracy,
            feature_count: FEATURE_COUNT,
        };

        let mut artifact = ModelArtifact::new(model_type, trained_at, parameters, run_id);
        artifact.training_time_secs = training_time_secs;

        Ok(TrainedModel {
            artifact,
            model: Arc::new(model),
        })
    }
}

fn to_matrix(rows: &[FeatureVector]) -> (Vec<Vec<f64>>, Vec<Direction>) {
    rows.iter()
        .filter_map(|r| r.label.map(|l| (r.features.clone(), l)))
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    /// Rows whose label is a deterministic function of the first feature
    fn synthetic_rows(n: usize) -> Vec<FeatureVector> {
        (0..n)
            .map(|i| {
                let signal = ((i * 7) % 5) as f64 - 2.0;
                // Every column carries the signal so any sampled split can find it
                let features: Vec<f64> = (0..FEATURE_COUNT)
                    .map(|j| signal * (j + 1) as f64 + ((i + j) % 3) as f64 * 0.01)
                    .collect();
                FeatureVector {
                    symbol: if i % 2 == 0 { "AAPL" } else { "MSFT" }.to_string(),
                    timestamp: base() + Duration::hours((i / 2) as i64),
                    features,
                    label: Direction::from_class_id(signal as i32),
                }
            })
            .collect()
    }

    fn small_settings() -> TrainerSettings {
        TrainerSettings {
            min_samples: 50,
            n_trees: 10,
            max_depth: 6,
            min_samples_split: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_split_has_no_lookahead() {
        let (train, validation) = ModelTrainer::chronological_split(synthetic_rows(101), 0.2);

        assert_eq!(train.len() + validation.len(), 101);
        let latest_train = train.iter().map(|r| r.timestamp).max().unwrap();
        let earliest_val = validation.iter().map(|r| r.timestamp).min().unwrap();
        assert!(earliest_val > latest_train);
    }

    #[test]
    fn test_split_moves_boundary_ties_to_validation() {
        // Pairs of rows share a timestamp; 10 rows with 0.3 split would cut a pair
        let (train, validation) = ModelTrainer::chronological_split(synthetic_rows(10), 0.3);
        assert_eq!(validation.len(), 4);
        assert_eq!(train.len(), 6);
    }

    #[test]
    fn test_split_ignores_unlabeled_rows() {
        let mut rows = synthetic_rows(20);
        rows[19].label = None;
        let (train, validation) = ModelTrainer::chronological_split(rows, 0.25);
        assert_eq!(train.len() + validation.len(), 19);
    }

    #[test]
    fn test_insufficient_samples() {
        let trainer = ModelTrainer::new(small_settings());
        let err = trainer
            .train(
                ModelType::Analytical,
                synthetic_rows(20),
                "run",
                base(),
                &CancelToken::new(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            TrainingError::InsufficientData {
                available: 20,
                required: 50
            }
        ));
    }

    #[test]
    fn test_cancelled_before_fit() {
        let trainer = ModelTrainer::new(small_settings());
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = trainer
            .train(ModelType::Chatbot, synthetic_rows(200), "run", base(), &cancel)
            .unwrap_err();
        assert!(matches!(err, TrainingError::Cancelled));
    }

    #[test]
    fn test_training_is_deterministic_and_learns_signal() {
        let trainer = ModelTrainer::new(small_settings());
        let cancel = CancelToken::new();

        let a = trainer
            .train(ModelType::Analytical, synthetic_rows(300), "run-a", base(), &cancel)
            .unwrap();
        let b = trainer
            .train(ModelType::Analytical, synthetic_rows(300), "run-b", base(), &cancel)
            .unwrap();

        assert_eq!(
            a.artifact.parameters.validation_accuracy,
            b.artifact.parameters.validation_accuracy
        );
        assert!(a.artifact.parameters.validation_accuracy > 0.9);
        assert_eq!(a.artifact.parameters.feature_count, FEATURE_COUNT);
        assert_eq!(a.artifact.version, "v1704067200000-run-a");
        assert!(a.artifact.training_time_secs >= 0.0);
        assert_ne!(a.artifact.version, b.artifact.version);
    }

    #[test]
    fn test_model_bytes_round_trip_predictions() {
        let trainer = ModelTrainer::new(small_settings());
        let trained = trainer
            .train(
                ModelType::Analytical,
                synthetic_rows(200),
                "run",
                base(),
                &CancelToken::new(),
            )
            .unwrap();

        let bytes = trained.model.to_bytes().unwrap();
        let restored = DirectionClassifier::from_bytes(&bytes).unwrap();
        let rows: Vec<Vec<f64>> = synthetic_rows(10).into_iter().map(|r| r.features).collect();

        assert_eq!(
            trained.model.predict(&rows).unwrap(),
            restored.predict(&rows).unwrap()
        );
    }

    #[test]
    fn test_accuracy_helper() {
        let p = [Direction::Buy, Direction::Hold, Direction::Sell];
        let a = [Direction::Buy, Direction::Sell, Direction::Sell];
        assert!((directional_accuracy(&p, &a) - 2.0 / 3.0).abs() < 1e-12);
        assert!(directional_accuracy(&[], &[]).is_nan());
    }
}
