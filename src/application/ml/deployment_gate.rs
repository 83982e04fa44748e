use crate::application::ml::trainer::{DirectionClassifier, TrainedModel};
use crate::domain::errors::TrainingError;
use crate::domain::ml::model::ModelArtifact;
use crate::domain::repositories::{ModelArtifactRepository, StoredModel};
use crate::domain::training::types::ModelType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GatePolicy {
    pub accuracy_threshold: f64,
    /// When set, a candidate may trail the active model by at most this much
    pub regression_tolerance: Option<f64>,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            accuracy_threshold: 0.75,
            regression_tolerance: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Deploy,
    Reject(String),
}

/// Pure deploy/reject decision for an evaluated candidate
pub fn decide(
    candidate: &ModelArtifact,
    current: Option<&ModelArtifact>,
    policy: &GatePolicy,
) -> GateDecision {
    let accuracy = candidate.accuracy;
    if accuracy.is_nan() {
        return GateDecision::Reject("candidate accuracy is NaN".to_string());
    }
    if policy.accuracy_threshold.is_nan() {
        return GateDecision::Reject("accuracy threshold is NaN".to_string());
    }
    if accuracy < policy.accuracy_threshold {
        return GateDecision::Reject(format!(
            "accuracy {:.4} below threshold {:.4}",
            accuracy, policy.accuracy_threshold
        ));
    }

    if let (Some(tolerance), Some(current)) = (policy.regression_tolerance, current) {
        if current.accuracy.is_nan() || tolerance.is_nan() {
            return GateDecision::Reject("active model accuracy is not comparable".to_string());
        }
        let floor = current.accuracy - tolerance;
        if accuracy < floor {
            return GateDecision::Reject(format!(
                "accuracy {:.4} regresses from active {} ({:.4}) beyond tolerance {:.4}",
                accuracy, current.version, current.accuracy, tolerance
            ));
        }
    }

    GateDecision::Deploy
}

/// The servable model for one type
#[derive(Debug, Clone)]
pub struct ActiveModel {
    pub artifact: Arc<ModelArtifact>,
    pub model: Arc<DirectionClassifier>,
}

type ActiveCell = Option<ActiveModel>;

/// Per-type active model cells. Only the deployment gate writes; readers take snapshots.
pub struct ActiveModelRegistry {
    cells: HashMap<ModelType, watch::Sender<ActiveCell>>,
}

impl ActiveModelRegistry {
    pub fn new() -> Self {
        let cells = ModelType::ALL
            .into_iter()
            .map(|t| (t, watch::channel(None).0))
            .collect();
        Self { cells }
    }

    pub fn current(&self, model_type: ModelType) -> Option<ActiveModel> {
        self.cells
            .get(&model_type)
            .and_then(|tx| tx.borrow().clone())
    }

    pub fn current_artifact(&self, model_type: ModelType) -> Option<Arc<ModelArtifact>> {
        self.current(model_type).map(|a| a.artifact)
    }

    pub fn subscribe(&self, model_type: ModelType) -> Option<watch::Receiver<ActiveCell>> {
        self.cells.get(&model_type).map(|tx| tx.subscribe())
    }

    fn swap(&self, model_type: ModelType, active: ActiveModel) {
        if let Some(tx) = self.cells.get(&model_type) {
            tx.send_replace(Some(active));
        }
    }

    /// Loads persisted active models; undecodable blobs are skipped with a warning
    pub async fn restore(&self, repo: &dyn ModelArtifactRepository) -> anyhow::Result<usize> {
        let mut restored = 0;
        for model_type in ModelType::ALL {
            let Some(stored) = repo.load_active(model_type).await? else {
                continue;
            };
            match DirectionClassifier::from_bytes(&stored.model_blob) {
                Ok(model) => {
                    info!(
                        "ActiveModelRegistry: Restored {} model {} (accuracy {:.4})",
                        model_type, stored.artifact.version, stored.artifact.accuracy
                    );
                    self.swap(
                        model_type,
                        ActiveModel {
                            artifact: Arc::new(stored.artifact),
                            model: Arc::new(model),
                        },
                    );
                    restored += 1;
                }
                Err(e) => warn!(
                    "ActiveModelRegistry: Could not decode persisted {} model {}: {}",
                    model_type, stored.artifact.version, e
                ),
            }
        }
        Ok(restored)
    }
}

impl Default for ActiveModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub struct DeploymentGate {
    policy: GatePolicy,
    registry: Arc<ActiveModelRegistry>,
    artifacts: Arc<dyn ModelArtifactRepository>,
}

impl DeploymentGate {
    pub fn new(
        policy: GatePolicy,
        registry: Arc<ActiveModelRegistry>,
        artifacts: Arc<dyn ModelArtifactRepository>,
    ) -> Self {
        Self {
            policy,
            registry,
            artifacts,
        }
    }

    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    pub fn registry(&self) -> &Arc<ActiveModelRegistry> {
        &self.registry
    }

    pub fn evaluate_candidate(&self, candidate: &ModelArtifact) -> GateDecision {
        let current = self.registry.current_artifact(candidate.model_type);
        decide(candidate, current.as_deref(), &self.policy)
    }

    /// Persists the candidate as active, then swaps the in-memory cell.
    /// A persistence failure leaves the previous active model in place.
    pub async fn deploy(&self, candidate: &TrainedModel) -> Result<(), TrainingError> {
        let stored = StoredModel {
            artifact: candidate.artifact.clone(),
            model_blob: candidate.model.to_bytes()?,
        };
        self.artifacts
            .save_active(&stored)
            .await
            .map_err(TrainingError::Persistence)?;

        self.registry.swap(
            candidate.artifact.model_type,
            ActiveModel {
                artifact: Arc::new(candidate.artifact.clone()),
                model: candidate.model.clone(),
            },
        );
        info!(
            "DeploymentGate: {} model {} is now active (accuracy {:.4})",
            candidate.artifact.model_type, candidate.artifact.version, candidate.artifact.accuracy
        );
        Ok(())
    }
}
