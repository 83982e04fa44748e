use crate::domain::errors::ErrorKind;
use crate::domain::training::types::{ModelType, TrainingStage, TriggerReason};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Events published while a training run executes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrainingEvent {
    RunStarted {
        run_id: String,
        model_type: ModelType,
        trigger: TriggerReason,
    },
    StageEntered {
        run_id: String,
        model_type: ModelType,
        stage: TrainingStage,
    },
    Progress {
        run_id: String,
        model_type: ModelType,
        percent: f64,
        eta_seconds: f64,
    },
    LogLine {
        run_id: String,
        model_type: ModelType,
        message: String,
    },
    RunFinished {
        run_id: String,
        model_type: ModelType,
        stage: TrainingStage,
        error: Option<ErrorKind>,
    },
    ModelDeployed {
        model_type: ModelType,
        version: String,
        accuracy: f64,
    },
    CandidateRejected {
        model_type: ModelType,
        version: String,
        accuracy: f64,
        reason: String,
    },
}

/// Sink for training events
pub trait TrainingEventListener: Send + Sync {
    fn on_event(&self, event: &TrainingEvent);
}

/// Logs lifecycle events; progress ticks are too chatty and are skipped
pub struct LoggingListener;

impl TrainingEventListener for LoggingListener {
    fn on_event(&self, event: &TrainingEvent) {
        match event {
            TrainingEvent::RunStarted {
                run_id,
                model_type,
                trigger,
            } => info!(
                "TrainingEvent: {} run {} started ({})",
                model_type, run_id, trigger
            ),
            TrainingEvent::StageEntered {
                model_type, stage, ..
            } => info!("TrainingEvent: {} entered {}", model_type, stage),
            TrainingEvent::RunFinished {
                run_id,
                model_type,
                stage,
                error,
            } => match error {
                Some(kind) => warn!(
                    "TrainingEvent: {} run {} finished as {} ({})",
                    model_type, run_id, stage, kind
                ),
                None => info!(
                    "TrainingEvent: {} run {} finished as {}",
                    model_type, run_id, stage
                ),
            },
            TrainingEvent::ModelDeployed {
                model_type,
                version,
                accuracy,
            } => info!(
                "TrainingEvent: {} model {} deployed (accuracy {:.4})",
                model_type, version, accuracy
            ),
            TrainingEvent::CandidateRejected {
                model_type,
                version,
                reason,
                ..
            } => info!(
                "TrainingEvent: {} candidate {} rejected: {}",
                model_type, version, reason
            ),
            TrainingEvent::Progress { .. } | TrainingEvent::LogLine { .. } => {}
        }
    }
}
