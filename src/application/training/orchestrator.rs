//! Training orchestrator
//!
//! Owns one status cell per model type and runs the pipeline
//! `Collecting -> EngineeringFeatures -> Training -> Validating -> Deploying`
//! on a spawned task per run. CPU-bound stages run on blocking workers.
//! Every stage is bounded by the stage timeout. All stages before deployment
//! also race the run's cancel token; deployment ignores it once started.

use crate::application::ml::data_collector::DataCollector;
use crate::application::ml::deployment_gate::{DeploymentGate, GateDecision};
use crate::application::ml::evaluator::{Evaluator, HeldOutSet};
use crate::application::ml::feature_engine::FeatureEngine;
use crate::application::ml::trainer::{ModelTrainer, TrainedModel, TrainerSettings};
use crate::application::training::cancel::CancelToken;
use crate::application::training::tracker::{RunTracker, StatusCell};
use crate::domain::errors::TrainingError;
use crate::domain::market::observation::TimeRange;
use crate::domain::ml::model::{ModelStatus, PerformanceRecord};
use crate::domain::repositories::PerformanceRecordRepository;
use crate::domain::training::events::TrainingEvent;
use crate::domain::training::progress::StageHistory;
use crate::domain::training::run::{TrainingRun, TrainingRunSnapshot};
use crate::domain::training::types::{ModelType, TrainingStage, TriggerReason};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::observability::Metrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// What to train for one model type
#[derive(Debug, Clone)]
pub struct ModelProfile {
    pub symbols: Vec<String>,
    pub trainer: TrainerSettings,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub history_days: i64,
    /// Most recent days reserved for held-out evaluation
    pub held_out_days: i64,
    pub min_eval_samples: usize,
    pub stage_timeout: Duration,
    /// Fixed end of the collected range; `None` uses the current time
    pub as_of: Option<DateTime<Utc>>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            history_days: 365,
            held_out_days: 30,
            min_eval_samples: 5,
            stage_timeout: Duration::from_secs(1800),
            as_of: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CancelAck {
    /// Cancellation was signalled; the run stops at its next checkpoint
    Requested { run_id: String },
    NotRunning,
}

struct ModelSlot {
    status: Arc<StatusCell>,
    /// Token of the run currently owning the slot. Also serializes trigger/finish.
    cancel: Mutex<Option<CancelToken>>,
    history: Arc<Mutex<StageHistory>>,
    last_finished: Mutex<Option<DateTime<Utc>>>,
}

impl ModelSlot {
    fn new() -> Self {
        Self {
            status: Arc::new(watch::channel(None).0),
            cancel: Mutex::new(None),
            history: Arc::new(Mutex::new(StageHistory::new())),
            last_finished: Mutex::new(None),
        }
    }

    fn cancel_guard(&self) -> std::sync::MutexGuard<'_, Option<CancelToken>> {
        match self.cancel.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn last_finished(&self) -> std::sync::MutexGuard<'_, Option<DateTime<Utc>>> {
        match self.last_finished.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

struct ModelSlots {
    analytical: ModelSlot,
    chatbot: ModelSlot,
}

impl ModelSlots {
    fn get(&self, model_type: ModelType) -> &ModelSlot {
        match model_type {
            ModelType::Analytical => &self.analytical,
            ModelType::Chatbot => &self.chatbot,
        }
    }
}

struct OrchestratorInner {
    slots: ModelSlots,
    profiles: HashMap<ModelType, ModelProfile>,
    collector: Arc<DataCollector>,
    gate: Arc<DeploymentGate>,
    performance: Arc<dyn PerformanceRecordRepository>,
    settings: OrchestratorSettings,
    events: EventBus,
    metrics: Option<Metrics>,
}

/// Entry point for triggering, observing and cancelling training runs
#[derive(Clone)]
pub struct TrainingOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl TrainingOrchestrator {
    pub fn new(
        collector: Arc<DataCollector>,
        gate: Arc<DeploymentGate>,
        performance: Arc<dyn PerformanceRecordRepository>,
        profiles: HashMap<ModelType, ModelProfile>,
        settings: OrchestratorSettings,
        events: EventBus,
        metrics: Option<Metrics>,
    ) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                slots: ModelSlots {
                    analytical: ModelSlot::new(),
                    chatbot: ModelSlot::new(),
                },
                profiles,
                collector,
                gate,
                performance,
                settings,
                events,
                metrics,
            }),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.inner.settings
    }

    pub fn profile(&self, model_type: ModelType) -> Option<&ModelProfile> {
        self.inner.profiles.get(&model_type)
    }

    pub fn gate(&self) -> &Arc<DeploymentGate> {
        &self.inner.gate
    }

    /// Starts a run and returns its id. Rejects with `AlreadyRunning` while a run of
    /// the same type is not terminal; triggers are never queued.
    pub fn trigger_training(
        &self,
        model_type: ModelType,
        trigger: TriggerReason,
    ) -> Result<String, TrainingError> {
        let inner = &self.inner;
        let profile = inner
            .profiles
            .get(&model_type)
            .filter(|p| !p.symbols.is_empty())
            .cloned()
            .ok_or_else(|| TrainingError::DataUnavailable {
                reason: format!("no symbols configured for {} model", model_type),
            })?;

        let slot = inner.slots.get(model_type);
        let run = TrainingRun::new(model_type, trigger, Utc::now());
        let token = CancelToken::new();

        {
            let mut current_token = slot.cancel_guard();
            let mut conflict = None;
            slot.status.send_if_modified(|cell| {
                if let Some(current) = cell.as_ref()
                    && !current.is_terminal()
                {
                    conflict = Some(current.id.clone());
                    return false;
                }
                *cell = Some(run.clone());
                true
            });
            if let Some(run_id) = conflict {
                warn!(
                    "TrainingOrchestrator: Rejected {} trigger for {}: run {} in progress",
                    trigger, model_type, run_id
                );
                return Err(TrainingError::AlreadyRunning { model_type, run_id });
            }
            *current_token = Some(token.clone());
        }

        let tracker = Arc::new(RunTracker::new(
            &run,
            slot.status.clone(),
            slot.history.clone(),
            inner.events.clone(),
            inner.metrics.clone(),
        ));

        info!(
            "TrainingOrchestrator: Starting {} run {} ({}, {} symbols)",
            model_type,
            run.id,
            trigger,
            profile.symbols.len()
        );
        tracker.log(format!("Run triggered ({})", trigger));
        inner.events.publish(TrainingEvent::RunStarted {
            run_id: run.id.clone(),
            model_type,
            trigger,
        });

        let task_inner = Arc::clone(inner);
        tokio::spawn(async move {
            task_inner.execute(tracker, profile, token).await;
        });

        Ok(run.id)
    }

    /// Latest run snapshot. Never waits on an in-progress stage.
    pub fn get_status(&self, model_type: ModelType) -> Option<TrainingRunSnapshot> {
        self.inner
            .slots
            .get(model_type)
            .status
            .borrow()
            .as_ref()
            .map(TrainingRunSnapshot::from)
    }

    pub async fn get_model_status(
        &self,
        model_type: ModelType,
    ) -> Result<ModelStatus, TrainingError> {
        let active = self.inner.gate.registry().current_artifact(model_type);
        let history = self
            .inner
            .performance
            .history(model_type)
            .await
            .map_err(TrainingError::Persistence)?;
        Ok(ModelStatus::from_history(
            model_type,
            active.as_deref(),
            history,
        ))
    }

    /// Best effort: a run that already started persisting its candidate finishes.
    pub fn cancel_training(&self, model_type: ModelType) -> CancelAck {
        let slot = self.inner.slots.get(model_type);
        let token = slot.cancel_guard();
        let running = slot
            .status
            .borrow()
            .as_ref()
            .filter(|run| !run.is_terminal())
            .map(|run| run.id.clone());

        match (token.as_ref(), running) {
            (Some(token), Some(run_id)) => {
                info!(
                    "TrainingOrchestrator: Cancellation requested for {} run {}",
                    model_type, run_id
                );
                token.cancel();
                CancelAck::Requested { run_id }
            }
            _ => CancelAck::NotRunning,
        }
    }

    /// Cancels every running model type
    pub fn cancel_all(&self) -> Vec<CancelAck> {
        ModelType::ALL
            .into_iter()
            .map(|t| self.cancel_training(t))
            .filter(|ack| *ack != CancelAck::NotRunning)
            .collect()
    }

    /// Clears a terminal snapshot. Returns false while a run is in progress.
    pub fn acknowledge(&self, model_type: ModelType) -> bool {
        self.inner
            .slots
            .get(model_type)
            .status
            .send_if_modified(|cell| match cell {
                Some(run) if run.is_terminal() => {
                    *cell = None;
                    true
                }
                _ => false,
            })
    }

    pub fn subscribe_status(&self, model_type: ModelType) -> watch::Receiver<Option<TrainingRun>> {
        self.inner.slots.get(model_type).status.subscribe()
    }

    /// Waits until the slot holds no running run and returns its final snapshot
    pub async fn wait_until_idle(&self, model_type: ModelType) -> Option<TrainingRun> {
        let mut rx = self.subscribe_status(model_type);
        let result = rx
            .wait_for(|cell| cell.as_ref().is_none_or(|run| run.is_terminal()))
            .await
            .ok()
            .and_then(|cell| cell.clone());
        result
    }

    /// Finish time of the last terminal run, falling back to the newest persisted
    /// performance record after a restart
    pub async fn last_finished(&self, model_type: ModelType) -> Option<DateTime<Utc>> {
        if let Some(ts) = *self.inner.slots.get(model_type).last_finished() {
            return Some(ts);
        }
        match self.inner.performance.latest(model_type).await {
            Ok(record) => record.map(|r| r.timestamp),
            Err(e) => {
                warn!(
                    "TrainingOrchestrator: Could not read {} history: {:#}",
                    model_type, e
                );
                None
            }
        }
    }
}

impl OrchestratorInner {
    async fn execute(&self, tracker: Arc<RunTracker>, profile: ModelProfile, cancel: CancelToken) {
        let model_type = tracker.model_type();
        let result = self.run_pipeline(&tracker, &profile, &cancel).await;

        let slot = self.slots.get(model_type);
        let mut token = slot.cancel_guard();
        token.take();
        // Recorded before the snapshot turns terminal so schedulers never see a stale value
        *slot.last_finished() = Some(Utc::now());

        match result {
            Ok(()) => {
                if let Err(e) = tracker.complete() {
                    error!(
                        "TrainingOrchestrator: {} run {} could not complete: {}",
                        model_type,
                        tracker.run_id(),
                        e
                    );
                    tracker.fail(&e);
                }
            }
            Err(e) => {
                match &e {
                    TrainingError::Cancelled => info!(
                        "TrainingOrchestrator: {} run {} cancelled",
                        model_type,
                        tracker.run_id()
                    ),
                    other => error!(
                        "TrainingOrchestrator: {} run {} failed: {}",
                        model_type,
                        tracker.run_id(),
                        other
                    ),
                }
                tracker.fail(&e);
            }
        }
    }

    async fn run_pipeline(
        &self,
        tracker: &RunTracker,
        profile: &ModelProfile,
        cancel: &CancelToken,
    ) -> Result<(), TrainingError> {
        let model_type = tracker.model_type();
        let settings = profile.trainer.clone();
        let engine = FeatureEngine::new(settings.window_size);
        let horizon = settings.label_horizon;

        // Collecting
        tracker.enter_stage(TrainingStage::Collecting)?;
        let end = self.settings.as_of.unwrap_or_else(Utc::now);
        let range = TimeRange::trailing_days(end, self.settings.history_days);
        let report = self
            .bounded(
                TrainingStage::Collecting,
                cancel,
                self.collector
                    .collect(&profile.symbols, range, cancel, |done, total| {
                        tracker.stage_progress(done as f64 / total.max(1) as f64)
                    }),
            )
            .await?;
        tracker.log(format!(
            "Collected {} observations for {}/{} symbols ({} rows dropped)",
            report.total_observations(),
            report.observations.len(),
            report.requested,
            report.dropped_rows
        ));
        for (symbol, failure) in &report.failures {
            tracker.log(format!("Skipped {}: {}", symbol, failure));
        }

        // Feature engineering
        tracker.enter_stage(TrainingStage::EngineeringFeatures)?;
        let boundary = end - chrono::Duration::days(self.settings.held_out_days);
        let (training_series, held_out) = HeldOutSet::split(
            &report.observations,
            boundary,
            engine.window_size().saturating_sub(1),
        );
        let worker_cancel = cancel.clone();
        let vectors = self
            .bounded(
                TrainingStage::EngineeringFeatures,
                cancel,
                run_blocking(move || {
                    worker_cancel.check()?;
                    Ok(engine.compute_for_symbols(&training_series, horizon))
                }),
            )
            .await?;
        let labeled = vectors.iter().filter(|v| v.label.is_some()).count();
        tracker.log(format!(
            "Engineered {} feature vectors ({} labeled)",
            vectors.len(),
            labeled
        ));
        tracker.stage_progress(1.0);

        // Training
        tracker.enter_stage(TrainingStage::Training)?;
        let trainer = ModelTrainer::new(settings);
        let run_id = tracker.run_id().to_string();
        let worker_cancel = cancel.clone();
        let candidate = self
            .bounded(
                TrainingStage::Training,
                cancel,
                run_blocking(move || {
                    trainer.train(model_type, vectors, &run_id, Utc::now(), &worker_cancel)
                }),
            )
            .await?;
        tracker.log(format!(
            "Fitted candidate {} on {} rows (validation accuracy {:.4})",
            candidate.artifact.version,
            candidate.artifact.parameters.training_samples,
            candidate.artifact.parameters.validation_accuracy
        ));
        tracker.stage_progress(1.0);

        // Validating
        tracker.enter_stage(TrainingStage::Validating)?;
        let evaluator = Evaluator::new(engine, horizon, self.settings.min_eval_samples);
        let model = candidate.model.clone();
        let worker_cancel = cancel.clone();
        let evaluation = self
            .bounded(
                TrainingStage::Validating,
                cancel,
                run_blocking(move || evaluator.evaluate(&model, &held_out, &worker_cancel)),
            )
            .await?;
        let candidate = TrainedModel {
            artifact: candidate.artifact.with_metrics(evaluation.metrics),
            model: candidate.model,
        };
        tracker.record_candidate(&candidate.artifact.version, evaluation.accuracy);
        tracker.log(format!(
            "Held-out accuracy {:.4} (precision {:.4}, recall {:.4}, f1 {:.4}) over {} rows ({} symbols excluded)",
            evaluation.accuracy,
            evaluation.metrics.precision,
            evaluation.metrics.recall,
            evaluation.metrics.f1_score,
            evaluation.samples,
            evaluation.excluded.len()
        ));
        tracker.stage_progress(1.0);

        // Deploying: no cancellation checkpoints once persisting starts
        cancel.check()?;
        tracker.enter_stage(TrainingStage::Deploying)?;
        let decision = self.gate.evaluate_candidate(&candidate.artifact);
        let limit = self.settings.stage_timeout;
        tokio::time::timeout(limit, self.persist_outcome(&candidate, &decision))
            .await
            .map_err(|_| TrainingError::Timeout {
                stage: TrainingStage::Deploying,
                limit_secs: limit.as_secs(),
            })??;

        match decision {
            GateDecision::Deploy => {
                tracker.mark_deployed();
                if let Some(metrics) = &self.metrics {
                    metrics.set_active_accuracy(model_type.as_str(), evaluation.accuracy);
                }
                tracker.log(format!(
                    "Deployed {} as active {} model",
                    candidate.artifact.version, model_type
                ));
                self.events.publish(TrainingEvent::ModelDeployed {
                    model_type,
                    version: candidate.artifact.version.clone(),
                    accuracy: evaluation.accuracy,
                });
            }
            GateDecision::Reject(reason) => {
                tracker.log(format!(
                    "Candidate {} not deployed: {}",
                    candidate.artifact.version, reason
                ));
                self.events.publish(TrainingEvent::CandidateRejected {
                    model_type,
                    version: candidate.artifact.version.clone(),
                    accuracy: evaluation.accuracy,
                    reason,
                });
            }
        }
        tracker.stage_progress(1.0);

        Ok(())
    }

    /// Persists an approved candidate, then appends the run's performance record.
    /// A failed persist appends nothing.
    async fn persist_outcome(
        &self,
        candidate: &TrainedModel,
        decision: &GateDecision,
    ) -> Result<(), TrainingError> {
        if matches!(decision, GateDecision::Deploy) {
            self.gate.deploy(candidate).await?;
        }

        let model_type = candidate.artifact.model_type;
        let previous = self
            .performance
            .latest(model_type)
            .await
            .map_err(TrainingError::Persistence)?;
        let record =
            PerformanceRecord::for_artifact(&candidate.artifact, Utc::now(), previous.as_ref());
        self.performance
            .append(&record)
            .await
            .map_err(TrainingError::Persistence)
    }

    /// Races `work` against the stage timeout and the cancel token
    async fn bounded<T>(
        &self,
        stage: TrainingStage,
        cancel: &CancelToken,
        work: impl Future<Output = Result<T, TrainingError>>,
    ) -> Result<T, TrainingError> {
        let limit = self.settings.stage_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TrainingError::Cancelled),
            outcome = tokio::time::timeout(limit, work) => match outcome {
                Ok(result) => result,
                Err(_) => {
                    // Stops blocking workers at their next checkpoint
                    cancel.cancel();
                    Err(TrainingError::Timeout {
                        stage,
                        limit_secs: limit.as_secs(),
                    })
                }
            },
        }
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T, TrainingError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, TrainingError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| TrainingError::model(format!("blocking worker failed: {}", e)))?
}
