use crate::domain::errors::{ErrorKind, TrainingError};
use crate::domain::training::progress::stage_band;
use crate::domain::training::types::{ModelType, TrainingStage, TriggerReason};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Most recent log lines kept per run
pub const MAX_LOG_ENTRIES: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&TrainingError> for RunError {
    fn from(e: &TrainingError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: TrainingStage,
    pub entered_at: DateTime<Utc>,
    pub duration_secs: Option<f64>,
}

/// One execution of the training pipeline for a model type.
///
/// Only the orchestrator's run task mutates a run; everybody else reads clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRun {
    pub id: String,
    pub model_type: ModelType,
    pub trigger: TriggerReason,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stage: TrainingStage,
    pub stage_entered_at: DateTime<Utc>,
    pub progress_percent: f64,
    pub eta_seconds: f64,
    pub logs: VecDeque<LogEntry>,
    pub error: Option<RunError>,
    pub stage_timings: Vec<StageTiming>,
    pub candidate_version: Option<String>,
    pub candidate_accuracy: Option<f64>,
    pub deployed: bool,
}

impl TrainingRun {
    pub fn new(model_type: ModelType, trigger: TriggerReason, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            model_type,
            trigger,
            started_at: now,
            finished_at: None,
            stage: TrainingStage::Idle,
            stage_entered_at: now,
            progress_percent: 0.0,
            eta_seconds: 0.0,
            logs: VecDeque::new(),
            error: None,
            stage_timings: Vec::new(),
            candidate_version: None,
            candidate_accuracy: None,
            deployed: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn log(&mut self, now: DateTime<Utc>, message: impl Into<String>) {
        self.logs.push_back(LogEntry {
            timestamp: now,
            message: message.into(),
        });
        while self.logs.len() > MAX_LOG_ENTRIES {
            self.logs.pop_front();
        }
    }

    /// Moves to `next`, closing the timing of the current stage.
    pub fn enter_stage(
        &mut self,
        next: TrainingStage,
        now: DateTime<Utc>,
    ) -> Result<(), TrainingError> {
        if !self.stage.can_transition_to(next) {
            return Err(TrainingError::InvalidTransition {
                from: self.stage,
                to: next,
            });
        }

        if let Some(open) = self.stage_timings.last_mut()
            && open.duration_secs.is_none()
        {
            let elapsed = (now - open.entered_at).num_milliseconds() as f64 / 1000.0;
            open.duration_secs = Some(elapsed.max(0.0));
        }

        self.stage = next;
        self.stage_entered_at = now;

        if next.is_terminal() {
            self.finished_at = Some(now);
            self.eta_seconds = 0.0;
        } else {
            self.stage_timings.push(StageTiming {
                stage: next,
                entered_at: now,
                duration_secs: None,
            });
        }

        if next == TrainingStage::Completed {
            self.advance_progress(100.0);
        } else if let Some((start, _)) = stage_band(next) {
            self.advance_progress(start);
        }

        self.log(now, format!("Entered stage: {}", next));
        Ok(())
    }

    /// Raises progress to `percent`; never lowers it.
    pub fn advance_progress(&mut self, percent: f64) {
        if percent.is_finite() {
            self.progress_percent = self.progress_percent.max(percent.clamp(0.0, 100.0));
        }
    }

    /// Terminates the run as Failed (or Cancelled for a cancellation).
    pub fn fail(&mut self, error: &TrainingError, now: DateTime<Utc>) {
        if self.is_terminal() {
            return;
        }
        let terminal = match error {
            TrainingError::Cancelled => TrainingStage::Cancelled,
            _ => TrainingStage::Failed,
        };
        self.error = Some(RunError::from(error));
        self.log(now, format!("Run {}: {}", terminal, error));
        // Failed/Cancelled are reachable from every non-terminal stage
        let _ = self.enter_stage(terminal, now);
    }

    /// Closed stage durations, for feeding the ETA history
    pub fn completed_stage_durations(&self) -> impl Iterator<Item = (TrainingStage, f64)> + '_ {
        self.stage_timings
            .iter()
            .filter_map(|t| t.duration_secs.map(|d| (t.stage, d)))
    }

    pub fn recent_logs(&self, n: usize) -> Vec<LogEntry> {
        let skip = self.logs.len().saturating_sub(n);
        self.logs.iter().skip(skip).cloned().collect()
    }
}

/// Lines of log included in a status snapshot
pub const SNAPSHOT_LOG_LINES: usize = 20;

/// Read-only view of a run for status consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRunSnapshot {
    pub run_id: String,
    pub model_type: ModelType,
    pub trigger: TriggerReason,
    pub stage: TrainingStage,
    pub progress_percent: f64,
    pub eta_seconds: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub recent_logs: Vec<LogEntry>,
    pub error: Option<RunError>,
    pub candidate_version: Option<String>,
    pub candidate_accuracy: Option<f64>,
    pub deployed: bool,
}

impl From<&TrainingRun> for TrainingRunSnapshot {
    fn from(run: &TrainingRun) -> Self {
        Self {
            run_id: run.id.clone(),
            model_type: run.model_type,
            trigger: run.trigger,
            stage: run.stage,
            progress_percent: run.progress_percent,
            eta_seconds: run.eta_seconds,
            started_at: run.started_at,
            finished_at: run.finished_at,
            recent_logs: run.recent_logs(SNAPSHOT_LOG_LINES),
            error: run.error.clone(),
            candidate_version: run.candidate_version.clone(),
            candidate_accuracy: run.candidate_accuracy,
            deployed: run.deployed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_happy_path_records_timings() {
        let t0 = Utc::now();
        let mut run = TrainingRun::new(ModelType::Analytical, TriggerReason::Manual, t0);

        let mut t = t0;
        for stage in TrainingStage::PIPELINE {
            t += Duration::seconds(10);
            run.enter_stage(stage, t).unwrap();
        }
        run.enter_stage(TrainingStage::Completed, t + Duration::seconds(10))
            .unwrap();

        assert!(run.is_terminal());
        assert_eq!(run.progress_percent, 100.0);
        assert_eq!(run.completed_stage_durations().count(), 5);
        assert!(run.completed_stage_durations().all(|(_, d)| d == 10.0));
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_out_of_order_transition_rejected() {
        let now = Utc::now();
        let mut run = TrainingRun::new(ModelType::Chatbot, TriggerReason::Scheduled, now);
        run.enter_stage(TrainingStage::Collecting, now).unwrap();

        let err = run.enter_stage(TrainingStage::Validating, now).unwrap_err();
        assert!(matches!(err, TrainingError::InvalidTransition { .. }));
        assert_eq!(run.stage, TrainingStage::Collecting);
    }

    #[test]
    fn test_logs_are_capped() {
        let now = Utc::now();
        let mut run = TrainingRun::new(ModelType::Chatbot, TriggerReason::Manual, now);
        for i in 0..250 {
            run.log(now, format!("line {}", i));
        }
        assert_eq!(run.logs.len(), MAX_LOG_ENTRIES);
        assert_eq!(run.logs.back().unwrap().message, "line 249");
        assert_eq!(run.recent_logs(2).len(), 2);
    }

    #[test]
    fn test_progress_never_decreases() {
        let now = Utc::now();
        let mut run = TrainingRun::new(ModelType::Analytical, TriggerReason::Manual, now);
        run.advance_progress(40.0);
        run.advance_progress(10.0);
        run.advance_progress(f64::NAN);
        assert_eq!(run.progress_percent, 40.0);
    }

    #[test]
    fn test_cancellation_maps_to_cancelled_stage() {
        let now = Utc::now();
        let mut run = TrainingRun::new(ModelType::Analytical, TriggerReason::Manual, now);
        run.enter_stage(TrainingStage::Collecting, now).unwrap();
        run.fail(&TrainingError::Cancelled, now);

        assert_eq!(run.stage, TrainingStage::Cancelled);
        assert_eq!(run.error.as_ref().unwrap().kind, ErrorKind::Cancelled);
    }
}
