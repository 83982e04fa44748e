use crate::domain::errors::TrainingError;
use crate::domain::training::events::TrainingEvent;
use crate::domain::training::progress::{StageHistory, progress_within};
use crate::domain::training::run::TrainingRun;
use crate::domain::training::types::{ModelType, TrainingStage};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::observability::Metrics;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::debug;

pub type StatusCell = watch::Sender<Option<TrainingRun>>;

/// Single writer for one run's status cell.
///
/// Every mutation goes through the watch channel so readers only ever see whole
/// snapshots. Events and metrics are emitted after the snapshot is updated.
pub struct RunTracker {
    run_id: String,
    model_type: ModelType,
    status: Arc<StatusCell>,
    history: Arc<Mutex<StageHistory>>,
    events: EventBus,
    metrics: Option<Metrics>,
}

impl RunTracker {
    pub fn new(
        run: &TrainingRun,
        status: Arc<StatusCell>,
        history: Arc<Mutex<StageHistory>>,
        events: EventBus,
        metrics: Option<Metrics>,
    ) -> Self {
        Self {
            run_id: run.id.clone(),
            model_type: run.model_type,
            status,
            history,
            events,
            metrics,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn model_type(&self) -> ModelType {
        self.model_type
    }

    pub fn snapshot(&self) -> Option<TrainingRun> {
        self.status
            .borrow()
            .as_ref()
            .filter(|run| run.id == self.run_id)
            .cloned()
    }

    /// Applies `f` to this tracker's run if it still owns the cell
    fn modify<R>(&self, f: impl FnOnce(&mut TrainingRun) -> R) -> Option<R> {
        let mut result = None;
        self.status.send_if_modified(|cell| match cell {
            Some(run) if run.id == self.run_id => {
                result = Some(f(run));
                true
            }
            _ => false,
        });
        result
    }

    fn history(&self) -> std::sync::MutexGuard<'_, StageHistory> {
        match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn publish_progress(&self, percent: f64, eta_seconds: f64) {
        if let Some(metrics) = &self.metrics {
            metrics.set_progress(self.model_type.as_str(), percent);
        }
        self.events.publish(TrainingEvent::Progress {
            run_id: self.run_id.clone(),
            model_type: self.model_type,
            percent,
            eta_seconds,
        });
    }

    /// Enters the next working stage. Out-of-order transitions are rejected.
    pub fn enter_stage(&self, stage: TrainingStage) -> Result<(), TrainingError> {
        let now = Utc::now();
        let eta_from_history = self.history().estimate_remaining(stage, 0.0, None);

        let outcome = self
            .modify(|run| -> Result<_, TrainingError> {
                let previous = run.stage;
                run.enter_stage(stage, now)?;
                run.eta_seconds = eta_from_history;
                let closed = run
                    .stage_timings
                    .iter()
                    .rev()
                    .find(|t| t.stage == previous)
                    .and_then(|t| t.duration_secs)
                    .map(|d| (previous, d));
                Ok((closed, run.progress_percent, run.eta_seconds))
            })
            .ok_or_else(|| TrainingError::model("run no longer owns its status cell"))?;
        let (closed, percent, eta) = outcome?;

        if let (Some(metrics), Some((stage, secs))) = (&self.metrics, closed) {
            metrics.observe_stage_duration(&stage.to_string(), secs);
        }
        self.events.publish(TrainingEvent::StageEntered {
            run_id: self.run_id.clone(),
            model_type: self.model_type,
            stage,
        });
        self.publish_progress(percent, eta);
        Ok(())
    }

    /// Reports the measured fraction of the current stage
    pub fn stage_progress(&self, fraction: f64) {
        let now = Utc::now();
        let update = self.modify(|run| {
            let percent = progress_within(run.stage, fraction)?;
            run.advance_progress(percent);
            let elapsed = (now - run.stage_entered_at).num_milliseconds() as f64 / 1000.0;
            run.eta_seconds =
                self.history()
                    .estimate_remaining(run.stage, elapsed.max(0.0), Some(fraction));
            Some((run.progress_percent, run.eta_seconds))
        });

        if let Some(Some((percent, eta))) = update {
            debug!(
                "RunTracker: {} run {} at {:.1}% (eta {:.0}s)",
                self.model_type, self.run_id, percent, eta
            );
            self.publish_progress(percent, eta);
        }
    }

    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        let now = Utc::now();
        if self
            .modify(|run| run.log(now, message.clone()))
            .is_some()
        {
            self.events.publish(TrainingEvent::LogLine {
                run_id: self.run_id.clone(),
                model_type: self.model_type,
                message,
            });
        }
    }

    pub fn record_candidate(&self, version: &str, accuracy: f64) {
        self.modify(|run| {
            run.candidate_version = Some(version.to_string());
            run.candidate_accuracy = Some(accuracy);
        });
    }

    pub fn mark_deployed(&self) {
        self.modify(|run| run.deployed = true);
    }

    /// Completes the run and feeds its stage durations into the ETA history
    pub fn complete(&self) -> Result<(), TrainingError> {
        let now = Utc::now();
        let durations = self
            .modify(|run| -> Result<_, TrainingError> {
                run.enter_stage(TrainingStage::Completed, now)?;
                Ok(run.completed_stage_durations().collect::<Vec<_>>())
            })
            .ok_or_else(|| TrainingError::model("run no longer owns its status cell"))??;

        {
            let mut history = self.history();
            for (stage, secs) in &durations {
                history.record(*stage, *secs);
            }
        }
        if let (Some(metrics), Some((stage, secs))) = (&self.metrics, durations.last()) {
            metrics.observe_stage_duration(&stage.to_string(), *secs);
        }

        self.publish_progress(100.0, 0.0);
        self.finish(TrainingStage::Completed, None);
        Ok(())
    }

    /// Terminates the run as Failed or Cancelled. Logs and timings are preserved.
    pub fn fail(&self, error: &TrainingError) {
        let now = Utc::now();
        let stage = self
            .modify(|run| {
                if run.is_terminal() {
                    return None;
                }
                run.fail(error, now);
                Some(run.stage)
            })
            .flatten();
        if let Some(stage) = stage {
            self.finish(stage, Some(error));
        }
    }

    fn finish(&self, stage: TrainingStage, error: Option<&TrainingError>) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_runs(self.model_type.as_str(), &stage.to_string());
        }
        self.events.publish(TrainingEvent::RunFinished {
            run_id: self.run_id.clone(),
            model_type: self.model_type,
            stage,
            error: error.map(TrainingError::kind),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ErrorKind;
    use crate::domain::training::events::TrainingEventListener;
    use crate::domain::training::types::TriggerReason;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<TrainingEvent>>,
    }

    impl TrainingEventListener for Recorder {
        fn on_event(&self, event: &TrainingEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn setup() -> (RunTracker, Arc<StatusCell>, Arc<Recorder>) {
        let run = TrainingRun::new(ModelType::Analytical, TriggerReason::Manual, Utc::now());
        let (tx, _) = watch::channel(Some(run.clone()));
        let status = Arc::new(tx);
        let bus = EventBus::new();
        let recorder = Arc::new(Recorder::default());
        bus.subscribe(recorder.clone());
        let tracker = RunTracker::new(
            &run,
            status.clone(),
            Arc::new(Mutex::new(StageHistory::new())),
            bus,
            None,
        );
        (tracker, status, recorder)
    }

    #[test]
    fn test_progress_is_monotonic_across_stages() {
        let (tracker, status, _) = setup();
        let mut seen = Vec::new();

        for stage in TrainingStage::PIPELINE {
            tracker.enter_stage(stage).unwrap();
            for fraction in [0.5, 0.25, 1.0] {
                tracker.stage_progress(fraction);
                seen.push(status.borrow().as_ref().unwrap().progress_percent);
            }
        }
        tracker.complete().unwrap();
        seen.push(status.borrow().as_ref().unwrap().progress_percent);

        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", seen);
        assert_eq!(*seen.last().unwrap(), 100.0);
    }

    #[test]
    fn test_skipping_a_stage_is_rejected() {
        let (tracker, status, _) = setup();
        tracker.enter_stage(TrainingStage::Collecting).unwrap();
        let err = tracker.enter_stage(TrainingStage::Training).unwrap_err();

        assert!(matches!(err, TrainingError::InvalidTransition { .. }));
        assert_eq!(
            status.borrow().as_ref().unwrap().stage,
            TrainingStage::Collecting
        );
    }

    #[test]
    fn test_failure_publishes_kind_and_keeps_logs() {
        let (tracker, status, recorder) = setup();
        tracker.enter_stage(TrainingStage::Collecting).unwrap();
        tracker.log("fetching AAPL");
        tracker.fail(&TrainingError::DataUnavailable {
            reason: "provider down".to_string(),
        });

        let run = status.borrow().clone().unwrap();
        assert_eq!(run.stage, TrainingStage::Failed);
        assert!(run.logs.iter().any(|l| l.message == "fetching AAPL"));

        let events = recorder.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            TrainingEvent::RunFinished {
                stage: TrainingStage::Failed,
                error: Some(ErrorKind::DataUnavailable),
                ..
            }
        )));
    }

    #[test]
    fn test_stale_tracker_does_not_touch_new_run() {
        let (tracker, status, _) = setup();
        let replacement = TrainingRun::new(ModelType::Analytical, TriggerReason::Manual, Utc::now());
        status.send_replace(Some(replacement.clone()));

        tracker.log("late line");
        assert!(tracker.snapshot().is_none());
        assert_eq!(status.borrow().as_ref().unwrap().logs, replacement.logs);
    }
}
