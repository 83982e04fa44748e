use crate::application::training::orchestrator::TrainingOrchestrator;
use crate::domain::errors::TrainingError;
use crate::domain::training::types::{ModelType, TriggerReason};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Periodic retraining for one model type
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Schedule {
    pub model_type: ModelType,
    pub interval: Duration,
}

impl Schedule {
    pub fn new(model_type: ModelType, interval: Duration) -> Self {
        Self {
            model_type,
            interval,
        }
    }

    /// Next fire time: last finish plus the interval, or immediately with no history
    pub fn next_fire(&self, last_finished: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
        match last_finished {
            Some(last) => {
                let interval = chrono::Duration::from_std(self.interval)
                    .unwrap_or_else(|_| chrono::Duration::hours(6));
                last + interval
            }
            None => now,
        }
    }

    /// Time to sleep from `now` until the next fire
    pub fn delay_until_next(&self, last_finished: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
        (self.next_fire(last_finished, now) - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Timer loop per model type. Fires that find a run in progress are skipped.
pub struct TrainingScheduler {
    orchestrator: TrainingOrchestrator,
    schedules: Vec<Schedule>,
}

impl TrainingScheduler {
    pub fn new(orchestrator: TrainingOrchestrator, schedules: Vec<Schedule>) -> Self {
        Self {
            orchestrator,
            schedules,
        }
    }

    pub fn schedules(&self) -> &[Schedule] {
        &self.schedules
    }

    /// Spawns one loop per schedule
    pub fn start(self) -> Vec<JoinHandle<()>> {
        self.schedules
            .into_iter()
            .map(|schedule| {
                let orchestrator = self.orchestrator.clone();
                tokio::spawn(run_schedule(orchestrator, schedule))
            })
            .collect()
    }
}

async fn run_schedule(orchestrator: TrainingOrchestrator, schedule: Schedule) {
    info!(
        "TrainingScheduler: {} every {:?}",
        schedule.model_type, schedule.interval
    );

    loop {
        let last = orchestrator.last_finished(schedule.model_type).await;
        let delay = schedule.delay_until_next(last, Utc::now());
        if !delay.is_zero() {
            info!(
                "TrainingScheduler: Next {} run in {}s",
                schedule.model_type,
                delay.as_secs()
            );
            tokio::time::sleep(delay).await;
        }

        match orchestrator.trigger_training(schedule.model_type, TriggerReason::Scheduled) {
            Ok(run_id) => {
                info!(
                    "TrainingScheduler: Started scheduled {} run {}",
                    schedule.model_type, run_id
                );
                orchestrator.wait_until_idle(schedule.model_type).await;
            }
            Err(TrainingError::AlreadyRunning { run_id, .. }) => {
                warn!(
                    "TrainingScheduler: Skipping scheduled {} run, {} still in progress",
                    schedule.model_type, run_id
                );
                orchestrator.wait_until_idle(schedule.model_type).await;
            }
            Err(e) => {
                warn!(
                    "TrainingScheduler: Could not start scheduled {} run: {}",
                    schedule.model_type, e
                );
                tokio::time::sleep(schedule.interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_next_fire_from_last_finish() {
        let schedule = Schedule::new(ModelType::Analytical, Duration::from_secs(6 * 3600));
        let last = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        assert_eq!(
            schedule.next_fire(Some(last), now),
            Utc.with_ymd_and_hms(2024, 3, 1, 16, 0, 0).unwrap()
        );
        assert_eq!(
            schedule.delay_until_next(Some(last), now),
            Duration::from_secs(4 * 3600)
        );
    }

    #[test]
    fn test_overdue_and_first_runs_fire_immediately() {
        let schedule = Schedule::new(ModelType::Chatbot, Duration::from_secs(12 * 3600));
        let now = Utc.with_ymd_and_hms(2024, 3, 2, 12, 0, 0).unwrap();
        let long_ago = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        assert_eq!(schedule.next_fire(None, now), now);
        assert_eq!(schedule.delay_until_next(None, now), Duration::ZERO);
        assert_eq!(schedule.delay_until_next(Some(long_ago), now), Duration::ZERO);
    }
}
