use crate::domain::training::types::TrainingStage;
use std::collections::HashMap;

/// Progress band `[start, end]` (percent) covered by a working stage
pub fn stage_band(stage: TrainingStage) -> Option<(f64, f64)> {
    match stage {
        TrainingStage::Collecting => Some((0.0, 30.0)),
        TrainingStage::EngineeringFeatures => Some((30.0, 50.0)),
        TrainingStage::Training => Some((50.0, 80.0)),
        TrainingStage::Validating => Some((80.0, 90.0)),
        TrainingStage::Deploying => Some((90.0, 100.0)),
        _ => None,
    }
}

/// Overall percent for `fraction` (0..=1) of the way through `stage`
pub fn progress_within(stage: TrainingStage, fraction: f64) -> Option<f64> {
    let (start, end) = stage_band(stage)?;
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    Some(start + (end - start) * fraction)
}

/// Running average of stage durations observed in completed runs
#[derive(Debug, Clone, Default)]
pub struct StageHistory {
    totals: HashMap<TrainingStage, (f64, u32)>,
}

impl StageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stage: TrainingStage, duration_secs: f64) {
        if !duration_secs.is_finite() || duration_secs < 0.0 {
            return;
        }
        let entry = self.totals.entry(stage).or_insert((0.0, 0));
        entry.0 += duration_secs;
        entry.1 += 1;
    }

    pub fn average(&self, stage: TrainingStage) -> Option<f64> {
        self.totals
            .get(&stage)
            .filter(|(_, n)| *n > 0)
            .map(|(total, n)| total / *n as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }

    /// Seconds remaining for a run in `stage`, `elapsed_in_stage` seconds in.
    ///
    /// The current stage's expected duration comes from `elapsed / fraction` when the
    /// intra-stage fraction is known, else from history. Later stages add their averages.
    /// Returns 0 without history, and never a negative or non-finite value.
    pub fn estimate_remaining(
        &self,
        stage: TrainingStage,
        elapsed_in_stage: f64,
        fraction: Option<f64>,
    ) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let Some(index) = stage.pipeline_index() else {
            return 0.0;
        };

        let expected_current = match fraction {
            Some(f) if f > 0.0 && f.is_finite() => elapsed_in_stage / f.min(1.0),
            _ => self.average(stage).unwrap_or(elapsed_in_stage),
        };
        let current_remaining = (expected_current - elapsed_in_stage).max(0.0);

        let later: f64 = TrainingStage::PIPELINE[index + 1..]
            .iter()
            .filter_map(|s| self.average(*s))
            .sum();

        let eta = current_remaining + later;
        if eta.is_finite() { eta.max(0.0) } else { 0.0 }
    }
}
