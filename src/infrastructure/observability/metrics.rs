//! Prometheus metrics definitions for the training service
//!
//! All metrics use the `autotrainer_` prefix and are read-only.

use prometheus::{
    CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGaugeVec},
};
use std::sync::Arc;

/// Prometheus metrics for the training pipeline
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Finished runs by model type and outcome (completed/failed/cancelled)
    pub runs_total: CounterVec,
    /// Progress of the current run per model type
    pub training_progress_percent: GenericGaugeVec<AtomicF64>,
    /// Held-out accuracy of the active model per model type
    pub active_model_accuracy: GenericGaugeVec<AtomicF64>,
    /// Market data requests by outcome
    pub provider_requests_total: CounterVec,
    /// Stage durations in seconds
    pub stage_duration_seconds: HistogramVec,
}

impl Metrics {
    /// Create a new Metrics instance with all gauges and counters registered
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let runs_total = CounterVec::new(
            Opts::new(
                "autotrainer_runs_total",
                "Finished training runs by model type and outcome",
            ),
            &["model_type", "outcome"],
        )?;
        registry.register(Box::new(runs_total.clone()))?;

        let training_progress_percent = GaugeVec::new(
            Opts::new(
                "autotrainer_training_progress_percent",
                "Progress of the current training run (0-100)",
            ),
            &["model_type"],
        )?;
        registry.register(Box::new(training_progress_percent.clone()))?;

        let active_model_accuracy = GaugeVec::new(
            Opts::new(
                "autotrainer_active_model_accuracy",
                "Held-out accuracy of the active model (0-1)",
            ),
            &["model_type"],
        )?;
        registry.register(Box::new(active_model_accuracy.clone()))?;

        let provider_requests_total = CounterVec::new(
            Opts::new(
                "autotrainer_provider_requests_total",
                "Market data provider requests by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(provider_requests_total.clone()))?;

        let stage_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "autotrainer_stage_duration_seconds",
                "Training stage duration in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 1800.0]),
            &["stage"],
        )?;
        registry.register(Box::new(stage_duration_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            runs_total,
            training_progress_percent,
            active_model_accuracy,
            provider_requests_total,
            stage_duration_seconds,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    /// Count a finished run
    pub fn inc_runs(&self, model_type: &str, outcome: &str) {
        self.runs_total
            .with_label_values(&[model_type, outcome])
            .inc();
    }

    pub fn set_progress(&self, model_type: &str, percent: f64) {
        self.training_progress_percent
            .with_label_values(&[model_type])
            .set(percent);
    }

    pub fn set_active_accuracy(&self, model_type: &str, accuracy: f64) {
        self.active_model_accuracy
            .with_label_values(&[model_type])
            .set(accuracy);
    }

    /// Count a provider request outcome (ok, throttled, not_found, error, timeout)
    pub fn inc_provider_requests(&self, outcome: &str) {
        self.provider_requests_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn observe_stage_duration(&self, stage: &str, seconds: f64) {
        self.stage_duration_seconds
            .with_label_values(&[stage])
            .observe(seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert!(metrics.is_ok());
    }

    #[test]
    fn test_metrics_render() {
        let metrics = Metrics::new().unwrap();
        metrics.inc_runs("analytical", "completed");
        metrics.set_active_accuracy("analytical", 0.81);

        let output = metrics.render();
        assert!(output.contains("autotrainer_runs_total"));
        assert!(output.contains("autotrainer_active_model_accuracy"));
    }
}
