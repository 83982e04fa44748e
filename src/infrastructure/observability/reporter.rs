//! Push-based metrics reporter for AutoTrainer
//!
//! Periodically outputs training status as structured JSON to stdout.
//!
//! **Security**: This system only SENDS data, never accepts requests.

use crate::application::training::orchestrator::TrainingOrchestrator;
use crate::domain::ml::model::{ModelSummary, PerformanceRecord};
use crate::domain::training::run::TrainingRunSnapshot;
use crate::domain::training::types::ModelType;
use crate::infrastructure::observability::metrics::Metrics;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Metrics snapshot for JSON output
#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub models: Vec<ModelSnapshot>,
}

#[derive(Serialize)]
pub struct ModelSnapshot {
    pub model_type: ModelType,
    pub active: Option<ModelSummary>,
    pub training_count: usize,
    pub best_accuracy: Option<f64>,
    /// Most recent evaluated run, deployed or not
    pub latest: Option<PerformanceRecord>,
    pub run: Option<TrainingRunSnapshot>,
}

/// Push-based metrics reporter
///
/// Outputs metrics as structured JSON logs on a configurable interval.
/// No HTTP server, no incoming connections - only outbound data.
pub struct MetricsReporter {
    orchestrator: TrainingOrchestrator,
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(orchestrator: TrainingOrchestrator, metrics: Metrics, interval_seconds: u64) -> Self {
        Self {
            orchestrator,
            metrics,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_seconds),
        }
    }

    /// Run the reporter in a loop, outputting metrics periodically
    pub async fn run(self) {
        info!(
            "MetricsReporter: Starting push-based metrics (interval: {:?})",
            self.interval
        );

        loop {
            tokio::time::sleep(self.interval).await;

            let snapshot = self.collect_snapshot().await;
            match serde_json::to_string(&snapshot) {
                Ok(json) => {
                    // Prefixed so log shippers can filter it
                    println!("METRICS_JSON:{}", json);
                    for model in &snapshot.models {
                        info!(
                            "MetricsReporter: {} | active: {} | runs: {} | stage: {}",
                            model.model_type,
                            model
                                .active
                                .as_ref()
                                .map(|a| format!(
                                    "{} (acc {:.3}, f1 {:.3}, fit {:.1}s)",
                                    a.version, a.accuracy, a.f1_score, a.training_time_secs
                                ))
                                .unwrap_or_else(|| "none".to_string()),
                            model.training_count,
                            model
                                .run
                                .as_ref()
                                .map(|r| r.stage.to_string())
                                .unwrap_or_else(|| "idle".to_string()),
                        );
                    }
                }
                Err(e) => warn!("MetricsReporter: Failed to serialize metrics: {}", e),
            }
        }
    }

    async fn collect_snapshot(&self) -> MetricsSnapshot {
        let mut models = Vec::with_capacity(ModelType::ALL.len());

        for model_type in ModelType::ALL {
            let run = self.orchestrator.get_status(model_type);
            let progress = run
                .as_ref()
                .filter(|r| !r.stage.is_terminal())
                .map_or(0.0, |r| r.progress_percent);
            self.metrics.set_progress(model_type.as_str(), progress);

            match self.orchestrator.get_model_status(model_type).await {
                Ok(status) => models.push(ModelSnapshot {
                    model_type,
                    active: status.active,
                    training_count: status.training_count,
                    best_accuracy: status.best_accuracy,
                    latest: status.history.last().cloned(),
                    run,
                }),
                Err(e) => {
                    warn!(
                        "MetricsReporter: Failed to read {} model status: {}",
                        model_type, e
                    );
                    models.push(ModelSnapshot {
                        model_type,
                        active: None,
                        training_count: 0,
                        best_accuracy: None,
                        latest: None,
                        run,
                    });
                }
            }
        }

        MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            models,
        }
    }
}
