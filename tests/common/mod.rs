#![allow(dead_code)]

use async_trait::async_trait;
use autotrainer::application::bootstrap::AutoTrainer;
use autotrainer::application::bootstrap::persistence::PersistenceHandle;
use autotrainer::config::Config;
use autotrainer::domain::errors::ProviderError;
use autotrainer::domain::market::observation::TimeRange;
use autotrainer::domain::ports::{HistoryPage, MarketDataProvider};
use autotrainer::domain::training::run::TrainingRun;
use autotrainer::domain::training::types::ModelType;
use autotrainer::infrastructure::market_data::SyntheticMarketDataProvider;
use autotrainer::infrastructure::repositories::{
    InMemoryModelArtifactRepository, InMemoryPerformanceRecordRepository,
};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

pub fn as_of() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

pub fn symbols(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("SYM{}", i)).collect()
}

/// Synthetic bars behind an adjustable per-request delay
pub struct ScriptedProvider {
    inner: SyntheticMarketDataProvider,
    delay_ms: AtomicU64,
    pub calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(inner: SyntheticMarketDataProvider) -> Self {
        Self {
            inner,
            delay_ms: AtomicU64::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl MarketDataProvider for ScriptedProvider {
    async fn fetch_page(
        &self,
        symbol: &str,
        range: TimeRange,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.inner.fetch_page(symbol, range, page_token).await
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Small, fast configuration: 60 days of 4h bars, shallow forests
pub fn test_config(symbol_count: usize, threshold: f64) -> Config {
    let mut config = Config::default();
    config.provider.calls_per_minute = 10_000;
    config.provider.backoff_base_ms = 1;
    config.provider.bar_interval_minutes = 240;

    let training = &mut config.training;
    training.training_symbols = symbols(symbol_count);
    training.chatbot_symbols = symbols(symbol_count);
    training.history_days = 60;
    training.held_out_days = 10;
    training.feature_window = 60;
    training.label_horizon = 5;
    training.min_training_samples = 100;
    training.min_eval_samples = 5;
    training.n_trees = 8;
    training.max_depth = 6;
    training.deploy_accuracy_threshold = threshold;
    training.as_of = Some(as_of());
    config
}

pub struct Harness {
    pub trainer: AutoTrainer,
    pub provider: Arc<ScriptedProvider>,
    pub artifacts: Arc<InMemoryModelArtifactRepository>,
    pub performance: Arc<InMemoryPerformanceRecordRepository>,
}

pub async fn harness(config: &Config, missing: &[&str]) -> Harness {
    let synthetic = SyntheticMarketDataProvider::new(7, config.provider.bar_interval_minutes)
        .with_missing(missing.iter().copied());
    harness_with(config, synthetic).await
}

pub async fn harness_with(config: &Config, synthetic: SyntheticMarketDataProvider) -> Harness {
    let provider = Arc::new(ScriptedProvider::new(synthetic));
    let artifacts = Arc::new(InMemoryModelArtifactRepository::new());
    let performance = Arc::new(InMemoryPerformanceRecordRepository::new());

    let persistence = PersistenceHandle {
        db: None,
        artifact_repository: artifacts.clone(),
        performance_repository: performance.clone(),
    };
    let trainer = AutoTrainer::build_with(config, persistence, provider.clone())
        .await
        .expect("trainer builds");

    Harness {
        trainer,
        provider,
        artifacts,
        performance,
    }
}

impl Harness {
    /// Waits (bounded) until the run of `model_type` is terminal
    pub async fn finish(&self, model_type: ModelType) -> TrainingRun {
        tokio::time::timeout(
            Duration::from_secs(120),
            self.trainer.orchestrator.wait_until_idle(model_type),
        )
        .await
        .expect("run finishes in time")
        .expect("run snapshot present")
    }

    /// Waits until the current run has reached `predicate`
    pub async fn wait_for_run(&self, model_type: ModelType, predicate: impl Fn(&TrainingRun) -> bool) {
        let mut rx = self.trainer.orchestrator.subscribe_status(model_type);
        tokio::time::timeout(
            Duration::from_secs(30),
            rx.wait_for(|cell| cell.as_ref().is_some_and(&predicate)),
        )
        .await
        .expect("condition reached in time")
        .expect("status channel open");
    }
}
