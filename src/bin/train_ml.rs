//! One-off training run from the command line
//!
//! Triggers a single manual run for one model type, waits for it to finish and
//! prints the final run snapshot, model status and stored versions as JSON.
//! Optionally dumps the engineered feature matrix to CSV for offline inspection;
//! the run then trains on the bars collected for the export instead of fetching again.
//!
//! # Usage
//! ```sh
//! cargo run --bin train_ml -- analytical --symbols AAPL,MSFT --as-of 2024-06-01
//! cargo run --bin train_ml -- chatbot --persist --export-features data/ml/features.csv
//! ```

use anyhow::{Context, Result};
use autotrainer::application::bootstrap::AutoTrainer;
use autotrainer::application::bootstrap::persistence::PersistenceBootstrap;
use autotrainer::application::bootstrap::services::ServicesBootstrap;
use autotrainer::application::ml::feature_engine::FeatureEngine;
use autotrainer::application::training::cancel::CancelToken;
use autotrainer::config::Config;
use autotrainer::domain::market::observation::{Observation, TimeRange};
use autotrainer::domain::ml::feature_registry::{FeatureVector, feature_names};
use autotrainer::domain::ml::model::ModelSummary;
use autotrainer::domain::ports::MarketDataProvider;
use autotrainer::domain::repositories::ModelArtifactRepository;
use autotrainer::domain::training::events::LoggingListener;
use autotrainer::domain::training::types::{ModelType, TrainingStage, TriggerReason};
use autotrainer::infrastructure::market_data::ReplayMarketDataProvider;
use chrono::{DateTime, NaiveDate, Utc};
use clap::Parser;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model type to train (analytical or chatbot)
    model_type: String,

    /// Comma-separated symbols overriding the configured universe
    #[arg(long, value_delimiter = ',')]
    symbols: Vec<String>,

    /// End of the collected range (RFC 3339 or YYYY-MM-DD); defaults to now
    #[arg(long)]
    as_of: Option<String>,

    /// Days of history to collect
    #[arg(long)]
    history_days: Option<i64>,

    /// Minimum held-out accuracy required to deploy
    #[arg(long)]
    threshold: Option<f64>,

    /// Store artifacts in DATABASE_URL instead of memory
    #[arg(long)]
    persist: bool,

    /// Write the engineered feature matrix to this CSV path before training
    #[arg(long)]
    export_features: Option<PathBuf>,
}

#[derive(Serialize)]
struct RunOutput<T: Serialize, S: Serialize> {
    run: T,
    model: S,
    versions: Vec<ModelSummary>,
}

fn parse_as_of(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("Invalid --as-of value: {}", raw))?;
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .context("Invalid --as-of date")
}

fn write_features_csv(path: &Path, vectors: &[FeatureVector]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create export directory")?;
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut header = vec!["symbol".to_string(), "timestamp".to_string()];
    header.extend(feature_names().into_iter().map(str::to_string));
    header.push("label".to_string());
    writer.write_record(&header)?;

    for vector in vectors {
        let mut record = Vec::with_capacity(header.len());
        record.push(vector.symbol.clone());
        record.push(vector.timestamp.to_rfc3339());
        record.extend(vector.features.iter().map(|v| v.to_string()));
        record.push(
            vector
                .label
                .map(|l| l.class_id().to_string())
                .unwrap_or_default(),
        );
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Collects once, writes the feature CSV and returns the bars for the run to reuse
async fn export_features(
    config: &Config,
    symbols: &[String],
    as_of: DateTime<Utc>,
    path: &Path,
) -> Result<BTreeMap<String, Vec<Observation>>> {
    let training = &config.training;
    let provider = ServicesBootstrap::market_data_provider(config);
    let metrics = autotrainer::infrastructure::observability::Metrics::new()?;
    let collector = ServicesBootstrap::data_collector(config, provider, metrics);

    let range = TimeRange::trailing_days(as_of, training.history_days);
    let report = collector
        .collect(symbols, range, &CancelToken::new(), |done, total| {
            info!("Export: collected {}/{} symbols", done, total);
        })
        .await?;

    let engine = FeatureEngine::new(training.feature_window);
    let vectors = engine.compute_for_symbols(&report.observations, training.label_horizon);
    write_features_csv(path, &vectors)?;

    info!(
        "Export: wrote {} feature rows for {} symbols to {}",
        vectors.len(),
        report.observations.len(),
        path.display()
    );
    Ok(report.observations)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args = Args::parse();
    let model_type = ModelType::from_str(&args.model_type)?;

    let mut config = Config::from_env()?;
    if !args.symbols.is_empty() {
        let symbols: Vec<String> = args
            .symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        match model_type {
            ModelType::Analytical => config.training.training_symbols = symbols,
            ModelType::Chatbot => config.training.chatbot_symbols = symbols,
        }
    }
    if let Some(days) = args.history_days {
        config.training.history_days = days;
    }
    if let Some(threshold) = args.threshold {
        config.training.deploy_accuracy_threshold = threshold;
    }
    config.training.validate()?;

    if let Some(raw) = args.as_of.as_deref() {
        config.training.as_of = Some(parse_as_of(raw)?);
    }

    let provider: Arc<dyn MarketDataProvider> = match &args.export_features {
        Some(path) => {
            let symbols = match model_type {
                ModelType::Analytical => config.training.training_symbols.clone(),
                ModelType::Chatbot => config.training.chatbot_symbols.clone(),
            };
            // Pin the run to the exported range so the replay covers it exactly
            let as_of = config.training.as_of.unwrap_or_else(Utc::now);
            config.training.as_of = Some(as_of);
            let collected = export_features(&config, &symbols, as_of, path).await?;

            let replay = ReplayMarketDataProvider::new(collected);
            info!("train_ml: Training on {} exported series", replay.symbols());
            config.provider.calls_per_minute = u32::MAX;
            Arc::new(replay)
        }
        None => ServicesBootstrap::market_data_provider(&config),
    };

    let persistence = if args.persist {
        PersistenceBootstrap::init(&config.persistence).await?
    } else {
        PersistenceBootstrap::in_memory()
    };

    let trainer = AutoTrainer::build_with(&config, persistence, provider).await?;
    trainer.events.subscribe(Arc::new(LoggingListener));

    let run_id = trainer
        .orchestrator
        .trigger_training(model_type, TriggerReason::Manual)?;
    info!("train_ml: Started {} run {}", model_type, run_id);

    tokio::select! {
        _ = trainer.orchestrator.wait_until_idle(model_type) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("train_ml: Interrupted, cancelling run {}", run_id);
            trainer.orchestrator.cancel_training(model_type);
            trainer.orchestrator.wait_until_idle(model_type).await;
        }
    }

    let run = trainer
        .orchestrator
        .get_status(model_type)
        .context("Run snapshot disappeared")?;
    let model = trainer.orchestrator.get_model_status(model_type).await?;
    let versions = trainer
        .persistence
        .artifact_repository
        .list_versions(model_type)
        .await?
        .iter()
        .map(ModelSummary::from)
        .collect();
    let failed = run.stage != TrainingStage::Completed;

    println!(
        "{}",
        serde_json::to_string_pretty(&RunOutput {
            run,
            model,
            versions
        })?
    );

    if failed {
        anyhow::bail!("Training run {} did not complete", run_id);
    }
    Ok(())
}
