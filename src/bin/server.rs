//! AutoTrainer Server - headless retraining service
//!
//! Runs the periodic training scheduler for every model type. Metrics are
//! pushed via structured JSON logs to stdout.
//!
//! # Usage
//! ```sh
//! MODE=mock OBSERVABILITY_INTERVAL=60 cargo run --bin server
//! ```
//!
//! # Environment Variables
//! - `MODE` - `mock` (synthetic bars) or `http` (default: mock)
//! - `OBSERVABILITY_ENABLED` - Enable metrics reporting (default: true)
//! - `OBSERVABILITY_INTERVAL` - Interval in seconds between metric outputs (default: 60)

use anyhow::Result;
use autotrainer::application::bootstrap::AutoTrainer;
use autotrainer::config::Config;
use autotrainer::domain::training::events::LoggingListener;
use autotrainer::infrastructure::observability::MetricsReporter;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false).pretty();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("AutoTrainer Server {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: Mode={:?}, Analytical symbols={}, Chatbot symbols={}, Threshold={}",
        config.mode,
        config.training.training_symbols.len(),
        config.training.chatbot_symbols.len(),
        config.training.deploy_accuracy_threshold
    );

    let trainer = AutoTrainer::build(&config).await?;
    trainer.events.subscribe(Arc::new(LoggingListener));

    let scheduler = trainer.scheduler();
    let handles = scheduler.start();
    info!("Training scheduler running ({} schedule(s)).", handles.len());

    if config.observability.enabled {
        let reporter = MetricsReporter::new(
            trainer.orchestrator.clone(),
            trainer.metrics.clone(),
            config.observability.interval_secs,
        );
        tokio::spawn(async move {
            reporter.run().await;
        });
        info!(
            "Metrics reporter started (interval: {}s)",
            config.observability.interval_secs
        );
    } else {
        info!("Metrics reporting disabled.");
    }

    info!("Server running. Press Ctrl+C to shutdown.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Cancelling active runs...");

    for handle in &handles {
        handle.abort();
    }
    for ack in trainer.orchestrator.cancel_all() {
        info!("Shutdown: {:?}", ack);
    }
    for model_type in autotrainer::domain::training::types::ModelType::ALL {
        trainer.orchestrator.wait_until_idle(model_type).await;
    }
    info!("Exiting.");

    Ok(())
}
