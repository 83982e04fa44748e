//! Service wiring
//!
//! Turns a [`Config`] into a ready orchestrator: provider and collector,
//! repositories, the active-model registry restored from storage, the
//! deployment gate and one schedule per model type.

pub mod persistence;
pub mod services;

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::application::ml::deployment_gate::{ActiveModelRegistry, DeploymentGate, GatePolicy};
use crate::application::ml::trainer::TrainerSettings;
use crate::application::training::orchestrator::{
    ModelProfile, OrchestratorSettings, TrainingOrchestrator,
};
use crate::application::training::scheduler::{Schedule, TrainingScheduler};
use crate::config::{Config, TrainingEnvConfig};
use crate::domain::ports::MarketDataProvider;
use crate::domain::training::types::ModelType;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::observability::Metrics;
use persistence::{PersistenceBootstrap, PersistenceHandle};
use services::ServicesBootstrap;

/// A fully wired training service
pub struct AutoTrainer {
    pub orchestrator: TrainingOrchestrator,
    pub registry: Arc<ActiveModelRegistry>,
    pub events: EventBus,
    pub metrics: Metrics,
    pub persistence: PersistenceHandle,
    schedules: Vec<Schedule>,
}

impl AutoTrainer {
    /// SQLite persistence and the provider selected by `MODE`
    pub async fn build(config: &Config) -> Result<Self> {
        let persistence = PersistenceBootstrap::init(&config.persistence).await?;
        let provider = ServicesBootstrap::market_data_provider(config);
        Self::build_with(config, persistence, provider).await
    }

    pub async fn build_with(
        config: &Config,
        persistence: PersistenceHandle,
        provider: Arc<dyn MarketDataProvider>,
    ) -> Result<Self> {
        let metrics = Metrics::new().context("Failed to register metrics")?;
        let events = EventBus::new();

        let registry = Arc::new(ActiveModelRegistry::new());
        let restored = registry
            .restore(persistence.artifact_repository.as_ref())
            .await
            .context("Failed to restore active models")?;
        for model_type in ModelType::ALL {
            if let Some(artifact) = registry.current_artifact(model_type) {
                metrics.set_active_accuracy(model_type.as_str(), artifact.accuracy);
            }
        }
        info!("AutoTrainer: Restored {} active model(s)", restored);

        let gate = Arc::new(DeploymentGate::new(
            Self::gate_policy(&config.training),
            registry.clone(),
            persistence.artifact_repository.clone(),
        ));

        let collector = ServicesBootstrap::data_collector(config, provider, metrics.clone());

        let orchestrator = TrainingOrchestrator::new(
            collector,
            gate,
            persistence.performance_repository.clone(),
            Self::profiles(&config.training),
            Self::orchestrator_settings(&config.training),
            events.clone(),
            Some(metrics.clone()),
        );

        Ok(Self {
            orchestrator,
            registry,
            events,
            metrics,
            persistence,
            schedules: Self::schedules(&config.training),
        })
    }

    /// Scheduler over the configured intervals; call `start` to spawn it
    pub fn scheduler(&self) -> TrainingScheduler {
        TrainingScheduler::new(self.orchestrator.clone(), self.schedules.clone())
    }

    pub fn gate_policy(training: &TrainingEnvConfig) -> GatePolicy {
        GatePolicy {
            accuracy_threshold: training.deploy_accuracy_threshold,
            regression_tolerance: training.regression_tolerance,
        }
    }

    pub fn trainer_settings(training: &TrainingEnvConfig) -> TrainerSettings {
        TrainerSettings {
            min_samples: training.min_training_samples,
            validation_split: training.validation_split,
            seed: training.random_seed,
            n_trees: training.n_trees,
            max_depth: training.max_depth,
            min_samples_split: training.min_split,
            window_size: training.feature_window,
            label_horizon: training.label_horizon,
        }
    }

    pub fn profiles(training: &TrainingEnvConfig) -> HashMap<ModelType, ModelProfile> {
        let trainer = Self::trainer_settings(training);
        HashMap::from([
            (
                ModelType::Analytical,
                ModelProfile {
                    symbols: training.training_symbols.clone(),
                    trainer: trainer.clone(),
                },
            ),
            (
                ModelType::Chatbot,
                ModelProfile {
                    symbols: training.chatbot_symbols.clone(),
                    trainer,
                },
            ),
        ])
    }

    pub fn orchestrator_settings(training: &TrainingEnvConfig) -> OrchestratorSettings {
        OrchestratorSettings {
            history_days: training.history_days,
            held_out_days: training.held_out_days,
            min_eval_samples: training.min_eval_samples,
            stage_timeout: Duration::from_secs(training.stage_timeout_secs),
            as_of: training.as_of,
        }
    }

    /// An interval of zero hours disables the schedule for that type
    pub fn schedules(training: &TrainingEnvConfig) -> Vec<Schedule> {
        [
            (ModelType::Analytical, training.analytical_interval_hours),
            (ModelType::Chatbot, training.chatbot_interval_hours),
        ]
        .into_iter()
        .filter(|(_, hours)| *hours > 0)
        .map(|(model_type, hours)| {
            Schedule::new(model_type, Duration::from_secs(hours.saturating_mul(3600)))
        })
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_use_per_type_universes() {
        let training = TrainingEnvConfig::default();
        let profiles = AutoTrainer::profiles(&training);

        assert_eq!(profiles[&ModelType::Analytical].symbols.len(), 44);
        assert_eq!(profiles[&ModelType::Chatbot].symbols.len(), 5);
        assert_eq!(profiles[&ModelType::Chatbot].trainer.window_size, 60);
    }

    #[test]
    fn test_zero_interval_disables_schedule() {
        let training = TrainingEnvConfig {
            chatbot_interval_hours: 0,
            ..Default::default()
        };
        let schedules = AutoTrainer::schedules(&training);

        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].model_type, ModelType::Analytical);
        assert_eq!(schedules[0].interval, Duration::from_secs(6 * 3600));
    }

    #[tokio::test]
    async fn test_build_with_in_memory_stores_starts_empty() {
        let config = Config::default();
        let provider = ServicesBootstrap::market_data_provider(&config);
        let trainer = AutoTrainer::build_with(&config, PersistenceBootstrap::in_memory(), provider)
            .await
            .unwrap();

        assert!(trainer.registry.current(ModelType::Analytical).is_none());
        assert!(trainer.orchestrator.get_status(ModelType::Chatbot).is_none());
        assert_eq!(trainer.scheduler().schedules().len(), 2);
    }
}
