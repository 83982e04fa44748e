use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::application::ml::data_collector::{CollectorSettings, DataCollector};
use crate::application::ml::rate_limiter::RequestThrottler;
use crate::config::{Config, Mode};
use crate::domain::ports::MarketDataProvider;
use crate::infrastructure::market_data::{HttpMarketDataProvider, SyntheticMarketDataProvider};
use crate::infrastructure::observability::Metrics;

pub struct ServicesBootstrap;

impl ServicesBootstrap {
    /// Synthetic bars in mock mode, the HTTP provider otherwise
    pub fn market_data_provider(config: &Config) -> Arc<dyn MarketDataProvider> {
        let provider = &config.provider;
        match config.mode {
            Mode::Mock => {
                info!(
                    "ServicesBootstrap: Using synthetic market data (seed {}, {}m bars)",
                    provider.synthetic_seed, provider.bar_interval_minutes
                );
                Arc::new(SyntheticMarketDataProvider::new(
                    provider.synthetic_seed,
                    provider.bar_interval_minutes,
                ))
            }
            Mode::Http => {
                info!(
                    "ServicesBootstrap: Using HTTP market data at {} ({}m bars)",
                    provider.base_url, provider.bar_interval_minutes
                );
                // Middleware retries off: every upstream request must pass the collector's limiter
                Arc::new(HttpMarketDataProvider::new(
                    provider.base_url.clone(),
                    provider.api_key.clone(),
                    provider.api_secret.clone(),
                    provider.bar_interval_minutes,
                    Duration::from_secs(provider.timeout_secs),
                    0,
                ))
            }
        }
    }

    pub fn collector_settings(config: &Config) -> CollectorSettings {
        CollectorSettings {
            max_retries: config.provider.max_retries,
            backoff_base: Duration::from_millis(config.provider.backoff_base_ms),
            request_timeout: Duration::from_secs(config.provider.timeout_secs),
            min_coverage: config.training.min_coverage,
            ..CollectorSettings::default()
        }
    }

    pub fn data_collector(
        config: &Config,
        provider: Arc<dyn MarketDataProvider>,
        metrics: Metrics,
    ) -> Arc<DataCollector> {
        let throttler = Arc::new(RequestThrottler::new(config.provider.calls_per_minute));
        Arc::new(
            DataCollector::new(provider, throttler, Self::collector_settings(config))
                .with_metrics(metrics),
        )
    }
}
