use crate::domain::errors::ProviderError;
use crate::domain::market::observation::{Observation, TimeRange};
use async_trait::async_trait;

pub use crate::domain::training::events::TrainingEventListener;

/// One provider response. `next_page_token` is `None` on the last page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryPage {
    pub observations: Vec<Observation>,
    pub next_page_token: Option<String>,
}

impl HistoryPage {
    pub fn last(observations: Vec<Observation>) -> Self {
        Self {
            observations,
            next_page_token: None,
        }
    }
}

// Need async_trait for async functions in traits
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// One page of historical bars for `symbol` inside `range`.
    /// Each call is exactly one upstream request; callers follow `next_page_token`.
    async fn fetch_page(
        &self,
        symbol: &str,
        range: TimeRange,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, ProviderError>;

    fn name(&self) -> &str;
}
