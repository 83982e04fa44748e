use crate::domain::errors::ProviderError;
use crate::domain::market::observation::{Observation, TimeRange};
use crate::domain::ports::{HistoryPage, MarketDataProvider};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Serves bars that were already collected, so a run can reuse them without
/// going back to the upstream provider.
pub struct ReplayMarketDataProvider {
    series: BTreeMap<String, Vec<Observation>>,
}

impl ReplayMarketDataProvider {
    pub fn new(series: BTreeMap<String, Vec<Observation>>) -> Self {
        Self { series }
    }

    pub fn symbols(&self) -> usize {
        self.series.len()
    }
}

#[async_trait]
impl MarketDataProvider for ReplayMarketDataProvider {
    /// Stored bars inside `range`, in a single page
    async fn fetch_page(
        &self,
        symbol: &str,
        range: TimeRange,
        _page_token: Option<&str>,
    ) -> Result<HistoryPage, ProviderError> {
        let stored = self
            .series
            .get(symbol)
            .ok_or_else(|| ProviderError::NotFound {
                symbol: symbol.to_string(),
            })?;

        Ok(HistoryPage::last(
            stored
                .iter()
                .filter(|o| o.timestamp >= range.start && o.timestamp < range.end)
                .cloned()
                .collect(),
        ))
    }

    fn name(&self) -> &str {
        "replay"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    #[tokio::test]
    async fn test_replays_stored_bars_inside_range() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars: Vec<Observation> = (0..10)
            .map(|i| {
                Observation::new("AAPL", start + Duration::days(i), 1.0, 1.2, 0.9, 1.1, 50.0)
            })
            .collect();
        let provider =
            ReplayMarketDataProvider::new(BTreeMap::from([("AAPL".to_string(), bars.clone())]));

        let range = TimeRange::new(start + Duration::days(2), start + Duration::days(5));
        let page = provider.fetch_page("AAPL", range, None).await.unwrap();
        assert_eq!(page.observations, bars[2..5].to_vec());
        assert!(page.next_page_token.is_none());

        let err = provider.fetch_page("MSFT", range, None).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { .. }));
        assert_eq!(provider.symbols(), 1);
    }
}
