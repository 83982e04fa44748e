use crate::application::ml::rate_limiter::RequestThrottler;
use crate::application::training::cancel::CancelToken;
use crate::domain::errors::{CollectionFailure, ProviderError, TrainingError};
use crate::domain::market::observation::{Observation, TimeRange};
use crate::domain::ports::{HistoryPage, MarketDataProvider};
use crate::domain::validation::data_quality::StrictObservationValidator;
use crate::infrastructure::observability::Metrics;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound on pages followed for one symbol
const MAX_PAGES: usize = 100;

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub request_timeout: Duration,
    /// Minimum fraction of requested symbols that must succeed
    pub min_coverage: f64,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            min_coverage: 0.5,
        }
    }
}

impl CollectorSettings {
    /// `base * 2^attempt`, capped
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_cap)
    }
}

/// Result of a collection batch: per-symbol series plus per-symbol failures
#[derive(Debug, Clone, Default)]
pub struct CollectionReport {
    pub observations: BTreeMap<String, Vec<Observation>>,
    pub failures: BTreeMap<String, CollectionFailure>,
    pub dropped_rows: usize,
    pub requested: usize,
}

impl CollectionReport {
    pub fn coverage(&self) -> f64 {
        if self.requested == 0 {
            0.0
        } else {
            self.observations.len() as f64 / self.requested as f64
        }
    }

    pub fn total_observations(&self) -> usize {
        self.observations.values().map(Vec::len).sum()
    }
}

/// Fetches, validates and normalizes historical bars for a symbol universe.
pub struct DataCollector {
    provider: Arc<dyn MarketDataProvider>,
    throttler: Arc<RequestThrottler>,
    settings: CollectorSettings,
    metrics: Option<Metrics>,
}

impl DataCollector {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        throttler: Arc<RequestThrottler>,
        settings: CollectorSettings,
    ) -> Self {
        Self {
            provider,
            throttler,
            settings,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }

    /// Collects `range` for every symbol, sequentially and under the request limiter.
    ///
    /// Per-symbol failures are recorded in the report. The batch only fails when
    /// cancelled or when coverage drops below `min_coverage`.
    pub async fn collect(
        &self,
        symbols: &[String],
        range: TimeRange,
        cancel: &CancelToken,
        mut progress: impl FnMut(usize, usize) + Send,
    ) -> Result<CollectionReport, TrainingError> {
        let unique: BTreeSet<&String> = symbols.iter().collect();
        let total = unique.len();
        let mut report = CollectionReport {
            requested: total,
            ..Default::default()
        };

        if total == 0 {
            return Err(TrainingError::DataUnavailable {
                reason: "no symbols requested".to_string(),
            });
        }

        info!(
            "DataCollector: Collecting {} symbols from {} ({} -> {})",
            total,
            self.provider.name(),
            range.start,
            range.end
        );

        for (done, symbol) in unique.into_iter().enumerate() {
            cancel.check()?;

            match self.fetch_series(symbol, range, cancel).await? {
                Ok(raw) => {
                    let raw_len = raw.len();
                    let series = StrictObservationValidator::validate_series(symbol, raw);
                    report.dropped_rows += series.dropped;

                    if series.observations.is_empty() {
                        warn!(
                            "DataCollector: {} returned no usable rows ({} fetched, {} dropped)",
                            symbol, raw_len, series.dropped
                        );
                        report.failures.insert(
                            symbol.clone(),
                            CollectionFailure::NoValidRows {
                                dropped: series.dropped,
                            },
                        );
                    } else {
                        if series.dropped > 0 {
                            info!(
                                "DataCollector: {} kept {}/{} rows after validation",
                                symbol,
                                series.observations.len(),
                                raw_len
                            );
                        }
                        report
                            .observations
                            .insert(symbol.clone(), series.observations);
                    }
                }
                Err(failure) => {
                    warn!("DataCollector: {} failed: {}", symbol, failure);
                    report.failures.insert(symbol.clone(), failure);
                }
            }

            progress(done + 1, total);
        }

        self.check_coverage(&report)?;

        info!(
            "DataCollector: Collected {} observations for {}/{} symbols ({} rows dropped, {}/{} requests in current window)",
            report.total_observations(),
            report.observations.len(),
            total,
            report.dropped_rows,
            self.throttler.calls_in_window().await,
            self.throttler.max_calls()
        );
        Ok(report)
    }

    fn check_coverage(&self, report: &CollectionReport) -> Result<(), TrainingError> {
        let coverage = report.coverage();
        if coverage >= self.settings.min_coverage && !report.observations.is_empty() {
            return Ok(());
        }

        let all_throttled = !report.failures.is_empty()
            && report
                .failures
                .values()
                .all(|f| matches!(f, CollectionFailure::RateLimited { .. }));

        if all_throttled {
            return Err(TrainingError::RateLimited {
                attempts: self.settings.max_retries + 1,
            });
        }

        Err(TrainingError::DataUnavailable {
            reason: format!(
                "only {}/{} symbols collected (coverage {:.0}% < {:.0}%)",
                report.observations.len(),
                report.requested,
                coverage * 100.0,
                self.settings.min_coverage * 100.0
            ),
        })
    }

    /// Every page of one symbol, oldest first. The outer error is reserved for cancellation.
    async fn fetch_series(
        &self,
        symbol: &str,
        range: TimeRange,
        cancel: &CancelToken,
    ) -> Result<Result<Vec<Observation>, CollectionFailure>, TrainingError> {
        let mut observations = Vec::new();
        let mut page_token: Option<String> = None;

        for page_number in 1..=MAX_PAGES {
            let page = match self
                .fetch_page_with_backoff(symbol, range, page_token.as_deref(), cancel)
                .await?
            {
                Ok(page) => page,
                Err(failure) => return Ok(Err(failure)),
            };
            observations.extend(page.observations);

            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
            if page_number == MAX_PAGES {
                warn!(
                    "DataCollector: {} still paginating after {} pages, keeping what was fetched",
                    symbol, MAX_PAGES
                );
            }
        }

        if observations.is_empty() {
            return Ok(Err(CollectionFailure::Provider(ProviderError::NotFound {
                symbol: symbol.to_string(),
            })));
        }

        observations.sort_by_key(|o| o.timestamp);
        Ok(Ok(observations))
    }

    /// One page request. Every attempt, retries included, draws its own permit.
    /// Throttling, transport errors and timeouts are retried with back-off.
    async fn fetch_page_with_backoff(
        &self,
        symbol: &str,
        range: TimeRange,
        page_token: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<Result<HistoryPage, CollectionFailure>, TrainingError> {
        let mut attempt: u32 = 0;

        loop {
            self.throttler.acquire(cancel).await?;

            let call = self.provider.fetch_page(symbol, range, page_token);
            let outcome = tokio::time::timeout(self.settings.request_timeout, call).await;

            let error = match outcome {
                Ok(Ok(page)) => {
                    self.record("ok");
                    debug!(
                        "DataCollector: {} returned {} rows (more pages: {})",
                        symbol,
                        page.observations.len(),
                        page.next_page_token.is_some()
                    );
                    return Ok(Ok(page));
                }
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Timeout {
                    duration_ms: self.settings.request_timeout.as_millis() as u64,
                },
            };

            let retry_after_secs = match &error {
                ProviderError::Throttled { retry_after_secs } => {
                    self.record("throttled");
                    *retry_after_secs
                }
                ProviderError::Transport { .. } => {
                    self.record("error");
                    None
                }
                ProviderError::Timeout { .. } => {
                    self.record("timeout");
                    None
                }
                ProviderError::NotFound { .. } => {
                    self.record("not_found");
                    return Ok(Err(error.into()));
                }
                ProviderError::Malformed { .. } => {
                    self.record("error");
                    return Ok(Err(error.into()));
                }
            };

            attempt += 1;
            if attempt > self.settings.max_retries {
                return Ok(Err(match error {
                    ProviderError::Throttled { .. } => {
                        CollectionFailure::RateLimited { attempts: attempt }
                    }
                    other => other.into(),
                }));
            }

            let mut delay = self.settings.backoff_delay(attempt - 1);
            if let Some(secs) = retry_after_secs {
                delay = delay
                    .max(Duration::from_secs(secs))
                    .min(self.settings.backoff_cap);
            }
            warn!(
                "DataCollector: {} failed ({}) on attempt {}/{}. Backing off {:?}",
                symbol, error, attempt, self.settings.max_retries, delay
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(TrainingError::Cancelled),
            }
        }
    }

    fn record(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_provider_requests(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyProvider {
        throttled_calls: AtomicUsize,
        throttle_first: usize,
        calls: AtomicUsize,
        missing: Vec<String>,
        seen: Mutex<Vec<String>>,
    }

    impl FlakyProvider {
        fn new(throttle_first: usize, missing: &[&str]) -> Self {
            Self {
                throttled_calls: AtomicUsize::new(0),
                throttle_first,
                calls: AtomicUsize::new(0),
                missing: missing.iter().map(|s| s.to_string()).collect(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MarketDataProvider for FlakyProvider {
        async fn fetch_page(
            &self,
            symbol: &str,
            range: TimeRange,
            _page_token: Option<&str>,
        ) -> Result<HistoryPage, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(symbol.to_string());

            if self.throttled_calls.fetch_add(1, Ordering::SeqCst) < self.throttle_first {
                return Err(ProviderError::Throttled {
                    retry_after_secs: None,
                });
            }
            if self.missing.iter().any(|m| m == symbol) {
                return Err(ProviderError::NotFound {
                    symbol: symbol.to_string(),
                });
            }

            Ok(HistoryPage::last(bars(symbol, range.start, 0..10)))
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn bars(symbol: &str, start: DateTime<Utc>, hours: std::ops::Range<i64>) -> Vec<Observation> {
        hours
            .map(|i| {
                let ts = start + ChronoDuration::hours(i);
                Observation::new(symbol, ts, 10.0, 11.0, 9.0, 10.5, 100.0)
            })
            .collect()
    }

    /// Serves `pages` pages of two bars each; fails the first `transport_failures` calls
    struct PagedProvider {
        pages: usize,
        transport_failures: usize,
        calls: AtomicUsize,
        tokens: Mutex<Vec<Option<String>>>,
    }

    impl PagedProvider {
        fn new(pages: usize, transport_failures: usize) -> Self {
            Self {
                pages,
                transport_failures,
                calls: AtomicUsize::new(0),
                tokens: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MarketDataProvider for PagedProvider {
        async fn fetch_page(
            &self,
            symbol: &str,
            range: TimeRange,
            page_token: Option<&str>,
        ) -> Result<HistoryPage, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.tokens
                .lock()
                .unwrap()
                .push(page_token.map(str::to_string));
            if call < self.transport_failures {
                return Err(ProviderError::Transport {
                    reason: "connection reset".to_string(),
                });
            }

            let page: usize = page_token.map_or(0, |t| t.parse().unwrap());
            let first = (page * 2) as i64;
            // Pages arrive newest first to exercise the final sort
            let mut observations = bars(symbol, range.start, first..first + 2);
            observations.reverse();
            Ok(HistoryPage {
                observations,
                next_page_token: (page + 1 < self.pages).then(|| (page + 1).to_string()),
            })
        }

        fn name(&self) -> &str {
            "paged"
        }
    }

    fn settings() -> CollectorSettings {
        CollectorSettings {
            max_retries: 2,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(5),
            request_timeout: Duration::from_secs(1),
            min_coverage: 0.5,
        }
    }

    fn range() -> TimeRange {
        let end = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        TimeRange::trailing_days(end, 5)
    }

    fn symbols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn collector(provider: Arc<FlakyProvider>) -> DataCollector {
        DataCollector::new(
            provider,
            Arc::new(RequestThrottler::with_window(1_000, Duration::from_secs(1))),
            settings(),
        )
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let s = CollectorSettings {
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(3),
            ..Default::default()
        };
        assert_eq!(s.backoff_delay(0), Duration::from_millis(500));
        assert_eq!(s.backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(s.backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(s.backoff_delay(3), Duration::from_secs(3));
        assert_eq!(s.backoff_delay(40), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_dedupes_and_reports_progress() {
        let provider = Arc::new(FlakyProvider::new(0, &[]));
        let collector = collector(provider.clone());
        let mut ticks = Vec::new();

        let report = collector
            .collect(
                &symbols(&["MSFT", "AAPL", "MSFT"]),
                range(),
                &CancelToken::new(),
                |done, total| ticks.push((done, total)),
            )
            .await
            .unwrap();

        assert_eq!(report.observations.len(), 2);
        assert_eq!(ticks, vec![(1, 2), (2, 2)]);
        assert_eq!(*provider.seen.lock().unwrap(), vec!["AAPL", "MSFT"]);
    }

    #[tokio::test]
    async fn test_throttled_call_is_retried() {
        let provider = Arc::new(FlakyProvider::new(2, &[]));
        let collector = collector(provider.clone());

        let report = collector
            .collect(&symbols(&["AAPL"]), range(), &CancelToken::new(), |_, _| {})
            .await
            .unwrap();

        assert_eq!(report.observations["AAPL"].len(), 10);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_persistent_throttling_ends_in_rate_limited() {
        let provider = Arc::new(FlakyProvider::new(usize::MAX, &[]));
        let collector = collector(provider.clone());

        let err = collector
            .collect(&symbols(&["AAPL"]), range(), &CancelToken::new(), |_, _| {})
            .await
            .unwrap_err();

        assert!(matches!(err, TrainingError::RateLimited { attempts: 3 }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_partial_failure_is_tolerated_above_coverage() {
        let provider = Arc::new(FlakyProvider::new(0, &["C"]));
        let collector = collector(provider);

        let report = collector
            .collect(&symbols(&["A", "B", "C"]), range(), &CancelToken::new(), |_, _| {})
            .await
            .unwrap();

        assert_eq!(report.observations.len(), 2);
        assert!(matches!(
            report.failures["C"],
            CollectionFailure::Provider(ProviderError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_symbol() {
        let provider = Arc::new(FlakyProvider::new(0, &[]));
        let collector = collector(provider.clone());
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = collector
            .collect(&symbols(&["AAPL"]), range(), &cancel, |_, _| {})
            .await
            .unwrap_err();

        assert!(matches!(err, TrainingError::Cancelled));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_every_page_draws_a_permit() {
        let provider = Arc::new(PagedProvider::new(3, 0));
        let window = Duration::from_millis(300);
        let collector = DataCollector::new(
            provider.clone(),
            Arc::new(RequestThrottler::with_window(2, window)),
            settings(),
        );

        let start = tokio::time::Instant::now();
        let report = collector
            .collect(&symbols(&["AAPL"]), range(), &CancelToken::new(), |_, _| {})
            .await
            .unwrap();

        // Third page must wait for the first permit to leave the window
        assert!(start.elapsed() >= window);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        let series = &report.observations["AAPL"];
        assert_eq!(series.len(), 6);
        assert!(series.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(
            *provider.tokens.lock().unwrap(),
            vec![None, Some("1".to_string()), Some("2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_transport_retries_draw_permits_and_resume_the_page() {
        let provider = Arc::new(PagedProvider::new(2, 1));
        let throttler = Arc::new(RequestThrottler::with_window(1_000, Duration::from_secs(60)));
        let collector = DataCollector::new(provider.clone(), throttler.clone(), settings());

        let report = collector
            .collect(&symbols(&["AAPL"]), range(), &CancelToken::new(), |_, _| {})
            .await
            .unwrap();

        assert_eq!(report.observations["AAPL"].len(), 4);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(throttler.calls_in_window().await, 3);
        assert_eq!(
            *provider.tokens.lock().unwrap(),
            vec![None, None, Some("1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_persistent_transport_failure_excludes_symbol() {
        let provider = Arc::new(PagedProvider::new(1, usize::MAX));
        let collector = DataCollector::new(
            provider.clone(),
            Arc::new(RequestThrottler::with_window(1_000, Duration::from_secs(1))),
            CollectorSettings {
                min_coverage: 0.0,
                ..settings()
            },
        );

        let err = collector
            .collect(&symbols(&["AAPL"]), range(), &CancelToken::new(), |_, _| {})
            .await
            .unwrap_err();

        assert!(matches!(err, TrainingError::DataUnavailable { .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }
}
