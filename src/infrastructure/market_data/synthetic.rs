use crate::domain::errors::ProviderError;
use crate::domain::market::observation::{Observation, TimeRange};
use crate::domain::ports::{HistoryPage, MarketDataProvider};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

/// Stable across runs and platforms, unlike `DefaultHasher`
fn symbol_hash(symbol: &str) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    symbol.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Deterministic random-walk bars for mock mode and tests.
///
/// Bars sit on a fixed grid anchored at the Unix epoch, so the same seed,
/// symbol and range always produce the same series. Returns carry a little
/// autocorrelation so a classifier has something to find.
pub struct SyntheticMarketDataProvider {
    seed: u64,
    bar_interval: Duration,
    momentum: f64,
    volatility: f64,
    drift: f64,
    regime_bars: i64,
    missing: HashSet<String>,
}

impl SyntheticMarketDataProvider {
    pub fn new(seed: u64, bar_interval_minutes: i64) -> Self {
        Self {
            seed,
            bar_interval: Duration::minutes(bar_interval_minutes.max(1)),
            momentum: 0.3,
            volatility: 0.015,
            drift: 0.0,
            regime_bars: 1,
            missing: HashSet::new(),
        }
    }

    /// Symbols answered with `NotFound`
    pub fn with_missing<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.missing.extend(symbols.into_iter().map(Into::into));
        self
    }

    pub fn with_dynamics(mut self, momentum: f64, volatility: f64) -> Self {
        self.momentum = momentum;
        self.volatility = volatility;
        self
    }

    /// Adds a per-bar drift whose sign flips every `regime_bars` grid bars.
    /// Each symbol's regimes are phase-shifted.
    pub fn with_trend(mut self, drift_per_bar: f64, regime_bars: i64) -> Self {
        self.drift = drift_per_bar;
        self.regime_bars = regime_bars.max(1);
        self
    }

    /// +1 or -1 for the bar at `ts`
    fn regime_sign(&self, ts: DateTime<Utc>, hash: u64) -> f64 {
        let bar_index = ts.timestamp().div_euclid(self.bar_interval.num_seconds());
        let phase = (hash % self.regime_bars as u64) as i64;
        if (bar_index + phase).div_euclid(self.regime_bars) % 2 == 0 {
            1.0
        } else {
            -1.0
        }
    }

    /// First grid point at or after `ts`
    fn align_up(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let step = self.bar_interval.num_seconds();
        let secs = ts.timestamp();
        let aligned = secs.div_euclid(step) * step;
        let aligned = if aligned < secs { aligned + step } else { aligned };
        DateTime::from_timestamp(aligned, 0).unwrap_or(ts)
    }

    pub fn generate(&self, symbol: &str, range: TimeRange) -> Vec<Observation> {
        let mut rng = StdRng::seed_from_u64(self.seed ^ symbol_hash(symbol));
        let hash = symbol_hash(symbol);
        let mut close = 20.0 + (hash % 480) as f64;
        let base_volume = 100_000.0 + (hash % 900_000) as f64;
        let mut last_return = 0.0;

        let mut bars = Vec::new();
        let mut ts = self.align_up(range.start);
        while ts < range.end {
            let noise: f64 = rng.random_range(-1.0..1.0);
            let ret = self.regime_sign(ts, hash) * self.drift
                + self.momentum * last_return
                + self.volatility * noise;
            let open = close;
            close = (open * (1.0 + ret)).max(0.01);

            let wick_up: f64 = rng.random_range(0.0..0.5);
            let wick_down: f64 = rng.random_range(0.0..0.5);
            let high = open.max(close) * (1.0 + self.volatility * wick_up);
            let low = open.min(close) * (1.0 - self.volatility * wick_down);
            let volume = base_volume * rng.random_range(0.5..1.5) * (1.0 + ret.abs() * 20.0);

            bars.push(Observation::new(symbol, ts, open, high, low, close, volume));
            last_return = ret;
            ts += self.bar_interval;
        }
        bars
    }
}

#[async_trait]
impl MarketDataProvider for SyntheticMarketDataProvider {
    /// The whole range in a single page
    async fn fetch_page(
        &self,
        symbol: &str,
        range: TimeRange,
        _page_token: Option<&str>,
    ) -> Result<HistoryPage, ProviderError> {
        if self.missing.contains(symbol) {
            return Err(ProviderError::NotFound {
                symbol: symbol.to_string(),
            });
        }
        Ok(HistoryPage::last(self.generate(symbol, range)))
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn range(days: i64) -> TimeRange {
        let end = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        TimeRange::trailing_days(end, days)
    }

    #[test]
    fn test_same_seed_same_series() {
        let a = SyntheticMarketDataProvider::new(7, 240).generate("AAPL", range(10));
        let b = SyntheticMarketDataProvider::new(7, 240).generate("AAPL", range(10));
        assert_eq!(a, b);
        assert_eq!(a.len(), 60);

        let other = SyntheticMarketDataProvider::new(8, 240).generate("AAPL", range(10));
        assert_ne!(a, other);
    }

    #[test]
    fn test_bars_are_consistent_and_on_grid() {
        let bars = SyntheticMarketDataProvider::new(1, 60).generate("MSFT", range(3));
        for bar in &bars {
            assert!(bar.high >= bar.open.max(bar.close));
            assert!(bar.low <= bar.open.min(bar.close));
            assert!(bar.low > 0.0);
            assert_eq!(bar.timestamp.timestamp() % 3600, 0);
        }
        assert!(bars.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn test_missing_symbol_is_not_found() {
        let provider = SyntheticMarketDataProvider::new(1, 1440).with_missing(["GONE"]);
        let err = provider.fetch_page("GONE", range(30), None).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { .. }));

        let page = provider.fetch_page("AAPL", range(30), None).await.unwrap();
        assert_eq!(page.observations.len(), 30);
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn test_trend_alternates_between_regimes() {
        let provider = SyntheticMarketDataProvider::new(3, 240)
            .with_dynamics(0.0, 0.002)
            .with_trend(0.01, 30);
        let bars = provider.generate("TRND", range(60));
        let returns: Vec<f64> = bars.iter().map(|b| b.close / b.open - 1.0).collect();

        // Noise never outweighs the drift, so every bar moves with its regime
        assert!(returns.iter().all(|r| r.abs() > 0.007));
        let up = returns.iter().filter(|r| **r > 0.0).count();
        let flips = returns
            .windows(2)
            .filter(|w| w[0].signum() != w[1].signum())
            .count();
        assert!(up > 0 && up < returns.len());
        // 360 bars over 30-bar regimes
        assert!((11..=12).contains(&flips), "flips = {}", flips);
    }
}
