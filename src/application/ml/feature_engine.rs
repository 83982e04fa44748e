use crate::application::ml::indicators::{
    ManualAdx, annualized_volatility, bars_since_extreme, calculate_hurst_exponent, mean,
    simple_returns, trend_fit,
};
use crate::domain::market::observation::Observation;
use crate::domain::ml::feature_registry::{
    FEATURE_COUNT, FEATURE_SCHEMA, FeatureFamily, FeatureVector, family_defaults, family_range,
};
use crate::domain::ml::label::Direction;
use chrono::Datelike;
use rayon::prelude::*;
use std::collections::BTreeMap;
use ta::indicators::{
    AverageTrueRange, BollingerBands, FastStochastic, MovingAverageConvergenceDivergence,
    OnBalanceVolume, RelativeStrengthIndex, SimpleMovingAverage, SlowStochastic,
};
use ta::{DataItem, Next};
use tracing::debug;

/// Bars needed before the technical family (SMA 50 plus a 5-bar slope) is populated
pub const TECHNICAL_MIN_BARS: usize = 55;
const PRICE_POSITION_MIN_BARS: usize = 21;
const VOLUME_MIN_BARS: usize = 21;
const VOLATILITY_MIN_BARS: usize = 21;
const MOMENTUM_MIN_BARS: usize = 12;
const PATTERN_MIN_BARS: usize = 2;
const STRUCTURE_MIN_BARS: usize = 30;

const HURST_LAGS: [usize; 4] = [2, 4, 8, 16];
const SLOPE_LOOKBACK: usize = 5;

/// Derives fixed-width feature vectors from contiguous observation windows.
///
/// Pure: the same window always yields a bitwise identical vector.
#[derive(Debug, Clone, Copy)]
pub struct FeatureEngine {
    window_size: usize,
}

impl FeatureEngine {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// One vector per window position `i >= window_size - 1`, lazily.
    /// `observations` must be a single symbol's validated, ordered series.
    pub fn compute_features<'a>(&self, observations: &'a [Observation]) -> FeatureWindows<'a> {
        FeatureWindows {
            observations,
            window_size: self.window_size,
            next_end: self.window_size,
        }
    }

    /// Attaches direction labels using the close `horizon` bars ahead.
    /// Rows without a complete forward horizon stay unlabeled.
    pub fn label_windows(
        vectors: impl IntoIterator<Item = FeatureVector>,
        observations: &[Observation],
        horizon: usize,
    ) -> Vec<FeatureVector> {
        vectors
            .into_iter()
            .map(|fv| {
                let label = observations
                    .binary_search_by_key(&fv.timestamp, |o| o.timestamp)
                    .ok()
                    .filter(|_| horizon > 0)
                    .and_then(|i| {
                        let future = observations.get(i + horizon)?;
                        Direction::from_prices(observations[i].close, future.close)
                    });
                fv.with_label(label)
            })
            .collect()
    }

    /// Labeled vectors for one symbol
    pub fn labeled_vectors(&self, observations: &[Observation], horizon: usize) -> Vec<FeatureVector> {
        Self::label_windows(self.compute_features(observations), observations, horizon)
    }

    /// Labeled vectors for many symbols, computed in parallel and returned ordered by
    /// symbol then timestamp.
    pub fn compute_for_symbols(
        &self,
        series: &BTreeMap<String, Vec<Observation>>,
        horizon: usize,
    ) -> Vec<FeatureVector> {
        let entries: Vec<(&String, &Vec<Observation>)> = series.iter().collect();

        let per_symbol: Vec<Vec<FeatureVector>> = entries
            .par_iter()
            .map(|(symbol, observations)| {
                let vectors = self.labeled_vectors(observations, horizon);
                debug!(
                    "FeatureEngine: {} -> {} vectors from {} bars",
                    symbol,
                    vectors.len(),
                    observations.len()
                );
                vectors
            })
            .collect();

        per_symbol.into_iter().flatten().collect()
    }

    /// Feature vector for the last bar of `window`
    pub fn vector_for_window(window: &[Observation]) -> Option<FeatureVector> {
        let last = window.last()?;
        let mut features = Vec::with_capacity(FEATURE_COUNT);

        for family in FeatureFamily::ALL {
            let computed = match family {
                FeatureFamily::PricePosition => price_position(window),
                FeatureFamily::Technical => technical(window),
                FeatureFamily::Volume => volume(window),
                FeatureFamily::Volatility => volatility(window),
                FeatureFamily::Momentum => momentum(window),
                FeatureFamily::Pattern => patterns(window),
                FeatureFamily::Structure => structure(window),
                FeatureFamily::Calendar => calendar(window),
            };

            let range = family_range(family);
            match computed {
                Some(values) if values.len() == range.len() => {
                    let specs = &FEATURE_SCHEMA[range];
                    features.extend(values.into_iter().zip(specs).map(|(v, spec)| {
                        if v.is_finite() { v } else { spec.default }
                    }));
                }
                _ => features.extend(family_defaults(family)),
            }
        }

        Some(FeatureVector {
            symbol: last.symbol.clone(),
            timestamp: last.timestamp,
            features,
            label: None,
        })
    }
}

/// Lazy, restartable iterator over window positions
#[derive(Debug, Clone)]
pub struct FeatureWindows<'a> {
    observations: &'a [Observation],
    window_size: usize,
    next_end: usize,
}

impl Iterator for FeatureWindows<'_> {
    type Item = FeatureVector;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_end > self.observations.len() {
            return None;
        }
        let window = &self.observations[self.next_end - self.window_size..self.next_end];
        self.next_end += 1;
        FeatureEngine::vector_for_window(window)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.observations.len() + 1).saturating_sub(self.next_end);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for FeatureWindows<'_> {}

fn closes(window: &[Observation]) -> Vec<f64> {
    window.iter().map(|o| o.close).collect()
}

fn data_item(o: &Observation) -> Option<DataItem> {
    DataItem::builder()
        .open(o.open)
        .high(o.high)
        .low(o.low)
        .close(o.close)
        .volume(o.volume)
        .build()
        .ok()
}

fn data_items(window: &[Observation]) -> Option<Vec<DataItem>> {
    window.iter().map(data_item).collect()
}

fn ratio(numerator: f64, denominator: f64, fallback: f64) -> f64 {
    if denominator.abs() > f64::EPSILON {
        numerator / denominator
    } else {
        fallback
    }
}

fn tail<T>(values: &[T], n: usize) -> &[T] {
    &values[values.len().saturating_sub(n)..]
}

fn price_position(window: &[Observation]) -> Option<Vec<f64>> {
    if window.len() < PRICE_POSITION_MIN_BARS {
        return None;
    }
    let last = window.last()?;
    let prev = &window[window.len() - 2];
    let close = last.close;

    let extremes = |n: usize| {
        let recent = tail(window, n);
        let high = recent.iter().map(|o| o.high).fold(f64::NEG_INFINITY, f64::max);
        let low = recent.iter().map(|o| o.low).fold(f64::INFINITY, f64::min);
        (high, low)
    };

    let mut out = Vec::with_capacity(14);
    let periods = [5, 10, 20];
    for n in periods {
        let (high, low) = extremes(n);
        out.push(ratio(close - low, high - low, 0.5));
    }
    for n in periods {
        let (high, low) = extremes(n);
        out.push(ratio(close - high, high, 0.0));
        out.push(ratio(close - low, low, 0.0));
    }
    out.push(ratio(last.open - prev.close, prev.close, 0.0));
    out.push(ratio(last.range(), close, 0.0));
    out.push(ratio(last.body(), close, 0.0));
    out.push(ratio(last.upper_shadow(), close, 0.0));
    out.push(ratio(last.lower_shadow(), close, 0.0));
    Some(out)
}

fn technical(window: &[Observation]) -> Option<Vec<f64>> {
    if window.len() < TECHNICAL_MIN_BARS {
        return None;
    }
    let closes = closes(window);
    let items = data_items(window)?;
    let close = *closes.last()?;

    let mut out = Vec::with_capacity(17);

    let mut sma_now = Vec::with_capacity(4);
    let mut sma_then = Vec::with_capacity(4);
    for period in [5, 10, 20, 50] {
        let mut sma = SimpleMovingAverage::new(period).ok()?;
        let series: Vec<f64> = closes.iter().map(|c| sma.next(*c)).collect();
        sma_now.push(*series.last()?);
        sma_then.push(series[series.len() - 1 - SLOPE_LOOKBACK]);
    }
    for now in &sma_now {
        out.push(ratio(close, *now, 1.0) - 1.0);
    }
    for (now, then) in sma_now.iter().zip(&sma_then) {
        out.push(ratio(now - then, *then, 0.0));
    }

    let mut rsi = RelativeStrengthIndex::new(14).ok()?;
    let mut macd = MovingAverageConvergenceDivergence::new(12, 26, 9).ok()?;
    let mut bb = BollingerBands::new(20, 2.0).ok()?;
    let mut rsi_val = 50.0;
    let mut macd_val = None;
    let mut bb_val = None;
    for c in &closes {
        rsi_val = rsi.next(*c);
        macd_val = Some(macd.next(*c));
        bb_val = Some(bb.next(*c));
    }
    let macd_val = macd_val?;
    let bb_val = bb_val?;

    out.push(rsi_val / 100.0);
    // MACD is in price units; scale by price before squashing
    out.push((ratio(macd_val.macd, close, 0.0) * 100.0).tanh());
    out.push((ratio(macd_val.signal, close, 0.0) * 100.0).tanh());
    out.push((ratio(macd_val.histogram, close, 0.0) * 100.0).tanh());
    out.push(ratio(close - bb_val.lower, bb_val.upper - bb_val.lower, 0.5));
    out.push(ratio(bb_val.upper - bb_val.lower, bb_val.average, 0.0));

    let mut fast = FastStochastic::new(14).ok()?;
    let mut slow = SlowStochastic::new(14, 3).ok()?;
    let mut k = 50.0;
    let mut d = 50.0;
    for item in &items {
        k = fast.next(item);
        d = slow.next(item);
    }
    out.push(k / 100.0);
    out.push(d / 100.0);

    let recent = tail(window, 14);
    let hh = recent.iter().map(|o| o.high).fold(f64::NEG_INFINITY, f64::max);
    let ll = recent.iter().map(|o| o.low).fold(f64::INFINITY, f64::min);
    // Williams %R mapped from [-100, 0] onto [0, 1]
    out.push(ratio(close - ll, hh - ll, 0.5));

    Some(out)
}

fn volume(window: &[Observation]) -> Option<Vec<f64>> {
    if window.len() < VOLUME_MIN_BARS {
        return None;
    }
    let volumes: Vec<f64> = window.iter().map(|o| o.volume).collect();
    let current = *volumes.last()?;
    let avg5 = mean(tail(&volumes, 5))?;
    let avg20 = mean(tail(&volumes, 20))?;
    let sum5: f64 = tail(&volumes, SLOPE_LOOKBACK).iter().sum();

    let (trend, _) = trend_fit(tail(&volumes, 5))?;

    let items = data_items(window)?;
    let mut obv = OnBalanceVolume::new();
    let obv_series: Vec<f64> = items.iter().map(|i| obv.next(i)).collect();
    let obv_change = obv_series[obv_series.len() - 1] - obv_series[obv_series.len() - 1 - SLOPE_LOOKBACK];

    let mut vpt = 0.0;
    let mut vpt_series = Vec::with_capacity(window.len());
    vpt_series.push(0.0);
    for w in window.windows(2) {
        vpt += w[1].volume * ratio(w[1].close - w[0].close, w[0].close, 0.0);
        vpt_series.push(vpt);
    }
    let vpt_change = vpt_series[vpt_series.len() - 1] - vpt_series[vpt_series.len() - 1 - SLOPE_LOOKBACK];

    Some(vec![
        ratio(current, avg5, 1.0).ln_1p(),
        ratio(current, avg20, 1.0).ln_1p(),
        ratio(trend, avg5, 0.0),
        ratio(obv_change, sum5, 0.0),
        ratio(vpt_change, sum5, 0.0),
    ])
}

fn volatility(window: &[Observation]) -> Option<Vec<f64>> {
    if window.len() < VOLATILITY_MIN_BARS {
        return None;
    }
    let returns = simple_returns(&closes(window));
    let vol5 = annualized_volatility(tail(&returns, 5))?;
    let vol20 = annualized_volatility(tail(&returns, 20))?;

    let mut atr = AverageTrueRange::new(14).ok()?;
    let mut atr_val = 0.0;
    for item in data_items(window)? {
        atr_val = atr.next(&item);
    }
    let close = window.last()?.close;

    Some(vec![
        vol5,
        vol20,
        ratio(atr_val, close, 0.0),
        ratio(vol5, vol20, 1.0),
    ])
}

fn momentum(window: &[Observation]) -> Option<Vec<f64>> {
    if window.len() < MOMENTUM_MIN_BARS {
        return None;
    }
    let closes = closes(window);
    let n = closes.len();
    let close = closes[n - 1];
    let roc = |k: usize| ratio(close - closes[n - 1 - k], closes[n - 1 - k], 0.0);
    let prev_roc_1 = ratio(closes[n - 2] - closes[n - 3], closes[n - 3], 0.0);

    // Normalized momentum: (price - price_10) / ATR
    let mut atr = AverageTrueRange::new(10).ok()?;
    let mut atr_val = 0.0;
    for item in data_items(window)? {
        atr_val = atr.next(&item);
    }

    Some(vec![
        roc(1),
        roc(5),
        roc(10),
        ratio(close - closes[n - 11], atr_val, 0.0),
        roc(1) - prev_roc_1,
    ])
}

fn patterns(window: &[Observation]) -> Option<Vec<f64>> {
    if window.len() < PATTERN_MIN_BARS {
        return None;
    }
    let last = window.last()?;
    let prev = &window[window.len() - 2];
    let flag = |b: bool| if b { 1.0 } else { 0.0 };

    let range = last.range();
    let body = last.body();
    let is_doji = range > 0.0 && body <= 0.1 * range;
    let is_hammer = range > 0.0
        && last.lower_shadow() >= 2.0 * body
        && last.upper_shadow() <= body.max(0.1 * range);

    let bullish_engulfing = prev.close < prev.open
        && last.close > last.open
        && last.open <= prev.close
        && last.close >= prev.open;
    let bearish_engulfing = prev.close > prev.open
        && last.close < last.open
        && last.open >= prev.close
        && last.close <= prev.open;

    Some(vec![
        flag(is_doji),
        flag(is_hammer),
        flag(bullish_engulfing || bearish_engulfing),
        flag(last.open > prev.high),
        flag(last.open < prev.low),
    ])
}

fn structure(window: &[Observation]) -> Option<Vec<f64>> {
    if window.len() < STRUCTURE_MIN_BARS {
        return None;
    }
    let closes = closes(window);
    let close = *closes.last()?;
    let high = window.iter().map(|o| o.high).fold(f64::NEG_INFINITY, f64::max);
    let low = window.iter().map(|o| o.low).fold(f64::INFINITY, f64::min);

    let recent = tail(&closes, 20);
    let (slope, r_squared) = trend_fit(recent)?;
    let avg = mean(recent)?;

    let mut adx = ManualAdx::new(14);
    let mut adx_val = 0.0;
    for o in window {
        adx_val = adx.next(o.high, o.low, o.close);
    }

    Some(vec![
        ratio(high - close, close, 0.0),
        ratio(close - low, close, 0.0),
        ratio(slope, avg, 0.0),
        r_squared,
        adx_val / 100.0,
        calculate_hurst_exponent(&closes, &HURST_LAGS).unwrap_or(0.5),
    ])
}

fn calendar(window: &[Observation]) -> Option<Vec<f64>> {
    let last = window.last()?;
    let ts = last.timestamp;
    let recent = tail(window, 20);
    let highs: Vec<f64> = recent.iter().map(|o| o.high).collect();
    let lows: Vec<f64> = recent.iter().map(|o| o.low).collect();

    let quarter_end_month = matches!(ts.month(), 3 | 6 | 9 | 12);
    let is_quarter_end = quarter_end_month && ts.day() >= 25;

    Some(vec![
        ts.weekday().num_days_from_monday() as f64,
        ts.month() as f64,
        ts.day() as f64,
        bars_since_extreme(&highs, true)? as f64,
        bars_since_extreme(&lows, false)? as f64,
        if is_quarter_end { 1.0 } else { 0.0 },
    ])
}
