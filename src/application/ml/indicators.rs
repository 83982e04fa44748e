//! Statistical helpers for feature engineering
//!
//! This module provides calculations for:
//! - Hurst Exponent (trend persistence detection)
//! - Linear regression slope and R² (trend strength)
//! - Wilder's ADX (trend intensity)
//! - Realized volatility and other rolling measures

use statrs::statistics::{Data, Distribution};

/// Trading days per year used to annualize daily-ish volatility
pub const ANNUALIZATION_PERIODS: f64 = 252.0;

/// Calculate Hurst Exponent using Rescaled Range (R/S) Analysis
///
/// - H = 0.5: Random walk
/// - H > 0.5: Trending/persistent behavior
/// - H < 0.5: Mean-reverting behavior
///
/// Returns `None` for fewer than 20 prices or when no lag yields a usable R/S value.
pub fn calculate_hurst_exponent(prices: &[f64], lags: &[usize]) -> Option<f64> {
    if prices.len() < 20 || lags.is_empty() {
        return None;
    }

    let returns: Vec<f64> = prices
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect();

    if returns.is_empty() {
        return None;
    }

    let mut log_lags = Vec::new();
    let mut log_rs = Vec::new();

    for &lag in lags {
        if lag >= returns.len() {
            continue;
        }
        if let Some(rs) = rescaled_range(&returns, lag) {
            log_lags.push((lag as f64).ln());
            log_rs.push(rs.ln());
        }
    }

    if log_lags.len() < 2 {
        return None;
    }

    // log(R/S) = H * log(lag) + c
    let (hurst, _) = linear_regression(&log_lags, &log_rs)?;
    Some(hurst.clamp(0.0, 1.0))
}

/// Average rescaled range over non-overlapping chunks of `lag` returns
fn rescaled_range(returns: &[f64], lag: usize) -> Option<f64> {
    let rs_values: Vec<f64> = returns
        .chunks_exact(lag)
        .filter_map(|chunk| {
            let mean = chunk.iter().sum::<f64>() / chunk.len() as f64;

            let mut cumsum = 0.0;
            let mut max_dev = f64::NEG_INFINITY;
            let mut min_dev = f64::INFINITY;
            for r in chunk {
                cumsum += r - mean;
                max_dev = max_dev.max(cumsum);
                min_dev = min_dev.min(cumsum);
            }

            let variance = chunk.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / chunk.len() as f64;
            let std_dev = variance.sqrt();
            (std_dev > 0.0).then(|| (max_dev - min_dev) / std_dev)
        })
        .collect();

    if rs_values.is_empty() {
        return None;
    }
    Some(rs_values.iter().sum::<f64>() / rs_values.len() as f64)
}

/// Least-squares fit of `y` on `x`. Returns (slope, r²).
pub fn linear_regression(x: &[f64], y: &[f64]) -> Option<(f64, f64)> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }

    let n = x.len() as f64;
    let sum_x: f64 = x.iter().sum();
    let sum_y: f64 = y.iter().sum();
    let sum_xy: f64 = x.iter().zip(y).map(|(xi, yi)| xi * yi).sum();
    let sum_x2: f64 = x.iter().map(|xi| xi * xi).sum();

    let denominator = n * sum_x2 - sum_x * sum_x;
    if denominator.abs() < 1e-10 {
        return None;
    }

    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;

    let mean_y = sum_y / n;
    let ss_tot: f64 = y.iter().map(|yi| (yi - mean_y).powi(2)).sum();
    let ss_res: f64 = x
        .iter()
        .zip(y)
        .map(|(xi, yi)| (yi - (slope * xi + intercept)).powi(2))
        .sum();
    let r_squared = if ss_tot > 0.0 {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    } else {
        0.0
    };

    Some((slope, r_squared))
}

/// Regression of `values` against their index
pub fn trend_fit(values: &[f64]) -> Option<(f64, f64)> {
    let x: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    linear_regression(&x, values)
}

/// Simple returns `p[i] / p[i-1] - 1`, skipping non-positive prices
pub fn simple_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect()
}

/// Annualized standard deviation of returns
pub fn annualized_volatility(returns: &[f64]) -> Option<f64> {
    if returns.len() < 2 {
        return None;
    }
    let data = Data::new(returns.to_vec());
    data.std_dev().map(|sd| sd * ANNUALIZATION_PERIODS.sqrt())
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Bars elapsed since the maximum (`highest = true`) or minimum of `values`.
/// The most recent extreme wins ties.
pub fn bars_since_extreme(values: &[f64], highest: bool) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        let better = match best {
            None => true,
            Some((_, b)) => {
                if highest {
                    v >= b
                } else {
                    v <= b
                }
            }
        };
        if better {
            best = Some((i, v));
        }
    }
    best.map(|(i, _)| values.len() - 1 - i)
}

/// Manual ADX implementation using standard Wilder's smoothing
///
/// Accumulates the first N values as a sum, then applies Wilder's smoothing.
pub struct ManualAdx {
    period: usize,
    prev: Option<(f64, f64, f64)>,
    tr_sum: f64,
    plus_dm_sum: f64,
    minus_dm_sum: f64,
    tr_smooth: f64,
    plus_dm_smooth: f64,
    minus_dm_smooth: f64,
    adx_smooth: f64,
    count: usize,
}

impl ManualAdx {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            prev: None,
            tr_sum: 0.0,
            plus_dm_sum: 0.0,
            minus_dm_sum: 0.0,
            tr_smooth: 0.0,
            plus_dm_smooth: 0.0,
            minus_dm_smooth: 0.0,
            adx_smooth: 0.0,
            count: 0,
        }
    }

    /// Feeds one bar; returns the current ADX (0 until `period` bars are seen)
    pub fn next(&mut self, high: f64, low: f64, close: f64) -> f64 {
        let Some((prev_high, prev_low, prev_close)) = self.prev.replace((high, low, close)) else {
            return 0.0;
        };

        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        let up_move = high - prev_high;
        let down_move = prev_low - low;
        let plus_dm = if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        };
        let minus_dm = if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        };

        self.count += 1;
        let n = self.period as f64;

        if self.count <= self.period {
            self.tr_sum += tr;
            self.plus_dm_sum += plus_dm;
            self.minus_dm_sum += minus_dm;
            if self.count == self.period {
                self.tr_smooth = self.tr_sum;
                self.plus_dm_smooth = self.plus_dm_sum;
                self.minus_dm_smooth = self.minus_dm_sum;
            }
        } else {
            self.tr_smooth = self.tr_smooth - (self.tr_smooth / n) + tr;
            self.plus_dm_smooth = self.plus_dm_smooth - (self.plus_dm_smooth / n) + plus_dm;
            self.minus_dm_smooth = self.minus_dm_smooth - (self.minus_dm_smooth / n) + minus_dm;
        }

        if self.count < self.period || self.tr_smooth <= 0.0 {
            return 0.0;
        }

        let plus_di = 100.0 * self.plus_dm_smooth / self.tr_smooth;
        let minus_di = 100.0 * self.minus_dm_smooth / self.tr_smooth;
        let sum_di = plus_di + minus_di;
        let dx = if sum_di > 0.0 {
            100.0 * (plus_di - minus_di).abs() / sum_di
        } else {
            0.0
        };

        self.adx_smooth = if self.count == self.period {
            dx
        } else {
            (self.adx_smooth * (n - 1.0) + dx) / n
        };
        self.adx_smooth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hurst_requires_history() {
        assert_eq!(calculate_hurst_exponent(&[100.0; 10], &[2, 4, 8]), None);
    }

    #[test]
    fn test_hurst_is_clamped() {
        let prices: Vec<f64> = (0..64)
            .map(|i| 100.0 + if i % 2 == 0 { 1.0 } else { -1.0 } + i as f64 * 0.01)
            .collect();
        let h = calculate_hurst_exponent(&prices, &[2, 4, 8, 16]).unwrap();
        assert!((0.0..=1.0).contains(&h));
        // Strict alternation is strongly mean reverting
        assert!(h < 0.5);
    }

    #[test]
    fn test_regression_on_perfect_line() {
        let (slope, r2) = trend_fit(&[1.0, 3.0, 5.0, 7.0]).unwrap();
        assert!((slope - 2.0).abs() < 1e-12);
        assert!((r2 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_regression_degenerate_inputs() {
        assert!(linear_regression(&[1.0], &[1.0]).is_none());
        assert!(linear_regression(&[2.0, 2.0], &[1.0, 3.0]).is_none());
        let (_, r2) = trend_fit(&[5.0, 5.0, 5.0]).unwrap();
        assert_eq!(r2, 0.0);
    }

    #[test]
    fn test_volatility_of_flat_series_is_zero() {
        assert_eq!(annualized_volatility(&[0.0, 0.0, 0.0]), Some(0.0));
        assert_eq!(annualized_volatility(&[0.01]), None);
    }

    #[test]
    fn test_bars_since_extreme() {
        let values = [1.0, 5.0, 3.0, 5.0, 2.0];
        assert_eq!(bars_since_extreme(&values, true), Some(1));
        assert_eq!(bars_since_extreme(&values, false), Some(4));
        assert_eq!(bars_since_extreme(&[], true), None);
    }

    #[test]
    fn test_adx_rises_in_persistent_trend() {
        let mut adx = ManualAdx::new(14);
        let mut last = 0.0;
        for i in 0..60 {
            let base = 100.0 + i as f64;
            last = adx.next(base + 1.0, base - 1.0, base + 0.5);
        }
        assert!(last > 50.0, "adx was {}", last);
    }
}
