use crate::domain::ml::label::Direction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_2;
use std::ops::Range;

/// Grouping of features that are computed (and defaulted) together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureFamily {
    PricePosition,
    Technical,
    Volume,
    Volatility,
    Momentum,
    Pattern,
    Structure,
    Calendar,
}

impl FeatureFamily {
    pub const ALL: [FeatureFamily; 8] = [
        FeatureFamily::PricePosition,
        FeatureFamily::Technical,
        FeatureFamily::Volume,
        FeatureFamily::Volatility,
        FeatureFamily::Momentum,
        FeatureFamily::Pattern,
        FeatureFamily::Structure,
        FeatureFamily::Calendar,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureSpec {
    pub name: &'static str,
    pub family: FeatureFamily,
    /// Neutral value emitted when the family lacks history or the value is non-finite
    pub default: f64,
}

const fn spec(name: &'static str, family: FeatureFamily, default: f64) -> FeatureSpec {
    FeatureSpec {
        name,
        family,
        default,
    }
}

use FeatureFamily::*;

/// Ordered feature schema.
/// Columns are grouped by family, in `FeatureFamily::ALL` order.
/// Any change here is a breaking change for persisted models.
pub const FEATURE_SCHEMA: &[FeatureSpec] = &[
    // Price position
    spec("position_in_range_5", PricePosition, 0.5),
    spec("position_in_range_10", PricePosition, 0.5),
    spec("position_in_range_20", PricePosition, 0.5),
    spec("distance_from_high_5", PricePosition, 0.0),
    spec("distance_from_low_5", PricePosition, 0.0),
    spec("distance_from_high_10", PricePosition, 0.0),
    spec("distance_from_low_10", PricePosition, 0.0),
    spec("distance_from_high_20", PricePosition, 0.0),
    spec("distance_from_low_20", PricePosition, 0.0),
    spec("gap", PricePosition, 0.0),
    spec("intraday_range", PricePosition, 0.0),
    spec("body_size", PricePosition, 0.0),
    spec("upper_shadow", PricePosition, 0.0),
    spec("lower_shadow", PricePosition, 0.0),
    // Technical
    spec("price_vs_sma_5", Technical, 0.0),
    spec("price_vs_sma_10", Technical, 0.0),
    spec("price_vs_sma_20", Technical, 0.0),
    spec("price_vs_sma_50", Technical, 0.0),
    spec("sma_slope_5", Technical, 0.0),
    spec("sma_slope_10", Technical, 0.0),
    spec("sma_slope_20", Technical, 0.0),
    spec("sma_slope_50", Technical, 0.0),
    spec("rsi_14", Technical, 0.5),
    spec("macd", Technical, 0.0),
    spec("macd_signal", Technical, 0.0),
    spec("macd_histogram", Technical, 0.0),
    spec("bb_position", Technical, 0.5),
    spec("bb_width", Technical, 0.0),
    spec("stoch_k", Technical, 0.5),
    spec("stoch_d", Technical, 0.5),
    spec("williams_r", Technical, 0.5),
    // Volume
    spec("volume_ratio_5", Volume, LN_2),
    spec("volume_ratio_20", Volume, LN_2),
    spec("volume_trend_5", Volume, 0.0),
    spec("obv_change", Volume, 0.0),
    spec("vpt_change", Volume, 0.0),
    // Volatility
    spec("volatility_5", Volatility, 0.0),
    spec("volatility_20", Volatility, 0.0),
    spec("atr_ratio", Volatility, 0.0),
    spec("volatility_ratio", Volatility, 1.0),
    // Momentum
    spec("roc_1", Momentum, 0.0),
    spec("roc_5", Momentum, 0.0),
    spec("roc_10", Momentum, 0.0),
    spec("momentum_10", Momentum, 0.0),
    spec("price_acceleration", Momentum, 0.0),
    // Candlestick patterns
    spec("is_doji", Pattern, 0.0),
    spec("is_hammer", Pattern, 0.0),
    spec("is_engulfing", Pattern, 0.0),
    spec("gap_up", Pattern, 0.0),
    spec("gap_down", Pattern, 0.0),
    // Support/resistance & structure
    spec("resistance_distance", Structure, 0.0),
    spec("support_distance", Structure, 0.0),
    spec("trend_slope", Structure, 0.0),
    spec("trend_r_squared", Structure, 0.0),
    spec("adx_14", Structure, 0.0),
    spec("hurst_exponent", Structure, 0.5),
    // Calendar
    spec("day_of_week", Calendar, 0.0),
    spec("month", Calendar, 0.0),
    spec("day_of_month", Calendar, 0.0),
    spec("days_since_high_20", Calendar, 0.0),
    spec("days_since_low_20", Calendar, 0.0),
    spec("is_quarter_end", Calendar, 0.0),
];

pub const FEATURE_COUNT: usize = FEATURE_SCHEMA.len();

pub fn feature_names() -> Vec<&'static str> {
    FEATURE_SCHEMA.iter().map(|s| s.name).collect()
}

pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_SCHEMA.iter().position(|s| s.name == name)
}

/// Column range occupied by `family`
pub fn family_range(family: FeatureFamily) -> Range<usize> {
    let start = FEATURE_SCHEMA
        .iter()
        .position(|s| s.family == family)
        .unwrap_or(FEATURE_COUNT);
    let len = FEATURE_SCHEMA.iter().filter(|s| s.family == family).count();
    start..start + len
}

pub fn family_defaults(family: FeatureFamily) -> impl Iterator<Item = f64> {
    FEATURE_SCHEMA
        .iter()
        .filter(move |s| s.family == family)
        .map(|s| s.default)
}

/// Feature row for one (symbol, timestamp); `label` is set on training rows only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub features: Vec<f64>,
    pub label: Option<Direction>,
}

impl FeatureVector {
    pub fn get(&self, name: &str) -> Option<f64> {
        feature_index(name).and_then(|i| self.features.get(i).copied())
    }

    pub fn with_label(mut self, label: Option<Direction>) -> Self {
        self.label = label;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_schema_size_and_uniqueness() {
        assert_eq!(FEATURE_COUNT, 62);
        let names: HashSet<_> = feature_names().into_iter().collect();
        assert_eq!(names.len(), FEATURE_COUNT);
    }

    #[test]
    fn test_families_are_contiguous() {
        let mut next = 0;
        for family in FeatureFamily::ALL {
            let range = family_range(family);
            assert_eq!(range.start, next, "{:?} not contiguous", family);
            assert!(
                FEATURE_SCHEMA[range.clone()]
                    .iter()
                    .all(|s| s.family == family)
            );
            next = range.end;
        }
        assert_eq!(next, FEATURE_COUNT);
    }

    #[test]
    fn test_family_sizes() {
        let sizes: Vec<usize> = FeatureFamily::ALL
            .iter()
            .map(|f| family_range(*f).len())
            .collect();
        assert_eq!(sizes, vec![14, 17, 5, 4, 5, 5, 6, 6]);
    }

    #[test]
    fn test_lookup_by_name() {
        let fv = FeatureVector {
            symbol: "AAPL".to_string(),
            timestamp: Utc::now(),
            features: FEATURE_SCHEMA.iter().map(|s| s.default).collect(),
            label: None,
        };
        assert_eq!(fv.get("hurst_exponent"), Some(0.5));
        assert_eq!(fv.get("volatility_ratio"), Some(1.0));
        assert_eq!(fv.get("unknown"), None);
    }
}
