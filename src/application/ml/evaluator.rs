use crate::application::ml::feature_engine::FeatureEngine;
use crate::application::ml::trainer::DirectionClassifier;
use crate::application::training::cancel::CancelToken;
use crate::domain::errors::TrainingError;
use crate::domain::market::observation::Observation;
use crate::domain::ml::label::Direction;
use crate::domain::ml::model::ClassificationMetrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Recent observations the candidate never saw during training.
///
/// Each series may begin with a warm-up prefix older than `scored_from`; those bars
/// feed the feature windows but are never scored.
#[derive(Debug, Clone, Default)]
pub struct HeldOutSet {
    pub observations: BTreeMap<String, Vec<Observation>>,
    pub scored_from: DateTime<Utc>,
}

impl HeldOutSet {
    /// Splits full histories at `boundary`: bars before it train, bars from it on are
    /// held out (with `warmup` preceding bars attached for feature windows).
    pub fn split(
        series: &BTreeMap<String, Vec<Observation>>,
        boundary: DateTime<Utc>,
        warmup: usize,
    ) -> (BTreeMap<String, Vec<Observation>>, HeldOutSet) {
        let mut training = BTreeMap::new();
        let mut held_out = BTreeMap::new();

        for (symbol, observations) in series {
            let cut = observations.partition_point(|o| o.timestamp < boundary);
            if cut > 0 {
                training.insert(symbol.clone(), observations[..cut].to_vec());
            }
            if cut < observations.len() {
                let start = cut.saturating_sub(warmup);
                held_out.insert(symbol.clone(), observations[start..].to_vec());
            }
        }

        (
            training,
            HeldOutSet {
                observations: held_out,
                scored_from: boundary,
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolScore {
    pub samples: usize,
    pub correct: usize,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    /// Pooled accuracy over every eligible symbol
    pub accuracy: f64,
    /// Pooled support-weighted scores; `metrics.accuracy == accuracy`
    pub metrics: ClassificationMetrics,
    pub samples: usize,
    pub per_symbol: BTreeMap<String, SymbolScore>,
    /// Symbols skipped for having too few labeled rows, with their row count
    pub excluded: BTreeMap<String, usize>,
}

/// Support-weighted precision, recall and F1 over the classes present in `actual`.
/// A class never predicted scores zero precision instead of failing.
pub fn weighted_metrics(predicted: &[Direction], actual: &[Direction]) -> ClassificationMetrics {
    if predicted.is_empty() || predicted.len() != actual.len() {
        return ClassificationMetrics::unscored();
    }

    // class id -> (true positives, predicted count, support)
    let mut counts: BTreeMap<i32, (usize, usize, usize)> = BTreeMap::new();
    for (p, a) in predicted.iter().zip(actual) {
        counts.entry(a.class_id()).or_default().2 += 1;
        let entry = counts.entry(p.class_id()).or_default();
        entry.1 += 1;
        if p == a {
            entry.0 += 1;
        }
    }

    let n = actual.len() as f64;
    let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
    let mut correct = 0;
    let (mut precision, mut recall, mut f1_score) = (0.0, 0.0, 0.0);

    for &(tp, predicted_count, support) in counts.values() {
        correct += tp;
        if support == 0 {
            continue;
        }
        let weight = support as f64 / n;
        let p = ratio(tp, predicted_count);
        let r = ratio(tp, support);
        let f1 = if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 };
        precision += weight * p;
        recall += weight * r;
        f1_score += weight * f1;
    }

    ClassificationMetrics {
        accuracy: correct as f64 / n,
        precision,
        recall,
        f1_score,
    }
}

pub struct Evaluator {
    engine: FeatureEngine,
    horizon: usize,
    min_eval_samples: usize,
}

impl Evaluator {
    pub fn new(engine: FeatureEngine, horizon: usize, min_eval_samples: usize) -> Self {
        Self {
            engine,
            horizon,
            min_eval_samples: min_eval_samples.max(1),
        }
    }

    /// Backtests `model` on the held-out set. CPU bound: call from a blocking worker.
    pub fn evaluate(
        &self,
        model: &DirectionClassifier,
        held_out: &HeldOutSet,
        cancel: &CancelToken,
    ) -> Result<EvaluationReport, TrainingError> {
        let mut per_symbol = BTreeMap::new();
        let mut excluded = BTreeMap::new();
        let mut all_predicted = Vec::new();
        let mut all_labels = Vec::new();

        for (symbol, observations) in &held_out.observations {
            cancel.check()?;

            let (rows, labels): (Vec<Vec<f64>>, Vec<_>) = self
                .engine
                .labeled_vectors(observations, self.horizon)
                .into_iter()
                .filter(|v| v.timestamp >= held_out.scored_from)
                .filter_map(|v| v.label.map(|l| (v.features, l)))
                .unzip();

            if rows.len() < self.min_eval_samples {
                warn!(
                    "Evaluator: Excluding {} ({} labeled rows < {})",
                    symbol,
                    rows.len(),
                    self.min_eval_samples
                );
                excluded.insert(symbol.clone(), rows.len());
                continue;
            }

            let predicted = model.predict(&rows)?;
            let correct = predicted.iter().zip(&labels).filter(|(p, a)| p == a).count();

            per_symbol.insert(
                symbol.clone(),
                SymbolScore {
                    samples: rows.len(),
                    correct,
                    accuracy: correct as f64 / rows.len() as f64,
                },
            );
            all_predicted.extend(predicted);
            all_labels.extend(labels);
        }

        let total = all_labels.len();
        if total == 0 {
            return Err(TrainingError::EvaluationIncomplete {
                reason: format!(
                    "no symbol had at least {} labeled held-out rows ({} excluded)",
                    self.min_eval_samples,
                    excluded.len()
                ),
            });
        }

        let metrics = weighted_metrics(&all_predicted, &all_labels);
        info!(
            "Evaluator: Accuracy {:.4} (precision {:.4}, recall {:.4}, f1 {:.4}) over {} rows from {} symbols ({} excluded)",
            metrics.accuracy,
            metrics.precision,
            metrics.recall,
            metrics.f1_score,
            total,
            per_symbol.len(),
            excluded.len()
        );

        Ok(EvaluationReport {
            accuracy: metrics.accuracy,
            metrics,
            samples: total,
            per_symbol,
            excluded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ml::trainer::TrainerSettings;
    use crate::domain::ml::feature_registry::FEATURE_COUNT;
    use chrono::{Duration, TimeZone};

    fn series(symbol: &str, n: usize) -> Vec<Observation> {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let close = 100.0 + i as f64;
                Observation::new(
                    symbol,
                    base + Duration::days(i as i64),
                    close,
                    close + 1.0,
                    close - 1.0,
                    close,
                    1_000.0,
                )
            })
            .collect()
    }

    #[test]
    fn test_split_attaches_warmup_prefix() {
        let mut map = BTreeMap::new();
        map.insert("AAPL".to_string(), series("AAPL", 100));
        let boundary = map["AAPL"][80].timestamp;

        let (training, held_out) = HeldOutSet::split(&map, boundary, 10);

        assert_eq!(training["AAPL"].len(), 80);
        assert_eq!(held_out.observations["AAPL"].len(), 30);
        assert_eq!(held_out.observations["AAPL"][10].timestamp, boundary);
        assert!(
            training["AAPL"]
                .iter()
                .all(|o| o.timestamp < held_out.scored_from)
        );
    }

    #[test]
    fn test_split_skips_empty_sides() {
        let mut map = BTreeMap::new();
        map.insert("OLD".to_string(), series("OLD", 10));
        let boundary = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();

        let (training, held_out) = HeldOutSet::split(&map, boundary, 5);
        assert_eq!(training.len(), 1);
        assert!(held_out.observations.is_empty());
    }

    /// Model that predicts StrongBuy for anything resembling a steady uptrend
    fn uptrend_model(engine: FeatureEngine, training: &[Observation]) -> DirectionClassifier {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for v in engine.labeled_vectors(training, 5) {
            if let Some(label) = v.label {
                rows.push(v.features);
                labels.push(label);
            }
        }
        for _ in 0..rows.len() {
            rows.push(vec![-100.0; FEATURE_COUNT]);
            labels.push(Direction::Hold);
        }
        let settings = TrainerSettings {
            n_trees: 5,
            max_depth: 4,
            min_samples_split: 2,
            ..Default::default()
        };
        DirectionClassifier::fit(&rows, &labels, &settings).unwrap()
    }

    #[test]
    fn test_thin_symbols_are_excluded_not_scored_zero() {
        let engine = FeatureEngine::new(20);
        let full = series("AAPL", 100);
        let boundary = full[70].timestamp;
        let model = uptrend_model(engine, &full[..70]);

        let mut map = BTreeMap::new();
        map.insert("AAPL".to_string(), full);
        map.insert("THIN".to_string(), series("THIN", 78));
        let (_, held_out) = HeldOutSet::split(&map, boundary, 19);

        let report = Evaluator::new(engine, 5, 5)
            .evaluate(&model, &held_out, &CancelToken::new())
            .unwrap();

        assert_eq!(report.per_symbol["AAPL"].samples, 25);
        assert_eq!(report.excluded.get("THIN"), Some(&3));
        assert_eq!(report.samples, 25);
        assert_eq!(report.accuracy, 1.0);
        assert_eq!(report.metrics.f1_score, 1.0);
    }

    #[test]
    fn test_weighted_metrics_match_confusion_matrix() {
        use Direction::*;
        let actual = [Buy, Buy, Buy, Sell, Sell, Hold];
        let predicted = [Buy, Buy, Sell, Sell, Hold, Hold];

        // Buy: p=1, r=2/3, f1=0.8 (support 3)
        // Sell: p=1/2, r=1/2, f1=1/2 (support 2)
        // Hold: p=1/2, r=1, f1=2/3 (support 1)
        let m = weighted_metrics(&predicted, &actual);
        assert!((m.accuracy - 4.0 / 6.0).abs() < 1e-12);
        assert!((m.precision - 0.75).abs() < 1e-12);
        assert!((m.recall - 4.0 / 6.0).abs() < 1e-12);
        let f1 = (3.0 * 0.8 + 2.0 * 0.5 + 1.0 * (2.0 / 3.0)) / 6.0;
        assert!((m.f1_score - f1).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_metrics_never_predicted_class_scores_zero() {
        use Direction::*;
        let m = weighted_metrics(&[Hold, Hold], &[Hold, StrongBuy]);
        assert_eq!(m.accuracy, 0.5);
        // Hold: p=1/2, r=1 (weight 1/2); StrongBuy: p=0, r=0 (weight 1/2)
        assert!((m.precision - 0.25).abs() < 1e-12);
        assert!((m.recall - 0.5).abs() < 1e-12);
        assert!(weighted_metrics(&[], &[]).accuracy.is_nan());
    }

    #[test]
    fn test_no_eligible_symbol_is_incomplete() {
        let engine = FeatureEngine::new(20);
        let full = series("AAPL", 100);
        let model = uptrend_model(engine, &full[..70]);

        let mut map = BTreeMap::new();
        map.insert("THIN".to_string(), series("THIN", 78));
        let (_, held_out) = HeldOutSet::split(&map, full[70].timestamp, 19);

        let err = Evaluator::new(engine, 5, 5)
            .evaluate(&model, &held_out, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, TrainingError::EvaluationIncomplete { .. }));
    }
}
