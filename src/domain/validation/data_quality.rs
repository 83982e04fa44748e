use crate::domain::market::observation::Observation;
use tracing::warn;

/// Outcome of validating one symbol's raw history
#[derive(Debug, Clone, Default)]
pub struct ValidatedSeries {
    pub observations: Vec<Observation>,
    pub dropped: usize,
}

/// Centralized validator for historical bar integrity.
///
/// Rejects bars that are physically impossible or break the strict per-symbol ordering
/// the feature pipeline relies on.
pub struct StrictObservationValidator;

impl StrictObservationValidator {
    /// Validates a single bar in isolation. Returns true if valid, false otherwise.
    pub fn validate_observation(obs: &Observation) -> bool {
        let prices = [obs.open, obs.high, obs.low, obs.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            warn!(
                "Validation FAILED: Bar for {} at {} has non-positive price component(s)",
                obs.symbol, obs.timestamp
            );
            return false;
        }

        if !obs.volume.is_finite() || obs.volume <= 0.0 {
            warn!(
                "Validation FAILED: Bar for {} at {} has non-positive volume: {}",
                obs.symbol, obs.timestamp, obs.volume
            );
            return false;
        }

        if obs.low > obs.high {
            warn!(
                "Validation FAILED: Bar for {} at {} has low {} > high {}",
                obs.symbol, obs.timestamp, obs.low, obs.high
            );
            return false;
        }

        let within = |p: f64| p >= obs.low && p <= obs.high;
        if !within(obs.open) || !within(obs.close) {
            warn!(
                "Validation FAILED: Bar for {} at {} has open/close outside [{}, {}]",
                obs.symbol, obs.timestamp, obs.low, obs.high
            );
            return false;
        }

        true
    }

    /// Validates a provider batch for `symbol`, preserving provider order.
    ///
    /// A bar whose timestamp is not strictly after the last accepted one is dropped, so
    /// duplicates keep their first occurrence and late out-of-order bars are discarded.
    pub fn validate_series(symbol: &str, raw: Vec<Observation>) -> ValidatedSeries {
        let mut out = ValidatedSeries {
            observations: Vec::with_capacity(raw.len()),
            dropped: 0,
        };

        for obs in raw {
            if obs.symbol != symbol {
                warn!(
                    "Validation FAILED: Bar tagged {} returned for {} request",
                    obs.symbol, symbol
                );
                out.dropped += 1;
                continue;
            }

            if !Self::validate_observation(&obs) {
                out.dropped += 1;
                continue;
            }

            if let Some(last) = out.observations.last()
                && obs.timestamp <= last.timestamp
            {
                warn!(
                    "Validation FAILED: {} bar at {} is not after previous bar at {}",
                    symbol, obs.timestamp, last.timestamp
                );
                out.dropped += 1;
                continue;
            }

            out.observations.push(obs);
        }

        out
    }
}
