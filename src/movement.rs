//! Movement classification
//!
//! This module labels a window of location samples as moving, stationary, or
//! unknown with a confidence score:
//! - Accuracy filtering drops unrated and low-quality fixes
//! - Sub-10 m consecutive hops are treated as GPS drift and contribute nothing
//! - The ambiguous 50-200 m band is reported as `None`, never guessed

use crate::geo::haversine_distance_m;
use crate::types::{LocationSample, MovementClassification, MovementState};

/// Worst usable horizontal accuracy (meters)
pub const MAX_ACCURACY_METERS: f64 = 50.0;
/// Minimum usable samples for any classification
pub const MIN_USABLE_SAMPLES: usize = 3;
/// Consecutive-pair distances under this are GPS drift and count as zero
pub const DRIFT_FLOOR_METERS: f64 = 10.0;
/// Distance above which a window can be called moving
pub const MOVING_MIN_DISTANCE_METERS: f64 = 200.0;
/// Span required to call a window moving
pub const MOVING_MIN_SPAN_MS: i64 = 15 * 60 * 1000;
/// Distance below which a window can be called stationary
pub const STATIONARY_MAX_DISTANCE_METERS: f64 = 50.0;
/// Span required to call a window stationary
pub const STATIONARY_MIN_SPAN_MS: i64 = 30 * 60 * 1000;

/// Span that saturates the stationary time-ratio term
const FULL_STATIONARY_SPAN_MS: i64 = 60 * 60 * 1000;
/// Distance that saturates moving confidence
const MOVING_FULL_CONFIDENCE_METERS: f64 = 400.0;

/// Stateless classifier for a window of location samples
pub struct MovementClassifier;

impl MovementClassifier {
    /// Classify an unordered set of samples.
    ///
    /// Accepts any input order and either timestamp representation; never
    /// panics. Insufficient data yields `state: None, confidence: 0`.
    pub fn classify(samples: &[LocationSample]) -> MovementClassification {
        let mut usable: Vec<&LocationSample> = samples
            .iter()
            .filter(|s| {
                s.accuracy_meters
                    .map(|a| a <= MAX_ACCURACY_METERS)
                    .unwrap_or(false)
            })
            .collect();

        if usable.len() < MIN_USABLE_SAMPLES {
            return MovementClassification::insufficient(usable.len());
        }

        usable.sort_by_key(|s| s.recorded_at.as_millis());

        let mut total_distance = 0.0;
        for pair in usable.windows(2) {
            let d = haversine_distance_m(
                pair[0].latitude,
                pair[0].longitude,
                pair[1].latitude,
                pair[1].longitude,
            );
            if d >= DRIFT_FLOOR_METERS {
                total_distance += d;
            }
        }

        let first = usable.first().map(|s| s.recorded_at.as_millis()).unwrap_or(0);
        let last = usable.last().map(|s| s.recorded_at.as_millis()).unwrap_or(0);
        let time_span_ms = last - first;

        let (state, confidence) = classify_window(total_distance, time_span_ms);

        MovementClassification {
            state,
            confidence,
            total_distance_meters: total_distance,
            time_span_ms,
            usable_sample_count: usable.len(),
        }
    }
}

/// Apply the distance/span thresholds to a filtered window
fn classify_window(total_distance: f64, time_span_ms: i64) -> (Option<MovementState>, f64) {
    if total_distance > MOVING_MIN_DISTANCE_METERS && time_span_ms >= MOVING_MIN_SPAN_MS {
        let scale = (total_distance / MOVING_FULL_CONFIDENCE_METERS).min(1.0);
        return (Some(MovementState::Moving), 0.7 + 0.3 * scale);
    }

    if total_distance < STATIONARY_MAX_DISTANCE_METERS && time_span_ms >= STATIONARY_MIN_SPAN_MS {
        let time_ratio = (time_span_ms as f64 / FULL_STATIONARY_SPAN_MS as f64).min(1.0);
        let stillness = 1.0 - total_distance / STATIONARY_MAX_DISTANCE_METERS;
        let scale = (time_ratio + stillness).min(1.0);
        return (Some(MovementState::Stationary), 0.7 + 0.3 * scale);
    }

    // Ambiguous band (50-200 m) or insufficient span
    (None, 0.0)
}
