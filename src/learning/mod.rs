//! Continuous learning system
//!
//! Records every resolved prediction, watches the recent error window for
//! drift against the snapshot taken at the last retrain, and buckets
//! errors by coarse feature conditions to suggest feature-weight
//! adjustments for the next retrain. Suggestions never mutate past
//! records or the serving model.

use crate::config::LearningConfig;
use crate::types::{PredictionRecord, PredictionStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

/// Coarse feature-condition buckets for error-pattern detection
const BUCKET_BACK_OF_FIELD: &str = "grid-back-of-field";
const BUCKET_WEATHER_RISK: &str = "high-weather-risk";
const BUCKET_LOW_CONSISTENCY: &str = "low-consistency";
const BUCKET_DEGRADED: &str = "degraded-data";

/// Accumulated error history for one feature-condition bucket
#[derive(Debug, Clone, Default)]
struct ErrorPattern {
    errors: Vec<Decimal>,
}

impl ErrorPattern {
    fn mean(&self) -> Decimal {
        if self.errors.is_empty() {
            return Decimal::ZERO;
        }
        self.errors.iter().sum::<Decimal>() / Decimal::from(self.errors.len() as i64)
    }
}

/// Summary of the learning state, feeding the performance metrics
#[derive(Debug, Clone)]
pub struct LearningStats {
    pub resolved_count: usize,
    pub window_mean_error: Decimal,
    pub snapshot_mean_error: Option<Decimal>,
    pub last_snapshot_at: Option<DateTime<Utc>>,
    /// Share of resolved predictions on the right side of 0.5
    pub directional_accuracy: Decimal,
    pub avg_confidence: Decimal,
}

/// Error-driven retraining controller
pub struct ContinuousLearningSystem {
    config: LearningConfig,
    window: VecDeque<Decimal>,
    /// Record ids already counted, so re-resolving is idempotent
    seen: HashSet<String>,
    patterns: HashMap<&'static str, ErrorPattern>,
    snapshot_mean: Option<Decimal>,
    last_snapshot_at: Option<DateTime<Utc>>,
    resolved_count: usize,
    directionally_correct: usize,
    confidence_sum: Decimal,
}

impl ContinuousLearningSystem {
    pub fn new(config: LearningConfig) -> Self {
        Self {
            config,
            window: VecDeque::new(),
            seen: HashSet::new(),
            patterns: HashMap::new(),
            snapshot_mean: None,
            last_snapshot_at: None,
            resolved_count: 0,
            directionally_correct: 0,
            confidence_sum: Decimal::ZERO,
        }
    }

    /// Ingest one resolved prediction. Pending records and duplicates are
    /// ignored; returns whether the record was counted.
    pub fn record_prediction(&mut self, record: &PredictionRecord) -> bool {
        if record.status != PredictionStatus::Resolved {
            return false;
        }
        let (Some(error), Some(actual)) = (record.error, record.actual_outcome) else {
            return false;
        };
        if !self.seen.insert(record.id.clone()) {
            debug!("[Learning] Ignoring duplicate resolution for {}", record.id);
            return false;
        }

        self.window.push_back(error);
        if self.window.len() > self.config.window {
            self.window.pop_front();
        }

        self.resolved_count += 1;
        self.confidence_sum += record.confidence;
        let predicted_positive = record.probability > dec!(0.5);
        if predicted_positive == (actual > dec!(0.5)) {
            self.directionally_correct += 1;
        }

        for bucket in Self::buckets_for(record) {
            self.patterns.entry(bucket).or_default().errors.push(error);
        }
        true
    }

    fn buckets_for(record: &PredictionRecord) -> Vec<&'static str> {
        let features = &record.features;
        let mut buckets = Vec::new();
        if features.grid_position_norm > dec!(0.5) {
            buckets.push(BUCKET_BACK_OF_FIELD);
        }
        if features.weather_risk > dec!(0.5) {
            buckets.push(BUCKET_WEATHER_RISK);
        }
        if features.consistency < dec!(0.4) {
            buckets.push(BUCKET_LOW_CONSISTENCY);
        }
        if features.degraded {
            buckets.push(BUCKET_DEGRADED);
        }
        buckets
    }

    pub fn window_mean_error(&self) -> Decimal {
        if self.window.is_empty() {
            return Decimal::ZERO;
        }
        self.window.iter().sum::<Decimal>() / Decimal::from(self.window.len() as i64)
    }

    /// Retraining recommendation. Below the minimum sample count this is
    /// always false: not an error, a guard against premature retraining.
    /// With no snapshot yet (never retrained), enough samples alone
    /// recommend the bootstrap retrain.
    pub fn should_retrain(&self) -> bool {
        if self.window.len() < self.config.min_samples {
            return false;
        }
        let current = self.window_mean_error();
        match self.snapshot_mean {
            None => true,
            Some(baseline) => {
                if baseline == Decimal::ZERO {
                    return current > Decimal::ZERO;
                }
                current > baseline * (Decimal::ONE + self.config.retrain_threshold)
            }
        }
    }

    /// Record the post-retrain error baseline the next drift check
    /// compares against.
    pub fn snapshot(&mut self) {
        self.snapshot_mean = Some(self.window_mean_error());
        self.last_snapshot_at = Some(Utc::now());
        debug!(
            "[Learning] Snapshot taken: baseline error {}",
            self.snapshot_mean.unwrap_or_default()
        );
    }

    /// Feature-weight multipliers derived from high-error buckets.
    /// Applied only at the next retrain, never retroactively.
    pub fn suggest_feature_adjustments(&self) -> HashMap<String, Decimal> {
        let mut suggestions = HashMap::new();
        for (bucket, pattern) in &self.patterns {
            if pattern.errors.len() < self.config.min_bucket_samples {
                continue;
            }
            let mean = pattern.mean();
            if mean <= self.config.high_error_threshold {
                continue;
            }
            // Multiplier grows with how far past the threshold the
            // bucket sits, capped at 1.5x.
            let boost = (Decimal::ONE + (mean - self.config.high_error_threshold))
                .min(dec!(1.5));
            let feature = match *bucket {
                BUCKET_BACK_OF_FIELD => "grid_advantage",
                BUCKET_WEATHER_RISK => "weather_risk",
                BUCKET_LOW_CONSISTENCY => "consistency",
                BUCKET_DEGRADED => "data_completeness",
                _ => continue,
            };
            suggestions.insert(feature.to_string(), boost);
        }
        suggestions
    }

    pub fn stats(&self) -> LearningStats {
        let accuracy = if self.resolved_count == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(self.directionally_correct as i64)
                / Decimal::from(self.resolved_count as i64)
        };
        let avg_confidence = if self.resolved_count == 0 {
            Decimal::ZERO
        } else {
            self.confidence_sum / Decimal::from(self.resolved_count as i64)
        };
        LearningStats {
            resolved_count: self.resolved_count,
            window_mean_error: self.window_mean_error(),
            snapshot_mean_error: self.snapshot_mean,
            last_snapshot_at: self.last_snapshot_at,
            directional_accuracy: accuracy,
            avg_confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureConfig;
    use crate::ml::features::FeatureEngineer;
    use crate::types::{RawSignals, WeatherSample};

    fn resolved_record(grid: u32, rain: Decimal, probability: Decimal, actual: Decimal) -> PredictionRecord {
        let engineer = FeatureEngineer::new(FeatureConfig::default());
        let features = engineer.transform(&RawSignals {
            race_id: "race-1".into(),
            entry_id: "entry-1".into(),
            grid_position: Some(grid),
            recent_form: Some(dec!(0.6)),
            form_trend: Some(dec!(0.0)),
            consistency: Some(dec!(0.7)),
            team_form: Some(dec!(0.6)),
            circuit_performance: Some(dec!(0.5)),
            weather: Some(WeatherSample {
                rain_probability: rain,
                track_temp_c: dec!(24),
                wind_speed_kph: dec!(10),
                sampled_at: Utc::now(),
            }),
            collected_at: Utc::now(),
        });
        let mut record = PredictionRecord::new(
            "race-1".into(),
            "entry-1".into(),
            features,
            probability,
            dec!(0.8),
            1,
            vec![],
        );
        record.resolve(actual);
        record
    }

    fn system_with(window: usize, min_samples: usize) -> ContinuousLearningSystem {
        ContinuousLearningSystem::new(LearningConfig {
            window,
            min_samples,
            ..Default::default()
        })
    }

    #[test]
    fn test_pending_records_ignored() {
        let mut system = system_with(10, 2);
        let mut record = resolved_record(5, dec!(0.1), dec!(0.6), dec!(1.0));
        record.status = PredictionStatus::Pending;
        assert!(!system.record_prediction(&record));
        assert_eq!(system.stats().resolved_count, 0);
    }

    #[test]
    fn test_duplicate_resolution_idempotent() {
        let mut system = system_with(10, 2);
        let record = resolved_record(5, dec!(0.1), dec!(0.6), dec!(1.0));
        assert!(system.record_prediction(&record));
        assert!(!system.record_prediction(&record));
        assert_eq!(system.stats().resolved_count, 1);
        assert_eq!(system.window.len(), 1);
    }

    #[test]
    fn test_guard_below_min_samples() {
        let mut system = system_with(50, 20);
        for _ in 0..5 {
            let record = resolved_record(5, dec!(0.1), dec!(0.9), dec!(0.0));
            system.record_prediction(&record);
        }
        // Large errors, but far too few samples
        assert!(!system.should_retrain());
    }

    #[test]
    fn test_retrain_fires_iff_error_exceeds_threshold() {
        // Scripted sequence: baseline errors of 0.2, snapshot, then a
        // window whose mean crosses 1.2x the baseline.
        let mut system = system_with(10, 5);
        for _ in 0..10 {
            system.record_prediction(&resolved_record(5, dec!(0.1), dec!(0.8), dec!(1.0)));
        }
        system.snapshot();
        assert_eq!(system.stats().snapshot_mean_error, Some(dec!(0.2)));

        // Mean 0.23 < 0.24 boundary: no trigger
        for _ in 0..10 {
            system.record_prediction(&resolved_record(5, dec!(0.1), dec!(0.77), dec!(1.0)));
        }
        assert_eq!(system.window_mean_error(), dec!(0.23));
        assert!(!system.should_retrain());

        // Mean 0.30 > 0.24: trigger
        for _ in 0..10 {
            system.record_prediction(&resolved_record(5, dec!(0.1), dec!(0.7), dec!(1.0)));
        }
        assert_eq!(system.window_mean_error(), dec!(0.30));
        assert!(system.should_retrain());
    }

    #[test]
    fn test_bootstrap_retrain_without_snapshot() {
        let mut system = system_with(10, 5);
        for _ in 0..6 {
            system.record_prediction(&resolved_record(5, dec!(0.1), dec!(0.6), dec!(1.0)));
        }
        // No snapshot yet: enough samples alone recommend the first train
        assert!(system.should_retrain());
        system.snapshot();
        assert!(!system.should_retrain());
    }

    #[test]
    fn test_error_pattern_suggestions() {
        let mut system = system_with(100, 5);
        // Back-of-field predictions going badly wrong
        for _ in 0..8 {
            system.record_prediction(&resolved_record(18, dec!(0.1), dec!(0.9), dec!(0.0)));
        }
        // Front-runners predicted well
        for _ in 0..8 {
            system.record_prediction(&resolved_record(2, dec!(0.1), dec!(0.95), dec!(1.0)));
        }

        let suggestions = system.suggest_feature_adjustments();
        let boost = suggestions.get("grid_advantage").copied().unwrap();
        assert!(boost > Decimal::ONE);
        assert!(boost <= dec!(1.5));
        // Weather was calm throughout: no weather suggestion
        assert!(!suggestions.contains_key("weather_risk"));
    }

    #[test]
    fn test_bucket_needs_min_samples() {
        let mut system = system_with(100, 5);
        // Only three high-risk-weather misses: below min_bucket_samples
        for _ in 0..3 {
            system.record_prediction(&resolved_record(5, dec!(0.95), dec!(0.9), dec!(0.0)));
        }
        assert!(system.suggest_feature_adjustments().is_empty());
    }

    #[test]
    fn test_window_slides() {
        let mut system = system_with(4, 2);
        for i in 0..8 {
            let actual = if i < 4 { dec!(0.0) } else { dec!(1.0) };
            system.record_prediction(&resolved_record(5, dec!(0.1), dec!(1.0), actual));
        }
        // Only the last four (error 0) remain in the window
        assert_eq!(system.window_mean_error(), Decimal::ZERO);
        assert_eq!(system.stats().resolved_count, 8);
    }

    #[test]
    fn test_stats_accuracy() {
        let mut system = system_with(10, 2);
        system.record_prediction(&resolved_record(3, dec!(0.1), dec!(0.8), dec!(1.0)));
        system.record_prediction(&resolved_record(4, dec!(0.1), dec!(0.7), dec!(0.0)));
        let stats = system.stats();
        assert_eq!(stats.resolved_count, 2);
        assert_eq!(stats.directional_accuracy, dec!(0.5));
        assert_eq!(stats.avg_confidence, dec!(0.8));
    }
}
