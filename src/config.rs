//! Engine configuration
//!
//! One config struct per component, defaults carrying the documented
//! constants. `EngineConfig::from_env()` overrides the handful of knobs
//! that usually differ between deployments.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

/// Feature engineering configuration; persisted in the model artifact
/// so a loaded model reproduces its training-time transform.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FeatureConfig {
    /// Decay rate for the exponential starting-position advantage
    pub grid_decay: f64,
    /// Weight of recent entry form in the combined-form formula
    pub recent_form_weight: Decimal,
    /// Weight of team form in the combined-form formula
    pub team_form_weight: Decimal,
    /// Largest grid slot used for normalization
    pub max_grid_position: u32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            grid_decay: 0.12,
            recent_form_weight: dec!(0.7),
            team_form_weight: dec!(0.3),
            max_grid_position: 20,
        }
    }
}

/// Ensemble combination method
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CombinerKind {
    /// Arithmetic mean of per-learner probabilities
    SoftVote,
    /// Logistic meta-learner over out-of-fold base outputs
    Stacking,
}

/// Ensemble predictor configuration
#[derive(Debug, Clone)]
pub struct EnsembleConfig {
    pub combiner: CombinerKind,
    /// Minimum surviving learners for a valid fit
    pub min_learners: usize,
    /// Folds for out-of-fold stacking features
    pub stacking_folds: usize,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            combiner: CombinerKind::SoftVote,
            min_learners: 2,
            stacking_folds: 5,
        }
    }
}

/// Continuous learning configuration
#[derive(Debug, Clone)]
pub struct LearningConfig {
    /// Sliding error window size
    pub window: usize,
    /// Relative mean-error increase over the last snapshot that
    /// recommends retraining (0.20 = 20%)
    pub retrain_threshold: Decimal,
    /// Resolved samples required before retraining is ever recommended
    pub min_samples: usize,
    /// Mean bucket error above which an error pattern suggests a
    /// feature adjustment
    pub high_error_threshold: Decimal,
    /// Samples a bucket needs before it is trusted
    pub min_bucket_samples: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            window: 50,
            retrain_threshold: dec!(0.20),
            min_samples: 20,
            high_error_threshold: dec!(0.35),
            min_bucket_samples: 5,
        }
    }
}

/// Upstream call quota ceilings
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    pub per_minute: u32,
    pub per_day: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            per_minute: 30,
            per_day: 2000,
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding model artifacts and history
    pub data_dir: String,
    /// Rotated model artifact backups kept
    pub model_backups: usize,
    /// History retention bound (oldest records dropped beyond this)
    pub max_history: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            model_backups: 3,
            max_history: 5000,
        }
    }
}

/// Orchestrator scheduling configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How often the collect job runs
    pub collect_interval: Duration,
    /// How often the predict job runs
    pub predict_interval: Duration,
    /// How often the reconcile job runs
    pub reconcile_interval: Duration,
    /// How often the retrain job is evaluated
    pub retrain_check_interval: Duration,
    /// Fixed retrain cadence even without drift
    pub retrain_every: chrono::Duration,
    /// Earliest edge of the prediction horizon (lead time before a race)
    pub horizon_min: chrono::Duration,
    /// Latest edge of the prediction horizon
    pub horizon_max: chrono::Duration,
    /// Predictions below this confidence are discarded, not stored
    pub min_confidence: Decimal,
    /// Resolved records required to assemble a training set
    pub min_training_samples: usize,
    /// Pending records older than this past their race are expired
    pub stale_after: chrono::Duration,
    /// Network retry attempts per upstream call
    pub fetch_retries: u32,
    /// Per-attempt upstream timeout
    pub fetch_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            collect_interval: Duration::from_secs(15 * 60),
            predict_interval: Duration::from_secs(30 * 60),
            reconcile_interval: Duration::from_secs(10 * 60),
            retrain_check_interval: Duration::from_secs(60 * 60),
            retrain_every: chrono::Duration::days(7),
            horizon_min: chrono::Duration::hours(2),
            horizon_max: chrono::Duration::hours(72),
            min_confidence: dec!(0.45),
            min_training_samples: 30,
            stale_after: chrono::Duration::hours(48),
            fetch_retries: 3,
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// Aggregated engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub features: FeatureConfig,
    pub ensemble: EnsembleConfig,
    pub learning: LearningConfig,
    pub quota: QuotaConfig,
    pub store: StoreConfig,
    pub orchestrator: OrchestratorConfig,
}

impl EngineConfig {
    /// Build from defaults with environment overrides for the knobs that
    /// differ between deployments.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(dir) = std::env::var("GRIDCAST_DATA_DIR") {
            cfg.store.data_dir = dir;
        }
        if let Ok(secs) = std::env::var("GRIDCAST_PREDICT_INTERVAL_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                cfg.orchestrator.predict_interval = Duration::from_secs(secs);
            }
        }
        if let Ok(conf) = std::env::var("GRIDCAST_MIN_CONFIDENCE") {
            if let Ok(conf) = conf.parse::<Decimal>() {
                cfg.orchestrator.min_confidence = conf;
            }
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.learning.window, 50);
        assert_eq!(cfg.learning.retrain_threshold, dec!(0.20));
        assert_eq!(cfg.ensemble.min_learners, 2);
        assert_eq!(cfg.orchestrator.min_confidence, dec!(0.45));
    }

    #[test]
    fn test_form_weights_sum_to_one() {
        let cfg = FeatureConfig::default();
        assert_eq!(cfg.recent_form_weight + cfg.team_form_weight, dec!(1.0));
    }
}
