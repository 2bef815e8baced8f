//! Heterogeneous ensemble predictor
//!
//! Trains independently configured base learners on one normalized
//! feature matrix and combines their probability estimates:
//! - SoftVote: arithmetic mean of per-learner probabilities
//! - Stacking: a logistic meta-learner trained on out-of-fold base outputs
//!
//! Confidence is `1 - stddev(per-learner probabilities)`: tight agreement
//! yields high confidence. This is an agreement heuristic, not a
//! calibrated probability.

use crate::config::{CombinerKind, EnsembleConfig};
use crate::error::{EngineError, Result};
use crate::ml::features::RaceFeatures;
use crate::ml::learners::{
    learner_from_state, Learner, LearnerSpec, LearnerState, LogisticConfig, LogisticLearner,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Column-wise min-max normalizer, fitted during `fit` and persisted in
/// the artifact so serving uses the training-time scaling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MinMaxNormalizer {
    pub mins: Vec<f64>,
    pub maxs: Vec<f64>,
}

impl MinMaxNormalizer {
    fn fit(x: &[Vec<f64>]) -> Self {
        let width = x[0].len();
        let mut mins = vec![f64::INFINITY; width];
        let mut maxs = vec![f64::NEG_INFINITY; width];
        for row in x {
            for (i, v) in row.iter().enumerate() {
                mins[i] = mins[i].min(*v);
                maxs[i] = maxs[i].max(*v);
            }
        }
        Self { mins, maxs }
    }

    fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(i, v)| {
                let (min, max) = (self.mins[i], self.maxs[i]);
                if max - min < 1e-12 {
                    0.0
                } else {
                    ((v - min) / (max - min)).clamp(0.0, 1.0)
                }
            })
            .collect()
    }
}

/// One combined prediction with its explanation
#[derive(Debug, Clone)]
pub struct Prediction {
    pub probability: Decimal,
    /// Inter-learner agreement heuristic, in [0, 1]; uncalibrated
    pub confidence: Decimal,
    /// Per-learner raw estimates, by learner name
    pub learner_estimates: Vec<(String, Decimal)>,
    pub explanation: Explanation,
}

/// Feature-importance explanation from the first learner exposing one
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    /// Learner that provided the importances, if any did
    pub source: Option<String>,
    /// (feature name, weight, human-readable description), importance-sorted
    pub top_features: Vec<(String, Decimal, String)>,
}

/// Summary of one completed fit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitReport {
    pub samples: usize,
    pub survived: Vec<String>,
    pub dropped: Vec<String>,
    /// Mean squared error of ensemble probabilities on the training set
    pub train_brier: Decimal,
    pub train_accuracy: Decimal,
}

/// Serializable ensemble snapshot for the model artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleState {
    pub combiner: CombinerKind,
    pub learners: Vec<LearnerState>,
    pub meta: Option<LearnerState>,
    pub normalizer: MinMaxNormalizer,
    pub feature_adjustments: Vec<f64>,
}

/// Ensemble of heterogeneous base learners with a configurable combiner
pub struct EnsemblePredictor {
    config: EnsembleConfig,
    specs: Vec<LearnerSpec>,
    learners: Vec<Box<dyn Learner>>,
    meta: Option<LogisticLearner>,
    normalizer: MinMaxNormalizer,
    /// Column multipliers suggested by the learning system; applied at
    /// fit time and mirrored at serve time, never retroactively.
    adjustments: Vec<f64>,
}

impl EnsemblePredictor {
    pub fn new(config: EnsembleConfig) -> Self {
        Self {
            config,
            specs: LearnerSpec::default_set(),
            learners: Vec::new(),
            meta: None,
            normalizer: MinMaxNormalizer::default(),
            adjustments: Vec::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(EnsembleConfig::default())
    }

    pub fn with_specs(config: EnsembleConfig, specs: Vec<LearnerSpec>) -> Self {
        Self {
            specs,
            ..Self::new(config)
        }
    }

    pub fn is_fitted(&self) -> bool {
        !self.learners.is_empty()
    }

    pub fn learner_names(&self) -> Vec<String> {
        self.learners.iter().map(|l| l.name().to_string()).collect()
    }

    /// Set feature-weight adjustments for the next fit. Keys are feature
    /// names; unknown names are ignored with a warning.
    pub fn set_feature_adjustments(&mut self, adjustments: &std::collections::HashMap<String, Decimal>) {
        let names = RaceFeatures::feature_names();
        let mut multipliers = vec![1.0; names.len()];
        for (name, mult) in adjustments {
            match names.iter().position(|n| n == name) {
                Some(idx) => multipliers[idx] = decimal_to_f64(*mult),
                None => warn!("[Ensemble] Unknown feature in adjustment: {}", name),
            }
        }
        self.adjustments = multipliers;
    }

    fn adjusted(&self, row: Vec<f64>) -> Vec<f64> {
        if self.adjustments.len() != row.len() {
            return row;
        }
        row.iter().zip(&self.adjustments).map(|(v, m)| v * m).collect()
    }

    /// Train every configured learner on the same normalized matrix.
    /// Learners that fail to train are dropped with a warning; fewer
    /// than `min_learners` survivors aborts the fit.
    pub fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<FitReport> {
        if x.is_empty() || x.len() != y.len() {
            return Err(EngineError::Internal("invalid training set".into()));
        }

        let normalizer = MinMaxNormalizer::fit(x);
        let xn: Vec<Vec<f64>> = x
            .iter()
            .map(|row| self.adjusted(normalizer.transform_row(row)))
            .collect();

        let mut fitted: Vec<Box<dyn Learner>> = Vec::new();
        let mut survived_specs: Vec<LearnerSpec> = Vec::new();
        let mut dropped = Vec::new();
        for spec in &self.specs {
            let mut learner = spec.build();
            match learner.fit(&xn, y) {
                Ok(()) => {
                    survived_specs.push(spec.clone());
                    fitted.push(learner);
                }
                Err(e) => {
                    warn!("[Ensemble] Dropping learner {}: {}", learner.name(), e);
                    dropped.push(learner.name().to_string());
                }
            }
        }

        if fitted.len() < self.config.min_learners {
            return Err(EngineError::InsufficientModels {
                survived: fitted.len(),
            });
        }

        let meta = match self.config.combiner {
            CombinerKind::SoftVote => None,
            CombinerKind::Stacking => {
                Some(self.fit_meta(&survived_specs, &xn, y)?)
            }
        };

        self.normalizer = normalizer;
        self.learners = fitted;
        self.meta = meta;

        // Training-set metrics for the performance snapshot
        let mut brier = 0.0;
        let mut correct = 0usize;
        for (row, target) in xn.iter().zip(y) {
            let p = self.combine_normalized(row).0;
            brier += (p - target) * (p - target);
            if (p > 0.5) == (*target > 0.5) {
                correct += 1;
            }
        }
        let n = y.len() as f64;

        let report = FitReport {
            samples: y.len(),
            survived: self.learner_names(),
            dropped,
            train_brier: f64_to_decimal(brier / n),
            train_accuracy: f64_to_decimal(correct as f64 / n),
        };
        debug!(
            "[Ensemble] Fit complete: {} learners, brier={}",
            report.survived.len(),
            report.train_brier
        );
        Ok(report)
    }

    /// Meta-learner on out-of-fold base outputs so the combiner never
    /// sees a base learner's training-set optimism.
    fn fit_meta(
        &self,
        specs: &[LearnerSpec],
        xn: &[Vec<f64>],
        y: &[f64],
    ) -> Result<LogisticLearner> {
        let folds = self.config.stacking_folds.max(2).min(xn.len());
        let mut oof = vec![vec![0.5; specs.len()]; xn.len()];

        for fold in 0..folds {
            let holdout: Vec<usize> = (0..xn.len()).filter(|i| i % folds == fold).collect();
            let train_x: Vec<Vec<f64>> = (0..xn.len())
                .filter(|i| i % folds != fold)
                .map(|i| xn[i].clone())
                .collect();
            let train_y: Vec<f64> = (0..xn.len())
                .filter(|i| i % folds != fold)
                .map(|i| y[i])
                .collect();
            if train_x.is_empty() || holdout.is_empty() {
                continue;
            }

            for (col, spec) in specs.iter().enumerate() {
                let mut learner = spec.build();
                if learner.fit(&train_x, &train_y).is_err() {
                    // Neutral output keeps the column; full-fit survival
                    // already vetted this learner.
                    continue;
                }
                for &i in &holdout {
                    oof[i][col] = learner.predict_proba(&xn[i]);
                }
            }
        }

        let mut meta = LogisticLearner::new(LogisticConfig::default());
        meta.fit(&oof, y)?;
        Ok(meta)
    }

    /// Combine learner outputs for an already-normalized row. Returns
    /// (probability, per-learner estimates).
    fn combine_normalized(&self, row: &[f64]) -> (f64, Vec<(String, f64)>) {
        let estimates: Vec<(String, f64)> = self
            .learners
            .iter()
            .map(|l| (l.name().to_string(), l.predict_proba(row)))
            .collect();

        let probability = match (&self.config.combiner, &self.meta) {
            (CombinerKind::Stacking, Some(meta)) => {
                let base: Vec<f64> = estimates.iter().map(|(_, p)| *p).collect();
                meta.predict_proba(&base)
            }
            _ => {
                estimates.iter().map(|(_, p)| p).sum::<f64>() / estimates.len() as f64
            }
        };
        (probability.clamp(0.0, 1.0), estimates)
    }

    /// Predict probability, agreement confidence and explanation for one
    /// feature vector.
    pub fn predict_proba(&self, features: &RaceFeatures) -> Result<Prediction> {
        if !self.is_fitted() {
            return Err(EngineError::ModelLoad(
                "no fitted ensemble available; retrain required".into(),
            ));
        }
        let row = self.adjusted(self.normalizer.transform_row(&features.to_vector()));
        let (probability, estimates) = self.combine_normalized(&row);
        let confidence = agreement_confidence(&estimates);

        Ok(Prediction {
            probability: f64_to_decimal(probability),
            confidence: f64_to_decimal(confidence),
            learner_estimates: estimates
                .iter()
                .map(|(name, p)| (name.clone(), f64_to_decimal(*p)))
                .collect(),
            explanation: self.explain(),
        })
    }

    /// Importances from the first learner that exposes them, paired with
    /// the feature description table.
    fn explain(&self) -> Explanation {
        let descriptions = RaceFeatures::descriptions();
        for learner in &self.learners {
            if let Some(importances) = learner.feature_importances() {
                let mut rows: Vec<(String, Decimal, String)> = descriptions
                    .iter()
                    .zip(&importances)
                    .map(|((name, desc), weight)| {
                        (name.to_string(), f64_to_decimal(*weight), desc.to_string())
                    })
                    .collect();
                rows.sort_by(|a, b| b.1.cmp(&a.1));
                rows.truncate(8);
                return Explanation {
                    source: Some(learner.name().to_string()),
                    top_features: rows,
                };
            }
        }
        Explanation {
            source: None,
            top_features: Vec::new(),
        }
    }

    /// Snapshot the fitted ensemble for the model artifact
    pub fn state(&self) -> Result<EnsembleState> {
        if !self.is_fitted() {
            return Err(EngineError::Internal("cannot snapshot an unfitted ensemble".into()));
        }
        Ok(EnsembleState {
            combiner: self.config.combiner,
            learners: self.learners.iter().map(|l| l.state()).collect(),
            meta: self.meta.as_ref().map(|m| m.state()),
            normalizer: self.normalizer.clone(),
            feature_adjustments: self.adjustments.clone(),
        })
    }

    /// Rebuild a serving ensemble from a persisted snapshot
    pub fn from_state(config: EnsembleConfig, state: &EnsembleState) -> Result<Self> {
        if state.learners.len() < config.min_learners {
            return Err(EngineError::ModelLoad(format!(
                "artifact holds {} learner(s), need at least {}",
                state.learners.len(),
                config.min_learners
            )));
        }
        let meta = match &state.meta {
            Some(LearnerState::Logistic { config, weights, bias }) => Some(
                LogisticLearner::from_parts(config.clone(), weights.clone(), *bias),
            ),
            Some(_) => {
                return Err(EngineError::ModelLoad(
                    "stacking meta-learner has unexpected type".into(),
                ))
            }
            None => None,
        };

        let mut cfg = config;
        cfg.combiner = state.combiner;
        Ok(Self {
            config: cfg,
            specs: LearnerSpec::default_set(),
            learners: state.learners.iter().map(learner_from_state).collect(),
            meta,
            normalizer: state.normalizer.clone(),
            adjustments: state.feature_adjustments.clone(),
        })
    }
}

/// `1 - stddev` of the per-learner estimates, clamped to [0, 1].
/// Population stddev; an explicit heuristic, not a calibrated quantity.
fn agreement_confidence(estimates: &[(String, f64)]) -> f64 {
    if estimates.len() < 2 {
        return 0.5;
    }
    let n = estimates.len() as f64;
    let mean = estimates.iter().map(|(_, p)| p).sum::<f64>() / n;
    let variance = estimates
        .iter()
        .map(|(_, p)| (p - mean) * (p - mean))
        .sum::<f64>()
        / n;
    (1.0 - variance.sqrt()).clamp(0.0, 1.0)
}

fn decimal_to_f64(d: Decimal) -> f64 {
    use std::str::FromStr;
    f64::from_str(&d.to_string()).unwrap_or(0.0)
}

fn f64_to_decimal(f: f64) -> Decimal {
    use std::str::FromStr;
    if f.is_nan() || f.is_infinite() {
        return dec!(0.5);
    }
    Decimal::from_str(&format!("{:.6}", f)).unwrap_or(dec!(0.5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureConfig;
    use crate::ml::features::FeatureEngineer;
    use crate::types::RawSignals;
    use chrono::Utc;

    /// Synthetic grid of race signals where podiums follow grid advantage
    /// and form, with deterministic labels.
    fn synthetic_training_set() -> (Vec<Vec<f64>>, Vec<f64>) {
        let engineer = FeatureEngineer::new(FeatureConfig::default());
        let mut x = Vec::new();
        let mut y = Vec::new();
        for grid in 1..=20u32 {
            for form_step in 0..6 {
                let form = Decimal::from(form_step) / dec!(10) + dec!(0.25);
                let signals = RawSignals {
                    race_id: "r".into(),
                    entry_id: format!("e-{grid}-{form_step}"),
                    grid_position: Some(grid),
                    recent_form: Some(form),
                    form_trend: Some(dec!(0.0)),
                    consistency: Some(dec!(0.6)),
                    team_form: Some(form * dec!(0.9)),
                    circuit_performance: Some(form),
                    weather: None,
                    collected_at: Utc::now(),
                };
                let features = engineer.transform(&signals);
                x.push(features.to_vector());
                // Front of the grid with decent form scores
                let label = if grid <= 4 && form >= dec!(0.45) { 1.0 } else { 0.0 };
                y.push(label);
            }
        }
        (x, y)
    }

    fn features_for(grid: u32, form: Decimal) -> RaceFeatures {
        FeatureEngineer::new(FeatureConfig::default()).transform(&RawSignals {
            race_id: "r".into(),
            entry_id: "probe".into(),
            grid_position: Some(grid),
            recent_form: Some(form),
            form_trend: Some(dec!(0.0)),
            consistency: Some(dec!(0.6)),
            team_form: Some(form * dec!(0.9)),
            circuit_performance: Some(form),
            weather: None,
            collected_at: Utc::now(),
        })
    }

    #[test]
    fn test_soft_vote_fit_and_bounds() {
        let (x, y) = synthetic_training_set();
        let mut ensemble = EnsemblePredictor::with_defaults();
        let report = ensemble.fit(&x, &y).unwrap();
        assert!(report.survived.len() >= 2);
        assert!(report.dropped.is_empty());

        for grid in [1, 5, 12, 20] {
            let prediction = ensemble.predict_proba(&features_for(grid, dec!(0.6))).unwrap();
            assert!(prediction.probability >= Decimal::ZERO);
            assert!(prediction.probability <= Decimal::ONE);
            assert!(prediction.confidence >= Decimal::ZERO);
            assert!(prediction.confidence <= Decimal::ONE);
        }
    }

    #[test]
    fn test_pole_beats_back_of_grid() {
        let (x, y) = synthetic_training_set();
        let mut ensemble = EnsemblePredictor::with_defaults();
        ensemble.fit(&x, &y).unwrap();

        let front = ensemble.predict_proba(&features_for(1, dec!(0.6))).unwrap();
        let back = ensemble.predict_proba(&features_for(20, dec!(0.6))).unwrap();
        assert!(
            front.probability > back.probability,
            "pole {} should beat P20 {}",
            front.probability,
            back.probability
        );
    }

    #[test]
    fn test_improving_grid_never_hurts() {
        let (x, y) = synthetic_training_set();
        let mut ensemble = EnsemblePredictor::with_defaults();
        ensemble.fit(&x, &y).unwrap();

        // Probability ordering across a coarse sweep of grid slots,
        // all other signals fixed.
        let mut last = Decimal::ONE;
        for grid in [1u32, 6, 12, 20] {
            let p = ensemble
                .predict_proba(&features_for(grid, dec!(0.6)))
                .unwrap()
                .probability;
            assert!(
                p <= last + dec!(0.02),
                "grid {grid}: probability {p} rose past {last}"
            );
            last = p;
        }
    }

    #[test]
    fn test_stacking_combiner() {
        let (x, y) = synthetic_training_set();
        let mut ensemble = EnsemblePredictor::new(EnsembleConfig {
            combiner: CombinerKind::Stacking,
            ..Default::default()
        });
        ensemble.fit(&x, &y).unwrap();

        let front = ensemble.predict_proba(&features_for(1, dec!(0.65))).unwrap();
        let back = ensemble.predict_proba(&features_for(18, dec!(0.65))).unwrap();
        assert!(front.probability > back.probability);
    }

    #[test]
    fn test_explanation_has_source_and_descriptions() {
        let (x, y) = synthetic_training_set();
        let mut ensemble = EnsemblePredictor::with_defaults();
        ensemble.fit(&x, &y).unwrap();

        let prediction = ensemble.predict_proba(&features_for(3, dec!(0.6))).unwrap();
        let explanation = prediction.explanation;
        assert!(explanation.source.is_some());
        assert!(!explanation.top_features.is_empty());
        for (name, _, description) in &explanation.top_features {
            assert!(!name.is_empty());
            assert!(!description.is_empty());
        }
    }

    #[test]
    fn test_unfitted_predict_is_model_load_error() {
        let ensemble = EnsemblePredictor::with_defaults();
        let err = ensemble.predict_proba(&features_for(3, dec!(0.6))).unwrap_err();
        assert!(matches!(err, EngineError::ModelLoad(_)));
    }

    #[test]
    fn test_insufficient_models() {
        // A one-learner spec list can never satisfy min_learners = 2
        let (x, y) = synthetic_training_set();
        let mut ensemble = EnsemblePredictor::with_specs(
            EnsembleConfig::default(),
            vec![LearnerSpec::Logistic(LogisticConfig::default())],
        );
        let err = ensemble.fit(&x, &y).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientModels { survived: 1 }));
    }

    #[test]
    fn test_state_round_trip_identical_predictions() {
        let (x, y) = synthetic_training_set();
        let mut ensemble = EnsemblePredictor::with_defaults();
        ensemble.fit(&x, &y).unwrap();

        let state = ensemble.state().unwrap();
        let json = serde_json::to_string(&state).unwrap();
        let restored: EnsembleState = serde_json::from_str(&json).unwrap();
        let served = EnsemblePredictor::from_state(EnsembleConfig::default(), &restored).unwrap();

        for grid in [1, 4, 9, 16] {
            let features = features_for(grid, dec!(0.55));
            assert_eq!(
                ensemble.predict_proba(&features).unwrap().probability,
                served.predict_proba(&features).unwrap().probability
            );
        }
    }

    #[test]
    fn test_feature_adjustments_change_fit() {
        let (x, y) = synthetic_training_set();
        let mut plain = EnsemblePredictor::with_defaults();
        plain.fit(&x, &y).unwrap();

        let mut boosted = EnsemblePredictor::with_defaults();
        let mut adjustments = std::collections::HashMap::new();
        adjustments.insert("grid_advantage".to_string(), dec!(1.5));
        boosted.set_feature_adjustments(&adjustments);
        boosted.fit(&x, &y).unwrap();

        let features = features_for(2, dec!(0.6));
        // Both remain valid probabilities; the multiplier reshapes the fit
        let a = plain.predict_proba(&features).unwrap().probability;
        let b = boosted.predict_proba(&features).unwrap().probability;
        assert!(a >= Decimal::ZERO && a <= Decimal::ONE);
        assert!(b >= Decimal::ZERO && b <= Decimal::ONE);
    }
}

/// Confidence heuristic tests with scripted stub learners
#[cfg(test)]
mod confidence_tests {
    use super::*;

    /// Stub learner returning a fixed probability
    struct FixedLearner {
        name: String,
        value: f64,
    }

    impl Learner for FixedLearner {
        fn name(&self) -> &str {
            &self.name
        }
        fn fit(&mut self, _x: &[Vec<f64>], _y: &[f64]) -> Result<()> {
            Ok(())
        }
        fn predict_proba(&self, _x: &[f64]) -> f64 {
            self.value
        }
        fn state(&self) -> LearnerState {
            LearnerState::Logistic {
                config: LogisticConfig::default(),
                weights: vec![],
                bias: 0.0,
            }
        }
    }

    fn confidence_of(values: &[f64]) -> f64 {
        let estimates: Vec<(String, f64)> = values
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("stub{i}"), *v))
            .collect();
        agreement_confidence(&estimates)
    }

    #[test]
    fn test_confidence_non_increasing_with_disagreement() {
        // Widening spread around 0.5 must never raise confidence
        let spreads = [0.0, 0.05, 0.1, 0.2, 0.3, 0.5];
        let mut last = 1.0;
        for spread in spreads {
            let c = confidence_of(&[0.5 - spread, 0.5, 0.5 + spread]);
            assert!(c <= last + 1e-12, "spread {spread}: {c} > {last}");
            last = c;
        }
    }

    #[test]
    fn test_perfect_agreement_is_full_confidence() {
        assert!((confidence_of(&[0.7, 0.7, 0.7]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_confidence_stays_in_unit_range() {
        assert!(confidence_of(&[0.0, 1.0]) >= 0.0);
        assert!(confidence_of(&[0.0, 1.0, 0.0, 1.0]) <= 1.0);
    }

    #[test]
    fn test_fixed_learner_plumbing() {
        let learner = FixedLearner {
            name: "stub".into(),
            value: 0.42,
        };
        assert_eq!(learner.predict_proba(&[0.0]), 0.42);
    }
}
