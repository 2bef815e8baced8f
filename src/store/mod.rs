//! Persistence: model artifacts and prediction history
//!
//! The engine only needs two contracts from storage: an append-only,
//! retention-bounded history of resolved predictions, and versioned
//! model artifacts swapped all-or-nothing. `JsonFileStore` is the
//! reference implementation; a relational backend can replace it behind
//! the same traits.

use crate::config::{FeatureConfig, StoreConfig};
use crate::error::{EngineError, Result};
use crate::ml::ensemble::EnsembleState;
use crate::types::PredictionRecord;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Metrics captured when an artifact is trained
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub samples: usize,
    pub train_brier: Decimal,
    pub train_accuracy: Decimal,
    /// Mean window error at training time, the drift baseline
    pub window_mean_error: Decimal,
}

/// Versioned, fully-schemed model artifact. Replaced atomically on a
/// successful retrain, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: u32,
    pub ensemble: EnsembleState,
    pub feature_config: FeatureConfig,
    /// Feature multipliers that were applied at fit time
    pub feature_adjustments: HashMap<String, Decimal>,
    pub trained_at: DateTime<Utc>,
    pub metrics: PerformanceSnapshot,
}

/// Append-only, retention-bounded history of resolved predictions
pub trait HistoryStore: Send + Sync {
    fn append(&self, records: &[PredictionRecord]) -> Result<()>;
    fn load(&self) -> Result<Vec<PredictionRecord>>;
}

/// Versioned model artifact storage
pub trait ModelStore: Send + Sync {
    fn save(&self, artifact: &ModelArtifact) -> Result<()>;
    /// None when no artifact has been persisted yet
    fn load(&self) -> Result<Option<ModelArtifact>>;
}

/// JSON-file persistence with atomic model swap and rotated backups
pub struct JsonFileStore {
    dir: PathBuf,
    config: StoreConfig,
}

impl JsonFileStore {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let dir = PathBuf::from(&config.data_dir);
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, config })
    }

    fn model_path(&self) -> PathBuf {
        self.dir.join("model.json")
    }

    fn backup_path(&self, n: usize) -> PathBuf {
        self.dir.join(format!("model.{n}.json"))
    }

    fn history_path(&self) -> PathBuf {
        self.dir.join("history.json")
    }

    /// Write-then-rename so a crash mid-write never corrupts the target
    fn write_atomic(&self, path: &Path, contents: &str) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Shift model.json -> model.1.json -> ... keeping at most K backups
    fn rotate_backups(&self) -> Result<()> {
        let keep = self.config.model_backups;
        if keep == 0 || !self.model_path().exists() {
            return Ok(());
        }
        let oldest = self.backup_path(keep);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for n in (1..keep).rev() {
            let from = self.backup_path(n);
            if from.exists() {
                fs::rename(&from, self.backup_path(n + 1))?;
            }
        }
        fs::rename(self.model_path(), self.backup_path(1))?;
        Ok(())
    }
}

impl ModelStore for JsonFileStore {
    fn save(&self, artifact: &ModelArtifact) -> Result<()> {
        let json = serde_json::to_string_pretty(artifact)?;
        self.rotate_backups()?;
        self.write_atomic(&self.model_path(), &json)?;
        info!(
            "[Store] Persisted model v{} ({} samples, brier {})",
            artifact.version, artifact.metrics.samples, artifact.metrics.train_brier
        );
        Ok(())
    }

    fn load(&self) -> Result<Option<ModelArtifact>> {
        let path = self.model_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        let artifact: ModelArtifact = serde_json::from_str(&contents)
            .map_err(|e| EngineError::ModelLoad(format!("corrupt artifact: {e}")))?;
        Ok(Some(artifact))
    }
}

impl HistoryStore for JsonFileStore {
    fn append(&self, records: &[PredictionRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut history = HistoryStore::load(self)?;
        history.extend_from_slice(records);
        // Retention bound: drop the oldest beyond the cap
        if history.len() > self.config.max_history {
            let excess = history.len() - self.config.max_history;
            history.drain(..excess);
            debug!("[Store] History retention dropped {} oldest records", excess);
        }
        let json = serde_json::to_string(&history)?;
        self.write_atomic(&self.history_path(), &json)?;
        Ok(())
    }

    fn load(&self) -> Result<Vec<PredictionRecord>> {
        let path = self.history_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnsembleConfig, FeatureConfig};
    use crate::ml::ensemble::EnsemblePredictor;
    use crate::ml::features::FeatureEngineer;
    use crate::types::{RawSignals, PredictionRecord};
    use rust_decimal_macros::dec;

    fn store_in(dir: &Path) -> JsonFileStore {
        JsonFileStore::new(StoreConfig {
            data_dir: dir.to_string_lossy().into_owned(),
            model_backups: 2,
            max_history: 5,
        })
        .unwrap()
    }

    fn training_set() -> (Vec<Vec<f64>>, Vec<f64>) {
        let engineer = FeatureEngineer::with_defaults();
        let mut x = Vec::new();
        let mut y = Vec::new();
        for grid in 1..=20u32 {
            for rep in 0..4 {
                let signals = RawSignals {
                    race_id: "r".into(),
                    entry_id: format!("e{grid}-{rep}"),
                    grid_position: Some(grid),
                    recent_form: Some(dec!(0.5)),
                    form_trend: Some(dec!(0.0)),
                    consistency: Some(dec!(0.6)),
                    team_form: Some(dec!(0.5)),
                    circuit_performance: Some(dec!(0.5)),
                    weather: None,
                    collected_at: Utc::now(),
                };
                x.push(engineer.transform(&signals).to_vector());
                y.push(if grid <= 3 { 1.0 } else { 0.0 });
            }
        }
        (x, y)
    }

    fn fitted_artifact(version: u32) -> (ModelArtifact, EnsemblePredictor) {
        let (x, y) = training_set();
        let mut ensemble = EnsemblePredictor::with_defaults();
        let report = ensemble.fit(&x, &y).unwrap();
        let artifact = ModelArtifact {
            version,
            ensemble: ensemble.state().unwrap(),
            feature_config: FeatureConfig::default(),
            feature_adjustments: HashMap::new(),
            trained_at: Utc::now(),
            metrics: PerformanceSnapshot {
                samples: report.samples,
                train_brier: report.train_brier,
                train_accuracy: report.train_accuracy,
                window_mean_error: dec!(0.2),
            },
        };
        (artifact, ensemble)
    }

    fn sample_record(i: usize) -> PredictionRecord {
        let engineer = FeatureEngineer::with_defaults();
        let features = engineer.transform(&RawSignals {
            race_id: format!("race-{i}"),
            entry_id: "e1".into(),
            grid_position: Some(5),
            recent_form: Some(dec!(0.6)),
            form_trend: None,
            consistency: Some(dec!(0.7)),
            team_form: Some(dec!(0.6)),
            circuit_performance: None,
            weather: None,
            collected_at: Utc::now(),
        });
        let mut record = PredictionRecord::new(
            format!("race-{i}"),
            "e1".into(),
            features,
            dec!(0.6),
            dec!(0.7),
            1,
            vec![],
        );
        record.resolve(dec!(1.0));
        record
    }

    #[test]
    fn test_model_round_trip_identical_predictions() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let (artifact, fitted) = fitted_artifact(1);
        store.save(&artifact).unwrap();

        let loaded = ModelStore::load(&store).unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        let served =
            EnsemblePredictor::from_state(EnsembleConfig::default(), &loaded.ensemble).unwrap();

        // Held-out probe inputs must score identically
        let engineer = FeatureEngineer::with_defaults();
        for grid in [2u32, 11, 19] {
            let features = engineer.transform(&RawSignals {
                race_id: "probe".into(),
                entry_id: "p".into(),
                grid_position: Some(grid),
                recent_form: Some(dec!(0.55)),
                form_trend: Some(dec!(0.0)),
                consistency: Some(dec!(0.6)),
                team_form: Some(dec!(0.5)),
                circuit_performance: Some(dec!(0.5)),
                weather: None,
                collected_at: Utc::now(),
            });
            assert_eq!(
                fitted.predict_proba(&features).unwrap().probability,
                served.predict_proba(&features).unwrap().probability
            );
        }
    }

    #[test]
    fn test_missing_model_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        assert!(ModelStore::load(&store).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_model_is_model_load_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        fs::write(tmp.path().join("model.json"), "{not json").unwrap();
        let err = ModelStore::load(&store).unwrap_err();
        assert!(matches!(err, EngineError::ModelLoad(_)));
    }

    #[test]
    fn test_backup_rotation_bounded() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        for version in 1..=4 {
            let (artifact, _) = fitted_artifact(version);
            store.save(&artifact).unwrap();
        }
        // Latest plus at most two rotated backups
        let loaded = ModelStore::load(&store).unwrap().unwrap();
        assert_eq!(loaded.version, 4);
        assert!(tmp.path().join("model.1.json").exists());
        assert!(tmp.path().join("model.2.json").exists());
        assert!(!tmp.path().join("model.3.json").exists());
    }

    #[test]
    fn test_history_append_and_retention() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        for i in 0..8 {
            store.append(&[sample_record(i)]).unwrap();
        }
        let history = HistoryStore::load(&store).unwrap();
        // max_history = 5: only the newest five survive
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].race_id, "race-3");
        assert_eq!(history[4].race_id, "race-7");
    }

    #[test]
    fn test_history_empty_append_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        store.append(&[]).unwrap();
        assert!(!tmp.path().join("history.json").exists());
    }
}
