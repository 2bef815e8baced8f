//! Real-time prediction pipeline orchestration
//!
//! Runs four independently scheduled jobs — Collect, Predict, Reconcile,
//! Retrain — on one cooperative scheduler loop. Each job id holds
//! `max_instances = 1`: an overlapping trigger coalesces into the next
//! run instead of queuing. Per-entry and per-race failures are isolated
//! to their own unit of work; retraining runs on a blocking worker so
//! the scheduling loop keeps servicing the other jobs.

pub mod quota;


use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::learning::ContinuousLearningSystem;
use crate::ml::ensemble::EnsemblePredictor;
use crate::ml::features::FeatureEngineer;
use crate::providers::{with_retry, DataProvider, ResultsProvider};
use crate::store::{HistoryStore, ModelArtifact, ModelStore, PerformanceSnapshot};
use crate::types::{
    EntryId, PerformanceMetrics, PredictionRecord, Race, RaceId, WeatherSample,
};
use chrono::{DateTime, Utc};
use quota::QuotaGuard;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// The four independently scheduled job types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Collect,
    Predict,
    Reconcile,
    Retrain,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Collect => write!(f, "Collect"),
            JobKind::Predict => write!(f, "Predict"),
            JobKind::Reconcile => write!(f, "Reconcile"),
            JobKind::Retrain => write!(f, "Retrain"),
        }
    }
}

/// Idle/Running guard for one job id. `max_instances = 1`: a trigger
/// that lands while the job runs is counted and dropped.
#[derive(Default)]
struct JobGuard {
    running: AtomicBool,
    runs: AtomicU64,
    coalesced: AtomicU64,
    failures: AtomicU64,
}

impl JobGuard {
    /// Idle -> Running; false when already running
    fn try_start(&self) -> bool {
        !self.running.swap(true, Ordering::SeqCst)
    }

    fn finish(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Execution counters for one job id
#[derive(Debug, Clone)]
pub struct JobStats {
    pub runs: u64,
    pub coalesced: u64,
    pub failures: u64,
}

/// The currently served model, swapped all-or-nothing on retrain
struct ModelHandle {
    ensemble: Option<EnsemblePredictor>,
    version: u32,
    last_retrain: Option<DateTime<Utc>>,
}

/// Real-time pipeline: scheduling, shared caches, model slot, facade
pub struct PredictionOrchestrator {
    config: EngineConfig,
    engineer: FeatureEngineer,
    data: Arc<dyn DataProvider>,
    results: Arc<dyn ResultsProvider>,
    history: Arc<dyn HistoryStore>,
    models: Arc<dyn ModelStore>,
    quota: QuotaGuard,
    learning: RwLock<ContinuousLearningSystem>,
    model: RwLock<ModelHandle>,
    /// Pending predictions, exactly one per (race, entry)
    active: RwLock<HashMap<(RaceId, EntryId), PredictionRecord>>,
    /// Transient caches refreshed by the collect job
    weather_cache: RwLock<HashMap<RaceId, WeatherSample>>,
    race_cache: RwLock<HashMap<RaceId, Race>>,
    guards: HashMap<JobKind, JobGuard>,
    stopping: AtomicBool,
    stop_signal: Notify,
}

impl PredictionOrchestrator {
    /// Build the orchestrator, loading the last persisted model if one
    /// exists. A corrupt artifact degrades to "retrain required" rather
    /// than failing startup.
    pub fn new(
        config: EngineConfig,
        data: Arc<dyn DataProvider>,
        results: Arc<dyn ResultsProvider>,
        history: Arc<dyn HistoryStore>,
        models: Arc<dyn ModelStore>,
    ) -> Self {
        let handle = match models.load() {
            Ok(Some(artifact)) => {
                match EnsemblePredictor::from_state(config.ensemble.clone(), &artifact.ensemble) {
                    Ok(ensemble) => {
                        info!("[Orchestrator] Loaded model v{}", artifact.version);
                        ModelHandle {
                            ensemble: Some(ensemble),
                            version: artifact.version,
                            last_retrain: Some(artifact.trained_at),
                        }
                    }
                    Err(e) => {
                        warn!("[Orchestrator] Artifact rejected, serving degraded: {}", e);
                        ModelHandle { ensemble: None, version: 0, last_retrain: None }
                    }
                }
            }
            Ok(None) => {
                info!("[Orchestrator] No persisted model; retrain required before serving");
                ModelHandle { ensemble: None, version: 0, last_retrain: None }
            }
            Err(e) => {
                warn!("[Orchestrator] Model load failed, serving degraded: {}", e);
                ModelHandle { ensemble: None, version: 0, last_retrain: None }
            }
        };

        let mut guards = HashMap::new();
        for kind in [JobKind::Collect, JobKind::Predict, JobKind::Reconcile, JobKind::Retrain] {
            guards.insert(kind, JobGuard::default());
        }

        Self {
            engineer: FeatureEngineer::new(config.features.clone()),
            quota: QuotaGuard::new(config.quota.clone()),
            learning: RwLock::new(ContinuousLearningSystem::new(config.learning.clone())),
            model: RwLock::new(handle),
            active: RwLock::new(HashMap::new()),
            weather_cache: RwLock::new(HashMap::new()),
            race_cache: RwLock::new(HashMap::new()),
            guards,
            stopping: AtomicBool::new(false),
            stop_signal: Notify::new(),
            config,
            data,
            results,
            history,
            models,
        }
    }

    /// Rehydrate the learning system from persisted history, so drift
    /// detection survives restarts.
    pub async fn warm_start(&self) -> Result<()> {
        let records = self.history.load()?;
        let mut learning = self.learning.write().await;
        let mut counted = 0usize;
        for record in &records {
            if learning.record_prediction(record) {
                counted += 1;
            }
        }
        if counted > 0 {
            learning.snapshot();
            info!("[Orchestrator] Warm start from {} resolved records", counted);
        }
        Ok(())
    }

    /// Run the cooperative scheduler until `shutdown()` is called.
    /// Jobs are spawned as tasks so a long retrain never blocks the
    /// loop; the per-job guard prevents same-job overlap.
    pub async fn run(self: Arc<Self>) {
        let cfg = &self.config.orchestrator;
        let mut collect_tick = interval(cfg.collect_interval);
        let mut predict_tick = interval(cfg.predict_interval);
        let mut reconcile_tick = interval(cfg.reconcile_interval);
        let mut retrain_tick = interval(cfg.retrain_check_interval);

        info!(
            "[Orchestrator] Starting: collect={:?} predict={:?} reconcile={:?} retrain-check={:?}",
            cfg.collect_interval, cfg.predict_interval, cfg.reconcile_interval,
            cfg.retrain_check_interval
        );

        loop {
            let me = self.clone();
            tokio::select! {
                _ = collect_tick.tick() => {
                    tokio::spawn(async move { me.run_job(JobKind::Collect).await });
                }
                _ = predict_tick.tick() => {
                    tokio::spawn(async move { me.run_job(JobKind::Predict).await });
                }
                _ = reconcile_tick.tick() => {
                    tokio::spawn(async move { me.run_job(JobKind::Reconcile).await });
                }
                _ = retrain_tick.tick() => {
                    tokio::spawn(async move { me.run_job(JobKind::Retrain).await });
                }
                _ = self.stop_signal.notified() => break,
            }
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }
        }

        // Drain: let in-flight jobs finish their current unit of work
        while self.guards.values().any(|g| g.is_running()) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        info!("[Orchestrator] Stopped");
    }

    /// Request a graceful stop; in-flight jobs complete first
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.stop_signal.notify_waiters();
    }

    /// Run one job under its overlap guard. A trigger landing while the
    /// same job runs coalesces (counted, dropped).
    pub async fn run_job(&self, kind: JobKind) {
        let guard = &self.guards[&kind];
        if !guard.try_start() {
            guard.coalesced.fetch_add(1, Ordering::SeqCst);
            debug!("[{}] Trigger coalesced: already running", kind);
            return;
        }
        guard.runs.fetch_add(1, Ordering::SeqCst);

        let outcome = match kind {
            JobKind::Collect => self.run_collect().await,
            JobKind::Predict => self.run_predict().await,
            JobKind::Reconcile => self.run_reconcile().await,
            JobKind::Retrain => self.run_retrain().await,
        };
        if let Err(e) = outcome {
            guard.failures.fetch_add(1, Ordering::SeqCst);
            error!("[{}] Job failed: {}", kind, e);
        }
        guard.finish();
    }

    pub fn job_stats(&self, kind: JobKind) -> JobStats {
        let guard = &self.guards[&kind];
        JobStats {
            runs: guard.runs.load(Ordering::SeqCst),
            coalesced: guard.coalesced.load(Ordering::SeqCst),
            failures: guard.failures.load(Ordering::SeqCst),
        }
    }

    // -----------------------------------------------------------------
    // Collect
    // -----------------------------------------------------------------

    /// Refresh the race calendar and transient weather cache for races
    /// inside the prediction horizon.
    async fn run_collect(&self) -> Result<()> {
        let cfg = &self.config.orchestrator;
        let races = with_retry("calendar", cfg.fetch_retries, cfg.fetch_timeout, || {
            self.data.get_upcoming_races(cfg.horizon_max)
        })
        .await?;

        let mut collected = 0usize;
        for race in races {
            self.race_cache
                .write()
                .await
                .insert(race.id.clone(), race.clone());

            if !self.quota.try_acquire("weather").await {
                continue;
            }
            match self.data.get_weather(&race.id).await {
                Ok(Some(weather)) => {
                    self.weather_cache.write().await.insert(race.id.clone(), weather);
                    collected += 1;
                }
                Ok(None) => {}
                // One race's weather failure never aborts the batch
                Err(e) => warn!("[Collect] Weather for {} skipped: {}", race.id, e),
            }
        }
        debug!("[Collect] Cache refreshed, {} weather samples", collected);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Predict
    // -----------------------------------------------------------------

    /// Generate predictions for entries in upcoming races that do not
    /// have a pending record yet. Each entry is its own unit of work.
    async fn run_predict(&self) -> Result<()> {
        if self.model.read().await.ensemble.is_none() {
            debug!("[Predict] No serving model yet; skipping cycle");
            return Ok(());
        }

        let cfg = &self.config.orchestrator;
        let now = Utc::now();
        let races: Vec<Race> = self
            .race_cache
            .read()
            .await
            .values()
            .filter(|r| {
                r.scheduled_at > now + cfg.horizon_min && r.scheduled_at <= now + cfg.horizon_max
            })
            .cloned()
            .collect();

        let mut stored = 0usize;
        let mut skipped = 0usize;
        for race in &races {
            for entry_id in &race.entries {
                let key = (race.id.clone(), entry_id.clone());
                if self.active.read().await.contains_key(&key) {
                    continue;
                }
                match self.predict_entry(race, entry_id).await {
                    Ok(Some(_)) => stored += 1,
                    Ok(None) => skipped += 1,
                    Err(e) if e.is_recoverable() => {
                        // Isolate this entry's failure from the batch
                        warn!("[Predict] {}/{} skipped: {}", race.id, entry_id, e);
                        skipped += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        if stored > 0 || skipped > 0 {
            info!("[Predict] Stored {} predictions, skipped {}", stored, skipped);
        }
        Ok(())
    }

    /// Build a feature vector and prediction for one entry. Returns
    /// None when the prediction is discarded (quota, sub-threshold
    /// confidence).
    async fn predict_entry(
        &self,
        race: &Race,
        entry_id: &EntryId,
    ) -> Result<Option<PredictionRecord>> {
        let cfg = &self.config.orchestrator;
        if !self.quota.try_acquire("signals").await {
            return Ok(None);
        }

        let mut signals = with_retry(
            &format!("signals {}/{}", race.id, entry_id),
            cfg.fetch_retries,
            cfg.fetch_timeout,
            || self.data.get_feature_signals(&race.id, entry_id),
        )
        .await?;

        let mut sources = vec!["data_provider".to_string()];
        if signals.weather.is_none() {
            if let Some(weather) = self.weather_cache.read().await.get(&race.id) {
                signals.weather = Some(weather.clone());
                sources.push("weather_cache".to_string());
            }
        } else {
            sources.push("weather_provider".to_string());
        }

        let features = self.engineer.transform(&signals);

        let model = self.model.read().await;
        let ensemble = model
            .ensemble
            .as_ref()
            .ok_or_else(|| EngineError::ModelLoad("no serving model".into()))?;
        let prediction = ensemble.predict_proba(&features)?;
        let version = model.version;
        drop(model);

        if prediction.confidence < cfg.min_confidence {
            debug!(
                "[Predict] {}/{} below confidence threshold ({} < {}), discarded",
                race.id, entry_id, prediction.confidence, cfg.min_confidence
            );
            return Ok(None);
        }

        let record = PredictionRecord::new(
            race.id.clone(),
            entry_id.clone(),
            features,
            prediction.probability,
            prediction.confidence,
            version,
            sources,
        );

        // Re-check under the write lock: exactly one pending record per
        // (race, entry).
        let mut active = self.active.write().await;
        let key = (race.id.clone(), entry_id.clone());
        if active.contains_key(&key) {
            return Ok(None);
        }
        active.insert(key, record.clone());
        Ok(Some(record))
    }

    // -----------------------------------------------------------------
    // Reconcile
    // -----------------------------------------------------------------

    /// Match pending predictions for finished races against official
    /// results, feed the learning system and move records to history.
    async fn run_reconcile(&self) -> Result<()> {
        let cfg = &self.config.orchestrator;
        let now = Utc::now();
        let finished: Vec<Race> = self
            .race_cache
            .read()
            .await
            .values()
            .filter(|r| r.scheduled_at < now)
            .cloned()
            .collect();

        for race in finished {
            if !self.quota.try_acquire("results").await {
                continue;
            }
            let outcomes = match with_retry(
                &format!("results {}", race.id),
                cfg.fetch_retries,
                cfg.fetch_timeout,
                || self.results.get_results(&race.id),
            )
            .await
            {
                Ok(Some(outcomes)) => outcomes,
                // Not yet available: try again next cycle
                Ok(None) => continue,
                Err(e) => {
                    warn!("[Reconcile] Results for {} skipped: {}", race.id, e);
                    continue;
                }
            };

            let mut resolved = Vec::new();
            {
                let mut active = self.active.write().await;
                let keys: Vec<(RaceId, EntryId)> = active
                    .keys()
                    .filter(|(race_id, _)| race_id == &race.id)
                    .cloned()
                    .collect();
                for key in keys {
                    let Some(outcome) = outcomes.get(&key.1) else {
                        continue;
                    };
                    if let Some(mut record) = active.remove(&key) {
                        if record.resolve(outcome.label()) {
                            resolved.push(record);
                        }
                    }
                }
            }

            if !resolved.is_empty() {
                let mut learning = self.learning.write().await;
                for record in &resolved {
                    learning.record_prediction(record);
                }
                drop(learning);

                // History corruption is the one halting condition here
                self.history.append(&resolved)?;
                info!("[Reconcile] {} resolved {} predictions", race.id, resolved.len());
            }

            self.race_cache.write().await.remove(&race.id);
        }

        self.expire_stale(now).await;
        Ok(())
    }

    /// Drop pending records whose race passed long ago with no result,
    /// so the one-pending-per-(race, entry) invariant cannot wedge.
    async fn expire_stale(&self, now: DateTime<Utc>) {
        let stale_after = self.config.orchestrator.stale_after;
        let mut active = self.active.write().await;
        let before = active.len();
        active.retain(|_, record| now - record.created_at < stale_after);
        let dropped = before - active.len();
        if dropped > 0 {
            warn!("[Reconcile] Expired {} stale pending predictions", dropped);
        }
    }

    // -----------------------------------------------------------------
    // Retrain
    // -----------------------------------------------------------------

    /// Retrain when drift is detected or the fixed cadence has elapsed.
    /// Too little resolved history skips silently; the fit runs on a
    /// blocking worker and the artifact swap is all-or-nothing.
    async fn run_retrain(&self) -> Result<()> {
        let cfg = &self.config.orchestrator;
        let drift = self.learning.read().await.should_retrain();
        let cadence_due = {
            let model = self.model.read().await;
            match model.last_retrain {
                Some(at) => Utc::now() - at >= cfg.retrain_every,
                None => true,
            }
        };
        if !drift && !cadence_due {
            return Ok(());
        }

        let records = self.history.load()?;
        let mut x = Vec::new();
        let mut y = Vec::new();
        for record in &records {
            if let Some(actual) = record.actual_outcome {
                x.push(record.features.to_vector());
                y.push(decimal_to_f64(actual));
            }
        }
        if x.len() < cfg.min_training_samples {
            // Guard against premature retraining, not an error
            debug!(
                "[Retrain] Skipped: {} resolved records, need {}",
                x.len(),
                cfg.min_training_samples
            );
            return Ok(());
        }

        let adjustments = self.learning.read().await.suggest_feature_adjustments();
        if !adjustments.is_empty() {
            info!("[Retrain] Applying {} feature adjustments", adjustments.len());
        }

        let ensemble_config = self.config.ensemble.clone();
        let adjustments_for_fit = adjustments.clone();
        let samples = x.len();
        info!("[Retrain] Training on {} resolved records (drift={})", samples, drift);

        // CPU-heavy fit on a blocking worker; the scheduler loop keeps
        // servicing the other jobs meanwhile.
        let fit = tokio::task::spawn_blocking(move || {
            let mut ensemble = EnsemblePredictor::new(ensemble_config);
            ensemble.set_feature_adjustments(&adjustments_for_fit);
            ensemble.fit(&x, &y).map(|report| (ensemble, report))
        })
        .await
        .map_err(|e| EngineError::Internal(format!("retrain task panicked: {e}")))?;

        let (ensemble, report) = match fit {
            Ok(fit) => fit,
            Err(e) => {
                // Keep serving the last good model
                error!("[Retrain] Fit failed, keeping current model: {}", e);
                return Err(e);
            }
        };

        let window_mean_error = self.learning.read().await.window_mean_error();
        let new_version = self.model.read().await.version + 1;
        let artifact = ModelArtifact {
            version: new_version,
            ensemble: ensemble.state()?,
            feature_config: self.config.features.clone(),
            feature_adjustments: adjustments,
            trained_at: Utc::now(),
            metrics: PerformanceSnapshot {
                samples: report.samples,
                train_brier: report.train_brier,
                train_accuracy: report.train_accuracy,
                window_mean_error,
            },
        };

        // Persist first; the in-memory swap happens only after the
        // artifact is durably written.
        self.models.save(&artifact)?;
        {
            let mut model = self.model.write().await;
            model.ensemble = Some(ensemble);
            model.version = new_version;
            model.last_retrain = Some(artifact.trained_at);
        }
        self.learning.write().await.snapshot();
        info!(
            "[Retrain] Model v{} live: {} learners, accuracy {}",
            new_version,
            report.survived.len(),
            report.train_accuracy
        );
        Ok(())
    }

    // -----------------------------------------------------------------
    // Facade consumed by the surrounding API layer
    // -----------------------------------------------------------------

    /// On-demand predictions for one race (optionally one entry).
    /// Returns a partial list rather than failing when some entries
    /// lack data; existing pending records are reused.
    pub async fn predict(
        &self,
        race_id: &RaceId,
        entry_id: Option<&EntryId>,
    ) -> Result<Vec<PredictionRecord>> {
        let cached = { self.race_cache.read().await.get(race_id).cloned() };
        let race = match cached {
            Some(race) => race,
            None => {
                let cfg = &self.config.orchestrator;
                let races = with_retry("calendar", cfg.fetch_retries, cfg.fetch_timeout, || {
                    self.data.get_upcoming_races(cfg.horizon_max)
                })
                .await?;
                match races.into_iter().find(|r| &r.id == race_id) {
                    Some(race) => {
                        self.race_cache
                            .write()
                            .await
                            .insert(race.id.clone(), race.clone());
                        race
                    }
                    None => return Ok(Vec::new()),
                }
            }
        };

        let entries: Vec<EntryId> = match entry_id {
            Some(entry) => vec![entry.clone()],
            None => race.entries.clone(),
        };

        let mut predictions = Vec::new();
        for entry in &entries {
            let key = (race.id.clone(), entry.clone());
            if let Some(existing) = self.active.read().await.get(&key).cloned() {
                predictions.push(existing);
                continue;
            }
            match self.predict_entry(&race, entry).await {
                Ok(Some(record)) => predictions.push(record),
                Ok(None) => {}
                Err(e) if e.is_recoverable() => {
                    warn!("[Predict] On-demand {}/{} skipped: {}", race.id, entry, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(predictions)
    }

    /// All currently pending predictions
    pub async fn get_active_predictions(&self) -> Vec<PredictionRecord> {
        self.active.read().await.values().cloned().collect()
    }

    /// Engine health summary. Reports degraded status instead of
    /// failing when there is not enough history.
    pub async fn get_performance_metrics(&self) -> PerformanceMetrics {
        let stats = self.learning.read().await.stats();
        let model = self.model.read().await;
        let active_count = self.active.read().await.len();
        PerformanceMetrics {
            accuracy: stats.directional_accuracy,
            avg_error: stats.window_mean_error,
            avg_confidence: stats.avg_confidence,
            last_retrain: model.last_retrain,
            active_count,
            resolved_count: stats.resolved_count,
            degraded: model.ensemble.is_none()
                || stats.resolved_count < self.config.learning.min_samples,
        }
    }

    /// Manual retrain override; the same overlap guard as the scheduled
    /// job applies, so a concurrent trigger coalesces.
    pub async fn trigger_retrain(&self) {
        self.run_job(JobKind::Retrain).await;
    }

    /// Currently served model version (0 = none)
    pub async fn model_version(&self) -> u32 {
        self.model.read().await.version
    }
}

fn decimal_to_f64(d: rust_decimal::Decimal) -> f64 {
    use std::str::FromStr;
    f64::from_str(&d.to_string()).unwrap_or(0.0)
}
