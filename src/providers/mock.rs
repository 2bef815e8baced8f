//! Scriptable mock providers for offline testing
//!
//! Back the orchestrator with in-memory races, signals and results.
//! Failures can be injected per entry to exercise partial-failure
//! isolation, and call counters expose how often the engine hit each
//! upstream.

use crate::error::{EngineError, Result};
use crate::types::{EntryId, Outcome, Race, RaceId, RawSignals, WeatherSample};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use super::{DataProvider, ResultsProvider};

/// In-memory data provider with per-entry failure injection
#[derive(Default)]
pub struct MockDataProvider {
    races: Mutex<Vec<Race>>,
    signals: Mutex<HashMap<(RaceId, EntryId), RawSignals>>,
    weather: Mutex<HashMap<RaceId, WeatherSample>>,
    failing_entries: Mutex<HashSet<EntryId>>,
    pub signal_calls: AtomicU64,
}

impl MockDataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_race(&self, race: Race) {
        self.races.lock().await.push(race);
    }

    pub async fn set_signals(&self, signals: RawSignals) {
        self.signals
            .lock()
            .await
            .insert((signals.race_id.clone(), signals.entry_id.clone()), signals);
    }

    pub async fn set_weather(&self, race_id: &str, weather: WeatherSample) {
        self.weather.lock().await.insert(race_id.to_string(), weather);
    }

    /// Make every signal fetch for this entry fail
    pub async fn fail_entry(&self, entry_id: &str) {
        self.failing_entries.lock().await.insert(entry_id.to_string());
    }

    /// Convenience: a plausible signal set for one entry
    pub fn plausible_signals(race_id: &str, entry_id: &str, grid: u32) -> RawSignals {
        RawSignals {
            race_id: race_id.to_string(),
            entry_id: entry_id.to_string(),
            grid_position: Some(grid),
            recent_form: Some(dec!(0.9) - Decimal::from(grid) * dec!(0.03)),
            form_trend: Some(dec!(0.05)),
            consistency: Some(dec!(0.7)),
            team_form: Some(dec!(0.85) - Decimal::from(grid) * dec!(0.025)),
            circuit_performance: Some(dec!(0.8) - Decimal::from(grid) * dec!(0.02)),
            weather: None,
            collected_at: Utc::now(),
        }
    }
}

#[async_trait]
impl DataProvider for MockDataProvider {
    async fn get_upcoming_races(&self, within: chrono::Duration) -> Result<Vec<Race>> {
        let now = Utc::now();
        Ok(self
            .races
            .lock()
            .await
            .iter()
            .filter(|r| r.scheduled_at > now && r.scheduled_at <= now + within)
            .cloned()
            .collect())
    }

    async fn get_feature_signals(
        &self,
        race_id: &RaceId,
        entry_id: &EntryId,
    ) -> Result<RawSignals> {
        self.signal_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_entries.lock().await.contains(entry_id) {
            return Err(EngineError::DataUnavailable(format!(
                "injected failure for {entry_id}"
            )));
        }
        self.signals
            .lock()
            .await
            .get(&(race_id.clone(), entry_id.clone()))
            .cloned()
            .ok_or_else(|| {
                EngineError::DataUnavailable(format!("no signals for {race_id}/{entry_id}"))
            })
    }

    async fn get_weather(&self, race_id: &RaceId) -> Result<Option<WeatherSample>> {
        Ok(self.weather.lock().await.get(race_id).cloned())
    }
}

/// In-memory results provider; results appear when scripted
#[derive(Default)]
pub struct MockResultsProvider {
    results: Mutex<HashMap<RaceId, HashMap<EntryId, Outcome>>>,
    pub result_calls: AtomicU64,
}

impl MockResultsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_results(&self, race_id: &str, results: HashMap<EntryId, Outcome>) {
        self.results.lock().await.insert(race_id.to_string(), results);
    }
}

#[async_trait]
impl ResultsProvider for MockResultsProvider {
    async fn get_results(
        &self,
        race_id: &RaceId,
    ) -> Result<Option<HashMap<EntryId, Outcome>>> {
        self.result_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.results.lock().await.get(race_id).cloned())
    }
}
