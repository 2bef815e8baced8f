//! Core data model: races, raw signals, prediction records, outcomes
//!
//! Records reference each other by id only; cross-record lookups go
//! through the repositories, never through embedded pointers.

use crate::ml::features::RaceFeatures;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

pub type RaceId = String;
pub type EntryId = String;

/// A scheduled race from the event calendar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Race {
    pub id: RaceId,
    pub name: String,
    pub circuit: String,
    pub scheduled_at: DateTime<Utc>,
    /// Active entries expected on the grid
    pub entries: Vec<EntryId>,
}

/// Weather reading for a race session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherSample {
    /// Probability of rain during the session, 0-1
    pub rain_probability: Decimal,
    pub track_temp_c: Decimal,
    pub wind_speed_kph: Decimal,
    pub sampled_at: DateTime<Utc>,
}

/// Raw per-entry signals collected upstream, before feature engineering.
/// Optional inputs have documented neutral defaults; a missing input
/// degrades the feature vector instead of failing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSignals {
    pub race_id: RaceId,
    pub entry_id: EntryId,
    /// Qualifying grid slot, 1 = pole
    pub grid_position: Option<u32>,
    /// Recent finishing form, 0-1 (1 = winning everything)
    pub recent_form: Option<Decimal>,
    /// Direction of recent form, -1..1
    pub form_trend: Option<Decimal>,
    /// Finish-position consistency, 0-1
    pub consistency: Option<Decimal>,
    /// Team/constructor form, 0-1
    pub team_form: Option<Decimal>,
    /// Historical performance at this circuit, 0-1
    pub circuit_performance: Option<Decimal>,
    pub weather: Option<WeatherSample>,
    pub collected_at: DateTime<Utc>,
}

/// Official race result for one entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub finish_position: u32,
    /// Finished at all (false = DNF)
    pub classified: bool,
}

impl Outcome {
    /// Label for training and error computation: 1 for a scoring
    /// (podium) result, 0 otherwise.
    pub fn label(&self) -> Decimal {
        if self.classified && self.finish_position <= 3 {
            dec!(1.0)
        } else {
            dec!(0.0)
        }
    }
}

/// Lifecycle status of a prediction record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionStatus {
    /// Awaiting the official result
    Pending,
    /// Matched to an outcome; immutable from here on
    Resolved,
}

impl std::fmt::Display for PredictionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PredictionStatus::Pending => write!(f, "PENDING"),
            PredictionStatus::Resolved => write!(f, "RESOLVED"),
        }
    }
}

/// A single prediction and, once reconciled, its outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub race_id: RaceId,
    pub entry_id: EntryId,
    pub features: RaceFeatures,
    pub probability: Decimal,
    pub confidence: Decimal,
    pub model_version: u32,
    /// Which upstream sources contributed signals
    pub sources_used: Vec<String>,
    pub status: PredictionStatus,
    pub actual_outcome: Option<Decimal>,
    /// |probability - actual_outcome|, set at resolution
    pub error: Option<Decimal>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PredictionRecord {
    pub fn new(
        race_id: RaceId,
        entry_id: EntryId,
        features: RaceFeatures,
        probability: Decimal,
        confidence: Decimal,
        model_version: u32,
        sources_used: Vec<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            race_id,
            entry_id,
            features,
            probability: clamp_unit(probability),
            confidence: clamp_unit(confidence),
            model_version,
            sources_used,
            status: PredictionStatus::Pending,
            actual_outcome: None,
            error: None,
            resolved_at: None,
        }
    }

    /// Transition Pending -> Resolved exactly once. Returns false (and
    /// changes nothing) if the record was already resolved.
    pub fn resolve(&mut self, actual: Decimal) -> bool {
        if self.status == PredictionStatus::Resolved {
            return false;
        }
        let actual = clamp_unit(actual);
        self.actual_outcome = Some(actual);
        self.error = Some((self.probability - actual).abs());
        self.resolved_at = Some(Utc::now());
        self.status = PredictionStatus::Resolved;
        true
    }

    pub fn is_pending(&self) -> bool {
        self.status == PredictionStatus::Pending
    }
}

/// Engine-level performance summary exposed to the surrounding API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Share of resolved predictions whose direction matched the outcome
    pub accuracy: Decimal,
    pub avg_error: Decimal,
    pub avg_confidence: Decimal,
    pub last_retrain: Option<DateTime<Utc>>,
    pub active_count: usize,
    pub resolved_count: usize,
    /// True when there is too little history for the numbers to mean much
    pub degraded: bool,
}

/// Clamp a value into the unit interval
pub fn clamp_unit(v: Decimal) -> Decimal {
    v.max(Decimal::ZERO).min(Decimal::ONE)
}
