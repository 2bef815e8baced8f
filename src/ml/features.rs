//! Feature engineering for race outcome prediction
//!
//! Turns raw per-entry signals (form, circuit history, weather,
//! qualifying) into a fixed-schema numeric feature vector:
//! - Base features normalized from raw signals
//! - Interaction features (pairwise products of features known to interact)
//! - Domain formulas (exponential grid-advantage decay, combined form,
//!   weather risk)
//!
//! Missing optional inputs substitute a neutral default and flag the
//! vector as degraded; they never fail the transform.

use crate::config::FeatureConfig;
use crate::types::RawSignals;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Neutral defaults substituted for missing raw signals
pub const DEFAULT_GRID_POSITION: u32 = 10;
pub const DEFAULT_FORM: Decimal = dec!(0.5);
pub const DEFAULT_RAIN_PROBABILITY: Decimal = dec!(0.1);
pub const DEFAULT_TRACK_TEMP_C: Decimal = dec!(22);
pub const DEFAULT_WIND_KPH: Decimal = dec!(10);

/// Fixed-schema feature vector for one entry in one race.
/// `feature_names()` and `to_vector()` stay index-aligned; the schema is
/// fixed per model version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceFeatures {
    // Base features
    /// Grid slot normalized to 0 (pole) .. 1 (back of field)
    pub grid_position_norm: Decimal,
    pub recent_form: Decimal,
    pub form_trend: Decimal,
    pub consistency: Decimal,
    pub team_form: Decimal,
    pub circuit_performance: Decimal,
    pub rain_probability: Decimal,
    pub track_temp_norm: Decimal,
    pub wind_norm: Decimal,

    // Domain formulas
    /// exp(-decay * (grid_pos - 1)): 1.0 at pole, decaying toward zero
    pub grid_advantage: Decimal,
    pub combined_form: Decimal,
    pub form_delta: Decimal,
    pub weather_risk: Decimal,

    // Interaction features
    pub grid_x_form: Decimal,
    pub risk_x_grid: Decimal,
    pub form_x_circuit: Decimal,

    // Vector quality
    pub data_completeness: Decimal,
    pub degraded: bool,
    pub engineered_at: DateTime<Utc>,
}

impl RaceFeatures {
    /// Convert to an f64 vector for the base learners
    pub fn to_vector(&self) -> Vec<f64> {
        vec![
            decimal_to_f64(self.grid_position_norm),
            decimal_to_f64(self.recent_form),
            decimal_to_f64(self.form_trend),
            decimal_to_f64(self.consistency),
            decimal_to_f64(self.team_form),
            decimal_to_f64(self.circuit_performance),
            decimal_to_f64(self.rain_probability),
            decimal_to_f64(self.track_temp_norm),
            decimal_to_f64(self.wind_norm),
            decimal_to_f64(self.grid_advantage),
            decimal_to_f64(self.combined_form),
            decimal_to_f64(self.form_delta),
            decimal_to_f64(self.weather_risk),
            decimal_to_f64(self.grid_x_form),
            decimal_to_f64(self.risk_x_grid),
            decimal_to_f64(self.form_x_circuit),
            decimal_to_f64(self.data_completeness),
        ]
    }

    /// Feature names, index-aligned with `to_vector()`
    pub fn feature_names() -> Vec<&'static str> {
        vec![
            "grid_position_norm",
            "recent_form",
            "form_trend",
            "consistency",
            "team_form",
            "circuit_performance",
            "rain_probability",
            "track_temp_norm",
            "wind_norm",
            "grid_advantage",
            "combined_form",
            "form_delta",
            "weather_risk",
            "grid_x_form",
            "risk_x_grid",
            "form_x_circuit",
            "data_completeness",
        ]
    }

    /// Human-readable descriptions paired with importance explanations
    pub fn descriptions() -> Vec<(&'static str, &'static str)> {
        vec![
            ("grid_position_norm", "starting slot, 0 = pole, 1 = back of field"),
            ("recent_form", "average finishing form over recent races"),
            ("form_trend", "direction of recent form, improving vs fading"),
            ("consistency", "finish-position consistency"),
            ("team_form", "constructor form over recent races"),
            ("circuit_performance", "historical performance at this circuit"),
            ("rain_probability", "chance of rain during the session"),
            ("track_temp_norm", "track temperature, normalized"),
            ("wind_norm", "wind speed, normalized"),
            ("grid_advantage", "exponentially decaying advantage of a forward grid slot"),
            ("combined_form", "entry form blended with team form"),
            ("form_delta", "entry form relative to team form"),
            ("weather_risk", "blended rain, wind and temperature risk"),
            ("grid_x_form", "grid advantage amplified by current form"),
            ("risk_x_grid", "weather risk weighted by grid position"),
            ("form_x_circuit", "current form at a historically strong circuit"),
            ("data_completeness", "share of raw signals actually present"),
        ]
    }
}

/// Deterministic transform from raw signals to the fixed feature schema
pub struct FeatureEngineer {
    config: FeatureConfig,
}

impl FeatureEngineer {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(FeatureConfig::default())
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Transform raw signals into the fixed feature schema. Missing
    /// optional inputs substitute neutral defaults and mark the vector
    /// degraded; the transform itself never fails.
    pub fn transform(&self, signals: &RawSignals) -> RaceFeatures {
        let mut present = 0usize;
        let mut total = 0usize;
        let mut take = |have: bool| {
            total += 1;
            if have {
                present += 1;
            }
        };

        take(signals.grid_position.is_some());
        let grid_position = signals.grid_position.unwrap_or(DEFAULT_GRID_POSITION);

        take(signals.recent_form.is_some());
        let recent_form = clamp_unit(signals.recent_form.unwrap_or(DEFAULT_FORM));

        take(signals.form_trend.is_some());
        let form_trend = signals
            .form_trend
            .unwrap_or(Decimal::ZERO)
            .max(dec!(-1.0))
            .min(dec!(1.0));

        take(signals.consistency.is_some());
        let consistency = clamp_unit(signals.consistency.unwrap_or(DEFAULT_FORM));

        take(signals.team_form.is_some());
        let team_form = clamp_unit(signals.team_form.unwrap_or(DEFAULT_FORM));

        take(signals.circuit_performance.is_some());
        let circuit_performance = clamp_unit(signals.circuit_performance.unwrap_or(DEFAULT_FORM));

        take(signals.weather.is_some());
        let (rain, temp, wind) = match &signals.weather {
            Some(w) => (
                clamp_unit(w.rain_probability),
                w.track_temp_c,
                w.wind_speed_kph.max(Decimal::ZERO),
            ),
            None => (DEFAULT_RAIN_PROBABILITY, DEFAULT_TRACK_TEMP_C, DEFAULT_WIND_KPH),
        };

        let max_grid = self.config.max_grid_position.max(2);
        let grid_clamped = grid_position.clamp(1, max_grid);
        let grid_position_norm =
            Decimal::from(grid_clamped - 1) / Decimal::from(max_grid - 1);

        // Exponential decay of the starting-position advantage
        let grid_advantage = f64_to_decimal(
            (-self.config.grid_decay * (grid_clamped - 1) as f64).exp(),
        );

        let combined_form = self.config.recent_form_weight * recent_form
            + self.config.team_form_weight * team_form;
        let form_delta = recent_form - team_form;

        let track_temp_norm = clamp_unit(temp / dec!(50));
        let wind_norm = clamp_unit(wind / dec!(60));
        // Temperatures far from the 22C reference stress tyres either way
        let temp_extremity = clamp_unit((temp - dec!(22)).abs() / dec!(20));
        let weather_risk = clamp_unit(
            dec!(0.6) * rain + dec!(0.25) * wind_norm + dec!(0.15) * temp_extremity,
        );

        let grid_x_form = grid_advantage * recent_form;
        let risk_x_grid = weather_risk * grid_position_norm;
        let form_x_circuit = recent_form * circuit_performance;

        let data_completeness = if total == 0 {
            Decimal::ONE
        } else {
            Decimal::from(present as i64) / Decimal::from(total as i64)
        };

        RaceFeatures {
            grid_position_norm,
            recent_form,
            form_trend,
            consistency,
            team_form,
            circuit_performance,
            rain_probability: rain,
            track_temp_norm,
            wind_norm,
            grid_advantage,
            combined_form,
            form_delta,
            weather_risk,
            grid_x_form,
            risk_x_grid,
            form_x_circuit,
            data_completeness,
            degraded: present < total,
            engineered_at: signals.collected_at,
        }
    }
}

fn clamp_unit(v: Decimal) -> Decimal {
    v.max(Decimal::ZERO).min(Decimal::ONE)
}

fn decimal_to_f64(d: Decimal) -> f64 {
    use std::str::FromStr;
    f64::from_str(&d.to_string()).unwrap_or(0.0)
}

fn f64_to_decimal(f: f64) -> Decimal {
    use std::str::FromStr;
    if f.is_nan() || f.is_infinite() {
        return dec!(0.0);
    }
    Decimal::from_str(&format!("{:.6}", f)).unwrap_or(dec!(0.0))
}
