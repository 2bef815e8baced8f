//! Gridcast: continuous-learning podium prediction engine
//!
//! Forecasts the probability that a race entry finishes on the podium,
//! combining heterogeneous base learners behind an agreement-scored
//! ensemble. A background orchestrator collects signals, serves
//! predictions, reconciles them against official results and retrains
//! when the recent error window drifts.

pub mod config;
pub mod error;
pub mod learning;
pub mod ml;
pub mod orchestrator;
pub mod providers;
pub mod store;
pub mod types;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use orchestrator::PredictionOrchestrator;
