//! Error types for the prediction engine
//!
//! Per-entry and per-race failures are recovered locally (logged and
//! skipped); only storage corruption or total model unavailability
//! propagates to the caller.

use thiserror::Error;

/// Engine-wide error type
#[derive(Debug, Error)]
pub enum EngineError {
    /// Upstream signal fetch failed or timed out; skip this entity/race
    /// for the current cycle.
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    /// Too few resolved records to retrain; the current retrain cycle is
    /// aborted and the last good model keeps serving.
    #[error("insufficient training data: have {have}, need {need}")]
    InsufficientTrainingData { have: usize, need: usize },

    /// Fewer than two base learners survived training; the fit call is
    /// aborted entirely.
    #[error("insufficient models: only {survived} learner(s) survived training")]
    InsufficientModels { survived: usize },

    /// Persisted model artifact is missing or corrupt.
    #[error("model load failed: {0}")]
    ModelLoad(String),

    /// A rate-limited upstream dependency rejected the call.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// True when the failure is local to one entry/race and the batch
    /// should continue.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::DataUnavailable(_)
                | EngineError::InsufficientTrainingData { .. }
                | EngineError::QuotaExceeded(_)
        )
    }
}
