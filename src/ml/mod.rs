//! Machine learning core
//!
//! Provides the prediction pipeline's model layer:
//! - Feature engineering from raw race signals
//! - Heterogeneous base learners behind the `Learner` capability
//! - Ensemble combination (soft-vote / stacking) with agreement-based
//!   confidence

pub mod ensemble;
pub mod features;
pub mod learners;

pub use ensemble::{EnsemblePredictor, EnsembleState, Explanation, FitReport, Prediction};
pub use features::{FeatureEngineer, RaceFeatures};
pub use learners::{learner_from_state, Learner, LearnerSpec, LearnerState};
