//! Training lifecycle states and per-batch fit outcomes

use std::fmt;

/// Lifecycle state of an [`Estimator`](crate::Estimator).
///
/// States only move forward: Pending → Training → Finished → Completed, with
/// Training optionally skipped for estimators that want no data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrainingState {
    /// Created, `begin_training` not called yet
    Pending,
    /// Accepting training batches
    Training,
    /// Done consuming data, final aggregation still outstanding
    Finished,
    /// `complete_training` ran; a transformer may be created
    Completed,
}

impl fmt::Display for TrainingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrainingState::Pending => "Pending",
            TrainingState::Training => "Training",
            TrainingState::Finished => "Finished",
            TrainingState::Completed => "Completed",
        };
        f.write_str(name)
    }
}

/// Outcome of one `fit` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitResult {
    /// More data is welcome
    Continue,
    /// The estimator has all the data it needs; it moves to Finished
    Complete,
    /// The caller should rewind the training stream to its beginning and
    /// keep feeding
    Reset,
}

impl fmt::Display for FitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FitResult::Continue => "Continue",
            FitResult::Complete => "Complete",
            FitResult::Reset => "Reset",
        };
        f.write_str(name)
    }
}
