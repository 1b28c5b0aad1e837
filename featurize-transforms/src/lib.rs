//! Windowed, grained, and pipeline featurizers
//!
//! Concrete training/inference pairs built on the `featurize-core`
//! lifecycle: streaming statistics, mean imputation, max-abs scaling, and
//! lag/lead windowing, plus the grain and pipeline combinators that
//! multiplex and chain them.

#![warn(missing_docs)]

pub mod grain;
pub mod impute;
pub mod lag_lead;
pub mod pipeline;
pub mod scale;
pub mod stats;
pub mod window;

// Re-export key types for convenience
pub use grain::{grain_producer, GrainEstimatorBuilder, GrainFit, GrainKey, GrainTransform};
pub use impute::{MeanImputeFit, MeanImputeTransform};
pub use lag_lead::{LagLeadFit, LagLeadTransform, LagMatrix};
pub use pipeline::{load_stage, PipelineBuilder, PipelineFit, PipelineTransform, StageLoader};
pub use scale::{MaxAbsScaleFit, MaxAbsScaleTransform};
pub use stats::{lookup_statistics, Sample, StatsFit, STATS_PRODUCER};
pub use window::CircularBuffer;
