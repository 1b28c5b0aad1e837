//! Core training lifecycle, annotations, and archive primitives for featurization
//!
//! This crate provides the foundational pieces for two-phase featurization:
//! estimators that learn from training data, the annotation context they
//! publish results through, and the versioned archives their transformers
//! serialize into. Concrete featurizers build on these in companion crates.

#![warn(missing_docs)]

pub mod annotation;
pub mod archive;
pub mod error;
pub mod estimator;
pub mod source;
pub mod state;
pub mod train;
pub mod transform;

// Re-export key types for convenience
pub use annotation::{Annotation, AnnotationContext, AnnotationMap, GrainAnnotations, Statistics};
pub use archive::{ArchiveReader, ArchiveWriter, MappedArchive, Version};
pub use error::{Error, ErrorCategory, Result};
pub use estimator::{Estimator, Fit, FitTransform};
pub use source::{Source, VecSource};
pub use state::{FitResult, TrainingState};
pub use train::{train, train_and_create};
pub use transform::{transform_all, FromArchive, Transform};

static_assertions::assert_impl_all!(AnnotationContext: Send, Sync);
static_assertions::assert_impl_all!(TrainingState: Copy, Send, Sync);
