//! Error types for the featurization engine

use std::io;
use thiserror::Error;

use crate::state::TrainingState;

/// Result type for featurization operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for featurization operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error during file operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A lifecycle method was invoked in a state where it is not legal
    #[error("`{operation}` is not valid for estimator `{name}` in the {state} state")]
    InvalidTrainingState {
        /// Name of the estimator the call was made on
        name: String,
        /// The lifecycle method that was invoked
        operation: &'static str,
        /// The state the estimator was in at the time of the call
        state: TrainingState,
    },

    /// `fit` was called with an empty batch
    #[error("estimator `{0}` was fit with an empty batch")]
    EmptyBatch(String),

    /// A second transformer was requested from the same estimator
    #[error("a transformer has already been created from estimator `{0}`")]
    TransformerAlreadyCreated(String),

    /// Column index outside the annotation context
    #[error("column index {column} is out of range for a context of {columns} columns")]
    ColumnOutOfRange {
        /// The requested column index
        column: usize,
        /// Number of columns in the context
        columns: usize,
    },

    /// A required annotation was not present in the context
    #[error("no annotation published by `{producer}` for column {column}")]
    AnnotationNotFound {
        /// Column the lookup targeted
        column: usize,
        /// Producer name the lookup targeted
        producer: String,
    },

    /// An annotation column lock was poisoned by a panicking writer
    #[error("annotation context lock poisoned for column {0}")]
    ContextPoisoned(usize),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Archive carries a version this build does not understand
    #[error("Unsupported archive version {major}.{minor}")]
    UnsupportedArchiveVersion {
        /// Major version found in the archive
        major: u16,
        /// Minor version found in the archive
        minor: u16,
    },

    /// Archive payload ended early or did not match the expected layout
    #[error("Malformed archive: {0}")]
    MalformedArchive(String),

    /// A key was seen at inference time with no trained instance and no fallback
    #[error("grain not found: {0}")]
    GrainNotFound(String),

    /// A grain transformer has no per-key instances and no way to make one
    #[error("a fallback transformer factory must be provided when no grains were encountered during training")]
    MissingGrainFallback,

    /// A grain-wrapped inner estimator requested a stream reset
    #[error("estimators that request a reset cannot be grain partitioned")]
    GrainReset,

    /// Annotation bookkeeping went wrong while harvesting per-grain results
    #[error("unexpected annotation activity during grain harvest: {0}")]
    GrainHarvest(String),
}

/// Coarse error classification used at the ABI boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Programmer misuse: bad arguments or out-of-order calls; retrying
    /// without fixing the call site cannot succeed
    Usage,
    /// Bad input data: malformed archives, unknown keys, missing annotations
    Domain,
    /// Underlying IO failure
    Io,
}

impl Error {
    /// Classify this error for callers that cannot match on the full enum.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Io(_) => ErrorCategory::Io,
            Error::InvalidArgument(_)
            | Error::InvalidTrainingState { .. }
            | Error::EmptyBatch(_)
            | Error::TransformerAlreadyCreated(_)
            | Error::ColumnOutOfRange { .. }
            | Error::ContextPoisoned(_)
            | Error::GrainReset => ErrorCategory::Usage,
            Error::AnnotationNotFound { .. }
            | Error::Serialization(_)
            | Error::UnsupportedArchiveVersion { .. }
            | Error::MalformedArchive(_)
            | Error::GrainNotFound(_)
            | Error::MissingGrainFallback
            | Error::GrainHarvest(_) => ErrorCategory::Domain,
        }
    }
}
