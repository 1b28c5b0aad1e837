//! Training lifecycle for featurization algorithms
//!
//! An algorithm implements [`Fit`] (and usually [`FitTransform`]); the
//! [`Estimator`] wrapper owns the [`TrainingState`] machine around it and
//! rejects out-of-order calls before the algorithm ever sees them. States
//! only move forward: `Pending` to `Training` to `Finished` to `Completed`,
//! with `Training` skipped by algorithms that need no data.

use std::sync::Arc;

use crate::annotation::AnnotationContext;
use crate::error::{Error, Result};
use crate::state::{FitResult, TrainingState};
use crate::transform::Transform;

/// A training algorithm, kept free of lifecycle bookkeeping.
///
/// Implementations see calls in a fixed order: `begin` once, `fit` zero or
/// more times while training, `end_of_data` when the input stream ends, and
/// `complete` once. [`Estimator`] guarantees that order.
pub trait Fit {
    /// The item consumed during training.
    type Item;

    /// Stable algorithm name, also used when publishing annotations.
    const NAME: &'static str;

    /// Called when training starts. Returns whether the algorithm wants to
    /// see data; returning `false` skips the `Training` state entirely.
    fn begin(&mut self, ctx: &AnnotationContext) -> Result<bool>;

    /// Consume one non-empty batch of items.
    fn fit(&mut self, items: Vec<Self::Item>) -> Result<FitResult>;

    /// Called when the caller has no more data. Returns `true` if the
    /// algorithm can still make use of further fits, which keeps the
    /// estimator in `Training` for another pass over the stream.
    fn end_of_data(&mut self) -> Result<bool> {
        Ok(false)
    }

    /// Finalize training, typically by publishing annotations to `ctx`.
    fn complete(&mut self, ctx: &AnnotationContext) -> Result<()>;
}

/// A [`Fit`] whose training result is a reusable transformer.
pub trait FitTransform: Fit {
    /// The transformer produced once training completes.
    type Transformer: Transform;

    /// Build the transformer from the trained state.
    ///
    /// Called at most once, after `complete`.
    fn build_transform(&mut self) -> Result<Self::Transformer>;
}

/// State machine wrapper that drives a [`Fit`] through training.
#[derive(Debug)]
pub struct Estimator<F: Fit> {
    name: String,
    state: TrainingState,
    context: Arc<AnnotationContext>,
    logic: F,
    transformer_created: bool,
}

impl<F: Fit> Estimator<F> {
    /// Wrap `logic` in a fresh `Pending` estimator named [`Fit::NAME`].
    pub fn new(context: Arc<AnnotationContext>, logic: F) -> Self {
        Estimator::with_name(F::NAME, context, logic)
    }

    /// Like [`Estimator::new`] with an explicit name, for composed
    /// estimators that need to distinguish their parts.
    pub fn with_name(name: impl Into<String>, context: Arc<AnnotationContext>, logic: F) -> Self {
        Estimator {
            name: name.into(),
            state: TrainingState::Pending,
            context,
            logic,
            transformer_created: false,
        }
    }

    /// The estimator's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TrainingState {
        self.state
    }

    /// The annotation context annotations are published to.
    pub fn context(&self) -> &Arc<AnnotationContext> {
        &self.context
    }

    /// Whether training is over, successfully or because no data was wanted.
    pub fn is_training_complete(&self) -> bool {
        matches!(self.state, TrainingState::Finished | TrainingState::Completed)
    }

    /// Move from `Pending` into training.
    ///
    /// Lands in `Training` if the algorithm wants data, otherwise directly
    /// in `Finished`.
    pub fn begin_training(&mut self) -> Result<()> {
        self.guard("begin_training", &[TrainingState::Pending])?;
        let wants_data = self.logic.begin(&self.context)?;
        self.state = if wants_data { TrainingState::Training } else { TrainingState::Finished };
        tracing::debug!(name = %self.name, state = %self.state, "training started");
        Ok(())
    }

    /// Feed one batch of training items.
    ///
    /// Only valid in `Training`; an empty batch is rejected. A
    /// [`FitResult::Complete`] return moves the estimator to `Finished`.
    pub fn fit(&mut self, items: Vec<F::Item>) -> Result<FitResult> {
        self.guard("fit", &[TrainingState::Training])?;
        if items.is_empty() {
            return Err(Error::EmptyBatch(self.name.clone()));
        }
        let count = items.len();
        let result = self.logic.fit(items)?;
        tracing::trace!(name = %self.name, count, result = %result, "fit batch");
        if result == FitResult::Complete {
            self.state = TrainingState::Finished;
        }
        Ok(result)
    }

    /// Signal that the input stream is exhausted.
    ///
    /// From `Training` the estimator stays there only if the algorithm asks
    /// for another pass; calling this in `Finished` is a no-op.
    pub fn on_data_completed(&mut self) -> Result<()> {
        self.guard("on_data_completed", &[TrainingState::Training, TrainingState::Finished])?;
        if self.state == TrainingState::Training && !self.logic.end_of_data()? {
            self.state = TrainingState::Finished;
        }
        Ok(())
    }

    /// Finalize training and publish annotations.
    pub fn complete_training(&mut self) -> Result<()> {
        self.guard("complete_training", &[TrainingState::Training, TrainingState::Finished])?;
        self.logic.complete(&self.context)?;
        self.state = TrainingState::Completed;
        tracing::debug!(name = %self.name, "training completed");
        Ok(())
    }

    fn guard(&self, operation: &'static str, allowed: &[TrainingState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidTrainingState {
                name: self.name.clone(),
                operation,
                state: self.state,
            })
        }
    }
}

impl<F: FitTransform> Estimator<F> {
    /// Build the trained transformer.
    ///
    /// Valid exactly once, after [`Estimator::complete_training`].
    pub fn create_transformer(&mut self) -> Result<F::Transformer> {
        self.guard("create_transformer", &[TrainingState::Completed])?;
        if self.transformer_created {
            return Err(Error::TransformerAlreadyCreated(self.name.clone()));
        }
        let transformer = self.logic.build_transform()?;
        self.transformer_created = true;
        Ok(transformer)
    }
}
