//! Sequential estimator chaining
//!
//! A pipeline trains a list of stages over one raw stream, stage by stage:
//! the active stage consumes batches until it finishes, later stages then
//! see the stream again from the start. Stages share one item type; stages
//! that only publish annotations drop out of the trained transformer chain.

use std::fmt;
use std::sync::Arc;

use featurize_core::{
    AnnotationContext, ArchiveReader, ArchiveWriter, Error, Estimator, Fit, FitResult,
    FitTransform, FromArchive, Result, Transform, TrainingState, Version,
};

const ARCHIVE_VERSION: Version = Version::new(1, 0);

/// One trainable slot in a pipeline, erased over its estimator type.
trait PipelineStage<T>: Send {
    fn name(&self) -> &str;

    fn state(&self) -> TrainingState;

    fn begin_training(&mut self) -> Result<()>;

    fn fit(&mut self, items: Vec<T>) -> Result<FitResult>;

    fn on_data_completed(&mut self) -> Result<()>;

    fn complete_training(&mut self) -> Result<()>;

    /// The trained transformer, or `None` for annotation-only stages.
    fn take_transformer(&mut self) -> Result<Option<Box<dyn Transform<Input = T, Output = T>>>>;
}

struct TrainStage<F: Fit> {
    estimator: Estimator<F>,
}

impl<T, F> PipelineStage<T> for TrainStage<F>
where
    F: Fit<Item = T> + Send,
{
    fn name(&self) -> &str {
        self.estimator.name()
    }

    fn state(&self) -> TrainingState {
        self.estimator.state()
    }

    fn begin_training(&mut self) -> Result<()> {
        self.estimator.begin_training()
    }

    fn fit(&mut self, items: Vec<T>) -> Result<FitResult> {
        self.estimator.fit(items)
    }

    fn on_data_completed(&mut self) -> Result<()> {
        self.estimator.on_data_completed()
    }

    fn complete_training(&mut self) -> Result<()> {
        self.estimator.complete_training()
    }

    fn take_transformer(&mut self) -> Result<Option<Box<dyn Transform<Input = T, Output = T>>>> {
        Ok(None)
    }
}

struct TransformStage<F: FitTransform> {
    estimator: Estimator<F>,
}

impl<T, F> PipelineStage<T> for TransformStage<F>
where
    F: FitTransform<Item = T> + Send,
    F::Transformer: Transform<Input = T, Output = T> + 'static,
{
    fn name(&self) -> &str {
        self.estimator.name()
    }

    fn state(&self) -> TrainingState {
        self.estimator.state()
    }

    fn begin_training(&mut self) -> Result<()> {
        self.estimator.begin_training()
    }

    fn fit(&mut self, items: Vec<T>) -> Result<FitResult> {
        self.estimator.fit(items)
    }

    fn on_data_completed(&mut self) -> Result<()> {
        self.estimator.on_data_completed()
    }

    fn complete_training(&mut self) -> Result<()> {
        self.estimator.complete_training()
    }

    fn take_transformer(&mut self) -> Result<Option<Box<dyn Transform<Input = T, Output = T>>>> {
        Ok(Some(Box::new(self.estimator.create_transformer()?)))
    }
}

/// Assembles a [`PipelineFit`] estimator stage by stage.
pub struct PipelineBuilder<T> {
    context: Arc<AnnotationContext>,
    stages: Vec<Box<dyn PipelineStage<T>>>,
}

impl<T: 'static> PipelineBuilder<T> {
    /// Start an empty pipeline over `context`.
    pub fn new(context: Arc<AnnotationContext>) -> Self {
        PipelineBuilder { context, stages: Vec::new() }
    }

    /// Append a stage that trains and annotates but adds no transformer.
    #[must_use]
    pub fn train_only<F>(mut self, logic: F) -> Self
    where
        F: Fit<Item = T> + Send + 'static,
    {
        let estimator = Estimator::new(Arc::clone(&self.context), logic);
        self.stages.push(Box::new(TrainStage { estimator }));
        self
    }

    /// Append a stage whose trained transformer joins the chain.
    #[must_use]
    pub fn stage<F>(mut self, logic: F) -> Self
    where
        F: FitTransform<Item = T> + Send + 'static,
        F::Transformer: Transform<Input = T, Output = T> + 'static,
    {
        let estimator = Estimator::new(Arc::clone(&self.context), logic);
        self.stages.push(Box::new(TransformStage { estimator }));
        self
    }

    /// Finish the builder into a `Pending` estimator.
    pub fn build(self) -> Result<Estimator<PipelineFit<T>>> {
        if self.stages.is_empty() {
            return Err(Error::InvalidArgument("a pipeline needs at least one stage".into()));
        }
        Ok(Estimator::new(self.context, PipelineFit { stages: self.stages, active: 0 }))
    }
}

/// Training logic driving pipeline stages over a shared raw stream.
///
/// When the active stage finishes mid-stream the pipeline reports
/// [`FitResult::Reset`] so the caller rewinds the source, giving the next
/// stage the stream from the start.
pub struct PipelineFit<T> {
    stages: Vec<Box<dyn PipelineStage<T>>>,
    active: usize,
}

impl<T> fmt::Debug for PipelineFit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineFit")
            .field("stages", &self.stages.len())
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl<T> PipelineFit<T> {
    /// Begin stages from `active` until one trains or all finish.
    fn cascade_begin(&mut self) -> Result<bool> {
        while self.active < self.stages.len() {
            let stage = &mut self.stages[self.active];
            if stage.state() == TrainingState::Pending {
                stage.begin_training()?;
            }
            match stage.state() {
                TrainingState::Training => {
                    tracing::debug!(stage = stage.name(), "pipeline stage training");
                    return Ok(true);
                }
                TrainingState::Completed => self.active += 1,
                _ => {
                    // stages that want no data finish without seeing any
                    stage.complete_training()?;
                    self.active += 1;
                }
            }
        }
        Ok(false)
    }
}

impl<T> Fit for PipelineFit<T> {
    type Item = T;

    const NAME: &'static str = "Pipeline";

    fn begin(&mut self, _ctx: &AnnotationContext) -> Result<bool> {
        self.active = 0;
        self.cascade_begin()
    }

    fn fit(&mut self, items: Vec<T>) -> Result<FitResult> {
        // training keeps active in range
        let stage = &mut self.stages[self.active];
        match stage.fit(items)? {
            FitResult::Continue => Ok(FitResult::Continue),
            FitResult::Reset => Ok(FitResult::Reset),
            FitResult::Complete => {
                stage.complete_training()?;
                self.active += 1;
                if self.cascade_begin()? {
                    // the next stage wants the stream from the start
                    Ok(FitResult::Reset)
                } else {
                    Ok(FitResult::Complete)
                }
            }
        }
    }

    fn end_of_data(&mut self) -> Result<bool> {
        let stage = &mut self.stages[self.active];
        stage.on_data_completed()?;
        if stage.state() == TrainingState::Training {
            // the active stage wants another pass
            return Ok(true);
        }
        stage.complete_training()?;
        self.active += 1;
        self.cascade_begin()
    }

    fn complete(&mut self, _ctx: &AnnotationContext) -> Result<()> {
        for stage in self.stages.iter_mut().skip(self.active) {
            if stage.state() == TrainingState::Pending {
                stage.begin_training()?;
            }
            if stage.state() != TrainingState::Completed {
                stage.complete_training()?;
            }
        }
        self.active = self.stages.len();
        Ok(())
    }
}

impl<T: 'static> FitTransform for PipelineFit<T> {
    type Transformer = PipelineTransform<T>;

    fn build_transform(&mut self) -> Result<PipelineTransform<T>> {
        let mut stages = Vec::new();
        for stage in &mut self.stages {
            if let Some(transformer) = stage.take_transformer()? {
                stages.push(transformer);
            }
        }
        Ok(PipelineTransform { stages })
    }
}

/// Loader for one stage of a saved pipeline.
pub type StageLoader<T> = fn(&mut ArchiveReader<'_>) -> Result<Box<dyn Transform<Input = T, Output = T>>>;

/// Read one stage of concrete type `S`, boxed for a loader table.
pub fn load_stage<T, S>(
    archive: &mut ArchiveReader<'_>,
) -> Result<Box<dyn Transform<Input = T, Output = T>>>
where
    S: Transform<Input = T, Output = T> + FromArchive + 'static,
{
    Ok(Box::new(S::from_archive(archive)?))
}

/// Trained transformer chain; items flow through the stages in order.
pub struct PipelineTransform<T> {
    stages: Vec<Box<dyn Transform<Input = T, Output = T>>>,
}

impl<T> fmt::Debug for PipelineTransform<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineTransform").field("stages", &self.stages.len()).finish()
    }
}

impl<T> PipelineTransform<T> {
    /// Number of chained transformers.
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Rebuild a saved pipeline with one loader per stage, in save order.
    pub fn from_archive_with(
        archive: &mut ArchiveReader<'_>,
        loaders: &[StageLoader<T>],
    ) -> Result<Self> {
        archive.expect_version(ARCHIVE_VERSION)?;
        let count: usize = archive.read()?;
        if count != loaders.len() {
            return Err(Error::MalformedArchive(format!(
                "pipeline archive has {count} stages but {} loaders were supplied",
                loaders.len()
            )));
        }
        let mut stages = Vec::with_capacity(count);
        for loader in loaders {
            stages.push(loader(archive)?);
        }
        Ok(PipelineTransform { stages })
    }
}

impl<T> Transform for PipelineTransform<T> {
    type Input = T;
    type Output = T;

    fn execute(&mut self, input: T, sink: &mut dyn FnMut(T)) -> Result<()> {
        let mut frontier = vec![input];
        for stage in &mut self.stages {
            let mut next = Vec::new();
            for item in frontier {
                stage.execute(item, &mut |out| next.push(out))?;
            }
            frontier = next;
        }
        for item in frontier {
            sink(item);
        }
        Ok(())
    }

    fn flush(&mut self, sink: &mut dyn FnMut(T)) -> Result<()> {
        // items released by flushing stage i still traverse stages i+1..
        let mut carried: Vec<T> = Vec::new();
        for index in 0..self.stages.len() {
            let stage = &mut self.stages[index];
            let mut released = Vec::new();
            for item in carried {
                stage.execute(item, &mut |out| released.push(out))?;
            }
            stage.flush(&mut |out| released.push(out))?;
            carried = released;
        }
        for item in carried {
            sink(item);
        }
        Ok(())
    }

    fn save(&self, archive: &mut ArchiveWriter) -> Result<()> {
        archive.write_version(ARCHIVE_VERSION)?;
        archive.write(&self.stages.len())?;
        for stage in &self.stages {
            stage.save(archive)?;
        }
        Ok(())
    }
}
