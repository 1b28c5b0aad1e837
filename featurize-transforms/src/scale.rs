//! Max-abs scaling
//!
//! Scales a column into `[-1, 1]` by dividing through the largest observed
//! magnitude. Like the mean imputer, the estimator side consumes no data of
//! its own; it reads the upstream statistics annotation.

use featurize_core::{
    AnnotationContext, ArchiveReader, ArchiveWriter, Error, Fit, FitResult, FitTransform,
    FromArchive, Result, Transform, Version,
};

use crate::stats::{lookup_statistics, STATS_PRODUCER};

const ARCHIVE_VERSION: Version = Version::new(1, 0);

/// Annotation consumer capturing the scale `max(|min|, |max|)` of one column.
#[derive(Debug)]
pub struct MaxAbsScaleFit {
    column: usize,
    producer: String,
    scale: Option<f64>,
}

impl MaxAbsScaleFit {
    /// Scale `column` from statistics published under [`STATS_PRODUCER`].
    pub fn new(column: usize) -> Self {
        MaxAbsScaleFit::with_producer(column, STATS_PRODUCER)
    }

    /// Scale `column` from statistics published under `producer`.
    pub fn with_producer(column: usize, producer: impl Into<String>) -> Self {
        MaxAbsScaleFit { column, producer: producer.into(), scale: None }
    }
}

impl Fit for MaxAbsScaleFit {
    type Item = f64;

    const NAME: &'static str = "MaxAbsScale";

    fn begin(&mut self, _ctx: &AnnotationContext) -> Result<bool> {
        Ok(false)
    }

    fn fit(&mut self, _items: Vec<f64>) -> Result<FitResult> {
        Err(Error::InvalidArgument("max-abs scaling does not consume training data".into()))
    }

    fn complete(&mut self, ctx: &AnnotationContext) -> Result<()> {
        let stats = lookup_statistics(ctx, self.column, &self.producer)?;
        if stats.count == 0 {
            return Err(Error::InvalidArgument(
                "cannot derive a scale from zero observed samples".into(),
            ));
        }
        let scale = stats.min.abs().max(stats.max.abs());
        // an all-zero column scales by 1 to keep division defined
        self.scale = Some(if scale == 0.0 { 1.0 } else { scale });
        Ok(())
    }
}

impl FitTransform for MaxAbsScaleFit {
    type Transformer = MaxAbsScaleTransform;

    fn build_transform(&mut self) -> Result<MaxAbsScaleTransform> {
        let scale = self.scale.ok_or_else(|| {
            Error::InvalidArgument("scale was not captured during training".into())
        })?;
        Ok(MaxAbsScaleTransform { scale })
    }
}

/// Divides each value by the trained scale.
#[derive(Debug, Clone, PartialEq)]
pub struct MaxAbsScaleTransform {
    scale: f64,
}

impl MaxAbsScaleTransform {
    /// The trained divisor.
    pub fn scale(&self) -> f64 {
        self.scale
    }
}

impl Transform for MaxAbsScaleTransform {
    type Input = f64;
    type Output = f64;

    fn execute(&mut self, input: f64, sink: &mut dyn FnMut(f64)) -> Result<()> {
        sink(input / self.scale);
        Ok(())
    }

    fn flush(&mut self, _sink: &mut dyn FnMut(f64)) -> Result<()> {
        Ok(())
    }

    fn save(&self, archive: &mut ArchiveWriter) -> Result<()> {
        archive.write_version(ARCHIVE_VERSION)?;
        archive.write(&self.scale)
    }
}

impl FromArchive for MaxAbsScaleTransform {
    fn from_archive(archive: &mut ArchiveReader<'_>) -> Result<Self> {
        archive.expect_version(ARCHIVE_VERSION)?;
        Ok(MaxAbsScaleTransform { scale: archive.read()? })
    }
}
