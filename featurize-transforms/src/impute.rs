//! Mean imputation for missing values
//!
//! [`MeanImputeFit`] consumes no training data itself: it captures the mean
//! from the [`Statistics`](featurize_core::Statistics) annotation an upstream
//! [`StatsFit`](crate::stats::StatsFit) published for its column, and its
//! transformer replaces missing values with that mean.

use featurize_core::{
    AnnotationContext, ArchiveReader, ArchiveWriter, Error, Fit, FitResult, FitTransform,
    FromArchive, Result, Transform, Version,
};

use crate::stats::{lookup_statistics, STATS_PRODUCER};

const ARCHIVE_VERSION: Version = Version::new(1, 0);

/// Annotation consumer capturing the mean of one column.
#[derive(Debug)]
pub struct MeanImputeFit {
    column: usize,
    producer: String,
    mean: Option<f64>,
}

impl MeanImputeFit {
    /// Impute `column` from statistics published under [`STATS_PRODUCER`].
    pub fn new(column: usize) -> Self {
        MeanImputeFit::with_producer(column, STATS_PRODUCER)
    }

    /// Impute `column` from statistics published under `producer`.
    pub fn with_producer(column: usize, producer: impl Into<String>) -> Self {
        MeanImputeFit { column, producer: producer.into(), mean: None }
    }
}

impl Fit for MeanImputeFit {
    type Item = Option<f64>;

    const NAME: &'static str = "MeanImpute";

    fn begin(&mut self, _ctx: &AnnotationContext) -> Result<bool> {
        // trains from published statistics, not from data
        Ok(false)
    }

    fn fit(&mut self, _items: Vec<Option<f64>>) -> Result<FitResult> {
        Err(Error::InvalidArgument("mean imputation does not consume training data".into()))
    }

    fn complete(&mut self, ctx: &AnnotationContext) -> Result<()> {
        let stats = lookup_statistics(ctx, self.column, &self.producer)?;
        let mean = stats.mean().ok_or_else(|| {
            Error::InvalidArgument("cannot impute a mean from zero observed samples".into())
        })?;
        self.mean = Some(mean);
        Ok(())
    }
}

impl FitTransform for MeanImputeFit {
    type Transformer = MeanImputeTransform;

    fn build_transform(&mut self) -> Result<MeanImputeTransform> {
        let mean = self.mean.ok_or_else(|| {
            Error::InvalidArgument("mean was not captured during training".into())
        })?;
        Ok(MeanImputeTransform { mean })
    }
}

/// Replaces missing values with the trained mean.
///
/// `None` and NaN both count as missing.
#[derive(Debug, Clone, PartialEq)]
pub struct MeanImputeTransform {
    mean: f64,
}

impl MeanImputeTransform {
    /// The trained mean substituted for missing values.
    pub fn mean(&self) -> f64 {
        self.mean
    }
}

impl Transform for MeanImputeTransform {
    type Input = Option<f64>;
    type Output = f64;

    fn execute(&mut self, input: Option<f64>, sink: &mut dyn FnMut(f64)) -> Result<()> {
        match input {
            Some(value) if !value.is_nan() => sink(value),
            _ => sink(self.mean),
        }
        Ok(())
    }

    fn flush(&mut self, _sink: &mut dyn FnMut(f64)) -> Result<()> {
        Ok(())
    }

    fn save(&self, archive: &mut ArchiveWriter) -> Result<()> {
        archive.write_version(ARCHIVE_VERSION)?;
        archive.write(&self.mean)
    }
}

impl FromArchive for MeanImputeTransform {
    fn from_archive(archive: &mut ArchiveReader<'_>) -> Result<Self> {
        archive.expect_version(ARCHIVE_VERSION)?;
        Ok(MeanImputeTransform { mean: archive.read()? })
    }
}
