//! Single-pass column statistics
//!
//! [`StatsFit`] is a training-only stage: it consumes one column of samples,
//! accumulates count/sum/min/max, and publishes the result as an
//! [`Annotation::Statistics`] for downstream consumers such as the mean
//! imputer and the max-abs scaler. It produces no transformer of its own.

use std::marker::PhantomData;

use featurize_core::{
    Annotation, AnnotationContext, Error, Fit, FitResult, Result, Statistics,
};

/// Producer name statistics are published under.
pub const STATS_PRODUCER: &str = "Stats";

/// Types a statistics pass can draw an optional numeric sample from.
pub trait Sample {
    /// The numeric sample, or `None` for a missing value.
    fn sample(&self) -> Option<f64>;
}

impl Sample for f64 {
    fn sample(&self) -> Option<f64> {
        if self.is_nan() {
            None
        } else {
            Some(*self)
        }
    }
}

impl Sample for f32 {
    fn sample(&self) -> Option<f64> {
        if self.is_nan() {
            None
        } else {
            Some(f64::from(*self))
        }
    }
}

impl<T: Sample> Sample for Option<T> {
    fn sample(&self) -> Option<f64> {
        self.as_ref().and_then(Sample::sample)
    }
}

/// Training-only estimator accumulating [`Statistics`] over one column.
#[derive(Debug)]
pub struct StatsFit<T> {
    column: usize,
    stats: Statistics,
    _input: PhantomData<fn(T)>,
}

impl<T> StatsFit<T> {
    /// Accumulate statistics for `column`.
    pub fn new(column: usize) -> Self {
        StatsFit {
            column,
            stats: Statistics { count: 0, sum: 0.0, min: 0.0, max: 0.0 },
            _input: PhantomData,
        }
    }

    fn observe(&mut self, sample: f64) {
        if self.stats.count == 0 {
            self.stats.min = sample;
            self.stats.max = sample;
        } else {
            self.stats.min = self.stats.min.min(sample);
            self.stats.max = self.stats.max.max(sample);
        }
        self.stats.count += 1;
        self.stats.sum += sample;
    }
}

impl<T: Sample> Fit for StatsFit<T> {
    type Item = T;

    const NAME: &'static str = STATS_PRODUCER;

    fn begin(&mut self, ctx: &AnnotationContext) -> Result<bool> {
        if self.column >= ctx.column_count() {
            return Err(Error::ColumnOutOfRange {
                column: self.column,
                columns: ctx.column_count(),
            });
        }
        Ok(true)
    }

    fn fit(&mut self, items: Vec<T>) -> Result<FitResult> {
        for item in &items {
            if let Some(sample) = item.sample() {
                self.observe(sample);
            }
        }
        Ok(FitResult::Continue)
    }

    fn complete(&mut self, ctx: &AnnotationContext) -> Result<()> {
        ctx.publish(self.column, Self::NAME, Annotation::Statistics(self.stats))
    }
}

/// Fetch the statistics published for `(column, producer)`.
///
/// Absence or a non-statistics annotation under that name is a domain error;
/// consumers depend on an upstream [`StatsFit`] having completed first.
pub fn lookup_statistics(
    ctx: &AnnotationContext,
    column: usize,
    producer: &str,
) -> Result<Statistics> {
    let annotation = ctx.lookup(column, producer)?.ok_or_else(|| Error::AnnotationNotFound {
        column,
        producer: producer.to_string(),
    })?;
    annotation.as_statistics().copied().ok_or_else(|| {
        Error::InvalidArgument(format!("annotation under `{producer}` is not statistics"))
    })
}
