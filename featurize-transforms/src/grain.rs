//! Grain-keyed estimator multiplexing
//!
//! A grain wrapper trains one inner estimator per distinct key in a keyed
//! stream, then harvests whatever each inner published into a single
//! per-grain annotation. The matching transformer routes keyed inputs to the
//! transformer trained for that key, with an optional fallback template for
//! keys never seen during training.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use featurize_core::{
    Annotation, AnnotationContext, ArchiveReader, ArchiveWriter, Error, Estimator, Fit, FitResult,
    FitTransform, FromArchive, GrainAnnotations, Result, Transform, TrainingState, Version,
};

const ARCHIVE_VERSION: Version = Version::new(1, 0);

/// The producer name a grain wrapper publishes under for inner producer
/// `inner`.
pub fn grain_producer(inner: &str) -> String {
    format!("Grain{inner}")
}

/// Keys a grain wrapper can route on.
///
/// Harvested annotations are keyed by the `Display` form, so distinct keys
/// must render distinctly.
pub trait GrainKey: Ord + Clone + Display + Serialize + DeserializeOwned + Send + 'static {}

impl<K> GrainKey for K where K: Ord + Clone + Display + Serialize + DeserializeOwned + Send + 'static
{}

type GrainFactory<F> = Box<dyn FnMut(Arc<AnnotationContext>) -> Result<Estimator<F>> + Send>;

type GrainFallback<F> = Box<dyn FnOnce() -> Result<<F as FitTransform>::Transformer> + Send>;

/// Training logic multiplexing one inner estimator per grain key.
///
/// Built through [`GrainEstimatorBuilder`]; inner estimators are created
/// lazily the first time their key appears.
pub struct GrainFit<K, F: FitTransform> {
    context: Arc<AnnotationContext>,
    factory: GrainFactory<F>,
    fallback: Option<GrainFallback<F>>,
    instances: BTreeMap<K, Estimator<F>>,
    remaining: Option<usize>,
    inference_only: bool,
}

impl<K, F: FitTransform> fmt::Debug for GrainFit<K, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrainFit")
            .field("instances", &self.instances.len())
            .field("remaining", &self.remaining)
            .field("inference_only", &self.inference_only)
            .finish_non_exhaustive()
    }
}

impl<K: GrainKey, F: FitTransform> Fit for GrainFit<K, F> {
    type Item = (K, F::Item);

    const NAME: &'static str = "Grain";

    fn begin(&mut self, _ctx: &AnnotationContext) -> Result<bool> {
        // inference-only wrappers skip training and serve keys from the
        // fallback template
        Ok(!self.inference_only)
    }

    fn fit(&mut self, mut items: Vec<(K, F::Item)>) -> Result<FitResult> {
        if let Some(remaining) = self.remaining {
            items.truncate(remaining);
        }
        let consumed = items.len();
        for (key, item) in items {
            let estimator = match self.instances.entry(key) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    tracing::trace!(grain = %entry.key(), "creating per-grain estimator");
                    let mut estimator = (self.factory)(Arc::clone(&self.context))?;
                    estimator.begin_training()?;
                    entry.insert(estimator)
                }
            };
            // inners that never train, or finished early, still consume budget
            if estimator.state() != TrainingState::Training {
                continue;
            }
            if estimator.fit(vec![item])? == FitResult::Reset {
                return Err(Error::GrainReset);
            }
        }
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= consumed;
            if *remaining == 0 {
                tracing::debug!(grains = self.instances.len(), "grain training budget exhausted");
                return Ok(FitResult::Complete);
            }
        }
        Ok(FitResult::Continue)
    }

    fn complete(&mut self, ctx: &AnnotationContext) -> Result<()> {
        if self.inference_only {
            // training never ran, so there are no inners to complete or harvest
            return Ok(());
        }

        let inner = F::NAME;
        let columns = ctx.column_count();
        // The inner producer name must be unclaimed, or freshly published
        // annotations cannot be told apart from pre-existing ones.
        for column in 0..columns {
            if ctx.annotation_count(column, inner)? != 0 {
                return Err(Error::GrainHarvest(format!(
                    "producer `{inner}` already has annotations on column {column}"
                )));
            }
        }
        let mut baseline = Vec::with_capacity(columns);
        for column in 0..columns {
            baseline.push(ctx.producers(column)?);
        }

        let mut harvest_column = None;
        let mut aggregate = BTreeMap::new();
        for (key, estimator) in &mut self.instances {
            if estimator.state() != TrainingState::Completed {
                estimator.complete_training()?;
            }
            let mut found: Option<(usize, Arc<Annotation>)> = None;
            for column in 0..columns {
                for producer in ctx.producers(column)? {
                    if baseline[column].contains(&producer) {
                        continue;
                    }
                    if producer != inner {
                        return Err(Error::GrainHarvest(format!(
                            "grain `{key}` published under foreign producer `{producer}`"
                        )));
                    }
                    let mut taken = ctx.take(column, inner)?;
                    if taken.len() != 1 {
                        return Err(Error::GrainHarvest(format!(
                            "grain `{key}` published {} annotations under `{inner}`",
                            taken.len()
                        )));
                    }
                    if found.is_some() {
                        return Err(Error::GrainHarvest(format!(
                            "grain `{key}` published annotations on multiple columns"
                        )));
                    }
                    let Some(annotation) = taken.pop() else { continue };
                    found = Some((column, annotation));
                }
            }
            let (column, annotation) = found.ok_or_else(|| {
                Error::GrainHarvest(format!("grain `{key}` published nothing under `{inner}`"))
            })?;
            match harvest_column {
                Some(expected) if expected != column => {
                    return Err(Error::GrainHarvest(
                        "per-grain annotations are split across columns".to_string(),
                    ));
                }
                _ => harvest_column = Some(column),
            }
            let display = key.to_string();
            if aggregate.insert(display.clone(), annotation).is_some() {
                return Err(Error::GrainHarvest(format!(
                    "two grains share the display form `{display}`"
                )));
            }
        }

        if let Some(column) = harvest_column {
            let producer = grain_producer(inner);
            tracing::debug!(
                %producer,
                grains = aggregate.len(),
                column,
                "publishing per-grain annotations"
            );
            ctx.publish(column, &producer, Annotation::PerGrain(GrainAnnotations::new(aggregate)))?;
        }
        Ok(())
    }
}

impl<K: GrainKey, F: FitTransform> FitTransform for GrainFit<K, F>
where
    F::Transformer: FromArchive,
{
    type Transformer = GrainTransform<K, F::Transformer>;

    fn build_transform(&mut self) -> Result<Self::Transformer> {
        let mut transformers = BTreeMap::new();
        for (key, mut estimator) in std::mem::take(&mut self.instances) {
            transformers.insert(key, estimator.create_transformer()?);
        }
        let fallback = match self.fallback.take() {
            Some(factory) => {
                let template = factory()?;
                let mut writer = ArchiveWriter::new();
                template.save(&mut writer)?;
                Some(writer.into_bytes())
            }
            None => None,
        };
        if transformers.is_empty() && fallback.is_none() {
            return Err(Error::MissingGrainFallback);
        }
        Ok(GrainTransform { transformers, fallback })
    }
}

/// Builder for a grain-wrapped estimator.
///
/// `factory` creates a fresh inner estimator per key. The resulting outer
/// estimator is named after the inner producer, so a wrapped `Stats` trains
/// as `GrainStats`.
pub struct GrainEstimatorBuilder<K, F: FitTransform> {
    factory: GrainFactory<F>,
    fallback: Option<GrainFallback<F>>,
    max_training_items: Option<usize>,
    inference_only: bool,
    _key: PhantomData<fn(K)>,
}

impl<K: GrainKey, F: FitTransform> GrainEstimatorBuilder<K, F> {
    /// Start a builder around an inner estimator factory.
    pub fn new<M>(factory: M) -> Self
    where
        M: FnMut(Arc<AnnotationContext>) -> Result<Estimator<F>> + Send + 'static,
    {
        GrainEstimatorBuilder {
            factory: Box::new(factory),
            fallback: None,
            max_training_items: None,
            inference_only: false,
            _key: PhantomData,
        }
    }

    /// Cap the total number of keyed items consumed during training.
    ///
    /// Items past the cap are dropped and training completes on its own.
    #[must_use]
    pub fn max_training_items(mut self, limit: usize) -> Self {
        self.max_training_items = Some(limit);
        self
    }

    /// Skip training entirely: the wrapper begins already finished and every
    /// key is served from the fallback template at inference.
    #[must_use]
    pub fn inference_only(mut self) -> Self {
        self.inference_only = true;
        self
    }

    /// Template transformer for keys never seen during training.
    #[must_use]
    pub fn transformer_fallback<M>(mut self, fallback: M) -> Self
    where
        M: FnOnce() -> Result<F::Transformer> + Send + 'static,
    {
        self.fallback = Some(Box::new(fallback));
        self
    }

    /// Finish the builder into a `Pending` estimator.
    pub fn build(self, context: Arc<AnnotationContext>) -> Result<Estimator<GrainFit<K, F>>> {
        if self.max_training_items == Some(0) {
            return Err(Error::InvalidArgument("grain training budget must be positive".into()));
        }
        let logic = GrainFit {
            context: Arc::clone(&context),
            factory: self.factory,
            fallback: self.fallback,
            instances: BTreeMap::new(),
            remaining: self.max_training_items,
            inference_only: self.inference_only,
        };
        Ok(Estimator::with_name(grain_producer(F::NAME), context, logic))
    }
}

/// Transformer routing keyed inputs to per-grain transformers.
#[derive(Debug)]
pub struct GrainTransform<K, T> {
    transformers: BTreeMap<K, T>,
    fallback: Option<Vec<u8>>,
}

impl<K, T> GrainTransform<K, T> {
    /// Number of grain-specific transformers currently held.
    pub fn grain_count(&self) -> usize {
        self.transformers.len()
    }

    /// Whether unseen grains can be served from a fallback template.
    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

impl<K: GrainKey, T: Transform + FromArchive> Transform for GrainTransform<K, T> {
    type Input = (K, T::Input);
    type Output = (K, T::Output);

    fn execute(
        &mut self,
        input: (K, T::Input),
        sink: &mut dyn FnMut((K, T::Output)),
    ) -> Result<()> {
        let (key, item) = input;
        let tag = key.clone();
        let transformer = match self.transformers.entry(key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let Some(template) = self.fallback.as_deref() else {
                    return Err(Error::GrainNotFound(entry.key().to_string()));
                };
                tracing::trace!(grain = %entry.key(), "instantiating fallback transformer");
                entry.insert(T::from_archive(&mut ArchiveReader::new(template))?)
            }
        };
        transformer.execute(item, &mut |output| sink((tag.clone(), output)))
    }

    fn flush(&mut self, sink: &mut dyn FnMut((K, T::Output))) -> Result<()> {
        for (key, transformer) in &mut self.transformers {
            let tag = key.clone();
            transformer.flush(&mut |output| sink((tag.clone(), output)))?;
        }
        Ok(())
    }

    fn save(&self, archive: &mut ArchiveWriter) -> Result<()> {
        archive.write_version(ARCHIVE_VERSION)?;
        archive.write(&self.transformers.len())?;
        for (key, transformer) in &self.transformers {
            archive.write(key)?;
            transformer.save(archive)?;
        }
        match &self.fallback {
            Some(template) => {
                archive.write(&true)?;
                // raw template bytes; the embedded transformer knows its own
                // extent when read back
                archive.write_raw(template)
            }
            None => archive.write(&false),
        }
    }
}

impl<K: GrainKey, T: Transform + FromArchive> FromArchive for GrainTransform<K, T> {
    fn from_archive(archive: &mut ArchiveReader<'_>) -> Result<Self> {
        archive.expect_version(ARCHIVE_VERSION)?;
        let count: usize = archive.read()?;
        let mut transformers = BTreeMap::new();
        for _ in 0..count {
            let key: K = archive.read()?;
            let transformer = T::from_archive(archive)?;
            transformers.insert(key, transformer);
        }
        let has_fallback: bool = archive.read()?;
        let fallback = if has_fallback {
            // validate the template and recapture its exact byte extent
            let start = archive.position();
            T::from_archive(archive)?;
            let end = archive.position();
            Some(archive.slice(start, end)?.to_vec())
        } else {
            None
        };
        if transformers.is_empty() && fallback.is_none() {
            return Err(Error::MissingGrainFallback);
        }
        Ok(GrainTransform { transformers, fallback })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use featurize_core::{transform_all, Statistics};
    use test_case::test_case;

    use super::*;

    struct SumFit {
        total: i64,
    }

    impl Fit for SumFit {
        type Item = i64;

        const NAME: &'static str = "Sum";

        fn begin(&mut self, _ctx: &AnnotationContext) -> Result<bool> {
            Ok(true)
        }

        fn fit(&mut self, items: Vec<i64>) -> Result<FitResult> {
            self.total += items.iter().sum::<i64>();
            Ok(FitResult::Continue)
        }

        #[allow(clippy::cast_precision_loss)]
        fn complete(&mut self, ctx: &AnnotationContext) -> Result<()> {
            ctx.publish(0, Self::NAME, unit_stat(self.total as f64))
        }
    }

    impl FitTransform for SumFit {
        type Transformer = OffsetBy;

        fn build_transform(&mut self) -> Result<OffsetBy> {
            Ok(OffsetBy { amount: self.total })
        }
    }

    #[derive(Debug, PartialEq)]
    struct OffsetBy {
        amount: i64,
    }

    impl Transform for OffsetBy {
        type Input = i64;
        type Output = i64;

        fn execute(&mut self, input: i64, sink: &mut dyn FnMut(i64)) -> Result<()> {
            sink(input + self.amount);
            Ok(())
        }

        fn flush(&mut self, _sink: &mut dyn FnMut(i64)) -> Result<()> {
            Ok(())
        }

        fn save(&self, archive: &mut ArchiveWriter) -> Result<()> {
            archive.write_version(ARCHIVE_VERSION)?;
            archive.write(&self.amount)
        }
    }

    impl FromArchive for OffsetBy {
        fn from_archive(archive: &mut ArchiveReader<'_>) -> Result<Self> {
            archive.expect_version(ARCHIVE_VERSION)?;
            Ok(OffsetBy { amount: archive.read()? })
        }
    }

    fn unit_stat(value: f64) -> Annotation {
        Annotation::Statistics(Statistics { count: 1, sum: value, min: value, max: value })
    }

    fn sum_builder() -> GrainEstimatorBuilder<String, SumFit> {
        GrainEstimatorBuilder::new(|ctx| Ok(Estimator::new(ctx, SumFit { total: 0 })))
    }

    fn keyed(pairs: &[(&str, i64)]) -> Vec<(String, i64)> {
        pairs.iter().map(|(key, value)| ((*key).to_string(), *value)).collect()
    }

    fn grain_sum(ctx: &AnnotationContext, key: &str) -> f64 {
        let annotation = ctx.lookup(0, "GrainSum").unwrap().unwrap();
        let grains = annotation.as_per_grain().unwrap();
        grains.get(key).unwrap().as_statistics().unwrap().sum
    }

    #[test]
    fn interleaved_grains_train_independently() {
        let ctx = AnnotationContext::new(1).unwrap();
        let mut est = sum_builder().build(Arc::clone(&ctx)).unwrap();
        assert_eq!(est.name(), "GrainSum");

        est.begin_training().unwrap();
        est.fit(keyed(&[
            ("one", 10),
            ("two", 100),
            ("three", 1000),
            ("one", 20),
            ("two", 200),
            ("three", 2000),
        ]))
        .unwrap();
        est.complete_training().unwrap();

        assert_eq!(grain_sum(&ctx, "one"), 30.0);
        assert_eq!(grain_sum(&ctx, "two"), 300.0);
        assert_eq!(grain_sum(&ctx, "three"), 3000.0);

        let mut transform = est.create_transformer().unwrap();
        let outputs = transform_all(
            &mut transform,
            keyed(&[("one", 1), ("two", 1), ("three", 1)]),
        )
        .unwrap();
        assert_eq!(outputs, keyed(&[("one", 31), ("two", 301), ("three", 3001)]));
    }

    #[test]
    fn training_budget_caps_consumed_items() {
        let ctx = AnnotationContext::new(1).unwrap();
        let mut est = sum_builder().max_training_items(3).build(Arc::clone(&ctx)).unwrap();

        est.begin_training().unwrap();
        let result = est
            .fit(keyed(&[("one", 10), ("two", 100), ("one", 20), ("two", 200)]))
            .unwrap();
        assert_eq!(result, FitResult::Complete);
        assert_eq!(est.state(), TrainingState::Finished);
        est.complete_training().unwrap();

        assert_eq!(grain_sum(&ctx, "one"), 30.0);
        assert_eq!(grain_sum(&ctx, "two"), 100.0);
    }

    #[test]
    fn training_budget_spans_batches() {
        let ctx = AnnotationContext::new(1).unwrap();
        let mut est = sum_builder().max_training_items(3).build(Arc::clone(&ctx)).unwrap();

        est.begin_training().unwrap();
        assert_eq!(est.fit(keyed(&[("one", 10)])).unwrap(), FitResult::Continue);
        let result = est.fit(keyed(&[("two", 100), ("one", 20), ("two", 999)])).unwrap();
        assert_eq!(result, FitResult::Complete);
        est.complete_training().unwrap();

        assert_eq!(grain_sum(&ctx, "one"), 30.0);
        assert_eq!(grain_sum(&ctx, "two"), 100.0);
    }

    #[test]
    fn zero_training_budget_is_rejected() {
        let ctx = AnnotationContext::new(1).unwrap();
        let err = sum_builder().max_training_items(0).build(ctx).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn unseen_grains_fail_without_a_fallback() {
        let ctx = AnnotationContext::new(1).unwrap();
        let mut est = sum_builder().build(ctx).unwrap();
        est.begin_training().unwrap();
        est.fit(keyed(&[("one", 10)])).unwrap();
        est.complete_training().unwrap();

        let mut transform = est.create_transformer().unwrap();
        let err = transform_all(&mut transform, keyed(&[("other", 1)])).unwrap_err();
        match err {
            Error::GrainNotFound(key) => assert_eq!(key, "other"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn fallback_serves_unseen_grains() {
        let ctx = AnnotationContext::new(1).unwrap();
        let mut est = sum_builder()
            .transformer_fallback(|| Ok(OffsetBy { amount: 0 }))
            .build(ctx)
            .unwrap();
        est.begin_training().unwrap();
        est.fit(keyed(&[("one", 10), ("one", 20)])).unwrap();
        est.complete_training().unwrap();

        let mut transform = est.create_transformer().unwrap();
        assert_eq!(transform.grain_count(), 1);

        let mut outputs = Vec::new();
        transform.execute(("fresh".to_string(), 5), &mut |out| outputs.push(out)).unwrap();
        assert_eq!(outputs, keyed(&[("fresh", 5)]));
        assert_eq!(transform.grain_count(), 2);

        // the instantiated fallback sticks around for its key
        transform.execute(("fresh".to_string(), 7), &mut |out| outputs.push(out)).unwrap();
        assert_eq!(outputs, keyed(&[("fresh", 5), ("fresh", 7)]));
        assert_eq!(transform.grain_count(), 2);
    }

    #[test]
    fn empty_training_requires_a_fallback() {
        let ctx = AnnotationContext::new(1).unwrap();
        let mut est = sum_builder().build(Arc::clone(&ctx)).unwrap();
        est.begin_training().unwrap();
        est.complete_training().unwrap();
        let err = est.create_transformer().unwrap_err();
        assert!(matches!(err, Error::MissingGrainFallback));

        let mut est = sum_builder()
            .transformer_fallback(|| Ok(OffsetBy { amount: 40 }))
            .build(ctx)
            .unwrap();
        est.begin_training().unwrap();
        est.complete_training().unwrap();
        let mut transform = est.create_transformer().unwrap();
        let outputs = transform_all(&mut transform, keyed(&[("any", 2)])).unwrap();
        assert_eq!(outputs, keyed(&[("any", 42)]));
    }

    #[test]
    fn inference_only_skips_training_entirely() {
        let ctx = AnnotationContext::new(1).unwrap();
        let mut est = sum_builder()
            .inference_only()
            .transformer_fallback(|| Ok(OffsetBy { amount: 7 }))
            .build(Arc::clone(&ctx))
            .unwrap();
        est.begin_training().unwrap();
        assert_eq!(est.state(), TrainingState::Finished);
        est.complete_training().unwrap();

        assert!(ctx.lookup(0, "GrainSum").unwrap().is_none());

        let mut transform = est.create_transformer().unwrap();
        assert_eq!(transform.grain_count(), 0);
        let outputs = transform_all(&mut transform, keyed(&[("one", 1), ("two", 2)])).unwrap();
        assert_eq!(outputs, keyed(&[("one", 8), ("two", 9)]));
    }

    struct ResettingFit;

    impl Fit for ResettingFit {
        type Item = i64;

        const NAME: &'static str = "Resetting";

        fn begin(&mut self, _ctx: &AnnotationContext) -> Result<bool> {
            Ok(true)
        }

        fn fit(&mut self, _items: Vec<i64>) -> Result<FitResult> {
            Ok(FitResult::Reset)
        }

        fn complete(&mut self, _ctx: &AnnotationContext) -> Result<()> {
            Ok(())
        }
    }

    impl FitTransform for ResettingFit {
        type Transformer = OffsetBy;

        fn build_transform(&mut self) -> Result<OffsetBy> {
            Ok(OffsetBy { amount: 0 })
        }
    }

    #[test]
    fn inner_resets_cannot_cross_the_grain_boundary() {
        let ctx = AnnotationContext::new(1).unwrap();
        let mut est = GrainEstimatorBuilder::<String, ResettingFit>::new(|c| {
            Ok(Estimator::new(c, ResettingFit))
        })
        .build(ctx)
        .unwrap();
        est.begin_training().unwrap();
        let err = est.fit(keyed(&[("k", 1)])).unwrap_err();
        assert!(matches!(err, Error::GrainReset));
    }

    struct CapOneFit {
        value: Option<i64>,
    }

    impl Fit for CapOneFit {
        type Item = i64;

        const NAME: &'static str = "CapOne";

        fn begin(&mut self, _ctx: &AnnotationContext) -> Result<bool> {
            Ok(true)
        }

        fn fit(&mut self, items: Vec<i64>) -> Result<FitResult> {
            if self.value.is_none() {
                self.value = items.first().copied();
            }
            Ok(FitResult::Complete)
        }

        #[allow(clippy::cast_precision_loss)]
        fn complete(&mut self, ctx: &AnnotationContext) -> Result<()> {
            ctx.publish(0, Self::NAME, unit_stat(self.value.unwrap_or_default() as f64))
        }
    }

    impl FitTransform for CapOneFit {
        type Transformer = OffsetBy;

        fn build_transform(&mut self) -> Result<OffsetBy> {
            Ok(OffsetBy { amount: self.value.unwrap_or_default() })
        }
    }

    #[test]
    fn items_after_an_inner_completes_are_ignored() {
        let ctx = AnnotationContext::new(1).unwrap();
        let mut est = GrainEstimatorBuilder::<String, CapOneFit>::new(|c| {
            Ok(Estimator::new(c, CapOneFit { value: None }))
        })
        .build(Arc::clone(&ctx))
        .unwrap();
        est.begin_training().unwrap();
        assert_eq!(est.fit(keyed(&[("k", 5)])).unwrap(), FitResult::Continue);
        assert_eq!(est.fit(keyed(&[("k", 7)])).unwrap(), FitResult::Continue);
        est.complete_training().unwrap();

        let annotation = ctx.lookup(0, "GrainCapOne").unwrap().unwrap();
        let stats = annotation.as_per_grain().unwrap().get("k").unwrap().as_statistics().unwrap();
        assert_eq!(stats.sum, 5.0);
    }

    #[derive(Clone, Copy)]
    enum Misbehavior {
        Silent,
        ForeignName,
        DoublePublish,
        TwoColumns,
    }

    struct MisbehavingFit {
        mode: Misbehavior,
    }

    impl Fit for MisbehavingFit {
        type Item = i64;

        const NAME: &'static str = "Misbehaving";

        fn begin(&mut self, _ctx: &AnnotationContext) -> Result<bool> {
            Ok(true)
        }

        fn fit(&mut self, _items: Vec<i64>) -> Result<FitResult> {
            Ok(FitResult::Continue)
        }

        fn complete(&mut self, ctx: &AnnotationContext) -> Result<()> {
            match self.mode {
                Misbehavior::Silent => Ok(()),
                Misbehavior::ForeignName => ctx.publish(0, "Sneaky", unit_stat(0.0)),
                Misbehavior::DoublePublish => {
                    ctx.publish(0, Self::NAME, unit_stat(1.0))?;
                    ctx.publish(0, Self::NAME, unit_stat(2.0))
                }
                Misbehavior::TwoColumns => {
                    ctx.publish(0, Self::NAME, unit_stat(1.0))?;
                    ctx.publish(1, Self::NAME, unit_stat(2.0))
                }
            }
        }
    }

    impl FitTransform for MisbehavingFit {
        type Transformer = OffsetBy;

        fn build_transform(&mut self) -> Result<OffsetBy> {
            Ok(OffsetBy { amount: 0 })
        }
    }

    #[test_case(Misbehavior::Silent, "published nothing" ; "silent inner")]
    #[test_case(Misbehavior::ForeignName, "foreign producer" ; "foreign name")]
    #[test_case(Misbehavior::DoublePublish, "2 annotations" ; "double publish")]
    #[test_case(Misbehavior::TwoColumns, "multiple columns" ; "two columns")]
    fn harvest_rejects_misbehaving_inners(mode: Misbehavior, needle: &str) {
        let ctx = AnnotationContext::new(2).unwrap();
        let mut est = GrainEstimatorBuilder::<String, MisbehavingFit>::new(move |c| {
            Ok(Estimator::new(c, MisbehavingFit { mode }))
        })
        .build(ctx)
        .unwrap();
        est.begin_training().unwrap();
        est.fit(keyed(&[("only", 1)])).unwrap();
        let err = est.complete_training().unwrap_err();
        match err {
            Error::GrainHarvest(message) => assert!(message.contains(needle), "{message}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    struct ColumnFit {
        column: usize,
    }

    impl Fit for ColumnFit {
        type Item = i64;

        const NAME: &'static str = "ColumnBound";

        fn begin(&mut self, _ctx: &AnnotationContext) -> Result<bool> {
            Ok(true)
        }

        fn fit(&mut self, _items: Vec<i64>) -> Result<FitResult> {
            Ok(FitResult::Continue)
        }

        fn complete(&mut self, ctx: &AnnotationContext) -> Result<()> {
            ctx.publish(self.column, Self::NAME, unit_stat(0.0))
        }
    }

    impl FitTransform for ColumnFit {
        type Transformer = OffsetBy;

        fn build_transform(&mut self) -> Result<OffsetBy> {
            Ok(OffsetBy { amount: 0 })
        }
    }

    #[test]
    fn per_grain_annotations_must_share_a_column() {
        let ctx = AnnotationContext::new(2).unwrap();
        let next_column = Cell::new(0);
        let mut est = GrainEstimatorBuilder::<String, ColumnFit>::new(move |c| {
            let column = next_column.get();
            next_column.set(column + 1);
            Ok(Estimator::new(c, ColumnFit { column }))
        })
        .build(ctx)
        .unwrap();
        est.begin_training().unwrap();
        est.fit(keyed(&[("a", 1), ("b", 1)])).unwrap();
        let err = est.complete_training().unwrap_err();
        match err {
            Error::GrainHarvest(message) => assert!(message.contains("split across columns")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
    struct BadgedKey {
        id: u8,
        badge: String,
    }

    impl Display for BadgedKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.badge)
        }
    }

    #[test]
    fn harvest_rejects_colliding_display_forms() {
        let ctx = AnnotationContext::new(1).unwrap();
        let mut est = GrainEstimatorBuilder::<BadgedKey, SumFit>::new(|c| {
            Ok(Estimator::new(c, SumFit { total: 0 }))
        })
        .build(ctx)
        .unwrap();
        est.begin_training().unwrap();
        est.fit(vec![
            (BadgedKey { id: 1, badge: "a".into() }, 10),
            (BadgedKey { id: 2, badge: "a".into() }, 20),
        ])
        .unwrap();
        let err = est.complete_training().unwrap_err();
        match err {
            Error::GrainHarvest(message) => assert!(message.contains("display form"), "{message}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn harvest_requires_an_unclaimed_producer_name() {
        let ctx = AnnotationContext::new(1).unwrap();
        ctx.publish(0, "Sum", unit_stat(9.0)).unwrap();

        let mut est = sum_builder().build(ctx).unwrap();
        est.begin_training().unwrap();
        est.fit(keyed(&[("one", 1)])).unwrap();
        let err = est.complete_training().unwrap_err();
        match err {
            Error::GrainHarvest(message) => assert!(message.contains("already has annotations")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn archive_round_trip_preserves_grains_and_fallback() {
        let ctx = AnnotationContext::new(1).unwrap();
        let mut est = sum_builder()
            .transformer_fallback(|| Ok(OffsetBy { amount: -1 }))
            .build(ctx)
            .unwrap();
        est.begin_training().unwrap();
        est.fit(keyed(&[("one", 30), ("two", 300)])).unwrap();
        est.complete_training().unwrap();
        let transform = est.create_transformer().unwrap();

        let mut writer = ArchiveWriter::new();
        transform.save(&mut writer).unwrap();
        let bytes = writer.into_bytes();
        let mut restored: GrainTransform<String, OffsetBy> =
            GrainTransform::from_archive(&mut ArchiveReader::new(&bytes)).unwrap();

        assert_eq!(restored.grain_count(), 2);
        assert!(restored.has_fallback());

        let outputs = transform_all(
            &mut restored,
            keyed(&[("one", 1), ("two", 1), ("new", 1)]),
        )
        .unwrap();
        assert_eq!(outputs, keyed(&[("one", 31), ("two", 301), ("new", 0)]));
    }

    #[test]
    fn archives_without_grains_need_a_template() {
        let mut writer = ArchiveWriter::new();
        writer.write_version(ARCHIVE_VERSION).unwrap();
        writer.write(&0usize).unwrap();
        writer.write(&false).unwrap();

        let bytes = writer.into_bytes();
        let err = GrainTransform::<String, OffsetBy>::from_archive(&mut ArchiveReader::new(&bytes))
            .unwrap_err();
        assert!(matches!(err, Error::MissingGrainFallback));
    }
}
