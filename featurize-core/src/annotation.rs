//! Shared per-column annotation store
//!
//! Estimators in a pipeline communicate through an [`AnnotationContext`]: an
//! upstream stage publishes a computed statistic under its producer name, a
//! downstream stage looks it up by `(column, producer)` during its own
//! `complete_training`. Stages never hold references to each other.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// Single-pass numeric statistics for one column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Statistics {
    /// Number of non-missing samples observed
    pub count: u64,

    /// Sum of observed samples
    pub sum: f64,

    /// Smallest observed sample; meaningless while `count` is zero
    pub min: f64,

    /// Largest observed sample; meaningless while `count` is zero
    pub max: f64,
}

impl Statistics {
    /// Arithmetic mean of the observed samples, if any were observed.
    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            #[allow(clippy::cast_precision_loss)]
            Some(self.sum / self.count as f64)
        }
    }
}

/// Aggregated per-key annotations published by a grain partitioner.
///
/// Keys are the display form of the grain keys observed during training. A
/// partitioner never publishes an empty aggregate.
#[derive(Debug, Clone, Default)]
pub struct GrainAnnotations {
    by_key: BTreeMap<String, Arc<Annotation>>,
}

impl GrainAnnotations {
    /// Build the aggregate from harvested per-key annotations.
    pub fn new(by_key: BTreeMap<String, Arc<Annotation>>) -> Self {
        GrainAnnotations { by_key }
    }

    /// Annotation harvested for `key`, if that grain was seen during training.
    pub fn get(&self, key: &str) -> Option<&Arc<Annotation>> {
        self.by_key.get(key)
    }

    /// Iterate keys and annotations in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<Annotation>)> {
        self.by_key.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of grains in the aggregate.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Whether the aggregate holds no grains.
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// A datum published by an estimator for one column.
///
/// A closed set of kinds; consumers match to recover the concrete payload
/// instead of downcasting.
#[derive(Debug, Clone)]
pub enum Annotation {
    /// Single-pass numeric statistics
    Statistics(Statistics),
    /// Per-grain aggregate from a grain partitioner
    PerGrain(GrainAnnotations),
}

impl Annotation {
    /// Payload if this is a [`Annotation::Statistics`].
    pub fn as_statistics(&self) -> Option<&Statistics> {
        match self {
            Annotation::Statistics(stats) => Some(stats),
            Annotation::PerGrain(_) => None,
        }
    }

    /// Payload if this is a [`Annotation::PerGrain`].
    pub fn as_per_grain(&self) -> Option<&GrainAnnotations> {
        match self {
            Annotation::PerGrain(grains) => Some(grains),
            Annotation::Statistics(_) => None,
        }
    }
}

/// Annotations for one column: producer name → publications in publish order.
pub type AnnotationMap = BTreeMap<String, Vec<Arc<Annotation>>>;

/// Ordered per-column annotation maps shared by every stage of a pipeline.
///
/// Clones of the owning `Arc` are handed to each estimator at construction.
/// Columns are guarded individually so publication from one stage does not
/// contend with lookups against other columns.
#[derive(Debug)]
pub struct AnnotationContext {
    columns: Vec<RwLock<AnnotationMap>>,
}

impl AnnotationContext {
    /// Create a context for `columns` input columns.
    ///
    /// A context always covers at least one column.
    pub fn new(columns: usize) -> Result<Arc<Self>> {
        if columns == 0 {
            return Err(Error::InvalidArgument(
                "an annotation context requires at least one column".to_string(),
            ));
        }
        let columns = (0..columns).map(|_| RwLock::new(AnnotationMap::new())).collect();
        Ok(Arc::new(AnnotationContext { columns }))
    }

    /// Number of columns this context covers.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Publish `annotation` for `column` under `producer`.
    ///
    /// Publications under an existing producer name append; nothing is ever
    /// overwritten.
    pub fn publish(&self, column: usize, producer: &str, annotation: Annotation) -> Result<()> {
        let mut map = self.write(column)?;
        map.entry(producer.to_string()).or_default().push(Arc::new(annotation));
        Ok(())
    }

    /// First annotation published under `producer` for `column`.
    ///
    /// Absence is an ordinary outcome during pipeline assembly, so an unknown
    /// producer yields `Ok(None)` rather than an error.
    pub fn lookup(&self, column: usize, producer: &str) -> Result<Option<Arc<Annotation>>> {
        let map = self.read(column)?;
        Ok(map.get(producer).and_then(|list| list.first()).cloned())
    }

    /// Every annotation published under `producer` for `column`, in publish
    /// order.
    pub fn lookup_all(&self, column: usize, producer: &str) -> Result<Vec<Arc<Annotation>>> {
        let map = self.read(column)?;
        Ok(map.get(producer).cloned().unwrap_or_default())
    }

    /// Producer names currently present for `column`, in name order.
    pub fn producers(&self, column: usize) -> Result<Vec<String>> {
        let map = self.read(column)?;
        Ok(map.keys().cloned().collect())
    }

    /// Number of annotations published under `producer` for `column`.
    pub fn annotation_count(&self, column: usize, producer: &str) -> Result<usize> {
        let map = self.read(column)?;
        Ok(map.get(producer).map_or(0, Vec::len))
    }

    /// Remove and return everything published under `producer` for `column`.
    ///
    /// Used by the grain partitioner to re-home per-key publications into its
    /// own aggregate.
    pub fn take(&self, column: usize, producer: &str) -> Result<Vec<Arc<Annotation>>> {
        let mut map = self.write(column)?;
        Ok(map.remove(producer).unwrap_or_default())
    }

    fn read(&self, column: usize) -> Result<std::sync::RwLockReadGuard<'_, AnnotationMap>> {
        self.column(column)?.read().map_err(|_| Error::ContextPoisoned(column))
    }

    fn write(&self, column: usize) -> Result<std::sync::RwLockWriteGuard<'_, AnnotationMap>> {
        self.column(column)?.write().map_err(|_| Error::ContextPoisoned(column))
    }

    fn column(&self, column: usize) -> Result<&RwLock<AnnotationMap>> {
        self.columns.get(column).ok_or(Error::ColumnOutOfRange {
            column,
            columns: self.columns.len(),
        })
    }
}
