//! Lag/lead windowing
//!
//! For each input row the operator emits a matrix of values observed at
//! configured relative offsets: negative offsets look back, positive offsets
//! look ahead. Rows whose future offsets are not observable yet are withheld
//! until enough inputs arrive; `flush` emits the withheld trailing rows with
//! nulls standing in for values past the end of the stream.

use std::marker::PhantomData;
use std::sync::Arc;

use featurize_core::{
    AnnotationContext, ArchiveReader, ArchiveWriter, Error, Estimator, Fit, FitResult,
    FitTransform, FromArchive, Result, Transform, Version,
};

use crate::grain::{GrainEstimatorBuilder, GrainFit, GrainKey};
use crate::window::CircularBuffer;

const ARCHIVE_VERSION: Version = Version::new(1, 0);

/// Widest window extent a configuration may address, in elements.
///
/// Offsets read back from an archive are untrusted, so a configuration whose
/// ring or output matrix would outgrow this bound is rejected instead of
/// allocated.
const MAX_WINDOW_EXTENT: usize = 1 << 24;

/// One lag/lead output: `offsets.len()` rows by `horizon` columns.
///
/// Cell `(r, c)` holds the input observed `offsets[r]` steps away from the
/// `c`-th position of the horizon window ending at the emitting row, or
/// `None` when that position falls outside the observed stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LagMatrix<T> {
    rows: usize,
    cols: usize,
    cells: Vec<Option<T>>,
}

impl<T> LagMatrix<T> {
    /// Number of rows, one per configured offset.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns, equal to the configured horizon.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// The value at `(row, col)`, if in range and not null.
    pub fn get(&self, row: usize, col: usize) -> Option<&T> {
        if row < self.rows && col < self.cols {
            self.cells.get(row * self.cols + col).and_then(Option::as_ref)
        } else {
            None
        }
    }

    /// The cells of `row`, oldest horizon position first.
    pub fn row(&self, row: usize) -> Option<&[Option<T>]> {
        if row < self.rows {
            self.cells.get(row * self.cols..(row + 1) * self.cols)
        } else {
            None
        }
    }

    /// Iterate rows in offset order.
    pub fn iter_rows(&self) -> impl Iterator<Item = &[Option<T>]> {
        self.cells.chunks_exact(self.cols)
    }
}

/// Ring geometry implied by a horizon/offsets configuration.
struct WindowShape {
    horizon: usize,
    max_future: usize,
    capacity: usize,
}

fn validate(horizon: u32, offsets: &[i64]) -> Result<WindowShape> {
    if horizon == 0 {
        return Err(Error::InvalidArgument("horizon cannot be zero".into()));
    }
    if offsets.is_empty() {
        return Err(Error::InvalidArgument("offsets cannot be empty".into()));
    }
    let too_wide =
        || Error::InvalidArgument("horizon and offsets exceed the addressable window".into());
    let horizon = usize::try_from(horizon).map_err(|_| too_wide())?;
    let max_offset = offsets.iter().copied().max().unwrap_or(0);
    let min_offset = offsets.iter().copied().min().unwrap_or(0);
    let max_future = usize::try_from(max_offset.max(0)).map_err(|_| too_wide())?;
    let max_past = usize::try_from(min_offset.min(0).unsigned_abs()).map_err(|_| too_wide())?;
    // the ring must cover the horizon plus the farthest look in each direction
    let capacity = horizon
        .checked_add(max_future)
        .and_then(|c| c.checked_add(max_past))
        .filter(|&c| c <= MAX_WINDOW_EXTENT)
        .ok_or_else(too_wide)?;
    // every emitted matrix holds one horizon-wide row per offset
    if offsets.len().checked_mul(horizon).map_or(true, |cells| cells > MAX_WINDOW_EXTENT) {
        return Err(too_wide());
    }
    Ok(WindowShape { horizon, max_future, capacity })
}

/// Windowing transformer emitting one [`LagMatrix`] per input row.
#[derive(Debug)]
pub struct LagLeadTransform<T> {
    horizon: usize,
    offsets: Vec<i64>,
    max_future: usize,
    buffer: CircularBuffer<T>,
    consumed: usize,
    pending: usize,
}

impl<T> LagLeadTransform<T> {
    /// Build an operator over `horizon` columns and one row per offset.
    pub fn new(horizon: u32, offsets: Vec<i64>) -> Result<Self> {
        let shape = validate(horizon, &offsets)?;
        Ok(LagLeadTransform {
            horizon: shape.horizon,
            offsets,
            max_future: shape.max_future,
            buffer: CircularBuffer::new(shape.capacity)?,
            consumed: 0,
            pending: 0,
        })
    }

    /// The configured horizon.
    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// The configured offsets, in declaration order.
    pub fn offsets(&self) -> &[i64] {
        &self.offsets
    }

    /// Builds the matrix for input row `event` against the current window.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    fn materialize(&self, event: usize) -> LagMatrix<T>
    where
        T: Clone,
    {
        let available = self.consumed as i128;
        let oldest = (self.consumed - self.buffer.len()) as i128;
        let horizon = self.horizon;
        let mut cells = Vec::with_capacity(self.offsets.len() * horizon);
        for &offset in &self.offsets {
            // the row is a contiguous horizon-wide window ending offset steps
            // away from the emitting event
            let first = event as i128 + 1 - horizon as i128 + i128::from(offset);
            let last = first + horizon as i128 - 1;
            let live_first = first.max(0);
            let live_last = last.min(available - 1);
            let mut row: Vec<Option<T>> = Vec::with_capacity(horizon);
            if live_first <= live_last && live_first >= oldest {
                let leading = (live_first - first) as usize;
                let span = (live_last - live_first + 1) as usize;
                let from_oldest = (live_first - oldest) as usize;
                row.extend(std::iter::repeat_with(|| None).take(leading));
                row.extend(self.buffer.range(span, from_oldest).cloned().map(Some));
            }
            while row.len() < horizon {
                row.push(None);
            }
            cells.append(&mut row);
        }
        LagMatrix { rows: self.offsets.len(), cols: horizon, cells }
    }
}

/// Equality is configuration only; working state is ignored.
impl<T> PartialEq for LagLeadTransform<T> {
    fn eq(&self, other: &Self) -> bool {
        self.horizon == other.horizon && self.offsets == other.offsets
    }
}

impl<T: Clone + Send> Transform for LagLeadTransform<T> {
    type Input = T;
    type Output = LagMatrix<T>;

    fn execute(&mut self, input: T, sink: &mut dyn FnMut(LagMatrix<T>)) -> Result<()> {
        self.buffer.push(input);
        self.consumed += 1;
        if self.pending < self.max_future {
            // withhold this row until its future offsets are observable
            self.pending += 1;
            return Ok(());
        }
        let event = self.consumed - 1 - self.pending;
        sink(self.materialize(event));
        Ok(())
    }

    fn flush(&mut self, sink: &mut dyn FnMut(LagMatrix<T>)) -> Result<()> {
        while self.pending > 0 {
            let event = self.consumed - self.pending;
            sink(self.materialize(event));
            self.pending -= 1;
        }
        self.buffer.clear();
        self.consumed = 0;
        Ok(())
    }

    fn save(&self, archive: &mut ArchiveWriter) -> Result<()> {
        archive.write_version(ARCHIVE_VERSION)?;
        let horizon = u32::try_from(self.horizon)
            .map_err(|_| Error::InvalidArgument("horizon exceeds the archive range".into()))?;
        archive.write(&horizon)?;
        archive.write(&self.offsets)
    }
}

impl<T> FromArchive for LagLeadTransform<T> {
    fn from_archive(archive: &mut ArchiveReader<'_>) -> Result<Self> {
        archive.expect_version(ARCHIVE_VERSION)?;
        let horizon: u32 = archive.read()?;
        let offsets: Vec<i64> = archive.read()?;
        // a configuration a constructor would reject means archive corruption
        LagLeadTransform::new(horizon, offsets).map_err(|err| match err {
            Error::InvalidArgument(message) => Error::MalformedArchive(message),
            other => other,
        })
    }
}

/// Estimator side of the lag/lead operator.
///
/// Inference-only: it wants no training data and publishes nothing, so it
/// skips straight past `Training`. It exists to slot the operator into the
/// estimator lifecycle, alone or grain-wrapped.
#[derive(Debug)]
pub struct LagLeadFit<T> {
    horizon: u32,
    offsets: Vec<i64>,
    _input: PhantomData<fn(T)>,
}

impl<T> LagLeadFit<T> {
    /// Validate the configuration without building a window yet.
    pub fn new(horizon: u32, offsets: Vec<i64>) -> Result<Self> {
        validate(horizon, &offsets)?;
        Ok(LagLeadFit { horizon, offsets, _input: PhantomData })
    }
}

impl<T: Clone + Send + 'static> LagLeadFit<T> {
    /// A grain-wrapped lag/lead estimator serving every key from a template.
    ///
    /// The wrapper trains nothing; at inference each key lazily gets its own
    /// fresh window the first time it appears.
    pub fn grained<K: GrainKey>(
        context: Arc<AnnotationContext>,
        horizon: u32,
        offsets: Vec<i64>,
    ) -> Result<Estimator<GrainFit<K, LagLeadFit<T>>>> {
        validate(horizon, &offsets)?;
        let factory_offsets = offsets.clone();
        GrainEstimatorBuilder::new(move |ctx| {
            Ok(Estimator::new(ctx, LagLeadFit::new(horizon, factory_offsets.clone())?))
        })
        .inference_only()
        .transformer_fallback(move || LagLeadTransform::new(horizon, offsets))
        .build(context)
    }
}

impl<T: Clone + Send> Fit for LagLeadFit<T> {
    type Item = T;

    const NAME: &'static str = "LagLeadOperator";

    fn begin(&mut self, _ctx: &AnnotationContext) -> Result<bool> {
        Ok(false)
    }

    fn fit(&mut self, _items: Vec<T>) -> Result<FitResult> {
        Err(Error::InvalidArgument("lag/lead windowing does not consume training data".into()))
    }

    fn complete(&mut self, _ctx: &AnnotationContext) -> Result<()> {
        Ok(())
    }
}

impl<T: Clone + Send> FitTransform for LagLeadFit<T> {
    type Transformer = LagLeadTransform<T>;

    fn build_transform(&mut self) -> Result<LagLeadTransform<T>> {
        LagLeadTransform::new(self.horizon, self.offsets.clone())
    }
}
