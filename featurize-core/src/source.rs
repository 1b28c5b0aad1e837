//! Rewindable training data sources
//!
//! Training can take several passes over the same stream: an algorithm may
//! return [`FitResult::Reset`](crate::state::FitResult::Reset) mid-stream or
//! ask for more data when the stream ends. A [`Source`] is therefore an
//! iterator that can also rewind to its beginning.

use crate::error::Result;

/// A rewindable stream of training items, read in batches.
pub trait Source {
    /// The item produced by this source.
    type Item;

    /// Pull up to `max_batch_size` items, or `None` at end of stream.
    fn next_batch(&mut self, max_batch_size: usize) -> Result<Option<Vec<Self::Item>>>;

    /// Rewind to the first item.
    fn reset(&mut self) -> Result<()>;

    /// Total item count when known up front.
    fn size_hint(&self) -> Option<usize> {
        None
    }
}

/// In-memory [`Source`] over a vector, mostly for tests and small inputs.
#[derive(Debug, Clone)]
pub struct VecSource<T> {
    items: Vec<T>,
    pos: usize,
}

impl<T> VecSource<T> {
    /// Wrap `items` as a source positioned at the start.
    pub fn new(items: Vec<T>) -> Self {
        VecSource { items, pos: 0 }
    }
}

impl<T: Clone> Source for VecSource<T> {
    type Item = T;

    fn next_batch(&mut self, max_batch_size: usize) -> Result<Option<Vec<T>>> {
        if self.pos >= self.items.len() {
            return Ok(None);
        }
        let end = self.items.len().min(self.pos + max_batch_size);
        let batch = self.items[self.pos..end].to_vec();
        self.pos = end;
        Ok(Some(batch))
    }

    fn reset(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.items.len())
    }
}
