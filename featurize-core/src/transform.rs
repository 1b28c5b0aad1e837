//! Inference-time transform contract

use crate::archive::{ArchiveReader, ArchiveWriter};
use crate::error::Result;

/// Stateful inference-time unit produced by a completed estimator.
///
/// `execute` consumes one input and hands zero or more outputs to the sink;
/// ownership of each output moves into the sink. Windowed transforms buffer
/// internally and emit later, so callers must `flush` at end of stream to
/// collect trailing outputs. After a flush the transform is reset and ready
/// for a fresh logical segment.
pub trait Transform: Send {
    /// Element type consumed at inference time.
    type Input;

    /// Element type handed to the sink.
    type Output;

    /// Process one input, emitting any ready outputs.
    fn execute(&mut self, input: Self::Input, sink: &mut dyn FnMut(Self::Output)) -> Result<()>;

    /// Emit buffered outputs for the end of the stream, then reset.
    fn flush(&mut self, sink: &mut dyn FnMut(Self::Output)) -> Result<()>;

    /// Serialize trained state (never working state) into `archive`.
    fn save(&self, archive: &mut ArchiveWriter) -> Result<()>;
}

/// Transforms that can be reconstructed from an archive written by
/// [`Transform::save`].
pub trait FromArchive: Sized {
    /// Read one instance from the archive at its current position.
    fn from_archive(archive: &mut ArchiveReader<'_>) -> Result<Self>;
}

/// Run `inputs` through `transform` and flush, collecting every output.
pub fn transform_all<T, I>(transform: &mut T, inputs: I) -> Result<Vec<T::Output>>
where
    T: Transform,
    I: IntoIterator<Item = T::Input>,
{
    let mut outputs = Vec::new();
    let mut sink = |item: T::Output| outputs.push(item);
    for input in inputs {
        transform.execute(input, &mut sink)?;
    }
    transform.flush(&mut sink)?;
    Ok(outputs)
}
