//! Driver loop connecting a [`Source`] to an [`Estimator`]
//!
//! Encodes the standard training protocol: begin, fit batches until the
//! estimator leaves `Training`, rewinding the source whenever the algorithm
//! requests a reset or asks for another pass at end of stream, then complete.

use crate::error::{Error, Result};
use crate::estimator::{Estimator, Fit, FitTransform};
use crate::source::Source;
use crate::state::{FitResult, TrainingState};

/// Run `estimator` over `source` until training is complete.
///
/// The source is rewound on [`FitResult::Reset`] and at each end of stream,
/// so multi-pass algorithms see the full stream again. On return the
/// estimator is in the `Completed` state.
pub fn train<F, S>(estimator: &mut Estimator<F>, source: &mut S, batch_size: usize) -> Result<()>
where
    F: Fit,
    S: Source<Item = F::Item>,
{
    if batch_size == 0 {
        return Err(Error::InvalidArgument("batch size must be positive".into()));
    }
    estimator.begin_training()?;
    while estimator.state() == TrainingState::Training {
        match source.next_batch(batch_size)? {
            Some(batch) => {
                if estimator.fit(batch)? == FitResult::Reset {
                    tracing::debug!(name = %estimator.name(), "reset requested, rewinding source");
                    source.reset()?;
                }
            }
            None => {
                estimator.on_data_completed()?;
                source.reset()?;
            }
        }
    }
    estimator.complete_training()
}

/// [`train`], then build the resulting transformer.
pub fn train_and_create<F, S>(
    estimator: &mut Estimator<F>,
    source: &mut S,
    batch_size: usize,
) -> Result<F::Transformer>
where
    F: FitTransform,
    S: Source<Item = F::Item>,
{
    train(estimator, source, batch_size)?;
    estimator.create_transformer()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::AnnotationContext;
    use crate::source::VecSource;
    use crate::transform::Transform;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records every batch it is fed and scripts its fit results.
    struct RecordingFit {
        log: Rc<RefCell<Vec<Vec<i32>>>>,
        resets_left: usize,
        extra_passes: usize,
    }

    impl RecordingFit {
        fn new() -> (Self, Rc<RefCell<Vec<Vec<i32>>>>) {
            let log = Rc::new(RefCell::new(Vec::new()));
            (RecordingFit { log: Rc::clone(&log), resets_left: 0, extra_passes: 0 }, log)
        }
    }

    impl Fit for RecordingFit {
        type Item = i32;

        const NAME: &'static str = "Recording";

        fn begin(&mut self, _ctx: &AnnotationContext) -> Result<bool> {
            Ok(true)
        }

        fn fit(&mut self, items: Vec<i32>) -> Result<FitResult> {
            self.log.borrow_mut().push(items);
            if self.resets_left > 0 {
                self.resets_left -= 1;
                Ok(FitResult::Reset)
            } else {
                Ok(FitResult::Continue)
            }
        }

        fn end_of_data(&mut self) -> Result<bool> {
            if self.extra_passes > 0 {
                self.extra_passes -= 1;
                Ok(true)
            } else {
                Ok(false)
            }
        }

        fn complete(&mut self, _ctx: &AnnotationContext) -> Result<()> {
            Ok(())
        }
    }

    struct Negate;

    impl Transform for Negate {
        type Input = i32;
        type Output = i32;

        fn execute(&mut self, input: i32, sink: &mut dyn FnMut(i32)) -> Result<()> {
            sink(-input);
            Ok(())
        }

        fn flush(&mut self, _sink: &mut dyn FnMut(i32)) -> Result<()> {
            Ok(())
        }

        fn save(&self, _archive: &mut crate::archive::ArchiveWriter) -> Result<()> {
            Ok(())
        }
    }

    impl FitTransform for RecordingFit {
        type Transformer = Negate;

        fn build_transform(&mut self) -> Result<Negate> {
            Ok(Negate)
        }
    }

    fn estimator(logic: RecordingFit) -> Estimator<RecordingFit> {
        Estimator::new(AnnotationContext::new(1).unwrap(), logic)
    }

    #[test]
    fn single_pass_consumes_the_stream_in_batches() {
        let (logic, log) = RecordingFit::new();
        let mut est = estimator(logic);
        let mut source = VecSource::new(vec![1, 2, 3, 4, 5]);
        train(&mut est, &mut source, 2).unwrap();
        assert_eq!(est.state(), TrainingState::Completed);
        assert_eq!(*log.borrow(), vec![vec![1, 2], vec![3, 4], vec![5]]);
    }

    #[test]
    fn reset_rewinds_the_source() {
        let (mut logic, log) = RecordingFit::new();
        logic.resets_left = 1;
        let mut est = estimator(logic);
        let mut source = VecSource::new(vec![1, 2, 3]);
        train(&mut est, &mut source, 2).unwrap();
        assert_eq!(est.state(), TrainingState::Completed);
        // first batch repeats after the rewind
        assert_eq!(*log.borrow(), vec![vec![1, 2], vec![1, 2], vec![3]]);
    }

    #[test]
    fn extra_pass_replays_the_stream() {
        let (mut logic, log) = RecordingFit::new();
        logic.extra_passes = 1;
        let mut est = estimator(logic);
        let mut source = VecSource::new(vec![1, 2, 3]);
        train(&mut est, &mut source, 3).unwrap();
        assert_eq!(est.state(), TrainingState::Completed);
        assert_eq!(*log.borrow(), vec![vec![1, 2, 3], vec![1, 2, 3]]);
    }

    #[test]
    fn train_and_create_yields_the_transformer() {
        let (logic, _log) = RecordingFit::new();
        let mut est = estimator(logic);
        let mut source = VecSource::new(vec![4]);
        let mut transformer = train_and_create(&mut est, &mut source, 1).unwrap();
        let mut outputs = Vec::new();
        transformer.execute(3, &mut |v| outputs.push(v)).unwrap();
        assert_eq!(outputs, vec![-3]);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let (logic, _log) = RecordingFit::new();
        let mut est = estimator(logic);
        let mut source = VecSource::new(vec![1]);
        let err = train(&mut est, &mut source, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
