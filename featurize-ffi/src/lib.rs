//! C ABI for the mean-impute featurizer
//!
//! Every function takes a trailing `FzErrorInfo` out-pointer and returns
//! `false` on failure with the error boxed behind it; a null error
//! out-pointer fails without reporting. Handles are opaque and must be
//! released with their matching destroy function. Creating an estimator
//! also begins training, so a fresh handle is immediately fittable.

#![warn(missing_docs)]
#![allow(unsafe_code)]

use std::ffi::CString;
use std::os::raw::c_char;
use std::sync::Arc;

use featurize_core::{
    AnnotationContext, ArchiveReader, ArchiveWriter, Error, Estimator, FitResult, FromArchive,
    Result, TrainingState, Transform,
};
use featurize_transforms::{MeanImputeFit, MeanImputeTransform, StatsFit};

/// Error detail handed across the ABI; owned by the caller until destroyed.
pub struct FzErrorInfo {
    message: CString,
    category: ErrorCategoryCode,
}

#[derive(Clone, Copy)]
enum ErrorCategoryCode {
    Usage = 1,
    Domain = 2,
    Io = 3,
}

impl FzErrorInfo {
    fn boxed(error: &Error) -> *mut FzErrorInfo {
        // interior NULs never occur in our messages; fall back to empty
        let message = CString::new(error.to_string()).unwrap_or_default();
        let category = match error.category() {
            featurize_core::ErrorCategory::Usage => ErrorCategoryCode::Usage,
            featurize_core::ErrorCategory::Domain => ErrorCategoryCode::Domain,
            featurize_core::ErrorCategory::Io => ErrorCategoryCode::Io,
        };
        Box::into_raw(Box::new(FzErrorInfo { message, category }))
    }
}

/// Training half of the mean-impute featurizer.
///
/// Statistics accumulate over the fitted stream; completing training
/// captures the mean the transformer will impute.
pub struct FzMeanImputeEstimator {
    inner: MeanImputePair,
}

/// Trained transformer replacing missing values with the captured mean.
pub struct FzMeanImputeTransformer {
    inner: MeanImputeTransform,
}

struct MeanImputePair {
    stats: Estimator<StatsFit<Option<f64>>>,
    impute: Estimator<MeanImputeFit>,
}

impl MeanImputePair {
    fn new() -> Result<Self> {
        let context = AnnotationContext::new(1)?;
        let mut stats = Estimator::new(Arc::clone(&context), StatsFit::new(0));
        stats.begin_training()?;
        let impute = Estimator::new(context, MeanImputeFit::new(0));
        Ok(MeanImputePair { stats, impute })
    }

    fn state(&self) -> TrainingState {
        self.stats.state()
    }

    fn is_training_complete(&self) -> bool {
        self.stats.is_training_complete()
    }

    fn fit(&mut self, items: Vec<Option<f64>>) -> Result<FitResult> {
        self.stats.fit(items)
    }

    fn on_data_completed(&mut self) -> Result<()> {
        self.stats.on_data_completed()
    }

    fn complete_training(&mut self) -> Result<()> {
        self.stats.complete_training()?;
        self.impute.begin_training()?;
        self.impute.complete_training()
    }

    fn create_transformer(&mut self) -> Result<MeanImputeTransform> {
        self.impute.create_transformer()
    }
}

fn state_code(state: TrainingState) -> i32 {
    match state {
        TrainingState::Pending => 1,
        TrainingState::Training => 2,
        TrainingState::Finished => 3,
        TrainingState::Completed => 4,
    }
}

fn fit_result_code(result: FitResult) -> i32 {
    match result {
        FitResult::Complete => 1,
        FitResult::Continue => 2,
        FitResult::Reset => 3,
    }
}

fn null_handle(what: &str) -> Error {
    Error::InvalidArgument(format!("{what} handle is null"))
}

fn null_out(what: &str) -> Error {
    Error::InvalidArgument(format!("{what} out-pointer is null"))
}

fn require_out<T>(ptr: *mut T, what: &str) -> Result<()> {
    if ptr.is_null() {
        return Err(null_out(what));
    }
    Ok(())
}

unsafe fn fail(out_error: *mut *mut FzErrorInfo, error: &Error) -> bool {
    *out_error = FzErrorInfo::boxed(error);
    false
}

unsafe fn estimator_ref<'a>(handle: *const FzMeanImputeEstimator) -> Result<&'a MeanImputePair> {
    handle.as_ref().map(|wrapper| &wrapper.inner).ok_or_else(|| null_handle("estimator"))
}

unsafe fn estimator_mut<'a>(handle: *mut FzMeanImputeEstimator) -> Result<&'a mut MeanImputePair> {
    handle.as_mut().map(|wrapper| &mut wrapper.inner).ok_or_else(|| null_handle("estimator"))
}

unsafe fn transformer_mut<'a>(
    handle: *mut FzMeanImputeTransformer,
) -> Result<&'a mut MeanImputeTransform> {
    handle.as_mut().map(|wrapper| &mut wrapper.inner).ok_or_else(|| null_handle("transformer"))
}

macro_rules! ffi_try {
    ($expr:expr, $out_error:expr) => {
        match $expr {
            Ok(value) => value,
            Err(error) => return fail($out_error, &error),
        }
    };
}

/// Message text of `error`, or null for a null pointer.
#[no_mangle]
pub unsafe extern "C" fn fz_error_info_get_message(error: *const FzErrorInfo) -> *const c_char {
    error.as_ref().map_or(std::ptr::null(), |info| info.message.as_ptr())
}

/// Category code of `error`: 1 usage, 2 domain, 3 I/O; 0 for a null pointer.
#[no_mangle]
pub unsafe extern "C" fn fz_error_info_get_category(error: *const FzErrorInfo) -> i32 {
    error.as_ref().map_or(0, |info| info.category as i32)
}

/// Release an error info. Returns false only for a null pointer.
#[no_mangle]
pub unsafe extern "C" fn fz_error_info_destroy(error: *mut FzErrorInfo) -> bool {
    if error.is_null() {
        return false;
    }
    drop(Box::from_raw(error));
    true
}

/// Create a mean-impute estimator with training already begun.
#[no_mangle]
pub unsafe extern "C" fn fz_mean_impute_estimator_create(
    out_estimator: *mut *mut FzMeanImputeEstimator,
    out_error: *mut *mut FzErrorInfo,
) -> bool {
    if out_error.is_null() {
        return false;
    }
    ffi_try!(require_out(out_estimator, "estimator"), out_error);
    let inner = ffi_try!(MeanImputePair::new(), out_error);
    tracing::debug!("created mean impute estimator");
    *out_estimator = Box::into_raw(Box::new(FzMeanImputeEstimator { inner }));
    true
}

/// Release an estimator handle.
#[no_mangle]
pub unsafe extern "C" fn fz_mean_impute_estimator_destroy(
    estimator: *mut FzMeanImputeEstimator,
    out_error: *mut *mut FzErrorInfo,
) -> bool {
    if out_error.is_null() {
        return false;
    }
    if estimator.is_null() {
        return fail(out_error, &null_handle("estimator"));
    }
    drop(Box::from_raw(estimator));
    true
}

/// Current training state: 1 pending, 2 training, 3 finished, 4 completed.
#[no_mangle]
pub unsafe extern "C" fn fz_mean_impute_estimator_get_state(
    estimator: *const FzMeanImputeEstimator,
    out_state: *mut i32,
    out_error: *mut *mut FzErrorInfo,
) -> bool {
    if out_error.is_null() {
        return false;
    }
    let pair = ffi_try!(estimator_ref(estimator), out_error);
    ffi_try!(require_out(out_state, "state"), out_error);
    *out_state = state_code(pair.state());
    true
}

/// Whether the estimator has stopped accepting training data.
#[no_mangle]
pub unsafe extern "C" fn fz_mean_impute_estimator_is_training_complete(
    estimator: *const FzMeanImputeEstimator,
    out_complete: *mut bool,
    out_error: *mut *mut FzErrorInfo,
) -> bool {
    if out_error.is_null() {
        return false;
    }
    let pair = ffi_try!(estimator_ref(estimator), out_error);
    ffi_try!(require_out(out_complete, "training complete"), out_error);
    *out_complete = pair.is_training_complete();
    true
}

/// Fit one value; a null input is a missing value. The fit result code is
/// 1 complete, 2 continue, 3 reset.
#[no_mangle]
pub unsafe extern "C" fn fz_mean_impute_estimator_fit(
    estimator: *mut FzMeanImputeEstimator,
    input: *const f64,
    out_result: *mut i32,
    out_error: *mut *mut FzErrorInfo,
) -> bool {
    if out_error.is_null() {
        return false;
    }
    let pair = ffi_try!(estimator_mut(estimator), out_error);
    ffi_try!(require_out(out_result, "fit result"), out_error);
    let item = if input.is_null() { None } else { Some(*input) };
    let result = ffi_try!(pair.fit(vec![item]), out_error);
    *out_result = fit_result_code(result);
    true
}

/// Fit a buffer of values; NaN entries are missing values.
#[no_mangle]
pub unsafe extern "C" fn fz_mean_impute_estimator_fit_buffer(
    estimator: *mut FzMeanImputeEstimator,
    values: *const f64,
    count: usize,
    out_result: *mut i32,
    out_error: *mut *mut FzErrorInfo,
) -> bool {
    if out_error.is_null() {
        return false;
    }
    let pair = ffi_try!(estimator_mut(estimator), out_error);
    ffi_try!(require_out(out_result, "fit result"), out_error);
    if values.is_null() || count == 0 {
        return fail(out_error, &Error::InvalidArgument("fit buffer is empty".into()));
    }
    let items = std::slice::from_raw_parts(values, count)
        .iter()
        .map(|&value| if value.is_nan() { None } else { Some(value) })
        .collect();
    let result = ffi_try!(pair.fit(items), out_error);
    *out_result = fit_result_code(result);
    true
}

/// Signal the end of a training pass.
#[no_mangle]
pub unsafe extern "C" fn fz_mean_impute_estimator_on_data_completed(
    estimator: *mut FzMeanImputeEstimator,
    out_error: *mut *mut FzErrorInfo,
) -> bool {
    if out_error.is_null() {
        return false;
    }
    let pair = ffi_try!(estimator_mut(estimator), out_error);
    ffi_try!(pair.on_data_completed(), out_error);
    true
}

/// Finalize training, capturing the mean to impute.
#[no_mangle]
pub unsafe extern "C" fn fz_mean_impute_estimator_complete_training(
    estimator: *mut FzMeanImputeEstimator,
    out_error: *mut *mut FzErrorInfo,
) -> bool {
    if out_error.is_null() {
        return false;
    }
    let pair = ffi_try!(estimator_mut(estimator), out_error);
    ffi_try!(pair.complete_training(), out_error);
    true
}

/// Build the trained transformer; valid once per estimator.
#[no_mangle]
pub unsafe extern "C" fn fz_mean_impute_estimator_create_transformer(
    estimator: *mut FzMeanImputeEstimator,
    out_transformer: *mut *mut FzMeanImputeTransformer,
    out_error: *mut *mut FzErrorInfo,
) -> bool {
    if out_error.is_null() {
        return false;
    }
    let pair = ffi_try!(estimator_mut(estimator), out_error);
    ffi_try!(require_out(out_transformer, "transformer"), out_error);
    let inner = ffi_try!(pair.create_transformer(), out_error);
    *out_transformer = Box::into_raw(Box::new(FzMeanImputeTransformer { inner }));
    true
}

/// Release a transformer handle.
#[no_mangle]
pub unsafe extern "C" fn fz_mean_impute_transformer_destroy(
    transformer: *mut FzMeanImputeTransformer,
    out_error: *mut *mut FzErrorInfo,
) -> bool {
    if out_error.is_null() {
        return false;
    }
    if transformer.is_null() {
        return fail(out_error, &null_handle("transformer"));
    }
    drop(Box::from_raw(transformer));
    true
}

/// Transform one value; a null input is a missing value and comes back as
/// the trained mean.
#[no_mangle]
pub unsafe extern "C" fn fz_mean_impute_transformer_transform(
    transformer: *mut FzMeanImputeTransformer,
    input: *const f64,
    out_value: *mut f64,
    out_error: *mut *mut FzErrorInfo,
) -> bool {
    if out_error.is_null() {
        return false;
    }
    let inner = ffi_try!(transformer_mut(transformer), out_error);
    ffi_try!(require_out(out_value, "value"), out_error);
    let item = if input.is_null() { None } else { Some(*input) };
    let mut produced = None;
    ffi_try!(inner.execute(item, &mut |value| produced = Some(value)), out_error);
    let Some(value) = produced else {
        return fail(out_error, &Error::InvalidArgument("transform produced no output".into()));
    };
    *out_value = value;
    true
}

/// Drain pending outputs into a caller-owned buffer; release it with
/// [`fz_destroy_float_buffer`]. An empty drain yields a null pointer and
/// zero count.
#[no_mangle]
pub unsafe extern "C" fn fz_mean_impute_transformer_flush(
    transformer: *mut FzMeanImputeTransformer,
    out_values: *mut *mut f64,
    out_count: *mut usize,
    out_error: *mut *mut FzErrorInfo,
) -> bool {
    if out_error.is_null() {
        return false;
    }
    let inner = ffi_try!(transformer_mut(transformer), out_error);
    ffi_try!(require_out(out_values, "values"), out_error);
    ffi_try!(require_out(out_count, "count"), out_error);
    let mut values = Vec::new();
    ffi_try!(inner.flush(&mut |value| values.push(value)), out_error);
    if values.is_empty() {
        *out_values = std::ptr::null_mut();
        *out_count = 0;
    } else {
        let boxed = values.into_boxed_slice();
        *out_count = boxed.len();
        *out_values = Box::into_raw(boxed).cast::<f64>();
    }
    true
}

/// Serialize the transformer into a caller-owned byte buffer; release it
/// with [`fz_destroy_byte_buffer`].
#[no_mangle]
pub unsafe extern "C" fn fz_mean_impute_transformer_save_data(
    transformer: *mut FzMeanImputeTransformer,
    out_bytes: *mut *mut u8,
    out_count: *mut usize,
    out_error: *mut *mut FzErrorInfo,
) -> bool {
    if out_error.is_null() {
        return false;
    }
    let inner = ffi_try!(transformer_mut(transformer), out_error);
    ffi_try!(require_out(out_bytes, "bytes"), out_error);
    ffi_try!(require_out(out_count, "count"), out_error);
    let mut writer = ArchiveWriter::new();
    ffi_try!(inner.save(&mut writer), out_error);
    let boxed = writer.into_bytes().into_boxed_slice();
    *out_count = boxed.len();
    *out_bytes = Box::into_raw(boxed).cast::<u8>();
    true
}

/// Rebuild a transformer from bytes produced by
/// [`fz_mean_impute_transformer_save_data`].
#[no_mangle]
pub unsafe extern "C" fn fz_mean_impute_transformer_create_from_save_data(
    data: *const u8,
    count: usize,
    out_transformer: *mut *mut FzMeanImputeTransformer,
    out_error: *mut *mut FzErrorInfo,
) -> bool {
    if out_error.is_null() {
        return false;
    }
    ffi_try!(require_out(out_transformer, "transformer"), out_error);
    if data.is_null() || count == 0 {
        return fail(out_error, &Error::InvalidArgument("save data buffer is empty".into()));
    }
    let bytes = std::slice::from_raw_parts(data, count);
    let inner =
        ffi_try!(MeanImputeTransform::from_archive(&mut ArchiveReader::new(bytes)), out_error);
    tracing::debug!(bytes = count, "restored mean impute transformer");
    *out_transformer = Box::into_raw(Box::new(FzMeanImputeTransformer { inner }));
    true
}

/// Release a float buffer returned by a flush. A null pointer with zero
/// count is an empty buffer and succeeds.
#[no_mangle]
pub unsafe extern "C" fn fz_destroy_float_buffer(
    values: *mut f64,
    count: usize,
    out_error: *mut *mut FzErrorInfo,
) -> bool {
    if out_error.is_null() {
        return false;
    }
    if values.is_null() {
        if count == 0 {
            return true;
        }
        return fail(out_error, &Error::InvalidArgument("float buffer pointer is null".into()));
    }
    drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(values, count)));
    true
}

/// Release a byte buffer returned by a save.
#[no_mangle]
pub unsafe extern "C" fn fz_destroy_byte_buffer(
    bytes: *mut u8,
    count: usize,
    out_error: *mut *mut FzErrorInfo,
) -> bool {
    if out_error.is_null() {
        return false;
    }
    if bytes.is_null() {
        if count == 0 {
            return true;
        }
        return fail(out_error, &Error::InvalidArgument("byte buffer pointer is null".into()));
    }
    drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(bytes, count)));
    true
}
