use ndarray::Array2;

use crate::error::{Result, SuperResError};
use crate::flow::field::MotionField;
use crate::flow::select::ComputeBackend;
use crate::frame::{Frame, MAX_SAMPLE};

/// Dense motion estimator.
///
/// # Contract
///
/// `estimate(reference, source)` returns a field on the source grid such that
/// `reference(p + d(p)) ≈ source(p)`. Both frames must share dimensions.
///
/// Implementations hold configuration only. `estimate` takes `&self` and MUST
/// NOT keep state between calls, so independent pairs can be estimated
/// concurrently and repeated calls on identical input return identical fields.
pub trait MotionEstimator: Send + Sync {
    /// Estimator identifier, used in logs.
    fn name(&self) -> &'static str;

    /// Backend the per-row kernels run on.
    fn backend(&self) -> ComputeBackend;

    fn estimate(&self, reference: &Frame, source: &Frame) -> Result<MotionField>;
}

/// Reject pairs the estimators cannot align.
pub(crate) fn check_pair(reference: &Frame, source: &Frame) -> Result<()> {
    if reference.dims() != source.dims() {
        return Err(SuperResError::FrameMismatch(format!(
            "reference {}x{} and source {}x{} differ in size",
            reference.width(),
            reference.height(),
            source.width(),
            source.height()
        )));
    }
    Ok(())
}

/// Luma of both frames normalised to `0..=1`, as `(source, reference)`.
pub(crate) fn normalized_pair(reference: &Frame, source: &Frame) -> (Array2<f32>, Array2<f32>) {
    let norm = 1.0 / MAX_SAMPLE;
    (
        source.luma().mapv(|v| v * norm),
        reference.luma().mapv(|v| v * norm),
    )
}

/// Wrap a computed field, turning numeric blow-ups into estimation failures.
pub(crate) fn finish_field(
    reference: &Frame,
    source: &Frame,
    dx: Array2<f32>,
    dy: Array2<f32>,
) -> Result<MotionField> {
    let field = MotionField::from_components(dx, dy)?;
    if !field.is_finite() {
        return Err(SuperResError::Estimation {
            reference_index: reference.index(),
            source_index: source.index(),
            reason: "non-finite displacement".to_string(),
        });
    }
    Ok(field)
}
