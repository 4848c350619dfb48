//! Masked binary cross-entropy.

use candle_core::Tensor;

use crate::error::Result;

/// Mean BCE over the timesteps where `mask` is 1, computed from logits as
/// `max(x, 0) - x * t + ln(1 + e^-|x|)` so large logits never overflow.
///
/// Returns `None` when `valid_count` is zero; there is nothing to learn from
/// an all-padding batch.
pub fn masked_bce_with_logits(
    logits: &Tensor,
    targets: &Tensor,
    mask: &Tensor,
    valid_count: usize,
) -> Result<Option<Tensor>> {
    if valid_count == 0 {
        return Ok(None);
    }
    let softplus = logits.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    let per_step = logits
        .relu()?
        .sub(&logits.mul(targets)?)?
        .add(&softplus)?;
    let total = per_step.mul(mask)?.sum_all()?;
    Ok(Some(total.affine(1.0 / valid_count as f64, 0.0)?))
}
