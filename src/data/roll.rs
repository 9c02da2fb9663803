//! Piano rolls: a visible vector viewed as a `(pitches, steps)` matrix.
//!
//! A generated visible vector of length `pitches * steps` is laid out
//! row-major, one row per pitch. Thresholding turns probabilities into
//! note on/off values.

use ndarray::{Array2, ArrayView1};

use crate::core::{DbnError, DbnResult};

/// Reshape one visible vector into a `(pitches, steps)` roll.
pub fn to_roll(row: ArrayView1<f32>, pitches: usize, steps: usize) -> DbnResult<Array2<f32>> {
    if pitches.checked_mul(steps) != Some(row.len()) {
        return Err(DbnError::DimensionMismatch(format!(
            "cannot view {} values as a {pitches}x{steps} roll",
            row.len()
        )));
    }
    Array2::from_shape_vec((pitches, steps), row.iter().copied().collect())
        .map_err(|e| DbnError::DimensionMismatch(format!("failed to reshape roll: {e}")))
}

/// 1 where `value > threshold`, 0 elsewhere.
pub fn binarize(roll: &Array2<f32>, threshold: f32) -> Array2<f32> {
    roll.mapv(|v| if v > threshold { 1.0 } else { 0.0 })
}
