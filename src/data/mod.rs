//! Dataset loading and piano-roll helpers.
//!
//! ## Submodules
//!
//! - [`roll`]: Reshape visible vectors into pitch × time rolls and binarize them

pub mod roll;

use std::path::Path;

use ndarray::Array2;

use crate::core::{DbnError, DbnResult};

/// Build a dense `(rows, cols)` matrix from equally long rows.
///
/// # Errors
/// - `DimensionMismatch` if `rows` is empty or ragged
pub fn rows_to_array(rows: &[Vec<f32>]) -> DbnResult<Array2<f32>> {
    let ncols = rows.first().map(Vec::len).unwrap_or(0);
    if ncols == 0 {
        return Err(DbnError::DimensionMismatch(
            "dataset has no columns".to_string(),
        ));
    }
    if let Some(i) = rows.iter().position(|r| r.len() != ncols) {
        return Err(DbnError::DimensionMismatch(format!(
            "row {i} has {} columns, expected {ncols}",
            rows[i].len()
        )));
    }
    let flat: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
    Array2::from_shape_vec((rows.len(), ncols), flat)
        .map_err(|e| DbnError::DimensionMismatch(format!("failed to build dataset: {e}")))
}

/// Load a dataset stored as a JSON array of rows, e.g. `[[0, 1, 0], [1, 1, 0]]`.
pub fn load_rows(path: &Path) -> DbnResult<Array2<f32>> {
    let json = std::fs::read_to_string(path)?;
    let rows: Vec<Vec<f32>> = serde_json::from_str(&json)?;
    rows_to_array(&rows)
}

/// True when every entry lies in `[0, 1]`.
pub fn is_unit_interval(data: &Array2<f32>) -> bool {
    data.iter().all(|v| (0.0..=1.0).contains(v))
}
