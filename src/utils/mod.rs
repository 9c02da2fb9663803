//! Scalar math helpers and Bernoulli sampling.

use ndarray::{Array, Dimension};
use rand::Rng;

/// Logistic sigmoid: 1 / (1 + e^-x).
#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Derivative of the sigmoid, expressed through its output `y = sigmoid(x)`.
#[inline]
pub fn d_sigmoid_from_output(y: f32) -> f32 {
    y * (1.0 - y)
}

/// Numerically stable `ln(1 + e^x)`.
#[inline]
pub fn softplus(x: f32) -> f32 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

/// Draw a binary sample per element: 1 with probability `p`, else 0.
pub fn bernoulli<D, R>(probs: &Array<f32, D>, rng: &mut R) -> Array<f32, D>
where
    D: Dimension,
    R: Rng + ?Sized,
{
    probs.mapv(|p| if rng.gen::<f32>() < p { 1.0 } else { 0.0 })
}

/// True when every element is finite.
pub fn all_finite<'a, I>(values: I) -> bool
where
    I: IntoIterator<Item = &'a f32>,
{
    values.into_iter().all(|v| v.is_finite())
}
