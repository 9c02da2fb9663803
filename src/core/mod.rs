//! Core DBN building blocks.
//!
//! This module provides the network kernel:
//! - Sigmoid layers as borrowed views over RBM-owned parameters
//! - Restricted Boltzmann Machines with CD-k
//! - The DBN stack (encoder, mirrored decoder, reconstruction loss)
//!
//! ## Parameter ownership
//!
//! Each RBM owns its `W`, `hbias` and `vbias`. Encoder layer `i` borrows
//! `(W_i, hbias_i)`; the decoder layer mirrored at `i` borrows
//! `(W_iᵀ, vbias_i)` where the transpose is a zero-copy view:
//! ```text
//! encoder_i(x) = f(x · W_i  + hbias_i)
//! decoder_i(h) = f(h · W_iᵀ + vbias_i)
//! ```
//! Views are built on demand, so an update to any RBM parameter is seen by
//! every layer that reads it.

pub mod dbn;
pub mod rbm;

pub use dbn::{Dbn, ParamId, ParamRole};
pub use rbm::{CdGradients, GibbsStep, Rbm};

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use ndarray_rand::RandomExt;
use rand::distributions::Uniform;
use rand::Rng;
use thiserror::Error;

use crate::utils::{d_sigmoid_from_output, sigmoid};

/// Error type for DBN construction, training and persistence.
#[derive(Error, Debug)]
pub enum DbnError {
    /// Invalid network architecture (no layers, zero-sized layer)
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Invalid training hyperparameter
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// Shape mismatch between data and network, or an unusable partition
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
    /// A parameter became NaN or infinite during finetuning
    #[error("training diverged at iteration {iteration}: non-finite values in {param}")]
    Divergence { iteration: usize, param: String },
    /// Malformed checkpoint contents
    #[error("checkpoint error: {0}")]
    Checkpoint(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type DbnResult<T> = Result<T, DbnError>;

/// Activation function shared by the encoder and decoder stacks.
///
/// The RBMs always sample with the logistic sigmoid; the activation only
/// affects the deterministic feed-forward views.
pub trait Activation: Send + Sync {
    /// Apply activation elementwise, consuming the pre-activation matrix.
    fn apply(&self, z: Array2<f32>) -> Array2<f32>;

    /// Derivative of the activation, computed from its output `y = f(z)`.
    fn derivative_from_output(&self, y: &Array2<f32>) -> Array2<f32>;

    /// Multiplier applied to the Glorot range when drawing fresh weights.
    fn init_scale(&self) -> f32;

    /// Name for debugging and checkpoints
    fn name(&self) -> &'static str;

    fn clone_box(&self) -> Box<dyn Activation>;
}

/// Logistic sigmoid: f(z) = 1 / (1 + e^-z), f' = f(1 - f)
#[derive(Debug, Clone, Copy, Default)]
pub struct Sigmoid;

impl Activation for Sigmoid {
    fn apply(&self, mut z: Array2<f32>) -> Array2<f32> {
        z.mapv_inplace(sigmoid);
        z
    }

    fn derivative_from_output(&self, y: &Array2<f32>) -> Array2<f32> {
        y.mapv(d_sigmoid_from_output)
    }

    fn init_scale(&self) -> f32 {
        4.0
    }

    fn name(&self) -> &'static str {
        "sigmoid"
    }

    fn clone_box(&self) -> Box<dyn Activation> {
        Box::new(*self)
    }
}

/// Identity activation: f(z) = z, f' = 1
///
/// Linear variant of the stacks, useful for sanity checks where an
/// encode/decode round trip should be exact.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Activation for Identity {
    fn apply(&self, z: Array2<f32>) -> Array2<f32> {
        z
    }

    fn derivative_from_output(&self, y: &Array2<f32>) -> Array2<f32> {
        Array2::ones(y.dim())
    }

    fn init_scale(&self) -> f32 {
        1.0
    }

    fn name(&self) -> &'static str {
        "identity"
    }

    fn clone_box(&self) -> Box<dyn Activation> {
        Box::new(*self)
    }
}

/// Reconstruct an activation function from its name.
pub fn activation_from_name(name: &str) -> DbnResult<Box<dyn Activation>> {
    match name {
        "sigmoid" => Ok(Box::new(Sigmoid)),
        "identity" => Ok(Box::new(Identity)),
        _ => Err(DbnError::Configuration(format!(
            "unknown activation function: {name}"
        ))),
    }
}

/// Draw a fresh weight matrix of shape `(n_in, n_out)`.
///
/// `W ~ U(-r, r)` with `r = scale * sqrt(6 / (n_in + n_out))`.
pub fn init_weights<R: Rng + ?Sized>(
    n_in: usize,
    n_out: usize,
    scale: f32,
    rng: &mut R,
) -> Array2<f32> {
    let limit = scale * (6.0f32 / (n_in + n_out) as f32).sqrt();
    Array2::random_using((n_in, n_out), Uniform::new(-limit, limit), rng)
}

/// Affine transform followed by an activation: `output = f(input · W + b)`.
///
/// The layer never owns its parameters; it reads them through views so
/// that encoder and decoder layers stay in sync with the RBMs.
#[derive(Clone, Copy)]
pub struct SigmoidLayer<'a> {
    w: ArrayView2<'a, f32>,
    b: ArrayView1<'a, f32>,
    activation: &'a dyn Activation,
}

impl<'a> SigmoidLayer<'a> {
    /// Build a layer over externally owned parameters.
    ///
    /// # Errors
    /// - `DimensionMismatch` if `b.len() != w.ncols()`
    pub fn new(
        w: ArrayView2<'a, f32>,
        b: ArrayView1<'a, f32>,
        activation: &'a dyn Activation,
    ) -> DbnResult<Self> {
        if b.len() != w.ncols() {
            return Err(DbnError::DimensionMismatch(format!(
                "bias of length {} for weights of shape {:?}",
                b.len(),
                w.dim()
            )));
        }
        Ok(Self { w, b, activation })
    }

    /// Freshly initialized `(W, b)` for a layer of the given size.
    ///
    /// Biases start at zero.
    pub fn init_params<R: Rng + ?Sized>(
        n_in: usize,
        n_out: usize,
        activation: &dyn Activation,
        rng: &mut R,
    ) -> (Array2<f32>, Array1<f32>) {
        (
            init_weights(n_in, n_out, activation.init_scale(), rng),
            Array1::zeros(n_out),
        )
    }

    pub fn n_in(&self) -> usize {
        self.w.nrows()
    }

    pub fn n_out(&self) -> usize {
        self.w.ncols()
    }

    pub fn weights(&self) -> ArrayView2<'a, f32> {
        self.w
    }

    pub fn bias(&self) -> ArrayView1<'a, f32> {
        self.b
    }

    /// Forward pass over a batch: `(batch, n_in) -> (batch, n_out)`.
    pub fn forward(&self, input: ArrayView2<f32>) -> DbnResult<Array2<f32>> {
        if input.ncols() != self.n_in() {
            return Err(DbnError::DimensionMismatch(format!(
                "layer expects {} input columns, got {}",
                self.n_in(),
                input.ncols()
            )));
        }
        let mut z = input.dot(&self.w);
        z += &self.b;
        Ok(self.activation.apply(z))
    }
}

impl std::fmt::Debug for SigmoidLayer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigmoidLayer")
            .field("n_in", &self.n_in())
            .field("n_out", &self.n_out())
            .field("activation", &self.activation.name())
            .finish()
    }
}
