//! # DBN (Deep Belief Networks)
//!
//! Deep Belief Networks built from stacked Restricted Boltzmann Machines,
//! trained in two phases:
//!
//! 1. **Pretraining**: greedy, layer-wise Contrastive Divergence (CD-k) on
//!    each RBM, bottom-up.
//! 2. **Finetuning**: gradient descent on the whole-network reconstruction
//!    loss, with patience-based early stopping.
//!
//! Every RBM doubles as an encoder layer `(W, hbias)` and, transposed, as the
//! mirrored decoder layer `(Wᵀ, vbias)`. The decoder turns a top-level code
//! back into visible-layer probabilities, which is how new piano rolls are
//! generated.
//!
//! ## Structure
//!
//! - [`core`]: Sigmoid layers, RBMs, the DBN stack, errors
//! - [`grad`]: Gradient engines for the reconstruction loss
//! - [`training`]: Pretraining and finetuning drivers, early stopping
//! - [`checkpoint`]: JSON persistence of named parameter tensors
//! - [`data`]: Dataset loading and piano-roll helpers
//! - [`utils`]: Sigmoid, softplus, Bernoulli sampling

pub mod checkpoint;
pub mod core;
pub mod data;
pub mod grad;
pub mod training;
pub mod utils;

pub use crate::core::{
    Activation, CdGradients, Dbn, DbnError, DbnResult, Identity, ParamId, ParamRole, Rbm,
    Sigmoid, SigmoidLayer,
};
pub use crate::grad::{Backprop, FiniteDifference, GradientEngine, Gradients};
pub use crate::training::{
    finetune, partition, pretrain, EarlyStopping, FinetuneReport, PretrainReport,
};

/// Configuration for greedy layer-wise pretraining.
///
/// Used by [`pretrain`].
#[derive(Debug, Clone)]
pub struct PretrainConfig {
    /// Epochs per layer
    pub epochs: usize,
    pub learning_rate: f32,
    /// Gibbs steps per CD update (CD-k)
    pub k: usize,
    pub batch_size: usize,
}

impl Default for PretrainConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            learning_rate: 0.01,
            k: 1,
            batch_size: 10,
        }
    }
}

/// Configuration for reconstruction finetuning.
///
/// Used by [`finetune`].
#[derive(Debug, Clone)]
pub struct FinetuneConfig {
    /// Upper bound on epochs; early stopping usually ends training sooner
    pub epochs: usize,
    pub learning_rate: f32,
    pub batch_size: usize,
    /// Abort with `DbnError::Divergence` when a parameter turns NaN/inf
    pub check_divergence: bool,
}

impl Default for FinetuneConfig {
    fn default() -> Self {
        Self {
            epochs: 1000,
            learning_rate: 0.01,
            batch_size: 10,
            check_divergence: true,
        }
    }
}
