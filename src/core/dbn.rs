//! The DBN stack: RBMs viewed as an encoder and a mirrored decoder.
//!
//! # Architecture
//!
//! - **RBMs:** `rbms[i]` has shape `(d_i, d_{i+1})` with `d_0 = n_ins` and
//!   `d_{i+1} = hidden_layer_sizes[i]`
//! - **Encoder:** `encoder(i)` maps `d_i -> d_{i+1}` with `(W_i, hbias_i)`
//! - **Decoder:** `decoder(i)` maps `d_{i+1} -> d_i` with `(W_iᵀ, vbias_i)`
//!
//! ```text
//! x ─enc 0─▶ a_1 ─enc 1─▶ … ─enc L-1─▶ a_L
//!                                        │
//! x̂ ◀─dec 0── d_1 ◀─dec 1── … ◀─dec L-1──┘
//! loss = Σ (x - x̂)²
//! ```

use ndarray::{s, Array1, Array2, ArrayView2, ArrayViewD, ArrayViewMutD};
use rand::Rng;

use super::rbm::Rbm;
use super::{Activation, DbnError, DbnResult, Sigmoid, SigmoidLayer};
use crate::utils::{all_finite, bernoulli};

/// Which tensor of an RBM a parameter refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamRole {
    Weights,
    HiddenBias,
    VisibleBias,
}

impl ParamRole {
    /// Per-layer order used by the registry.
    pub const ALL: [ParamRole; 3] = [
        ParamRole::Weights,
        ParamRole::HiddenBias,
        ParamRole::VisibleBias,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ParamRole::Weights => "W",
            ParamRole::HiddenBias => "hbias",
            ParamRole::VisibleBias => "vbias",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.name() == name)
    }
}

/// A trainable tensor: `(layer, role)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId {
    pub layer: usize,
    pub role: ParamRole,
}

impl ParamId {
    /// Stable name, e.g. `layer0.W`.
    pub fn name(&self) -> String {
        format!("layer{}.{}", self.layer, self.role.name())
    }

    /// Inverse of [`ParamId::name`].
    pub fn parse(name: &str) -> Option<Self> {
        let (layer, role) = name.strip_prefix("layer")?.split_once('.')?;
        Some(Self {
            layer: layer.parse().ok()?,
            role: ParamRole::from_name(role)?,
        })
    }
}

/// A Deep Belief Network.
pub struct Dbn {
    n_ins: usize,
    hidden_layer_sizes: Vec<usize>,
    rbms: Vec<Rbm>,
    activation: Box<dyn Activation>,
    /// Every trainable tensor, by layer then `W, hbias, vbias`
    registry: Vec<ParamId>,
}

impl std::fmt::Debug for Dbn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dbn")
            .field("n_ins", &self.n_ins)
            .field("hidden_layer_sizes", &self.hidden_layer_sizes)
            .field("rbms", &format!("<{} RBMs>", self.rbms.len()))
            .field(
                "activation",
                &format!("<{} activation>", self.activation.name()),
            )
            .finish()
    }
}

impl Clone for Dbn {
    fn clone(&self) -> Self {
        Self {
            n_ins: self.n_ins,
            hidden_layer_sizes: self.hidden_layer_sizes.clone(),
            rbms: self.rbms.clone(),
            activation: self.activation.clone_box(),
            registry: self.registry.clone(),
        }
    }
}

fn validate_dims(n_ins: usize, hidden_layer_sizes: &[usize]) -> DbnResult<()> {
    if hidden_layer_sizes.is_empty() {
        return Err(DbnError::Configuration(
            "a DBN needs at least one hidden layer".to_string(),
        ));
    }
    if n_ins == 0 {
        return Err(DbnError::Configuration(
            "input dimension must be positive".to_string(),
        ));
    }
    if let Some(i) = hidden_layer_sizes.iter().position(|&d| d == 0) {
        return Err(DbnError::Configuration(format!(
            "hidden layer {i} has size 0"
        )));
    }
    Ok(())
}

impl Dbn {
    /// Create a sigmoid DBN with `n_ins` visible units.
    ///
    /// # Errors
    /// - `Configuration` if `hidden_layer_sizes` is empty or any size is 0
    pub fn new<R: Rng + ?Sized>(
        n_ins: usize,
        hidden_layer_sizes: &[usize],
        rng: &mut R,
    ) -> DbnResult<Self> {
        Self::with_activation(n_ins, hidden_layer_sizes, Box::new(Sigmoid), rng)
    }

    /// Create a DBN with a custom activation for the feed-forward views.
    ///
    /// Weights are drawn from `U(-r, r)` with
    /// `r = activation.init_scale() * sqrt(6 / (n_in + n_out))`; both bias
    /// vectors start at zero.
    pub fn with_activation<R: Rng + ?Sized>(
        n_ins: usize,
        hidden_layer_sizes: &[usize],
        activation: Box<dyn Activation>,
        rng: &mut R,
    ) -> DbnResult<Self> {
        validate_dims(n_ins, hidden_layer_sizes)?;

        let mut rbms = Vec::with_capacity(hidden_layer_sizes.len());
        let mut n_in = n_ins;
        for &n_out in hidden_layer_sizes {
            let (w, hbias) = SigmoidLayer::init_params(n_in, n_out, activation.as_ref(), rng);
            rbms.push(Rbm::from_parts(w, hbias, Array1::zeros(n_in))?);
            n_in = n_out;
        }

        Self::from_rbms(n_ins, rbms, activation)
    }

    /// Rebuild a DBN around existing RBMs.
    ///
    /// # Errors
    /// - `Configuration` if `rbms` is empty
    /// - `DimensionMismatch` if consecutive RBMs don't chain
    pub fn from_rbms(
        n_ins: usize,
        rbms: Vec<Rbm>,
        activation: Box<dyn Activation>,
    ) -> DbnResult<Self> {
        let hidden_layer_sizes: Vec<usize> = rbms.iter().map(Rbm::n_hidden).collect();
        validate_dims(n_ins, &hidden_layer_sizes)?;

        let mut n_in = n_ins;
        for (i, rbm) in rbms.iter().enumerate() {
            if rbm.n_visible() != n_in {
                return Err(DbnError::DimensionMismatch(format!(
                    "RBM {i} has {} visible units, expected {n_in}",
                    rbm.n_visible()
                )));
            }
            n_in = rbm.n_hidden();
        }

        let registry = (0..rbms.len())
            .flat_map(|layer| ParamRole::ALL.map(|role| ParamId { layer, role }))
            .collect();

        Ok(Self {
            n_ins,
            hidden_layer_sizes,
            rbms,
            activation,
            registry,
        })
    }

    pub fn n_layers(&self) -> usize {
        self.rbms.len()
    }

    pub fn n_ins(&self) -> usize {
        self.n_ins
    }

    pub fn hidden_layer_sizes(&self) -> &[usize] {
        &self.hidden_layer_sizes
    }

    /// Width of the top-level code.
    pub fn top_size(&self) -> usize {
        self.hidden_layer_sizes[self.hidden_layer_sizes.len() - 1]
    }

    pub fn activation(&self) -> &dyn Activation {
        &*self.activation
    }

    pub fn rbms(&self) -> &[Rbm] {
        &self.rbms
    }

    /// # Panics
    /// If `i >= n_layers()`.
    pub fn rbm(&self, i: usize) -> &Rbm {
        &self.rbms[i]
    }

    /// # Panics
    /// If `i >= n_layers()`.
    pub fn rbm_mut(&mut self, i: usize) -> &mut Rbm {
        &mut self.rbms[i]
    }

    /// Encoder layer `i`: `(W_i, hbias_i)`.
    ///
    /// # Panics
    /// If `i >= n_layers()`.
    pub fn encoder(&self, i: usize) -> SigmoidLayer<'_> {
        let rbm = &self.rbms[i];
        SigmoidLayer {
            w: rbm.weights(),
            b: rbm.hbias(),
            activation: &*self.activation,
        }
    }

    /// Decoder layer mirrored at `i`: `(W_iᵀ, vbias_i)`.
    ///
    /// # Panics
    /// If `i >= n_layers()`.
    pub fn decoder(&self, i: usize) -> SigmoidLayer<'_> {
        let rbm = &self.rbms[i];
        SigmoidLayer {
            w: rbm.weights().reversed_axes(),
            b: rbm.vbias(),
            activation: &*self.activation,
        }
    }

    /// The parameter registry, in the order gradients are computed and applied.
    pub fn params(&self) -> &[ParamId] {
        &self.registry
    }

    /// # Panics
    /// If `id.layer >= n_layers()`.
    pub fn param(&self, id: ParamId) -> ArrayViewD<'_, f32> {
        self.rbms[id.layer].param(id.role)
    }

    /// # Panics
    /// If `id.layer >= n_layers()`.
    pub fn param_mut(&mut self, id: ParamId) -> ArrayViewMutD<'_, f32> {
        self.rbms[id.layer].param_mut(id.role)
    }

    /// First registry entry holding a NaN or infinite value.
    pub fn first_non_finite(&self) -> Option<ParamId> {
        self.registry
            .iter()
            .copied()
            .find(|&id| !all_finite(self.param(id).iter()))
    }

    fn check_input(&self, x: &ArrayView2<f32>) -> DbnResult<()> {
        if x.ncols() != self.n_ins {
            return Err(DbnError::DimensionMismatch(format!(
                "expected {} input columns, got {}",
                self.n_ins,
                x.ncols()
            )));
        }
        Ok(())
    }

    /// Output of encoder layer `layer - 1` (the raw input for `layer == 0`).
    ///
    /// This is the visible data RBM `layer` is pretrained on.
    pub fn layer_input(&self, x: ArrayView2<f32>, layer: usize) -> DbnResult<Array2<f32>> {
        self.check_input(&x)?;
        if layer >= self.n_layers() {
            return Err(DbnError::DimensionMismatch(format!(
                "layer {layer} out of range for {} layers",
                self.n_layers()
            )));
        }
        let mut a = x.to_owned();
        for i in 0..layer {
            a = self.encoder(i).forward(a.view())?;
        }
        Ok(a)
    }

    /// Forward pass through the whole encoder stack.
    pub fn encode(&self, x: ArrayView2<f32>) -> DbnResult<Array2<f32>> {
        self.check_input(&x)?;
        let mut a = x.to_owned();
        for i in 0..self.n_layers() {
            a = self.encoder(i).forward(a.view())?;
        }
        Ok(a)
    }

    /// Top-level representation of rows `start..start + len` of `data`.
    pub fn label(&self, data: ArrayView2<f32>, start: usize, len: usize) -> DbnResult<Array2<f32>> {
        let end = start
            .checked_add(len)
            .filter(|&end| end <= data.nrows())
            .ok_or_else(|| {
                DbnError::DimensionMismatch(format!(
                    "rows {start}..{start}+{len} out of range for {} rows",
                    data.nrows()
                ))
            })?;
        self.encode(data.slice(s![start..end, ..]))
    }

    /// Run a top-level code down the decoder stack to visible probabilities.
    pub fn generate(&self, top_level: ArrayView2<f32>) -> DbnResult<Array2<f32>> {
        if top_level.ncols() != self.top_size() {
            return Err(DbnError::DimensionMismatch(format!(
                "top-level code must have {} columns, got {}",
                self.top_size(),
                top_level.ncols()
            )));
        }
        let mut d = top_level.to_owned();
        for i in (0..self.n_layers()).rev() {
            d = self.decoder(i).forward(d.view())?;
        }
        Ok(d)
    }

    /// `generate(encode(x))`.
    pub fn reconstruct(&self, x: ArrayView2<f32>) -> DbnResult<Array2<f32>> {
        let code = self.encode(x)?;
        self.generate(code.view())
    }

    /// Sum of squared reconstruction error over the batch: `Σ (x - x̂)²`.
    pub fn reconstruction_loss(&self, x: ArrayView2<f32>) -> DbnResult<f32> {
        let x_hat = self.reconstruct(x)?;
        Ok(x.iter()
            .zip(x_hat.iter())
            .map(|(&a, &b)| (a - b) * (a - b))
            .sum())
    }

    /// A random binary top-level code with `rows` rows, each unit on with probability 0.5.
    pub fn sample_top_code<R: Rng + ?Sized>(&self, rows: usize, rng: &mut R) -> Array2<f32> {
        let probs = Array2::from_elem((rows, self.top_size()), 0.5f32);
        bernoulli(&probs, rng)
    }
}
