//! Gradients of the reconstruction loss with respect to every DBN parameter.
//!
//! Any [`GradientEngine`] returns, for each entry of [`Dbn::params`], a tensor
//! of the parameter's shape holding `∂loss/∂parameter` where
//! `loss = Σ (x - decode(encode(x)))²` on one minibatch.
//!
//! ## Backpropagation
//!
//! `W_i` is used twice: by encoder `i` and (transposed) by decoder `i`, so its
//! gradient is the sum of both contributions:
//! ```text
//! g      = 2 (x̂ - x)
//! decoder i = 0..L:   δ = g ⊙ f'(d_i)     ∂vbias_i = Σ_rows δ    ∂W_i += δᵀ d_{i+1}   g = δ W_i
//! encoder i = L-1..0: δ = g ⊙ f'(a_{i+1}) ∂hbias_i = Σ_rows δ   ∂W_i += a_iᵀ δ       g = δ W_iᵀ
//! ```

use ndarray::{Array1, Array2, ArrayView2, ArrayViewD, ArrayViewMutD, Axis};

use crate::core::{Dbn, DbnError, DbnResult, ParamId, ParamRole};

/// Gradients for one layer, shaped like its RBM.
#[derive(Debug, Clone)]
pub struct LayerGradients {
    pub w: Array2<f32>,
    pub hbias: Array1<f32>,
    pub vbias: Array1<f32>,
}

/// Gradients for every parameter of a [`Dbn`].
#[derive(Debug, Clone)]
pub struct Gradients {
    layers: Vec<LayerGradients>,
}

impl Gradients {
    /// All-zero gradients shaped like `dbn`.
    pub fn zeros_like(dbn: &Dbn) -> Self {
        let layers = dbn
            .rbms()
            .iter()
            .map(|rbm| LayerGradients {
                w: Array2::zeros((rbm.n_visible(), rbm.n_hidden())),
                hbias: Array1::zeros(rbm.n_hidden()),
                vbias: Array1::zeros(rbm.n_visible()),
            })
            .collect();
        Self { layers }
    }

    pub fn layers(&self) -> &[LayerGradients] {
        &self.layers
    }

    pub fn layer(&self, i: usize) -> Option<&LayerGradients> {
        self.layers.get(i)
    }

    pub fn get(&self, id: ParamId) -> Option<ArrayViewD<'_, f32>> {
        let layer = self.layers.get(id.layer)?;
        Some(match id.role {
            ParamRole::Weights => layer.w.view().into_dyn(),
            ParamRole::HiddenBias => layer.hbias.view().into_dyn(),
            ParamRole::VisibleBias => layer.vbias.view().into_dyn(),
        })
    }

    pub fn get_mut(&mut self, id: ParamId) -> Option<ArrayViewMutD<'_, f32>> {
        let layer = self.layers.get_mut(id.layer)?;
        Some(match id.role {
            ParamRole::Weights => layer.w.view_mut().into_dyn(),
            ParamRole::HiddenBias => layer.hbias.view_mut().into_dyn(),
            ParamRole::VisibleBias => layer.vbias.view_mut().into_dyn(),
        })
    }

    /// Sum of squares over all entries.
    pub fn squared_norm(&self) -> f32 {
        self.layers
            .iter()
            .map(|l| {
                l.w.iter().map(|v| v * v).sum::<f32>()
                    + l.hbias.iter().map(|v| v * v).sum::<f32>()
                    + l.vbias.iter().map(|v| v * v).sum::<f32>()
            })
            .sum()
    }
}

impl Dbn {
    /// Gradient descent step: `θ -= learning_rate * grad(θ)` for every registry entry.
    ///
    /// # Errors
    /// - `DimensionMismatch` if `grads` is missing a parameter or has the wrong shape
    pub fn apply_gradients(&mut self, grads: &Gradients, learning_rate: f32) -> DbnResult<()> {
        let registry = self.params().to_vec();
        for id in &registry {
            if grads.get(*id).map(|g| g.shape() != self.param(*id).shape()).unwrap_or(true) {
                return Err(DbnError::DimensionMismatch(format!(
                    "no gradient of matching shape for {}",
                    id.name()
                )));
            }
        }
        for id in registry {
            if let Some(g) = grads.get(id) {
                self.param_mut(id).scaled_add(-learning_rate, &g);
            }
        }
        Ok(())
    }
}

/// Computes ∂loss/∂θ for every parameter on one minibatch.
pub trait GradientEngine {
    fn gradients(&self, dbn: &Dbn, batch: ArrayView2<f32>) -> DbnResult<Gradients>;

    /// Name for logging
    fn name(&self) -> &'static str;
}

/// Exact reverse-mode gradients through the encoder and decoder stacks.
#[derive(Debug, Clone, Copy, Default)]
pub struct Backprop;

impl GradientEngine for Backprop {
    fn gradients(&self, dbn: &Dbn, batch: ArrayView2<f32>) -> DbnResult<Gradients> {
        let n = dbn.n_layers();
        let act = dbn.activation();

        // Forward: enc[i] is the input of encoder i, enc[n] the top code
        let mut enc = Vec::with_capacity(n + 1);
        enc.push(batch.to_owned());
        for i in 0..n {
            let out = dbn.encoder(i).forward(enc[i].view())?;
            enc.push(out);
        }

        // dec[i] is the output of decoder i, dec[n] the top code
        let mut dec = vec![Array2::zeros((0, 0)); n + 1];
        dec[n] = enc[n].clone();
        for i in (0..n).rev() {
            dec[i] = dbn.decoder(i).forward(dec[i + 1].view())?;
        }

        let mut grads = Gradients::zeros_like(dbn);

        // ∂loss/∂x̂
        let mut upstream = (&dec[0] - &batch) * 2.0;

        // Decoder, from the reconstruction upwards
        for i in 0..n {
            let delta = &upstream * &act.derivative_from_output(&dec[i]);
            let layer = &mut grads.layers[i];
            layer.w += &delta.t().dot(&dec[i + 1]);
            layer.vbias += &delta.sum_axis(Axis(0));
            upstream = delta.dot(&dbn.rbm(i).weights());
        }

        // Encoder, from the top code downwards
        for i in (0..n).rev() {
            let delta = &upstream * &act.derivative_from_output(&enc[i + 1]);
            let layer = &mut grads.layers[i];
            layer.w += &enc[i].t().dot(&delta);
            layer.hbias += &delta.sum_axis(Axis(0));
            if i > 0 {
                upstream = delta.dot(&dbn.rbm(i).weights().t());
            }
        }

        Ok(grads)
    }

    fn name(&self) -> &'static str {
        "backprop"
    }
}

/// Central finite differences: `(L(θ + ε) - L(θ - ε)) / 2ε` per scalar.
///
/// One loss evaluation pair per parameter entry; meant for small networks
/// and for checking other engines.
#[derive(Debug, Clone, Copy)]
pub struct FiniteDifference {
    pub epsilon: f32,
}

impl Default for FiniteDifference {
    fn default() -> Self {
        Self { epsilon: 1e-2 }
    }
}

impl GradientEngine for FiniteDifference {
    fn gradients(&self, dbn: &Dbn, batch: ArrayView2<f32>) -> DbnResult<Gradients> {
        let mut probe = dbn.clone();
        let mut grads = Gradients::zeros_like(dbn);
        let eps = self.epsilon;

        for &id in dbn.params() {
            let len = dbn.param(id).len();
            for j in 0..len {
                let original = nudge(&mut probe, id, j, None);

                nudge(&mut probe, id, j, Some(original + eps));
                let plus = probe.reconstruction_loss(batch)?;
                nudge(&mut probe, id, j, Some(original - eps));
                let minus = probe.reconstruction_loss(batch)?;
                nudge(&mut probe, id, j, Some(original));

                if let Some(mut g) = grads.get_mut(id) {
                    if let Some(slot) = g.iter_mut().nth(j) {
                        *slot = (plus - minus) / (2.0 * eps);
                    }
                }
            }
        }

        Ok(grads)
    }

    fn name(&self) -> &'static str {
        "finite-difference"
    }
}

/// Read the `j`-th entry of a parameter (logical order), optionally overwriting it.
/// Returns the value before any write.
fn nudge(dbn: &mut Dbn, id: ParamId, j: usize, value: Option<f32>) -> f32 {
    let mut param = dbn.param_mut(id);
    let mut previous = 0.0;
    if let Some(slot) = param.iter_mut().nth(j) {
        previous = *slot;
        if let Some(v) = value {
            *slot = v;
        }
    }
    previous
}
