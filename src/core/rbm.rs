//! Binary-binary Restricted Boltzmann Machine trained with CD-k.
//!
//! ## Energy
//!
//! ```text
//! E(v, h) = -vᵀWh - b_vᵀv - b_hᵀh
//! F(v)    = -b_vᵀv - Σ_j softplus((vW)_j + b_h_j)
//! ```
//!
//! ## Contrastive Divergence
//!
//! For a visible batch `v0` of size B:
//! ```text
//! h0_prob = σ(v0 W + b_h),  h0 ~ Bernoulli(h0_prob)
//! repeat k times:  v ~ σ(h Wᵀ + b_v),  h ~ σ(v W + b_h)
//! ΔW   = (v0ᵀ h0_prob - v_kᵀ h_prob_k) / B
//! Δb_v = mean(v0 - v_k)
//! Δb_h = mean(h0_prob - h_prob_k)
//! ```
//! The chain restarts from the data on every batch (CD, not PCD).

use ndarray::{
    Array1, Array2, ArrayView1, ArrayView2, ArrayViewD, ArrayViewMut1, ArrayViewMut2,
    ArrayViewMutD, Axis,
};
use rand::Rng;

use super::dbn::ParamRole;
use super::{init_weights, DbnError, DbnResult};
use crate::utils::{bernoulli, sigmoid, softplus};

/// Probabilities are clamped to `[EPS, 1 - EPS]` before taking logs.
const COST_EPS: f32 = 1e-7;

/// One RBM: owns the weights and both bias vectors.
///
/// The weight matrix and hidden bias double as the parameters of the
/// encoder layer at the same depth; the visible bias doubles as the bias of
/// the mirrored decoder layer.
#[derive(Debug, Clone)]
pub struct Rbm {
    /// Weights, shape (n_visible, n_hidden)
    w: Array2<f32>,
    /// Hidden bias, shape (n_hidden)
    hbias: Array1<f32>,
    /// Visible bias, shape (n_visible)
    vbias: Array1<f32>,
}

/// CD-k gradient estimate (ascent direction), same shapes as the parameters.
#[derive(Debug, Clone)]
pub struct CdGradients {
    pub w: Array2<f32>,
    pub hbias: Array1<f32>,
    pub vbias: Array1<f32>,
}

/// One hidden -> visible -> hidden Gibbs step.
#[derive(Debug, Clone)]
pub struct GibbsStep {
    pub v_prob: Array2<f32>,
    pub v_sample: Array2<f32>,
    pub h_prob: Array2<f32>,
    pub h_sample: Array2<f32>,
}

impl Rbm {
    /// Create an RBM with sigmoid-scaled Glorot weights and zero biases.
    pub fn new<R: Rng + ?Sized>(
        n_visible: usize,
        n_hidden: usize,
        rng: &mut R,
    ) -> DbnResult<Self> {
        if n_visible == 0 || n_hidden == 0 {
            return Err(DbnError::Configuration(format!(
                "RBM dimensions must be positive, got {n_visible}x{n_hidden}"
            )));
        }
        Self::from_parts(
            init_weights(n_visible, n_hidden, 4.0, rng),
            Array1::zeros(n_hidden),
            Array1::zeros(n_visible),
        )
    }

    /// Assemble an RBM from existing parameters.
    ///
    /// # Errors
    /// - `Configuration` if either dimension is zero
    /// - `DimensionMismatch` if the biases don't match `w`
    pub fn from_parts(w: Array2<f32>, hbias: Array1<f32>, vbias: Array1<f32>) -> DbnResult<Self> {
        let (n_visible, n_hidden) = w.dim();
        if n_visible == 0 || n_hidden == 0 {
            return Err(DbnError::Configuration(format!(
                "RBM dimensions must be positive, got {n_visible}x{n_hidden}"
            )));
        }
        if hbias.len() != n_hidden || vbias.len() != n_visible {
            return Err(DbnError::DimensionMismatch(format!(
                "weights {:?} with hbias {} and vbias {}",
                w.dim(),
                hbias.len(),
                vbias.len()
            )));
        }
        Ok(Self { w, hbias, vbias })
    }

    pub fn n_visible(&self) -> usize {
        self.w.nrows()
    }

    pub fn n_hidden(&self) -> usize {
        self.w.ncols()
    }

    pub fn weights(&self) -> ArrayView2<'_, f32> {
        self.w.view()
    }

    pub fn hbias(&self) -> ArrayView1<'_, f32> {
        self.hbias.view()
    }

    pub fn vbias(&self) -> ArrayView1<'_, f32> {
        self.vbias.view()
    }

    /// Mutable access to the weights. Shape cannot change through the view.
    pub fn weights_mut(&mut self) -> ArrayViewMut2<'_, f32> {
        self.w.view_mut()
    }

    pub fn hbias_mut(&mut self) -> ArrayViewMut1<'_, f32> {
        self.hbias.view_mut()
    }

    pub fn vbias_mut(&mut self) -> ArrayViewMut1<'_, f32> {
        self.vbias.view_mut()
    }

    pub(crate) fn param(&self, role: ParamRole) -> ArrayViewD<'_, f32> {
        match role {
            ParamRole::Weights => self.w.view().into_dyn(),
            ParamRole::HiddenBias => self.hbias.view().into_dyn(),
            ParamRole::VisibleBias => self.vbias.view().into_dyn(),
        }
    }

    pub(crate) fn param_mut(&mut self, role: ParamRole) -> ArrayViewMutD<'_, f32> {
        match role {
            ParamRole::Weights => self.w.view_mut().into_dyn(),
            ParamRole::HiddenBias => self.hbias.view_mut().into_dyn(),
            ParamRole::VisibleBias => self.vbias.view_mut().into_dyn(),
        }
    }

    fn check_visible(&self, v: &ArrayView2<f32>) -> DbnResult<()> {
        if v.ncols() != self.n_visible() {
            return Err(DbnError::DimensionMismatch(format!(
                "RBM expects {} visible columns, got {}",
                self.n_visible(),
                v.ncols()
            )));
        }
        Ok(())
    }

    fn check_hidden(&self, h: &ArrayView2<f32>) -> DbnResult<()> {
        if h.ncols() != self.n_hidden() {
            return Err(DbnError::DimensionMismatch(format!(
                "RBM expects {} hidden columns, got {}",
                self.n_hidden(),
                h.ncols()
            )));
        }
        Ok(())
    }

    // σ(v W + b_h), no shape check
    fn propagate_up(&self, v: ArrayView2<f32>) -> Array2<f32> {
        let mut z = v.dot(&self.w);
        z += &self.hbias;
        z.mapv_inplace(sigmoid);
        z
    }

    // σ(h Wᵀ + b_v), no shape check
    fn propagate_down(&self, h: ArrayView2<f32>) -> Array2<f32> {
        let mut z = h.dot(&self.w.t());
        z += &self.vbias;
        z.mapv_inplace(sigmoid);
        z
    }

    /// `P(h = 1 | v)` for every row of `v`.
    pub fn hidden_probabilities(&self, v: ArrayView2<f32>) -> DbnResult<Array2<f32>> {
        self.check_visible(&v)?;
        Ok(self.propagate_up(v))
    }

    /// `P(v = 1 | h)` for every row of `h`.
    pub fn visible_probabilities(&self, h: ArrayView2<f32>) -> DbnResult<Array2<f32>> {
        self.check_hidden(&h)?;
        Ok(self.propagate_down(h))
    }

    /// Sample hidden units given visible units. Returns `(probabilities, sample)`.
    pub fn sample_hidden<R: Rng + ?Sized>(
        &self,
        v: ArrayView2<f32>,
        rng: &mut R,
    ) -> DbnResult<(Array2<f32>, Array2<f32>)> {
        let probs = self.hidden_probabilities(v)?;
        let sample = bernoulli(&probs, rng);
        Ok((probs, sample))
    }

    /// Sample visible units given hidden units. Returns `(probabilities, sample)`.
    pub fn sample_visible<R: Rng + ?Sized>(
        &self,
        h: ArrayView2<f32>,
        rng: &mut R,
    ) -> DbnResult<(Array2<f32>, Array2<f32>)> {
        let probs = self.visible_probabilities(h)?;
        let sample = bernoulli(&probs, rng);
        Ok((probs, sample))
    }

    /// One Gibbs step starting from a hidden sample.
    pub fn gibbs_hvh<R: Rng + ?Sized>(
        &self,
        h: ArrayView2<f32>,
        rng: &mut R,
    ) -> DbnResult<GibbsStep> {
        let (v_prob, v_sample) = self.sample_visible(h, rng)?;
        let (h_prob, h_sample) = self.sample_hidden(v_sample.view(), rng)?;
        Ok(GibbsStep {
            v_prob,
            v_sample,
            h_prob,
            h_sample,
        })
    }

    /// Estimate the CD-k gradient on a visible batch without touching parameters.
    ///
    /// # Errors
    /// - `InvalidConfiguration` if `k == 0`
    /// - `DimensionMismatch` if the batch is empty or has the wrong width
    pub fn contrastive_divergence<R: Rng + ?Sized>(
        &self,
        v0: ArrayView2<f32>,
        k: usize,
        rng: &mut R,
    ) -> DbnResult<CdGradients> {
        if k == 0 {
            return Err(DbnError::InvalidConfiguration(
                "CD-k requires k >= 1".to_string(),
            ));
        }
        self.check_visible(&v0)?;
        if v0.nrows() == 0 {
            return Err(DbnError::DimensionMismatch("empty batch".to_string()));
        }
        let batch_size = v0.nrows() as f32;

        // Positive phase
        let (h0_prob, h0_sample) = self.sample_hidden(v0, rng)?;

        // Negative phase: k Gibbs steps from the positive hidden sample
        let mut step = self.gibbs_hvh(h0_sample.view(), rng)?;
        for _ in 1..k {
            step = self.gibbs_hvh(step.h_sample.view(), rng)?;
        }
        let v_k = &step.v_sample;
        let h_k_prob = &step.h_prob;

        let positive = v0.t().dot(&h0_prob);
        let negative = v_k.t().dot(h_k_prob);
        let w = (positive - negative) / batch_size;
        let vbias = (&v0 - v_k).sum_axis(Axis(0)) / batch_size;
        let hbias = (&h0_prob - h_k_prob).sum_axis(Axis(0)) / batch_size;

        Ok(CdGradients { w, hbias, vbias })
    }

    /// Ascend along a CD gradient: `param += learning_rate * Δparam`.
    pub fn apply(&mut self, grads: &CdGradients, learning_rate: f32) {
        self.w.scaled_add(learning_rate, &grads.w);
        self.hbias.scaled_add(learning_rate, &grads.hbias);
        self.vbias.scaled_add(learning_rate, &grads.vbias);
    }

    /// One CD-k update on a minibatch.
    ///
    /// Returns the monitoring cost measured before the update.
    pub fn cd_step<R: Rng + ?Sized>(
        &mut self,
        v0: ArrayView2<f32>,
        learning_rate: f32,
        k: usize,
        rng: &mut R,
    ) -> DbnResult<f32> {
        let grads = self.contrastive_divergence(v0, k, rng)?;
        let cost = self.reconstruction_cost(v0)?;
        self.apply(&grads, learning_rate);
        Ok(cost)
    }

    /// Mean-field reconstruction cross-entropy, averaged over rows.
    ///
    /// ```text
    /// p    = σ(σ(v0 W + b_h) Wᵀ + b_v)
    /// cost = -mean_rows Σ_i [v0_i ln p_i + (1 - v0_i) ln(1 - p_i)]
    /// ```
    /// Only used to monitor pretraining.
    pub fn reconstruction_cost(&self, v0: ArrayView2<f32>) -> DbnResult<f32> {
        self.check_visible(&v0)?;
        if v0.nrows() == 0 {
            return Ok(0.0);
        }
        let h = self.propagate_up(v0);
        let p = self.propagate_down(h.view());
        let total: f32 = v0
            .iter()
            .zip(p.iter())
            .map(|(&x, &p)| {
                let p = p.clamp(COST_EPS, 1.0 - COST_EPS);
                -(x * p.ln() + (1.0 - x) * (1.0 - p).ln())
            })
            .sum();
        Ok(total / v0.nrows() as f32)
    }

    /// Free energy of each row of `v`.
    pub fn free_energy(&self, v: ArrayView2<f32>) -> DbnResult<Array1<f32>> {
        self.check_visible(&v)?;
        let visible_term = v.dot(&self.vbias);
        let mut wx_b = v.dot(&self.w);
        wx_b += &self.hbias;
        let hidden_term =
            wx_b.map_axis(Axis(1), |row| row.iter().map(|&x| softplus(x)).sum::<f32>());
        Ok(-visible_term - hidden_term)
    }
}
