//! Training loops: layer-wise pretraining, finetuning, early stopping.
//!
//! ## Minibatches
//!
//! A dataset of `n` rows is cut into `n / batch_size` contiguous minibatches;
//! the trailing `n % batch_size` rows are never visited.
//!
//! ## Early stopping
//!
//! ```text
//! patience              = 4 * n_batches
//! validation_frequency  = min(n_batches, patience / 2)
//! on a new best loss:     if loss < best * 0.995 { patience = max(patience, iter * 4) }
//! stop when               patience <= iter
//! ```

use log::{debug, info, warn};
use ndarray::{s, Array2, ArrayView2};
use rand::Rng;

use crate::core::{Dbn, DbnError, DbnResult};
use crate::grad::GradientEngine;
use crate::{FinetuneConfig, PretrainConfig};

/// Number of whole minibatches in a dataset of `n_examples` rows.
pub fn n_batches(n_examples: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        0
    } else {
        n_examples / batch_size
    }
}

/// Split `data` into contiguous minibatches of exactly `batch_size` rows.
///
/// # Errors
/// - `DimensionMismatch` if `data` doesn't have `width` columns, if
///   `batch_size` is 0, or if there is not a single whole minibatch
pub fn partition(
    data: ArrayView2<'_, f32>,
    batch_size: usize,
    width: usize,
) -> DbnResult<Vec<ArrayView2<'_, f32>>> {
    if data.ncols() != width {
        return Err(DbnError::DimensionMismatch(format!(
            "dataset has {} columns, network expects {width}",
            data.ncols()
        )));
    }
    if batch_size == 0 {
        return Err(DbnError::DimensionMismatch(
            "batch_size must be positive".to_string(),
        ));
    }
    let count = n_batches(data.nrows(), batch_size);
    if count == 0 {
        return Err(DbnError::DimensionMismatch(format!(
            "{} examples do not fill a single batch of {batch_size}",
            data.nrows()
        )));
    }
    Ok((0..count)
        .map(|i| data.slice_move(s![i * batch_size..(i + 1) * batch_size, ..]))
        .collect())
}

/// Mean of the per-batch reconstruction loss.
pub fn mean_reconstruction_loss(dbn: &Dbn, batches: &[ArrayView2<f32>]) -> DbnResult<f32> {
    if batches.is_empty() {
        return Ok(0.0);
    }
    let mut total = 0.0f32;
    for batch in batches {
        total += dbn.reconstruction_loss(*batch)?;
    }
    Ok(total / batches.len() as f32)
}

/// Pretraining costs for one RBM.
#[derive(Debug, Clone)]
pub struct LayerReport {
    pub layer: usize,
    /// Mean monitoring cost per epoch
    pub epoch_costs: Vec<f32>,
}

/// Outcome of [`pretrain`].
#[derive(Debug, Clone)]
pub struct PretrainReport {
    pub n_batches: usize,
    pub layers: Vec<LayerReport>,
}

/// Greedy layer-wise CD-k pretraining.
///
/// RBM `i` is trained for `config.epochs` epochs on the output of encoder
/// layers `0..i`, and only then does layer `i + 1` start. Lower layers are
/// frozen while a layer trains, so its inputs are computed once per layer.
///
/// # Errors
/// - `InvalidConfiguration` if `config.k == 0`
/// - `DimensionMismatch` for a dataset of the wrong width or too few rows
pub fn pretrain<R: Rng + ?Sized>(
    dbn: &mut Dbn,
    data: ArrayView2<f32>,
    config: &PretrainConfig,
    rng: &mut R,
) -> DbnResult<PretrainReport> {
    if config.k == 0 {
        return Err(DbnError::InvalidConfiguration(
            "CD-k requires k >= 1".to_string(),
        ));
    }
    let batches = partition(data, config.batch_size, dbn.n_ins())?;
    info!(
        "Pretraining {} layers with CD-{} over {} batches of {}",
        dbn.n_layers(),
        config.k,
        batches.len(),
        config.batch_size
    );

    let mut layers = Vec::with_capacity(dbn.n_layers());
    for layer in 0..dbn.n_layers() {
        let inputs: Vec<Array2<f32>> = batches
            .iter()
            .map(|batch| dbn.layer_input(*batch, layer))
            .collect::<DbnResult<_>>()?;
        debug!(
            "Layer {layer}: {} visible -> {} hidden",
            dbn.rbm(layer).n_visible(),
            dbn.rbm(layer).n_hidden()
        );

        let mut epoch_costs = Vec::with_capacity(config.epochs);
        for epoch in 0..config.epochs {
            let mut total = 0.0f32;
            for input in &inputs {
                total += dbn
                    .rbm_mut(layer)
                    .cd_step(input.view(), config.learning_rate, config.k, rng)?;
            }
            let mean = total / inputs.len() as f32;
            info!("Pre-training layer {layer}, epoch {epoch}, cost {mean:.6}");
            epoch_costs.push(mean);
        }
        layers.push(LayerReport { layer, epoch_costs });
    }

    Ok(PretrainReport {
        n_batches: batches.len(),
        layers,
    })
}

/// Patience-based early stopping.
///
/// Feed it the iteration index after each minibatch; it says when to
/// validate and when to stop.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    pub patience: usize,
    pub patience_increase: usize,
    pub improvement_threshold: f32,
    pub validation_frequency: usize,
    best_loss: f32,
    best_iter: Option<usize>,
}

impl EarlyStopping {
    pub fn new(n_batches: usize) -> Self {
        let patience = 4 * n_batches;
        Self {
            patience,
            patience_increase: 4,
            improvement_threshold: 0.995,
            validation_frequency: n_batches.min(patience / 2).max(1),
            best_loss: f32::INFINITY,
            best_iter: None,
        }
    }

    pub fn should_validate(&self, iter: usize) -> bool {
        (iter + 1) % self.validation_frequency == 0
    }

    /// Record a validation loss. Returns true when it is a new best.
    pub fn record(&mut self, iter: usize, loss: f32) -> bool {
        if loss < self.best_loss {
            if loss < self.best_loss * self.improvement_threshold {
                self.patience = self.patience.max(iter * self.patience_increase);
            }
            self.best_loss = loss;
            self.best_iter = Some(iter);
            true
        } else {
            false
        }
    }

    pub fn should_stop(&self, iter: usize) -> bool {
        self.patience <= iter
    }

    pub fn best_loss(&self) -> f32 {
        self.best_loss
    }

    pub fn best_iter(&self) -> Option<usize> {
        self.best_iter
    }
}

/// One validation check during finetuning.
#[derive(Debug, Clone, Copy)]
pub struct ValidationCheck {
    pub epoch: usize,
    /// 1-based minibatch index within the epoch
    pub minibatch: usize,
    pub iteration: usize,
    pub loss: f32,
}

/// Outcome of [`finetune`].
#[derive(Debug, Clone)]
pub struct FinetuneReport {
    /// Best mean validation loss (infinite if never validated)
    pub best_loss: f32,
    pub best_iter: Option<usize>,
    /// Last iteration run
    pub last_iter: usize,
    pub epochs_run: usize,
    /// True when patience ran out before `epochs`
    pub early_stopped: bool,
    pub history: Vec<ValidationCheck>,
}

/// Finetune all parameters jointly on the reconstruction loss.
///
/// `validation` of `None` reuses the training partition as the validation
/// signal. Parameters are left wherever the loop ended, not rolled back to
/// the best iteration.
///
/// # Errors
/// - `DimensionMismatch` for datasets of the wrong width or too few rows
/// - `Divergence` if `config.check_divergence` and a parameter stops being finite
pub fn finetune<'a, E: GradientEngine + ?Sized>(
    dbn: &mut Dbn,
    train: ArrayView2<'a, f32>,
    validation: Option<ArrayView2<'a, f32>>,
    config: &FinetuneConfig,
    engine: &E,
) -> DbnResult<FinetuneReport> {
    let batches = partition(train, config.batch_size, dbn.n_ins())?;
    let validation_batches = match validation {
        Some(data) => partition(data, config.batch_size, dbn.n_ins())?,
        None => batches.clone(),
    };
    let n_batches = batches.len();
    let mut stopper = EarlyStopping::new(n_batches);
    info!(
        "Finetuning with {} gradients: {} batches, patience {}, validating every {}",
        engine.name(),
        n_batches,
        stopper.patience,
        stopper.validation_frequency
    );

    let mut history = Vec::new();
    let mut epoch = 0;
    let mut last_iter = 0;
    let mut early_stopped = false;

    'epochs: while epoch < config.epochs {
        epoch += 1;
        for (minibatch_index, batch) in batches.iter().enumerate() {
            let iter = (epoch - 1) * n_batches + minibatch_index;
            last_iter = iter;

            let grads = engine.gradients(dbn, *batch)?;
            dbn.apply_gradients(&grads, config.learning_rate)?;

            if config.check_divergence {
                if let Some(id) = dbn.first_non_finite() {
                    warn!("Non-finite values in {} at iteration {iter}", id.name());
                    return Err(DbnError::Divergence {
                        iteration: iter,
                        param: id.name(),
                    });
                }
            }

            if stopper.should_validate(iter) {
                let loss = mean_reconstruction_loss(dbn, &validation_batches)?;
                info!(
                    "epoch {epoch}, minibatch {}/{n_batches}, validation error {loss:.6}",
                    minibatch_index + 1
                );
                history.push(ValidationCheck {
                    epoch,
                    minibatch: minibatch_index + 1,
                    iteration: iter,
                    loss,
                });
                if stopper.record(iter, loss) {
                    debug!("New best at iteration {iter}, patience {}", stopper.patience);
                }
            }

            if stopper.should_stop(iter) {
                early_stopped = true;
                break 'epochs;
            }
        }
    }

    if early_stopped {
        info!("Patience exhausted at iteration {last_iter}");
    }
    info!(
        "Optimization complete with best validation score of {:.6}, obtained at iteration {}",
        stopper.best_loss(),
        stopper.best_iter().map_or(0, |i| i + 1)
    );

    Ok(FinetuneReport {
        best_loss: stopper.best_loss(),
        best_iter: stopper.best_iter(),
        last_iter,
        epochs_run: epoch,
        early_stopped,
        history,
    })
}
