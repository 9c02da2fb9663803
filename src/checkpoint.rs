//! Checkpoint save/load for DBNs.
//!
//! Serializes every registry tensor under its stable name (`layer0.W`,
//! `layer0.hbias`, `layer0.vbias`, ...) together with the architecture needed
//! to rebuild the encoder/decoder views. The `Box<dyn Activation>` field
//! cannot be serialized directly, so we store the activation name and
//! reconstruct on load.

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::core::{activation_from_name, Dbn, DbnError, DbnResult, ParamId, ParamRole, Rbm};

/// How far training had progressed when a checkpoint was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initialized,
    Pretrained,
    Finetuned,
}

/// A dense tensor in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Serializable checkpoint data.
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckpointData {
    /// Visible-layer width.
    pub n_ins: usize,
    pub hidden_layer_sizes: Vec<usize>,
    /// Name of the activation function ("sigmoid" or "identity").
    pub activation_name: String,
    /// Parameter tensors keyed by `ParamId::name`.
    pub tensors: BTreeMap<String, StoredTensor>,
    pub stage: Stage,
    /// Best finetuning validation loss, if finetuning ran.
    #[serde(default)]
    pub best_validation_loss: Option<f32>,
}

impl CheckpointData {
    /// Snapshot the current parameters of `dbn`.
    pub fn from_dbn(dbn: &Dbn, stage: Stage, best_validation_loss: Option<f32>) -> Self {
        let tensors = dbn
            .params()
            .iter()
            .map(|&id| {
                let view = dbn.param(id);
                let tensor = StoredTensor {
                    shape: view.shape().to_vec(),
                    data: view.iter().copied().collect(),
                };
                (id.name(), tensor)
            })
            .collect();

        Self {
            n_ins: dbn.n_ins(),
            hidden_layer_sizes: dbn.hidden_layer_sizes().to_vec(),
            activation_name: dbn.activation().name().to_string(),
            tensors,
            stage,
            best_validation_loss,
        }
    }

    fn tensor(&self, layer: usize, role: ParamRole) -> DbnResult<&StoredTensor> {
        let name = ParamId { layer, role }.name();
        self.tensors
            .get(&name)
            .ok_or_else(|| DbnError::Checkpoint(format!("missing tensor {name}")))
    }

    /// Rebuild the network described by this checkpoint.
    ///
    /// # Errors
    /// - `Checkpoint` for missing, unknown or misshapen tensors
    /// - `Configuration` for an invalid architecture or activation name
    pub fn to_dbn(&self) -> DbnResult<Dbn> {
        let activation = activation_from_name(&self.activation_name)?;

        for name in self.tensors.keys() {
            match ParamId::parse(name) {
                Some(id) if id.layer < self.hidden_layer_sizes.len() => {}
                _ => return Err(DbnError::Checkpoint(format!("unexpected tensor {name}"))),
            }
        }

        let mut rbms = Vec::with_capacity(self.hidden_layer_sizes.len());
        let mut n_in = self.n_ins;
        for (layer, &n_out) in self.hidden_layer_sizes.iter().enumerate() {
            let w = to_array2(self.tensor(layer, ParamRole::Weights)?, (n_in, n_out))?;
            let hbias = to_array1(self.tensor(layer, ParamRole::HiddenBias)?, n_out)?;
            let vbias = to_array1(self.tensor(layer, ParamRole::VisibleBias)?, n_in)?;
            rbms.push(Rbm::from_parts(w, hbias, vbias)?);
            n_in = n_out;
        }

        Dbn::from_rbms(self.n_ins, rbms, activation)
    }
}

fn to_array2(tensor: &StoredTensor, expected: (usize, usize)) -> DbnResult<Array2<f32>> {
    if tensor.shape != [expected.0, expected.1] {
        return Err(DbnError::Checkpoint(format!(
            "expected matrix of shape {expected:?}, found {:?}",
            tensor.shape
        )));
    }
    Array2::from_shape_vec(expected, tensor.data.clone())
        .map_err(|e| DbnError::Checkpoint(format!("failed to reconstruct matrix: {e}")))
}

fn to_array1(tensor: &StoredTensor, expected: usize) -> DbnResult<Array1<f32>> {
    if tensor.shape != [expected] || tensor.data.len() != expected {
        return Err(DbnError::Checkpoint(format!(
            "expected vector of length {expected}, found shape {:?}",
            tensor.shape
        )));
    }
    Ok(Array1::from(tensor.data.clone()))
}

/// Save a DBN checkpoint to a JSON file, creating parent directories.
///
/// # Errors
///
/// Returns an error if the file cannot be written or the data cannot be serialized.
pub fn save_checkpoint(
    dbn: &Dbn,
    path: &Path,
    stage: Stage,
    best_validation_loss: Option<f32>,
) -> DbnResult<()> {
    let data = CheckpointData::from_dbn(dbn, stage, best_validation_loss);
    let json = serde_json::to_string_pretty(&data)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, json)?;
    Ok(())
}

/// Load a DBN checkpoint from a JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or the network cannot be reconstructed.
pub fn load_checkpoint(path: &Path) -> DbnResult<(CheckpointData, Dbn)> {
    let json = std::fs::read_to_string(path)?;
    let data: CheckpointData = serde_json::from_str(&json)?;
    let dbn = data.to_dbn()?;
    Ok((data, dbn))
}
