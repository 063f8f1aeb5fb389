//! SafeTensors checkpoints of named module parameters

use crate::autograd::Tensor;
use crate::error::{Error, Result};
use crate::nn::Module;
use safetensors::tensor::{Dtype, TensorView};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Training state stored alongside the weights
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckpointMeta {
    /// Fraction of the scheduled steps completed, in `[0, 1]`
    pub progress: f32,
    /// Running accuracy when the checkpoint was taken
    pub accuracy: f32,
    /// Optimizer steps taken
    pub step: usize,
}

impl CheckpointMeta {
    fn to_map(self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("progress".to_string(), format!("{:.6}", self.progress));
        map.insert("accuracy".to_string(), format!("{:.6}", self.accuracy));
        map.insert("step".to_string(), self.step.to_string());
        map
    }

    fn from_map(map: &HashMap<String, String>) -> Result<Self> {
        fn field<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str) -> Result<T> {
            map.get(key)
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| {
                    Error::Checkpoint(format!("metadata field '{key}' missing or invalid"))
                })
        }
        Ok(Self {
            progress: field(map, "progress")?,
            accuracy: field(map, "accuracy")?,
            step: field(map, "step")?,
        })
    }
}

/// `model-<progress>-<accuracy>.safetensors`
pub fn checkpoint_name(meta: &CheckpointMeta) -> String {
    format!("model-{:.4}-{:.4}.safetensors", meta.progress, meta.accuracy)
}

/// Serialize every named tensor of `module` with `meta` as header metadata
pub fn to_bytes(module: &dyn Module, meta: &CheckpointMeta) -> Result<Vec<u8>> {
    let tensor_data: Vec<(String, Vec<u8>, Vec<usize>)> = module
        .named_parameters()
        .into_iter()
        .map(|(name, tensor)| {
            let bytes: Vec<u8> = bytemuck::cast_slice(tensor.as_slice()).to_vec();
            (name, bytes, tensor.shape().to_vec())
        })
        .collect();

    let views = tensor_data
        .iter()
        .map(|(name, bytes, shape)| {
            TensorView::new(Dtype::F32, shape.clone(), bytes)
                .map(|view| (name.as_str(), view))
                .map_err(|e| Error::Serialization(format!("tensor '{name}': {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    safetensors::serialize(views, Some(meta.to_map()))
        .map_err(|e| Error::Serialization(format!("SafeTensors serialization failed: {e}")))
}

/// Decode a checkpoint into named tensors and its metadata
pub fn from_bytes(data: &[u8]) -> Result<(HashMap<String, Tensor>, CheckpointMeta)> {
    let (_, header) = safetensors::SafeTensors::read_metadata(data)
        .map_err(|e| Error::Checkpoint(format!("SafeTensors parsing failed: {e}")))?;
    let meta = header
        .metadata()
        .as_ref()
        .ok_or_else(|| Error::Checkpoint("no training metadata".into()))
        .and_then(CheckpointMeta::from_map)?;

    let safetensors = safetensors::SafeTensors::deserialize(data)
        .map_err(|e| Error::Checkpoint(format!("SafeTensors parsing failed: {e}")))?;

    let mut tensors = HashMap::new();
    for (name, view) in safetensors.tensors() {
        if view.dtype() != Dtype::F32 {
            return Err(Error::Checkpoint(format!(
                "tensor '{name}' is {:?}, expected F32",
                view.dtype()
            )));
        }
        // The payload is not guaranteed to be 4-byte aligned
        let values: Vec<f32> = view
            .data()
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let tensor = Tensor::from_shape_vec(view.shape(), values, false)?;
        tensors.insert(name, tensor);
    }
    Ok((tensors, meta))
}

/// Write `module` into `dir` under [`checkpoint_name`].
///
/// The file is written next to its destination and renamed into place, so
/// readers never observe a partial checkpoint.
pub fn save_checkpoint(module: &dyn Module, dir: &Path, meta: &CheckpointMeta) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let bytes = to_bytes(module, meta)?;

    let path = dir.join(checkpoint_name(meta));
    let partial = path.with_extension("safetensors.partial");
    std::fs::write(&partial, bytes)?;
    std::fs::rename(&partial, &path)?;
    Ok(path)
}

/// Load a checkpoint into `module`; nothing is modified on failure
pub fn load_checkpoint(module: &mut dyn Module, path: &Path) -> Result<CheckpointMeta> {
    let data = std::fs::read(path)
        .map_err(|e| Error::Checkpoint(format!("cannot read {}: {e}", path.display())))?;
    let (tensors, meta) = from_bytes(&data)?;
    module.load_parameters(&tensors)?;
    Ok(meta)
}

/// Keeps only checkpoints that strictly improve on the best accuracy so far
#[derive(Debug, Clone)]
pub struct BestCheckpoint {
    dir: PathBuf,
    best: Option<f32>,
}

impl BestCheckpoint {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), best: None }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn best_accuracy(&self) -> Option<f32> {
        self.best
    }

    /// Save when `meta.accuracy` beats the best so far.
    ///
    /// Write failures are logged and leave the best accuracy unchanged, so the
    /// next improvement retries.
    pub fn offer(&mut self, module: &dyn Module, meta: &CheckpointMeta) -> Option<PathBuf> {
        if self.best.is_some_and(|best| meta.accuracy <= best) || !meta.accuracy.is_finite() {
            return None;
        }
        match save_checkpoint(module, &self.dir, meta) {
            Ok(path) => {
                tracing::info!(
                    path = %path.display(),
                    accuracy = meta.accuracy,
                    step = meta.step,
                    "saved checkpoint"
                );
                self.best = Some(meta.accuracy);
                Some(path)
            }
            Err(e) => {
                tracing::error!(error = %e, dir = %self.dir.display(), "checkpoint write failed");
                None
            }
        }
    }
}
