//! Loading parameters from a flat map of dotted names.
//!
//! External checkpoints address parameters by path
//! (`encoder.layer.3.attention.self.query.weight`) and store linear weights
//! as `(out, in)`. Every module walks its own subtree through a
//! [`ParamLoader`], which consumes matching entries and records the paths it
//! could not find. Whatever is left over afterwards is unexpected.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use burn::module::Param;
use burn::nn::{Embedding, LayerNorm, Linear};
use burn::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CheckpointError;

/// One tensor of an external checkpoint, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedTensor {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl NamedTensor {
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Self {
        Self { shape, values }
    }

    /// Tensor filled with one value.
    pub fn full(shape: Vec<usize>, value: f32) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            values: vec![value; len],
        }
    }
}

/// Flat mapping from dotted parameter path to tensor.
pub type Checkpoint = BTreeMap<String, NamedTensor>;

/// Translate a legacy parameter name to the model's naming scheme:
/// `gamma`/`beta` become `weight`/`bias` and a leading `bert.` is dropped.
pub fn translate_key(key: &str) -> String {
    let renamed = key.replace("gamma", "weight").replace("beta", "bias");
    match renamed.strip_prefix("bert.") {
        Some(stripped) => stripped.to_string(),
        None => renamed,
    }
}

/// Keys that did not line up between checkpoint and model. Neither list is fatal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    /// Model parameters absent from the checkpoint; left at their initial values.
    pub missing: Vec<String>,
    /// Checkpoint entries no parameter consumed.
    pub unexpected: Vec<String>,
}

/// Walks a module tree, replacing parameters with checkpoint entries by path.
pub struct ParamLoader<B: Backend> {
    tensors: Checkpoint,
    missing: Vec<String>,
    _backend: PhantomData<B>,
}

impl<B: Backend> ParamLoader<B> {
    /// Wrap a checkpoint, translating its keys first.
    pub fn new(checkpoint: Checkpoint) -> Self {
        let tensors = checkpoint
            .into_iter()
            .map(|(key, tensor)| (translate_key(&key), tensor))
            .collect();
        Self {
            tensors,
            missing: Vec::new(),
            _backend: PhantomData,
        }
    }

    /// Replace `param` with the entry at `path`, if any.
    pub fn param<const D: usize>(
        &mut self,
        path: &str,
        param: Param<Tensor<B, D>>,
    ) -> Result<Param<Tensor<B, D>>, CheckpointError> {
        self.replace(path, param, false)
    }

    /// Load a linear layer, transposing its weight from `(out, in)`.
    pub fn linear(&mut self, prefix: &str, mut linear: Linear<B>) -> Result<Linear<B>, CheckpointError> {
        linear.weight = self.replace(&format!("{prefix}weight"), linear.weight, true)?;
        linear.bias = match linear.bias {
            Some(bias) => Some(self.param(&format!("{prefix}bias"), bias)?),
            None => None,
        };
        Ok(linear)
    }

    pub fn embedding(
        &mut self,
        prefix: &str,
        mut embedding: Embedding<B>,
    ) -> Result<Embedding<B>, CheckpointError> {
        embedding.weight = self.param(&format!("{prefix}weight"), embedding.weight)?;
        Ok(embedding)
    }

    /// Load a layer norm stored as `weight`/`bias` into burn's `gamma`/`beta`.
    pub fn layer_norm(
        &mut self,
        prefix: &str,
        mut norm: LayerNorm<B>,
    ) -> Result<LayerNorm<B>, CheckpointError> {
        norm.gamma = self.param(&format!("{prefix}weight"), norm.gamma)?;
        norm.beta = match norm.beta {
            Some(beta) => Some(self.param(&format!("{prefix}bias"), beta)?),
            None => None,
        };
        Ok(norm)
    }

    /// Consume an entry that names a parameter already loaded under another
    /// path (a tied decoder weight). It is neither applied nor unexpected.
    pub fn alias(&mut self, path: &str) {
        if self.tensors.remove(path).is_some() {
            debug!("skipping tied parameter '{}'", path);
        }
    }

    /// Finish loading; everything left in the checkpoint is unexpected.
    pub fn finish(self, model_name: &str) -> LoadReport {
        let mut missing = self.missing;
        missing.sort();
        let unexpected: Vec<String> = self.tensors.into_keys().collect();

        if !unexpected.is_empty() {
            info!(
                "Weights from pretrained model not used in {}: {:?}",
                model_name, unexpected
            );
        }
        if !missing.is_empty() {
            debug!(
                "Weights of {} not initialized from pretrained model: {:?}",
                model_name, missing
            );
        }

        LoadReport {
            missing,
            unexpected,
        }
    }

    fn replace<const D: usize>(
        &mut self,
        path: &str,
        param: Param<Tensor<B, D>>,
        transpose: bool,
    ) -> Result<Param<Tensor<B, D>>, CheckpointError> {
        let Some(named) = self.tensors.remove(path) else {
            self.missing.push(path.to_string());
            return Ok(param);
        };

        let expected = param.dims().to_vec();
        if named.shape.len() != D {
            return Err(CheckpointError::shape_mismatch(path, &expected, &named.shape));
        }
        let found = named.shape.clone();
        let len: usize = found.iter().product();
        if named.values.len() != len {
            return Err(CheckpointError::Malformed {
                path: path.to_string(),
                shape: found,
                values: named.values.len(),
            });
        }

        let device = param.device();
        let tensor = Tensor::<B, D>::from_data(TensorData::new(named.values, named.shape), &device);
        let tensor = if transpose { tensor.transpose() } else { tensor };
        if tensor.dims().as_slice() != expected.as_slice() {
            return Err(CheckpointError::shape_mismatch(path, &expected, &found));
        }

        Ok(param.map(|old| {
            if old.is_require_grad() {
                tensor.require_grad()
            } else {
                tensor
            }
        }))
    }
}
