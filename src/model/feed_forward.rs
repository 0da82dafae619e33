//! Position-wise feed-forward block, shared by both streams.

use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, LayerNorm, Linear};
use burn::prelude::*;
use burn::tensor::activation;

use super::config::LukeConfig;
use super::primitives::{init_layer_norm, init_linear};
use crate::checkpoint::ParamLoader;
use crate::error::CheckpointError;

/// Expansion to the inner width followed by GELU.
#[derive(Module, Debug)]
pub struct Intermediate<B: Backend> {
    dense: Linear<B>,
}

impl<B: Backend> Intermediate<B> {
    pub fn new(config: &LukeConfig, device: &B::Device) -> Self {
        Self {
            dense: init_linear(
                config.hidden_size,
                config.intermediate_size,
                true,
                &config.initializer(),
                device,
            ),
        }
    }

    pub fn forward(&self, hidden: Tensor<B, 3>) -> Tensor<B, 3> {
        activation::gelu(self.dense.forward(hidden))
    }

    pub fn load_named(
        mut self,
        loader: &mut ParamLoader<B>,
        prefix: &str,
    ) -> Result<Self, CheckpointError> {
        self.dense = loader.linear(&format!("{prefix}dense."), self.dense)?;
        Ok(self)
    }
}

/// Projection back to hidden width, dropout, residual, norm.
#[derive(Module, Debug)]
pub struct Output<B: Backend> {
    dense: Linear<B>,
    layer_norm: LayerNorm<B>,
    dropout: Dropout,
}

impl<B: Backend> Output<B> {
    pub fn new(config: &LukeConfig, device: &B::Device) -> Self {
        Self {
            dense: init_linear(
                config.intermediate_size,
                config.hidden_size,
                true,
                &config.initializer(),
                device,
            ),
            layer_norm: init_layer_norm(config.hidden_size, device),
            dropout: DropoutConfig::new(config.hidden_dropout_prob).init(),
        }
    }

    /// - `hidden`: [batch, seq, intermediate]
    /// - `input`: [batch, seq, hidden], the attention block output
    pub fn forward(&self, hidden: Tensor<B, 3>, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let hidden = self.dropout.forward(self.dense.forward(hidden));
        self.layer_norm.forward(hidden + input)
    }

    pub fn load_named(
        mut self,
        loader: &mut ParamLoader<B>,
        prefix: &str,
    ) -> Result<Self, CheckpointError> {
        self.dense = loader.linear(&format!("{prefix}dense."), self.dense)?;
        self.layer_norm =
            loader.layer_norm(&format!("{prefix}LayerNorm."), self.layer_norm)?;
        Ok(self)
    }
}
