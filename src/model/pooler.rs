//! Summary vector for sentence-level tasks, taken from the first word position.

use burn::module::Module;
use burn::nn::Linear;
use burn::prelude::*;

use super::config::LukeConfig;
use super::primitives::init_linear;
use crate::checkpoint::ParamLoader;
use crate::error::CheckpointError;

/// Summary-token projection: dense + tanh over the first word position.
#[derive(Module, Debug)]
pub struct Pooler<B: Backend> {
    dense: Linear<B>,
}

impl<B: Backend> Pooler<B> {
    pub fn new(config: &LukeConfig, device: &B::Device) -> Self {
        let h = config.hidden_size;
        Self {
            dense: init_linear(h, h, true, &config.initializer(), device),
        }
    }

    /// [batch, words, hidden] → [batch, hidden], values in [-1, 1]
    pub fn forward(&self, word: Tensor<B, 3>) -> Tensor<B, 2> {
        let first: Tensor<B, 2> = word.narrow(1, 0, 1).squeeze_dim::<2>(1);
        self.dense.forward(first).tanh()
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
