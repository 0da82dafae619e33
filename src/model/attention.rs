//! Fused word/entity self-attention.
//!
//! Queries, keys and values are computed over the concatenation of both
//! streams, so every word attends to every entity and vice versa. The joint
//! context is split back at the same boundary afterwards and each stream goes
//! through the shared output projection on its own.

use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, LayerNorm, Linear};
use burn::prelude::*;
use burn::tensor::activation::softmax;

use super::config::LukeConfig;
use super::primitives::{init_layer_norm, init_linear};
use crate::checkpoint::ParamLoader;
use crate::error::CheckpointError;

// ─── Self-Attention ───────────────────────────────────────────────

/// Multi-head attention over the joint word+entity sequence.
#[derive(Module, Debug)]
pub struct SelfAttention<B: Backend> {
    query: Linear<B>,
    key: Linear<B>,
    value: Linear<B>,
    dropout: Dropout,
    num_heads: usize,
    head_size: usize,
}

impl<B: Backend> SelfAttention<B> {
    pub fn new(config: &LukeConfig, device: &B::Device) -> Self {
        let init = config.initializer();
        let h = config.hidden_size;
        Self {
            query: init_linear(h, h, true, &init, device),
            key: init_linear(h, h, true, &init, device),
            value: init_linear(h, h, true, &init, device),
            dropout: DropoutConfig::new(config.attention_probs_dropout_prob).init(),
            num_heads: config.num_attention_heads,
            head_size: config.head_size(),
        }
    }

    /// - `word`: [batch, words, hidden]
    /// - `entity`: [batch, entities, hidden], absent for word-only input
    /// - `mask`: [batch, 1, 1, words + entities], additive
    ///
    /// Returns the context of each stream, same shapes as the inputs.
    pub fn forward(
        &self,
        word: Tensor<B, 3>,
        entity: Option<Tensor<B, 3>>,
        mask: Tensor<B, 4>,
    ) -> (Tensor<B, 3>, Option<Tensor<B, 3>>) {
        let word_len = word.dims()[1];
        let hidden = match entity {
            Some(entity) => Tensor::cat(vec![word, entity], 1),
            None => word,
        };
        let [batch_size, joint_len, _] = hidden.dims();

        let query = self.split_heads(self.query.forward(hidden.clone()));
        let key = self.split_heads(self.key.forward(hidden.clone()));
        let value = self.split_heads(self.value.forward(hidden));

        // Dropout zeroes whole attended-to positions, not feature values.
        let probs = self.dropout.forward(self.attention_probs(query, key, mask));

        let context = probs
            .matmul(value) // [b, heads, joint, head_size]
            .swap_dims(1, 2)
            .reshape([batch_size, joint_len, self.num_heads * self.head_size]);

        let entity_len = joint_len - word_len;
        let word_context = context.clone().narrow(1, 0, word_len);
        let entity_context = (entity_len > 0).then(|| context.narrow(1, word_len, entity_len));
        (word_context, entity_context)
    }

    /// Scaled dot-product probabilities: softmax(q·kᵀ / sqrt(head_size) + mask).
    ///
    /// Returns: [batch, heads, query_len, key_len]
    pub fn attention_probs(
        &self,
        query: Tensor<B, 4>,
        key: Tensor<B, 4>,
        mask: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch_size, num_heads, query_len, _] = query.dims();
        let key_len = key.dims()[2];

        let scores = query
            .matmul(key.swap_dims(2, 3))
            .div_scalar((self.head_size as f64).sqrt());
        let scores = scores + mask.expand([batch_size, num_heads, query_len, key_len]);
        softmax(scores, 3)
    }

    /// [batch, seq, hidden] → [batch, heads, seq, head_size]
    pub fn split_heads(&self, x: Tensor<B, 3>) -> Tensor<B, 4> {
        let [batch_size, seq_len, _] = x.dims();
        x.reshape([batch_size, seq_len, self.num_heads, self.head_size])
            .swap_dims(1, 2)
    }

    pub fn load_named(
        mut self,
        loader: &mut ParamLoader<B>,
        prefix: &str,
    ) -> Result<Self, CheckpointError> {
        self.query = loader.linear(&format!("{prefix}query."), self.query)?;
        self.key = loader.linear(&format!("{prefix}key."), self.key)?;
        self.value = loader.linear(&format!("{prefix}value."), self.value)?;
        Ok(self)
    }
}

// ─── Self-Output ──────────────────────────────────────────────────

/// Projection + dropout + residual + norm after attention.
#[derive(Module, Debug)]
pub struct SelfOutput<B: Backend> {
    dense: Linear<B>,
    layer_norm: LayerNorm<B>,
    dropout: Dropout,
}

impl<B: Backend> SelfOutput<B> {
    pub fn new(config: &LukeConfig, device: &B::Device) -> Self {
        let h = config.hidden_size;
        Self {
            dense: init_linear(h, h, true, &config.initializer(), device),
            layer_norm: init_layer_norm(h, device),
            dropout: DropoutConfig::new(config.hidden_dropout_prob).init(),
        }
    }

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

// ─── Attention Block ──────────────────────────────────────────────

/// Fused attention followed by the per-stream output projection.
#[derive(Module, Debug)]
pub struct Attention<B: Backend> {
    pub self_attention: SelfAttention<B>,
    pub output: SelfOutput<B>,
}

impl<B: Backend> Attention<B> {
    pub fn new(config: &LukeConfig, device: &B::Device) -> Self {
        Self {
            self_attention: SelfAttention::new(config, device),
            output: SelfOutput::new(config, device),
        }
    }

    pub fn forward(
        &self,
        word: Tensor<B, 3>,
        entity: Option<Tensor<B, 3>>,
        mask: Tensor<B, 4>,
    ) -> (Tensor<B, 3>, Option<Tensor<B, 3>>) {
        let (word_context, entity_context) =
            self.self_attention
                .forward(word.clone(), entity.clone(), mask);

        let word_out = self.output.forward(word_context, word);
        let entity_out = match (entity_context, entity) {
            (Some(context), Some(input)) => Some(self.output.forward(context, input)),
            _ => None,
        };
        (word_out, entity_out)
    }

    pub fn load_named(
        mut self,
        loader: &mut ParamLoader<B>,
        prefix: &str,
    ) -> Result<Self, CheckpointError> {
        self.self_attention = self
            .self_attention
            .load_named(loader, &format!("{prefix}self."))?;
        self.output = self.output.load_named(loader, &format!("{prefix}output."))?;
        Ok(self)
    }
}
