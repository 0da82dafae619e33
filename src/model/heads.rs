//! Pretraining prediction heads.
//!
//! The vocabulary decoders own no weight matrix: they multiply by the input
//! embedding table passed in by the caller, so one parameter serves both the
//! lookup and the decoder and receives a single gradient. Only the output
//! bias belongs to the head.

use burn::module::{Module, Param};
use burn::nn::{Initializer, LayerNorm, Linear};
use burn::prelude::*;
use burn::tensor::activation;

use super::config::LukeConfig;
use super::primitives::{init_layer_norm, init_linear};
use crate::checkpoint::ParamLoader;
use crate::error::CheckpointError;

/// Number of next-sentence classes (is-next / random).
pub const NSP_CLASSES: usize = 2;

// ─── Transform ────────────────────────────────────────────────────

/// Dense + GELU + LayerNorm ahead of a vocabulary decoder.
#[derive(Module, Debug)]
pub struct PredictionHeadTransform<B: Backend> {
    dense: Linear<B>,
    layer_norm: LayerNorm<B>,
}

impl<B: Backend> PredictionHeadTransform<B> {
    /// `out_size` defaults to the hidden width.
    pub fn new(config: &LukeConfig, out_size: Option<usize>, device: &B::Device) -> Self {
        let out_size = out_size.unwrap_or(config.hidden_size);
        Self {
            dense: init_linear(
                config.hidden_size,
                out_size,
                true,
                &config.initializer(),
                device,
            ),
            layer_norm: init_layer_norm(out_size, device),
        }
    }

    pub fn forward(&self, hidden: Tensor<B, 2>) -> Tensor<B, 2> {
        self.layer_norm.forward(activation::gelu(self.dense.forward(hidden)))
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

// ─── Tied Vocabulary Head ─────────────────────────────────────────

/// Transform, then logits against a tied embedding table plus an own bias.
///
/// Used for both masked words and masked entities; the two differ only in
/// the transform's output width and in which table they are handed.
#[derive(Module, Debug)]
pub struct TiedPredictionHead<B: Backend> {
    pub transform: PredictionHeadTransform<B>,
    pub bias: Param<Tensor<B, 1>>,
}

/// Masked-word head, decoding against the word embedding table.
pub type LmPredictionHead<B> = TiedPredictionHead<B>;

/// Masked-entity head, decoding against the entity embedding table.
pub type EntityPredictionHead<B> = TiedPredictionHead<B>;

impl<B: Backend> TiedPredictionHead<B> {
    /// Head decoding against the word embedding table.
    pub fn for_words(config: &LukeConfig, device: &B::Device) -> Self {
        Self {
            transform: PredictionHeadTransform::new(config, None, device),
            bias: Initializer::Zeros.init([config.vocab_size], device),
        }
    }

    /// Head decoding against the entity embedding table (width `entity_emb_size`).
    pub fn for_entities(config: &LukeConfig, device: &B::Device) -> Self {
        Self {
            transform: PredictionHeadTransform::new(config, Some(config.entity_emb_size), device),
            bias: Initializer::Zeros.init([config.entity_vocab_size], device),
        }
    }

    /// - `hidden`: [n, hidden]
    /// - `embedding_weight`: [vocab, width], the tied input table
    ///
    /// Returns: [n, vocab]
    pub fn forward(&self, hidden: Tensor<B, 2>, embedding_weight: Tensor<B, 2>) -> Tensor<B, 2> {
        let transformed = self.transform.forward(hidden);
        transformed.matmul(embedding_weight.transpose()) + self.bias.val().unsqueeze()
    }

    pub fn load_named(
        mut self,
        loader: &mut ParamLoader<B>,
        prefix: &str,
    ) -> Result<Self, CheckpointError> {
        self.transform = self
            .transform
            .load_named(loader, &format!("{prefix}transform."))?;
        self.bias = loader.param(&format!("{prefix}bias"), self.bias)?;
        loader.alias(&format!("{prefix}decoder.weight"));
        Ok(self)
    }
}

// ─── Word Heads ───────────────────────────────────────────────────

/// Masked-word head plus the next-sentence classifier over the pooled output.
#[derive(Module, Debug)]
pub struct PreTrainingHeads<B: Backend> {
    pub predictions: LmPredictionHead<B>,
    pub seq_relationship: Linear<B>,
}

impl<B: Backend> PreTrainingHeads<B> {
    pub fn new(config: &LukeConfig, device: &B::Device) -> Self {
        Self {
            predictions: TiedPredictionHead::for_words(config, device),
            seq_relationship: init_linear(
                config.hidden_size,
                NSP_CLASSES,
                true,
                &config.initializer(),
                device,
            ),
        }
    }

    pub fn load_named(
        mut self,
        loader: &mut ParamLoader<B>,
        prefix: &str,
    ) -> Result<Self, CheckpointError> {
        self.predictions = self
            .predictions
            .load_named(loader, &format!("{prefix}predictions."))?;
        self.seq_relationship =
            loader.linear(&format!("{prefix}seq_relationship."), self.seq_relationship)?;
        Ok(self)
    }
}
