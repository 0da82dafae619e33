//! Base encoder: embeddings → fused-attention encoder → pooler.

use burn::module::Module;
use burn::prelude::*;

use super::config::LukeConfig;
use super::embeddings::{EntityEmbeddings, WordEmbeddings};
use super::encoder::{EncodedLayer, Encoder};
use super::pooler::Pooler;
use crate::checkpoint::{Checkpoint, LoadReport, ParamLoader};
use crate::error::{CheckpointError, ConfigError};

/// Additive bias for key positions whose attention mask is 0.
///
/// Finite rather than -inf so a row with every key masked stays free of NaN;
/// kept at this exact value for compatibility with pretrained weights.
pub const MASK_PENALTY: f64 = -10000.0;

/// Word-stream inputs.
#[derive(Debug, Clone)]
pub struct WordInput<B: Backend> {
    /// [batch, words]
    pub ids: Tensor<B, 2, Int>,
    /// [batch, words]; all zeros when absent.
    pub segment_ids: Option<Tensor<B, 2, Int>>,
    /// [batch, words], 1 = attend, 0 = ignore.
    pub attention_mask: Tensor<B, 2, Int>,
}

/// Entity-stream inputs.
#[derive(Debug, Clone)]
pub struct EntityInput<B: Backend> {
    /// [batch, entities]
    pub ids: Tensor<B, 2, Int>,
    /// [batch, entities, slots]: word indices, `-1` for unused slots.
    pub position_ids: Tensor<B, 3, Int>,
    /// [batch, entities]; all zeros when absent.
    pub segment_ids: Option<Tensor<B, 2, Int>>,
    /// [batch, entities], 1 = attend, 0 = ignore.
    pub attention_mask: Tensor<B, 2, Int>,
}

/// One batch for the encoder. The entity stream may be absent.
#[derive(Debug, Clone)]
pub struct LukeInput<B: Backend> {
    pub words: WordInput<B>,
    pub entities: Option<EntityInput<B>>,
}

/// Encoder states and the pooled summary.
#[derive(Debug, Clone)]
pub struct LukeOutput<B: Backend> {
    /// Every layer's states, or only the last one's.
    pub encoded_layers: Vec<EncodedLayer<B>>,
    /// [batch, hidden]
    pub pooled_output: Tensor<B, 2>,
}

impl<B: Backend> LukeOutput<B> {
    /// States of the final layer.
    pub fn last_layer(&self) -> &EncodedLayer<B> {
        // Encoder::forward always yields at least one entry per layer run.
        &self.encoded_layers[self.encoded_layers.len() - 1]
    }
}

#[derive(Module, Debug)]
pub struct LukeModel<B: Backend> {
    pub embeddings: WordEmbeddings<B>,
    pub entity_embeddings: EntityEmbeddings<B>,
    pub encoder: Encoder<B>,
    pub pooler: Pooler<B>,
}

impl LukeConfig {
    /// Initialize the base encoder with freshly drawn weights.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<LukeModel<B>, ConfigError> {
        self.validate()?;
        if self.num_hidden_layers == 0 {
            return Err(ConfigError::ZeroSized {
                field: "num_hidden_layers",
            });
        }
        Ok(LukeModel {
            embeddings: WordEmbeddings::new(self, device),
            entity_embeddings: EntityEmbeddings::new(self, device),
            encoder: Encoder::new(self, device),
            pooler: Pooler::new(self, device),
        })
    }
}

impl<B: Backend> LukeModel<B> {
    pub fn forward(&self, input: LukeInput<B>, output_all_layers: bool) -> LukeOutput<B> {
        let LukeInput { words, entities } = input;

        let entity_mask = entities.as_ref().map(|e| e.attention_mask.clone());
        let mask = extended_attention_mask(words.attention_mask, entity_mask);

        let word_embedding = self.embeddings.forward(words.ids, words.segment_ids);
        let entity_embedding = entities.map(|e| {
            self.entity_embeddings
                .forward(e.ids, e.position_ids, e.segment_ids)
        });

        let encoded_layers =
            self.encoder
                .forward(word_embedding, entity_embedding, mask, output_all_layers);
        let pooled_output = self
            .pooler
            .forward(encoded_layers[encoded_layers.len() - 1].word.clone());

        LukeOutput {
            encoded_layers,
            pooled_output,
        }
    }

    /// Final word-stream state at the summary position, for word-only input.
    ///
    /// Returns: [batch, hidden]
    pub fn sentence_embedding(
        &self,
        ids: Tensor<B, 2, Int>,
        segment_ids: Option<Tensor<B, 2, Int>>,
        attention_mask: Tensor<B, 2, Int>,
    ) -> Tensor<B, 2> {
        let input = LukeInput {
            words: WordInput {
                ids,
                segment_ids,
                attention_mask,
            },
            entities: None,
        };
        let output = self.forward(input, false);
        output
            .last_layer()
            .word
            .clone()
            .narrow(1, 0, 1)
            .squeeze_dim::<2>(1)
    }

    /// Word embedding table; the masked-word decoder reads it directly.
    pub fn word_embedding_weight(&self) -> Tensor<B, 2> {
        self.embeddings.weight()
    }

    /// Entity embedding table; the masked-entity decoder reads it directly.
    pub fn entity_embedding_weight(&self) -> Tensor<B, 2> {
        self.entity_embeddings.weight()
    }

    /// Replace parameters with entries of an external checkpoint.
    ///
    /// Keys are translated (`gamma`/`beta`, `bert.` prefix) before matching.
    /// Missing and unexpected keys are reported, never fatal.
    pub fn load_checkpoint(self, checkpoint: Checkpoint) -> Result<(Self, LoadReport), CheckpointError> {
        let mut loader = ParamLoader::new(checkpoint);
        let model = self.load_named(&mut loader, "")?;
        Ok((model, loader.finish("LukeModel")))
    }

    pub fn load_named(
        mut self,
        loader: &mut ParamLoader<B>,
        prefix: &str,
    ) -> Result<Self, CheckpointError> {
        self.embeddings = self
            .embeddings
            .load_named(loader, &format!("{prefix}embeddings."))?;
        self.entity_embeddings = self
            .entity_embeddings
            .load_named(loader, &format!("{prefix}entity_embeddings."))?;
        self.encoder = self
            .encoder
            .load_named(loader, &format!("{prefix}encoder."))?;
        self.pooler = self.pooler.load_named(loader, &format!("{prefix}pooler."))?;
        Ok(self)
    }
}

/// Concatenate word and entity masks and turn them into an additive bias.
///
/// Returns: [batch, 1, 1, words + entities], 0 where attended, -10000 elsewhere.
pub fn extended_attention_mask<B: Backend>(
    word_mask: Tensor<B, 2, Int>,
    entity_mask: Option<Tensor<B, 2, Int>>,
) -> Tensor<B, 4> {
    let mask = match entity_mask {
        Some(entity_mask) => Tensor::cat(vec![word_mask, entity_mask], 1),
        None => word_mask,
    };
    let [batch_size, joint_len] = mask.dims();
    mask.float()
        .neg()
        .add_scalar(1.0)
        .mul_scalar(MASK_PENALTY)
        .reshape([batch_size, 1, 1, joint_len])
}
