//! Input embeddings for the word and entity streams.
//!
//! An entity mention can span several word positions, so each entity carries
//! a padded list of word indices (`-1` marks an unused slot). Its position
//! embedding is the mean over the valid slots.

use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Embedding, LayerNorm, Linear};
use burn::prelude::*;

use super::config::LukeConfig;
use super::primitives::{init_embedding, init_layer_norm, init_linear};
use crate::checkpoint::ParamLoader;
use crate::error::CheckpointError;

/// Sentinel for an entity position slot that points at no word.
pub const PADDING_POSITION: i64 = -1;

/// Added to the valid-slot count so an entity without positions divides by a non-zero value.
const POSITION_COUNT_EPS: f64 = 1e-12;

// ─── Word Embeddings ──────────────────────────────────────────────

/// Token + position + segment embeddings for the word stream.
#[derive(Module, Debug)]
pub struct WordEmbeddings<B: Backend> {
    pub word_embeddings: Embedding<B>,
    pub position_embeddings: Embedding<B>,
    pub token_type_embeddings: Embedding<B>,
    pub layer_norm: LayerNorm<B>,
    dropout: Dropout,
}

impl<B: Backend> WordEmbeddings<B> {
    pub fn new(config: &LukeConfig, device: &B::Device) -> Self {
        let init = config.initializer();
        let h = config.hidden_size;
        Self {
            word_embeddings: init_embedding(config.vocab_size, h, &init, device),
            position_embeddings: init_embedding(config.max_position_embeddings, h, &init, device),
            token_type_embeddings: init_embedding(config.type_vocab_size, h, &init, device),
            layer_norm: init_layer_norm(h, device),
            dropout: DropoutConfig::new(config.hidden_dropout_prob).init(),
        }
    }

    /// - `input_ids`: [batch, seq]
    /// - `token_type_ids`: [batch, seq], all zeros when absent
    ///
    /// Returns: [batch, seq, hidden]
    pub fn forward(
        &self,
        input_ids: Tensor<B, 2, Int>,
        token_type_ids: Option<Tensor<B, 2, Int>>,
    ) -> Tensor<B, 3> {
        let [batch_size, seq_len] = input_ids.dims();
        let device = input_ids.device();

        let position_ids = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &device)
            .reshape([1, seq_len])
            .expand([batch_size, seq_len]);
        let token_type_ids =
            token_type_ids.unwrap_or_else(|| Tensor::zeros([batch_size, seq_len], &device));

        let words = self.word_embeddings.forward(input_ids);
        let positions = self.position_embeddings.forward(position_ids);
        let token_types = self.token_type_embeddings.forward(token_type_ids);

        let embeddings = self.layer_norm.forward(words + positions + token_types);
        self.dropout.forward(embeddings)
    }

    /// The word embedding table, shared with the masked-word decoder.
    pub fn weight(&self) -> Tensor<B, 2> {
        self.word_embeddings.weight.val()
    }

    pub fn load_named(
        mut self,
        loader: &mut ParamLoader<B>,
        prefix: &str,
    ) -> Result<Self, CheckpointError> {
        self.word_embeddings =
            loader.embedding(&format!("{prefix}word_embeddings."), self.word_embeddings)?;
        self.position_embeddings =
            loader.embedding(&format!("{prefix}position_embeddings."), self.position_embeddings)?;
        self.token_type_embeddings = loader.embedding(
            &format!("{prefix}token_type_embeddings."),
            self.token_type_embeddings,
        )?;
        self.layer_norm =
            loader.layer_norm(&format!("{prefix}LayerNorm."), self.layer_norm)?;
        Ok(self)
    }
}

// ─── Entity Embeddings ────────────────────────────────────────────

/// Entity + averaged position + segment embeddings for the entity stream.
///
/// When the entity table is narrower than the hidden width, a bias-free
/// projection (`entity_dense`) lifts it; otherwise the projection is absent.
#[derive(Module, Debug)]
pub struct EntityEmbeddings<B: Backend> {
    pub entity_embeddings: Embedding<B>,
    pub entity_dense: Option<Linear<B>>,
    pub position_embeddings: Embedding<B>,
    pub token_type_embeddings: Embedding<B>,
    pub layer_norm: LayerNorm<B>,
    dropout: Dropout,
}

impl<B: Backend> EntityEmbeddings<B> {
    pub fn new(config: &LukeConfig, device: &B::Device) -> Self {
        let init = config.initializer();
        let h = config.hidden_size;
        let entity_dense = config
            .projects_entities()
            .then(|| init_linear(config.entity_emb_size, h, false, &init, device));
        Self {
            entity_embeddings: init_embedding(
                config.entity_vocab_size,
                config.entity_emb_size,
                &init,
                device,
            ),
            entity_dense,
            position_embeddings: init_embedding(config.max_position_embeddings, h, &init, device),
            token_type_embeddings: init_embedding(config.type_vocab_size, h, &init, device),
            layer_norm: init_layer_norm(h, device),
            dropout: DropoutConfig::new(config.hidden_dropout_prob).init(),
        }
    }

    /// - `entity_ids`: [batch, entities]
    /// - `position_ids`: [batch, entities, slots], word indices or `-1`
    /// - `token_type_ids`: [batch, entities], all zeros when absent
    ///
    /// Returns: [batch, entities, hidden]
    pub fn forward(
        &self,
        entity_ids: Tensor<B, 2, Int>,
        position_ids: Tensor<B, 3, Int>,
        token_type_ids: Option<Tensor<B, 2, Int>>,
    ) -> Tensor<B, 3> {
        let [batch_size, num_entities] = entity_ids.dims();
        let device = entity_ids.device();
        let token_type_ids =
            token_type_ids.unwrap_or_else(|| Tensor::zeros([batch_size, num_entities], &device));

        let mut entities = self.entity_embeddings.forward(entity_ids);
        if let Some(dense) = &self.entity_dense {
            entities = dense.forward(entities);
        }

        let positions = self.averaged_positions(position_ids);
        let token_types = self.token_type_embeddings.forward(token_type_ids);

        let embeddings = self.layer_norm.forward(entities + positions + token_types);
        self.dropout.forward(embeddings)
    }

    /// Mean position embedding over the valid slots of each entity.
    ///
    /// An entity with no valid slot gets exactly zero.
    pub fn averaged_positions(&self, position_ids: Tensor<B, 3, Int>) -> Tensor<B, 3> {
        let [batch_size, num_entities, slots] = position_ids.dims();
        let hidden = self.position_embeddings.weight.dims()[1];

        // Sentinels are clamped to a valid row for lookup only; the mask zeroes them.
        let lookup_ids = position_ids
            .clone()
            .clamp_min(0)
            .reshape([batch_size, num_entities * slots]);
        let embedded = self
            .position_embeddings
            .forward(lookup_ids)
            .reshape([batch_size, num_entities, slots, hidden]);

        let mask = position_ids.not_equal_elem(PADDING_POSITION).float(); // [b, e, s]
        let masked = embedded
            * mask
                .clone()
                .unsqueeze_dim::<4>(3)
                .expand([batch_size, num_entities, slots, hidden]);

        let summed: Tensor<B, 3> = masked.sum_dim(2).squeeze_dim::<3>(2); // [b, e, h]
        let counts = mask
            .sum_dim(2) // [b, e, 1]
            .add_scalar(POSITION_COUNT_EPS)
            .expand([batch_size, num_entities, hidden]);
        summed / counts
    }

    /// The entity embedding table, shared with the masked-entity decoder.
    pub fn weight(&self) -> Tensor<B, 2> {
        self.entity_embeddings.weight.val()
    }

    pub fn load_named(
        mut self,
        loader: &mut ParamLoader<B>,
        prefix: &str,
    ) -> Result<Self, CheckpointError> {
        self.entity_embeddings =
            loader.embedding(&format!("{prefix}entity_embeddings."), self.entity_embeddings)?;
        self.entity_dense = match self.entity_dense {
            Some(dense) => Some(loader.linear(&format!("{prefix}entity_dense."), dense)?),
            None => None,
        };
        self.position_embeddings =
            loader.embedding(&format!("{prefix}position_embeddings."), self.position_embeddings)?;
        self.token_type_embeddings = loader.embedding(
            &format!("{prefix}token_type_embeddings."),
            self.token_type_embeddings,
        )?;
        self.layer_norm =
            loader.layer_norm(&format!("{prefix}LayerNorm."), self.layer_norm)?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::module::Param;

    type B = NdArray;

    fn test_config() -> LukeConfig {
        LukeConfig::new()
            .with_vocab_size(32)
            .with_entity_vocab_size(16)
            .with_hidden_size(8)
            .with_entity_emb_size(8)
            .with_num_hidden_layers(1)
            .with_num_attention_heads(2)
            .with_intermediate_size(16)
            .with_hidden_dropout_prob(0.0)
            .with_attention_probs_dropout_prob(0.0)
            .with_max_position_embeddings(16)
    }

    fn values<const D: usize>(t: Tensor<B, D>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn word_embeddings_shape() {
        let device = Default::default();
        let embeddings = WordEmbeddings::<B>::new(&test_config(), &device);
        let ids = Tensor::<B, 2, Int>::from_ints([[1, 2, 3, 4], [5, 6, 7, 0]], &device);
        let out = embeddings.forward(ids, None);
        assert_eq!(out.dims(), [2, 4, 8]);
    }

    #[test]
    fn absent_segments_equal_zero_segments() {
        let device = Default::default();
        let embeddings = WordEmbeddings::<B>::new(&test_config(), &device);
        let ids = Tensor::<B, 2, Int>::from_ints([[1, 2, 3]], &device);
        let zeros = Tensor::<B, 2, Int>::zeros([1, 3], &device);

        let implicit = values(embeddings.forward(ids.clone(), None));
        let explicit = values(embeddings.forward(ids, Some(zeros)));
        assert_eq!(implicit, explicit);
    }

    #[test]
    fn projection_exists_only_for_narrow_entity_table() {
        let device = Default::default();
        let same = EntityEmbeddings::<B>::new(&test_config(), &device);
        assert!(same.entity_dense.is_none());

        let narrow = EntityEmbeddings::<B>::new(&test_config().with_entity_emb_size(4), &device);
        let dense = narrow.entity_dense.as_ref().expect("projection");
        assert_eq!(dense.weight.dims(), [4, 8]);
        assert!(dense.bias.is_none());

        let ids = Tensor::<B, 2, Int>::from_ints([[1, 2]], &device);
        let positions = Tensor::<B, 3, Int>::from_ints([[[0, 1], [2, -1]]], &device);
        assert_eq!(narrow.forward(ids, positions, None).dims(), [1, 2, 8]);
    }

    #[test]
    fn all_sentinel_entity_has_zero_position_embedding() {
        let device = Default::default();
        let embeddings = EntityEmbeddings::<B>::new(&test_config(), &device);
        let positions = Tensor::<B, 3, Int>::from_ints([[[-1, -1, -1], [3, -1, -1]]], &device);

        let averaged = values(embeddings.averaged_positions(positions));
        let (empty, single) = averaged.split_at(8);
        assert!(empty.iter().all(|v| *v == 0.0), "got {:?}", empty);
        assert!(averaged.iter().all(|v| v.is_finite()));

        // One valid slot: exactly that row of the table.
        let row3 = values(embeddings.position_embeddings.weight.val().narrow(0, 3, 1));
        for (got, want) in single.iter().zip(&row3) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn position_embedding_is_mean_of_valid_slots() {
        let device = Default::default();
        let mut embeddings = EntityEmbeddings::<B>::new(&test_config(), &device);
        // Row i filled with the value i.
        let table: Vec<f32> = (0..16).flat_map(|i| vec![i as f32; 8]).collect();
        embeddings.position_embeddings.weight =
            Param::from_tensor(Tensor::from_data(TensorData::new(table, [16, 8]), &device));

        let positions = Tensor::<B, 3, Int>::from_ints([[[2, 4, -1, 9]]], &device);
        let averaged = values(embeddings.averaged_positions(positions));
        // (2 + 4 + 9) / 3
        for v in averaged {
            assert!((v - 5.0).abs() < 1e-5, "got {}", v);
        }
    }
}
