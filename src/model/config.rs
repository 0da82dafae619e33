//! Model configuration shared by every layer.
//!
//! Built once, never mutated. Persisted as JSON through burn's `Config`
//! derive so a trained model can be re-instantiated with the same shape.

use std::path::Path;

use burn::config::Config;
use burn::nn::Initializer;

use crate::error::ConfigError;

/// Shape and regularization hyperparameters of the word/entity encoder.
#[derive(Config, Debug)]
pub struct LukeConfig {
    /// Word vocabulary size.
    #[config(default = 30522)]
    pub vocab_size: usize,
    /// Entity vocabulary size.
    #[config(default = 500000)]
    pub entity_vocab_size: usize,
    /// Hidden width of both streams.
    #[config(default = 768)]
    pub hidden_size: usize,
    /// Width of the entity embedding table. Projected to `hidden_size` when different.
    #[config(default = 256)]
    pub entity_emb_size: usize,
    /// Number of encoder layers.
    #[config(default = 12)]
    pub num_hidden_layers: usize,
    /// Number of attention heads.
    #[config(default = 12)]
    pub num_attention_heads: usize,
    /// Feed-forward inner width.
    #[config(default = 3072)]
    pub intermediate_size: usize,
    /// Dropout on embeddings and sub-block outputs.
    #[config(default = 0.1)]
    pub hidden_dropout_prob: f64,
    /// Dropout on attention probabilities.
    #[config(default = 0.1)]
    pub attention_probs_dropout_prob: f64,
    /// Size of the position embedding table.
    #[config(default = 512)]
    pub max_position_embeddings: usize,
    /// Number of segment types.
    #[config(default = 2)]
    pub type_vocab_size: usize,
    /// Standard deviation of the normal weight initializer.
    #[config(default = 0.02)]
    pub initializer_range: f64,
}

impl LukeConfig {
    /// Check the invariants every layer relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sizes = [
            ("vocab_size", self.vocab_size),
            ("entity_vocab_size", self.entity_vocab_size),
            ("hidden_size", self.hidden_size),
            ("entity_emb_size", self.entity_emb_size),
            ("num_attention_heads", self.num_attention_heads),
            ("intermediate_size", self.intermediate_size),
            ("max_position_embeddings", self.max_position_embeddings),
            ("type_vocab_size", self.type_vocab_size),
        ];
        for (field, value) in sizes {
            if value == 0 {
                return Err(ConfigError::ZeroSized { field });
            }
        }
        if self.hidden_size % self.num_attention_heads != 0 {
            return Err(ConfigError::HeadSizeMismatch {
                hidden_size: self.hidden_size,
                num_heads: self.num_attention_heads,
            });
        }
        Ok(())
    }

    /// Width of one attention head.
    pub fn head_size(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    /// Whether entity embeddings need a projection up to the hidden width.
    pub fn projects_entities(&self) -> bool {
        self.entity_emb_size != self.hidden_size
    }

    /// Normal initializer used for every linear and embedding weight.
    pub fn initializer(&self) -> Initializer {
        Initializer::Normal {
            mean: 0.0,
            std: self.initializer_range,
        }
    }

    /// Read a JSON config from disk and validate it.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(path).map_err(|e| ConfigError::Load {
            path: path.to_path_buf(),
            message: format!("{:?}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config to disk as JSON.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        self.save(path).map_err(|source| ConfigError::Save {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parameter count of the base encoder (embeddings, layers, pooler).
    pub fn param_estimate(&self) -> usize {
        let h = self.hidden_size;
        let e = self.entity_emb_size;
        let i = self.intermediate_size;
        let positions = self.max_position_embeddings * h;
        let segments = self.type_vocab_size * h;

        let word_embeddings = self.vocab_size * h + positions + segments + 2 * h;
        let projection = if self.projects_entities() { e * h } else { 0 };
        let entity_embeddings =
            self.entity_vocab_size * e + projection + positions + segments + 2 * h;

        let attention = 4 * (h * h + h) + 2 * h;
        let feed_forward = (h * i + i) + (i * h + h) + 2 * h;
        let layers = self.num_hidden_layers * (attention + feed_forward);

        let pooler = h * h + h;
        word_embeddings + entity_embeddings + layers + pooler
    }

    /// Parameter count including the pretraining heads. Tied decoders add only their bias.
    pub fn pretraining_param_estimate(&self) -> usize {
        let h = self.hidden_size;
        let e = self.entity_emb_size;
        let lm_head = (h * h + h) + 2 * h + self.vocab_size;
        let nsp_head = 2 * h + 2;
        let entity_head = (h * e + e) + 2 * e + self.entity_vocab_size;
        self.param_estimate() + lm_head + nsp_head + entity_head
    }
}
