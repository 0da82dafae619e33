//! LUKE encoder: word and entity streams fused in every attention layer.

pub mod attention;
pub mod config;
pub mod embeddings;
pub mod encoder;
pub mod feed_forward;
pub mod heads;
pub mod luke;
pub mod pooler;
pub mod pretraining;
pub mod primitives;

pub use config::LukeConfig;
pub use encoder::EncodedLayer;
pub use luke::{extended_attention_mask, EntityInput, LukeInput, LukeModel, LukeOutput, WordInput};
pub use pretraining::{
    cross_entropy_loss, LukePretrainingModel, PretrainingLabels, PretrainingOutput, TaskMetrics,
};
