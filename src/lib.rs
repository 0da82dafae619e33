//! Knowledge-enhanced transformer encoder over words and entities.
//!
//! Words and entities are embedded separately, concatenated into one joint
//! sequence, and pass together through a BERT-style encoder so every position
//! attends to both streams. The pretraining model adds masked-word,
//! masked-entity and next-sentence objectives.

pub mod checkpoint;
pub mod error;
pub mod model;

pub use checkpoint::{load_checkpoint, save_checkpoint, Checkpoint, LoadReport, NamedTensor};
pub use error::{CheckpointError, ConfigError};
pub use model::{
    EntityInput, LukeConfig, LukeInput, LukeModel, LukeOutput, LukePretrainingModel,
    PretrainingLabels, PretrainingOutput, TaskMetrics, WordInput,
};
