//! Error types for model construction and checkpoint handling.
//!
//! Shape violations inside a forward pass are not represented here: they are
//! precondition failures and surface as backend panics.

use std::path::PathBuf;

use thiserror::Error;

/// Invalid model configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Hidden width cannot be split evenly across the attention heads.
    #[error("hidden size {hidden_size} is not a multiple of the number of attention heads {num_heads}")]
    HeadSizeMismatch { hidden_size: usize, num_heads: usize },

    /// A dimension that must be positive is zero.
    #[error("config field `{field}` must be non-zero")]
    ZeroSized { field: &'static str },

    /// Config file could not be read or parsed.
    #[error("cannot load config '{path}': {message}")]
    Load { path: PathBuf, message: String },

    /// Config file could not be written.
    #[error("cannot save config '{path}': {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Checkpoint loading or saving failure.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// A named tensor does not fit the parameter it addresses.
    #[error("shape mismatch for '{path}': model expects {expected:?}, checkpoint has {found:?}")]
    ShapeMismatch {
        path: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// A named tensor whose value count disagrees with its own shape.
    #[error("malformed entry '{path}': {values} values do not fill shape {shape:?}")]
    Malformed {
        path: String,
        shape: Vec<usize>,
        values: usize,
    },

    /// The recorder failed to read or write a file.
    #[error("recorder error for '{path}': {message}")]
    Recorder { path: PathBuf, message: String },

    /// Filesystem error around a checkpoint file.
    #[error("io error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CheckpointError {
    pub fn shape_mismatch(path: &str, expected: &[usize], found: &[usize]) -> Self {
        Self::ShapeMismatch {
            path: path.to_string(),
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }
}
