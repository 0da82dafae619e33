//! Checkpoint persistence.
//!
//! Two formats: burn's native record format (NamedMpk, full precision) for
//! models saved by this crate, and flat name-to-tensor maps for weights
//! coming from an external training run (see [`named`]).

pub mod named;

use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use tracing::info;

use crate::error::CheckpointError;

pub use named::{translate_key, Checkpoint, LoadReport, NamedTensor, ParamLoader};

/// Path of the record file burn writes for `path` (it appends `.mpk`).
pub fn record_path(path: &Path) -> PathBuf {
    path.with_extension("mpk")
}

/// Save a model to disk in NamedMpk format (lossless).
///
/// Returns the full path of the written file.
pub fn save_checkpoint<B: Backend, M: Module<B> + Clone>(
    model: &M,
    path: &Path,
) -> Result<PathBuf, CheckpointError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| CheckpointError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(path.to_path_buf(), &recorder)
        .map_err(|e| CheckpointError::Recorder {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let full_path = record_path(path);
    info!("saved checkpoint to {}", full_path.display());
    Ok(full_path)
}

/// Load model weights from disk.
///
/// Returns `None` if no record exists at `path`.
pub fn load_checkpoint<B: Backend, M: Module<B>>(
    model: M,
    path: &Path,
    device: &B::Device,
) -> Result<Option<M>, CheckpointError> {
    let full_path = record_path(path);
    if !full_path.exists() {
        return Ok(None);
    }

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let loaded = model
        .load_file(path.to_path_buf(), &recorder, device)
        .map_err(|e| CheckpointError::Recorder {
            path: full_path.clone(),
            message: e.to_string(),
        })?;

    info!("loaded checkpoint from {}", full_path.display());
    Ok(Some(loaded))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_path_appends_extension() {
        assert_eq!(
            record_path(Path::new("ckpt/luke_base")),
            PathBuf::from("ckpt/luke_base.mpk")
        );
    }

    #[test]
    fn missing_checkpoint_is_none() {
        use crate::model::primitives::init_layer_norm;
        use burn::backend::NdArray;

        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let norm = init_layer_norm::<NdArray>(4, &device);
        let loaded = load_checkpoint(norm, &dir.path().join("absent"), &device).unwrap();
        assert!(loaded.is_none());
    }
}
