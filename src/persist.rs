//! Artifacts directory layout: one model record plus the JSON configs it
//! was produced with.
//!
//! A record can only be loaded back into a structurally identical
//! architecture; a shape or key mismatch surfaces as an error, never as a
//! silent truncation.

use crate::model::{Cnn, CnnConfig, CnnRecord};
use crate::training::TrainingConfig;
use burn::prelude::*;
use burn::record::{CompactRecorder, FileRecorder, Recorder, RecorderError};
use std::path::{Path, PathBuf};

pub const MODEL_NAME: &str = "model";
pub const TRAINING_CONFIG_NAME: &str = "training_config.json";
pub const MODEL_CONFIG_NAME: &str = "model_config.json";

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("failed to record model parameters: {0}")]
    Record(#[from] RecorderError),
    #[error(
        "saved parameter {name} has shape {found:?}, the declared architecture expects {expected:?}"
    )]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("saved record has {found} {name} layers, the declared architecture expects {expected}")]
    LayerCountMismatch {
        name: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("failed to prepare artifacts directory {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub fn create_artifact_dir(artifact_dir: &Path) -> Result<(), PersistError> {
    std::fs::create_dir_all(artifact_dir).map_err(|source| PersistError::Io {
        path: artifact_dir.into(),
        source,
    })
}

/// Writes the model's parameter record to `<dir>/model` (the recorder adds
/// its file extension).
pub fn save_model<B: Backend>(artifact_dir: &Path, model: &Cnn<B>) -> Result<(), PersistError> {
    let path = artifact_dir.join(MODEL_NAME);
    model.clone().save_file(path, &CompactRecorder::new())?;
    Ok(())
}

/// Initializes a model from `config` and overwrites its parameters with the
/// record at `<dir>/model`.
///
/// Fails with a record error when the file is missing or when the saved
/// layer counts or parameter shapes do not match the architecture `config`
/// declares.
pub fn load_model<B: Backend>(
    artifact_dir: &Path,
    config: &CnnConfig,
    device: &B::Device,
) -> Result<Cnn<B>, PersistError> {
    let path = artifact_dir.join(MODEL_NAME);
    let reference = config.init::<B>(device);
    let record: CnnRecord<B> = CompactRecorder::new().load(path, device)?;

    // The record format stores layer counts and shapes with the data, and
    // applying a record takes both as-is, so a record produced by a
    // different architecture must be rejected before it is applied rather
    // than surfacing later as a forward-pass fault.
    verify_matching_shapes(&reference, &record)?;
    Ok(reference.load_record(record))
}

fn verify_matching_shapes<B: Backend>(
    reference: &Cnn<B>,
    record: &CnnRecord<B>,
) -> Result<(), PersistError> {
    let check_len = |name: &'static str, expected: usize, found: usize| {
        if expected == found {
            Ok(())
        } else {
            Err(PersistError::LayerCountMismatch {
                name,
                expected,
                found,
            })
        }
    };
    check_len("blocks", reference.blocks.len(), record.blocks.len())?;
    check_len("dense", reference.dense.len(), record.dense.len())?;

    let check = |name: String, expected: Vec<usize>, found: Vec<usize>| {
        if expected == found {
            Ok(())
        } else {
            Err(PersistError::ShapeMismatch {
                name,
                expected,
                found,
            })
        }
    };

    for (i, (expected, found)) in reference.blocks.iter().zip(record.blocks.iter()).enumerate() {
        check(
            format!("blocks[{i}].conv.weight"),
            expected.conv.weight.dims().to_vec(),
            found.conv.weight.dims().to_vec(),
        )?;
    }
    for (i, (expected, found)) in reference.dense.iter().zip(record.dense.iter()).enumerate() {
        check(
            format!("dense[{i}].weight"),
            expected.weight.dims().to_vec(),
            found.weight.dims().to_vec(),
        )?;
    }
    check(
        "output.weight".to_string(),
        reference.output.weight.dims().to_vec(),
        record.output.weight.dims().to_vec(),
    )
}

pub fn model_record_exists<B: Backend>(artifact_dir: &Path) -> bool {
    let ext = <CompactRecorder as FileRecorder<B>>::file_extension();
    artifact_dir
        .join(format!("{MODEL_NAME}.{ext}"))
        .exists()
}

pub fn save_training_config(artifact_dir: &Path, config: &TrainingConfig) {
    let path = artifact_dir.join(TRAINING_CONFIG_NAME);
    config
        .save(&path)
        .expect("Failed to save the training config");
}

pub fn load_training_config(artifact_dir: &Path) -> Option<TrainingConfig> {
    let path = artifact_dir.join(TRAINING_CONFIG_NAME);
    path.exists().then(|| {
        println!("Loading training config from {path:?}");
        TrainingConfig::load(&path).expect("Failed to load the training config")
    })
}

pub fn save_model_config(artifact_dir: &Path, config: &CnnConfig) {
    let path = artifact_dir.join(MODEL_CONFIG_NAME);
    config.save(&path).expect("Failed to save the model config");
}

pub fn load_model_config(artifact_dir: &Path) -> Option<CnnConfig> {
    let path = artifact_dir.join(MODEL_CONFIG_NAME);
    path.exists().then(|| {
        println!("Loading model config from {path:?}");
        CnnConfig::load(&path).expect("Failed to load the model config")
    })
}
