//! Model checkpointing and serialization utilities.
//!
//! Converted weights are stored with Burn's record system as named
//! MessagePack (`*.mpk`) files, optionally accompanied by a JSON metadata
//! side-car describing where the weights came from. See [`crate::import`]
//! for reading torchvision state dicts.
//!
//! # Example
//!
//! ```rust,ignore
//! use saliency_models::checkpoint::{load_model, save_model};
//! use saliency_models::EfficientNetV2Config;
//!
//! let config = EfficientNetV2Config::small();
//! let model = config.init::<NdArray>(&device);
//! save_model(&model, "efficientnet_v2_s.mpk")?;
//!
//! let loaded = load_model::<NdArray>(&config, "efficientnet_v2_s.mpk", &device)?;
//! ```

use std::path::Path;

use burn::module::Module;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use saliency_core::{Result, SaliencyError};
use serde::{Deserialize, Serialize};

use crate::efficientnet::{EfficientNetV2, EfficientNetV2Config};

/// Save a model to a named MessagePack checkpoint.
pub fn save_model<B, M>(model: &M, path: impl AsRef<Path>) -> Result<()>
where
    B: Backend,
    M: Module<B>,
{
    let path = path.as_ref();
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(path.to_path_buf(), &recorder)
        .map_err(|e| SaliencyError::Checkpoint(format!("{}: {}", path.display(), e)))
}

/// Load checkpoint weights into an existing module.
pub fn load_into<B, M>(module: M, path: impl AsRef<Path>, device: &B::Device) -> Result<M>
where
    B: Backend,
    M: Module<B>,
{
    let path = path.as_ref();
    if !path.is_file() {
        return Err(SaliencyError::Checkpoint(format!(
            "weights file not found: {}",
            path.display()
        )));
    }

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    module
        .load_file(path.to_path_buf(), &recorder, device)
        .map_err(|e| SaliencyError::Checkpoint(format!("{}: {}", path.display(), e)))
}

/// Build an EfficientNetV2 from `config` and load its weights from `path`.
pub fn load_model<B: Backend>(
    config: &EfficientNetV2Config,
    path: impl AsRef<Path>,
    device: &B::Device,
) -> Result<EfficientNetV2<B>> {
    load_into::<B, _>(config.init::<B>(device), path, device)
}

/// Provenance of a weights file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Model architecture name.
    pub arch: String,
    /// Number of output classes.
    pub num_classes: usize,
    /// File the weights were converted from.
    pub source: Option<String>,
}

impl CheckpointMetadata {
    /// Create new metadata for a model.
    pub fn new(arch: impl Into<String>, num_classes: usize) -> Self {
        Self {
            arch: arch.into(),
            num_classes,
            source: None,
        }
    }

    /// Set the weights source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Save metadata to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SaliencyError::Checkpoint(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load metadata from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| SaliencyError::Checkpoint(e.to_string()))
    }
}
