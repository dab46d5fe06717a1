//! Pretrained ImageNet-1K variants.
//!
//! A weights directory holds, per variant, either the torchvision state dict
//! as downloaded or a Burn record converted from it:
//!
//! ```text
//! weights/
//! ├── efficientnet_v2_s-dd5fe13b.pth   # MODEL_SIZE=small, torchvision
//! ├── efficientnet_v2_s.mpk            # MODEL_SIZE=small, converted (preferred)
//! ├── efficientnet_v2_s.json           # optional CheckpointMetadata
//! ├── efficientnet_v2_l-59c71312.pth   # MODEL_SIZE=large, torchvision
//! ├── efficientnet_v2_l.mpk            # MODEL_SIZE=large, converted (preferred)
//! └── imagenet_classes.txt             # optional, overrides the bundled names
//! ```

use std::path::{Path, PathBuf};

use burn::prelude::*;
use saliency_core::{ModelSize, Result, SaliencyError};
use tracing::{debug, info};

use crate::checkpoint::{load_model, save_model, CheckpointMetadata};
use crate::efficientnet::{EfficientNetV2, EfficientNetV2Config};
use crate::import::{import_torchvision, torchvision_file_name};
use crate::labels::{imagenet_labels, load_labels};

/// Label file name inside the weights directory.
pub const LABELS_FILE: &str = "imagenet_classes.txt";

/// Architecture name of a variant.
pub fn arch_name(size: ModelSize) -> &'static str {
    match size {
        ModelSize::Small => "efficientnet_v2_s",
        ModelSize::Large => "efficientnet_v2_l",
    }
}

/// Paths of the files backing one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PretrainedFiles {
    /// Converted Burn record.
    pub weights: PathBuf,
    /// torchvision state dict.
    pub torchvision: PathBuf,
    /// Optional metadata side-car.
    pub metadata: PathBuf,
    /// Class names.
    pub labels: PathBuf,
}

impl PretrainedFiles {
    /// Locate the files for `size` under `weights_dir`.
    pub fn locate(size: ModelSize, weights_dir: impl AsRef<Path>) -> Self {
        let dir = weights_dir.as_ref();
        let arch = arch_name(size);
        Self {
            weights: dir.join(format!("{}.mpk", arch)),
            torchvision: dir.join(torchvision_file_name(size)),
            metadata: dir.join(format!("{}.json", arch)),
            labels: dir.join(LABELS_FILE),
        }
    }
}

/// A loaded pretrained classifier and its label set.
#[derive(Debug)]
pub struct PretrainedModel<B: Backend> {
    /// Variant that was loaded.
    pub size: ModelSize,
    /// The network.
    pub model: EfficientNetV2<B>,
    /// Class names, indexed by class id.
    pub labels: Vec<String>,
    /// File the weights were read from.
    pub weights: PathBuf,
}

/// Load the `size` variant from `weights_dir` onto `device`.
pub fn load_pretrained<B: Backend>(
    size: ModelSize,
    weights_dir: impl AsRef<Path>,
    device: &B::Device,
) -> Result<PretrainedModel<B>> {
    let files = PretrainedFiles::locate(size, weights_dir);
    let config = EfficientNetV2Config::for_size(size);

    if files.metadata.is_file() {
        let meta = CheckpointMetadata::load(&files.metadata)?;
        debug!(arch = %meta.arch, source = ?meta.source, "checkpoint metadata");
        if meta.num_classes != config.num_classes || meta.arch != arch_name(size) {
            return Err(SaliencyError::Checkpoint(format!(
                "{} describes {} with {} classes, expected {} with {}",
                files.metadata.display(),
                meta.arch,
                meta.num_classes,
                arch_name(size),
                config.num_classes
            )));
        }
    }

    let labels = if files.labels.is_file() {
        load_labels(&files.labels, config.num_classes)?
    } else {
        imagenet_labels()?
    };

    let (model, weights) = if files.weights.is_file() {
        info!(weights = %files.weights.display(), "loading {}", arch_name(size));
        (load_model::<B>(&config, &files.weights, device)?, files.weights)
    } else if files.torchvision.is_file() {
        (import_torchvision::<B>(&config, &files.torchvision, device)?, files.torchvision)
    } else {
        return Err(SaliencyError::Checkpoint(format!(
            "no weights for {}: expected {} or {}",
            arch_name(size),
            files.weights.display(),
            files.torchvision.display()
        )));
    };

    Ok(PretrainedModel {
        size,
        model,
        labels,
        weights,
    })
}

/// Convert the torchvision state dict at `input` to a Burn record in `weights_dir`.
///
/// Writes the `.mpk` record and its metadata side-car, and returns the record path.
pub fn convert_torchvision<B: Backend>(
    size: ModelSize,
    input: impl AsRef<Path>,
    weights_dir: impl AsRef<Path>,
    device: &B::Device,
) -> Result<PathBuf> {
    let input = input.as_ref();
    let files = PretrainedFiles::locate(size, weights_dir.as_ref());
    let config = EfficientNetV2Config::for_size(size);

    let model = import_torchvision::<B>(&config, input, device)?;
    std::fs::create_dir_all(weights_dir.as_ref())?;
    save_model::<B, _>(&model, &files.weights)?;

    let source = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.display().to_string());
    CheckpointMetadata::new(arch_name(size), config.num_classes)
        .with_source(source)
        .save(&files.metadata)?;

    info!(weights = %files.weights.display(), "converted {}", arch_name(size));
    Ok(files.weights)
}
