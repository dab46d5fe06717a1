//! # saliency_models
//!
//! Pretrained image classifiers for saliency-rs.
//!
//! ## Models
//! - [`EfficientNetV2`] - EfficientNetV2-S / -L for ImageNet-1K
//!
//! ## Weights
//! - [`import`] - torchvision `.pth` state dict import
//! - [`checkpoint`] - Burn record loading and saving
//! - [`pretrained`] - variant lookup in a weights directory, conversion
//! - [`labels`] - class name files and the bundled ImageNet-1K names

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod efficientnet;
pub mod import;
pub mod labels;
pub mod norm;
pub mod pretrained;

pub use checkpoint::{load_into, load_model, save_model, CheckpointMetadata};
pub use efficientnet::{BlockType, EfficientNetV2, EfficientNetV2Config, StageConfig, IMAGENET_CLASSES};
pub use import::{import_torchvision, torchvision_file_name, torchvision_key_remap};
pub use labels::{imagenet_labels, load_labels, numbered_labels, parse_labels, IMAGENET_LABELS};
pub use norm::FrozenBatchNorm2d;
pub use pretrained::{
    arch_name, convert_torchvision, load_pretrained, PretrainedFiles, PretrainedModel, LABELS_FILE,
};
