//! # saliency
//!
//! Image classification with Grad-CAM visual explanations, in Rust.
//!
//! - **Core**: configuration, device selection, errors and the classifier seam
//! - **Models**: EfficientNetV2-S / -L with Burn checkpoints and label files
//! - **Explain**: single-pass activation/gradient capture and Grad-CAM maps
//! - **Vision**: preprocessing presets, the jet colour scale and overlays
//! - **Pipeline**: top-K classification, explanation and persistence
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use saliency::prelude::*;
//!
//! let config = PipelineConfig::from_env()?;
//! let report = saliency::pipeline::run(&config)?;
//! print!("{}", report.listing());
//! ```
//!
//! ## Feature Flags
//!
//! - `backend-ndarray` (default): CPU backend using ndarray
//! - `backend-tch`: CUDA and MPS through LibTorch via tch-rs

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub use saliency_core as core;
pub use saliency_explain as explain;
pub use saliency_models as models;
pub use saliency_pipeline as pipeline;
pub use saliency_vision as vision;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use saliency::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use saliency_core::{
        DeviceKind, ImageClassifier, LayerInfo, LayerKind, LayerObserver, ModelSize, PipelineConfig,
        RawSettings, Result, SaliencyError,
    };

    // Models
    pub use saliency_models::{load_pretrained, EfficientNetV2, EfficientNetV2Config, PretrainedModel};

    // Explain
    pub use saliency_explain::{GradCam, Heatmap, LayerSelection};

    // Vision
    pub use saliency_vision::{load_image, Colormap, OverlayRenderer, Preprocessor};

    // Pipeline
    pub use saliency_pipeline::{ClassScore, Classification, InferenceEngine, Pipeline, RunReport};
}

/// Everything, including backend aliases and lower-level building blocks.
pub mod all {
    pub use super::prelude::*;

    pub use saliency_core::backend;
    pub use saliency_explain::{grad_cam, AttributionMap, CaptureHooks, CapturedPass};
    pub use saliency_models::{
        convert_torchvision, imagenet_labels, import_torchvision, load_into, load_labels, save_model,
        CheckpointMetadata, FrozenBatchNorm2d,
    };
    pub use saliency_pipeline::{artifact_name, sanitize_class_name, top_k_indices};
    pub use saliency_vision::{blend, colorize, upsample, Interpolation};
}
