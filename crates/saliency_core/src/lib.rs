//! # saliency_core
//!
//! Core types and traits for saliency-rs image classification and Grad-CAM.
//!
//! This crate provides:
//! - [`SaliencyError`] and the crate-wide [`Result`] alias
//! - [`PipelineConfig`] for validated, explicit configuration
//! - [`DeviceKind`] for compute backend selection
//! - [`ImageClassifier`] and [`LayerObserver`] for instrumenting forward passes
//!
//! ## Shape Convention
//!
//! Images follow the convention `(B, C, H, W)`:
//! - `B`: Batch size (always 1 in the pipeline)
//! - `C`: Colour channels (3) or feature channels
//! - `H`, `W`: Spatial height and width
//!
//! ## Example
//!
//! ```rust,ignore
//! use saliency_core::PipelineConfig;
//!
//! let config = PipelineConfig::from_env()?;
//! println!("Using model size: {}", config.model_size);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod device;
mod error;
mod model_trait;

pub use config::{
    ModelSize, PipelineConfig, RawSettings, ALPHA_KEY, DEFAULT_ALPHA, DEFAULT_TOP_K, DEVICE_KEY,
    IMAGE_PATH_KEY, MODEL_SIZE_KEY, OUTPUT_DIR_KEY, TARGET_LAYER_KEY, TOP_K_KEY, WEIGHTS_DIR_KEY,
};
pub use device::{available_devices, DeviceKind};
pub use error::{Result, SaliencyError};
pub use model_trait::{ImageClassifier, LayerInfo, LayerKind, LayerObserver, NoopObserver};

/// Backend type aliases for convenience
pub mod backend {
    #[cfg(feature = "backend-ndarray")]
    pub use burn_ndarray::{NdArray, NdArrayDevice};

    #[cfg(any(feature = "backend-ndarray", feature = "backend-tch"))]
    pub use burn_autodiff::Autodiff;

    #[cfg(feature = "backend-tch")]
    pub use burn_tch::{LibTorch, LibTorchDevice};
}
