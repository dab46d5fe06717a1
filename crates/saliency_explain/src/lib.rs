//! # saliency_explain
//!
//! Grad-CAM explanations for image classifiers.
//!
//! ## Pieces
//!
//! - [`CaptureHooks`] - single-pass activation and gradient capture on one layer
//! - [`grad_cam`] / [`AttributionMap`] - channel-weighted activation maps
//! - [`GradCam`] - the full explain step, producing a normalized [`Heatmap`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use saliency_explain::GradCam;
//!
//! let heatmap = GradCam::new().explain(&model, input, Some(class_id))?;
//! assert!(heatmap.max() <= 1.0);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod activation;
pub mod attribution;
pub mod explainer;

pub use activation::{CaptureHooks, CapturedPass};
pub use attribution::{grad_cam, AttributionMap, Heatmap, NORMALIZE_EPS};
pub use explainer::{argmax_first, GradCam, LayerSelection};
