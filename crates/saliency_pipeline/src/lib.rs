//! # saliency_pipeline
//!
//! Sequences preprocessing, classification, Grad-CAM and overlay rendering
//! for one image, and persists the results.
//!
//! ## Example
//!
//! ```rust,ignore
//! use saliency_core::PipelineConfig;
//!
//! let config = PipelineConfig::from_env()?;
//! let report = saliency_pipeline::run(&config)?;
//! print!("{}", report.listing());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod driver;
pub mod inference;

pub use driver::{
    artifact_name, convert_weights, run, run_on, sanitize_class_name, Artifact, Pipeline, RunReport, REPORT_FILE,
};
pub use inference::{top_k_indices, ClassScore, Classification, InferenceEngine};
