//! # saliency_vision
//!
//! Image handling around the classifier.
//!
//! - [`load_image`] and [`Preprocessor`] turn an image file into a model input tensor
//! - [`Colormap`] maps normalized intensities to colours
//! - [`OverlayRenderer`] blends a Grad-CAM heatmap onto the source image

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod colormap;
pub mod overlay;
pub mod preprocess;

pub use colormap::Colormap;
pub use overlay::{blend, check_alpha, colorize, render, upsample, GrayF32Image, OverlayRenderer};
pub use preprocess::{decode_image, load_image, Interpolation, Preprocessor};
