//! Attribution map computation.

use burn::prelude::*;
use ndarray::Array2;
use saliency_core::{Result, SaliencyError};
use serde::{Deserialize, Serialize};

/// Denominator floor used when a map has no spread.
pub const NORMALIZE_EPS: f32 = 1e-8;

/// Attribution map over an activation grid.
#[derive(Debug, Clone)]
pub struct AttributionMap<B: Backend> {
    /// The attribution values, `(batch, 1, height, width)`.
    pub values: Tensor<B, 4>,
    /// Target class (for classification).
    pub target_class: Option<usize>,
}

impl<B: Backend> AttributionMap<B> {
    /// Create a new attribution map.
    pub fn new(values: Tensor<B, 4>) -> Self {
        Self {
            values,
            target_class: None,
        }
    }

    /// Set the target class.
    pub fn with_target_class(mut self, class: usize) -> Self {
        self.target_class = Some(class);
        self
    }

    /// Get the shape of the attribution map.
    pub fn shape(&self) -> [usize; 4] {
        self.values.dims()
    }

    /// Min-max normalize the attribution values to [0, 1].
    ///
    /// A constant map becomes all zeros.
    pub fn normalize(&self) -> Self {
        let min_val: f32 = self.values.clone().min().into_scalar().elem();
        let max_val: f32 = self.values.clone().max().into_scalar().elem();
        let range = max_val - min_val;

        let denom = if range > 0.0 { range } else { range + NORMALIZE_EPS };
        let normalized = (self.values.clone() - min_val) / denom;

        Self {
            values: normalized,
            target_class: self.target_class,
        }
    }

    /// Copy a single-sample map to the host as a [`Heatmap`].
    pub fn to_heatmap(&self, layer: impl Into<String>) -> Result<Heatmap> {
        let [batch, channels, height, width] = self.shape();
        if batch != 1 || channels != 1 {
            return Err(SaliencyError::invalid_parameter(
                "attribution shape",
                format!("{:?}", self.shape()),
                "expected a single-sample, single-channel map",
            ));
        }
        let target_class = self.target_class.ok_or_else(|| {
            SaliencyError::invalid_parameter("target_class", "none", "attribution map has no target class")
        })?;

        let data: Vec<f32> = self
            .values
            .clone()
            .into_data()
            .to_vec()
            .map_err(|e| SaliencyError::CaptureFailure(format!("cannot read attribution values: {:?}", e)))?;
        let values = Array2::from_shape_vec((height, width), data)
            .map_err(|e| SaliencyError::CaptureFailure(format!("attribution values: {}", e)))?;

        Ok(Heatmap {
            values,
            target_class,
            layer: layer.into(),
        })
    }
}

/// Compute GradCAM attribution for CNN models.
///
/// # Arguments
///
/// * `activations` - Activations from a spatial layer (batch, channels, height, width)
/// * `gradients` - Gradients w.r.t. activations (batch, channels, height, width)
///
/// # Returns
///
/// Attribution map of shape (batch, 1, height, width), before normalization.
pub fn grad_cam<B: Backend>(activations: Tensor<B, 4>, gradients: Tensor<B, 4>) -> AttributionMap<B> {
    // Global average pool the gradients: (batch, channels, h, w) -> (batch, channels, 1, 1)
    let weights = gradients.mean_dim(3).mean_dim(2);

    let weighted = activations * weights;

    // Sum across channels: -> (batch, 1, h, w)
    let cam = weighted.sum_dim(1);

    // ReLU
    let cam = cam.clamp_min(0.0);

    AttributionMap::new(cam)
}

/// Normalized class-discriminative heatmap on the activation grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heatmap {
    /// Values in [0, 1], indexed `[row, column]`.
    pub values: Array2<f32>,
    /// Class the map explains.
    pub target_class: usize,
    /// Layer the map was taken from.
    pub layer: String,
}

impl Heatmap {
    /// `(height, width)` of the grid.
    pub fn dims(&self) -> (usize, usize) {
        self.values.dim()
    }

    /// Smallest value.
    pub fn min(&self) -> f32 {
        self.values.iter().copied().fold(f32::INFINITY, f32::min)
    }

    /// Largest value.
    pub fn max(&self) -> f32 {
        self.values.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    /// Value at `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        self.values.get((row, col)).copied()
    }
}
