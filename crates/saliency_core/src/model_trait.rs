//! Classifier traits used by inference and explanation.
//!
//! A model describes its layers in forward order and reports every spatial
//! activation to a [`LayerObserver`] while running. Observers are passed per
//! call, so nothing stays attached to the model between passes.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

/// Shape class of a layer's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerKind {
    /// Multi-channel 2D activation grid `(batch, channels, height, width)`.
    Spatial,
    /// Pooled or fully-connected output without a spatial grid.
    Flat,
}

/// Description of one layer in forward order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerInfo {
    /// Layer name, unique within the model.
    pub name: String,
    /// Output shape class.
    pub kind: LayerKind,
}

impl LayerInfo {
    /// Describe a spatial layer.
    pub fn spatial(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: LayerKind::Spatial,
        }
    }

    /// Describe a flat layer.
    pub fn flat(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: LayerKind::Flat,
        }
    }

    /// Check if the layer yields a spatial grid.
    pub fn is_spatial(&self) -> bool {
        self.kind == LayerKind::Spatial
    }
}

/// Receives spatial activations during a forward pass.
pub trait LayerObserver<B: Backend> {
    /// Called after the spatial layer at `index` (into [`ImageClassifier::layers`]).
    ///
    /// The returned tensor is what the forward pass continues with.
    fn on_spatial(&mut self, index: usize, activation: Tensor<B, 4>) -> Tensor<B, 4>;
}

/// Observer that passes every activation through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl<B: Backend> LayerObserver<B> for NoopObserver {
    fn on_spatial(&mut self, _index: usize, activation: Tensor<B, 4>) -> Tensor<B, 4> {
        activation
    }
}

/// Image classifier over a fixed label set.
///
/// Implementations must call the observer for each spatial layer listed by
/// [`layers`](Self::layers), in order, with the matching index.
pub trait ImageClassifier<B: Backend> {
    /// Number of output classes.
    fn num_classes(&self) -> usize;

    /// Layers in forward order.
    fn layers(&self) -> Vec<LayerInfo>;

    /// Forward pass reporting spatial activations to `observer`.
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor of shape (batch, 3, height, width)
    ///
    /// # Returns
    ///
    /// Logits tensor of shape (batch, n_classes)
    fn forward_observed(&self, x: Tensor<B, 4>, observer: &mut dyn LayerObserver<B>) -> Tensor<B, 2>;

    /// Forward pass returning logits.
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward_observed(x, &mut NoopObserver)
    }

    /// Forward pass returning probabilities.
    fn forward_probs(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let logits = self.forward(x);
        burn::tensor::activation::softmax(logits, 1)
    }

    /// Index of the last spatial layer, if any.
    fn last_spatial_layer(&self) -> Option<usize> {
        self.layers().iter().rposition(LayerInfo::is_spatial)
    }

    /// Index of the layer called `name`.
    fn layer_index(&self, name: &str) -> Option<usize> {
        self.layers().iter().position(|layer| layer.name == name)
    }
}
