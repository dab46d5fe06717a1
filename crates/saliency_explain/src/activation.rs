//! Activation and gradient capture utilities.
//!
//! [`CaptureHooks`] attaches to one spatial layer for a single forward and
//! backward pass. The forward hook snapshots the layer output and re-roots the
//! rest of the network on a gradient-tracking copy of it. After the backward
//! pass, the gradient of that copy is the gradient flowing into the layer's
//! output. Both snapshots leave the hooks through [`CaptureHooks::remove`];
//! dropping the hooks on any other path discards them.

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use saliency_core::{LayerObserver, Result, SaliencyError};
use tracing::{trace, warn};

/// Activation and gradient of one layer from one forward/backward pass.
#[derive(Debug, Clone)]
pub struct CapturedPass<B: Backend> {
    /// Layer name.
    pub layer: String,
    /// Layer output, `(batch, channels, height, width)`.
    pub activation: Tensor<B, 4>,
    /// Gradient of the target score w.r.t. the layer output, same shape.
    pub gradient: Tensor<B, 4>,
}

/// Forward and backward observation points on one spatial layer.
///
/// Valid for exactly one pass: create with [`register`](Self::register), run
/// the forward pass with the hooks as the [`LayerObserver`], back-propagate,
/// call [`capture_gradients`](Self::capture_gradients), then
/// [`remove`](Self::remove).
#[derive(Debug)]
pub struct CaptureHooks<B: AutodiffBackend> {
    layer: String,
    index: usize,
    activation: Option<Tensor<B::InnerBackend, 4>>,
    gradient: Option<Tensor<B::InnerBackend, 4>>,
    leaf: Option<Tensor<B, 4>>,
}

impl<B: AutodiffBackend> CaptureHooks<B> {
    /// Register hooks on the layer `layer` found at `index` in the model's layer list.
    pub fn register(layer: impl Into<String>, index: usize) -> Self {
        let layer = layer.into();
        trace!(layer = %layer, index, "registering capture hooks");
        Self {
            layer,
            index,
            activation: None,
            gradient: None,
            leaf: None,
        }
    }

    /// Name of the observed layer.
    pub fn layer(&self) -> &str {
        &self.layer
    }

    /// Check if the forward hook has fired.
    pub fn forward_fired(&self) -> bool {
        self.leaf.is_some()
    }

    /// Backward hook: pull the observed layer's gradient out of `grads`.
    ///
    /// Returns `true` if a gradient was found.
    pub fn capture_gradients(&mut self, grads: &B::Gradients) -> bool {
        let Some(leaf) = &self.leaf else {
            return false;
        };
        match leaf.grad(grads) {
            Some(gradient) => {
                self.gradient = Some(gradient);
                true
            }
            None => false,
        }
    }

    /// Deregister the hooks and hand out the captured snapshots.
    ///
    /// Fails with [`SaliencyError::CaptureFailure`] if either hook never fired.
    pub fn remove(mut self) -> Result<CapturedPass<B::InnerBackend>> {
        let activation = self.activation.take().ok_or_else(|| {
            SaliencyError::CaptureFailure(format!(
                "forward hook on layer '{}' never fired",
                self.layer
            ))
        })?;
        let gradient = self.gradient.take().ok_or_else(|| {
            SaliencyError::CaptureFailure(format!(
                "backward hook on layer '{}' never fired",
                self.layer
            ))
        })?;

        if activation.dims() != gradient.dims() {
            return Err(SaliencyError::CaptureFailure(format!(
                "activation {:?} and gradient {:?} of layer '{}' differ in shape",
                activation.dims(),
                gradient.dims(),
                self.layer
            )));
        }

        Ok(CapturedPass {
            layer: std::mem::take(&mut self.layer),
            activation,
            gradient,
        })
    }
}

impl<B: AutodiffBackend> LayerObserver<B> for CaptureHooks<B> {
    fn on_spatial(&mut self, index: usize, activation: Tensor<B, 4>) -> Tensor<B, 4> {
        if index != self.index {
            return activation;
        }
        if self.leaf.is_some() {
            warn!(layer = %self.layer, "forward hook fired twice in one pass; keeping the latest activation");
        }

        self.activation = Some(activation.clone().inner());
        self.gradient = None;
        let leaf = activation.detach().require_grad();
        self.leaf = Some(leaf.clone());
        leaf
    }
}

impl<B: AutodiffBackend> Drop for CaptureHooks<B> {
    fn drop(&mut self) {
        self.leaf = None;
        self.activation = None;
        self.gradient = None;
        trace!(layer = %self.layer, "capture hooks removed");
    }
}
