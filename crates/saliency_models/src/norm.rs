//! Batch normalization with frozen statistics.

use burn::module::Param;
use burn::prelude::*;

/// 2D batch normalization that always uses its running statistics.
///
/// Burn's `BatchNorm` switches to batch statistics whenever the backend tracks
/// gradients, which would change the network's behaviour during a Grad-CAM
/// backward pass. This module behaves identically on every backend.
#[derive(Module, Debug)]
pub struct FrozenBatchNorm2d<B: Backend> {
    /// Scale (gamma).
    pub gamma: Param<Tensor<B, 1>>,
    /// Shift (beta).
    pub beta: Param<Tensor<B, 1>>,
    /// Running mean.
    pub running_mean: Param<Tensor<B, 1>>,
    /// Running variance.
    pub running_var: Param<Tensor<B, 1>>,
    #[module(skip)]
    epsilon: f64,
}

impl<B: Backend> FrozenBatchNorm2d<B> {
    /// Create an identity normalization over `channels` channels.
    pub fn new(channels: usize, epsilon: f64, device: &B::Device) -> Self {
        Self {
            gamma: Param::from_tensor(Tensor::ones([channels], device)),
            beta: Param::from_tensor(Tensor::zeros([channels], device)),
            running_mean: Param::from_tensor(Tensor::zeros([channels], device)),
            running_var: Param::from_tensor(Tensor::ones([channels], device)),
            epsilon,
        }
    }

    /// Forward pass on a `(batch, channels, height, width)` tensor.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [channels] = self.gamma.dims();

        let scale = self.gamma.val() / (self.running_var.val() + self.epsilon).sqrt();
        let shift = self.beta.val() - self.running_mean.val() * scale.clone();

        x * scale.reshape([1, channels, 1, 1]) + shift.reshape([1, channels, 1, 1])
    }
}
