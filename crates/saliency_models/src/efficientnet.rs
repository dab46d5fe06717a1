//! EfficientNetV2 image classifier.
//!
//! Stage tables follow "EfficientNetV2: Smaller Models and Faster Training"
//! (Tan & Le, ICML 2021) for the S and L variants trained on ImageNet-1K.
//! Only inference is supported: dropout and stochastic depth are identities
//! and batch normalization uses frozen running statistics.

use burn::nn::{
    conv::{Conv2d, Conv2dConfig},
    pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
    Linear, LinearConfig, PaddingConfig2d,
};
use burn::prelude::*;
use burn::tensor::activation::{sigmoid, silu};
use saliency_core::{ImageClassifier, LayerInfo, LayerObserver, ModelSize};
use serde::{Deserialize, Serialize};

use crate::norm::FrozenBatchNorm2d;

/// Number of ImageNet-1K classes.
pub const IMAGENET_CLASSES: usize = 1000;

/// Inverted-residual block flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockType {
    /// Expansion and depthwise convolutions fused into one regular convolution.
    FusedMBConv,
    /// 1x1 expansion, depthwise convolution and squeeze-excitation.
    MBConv,
}

/// Configuration of one stage of repeated blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Block flavour.
    pub block: BlockType,
    /// Channel expansion ratio.
    pub expand_ratio: usize,
    /// Kernel size of the spatial convolution.
    pub kernel_size: usize,
    /// Stride of the first block.
    pub stride: usize,
    /// Input channels of the first block.
    pub in_channels: usize,
    /// Output channels of every block.
    pub out_channels: usize,
    /// Number of blocks.
    pub num_layers: usize,
}

impl StageConfig {
    const fn new(
        block: BlockType,
        expand_ratio: usize,
        kernel_size: usize,
        stride: usize,
        in_channels: usize,
        out_channels: usize,
        num_layers: usize,
    ) -> Self {
        Self {
            block,
            expand_ratio,
            kernel_size,
            stride,
            in_channels,
            out_channels,
            num_layers,
        }
    }
}

/// Configuration for [`EfficientNetV2`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficientNetV2Config {
    /// Output channels of the stem convolution.
    pub stem_channels: usize,
    /// Block stages in forward order.
    pub stages: Vec<StageConfig>,
    /// Output channels of the 1x1 head convolution.
    pub head_channels: usize,
    /// Number of output classes.
    pub num_classes: usize,
    /// Batch norm epsilon.
    pub bn_eps: f64,
}

impl Default for EfficientNetV2Config {
    fn default() -> Self {
        Self::small()
    }
}

impl EfficientNetV2Config {
    /// EfficientNetV2-S.
    pub fn small() -> Self {
        use BlockType::*;
        Self {
            stem_channels: 24,
            stages: vec![
                StageConfig::new(FusedMBConv, 1, 3, 1, 24, 24, 2),
                StageConfig::new(FusedMBConv, 4, 3, 2, 24, 48, 4),
                StageConfig::new(FusedMBConv, 4, 3, 2, 48, 64, 4),
                StageConfig::new(MBConv, 4, 3, 2, 64, 128, 6),
                StageConfig::new(MBConv, 6, 3, 1, 128, 160, 9),
                StageConfig::new(MBConv, 6, 3, 2, 160, 256, 15),
            ],
            head_channels: 1280,
            num_classes: IMAGENET_CLASSES,
            bn_eps: 1e-3,
        }
    }

    /// EfficientNetV2-L.
    pub fn large() -> Self {
        use BlockType::*;
        Self {
            stem_channels: 32,
            stages: vec![
                StageConfig::new(FusedMBConv, 1, 3, 1, 32, 32, 4),
                StageConfig::new(FusedMBConv, 4, 3, 2, 32, 64, 7),
                StageConfig::new(FusedMBConv, 4, 3, 2, 64, 96, 7),
                StageConfig::new(MBConv, 4, 3, 2, 96, 192, 10),
                StageConfig::new(MBConv, 6, 3, 1, 192, 224, 19),
                StageConfig::new(MBConv, 6, 3, 2, 224, 384, 25),
                StageConfig::new(MBConv, 6, 3, 1, 384, 640, 7),
            ],
            head_channels: 1280,
            num_classes: IMAGENET_CLASSES,
            bn_eps: 1e-3,
        }
    }

    /// A few-thousand-parameter network with the same block structure.
    ///
    /// Useful for tests and smoke runs where pretrained weights are absent.
    pub fn tiny(num_classes: usize) -> Self {
        use BlockType::*;
        Self {
            stem_channels: 8,
            stages: vec![
                StageConfig::new(FusedMBConv, 1, 3, 1, 8, 8, 1),
                StageConfig::new(FusedMBConv, 2, 3, 2, 8, 16, 1),
                StageConfig::new(MBConv, 2, 3, 2, 16, 24, 2),
            ],
            head_channels: 32,
            num_classes,
            bn_eps: 1e-3,
        }
    }

    /// Stage table for a pretrained variant.
    pub fn for_size(size: ModelSize) -> Self {
        match size {
            ModelSize::Small => Self::small(),
            ModelSize::Large => Self::large(),
        }
    }

    /// Set the number of classes.
    pub fn with_num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = num_classes;
        self
    }

    /// Total spatial downsampling factor (stem stride times stage strides).
    pub fn output_stride(&self) -> usize {
        self.stages.iter().fold(2, |acc, stage| acc * stage.stride)
    }

    /// Layers of the model this config builds, without building it.
    pub fn layers(&self) -> Vec<LayerInfo> {
        layer_list(self.stages.len())
    }

    /// Initialize the model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> EfficientNetV2<B> {
        EfficientNetV2::new(self.clone(), device)
    }
}

/// Convolution, frozen batch norm and optional SiLU.
#[derive(Module, Debug)]
struct ConvNormAct<B: Backend> {
    conv: Conv2d<B>,
    bn: FrozenBatchNorm2d<B>,
    #[module(skip)]
    activation: bool,
}

impl<B: Backend> ConvNormAct<B> {
    #[allow(clippy::too_many_arguments)]
    fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        groups: usize,
        activation: bool,
        bn_eps: f64,
        device: &B::Device,
    ) -> Self {
        let padding = (kernel_size - 1) / 2;
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_groups(groups)
            .with_bias(false)
            .init(device);
        let bn = FrozenBatchNorm2d::new(out_channels, bn_eps, device);

        Self {
            conv,
            bn,
            activation,
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.bn.forward(self.conv.forward(x));
        if self.activation {
            silu(out)
        } else {
            out
        }
    }
}

/// Squeeze-and-excitation channel gate.
#[derive(Module, Debug)]
struct SqueezeExcite<B: Backend> {
    pool: AdaptiveAvgPool2d,
    fc1: Conv2d<B>,
    fc2: Conv2d<B>,
}

impl<B: Backend> SqueezeExcite<B> {
    fn new(channels: usize, squeeze_channels: usize, device: &B::Device) -> Self {
        Self {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc1: Conv2dConfig::new([channels, squeeze_channels], [1, 1]).init(device),
            fc2: Conv2dConfig::new([squeeze_channels, channels], [1, 1]).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let scale = self.pool.forward(x.clone());
        let scale = silu(self.fc1.forward(scale));
        let scale = sigmoid(self.fc2.forward(scale));
        x * scale
    }
}

/// Inverted-residual block (fused or not).
#[derive(Module, Debug)]
struct InvertedResidual<B: Backend> {
    expand: Option<ConvNormAct<B>>,
    depthwise: Option<ConvNormAct<B>>,
    se: Option<SqueezeExcite<B>>,
    project: ConvNormAct<B>,
    #[module(skip)]
    residual: bool,
}

impl<B: Backend> InvertedResidual<B> {
    #[allow(clippy::too_many_arguments)]
    fn new(
        block: BlockType,
        expand_ratio: usize,
        kernel_size: usize,
        stride: usize,
        in_channels: usize,
        out_channels: usize,
        bn_eps: f64,
        device: &B::Device,
    ) -> Self {
        let expanded = in_channels * expand_ratio;
        let residual = stride == 1 && in_channels == out_channels;

        match block {
            BlockType::FusedMBConv if expanded == in_channels => Self {
                expand: None,
                depthwise: None,
                se: None,
                project: ConvNormAct::new(
                    in_channels, out_channels, kernel_size, stride, 1, true, bn_eps, device,
                ),
                residual,
            },
            BlockType::FusedMBConv => Self {
                expand: Some(ConvNormAct::new(
                    in_channels, expanded, kernel_size, stride, 1, true, bn_eps, device,
                )),
                depthwise: None,
                se: None,
                project: ConvNormAct::new(expanded, out_channels, 1, 1, 1, false, bn_eps, device),
                residual,
            },
            BlockType::MBConv => {
                let expand = (expanded != in_channels).then(|| {
                    ConvNormAct::new(in_channels, expanded, 1, 1, 1, true, bn_eps, device)
                });
                let squeeze = (in_channels / 4).max(1);

                Self {
                    expand,
                    depthwise: Some(ConvNormAct::new(
                        expanded, expanded, kernel_size, stride, expanded, true, bn_eps, device,
                    )),
                    se: Some(SqueezeExcite::new(expanded, squeeze, device)),
                    project: ConvNormAct::new(expanded, out_channels, 1, 1, 1, false, bn_eps, device),
                    residual,
                }
            }
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut out = x.clone();
        if let Some(expand) = &self.expand {
            out = expand.forward(out);
        }
        if let Some(depthwise) = &self.depthwise {
            out = depthwise.forward(out);
        }
        if let Some(se) = &self.se {
            out = se.forward(out);
        }
        let out = self.project.forward(out);

        if self.residual {
            out + x
        } else {
            out
        }
    }
}

/// A stage of blocks sharing an output width.
#[derive(Module, Debug)]
struct Stage<B: Backend> {
    blocks: Vec<InvertedResidual<B>>,
}

impl<B: Backend> Stage<B> {
    fn new(config: &StageConfig, bn_eps: f64, device: &B::Device) -> Self {
        let blocks = (0..config.num_layers)
            .map(|i| {
                let (in_channels, stride) = if i == 0 {
                    (config.in_channels, config.stride)
                } else {
                    (config.out_channels, 1)
                };
                InvertedResidual::new(
                    config.block,
                    config.expand_ratio,
                    config.kernel_size,
                    stride,
                    in_channels,
                    config.out_channels,
                    bn_eps,
                    device,
                )
            })
            .collect();

        Self { blocks }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(x, |out, block| block.forward(out))
    }
}

fn layer_list(num_stages: usize) -> Vec<LayerInfo> {
    let mut layers = Vec::with_capacity(num_stages + 4);
    layers.push(LayerInfo::spatial("stem"));
    for i in 0..num_stages {
        layers.push(LayerInfo::spatial(format!("stage{}", i + 1)));
    }
    layers.push(LayerInfo::spatial("head"));
    layers.push(LayerInfo::flat("pool"));
    layers.push(LayerInfo::flat("classifier"));
    layers
}

/// EfficientNetV2 classifier.
///
/// Layers, in forward order: `stem`, `stage1`..`stageN`, `head` (spatial),
/// then `pool` and `classifier` (flat).
#[derive(Module, Debug)]
pub struct EfficientNetV2<B: Backend> {
    stem: ConvNormAct<B>,
    stages: Vec<Stage<B>>,
    head: ConvNormAct<B>,
    pool: AdaptiveAvgPool2d,
    classifier: Linear<B>,
    #[module(skip)]
    num_classes: usize,
}

impl<B: Backend> EfficientNetV2<B> {
    /// Create a new EfficientNetV2 model with freshly initialized weights.
    pub fn new(config: EfficientNetV2Config, device: &B::Device) -> Self {
        let eps = config.bn_eps;
        let stem = ConvNormAct::new(3, config.stem_channels, 3, 2, 1, true, eps, device);

        let stages: Vec<Stage<B>> = config
            .stages
            .iter()
            .map(|stage| Stage::new(stage, eps, device))
            .collect();

        let last_channels = config
            .stages
            .last()
            .map(|stage| stage.out_channels)
            .unwrap_or(config.stem_channels);
        let head = ConvNormAct::new(last_channels, config.head_channels, 1, 1, 1, true, eps, device);

        let pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let classifier = LinearConfig::new(config.head_channels, config.num_classes).init(device);

        Self {
            stem,
            stages,
            head,
            pool,
            classifier,
            num_classes: config.num_classes,
        }
    }
}

impl<B: Backend> ImageClassifier<B> for EfficientNetV2<B> {
    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn layers(&self) -> Vec<LayerInfo> {
        layer_list(self.stages.len())
    }

    fn forward_observed(&self, x: Tensor<B, 4>, observer: &mut dyn LayerObserver<B>) -> Tensor<B, 2> {
        let mut index = 0;
        let mut out = observer.on_spatial(index, self.stem.forward(x));

        for stage in &self.stages {
            index += 1;
            out = observer.on_spatial(index, stage.forward(out));
        }

        index += 1;
        let out = observer.on_spatial(index, self.head.forward(out));

        let out = self.pool.forward(out);
        let [batch, channels, _, _] = out.dims();
        self.classifier.forward(out.reshape([batch, channels]))
    }
}
