//! Grad-CAM explainer.
//!
//! One explanation is one forward pass and one backward pass from the target
//! class logit. The capture hooks live for exactly that pass and are removed
//! before [`GradCam::explain`] returns, whether or not it succeeds.

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use saliency_core::{ImageClassifier, LayerInfo, Result, SaliencyError};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::activation::CaptureHooks;
use crate::attribution::{grad_cam, Heatmap};

/// Which layer to explain.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LayerSelection {
    /// The spatial layer closest to the classifier head.
    #[default]
    LastSpatial,
    /// A layer by name. It must be spatial.
    Named(String),
}

impl LayerSelection {
    /// Select by name, or the last spatial layer when `name` is `None`.
    pub fn from_name(name: Option<&str>) -> Self {
        match name {
            Some(name) => Self::Named(name.to_string()),
            None => Self::LastSpatial,
        }
    }

    /// Find the selected layer in `layers`, returning its index.
    pub fn resolve(&self, layers: &[LayerInfo]) -> Result<(usize, LayerInfo)> {
        match self {
            Self::LastSpatial => layers
                .iter()
                .rposition(LayerInfo::is_spatial)
                .map(|i| (i, layers[i].clone()))
                .ok_or_else(|| {
                    SaliencyError::NoSpatialLayer(format!(
                        "none of the model's {} layers yields a spatial grid",
                        layers.len()
                    ))
                }),
            Self::Named(name) => {
                let index = layers.iter().position(|l| &l.name == name).ok_or_else(|| {
                    let known: Vec<&str> = layers.iter().map(|l| l.name.as_str()).collect();
                    SaliencyError::Configuration(format!(
                        "unknown layer '{}', model layers are: {}",
                        name,
                        known.join(", ")
                    ))
                })?;
                let layer = &layers[index];
                if !layer.is_spatial() {
                    return Err(SaliencyError::NoSpatialLayer(format!(
                        "layer '{}' does not yield a spatial grid",
                        name
                    )));
                }
                Ok((index, layer.clone()))
            }
        }
    }
}

/// Index of the largest value, first occurrence on ties.
pub fn argmax_first(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Gradient-weighted Class Activation Mapping.
#[derive(Debug, Clone, Default)]
pub struct GradCam {
    selection: LayerSelection,
}

impl GradCam {
    /// Explain the last spatial layer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Explain the layer picked by `selection`.
    pub fn with_selection(selection: LayerSelection) -> Self {
        Self { selection }
    }

    /// Current layer selection.
    pub fn selection(&self) -> &LayerSelection {
        &self.selection
    }

    /// Compute the heatmap for `target_class`, or for the top class when `None`.
    ///
    /// `input` must hold a single preprocessed image `(1, 3, H, W)`. Parameter
    /// gradients are never needed, so callers should pass a model with
    /// [`Module::no_grad`](burn::module::Module::no_grad) applied.
    pub fn explain<B, M>(&self, model: &M, input: Tensor<B, 4>, target_class: Option<usize>) -> Result<Heatmap>
    where
        B: AutodiffBackend,
        M: ImageClassifier<B>,
    {
        let [batch, _, _, _] = input.dims();
        if batch != 1 {
            return Err(SaliencyError::invalid_parameter(
                "batch size",
                batch,
                "Grad-CAM explains one image at a time",
            ));
        }

        let layers = model.layers();
        let (index, layer) = self.selection.resolve(&layers)?;
        trace!(layer = %layer.name, index, "resolved target layer");

        let num_classes = model.num_classes();
        if let Some(class) = target_class {
            if class >= num_classes {
                return Err(SaliencyError::invalid_parameter(
                    "target_class",
                    class,
                    format!("model has {} classes", num_classes),
                ));
            }
        }

        let mut hooks = CaptureHooks::<B>::register(layer.name.clone(), index);
        let logits = model.forward_observed(input, &mut hooks);

        if !hooks.forward_fired() {
            return Err(SaliencyError::CaptureFailure(format!(
                "forward hook on layer '{}' never fired",
                layer.name
            )));
        }

        let target = match target_class {
            Some(class) => class,
            None => {
                let scores: Vec<f32> = logits
                    .clone()
                    .into_data()
                    .to_vec()
                    .map_err(|e| SaliencyError::CaptureFailure(format!("cannot read logits: {:?}", e)))?;
                argmax_first(&scores).ok_or_else(|| {
                    SaliencyError::CaptureFailure("model produced no logits".to_string())
                })?
            }
        };

        let score = logits.slice([0..1, target..target + 1]).sum();
        let grads = score.backward();
        hooks.capture_gradients(&grads);
        let pass = hooks.remove()?;

        let dims = pass.activation.dims();
        debug!(layer = %pass.layer, target, grid = ?&dims[2..], "grad-cam pass captured");

        grad_cam(pass.activation, pass.gradient)
            .with_target_class(target)
            .normalize()
            .to_heatmap(pass.layer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use saliency_core::backend::{Autodiff, NdArray};
    use saliency_core::LayerObserver;

    type B = Autodiff<NdArray>;

    /// features (identity) -> global average pool -> fixed linear map.
    ///
    /// For class `c` the channel weight is `W[c, k] / (H * W)`.
    struct PooledLinear {
        weight: Tensor<B, 2>,
    }

    impl PooledLinear {
        fn new(weight: Vec<f32>, classes: usize, channels: usize) -> Self {
            let weight = Tensor::from_data(TensorData::new(weight, [classes, channels]), &Default::default());
            Self { weight }
        }
    }

    impl ImageClassifier<B> for PooledLinear {
        fn num_classes(&self) -> usize {
            self.weight.dims()[0]
        }

        fn layers(&self) -> Vec<LayerInfo> {
            vec![
                LayerInfo::spatial("features"),
                LayerInfo::flat("pool"),
                LayerInfo::flat("fc"),
            ]
        }

        fn forward_observed(&self, x: Tensor<B, 4>, observer: &mut dyn LayerObserver<B>) -> Tensor<B, 2> {
            let act = observer.on_spatial(0, x);
            let [b, c, _, _] = act.dims();
            let pooled = act.mean_dim(3).mean_dim(2).reshape([b, c]);
            pooled.matmul(self.weight.clone().transpose())
        }
    }

    /// Only pooled and dense layers.
    struct FlatOnly;

    impl ImageClassifier<B> for FlatOnly {
        fn num_classes(&self) -> usize {
            2
        }

        fn layers(&self) -> Vec<LayerInfo> {
            vec![LayerInfo::flat("pool"), LayerInfo::flat("fc")]
        }

        fn forward_observed(&self, x: Tensor<B, 4>, _observer: &mut dyn LayerObserver<B>) -> Tensor<B, 2> {
            let [b, c, _, _] = x.dims();
            x.mean_dim(3).mean_dim(2).reshape([b, c])
        }
    }

    /// Claims a spatial layer but never reports it.
    struct SilentSpatial;

    impl ImageClassifier<B> for SilentSpatial {
        fn num_classes(&self) -> usize {
            2
        }

        fn layers(&self) -> Vec<LayerInfo> {
            vec![LayerInfo::spatial("features"), LayerInfo::flat("pool")]
        }

        fn forward_observed(&self, x: Tensor<B, 4>, _observer: &mut dyn LayerObserver<B>) -> Tensor<B, 2> {
            let [b, c, _, _] = x.dims();
            x.mean_dim(3).mean_dim(2).reshape([b, c])
        }
    }

    /// Reports its spatial layer but continues from the original tensor.
    struct DetachedSpatial {
        weight: Tensor<B, 2>,
    }

    impl ImageClassifier<B> for DetachedSpatial {
        fn num_classes(&self) -> usize {
            self.weight.dims()[0]
        }

        fn layers(&self) -> Vec<LayerInfo> {
            vec![LayerInfo::spatial("features"), LayerInfo::flat("fc")]
        }

        fn forward_observed(&self, x: Tensor<B, 4>, observer: &mut dyn LayerObserver<B>) -> Tensor<B, 2> {
            let _ = observer.on_spatial(0, x.clone());
            let [b, c, _, _] = x.dims();
            let pooled = x.mean_dim(3).mean_dim(2).reshape([b, c]);
            pooled.matmul(self.weight.clone().transpose())
        }
    }

    fn input(values: Vec<f32>, shape: [usize; 4]) -> Tensor<B, 4> {
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    #[test]
    fn test_argmax_first_ties() {
        assert_eq!(argmax_first(&[0.1, 0.7, 0.7, 0.2]), Some(1));
        assert_eq!(argmax_first(&[3.0, 3.0]), Some(0));
        assert_eq!(argmax_first(&[]), None);
    }

    #[test]
    fn test_resolve_last_spatial() {
        let layers = vec![
            LayerInfo::spatial("stem"),
            LayerInfo::spatial("head"),
            LayerInfo::flat("pool"),
        ];
        let (index, layer) = LayerSelection::LastSpatial.resolve(&layers).unwrap();
        assert_eq!(index, 1);
        assert_eq!(layer.name, "head");
    }

    #[test]
    fn test_resolve_named() {
        let layers = vec![LayerInfo::spatial("stem"), LayerInfo::spatial("head"), LayerInfo::flat("fc")];

        let (index, _) = LayerSelection::from_name(Some("stem")).resolve(&layers).unwrap();
        assert_eq!(index, 0);

        let err = LayerSelection::from_name(Some("fc")).resolve(&layers).unwrap_err();
        assert!(matches!(err, SaliencyError::NoSpatialLayer(_)));

        let err = LayerSelection::from_name(Some("stage9")).resolve(&layers).unwrap_err();
        assert!(matches!(err, SaliencyError::Configuration(_)));
    }

    #[test]
    fn test_explain_matches_analytic_cam() {
        // Channel 0 lights the left column, channel 1 the right column.
        let x = input(vec![4.0, 0.0, 2.0, 0.0, 0.0, 1.0, 0.0, 3.0], [1, 2, 2, 2]);
        // Class 0 favours channel 0, class 1 favours channel 1.
        let model = PooledLinear::new(vec![1.0, -0.5, -0.5, 2.0], 2, 2);

        let heatmap = GradCam::new().explain(&model, x.clone(), Some(0)).unwrap();
        assert_eq!(heatmap.dims(), (2, 2));
        assert_eq!(heatmap.target_class, 0);
        assert_eq!(heatmap.layer, "features");

        // raw cam = relu(0.25 * ch0 - 0.125 * ch1) = [[1, 0], [0.5, 0]]
        let expected = [[1.0, 0.0], [0.5, 0.0]];
        for (r, row) in expected.iter().enumerate() {
            for (c, &v) in row.iter().enumerate() {
                assert!((heatmap.get(r, c).unwrap() - v).abs() < 1e-5, "({}, {})", r, c);
            }
        }

        // raw cam = relu(-0.125 * ch0 + 0.5 * ch1) = [[0, 0.5], [0, 1.5]]
        let heatmap = GradCam::new().explain(&model, x, Some(1)).unwrap();
        let expected = [[0.0, 1.0 / 3.0], [0.0, 1.0]];
        for (r, row) in expected.iter().enumerate() {
            for (c, &v) in row.iter().enumerate() {
                assert!((heatmap.get(r, c).unwrap() - v).abs() < 1e-5, "({}, {})", r, c);
            }
        }
    }

    #[test]
    fn test_explain_defaults_to_top_class() {
        let x = input(vec![4.0, 0.0, 2.0, 0.0, 0.0, 1.0, 0.0, 3.0], [1, 2, 2, 2]);
        // logits: class 0 = 1.5 - 0.5 = 1.0, class 1 = -0.75 + 2.0 = 1.25
        let model = PooledLinear::new(vec![1.0, -0.5, -0.5, 2.0], 2, 2);
        let heatmap = GradCam::new().explain(&model, x, None).unwrap();
        assert_eq!(heatmap.target_class, 1);
    }

    #[test]
    fn test_heatmap_range() {
        let values: Vec<f32> = (0..3 * 4 * 5).map(|i| ((i * 7) % 11) as f32).collect();
        let x = input(values, [1, 3, 4, 5]);
        let model = PooledLinear::new(vec![0.3, -0.2, 0.9, 1.0, 1.0, -1.0], 2, 3);

        let heatmap = GradCam::new().explain(&model, x, Some(0)).unwrap();
        assert_eq!(heatmap.dims(), (4, 5));
        assert_eq!(heatmap.min(), 0.0);
        assert!((heatmap.max() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_map_is_zero() {
        // Every channel weight is negative over non-negative activations.
        let x = input(vec![1.0; 8], [1, 2, 2, 2]);
        let model = PooledLinear::new(vec![-1.0, -1.0, 1.0, 1.0], 2, 2);

        let heatmap = GradCam::new().explain(&model, x, Some(0)).unwrap();
        assert!(heatmap.values.iter().all(|v| v.is_finite() && *v == 0.0));
    }

    #[test]
    fn test_repeated_explanations_agree() {
        let x = input(vec![4.0, 0.0, 2.0, 0.0, 0.0, 1.0, 0.0, 3.0], [1, 2, 2, 2]);
        let model = PooledLinear::new(vec![1.0, -0.5, -0.5, 2.0], 2, 2);
        let explainer = GradCam::new();

        let first = explainer.explain(&model, x.clone(), Some(0)).unwrap();
        let _other = explainer.explain(&model, x.clone(), Some(1)).unwrap();
        let again = explainer.explain(&model, x, Some(0)).unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn test_no_spatial_layer() {
        let x = input(vec![1.0; 8], [1, 2, 2, 2]);
        let err = GradCam::new().explain(&FlatOnly, x, None).unwrap_err();
        assert!(matches!(err, SaliencyError::NoSpatialLayer(_)));
    }

    #[test]
    fn test_forward_hook_never_fires() {
        let x = input(vec![1.0; 8], [1, 2, 2, 2]);
        let err = GradCam::new().explain(&SilentSpatial, x, None).unwrap_err();
        assert!(matches!(err, SaliencyError::CaptureFailure(_)));
    }

    #[test]
    fn test_backward_hook_never_fires() {
        let weight = Tensor::<B, 2>::from_data(TensorData::new(vec![1.0f32, 0.0, 0.0, 1.0], [2, 2]), &Default::default())
            .require_grad();
        let model = DetachedSpatial { weight };
        let x = input(vec![1.0; 8], [1, 2, 2, 2]);

        let err = GradCam::new().explain(&model, x, Some(0)).unwrap_err();
        assert!(matches!(err, SaliencyError::CaptureFailure(_)));
        assert!(err.to_string().contains("backward"));
    }

    #[test]
    fn test_target_class_out_of_range() {
        let model = PooledLinear::new(vec![1.0, 0.0, 0.0, 1.0], 2, 2);
        let x = input(vec![1.0; 8], [1, 2, 2, 2]);
        let err = GradCam::new().explain(&model, x, Some(2)).unwrap_err();
        assert!(matches!(err, SaliencyError::InvalidParameter { .. }));
    }

    #[test]
    fn test_rejects_batches() {
        let model = PooledLinear::new(vec![1.0, 0.0, 0.0, 1.0], 2, 2);
        let x = input(vec![1.0; 16], [2, 2, 2, 2]);
        let err = GradCam::new().explain(&model, x, Some(0)).unwrap_err();
        assert!(matches!(err, SaliencyError::InvalidParameter { .. }));
    }
}
