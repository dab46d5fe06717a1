//! Classification with probability ranking.

use burn::module::{AutodiffModule, Module};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use saliency_core::{ImageClassifier, Result, SaliencyError};
use saliency_explain::{GradCam, Heatmap};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One ranked prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassScore {
    /// 1-based rank.
    pub rank: usize,
    /// Class index into the label set.
    pub class_id: usize,
    /// Human-readable class name.
    pub class_name: String,
    /// Softmax probability.
    pub probability: f32,
}

/// Full probability vector and its top-K ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Probability per class, summing to 1.
    pub probabilities: Vec<f32>,
    /// Highest-probability classes, descending.
    pub top: Vec<ClassScore>,
}

impl Classification {
    /// The most likely class.
    pub fn best(&self) -> Option<&ClassScore> {
        self.top.first()
    }
}

/// Indices of the `k` largest values, descending.
///
/// The sort is stable, so equal values keep ascending index order.
pub fn top_k_indices(values: &[f32], k: usize) -> Result<Vec<usize>> {
    if k == 0 || k > values.len() {
        return Err(SaliencyError::invalid_parameter(
            "top_k",
            k,
            format!("must lie in 1..={}", values.len()),
        ));
    }
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    order.truncate(k);
    Ok(order)
}

/// Runs a classifier and ranks its predictions.
///
/// Holds the model twice: once without autodiff for plain classification, and
/// once on the autodiff backend (with parameter gradients disabled) for
/// explanations. Both share the same weights.
pub struct InferenceEngine<B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    model: M,
    inner: M::InnerModule,
    labels: Vec<String>,
    _backend: std::marker::PhantomData<B>,
}

impl<B, M> InferenceEngine<B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + ImageClassifier<B>,
    M::InnerModule: ImageClassifier<B::InnerBackend>,
{
    /// Wrap `model` with its label set.
    pub fn new(model: M, labels: Vec<String>) -> Result<Self> {
        if labels.len() != model.num_classes() {
            return Err(SaliencyError::Configuration(format!(
                "{} labels for a model with {} classes",
                labels.len(),
                model.num_classes()
            )));
        }
        let model = model.no_grad();
        let inner = model.valid();
        Ok(Self {
            model,
            inner,
            labels,
            _backend: std::marker::PhantomData,
        })
    }

    /// Number of classes.
    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }

    /// Class name for `class_id`.
    pub fn label(&self, class_id: usize) -> Option<&str> {
        self.labels.get(class_id).map(String::as_str)
    }

    /// The autodiff-side model.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Classify a single preprocessed image `(1, 3, H, W)`, returning the top `k` classes.
    pub fn classify(&self, input: &Tensor<B, 4>, k: usize) -> Result<Classification> {
        let [batch, _, _, _] = input.dims();
        if batch != 1 {
            return Err(SaliencyError::invalid_parameter(
                "batch size",
                batch,
                "classification runs on one image at a time",
            ));
        }
        if k == 0 || k > self.num_classes() {
            return Err(SaliencyError::invalid_parameter(
                "top_k",
                k,
                format!("must lie in 1..={}", self.num_classes()),
            ));
        }

        let probs = self.inner.forward_probs(input.clone().inner());
        let probabilities: Vec<f32> = probs
            .into_data()
            .to_vec()
            .map_err(|e| SaliencyError::CaptureFailure(format!("cannot read probabilities: {:?}", e)))?;

        let top = top_k_indices(&probabilities, k)?
            .into_iter()
            .enumerate()
            .map(|(i, class_id)| ClassScore {
                rank: i + 1,
                class_id,
                class_name: self.labels[class_id].clone(),
                probability: probabilities[class_id],
            })
            .collect::<Vec<_>>();

        if let Some(best) = top.first() {
            debug!(class = %best.class_name, probability = best.probability, "top-1");
        }

        Ok(Classification { probabilities, top })
    }

    /// Grad-CAM heatmap for `class_id` on a single preprocessed image.
    pub fn explain(&self, explainer: &GradCam, input: &Tensor<B, 4>, class_id: usize) -> Result<Heatmap> {
        explainer.explain(&self.model, input.clone(), Some(class_id))
    }
}
