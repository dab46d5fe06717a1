//! End-to-end classification and explanation runs.

use std::path::{Path, PathBuf};

use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use image::RgbImage;
use saliency_core::{
    DeviceKind, ImageClassifier, ModelSize, PipelineConfig, Result, SaliencyError, DEFAULT_ALPHA, DEFAULT_TOP_K,
};
use saliency_explain::{GradCam, LayerSelection};
use saliency_models::load_pretrained;
use saliency_vision::{load_image, OverlayRenderer, Preprocessor};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::inference::{ClassScore, InferenceEngine};

/// Name of the JSON summary written next to the overlays.
pub const REPORT_FILE: &str = "predictions.json";

/// Make a class name safe to embed in a file name.
///
/// Whitespace and characters reserved on common file systems become `_`.
pub fn sanitize_class_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_whitespace() || matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') {
                '_'
            } else {
                c
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

/// File name of the overlay for the class at `rank` (1-based).
pub fn artifact_name(rank: usize, class_name: &str) -> String {
    format!("gradcam_top{}_{}.png", rank, sanitize_class_name(class_name))
}

/// One persisted overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// 1-based rank of the explained class.
    pub rank: usize,
    /// Explained class index.
    pub class_id: usize,
    /// Explained class name.
    pub class_name: String,
    /// Layer the heatmap was taken from.
    pub layer: String,
    /// Heatmap grid `(height, width)` before upsampling.
    pub heatmap_size: (usize, usize),
    /// Where the overlay was written.
    pub path: PathBuf,
}

/// Summary of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Source image `(width, height)`.
    pub image_size: (u32, u32),
    /// Ranked predictions.
    pub predictions: Vec<ClassScore>,
    /// Written overlays, in rank order.
    pub artifacts: Vec<Artifact>,
}

impl RunReport {
    /// Ranked listing of class names and confidences.
    pub fn listing(&self) -> String {
        let mut out = format!("Top-{} Predictions:\n", self.predictions.len());
        for score in &self.predictions {
            out.push_str(&format!("{:>25}: {:.4}\n", score.class_name, score.probability));
        }
        out
    }

    /// Write the report as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SaliencyError::Io(std::io::Error::other(e)))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Read a report written by [`save`](Self::save).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| SaliencyError::Io(std::io::Error::other(e)))
    }
}

/// Preprocess, classify, explain the top-K classes and persist overlays.
pub struct Pipeline<B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    engine: InferenceEngine<B, M>,
    preprocessor: Preprocessor,
    explainer: GradCam,
    renderer: OverlayRenderer,
    top_k: usize,
    output_dir: PathBuf,
    device: B::Device,
}

impl<B, M> Pipeline<B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + ImageClassifier<B>,
    M::InnerModule: ImageClassifier<B::InnerBackend>,
{
    /// Pipeline with default top-K, blend factor and layer selection, writing to `output/`.
    pub fn new(engine: InferenceEngine<B, M>, preprocessor: Preprocessor, device: B::Device) -> Result<Self> {
        Ok(Self {
            engine,
            preprocessor,
            explainer: GradCam::new(),
            renderer: OverlayRenderer::new(DEFAULT_ALPHA)?,
            top_k: DEFAULT_TOP_K,
            output_dir: PathBuf::from("output"),
            device,
        })
    }

    /// Pipeline following the output, top-K, alpha and layer settings of `config`.
    pub fn from_config(
        config: &PipelineConfig,
        engine: InferenceEngine<B, M>,
        preprocessor: Preprocessor,
        device: B::Device,
    ) -> Result<Self> {
        config.check_parameters()?;
        Ok(Self::new(engine, preprocessor, device)?
            .with_top_k(config.top_k)
            .with_renderer(OverlayRenderer::new(config.alpha)?)
            .with_explainer(GradCam::with_selection(LayerSelection::from_name(
                config.target_layer.as_deref(),
            )))
            .with_output_dir(&config.output_dir))
    }

    /// Set the number of classes to explain.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Set the explainer.
    pub fn with_explainer(mut self, explainer: GradCam) -> Self {
        self.explainer = explainer;
        self
    }

    /// Set the overlay renderer.
    pub fn with_renderer(mut self, renderer: OverlayRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    /// Set the directory overlays are written to.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Run on an image file.
    pub fn run_path(&self, path: impl AsRef<Path>) -> Result<RunReport> {
        let image = load_image(path)?;
        self.run_image(&image)
    }

    /// Run on a decoded image.
    pub fn run_image(&self, image: &RgbImage) -> Result<RunReport> {
        let input = self.preprocessor.to_tensor::<B>(image, &self.device)?;
        let classification = self.engine.classify(&input, self.top_k)?;

        std::fs::create_dir_all(&self.output_dir)?;

        let mut artifacts = Vec::with_capacity(classification.top.len());
        for score in &classification.top {
            info!(rank = score.rank, class = %score.class_name, "generating Grad-CAM");
            let heatmap = self.engine.explain(&self.explainer, &input, score.class_id)?;
            let overlay = self.renderer.render(image, &heatmap)?;

            let path = self.output_dir.join(artifact_name(score.rank, &score.class_name));
            overlay
                .save(&path)
                .map_err(|e| SaliencyError::Io(std::io::Error::other(format!("{}: {}", path.display(), e))))?;
            info!(path = %path.display(), "saved overlay");

            artifacts.push(Artifact {
                rank: score.rank,
                class_id: score.class_id,
                class_name: score.class_name.clone(),
                layer: heatmap.layer.clone(),
                heatmap_size: heatmap.dims(),
                path,
            });
        }

        let report = RunReport {
            image_size: image.dimensions(),
            predictions: classification.top,
            artifacts,
        };
        report.save(self.output_dir.join(REPORT_FILE))?;
        Ok(report)
    }
}

/// Load the configured model on `device` and run on `image`.
pub fn run_on<B: AutodiffBackend>(config: &PipelineConfig, image: &RgbImage, device: B::Device) -> Result<RunReport> {
    let pretrained = load_pretrained::<B>(config.model_size, &config.weights_dir, &device)?;
    let engine = InferenceEngine::new(pretrained.model, pretrained.labels)?;
    let preprocessor = Preprocessor::for_size(config.model_size);
    Pipeline::from_config(config, engine, preprocessor, device)?.run_image(image)
}

/// Run the whole pipeline described by `config`.
pub fn run(config: &PipelineConfig) -> Result<RunReport> {
    info!(model_size = %config.model_size, "using model size");
    info!(device = %config.device, "using device");
    info!(image = %config.image_path.display(), "using image path");

    config.check_parameters()?;
    config.device.ensure_available()?;
    let image = load_image(&config.image_path)?;

    match config.device {
        DeviceKind::Cpu => run_cpu(config, &image),
        DeviceKind::Cuda | DeviceKind::Mps => run_accelerated(config, &image),
    }
}

#[cfg(feature = "backend-ndarray")]
fn run_cpu(config: &PipelineConfig, image: &RgbImage) -> Result<RunReport> {
    use saliency_core::backend::{Autodiff, NdArray, NdArrayDevice};
    run_on::<Autodiff<NdArray>>(config, image, NdArrayDevice::Cpu)
}

#[cfg(not(feature = "backend-ndarray"))]
fn run_cpu(_config: &PipelineConfig, _image: &RgbImage) -> Result<RunReport> {
    Err(SaliencyError::DeviceUnavailable(
        "cpu backend not compiled in (enable the backend-ndarray feature)".to_string(),
    ))
}

#[cfg(feature = "backend-tch")]
fn run_accelerated(config: &PipelineConfig, image: &RgbImage) -> Result<RunReport> {
    use saliency_core::backend::{Autodiff, LibTorch, LibTorchDevice};
    let device = match config.device {
        DeviceKind::Mps => LibTorchDevice::Mps,
        _ => LibTorchDevice::Cuda(0),
    };
    run_on::<Autodiff<LibTorch>>(config, image, device)
}

#[cfg(not(feature = "backend-tch"))]
fn run_accelerated(config: &PipelineConfig, _image: &RgbImage) -> Result<RunReport> {
    tracing::warn!(device = %config.device, "accelerator requested without the backend-tch feature");
    Err(SaliencyError::DeviceUnavailable(format!(
        "{} requires the backend-tch feature",
        config.device
    )))
}

/// Convert torchvision weights for `size` into a Burn record under `weights_dir`.
///
/// Conversion runs on the CPU backend; the record loads on any device.
#[cfg(feature = "backend-ndarray")]
pub fn convert_weights(size: ModelSize, input: &Path, weights_dir: &Path) -> Result<PathBuf> {
    use saliency_core::backend::{NdArray, NdArrayDevice};
    saliency_models::convert_torchvision::<NdArray>(size, input, weights_dir, &NdArrayDevice::Cpu)
}

/// Convert torchvision weights for `size` into a Burn record under `weights_dir`.
#[cfg(not(feature = "backend-ndarray"))]
pub fn convert_weights(_size: ModelSize, _input: &Path, _weights_dir: &Path) -> Result<PathBuf> {
    Err(SaliencyError::DeviceUnavailable(
        "weight conversion needs the backend-ndarray feature".to_string(),
    ))
}
