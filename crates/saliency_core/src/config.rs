//! Validated pipeline configuration.
//!
//! Settings are read once at start-up, validated, and passed to components as
//! a [`PipelineConfig`]. Nothing downstream reads process-wide variables.
//!
//! | Key            | Values                    | Default            |
//! |----------------|---------------------------|--------------------|
//! | `MODEL_SIZE`   | `small` \| `large`        | required           |
//! | `DEVICE`       | `cpu` \| `cuda` \| `mps`  | required           |
//! | `IMAGE_PATH`   | path                      | required           |
//! | `OUTPUT_DIR`   | path                      | `output`           |
//! | `WEIGHTS_DIR`  | path                      | `weights`          |
//! | `TOP_K`        | integer >= 1              | `5`                |
//! | `ALPHA`        | float in `[0, 1]`         | `0.5`              |
//! | `TARGET_LAYER` | layer name                | last spatial layer |

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::device::DeviceKind;
use crate::error::{Result, SaliencyError};

/// Environment key selecting the pretrained variant.
pub const MODEL_SIZE_KEY: &str = "MODEL_SIZE";
/// Environment key selecting the compute backend.
pub const DEVICE_KEY: &str = "DEVICE";
/// Environment key for the input image.
pub const IMAGE_PATH_KEY: &str = "IMAGE_PATH";
/// Environment key for the overlay output directory.
pub const OUTPUT_DIR_KEY: &str = "OUTPUT_DIR";
/// Environment key for the directory holding weights and labels.
pub const WEIGHTS_DIR_KEY: &str = "WEIGHTS_DIR";
/// Environment key for the number of explained classes.
pub const TOP_K_KEY: &str = "TOP_K";
/// Environment key for the overlay blend factor.
pub const ALPHA_KEY: &str = "ALPHA";
/// Environment key for an explicit Grad-CAM layer.
pub const TARGET_LAYER_KEY: &str = "TARGET_LAYER";

/// Default number of predictions to explain.
pub const DEFAULT_TOP_K: usize = 5;
/// Default heatmap opacity.
pub const DEFAULT_ALPHA: f32 = 0.5;

/// Pretrained model variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    /// EfficientNetV2-S.
    Small,
    /// EfficientNetV2-L.
    Large,
}

impl ModelSize {
    /// Parse a model size (`small` or `large`).
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim() {
            "small" => Ok(ModelSize::Small),
            "large" => Ok(ModelSize::Large),
            other => Err(SaliencyError::Configuration(format!(
                "{} must be either 'small' or 'large'. Found: '{}'",
                MODEL_SIZE_KEY, other
            ))),
        }
    }

    /// Lower-case name as accepted by [`ModelSize::parse`].
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSize::Small => "small",
            ModelSize::Large => "large",
        }
    }
}

impl fmt::Display for ModelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw, unvalidated settings as they arrive from the environment or CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawSettings {
    /// `MODEL_SIZE`.
    pub model_size: Option<String>,
    /// `DEVICE`.
    pub device: Option<String>,
    /// `IMAGE_PATH`.
    pub image_path: Option<String>,
    /// `OUTPUT_DIR`.
    pub output_dir: Option<String>,
    /// `WEIGHTS_DIR`.
    pub weights_dir: Option<String>,
    /// `TOP_K`.
    pub top_k: Option<String>,
    /// `ALPHA`.
    pub alpha: Option<String>,
    /// `TARGET_LAYER`.
    pub target_layer: Option<String>,
}

impl RawSettings {
    /// Collect settings through a key lookup function.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            model_size: lookup(MODEL_SIZE_KEY),
            device: lookup(DEVICE_KEY),
            image_path: lookup(IMAGE_PATH_KEY),
            output_dir: lookup(OUTPUT_DIR_KEY),
            weights_dir: lookup(WEIGHTS_DIR_KEY),
            top_k: lookup(TOP_K_KEY),
            alpha: lookup(ALPHA_KEY),
            target_layer: lookup(TARGET_LAYER_KEY),
        }
    }

    /// Validate into a [`PipelineConfig`].
    ///
    /// Checks run in a fixed order (model size, device, image path, then the
    /// optional settings) so the first problem reported is deterministic.
    pub fn validate(self) -> Result<PipelineConfig> {
        let model_size = match self.model_size.as_deref() {
            Some(value) => ModelSize::parse(value)?,
            None => {
                return Err(SaliencyError::Configuration(format!(
                    "{} is not set",
                    MODEL_SIZE_KEY
                )))
            }
        };

        let device = match self.device.as_deref() {
            Some(value) => DeviceKind::parse(value)?,
            None => {
                return Err(SaliencyError::DeviceUnavailable(format!(
                    "{} is not set",
                    DEVICE_KEY
                )))
            }
        };
        device.ensure_available()?;

        let image_path = match self.image_path {
            Some(path) if !path.trim().is_empty() => PathBuf::from(path),
            Some(_) => {
                return Err(SaliencyError::Configuration(format!(
                    "{} is empty",
                    IMAGE_PATH_KEY
                )))
            }
            None => {
                return Err(SaliencyError::Configuration(format!(
                    "{} is not set",
                    IMAGE_PATH_KEY
                )))
            }
        };

        let top_k = match non_blank(self.top_k) {
            Some(value) => value.trim().parse::<usize>().map_err(|_| {
                SaliencyError::Configuration(format!(
                    "{} must be a positive integer. Found: '{}'",
                    TOP_K_KEY, value
                ))
            })?,
            None => DEFAULT_TOP_K,
        };

        let alpha = match non_blank(self.alpha) {
            Some(value) => value.trim().parse::<f32>().map_err(|_| {
                SaliencyError::Configuration(format!(
                    "{} must be a number. Found: '{}'",
                    ALPHA_KEY, value
                ))
            })?,
            None => DEFAULT_ALPHA,
        };

        let config = PipelineConfig {
            model_size,
            device,
            image_path,
            output_dir: non_blank(self.output_dir)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("output")),
            weights_dir: non_blank(self.weights_dir)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("weights")),
            top_k,
            alpha,
            target_layer: non_blank(self.target_layer),
        };
        config.check_parameters()?;
        Ok(config)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Validated configuration for one classification + explanation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pretrained variant to load.
    pub model_size: ModelSize,
    /// Compute backend.
    pub device: DeviceKind,
    /// Input image.
    pub image_path: PathBuf,
    /// Directory receiving overlays and the prediction report.
    pub output_dir: PathBuf,
    /// Directory holding the model weights and label file.
    pub weights_dir: PathBuf,
    /// Number of top predictions to explain.
    pub top_k: usize,
    /// Heatmap opacity in the overlay.
    pub alpha: f32,
    /// Explicit Grad-CAM layer; `None` selects the last spatial layer.
    pub target_layer: Option<String>,
}

impl PipelineConfig {
    /// Create a config with default optional settings.
    pub fn new(model_size: ModelSize, device: DeviceKind, image_path: impl Into<PathBuf>) -> Self {
        Self {
            model_size,
            device,
            image_path: image_path.into(),
            output_dir: PathBuf::from("output"),
            weights_dir: PathBuf::from("weights"),
            top_k: DEFAULT_TOP_K,
            alpha: DEFAULT_ALPHA,
            target_layer: None,
        }
    }

    /// Build from a key lookup function (environment, test fixture, ...).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        RawSettings::from_lookup(lookup).validate()
    }

    /// Build from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Set the output directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Set the weights directory.
    pub fn with_weights_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.weights_dir = dir.into();
        self
    }

    /// Set the number of explained predictions.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Set the overlay blend factor.
    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    /// Set an explicit Grad-CAM layer.
    pub fn with_target_layer(mut self, layer: impl Into<String>) -> Self {
        self.target_layer = Some(layer.into());
        self
    }

    /// Range-check the numeric parameters.
    pub fn check_parameters(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(SaliencyError::invalid_parameter(
                "top_k",
                self.top_k,
                "must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(SaliencyError::invalid_parameter(
                "alpha",
                self.alpha,
                "must lie in [0, 1]",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_valid_config_with_defaults() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("MODEL_SIZE", "small"),
            ("DEVICE", "cpu"),
            ("IMAGE_PATH", "dog.jpg"),
        ]))
        .unwrap();

        assert_eq!(config.model_size, ModelSize::Small);
        assert_eq!(config.device, DeviceKind::Cpu);
        assert_eq!(config.image_path, PathBuf::from("dog.jpg"));
        assert_eq!(config.output_dir, PathBuf::from("output"));
        assert_eq!(config.weights_dir, PathBuf::from("weights"));
        assert_eq!(config.top_k, DEFAULT_TOP_K);
        assert_eq!(config.alpha, DEFAULT_ALPHA);
        assert!(config.target_layer.is_none());
    }

    #[test]
    fn test_optional_settings() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("MODEL_SIZE", "large"),
            ("DEVICE", "cpu"),
            ("IMAGE_PATH", "cat.png"),
            ("OUTPUT_DIR", "/tmp/out"),
            ("TOP_K", "3"),
            ("ALPHA", "0.25"),
            ("TARGET_LAYER", "stage6"),
        ]))
        .unwrap();

        assert_eq!(config.model_size, ModelSize::Large);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.top_k, 3);
        assert_eq!(config.alpha, 0.25);
        assert_eq!(config.target_layer.as_deref(), Some("stage6"));
    }

    #[test]
    fn test_invalid_model_size() {
        let err = PipelineConfig::from_lookup(lookup(&[
            ("MODEL_SIZE", "medium"),
            ("DEVICE", "cpu"),
            ("IMAGE_PATH", "dog.jpg"),
        ]))
        .unwrap_err();
        assert!(matches!(err, SaliencyError::Configuration(_)));
        assert!(err.to_string().contains("medium"));
    }

    #[test]
    fn test_missing_model_size() {
        let err = PipelineConfig::from_lookup(lookup(&[("DEVICE", "cpu"), ("IMAGE_PATH", "x.jpg")]))
            .unwrap_err();
        assert!(matches!(err, SaliencyError::Configuration(_)));
    }

    #[test]
    fn test_model_size_checked_before_device() {
        let err = PipelineConfig::from_lookup(lookup(&[("MODEL_SIZE", "huge"), ("DEVICE", "tpu")]))
            .unwrap_err();
        assert!(matches!(err, SaliencyError::Configuration(_)));
    }

    #[test]
    fn test_missing_or_unknown_device() {
        let err = PipelineConfig::from_lookup(lookup(&[("MODEL_SIZE", "small"), ("IMAGE_PATH", "x.jpg")]))
            .unwrap_err();
        assert!(matches!(err, SaliencyError::DeviceUnavailable(_)));

        let err = PipelineConfig::from_lookup(lookup(&[
            ("MODEL_SIZE", "small"),
            ("DEVICE", "tpu"),
            ("IMAGE_PATH", "x.jpg"),
        ]))
        .unwrap_err();
        assert!(matches!(err, SaliencyError::DeviceUnavailable(_)));
    }

    #[cfg(not(feature = "backend-tch"))]
    #[test]
    fn test_cuda_without_backend() {
        let err = PipelineConfig::from_lookup(lookup(&[
            ("MODEL_SIZE", "small"),
            ("DEVICE", "cuda"),
            ("IMAGE_PATH", "x.jpg"),
        ]))
        .unwrap_err();
        assert!(matches!(err, SaliencyError::DeviceUnavailable(_)));
    }

    #[test]
    fn test_blank_image_path() {
        for pairs in [
            vec![("MODEL_SIZE", "small"), ("DEVICE", "cpu")],
            vec![("MODEL_SIZE", "small"), ("DEVICE", "cpu"), ("IMAGE_PATH", "   ")],
        ] {
            let err = PipelineConfig::from_lookup(lookup(&pairs)).unwrap_err();
            assert!(matches!(err, SaliencyError::Configuration(_)));
        }
    }

    #[test]
    fn test_parameter_ranges() {
        let err = PipelineConfig::from_lookup(lookup(&[
            ("MODEL_SIZE", "small"),
            ("DEVICE", "cpu"),
            ("IMAGE_PATH", "x.jpg"),
            ("ALPHA", "1.5"),
        ]))
        .unwrap_err();
        assert!(matches!(err, SaliencyError::InvalidParameter { .. }));

        let err = PipelineConfig::from_lookup(lookup(&[
            ("MODEL_SIZE", "small"),
            ("DEVICE", "cpu"),
            ("IMAGE_PATH", "x.jpg"),
            ("TOP_K", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, SaliencyError::InvalidParameter { .. }));

        let err = PipelineConfig::from_lookup(lookup(&[
            ("MODEL_SIZE", "small"),
            ("DEVICE", "cpu"),
            ("IMAGE_PATH", "x.jpg"),
            ("TOP_K", "five"),
        ]))
        .unwrap_err();
        assert!(matches!(err, SaliencyError::Configuration(_)));
    }

    #[test]
    fn test_builder() {
        let config = PipelineConfig::new(ModelSize::Small, DeviceKind::Cpu, "a.png")
            .with_top_k(2)
            .with_alpha(0.0)
            .with_target_layer("head");
        assert!(config.check_parameters().is_ok());
        assert_eq!(config.target_layer.as_deref(), Some("head"));
    }
}
