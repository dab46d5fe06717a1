//! Import of torchvision EfficientNetV2 state dicts.
//!
//! torchvision names the network `features.0` (stem), `features.1..=N`
//! (stages), `features.N+1` (head) and `classifier.1` (the linear layer behind
//! the dropout). Every convolution block is a `(conv, bn, act)` sequence, so its
//! parameters sit under `.0.` and `.1.`. The key remap rewrites those names to
//! this crate's module paths before the record is deserialized; the linear
//! weight is transposed by the PyTorch recorder itself.
//!
//! # Example
//!
//! ```rust,ignore
//! use saliency_models::{import_torchvision, EfficientNetV2Config};
//!
//! let config = EfficientNetV2Config::small();
//! let model = import_torchvision::<NdArray>(&config, "efficientnet_v2_s-dd5fe13b.pth", &device)?;
//! ```

use std::path::Path;

use burn::module::Module;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, Recorder};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use saliency_core::{ModelSize, Result, SaliencyError};
use tracing::{debug, info};

use crate::efficientnet::{BlockType, EfficientNetV2, EfficientNetV2Config, StageConfig};

/// File name torchvision publishes the ImageNet-1K weights of a variant under.
pub fn torchvision_file_name(size: ModelSize) -> &'static str {
    match size {
        ModelSize::Small => "efficientnet_v2_s-dd5fe13b.pth",
        ModelSize::Large => "efficientnet_v2_l-59c71312.pth",
    }
}

/// Names of the sub-blocks of one block of `stage`, in torchvision's order.
fn block_roles(stage: &StageConfig) -> &'static [&'static str] {
    match stage.block {
        BlockType::FusedMBConv if stage.expand_ratio == 1 => &["project"],
        BlockType::FusedMBConv => &["expand", "project"],
        BlockType::MBConv if stage.expand_ratio == 1 => &["depthwise", "se", "project"],
        BlockType::MBConv => &["expand", "depthwise", "se", "project"],
    }
}

/// Key remap rules `(pattern, replacement)` from torchvision names to module paths.
///
/// Rules are applied in order to every key, each one to the output of the
/// previous, which is how the PyTorch recorder applies them.
pub fn torchvision_key_remap(config: &EfficientNetV2Config) -> Vec<(String, String)> {
    let mut rules = vec![(r"^features\.0\.".to_string(), "stem.".to_string())];

    for (i, stage) in config.stages.iter().enumerate() {
        for (j, role) in block_roles(stage).iter().enumerate() {
            rules.push((
                format!(r"^features\.{}\.(\d+)\.block\.{}\.", i + 1, j),
                format!("stages.{}.blocks.${{1}}.{}.", i, role),
            ));
        }
    }

    rules.push((format!(r"^features\.{}\.", config.stages.len() + 1), "head.".to_string()));
    rules.push((r"^classifier\.1\.".to_string(), "classifier.".to_string()));

    // Children of every conv/bn/act sequence.
    rules.push((r"\.0\.weight$".to_string(), ".conv.weight".to_string()));
    rules.push((r"\.1\.weight$".to_string(), ".bn.gamma".to_string()));
    rules.push((r"\.1\.bias$".to_string(), ".bn.beta".to_string()));
    rules.push((
        r"\.1\.(running_mean|running_var|num_batches_tracked)$".to_string(),
        ".bn.${1}".to_string(),
    ));

    rules
}

/// Build an EfficientNetV2 from `config` with weights read from a torchvision `.pth` file.
pub fn import_torchvision<B: Backend>(
    config: &EfficientNetV2Config,
    path: impl AsRef<Path>,
    device: &B::Device,
) -> Result<EfficientNetV2<B>> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(SaliencyError::Checkpoint(format!(
            "torchvision weights not found: {}",
            path.display()
        )));
    }

    let rules = torchvision_key_remap(config);
    debug!(rules = rules.len(), "torchvision key remap");
    let args = rules
        .iter()
        .fold(LoadArgs::new(path.to_path_buf()), |args, (pattern, replacement)| {
            args.with_key_remap(pattern, replacement)
        });

    info!(path = %path.display(), "importing torchvision state dict");
    let record = PyTorchFileRecorder::<FullPrecisionSettings>::default()
        .load(args, device)
        .map_err(|e| SaliencyError::Checkpoint(format!("{}: {}", path.display(), e)))?;

    Ok(config.init::<B>(device).load_record(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use saliency_core::backend::NdArray;

    fn remap(config: &EfficientNetV2Config, key: &str) -> String {
        torchvision_key_remap(config)
            .iter()
            .fold(key.to_string(), |name, (pattern, replacement)| {
                Regex::new(pattern).unwrap().replace_all(&name, replacement.as_str()).into_owned()
            })
    }

    /// Parameter names of a torchvision EfficientNetV2 built from `config`.
    fn torchvision_keys(config: &EfficientNetV2Config) -> Vec<String> {
        let conv_bn = |prefix: String| {
            ["0.weight", "1.weight", "1.bias", "1.running_mean", "1.running_var", "1.num_batches_tracked"]
                .iter()
                .map(move |suffix| format!("{}.{}", prefix, suffix))
                .collect::<Vec<_>>()
        };

        let mut keys = conv_bn("features.0".to_string());
        for (i, stage) in config.stages.iter().enumerate() {
            for block in 0..stage.num_layers {
                for (j, role) in block_roles(stage).iter().enumerate() {
                    let prefix = format!("features.{}.{}.block.{}", i + 1, block, j);
                    if *role == "se" {
                        for fc in ["fc1", "fc2"] {
                            keys.push(format!("{}.{}.weight", prefix, fc));
                            keys.push(format!("{}.{}.bias", prefix, fc));
                        }
                    } else {
                        keys.extend(conv_bn(prefix));
                    }
                }
            }
        }
        keys.extend(conv_bn(format!("features.{}", config.stages.len() + 1)));
        keys.push("classifier.1.weight".to_string());
        keys.push("classifier.1.bias".to_string());
        keys
    }

    #[test]
    fn test_small_remap_samples() {
        let config = EfficientNetV2Config::small();
        let cases = [
            ("features.0.0.weight", "stem.conv.weight"),
            ("features.0.1.bias", "stem.bn.beta"),
            ("features.1.0.block.0.0.weight", "stages.0.blocks.0.project.conv.weight"),
            ("features.2.3.block.0.1.weight", "stages.1.blocks.3.expand.bn.gamma"),
            ("features.2.3.block.1.1.running_var", "stages.1.blocks.3.project.bn.running_var"),
            ("features.4.5.block.1.0.weight", "stages.3.blocks.5.depthwise.conv.weight"),
            ("features.4.0.block.2.fc1.bias", "stages.3.blocks.0.se.fc1.bias"),
            ("features.6.14.block.3.1.running_mean", "stages.5.blocks.14.project.bn.running_mean"),
            ("features.7.0.weight", "head.conv.weight"),
            ("features.7.1.weight", "head.bn.gamma"),
            ("classifier.1.weight", "classifier.weight"),
            ("classifier.1.bias", "classifier.bias"),
        ];
        for (key, expected) in cases {
            assert_eq!(remap(&config, key), expected, "{}", key);
        }
    }

    #[test]
    fn test_large_head_follows_seventh_stage() {
        let config = EfficientNetV2Config::large();
        assert_eq!(remap(&config, "features.7.6.block.2.fc2.weight"), "stages.6.blocks.6.se.fc2.weight");
        assert_eq!(remap(&config, "features.8.1.running_var"), "head.bn.running_var");
    }

    #[test]
    fn test_every_key_lands_on_a_module_path() {
        let allowed = Regex::new(
            r"^(stem|head|stages\.\d+\.blocks\.\d+\.(expand|depthwise|project))\.(conv\.weight|bn\.(gamma|beta|running_mean|running_var|num_batches_tracked))$|^stages\.\d+\.blocks\.\d+\.se\.fc[12]\.(weight|bias)$|^classifier\.(weight|bias)$",
        )
        .unwrap();

        for config in [EfficientNetV2Config::small(), EfficientNetV2Config::large(), EfficientNetV2Config::tiny(4)] {
            let keys = torchvision_keys(&config);
            let mut mapped: Vec<String> = keys.iter().map(|k| remap(&config, k)).collect();
            for name in &mapped {
                assert!(allowed.is_match(name), "unmapped key {}", name);
            }
            mapped.sort();
            mapped.dedup();
            assert_eq!(mapped.len(), keys.len());
        }
    }

    #[test]
    fn test_missing_state_dict() {
        let device = Default::default();
        let err = import_torchvision::<NdArray>(&EfficientNetV2Config::small(), "/nonexistent/w.pth", &device)
            .unwrap_err();
        assert!(matches!(err, SaliencyError::Checkpoint(_)));
    }

    #[test]
    fn test_torchvision_file_names() {
        assert_eq!(torchvision_file_name(ModelSize::Small), "efficientnet_v2_s-dd5fe13b.pth");
        assert_eq!(torchvision_file_name(ModelSize::Large), "efficientnet_v2_l-59c71312.pth");
    }
}
