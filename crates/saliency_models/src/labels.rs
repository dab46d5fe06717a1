//! Class label files.
//!
//! A label file holds one class name per line, in class-index order. Blank
//! trailing lines are ignored; blank lines elsewhere are an error since they
//! would shift every following index.
//!
//! The ImageNet-1K names used by the torchvision weights ship with the crate,
//! so a weights directory only needs its own label file to override them.

use std::path::Path;

use saliency_core::{Result, SaliencyError};

use crate::efficientnet::IMAGENET_CLASSES;

/// ImageNet-1K class names in torchvision's class-index order.
pub const IMAGENET_LABELS: &str = include_str!("../assets/imagenet_classes.txt");

/// Parse label text, expecting exactly `expected` names.
pub fn parse_labels(text: &str, expected: usize) -> Result<Vec<String>> {
    let labels: Vec<String> = text
        .trim_end()
        .lines()
        .map(|line| line.trim().to_string())
        .collect();

    if let Some(line) = labels.iter().position(String::is_empty) {
        return Err(SaliencyError::Configuration(format!(
            "label file has an empty entry at line {}",
            line + 1
        )));
    }

    if labels.len() != expected {
        return Err(SaliencyError::Configuration(format!(
            "label file lists {} classes but the model predicts {}",
            labels.len(),
            expected
        )));
    }

    Ok(labels)
}

/// Load a label file, expecting exactly `expected` names.
pub fn load_labels(path: impl AsRef<Path>, expected: usize) -> Result<Vec<String>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| {
        SaliencyError::Configuration(format!("cannot read label file {}: {}", path.display(), e))
    })?;
    parse_labels(&text, expected)
}

/// The bundled ImageNet-1K class names.
pub fn imagenet_labels() -> Result<Vec<String>> {
    parse_labels(IMAGENET_LABELS, IMAGENET_CLASSES)
}

/// Placeholder names `class_0`, `class_1`, ... for models without a label file.
pub fn numbered_labels(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("class_{}", i)).collect()
}
