//! Image decoding and model-input preprocessing.
//!
//! The presets reproduce the evaluation transforms the pretrained weights were
//! published with: resize the shorter side, centre crop, scale to [0, 1], then
//! normalize each channel.

use std::path::Path;

use burn::prelude::*;
use burn::tensor::TensorData;
use image::imageops::{self, FilterType};
use image::{ImageReader, RgbImage};
use saliency_core::{ModelSize, Result, SaliencyError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Decode an image file into 8-bit RGB.
///
/// Any alpha channel is dropped and greyscale is expanded to three channels.
pub fn load_image(path: impl AsRef<Path>) -> Result<RgbImage> {
    let path = path.as_ref();
    let reader = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| SaliencyError::InvalidImage(format!("cannot open {}: {}", path.display(), e)))?;
    let decoded = reader
        .decode()
        .map_err(|e| SaliencyError::InvalidImage(format!("cannot decode {}: {}", path.display(), e)))?;
    check_dims(decoded.to_rgb8())
}

/// Decode an in-memory encoded image into 8-bit RGB.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| SaliencyError::InvalidImage(format!("cannot decode image bytes: {}", e)))?;
    check_dims(decoded.to_rgb8())
}

fn check_dims(img: RgbImage) -> Result<RgbImage> {
    if img.width() == 0 || img.height() == 0 {
        return Err(SaliencyError::InvalidImage(format!(
            "image has zero extent ({}x{})",
            img.width(),
            img.height()
        )));
    }
    Ok(img)
}

/// Resampling filter for the resize step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    /// Linear in both directions.
    Bilinear,
    /// Cubic in both directions.
    Bicubic,
}

impl Interpolation {
    fn filter(self) -> FilterType {
        match self {
            Self::Bilinear => FilterType::Triangle,
            Self::Bicubic => FilterType::CatmullRom,
        }
    }
}

/// Fixed resize, crop and normalization for one model variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    /// Target length of the shorter side after resizing.
    pub resize: u32,
    /// Side of the square centre crop.
    pub crop: u32,
    /// Resampling filter.
    pub interpolation: Interpolation,
    /// Per-channel mean subtracted after scaling to [0, 1].
    pub mean: [f32; 3],
    /// Per-channel standard deviation divided out after the mean.
    pub std: [f32; 3],
}

impl Preprocessor {
    /// Create a preprocessor, validating the geometry and statistics.
    pub fn new(
        resize: u32,
        crop: u32,
        interpolation: Interpolation,
        mean: [f32; 3],
        std: [f32; 3],
    ) -> Result<Self> {
        if crop == 0 || crop > resize {
            return Err(SaliencyError::invalid_parameter(
                "crop",
                crop,
                format!("must lie in 1..={}", resize),
            ));
        }
        if std.iter().any(|s| *s <= 0.0) {
            return Err(SaliencyError::invalid_parameter(
                "std",
                format!("{:?}", std),
                "must be positive",
            ));
        }
        Ok(Self {
            resize,
            crop,
            interpolation,
            mean,
            std,
        })
    }

    /// EfficientNetV2-S evaluation transform.
    pub fn small() -> Self {
        Self {
            resize: 384,
            crop: 384,
            interpolation: Interpolation::Bilinear,
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }

    /// EfficientNetV2-L evaluation transform.
    pub fn large() -> Self {
        Self {
            resize: 480,
            crop: 480,
            interpolation: Interpolation::Bicubic,
            mean: [0.5, 0.5, 0.5],
            std: [0.5, 0.5, 0.5],
        }
    }

    /// Preset for a model variant.
    pub fn for_size(size: ModelSize) -> Self {
        match size {
            ModelSize::Small => Self::small(),
            ModelSize::Large => Self::large(),
        }
    }

    /// Shape of the produced tensor, `[1, 3, crop, crop]`.
    pub fn input_dims(&self) -> [usize; 4] {
        [1, 3, self.crop as usize, self.crop as usize]
    }

    /// Size after scaling the shorter side to `resize`, keeping aspect ratio.
    pub fn resized_dims(&self, width: u32, height: u32) -> (u32, u32) {
        let (short, long) = if width <= height { (width, height) } else { (height, width) };
        let new_long = ((self.resize as u64 * long as u64) / short as u64) as u32;
        if width <= height {
            (self.resize, new_long)
        } else {
            (new_long, self.resize)
        }
    }

    /// Resize and centre-crop to a `crop x crop` RGB image.
    pub fn crop_image(&self, img: &RgbImage) -> Result<RgbImage> {
        let img = check_dims(img.clone())?;
        let (w, h) = self.resized_dims(img.width(), img.height());
        let resized = imageops::resize(&img, w, h, self.interpolation.filter());

        let left = centre_offset(w, self.crop);
        let top = centre_offset(h, self.crop);
        Ok(imageops::crop_imm(&resized, left, top, self.crop, self.crop).to_image())
    }

    /// Transform an image to normalized channel-major values, `3 * crop * crop` long.
    pub fn transform(&self, img: &RgbImage) -> Result<Vec<f32>> {
        let cropped = self.crop_image(img)?;
        let plane = (self.crop * self.crop) as usize;
        let mut out = vec![0.0f32; 3 * plane];

        for (i, pixel) in cropped.pixels().enumerate() {
            for c in 0..3 {
                let v = pixel[c] as f32 / 255.0;
                out[c * plane + i] = (v - self.mean[c]) / self.std[c];
            }
        }
        Ok(out)
    }

    /// Transform an image into a `(1, 3, crop, crop)` tensor on `device`.
    pub fn to_tensor<B: Backend>(&self, img: &RgbImage, device: &B::Device) -> Result<Tensor<B, 4>> {
        let values = self.transform(img)?;
        debug!(
            src = ?(img.width(), img.height()),
            crop = self.crop,
            "preprocessed image"
        );
        Ok(Tensor::from_data(TensorData::new(values, self.input_dims()), device))
    }
}

/// Offset of a centred `crop` window along a side of `size` pixels.
///
/// Halves round to even, matching the centre crop the pretrained weights were
/// evaluated with.
fn centre_offset(size: u32, crop: u32) -> u32 {
    ((size - crop) as f32 / 2.0).round_ties_even() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use saliency_core::backend::NdArray;

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb(rgb))
    }

    #[test]
    fn test_presets() {
        assert_eq!(Preprocessor::for_size(ModelSize::Small).input_dims(), [1, 3, 384, 384]);
        assert_eq!(Preprocessor::for_size(ModelSize::Large).input_dims(), [1, 3, 480, 480]);
        assert_eq!(Preprocessor::large().interpolation, Interpolation::Bicubic);
    }

    #[test]
    fn test_resized_dims_keep_aspect() {
        let pre = Preprocessor::small();
        assert_eq!(pre.resized_dims(640, 480), (512, 384));
        assert_eq!(pre.resized_dims(480, 640), (384, 512));
        assert_eq!(pre.resized_dims(224, 224), (384, 384));
    }

    #[test]
    fn test_invalid_geometry() {
        let err = Preprocessor::new(32, 64, Interpolation::Bilinear, [0.0; 3], [1.0; 3]).unwrap_err();
        assert!(matches!(err, SaliencyError::InvalidParameter { .. }));
        let err = Preprocessor::new(32, 32, Interpolation::Bilinear, [0.0; 3], [0.0, 1.0, 1.0]).unwrap_err();
        assert!(matches!(err, SaliencyError::InvalidParameter { .. }));
    }

    #[test]
    fn test_transform_normalizes_channels() {
        let pre = Preprocessor::new(8, 8, Interpolation::Bilinear, [0.5; 3], [0.5; 3]).unwrap();
        let values = pre.transform(&solid(20, 10, [255, 0, 128])).unwrap();
        assert_eq!(values.len(), 3 * 64);

        let red = &values[..64];
        let green = &values[64..128];
        let blue = &values[128..];
        assert!(red.iter().all(|v| (v - 1.0).abs() < 1e-5));
        assert!(green.iter().all(|v| (v + 1.0).abs() < 1e-5));
        assert!(blue.iter().all(|v| (v - (128.0 / 255.0 - 0.5) / 0.5).abs() < 1e-5));
    }

    #[test]
    fn test_centre_crop() {
        // Left third red, middle third green, right third blue.
        let img = RgbImage::from_fn(30, 10, |x, _| match x {
            0..=9 => Rgb([255, 0, 0]),
            10..=19 => Rgb([0, 255, 0]),
            _ => Rgb([0, 0, 255]),
        });
        let pre = Preprocessor::new(10, 10, Interpolation::Bilinear, [0.0; 3], [1.0; 3]).unwrap();
        let cropped = pre.crop_image(&img).unwrap();
        assert_eq!(cropped.dimensions(), (10, 10));
        assert_eq!(cropped.get_pixel(5, 5), &Rgb([0, 255, 0]));
    }

    #[test]
    fn test_centre_offset_rounds_half_to_even() {
        assert_eq!(centre_offset(10, 10), 0);
        assert_eq!(centre_offset(11, 10), 0);
        assert_eq!(centre_offset(13, 10), 2);
        assert_eq!(centre_offset(15, 10), 2);
        assert_eq!(centre_offset(20, 10), 5);
    }

    #[test]
    fn test_odd_margin_crop_keeps_left_column() {
        // 11x10 keeps its size after resizing the shorter side to 10.
        let img = RgbImage::from_fn(11, 10, |x, _| match x {
            0 => Rgb([255, 0, 0]),
            10 => Rgb([0, 0, 255]),
            _ => Rgb([0, 255, 0]),
        });
        let pre = Preprocessor::new(10, 10, Interpolation::Bilinear, [0.0; 3], [1.0; 3]).unwrap();
        assert_eq!(pre.resized_dims(11, 10), (11, 10));

        let cropped = pre.crop_image(&img).unwrap();
        assert_eq!(cropped.get_pixel(0, 5), &Rgb([255, 0, 0]));
        assert_eq!(cropped.get_pixel(9, 5), &Rgb([0, 255, 0]));
    }

    #[test]
    fn test_to_tensor_shape() {
        let pre = Preprocessor::new(16, 12, Interpolation::Bicubic, [0.5; 3], [0.5; 3]).unwrap();
        let device = Default::default();
        let tensor = pre.to_tensor::<NdArray>(&solid(40, 16, [10, 20, 30]), &device).unwrap();
        assert_eq!(tensor.dims(), [1, 3, 12, 12]);
    }

    #[test]
    fn test_decode_garbage() {
        let err = decode_image(b"not an image").unwrap_err();
        assert!(matches!(err, SaliencyError::InvalidImage(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_image("/nonexistent/photo.jpg").unwrap_err();
        assert!(matches!(err, SaliencyError::InvalidImage(_)));
    }

    #[test]
    fn test_zero_sized_image() {
        let pre = Preprocessor::small();
        let err = pre.transform(&RgbImage::new(0, 5)).unwrap_err();
        assert!(matches!(err, SaliencyError::InvalidImage(_)));
    }
}
