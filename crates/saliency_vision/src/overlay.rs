//! Heatmap overlays.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, RgbImage};
use saliency_core::{Result, SaliencyError};
use saliency_explain::Heatmap;
use tracing::trace;

use crate::colormap::Colormap;

/// Single-channel floating point image.
pub type GrayF32Image = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Check that a blend factor lies in [0, 1].
pub fn check_alpha(alpha: f32) -> Result<f32> {
    if (0.0..=1.0).contains(&alpha) {
        Ok(alpha)
    } else {
        Err(SaliencyError::invalid_parameter("alpha", alpha, "must lie in [0, 1]"))
    }
}

/// Resize a heatmap grid to `width x height` with bilinear interpolation.
pub fn upsample(heatmap: &Heatmap, width: u32, height: u32) -> Result<GrayF32Image> {
    let (rows, cols) = heatmap.dims();
    if rows == 0 || cols == 0 {
        return Err(SaliencyError::invalid_parameter(
            "heatmap",
            format!("{}x{}", cols, rows),
            "heatmap grid is empty",
        ));
    }

    let grid: GrayF32Image =
        ImageBuffer::from_raw(cols as u32, rows as u32, heatmap.values.iter().copied().collect()).ok_or_else(
            || SaliencyError::invalid_parameter("heatmap", format!("{}x{}", cols, rows), "inconsistent grid"),
        )?;

    if grid.dimensions() == (width, height) {
        return Ok(grid);
    }
    Ok(imageops::resize(&grid, width, height, FilterType::Triangle))
}

/// Map every intensity through `colormap`.
pub fn colorize(intensity: &GrayF32Image, colormap: &Colormap) -> RgbImage {
    let (width, height) = intensity.dimensions();
    RgbImage::from_fn(width, height, |x, y| colormap.map(intensity.get_pixel(x, y)[0]))
}

/// Per-pixel, per-channel `alpha * overlay + (1 - alpha) * base`.
pub fn blend(base: &RgbImage, overlay: &RgbImage, alpha: f32) -> Result<RgbImage> {
    let alpha = check_alpha(alpha)?;
    if base.dimensions() != overlay.dimensions() {
        return Err(SaliencyError::invalid_parameter(
            "overlay",
            format!("{:?}", overlay.dimensions()),
            format!("must match base image {:?}", base.dimensions()),
        ));
    }

    let mut out = base.clone();
    for (dst, src) in out.pixels_mut().zip(overlay.pixels()) {
        for c in 0..3 {
            let mixed = alpha * src[c] as f32 + (1.0 - alpha) * dst[c] as f32;
            dst[c] = mixed.round().clamp(0.0, 255.0) as u8;
        }
    }
    Ok(out)
}

/// Renders Grad-CAM heatmaps on top of source images.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayRenderer {
    colormap: Colormap,
    alpha: f32,
}

impl OverlayRenderer {
    /// Renderer using the jet colour scale and blend factor `alpha`.
    pub fn new(alpha: f32) -> Result<Self> {
        Ok(Self {
            colormap: Colormap::jet(),
            alpha: check_alpha(alpha)?,
        })
    }

    /// Use another colour scale.
    pub fn with_colormap(mut self, colormap: Colormap) -> Self {
        self.colormap = colormap;
        self
    }

    /// Heatmap weight in the blend.
    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Upsample, colour and blend `heatmap` over `source`.
    ///
    /// The result has the same dimensions as `source`.
    pub fn render(&self, source: &RgbImage, heatmap: &Heatmap) -> Result<RgbImage> {
        let (width, height) = source.dimensions();
        let intensity = upsample(heatmap, width, height)?;
        let colored = colorize(&intensity, &self.colormap);
        trace!(
            grid = ?heatmap.dims(),
            size = ?(width, height),
            alpha = self.alpha,
            "rendering overlay"
        );
        blend(source, &colored, self.alpha)
    }
}

/// Render `heatmap` over `source` with the jet colour scale.
pub fn render(source: &RgbImage, heatmap: &Heatmap, alpha: f32) -> Result<RgbImage> {
    OverlayRenderer::new(alpha)?.render(source, heatmap)
}
