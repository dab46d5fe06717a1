//! Scalar-to-colour maps.

use image::Rgb;

/// Piecewise-linear control points `(position, value)` for one channel.
type Segments = &'static [(f32, f32)];

const JET_RED: Segments = &[(0.0, 0.0), (0.35, 0.0), (0.66, 1.0), (0.89, 1.0), (1.0, 0.5)];
const JET_GREEN: Segments = &[(0.0, 0.0), (0.125, 0.0), (0.375, 1.0), (0.64, 1.0), (0.91, 0.0), (1.0, 0.0)];
const JET_BLUE: Segments = &[(0.0, 0.5), (0.11, 1.0), (0.34, 1.0), (0.65, 0.0), (1.0, 0.0)];

/// A colour scale from low (cool) to high (hot) intensities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Colormap {
    red: Segments,
    green: Segments,
    blue: Segments,
}

impl Colormap {
    /// Dark blue through cyan, yellow and red to dark red.
    pub const fn jet() -> Self {
        Self {
            red: JET_RED,
            green: JET_GREEN,
            blue: JET_BLUE,
        }
    }

    /// Colour for `value`, clamped to [0, 1]. NaN maps to the low end.
    pub fn map(&self, value: f32) -> Rgb<u8> {
        let v = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        Rgb([
            to_u8(interpolate(self.red, v)),
            to_u8(interpolate(self.green, v)),
            to_u8(interpolate(self.blue, v)),
        ])
    }

    /// Precomputed colours for every 8-bit intensity.
    pub fn lut(&self) -> [Rgb<u8>; 256] {
        let mut table = [Rgb([0, 0, 0]); 256];
        for (i, entry) in table.iter_mut().enumerate() {
            *entry = self.map(i as f32 / 255.0);
        }
        table
    }
}

impl Default for Colormap {
    fn default() -> Self {
        Self::jet()
    }
}

fn interpolate(segments: Segments, x: f32) -> f32 {
    for pair in segments.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if x <= x1 {
            if x1 <= x0 {
                return y1;
            }
            return y0 + (y1 - y0) * (x - x0) / (x1 - x0);
        }
    }
    segments.last().map_or(0.0, |&(_, y)| y)
}

fn to_u8(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}
