//! Before/after comparison split.
//!
//! Everything left of the boundary shows the original, everything right of it
//! the edited render. Nothing here knows about filter values.

use image::imageops::FilterType;
use image::{DynamicImage, RgbaImage};

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
/// Split position as a percentage of the viewport width, always in `[0, 100]`.
pub struct SplitPosition(f32);

impl SplitPosition {
    pub const CENTER: SplitPosition = SplitPosition(50.0);

    pub fn new(percent: f32) -> Self {
        if percent.is_nan() {
            Self::CENTER
        } else {
            SplitPosition(percent.clamp(0.0, 100.0))
        }
    }

    pub fn percent(self) -> f32 {
        self.0
    }

    /// Boundary column for a surface `width` pixels wide.
    pub fn boundary_x(self, width: u32) -> u32 {
        ((self.0 / 100.0 * width as f32).round() as u32).min(width)
    }

    /// Same as [`boundary_x`](Self::boundary_x) for fractional screen units.
    pub fn boundary_offset(self, width: f32) -> f32 {
        self.0 / 100.0 * width
    }
}

impl Default for SplitPosition {
    fn default() -> Self {
        Self::CENTER
    }
}

/// An in-progress drag of the split handle. The position is recomputed from
/// the drag origin on every move, so overshooting an edge clamps instead of
/// accumulating.
#[derive(Debug, Clone, Copy)]
pub struct SplitDrag {
    start_x: f32,
    start: SplitPosition,
}

impl SplitDrag {
    pub fn begin(start_x: f32, start: SplitPosition) -> Self {
        Self { start_x, start }
    }

    pub fn drag_to(&self, x: f32, container_width: f32) -> SplitPosition {
        if container_width <= 0.0 || !container_width.is_finite() {
            return self.start;
        }
        let delta_percent = (x - self.start_x) / container_width * 100.0;
        SplitPosition::new(self.start.percent() + delta_percent)
    }
}

/// Compose original and edited renders at `split`. The canvas takes the
/// edited image's size; the original is resampled to it when they differ.
pub fn composite(original: &DynamicImage, edited: &DynamicImage, split: SplitPosition) -> RgbaImage {
    let mut out = edited.to_rgba8();
    let (w, h) = out.dimensions();
    let boundary = split.boundary_x(w);
    if boundary == 0 {
        return out;
    }

    let left = if original.width() == w && original.height() == h {
        original.to_rgba8()
    } else {
        original.resize_exact(w, h, FilterType::Triangle).to_rgba8()
    };

    let row_len = w as usize * 4;
    let split_len = boundary as usize * 4;
    for (dst, src) in out
        .chunks_exact_mut(row_len)
        .zip(left.chunks_exact(row_len))
    {
        dst[..split_len].copy_from_slice(&src[..split_len]);
    }
    out
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, ImageBuffer, Rgba};

    use super::{SplitDrag, SplitPosition, composite};

    fn solid(w: u32, h: u32, v: u8) -> DynamicImage {
        DynamicImage::ImageRgba8(ImageBuffer::from_pixel(w, h, Rgba([v, v, v, 255])))
    }

    #[test]
    fn position_is_clamped() {
        assert_eq!(SplitPosition::new(-20.0).percent(), 0.0);
        assert_eq!(SplitPosition::new(180.0).percent(), 100.0);
        assert_eq!(SplitPosition::new(f32::NAN), SplitPosition::CENTER);
    }

    #[test]
    fn fast_drag_past_edge_clamps() {
        let drag = SplitDrag::begin(500.0, SplitPosition::new(50.0));
        assert_eq!(drag.drag_to(600.0, 1000.0).percent(), 60.0);
        assert_eq!(drag.drag_to(5000.0, 1000.0).percent(), 100.0);
        assert_eq!(drag.drag_to(-5000.0, 1000.0).percent(), 0.0);
        // Returning after overshoot tracks the pointer again.
        assert_eq!(drag.drag_to(400.0, 1000.0).percent(), 40.0);
    }

    #[test]
    fn zero_width_container_keeps_start() {
        let drag = SplitDrag::begin(10.0, SplitPosition::new(25.0));
        assert_eq!(drag.drag_to(90.0, 0.0).percent(), 25.0);
    }

    #[test]
    fn composite_splits_columns() {
        let out = composite(&solid(10, 2, 0), &solid(10, 2, 255), SplitPosition::new(30.0));
        for y in 0..2 {
            for x in 0..10 {
                let expected = if x < 3 { 0 } else { 255 };
                assert_eq!(out.get_pixel(x, y)[0], expected, "x={x} y={y}");
            }
        }
    }

    #[test]
    fn composite_edges_show_one_side() {
        let original = solid(4, 4, 10);
        let edited = solid(4, 4, 200);
        let all_edited = composite(&original, &edited, SplitPosition::new(0.0));
        assert_eq!(all_edited, edited.to_rgba8());
        let all_original = composite(&original, &edited, SplitPosition::new(100.0));
        assert_eq!(all_original, original.to_rgba8());
    }

    #[test]
    fn composite_resamples_original_to_edited_size() {
        let out = composite(&solid(8, 8, 10), &solid(4, 2, 200), SplitPosition::new(50.0));
        assert_eq!(out.dimensions(), (4, 2));
        assert_eq!(out.get_pixel(0, 0)[0], 10);
        assert_eq!(out.get_pixel(3, 1)[0], 200);
    }
}
