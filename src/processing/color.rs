use image::DynamicImage;
use rayon::prelude::*;

use crate::state::FilterValues;

// Rec. 709 luma weights, shared by saturation-free grey and the grayscale blend.
const LUMA: [f32; 3] = [0.2126, 0.7152, 0.0722];

/// 3×4 affine colour transform over normalised RGB; the fourth column is the
/// offset. Alpha is never touched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorMatrix(pub [[f32; 4]; 3]);

impl ColorMatrix {
    pub const IDENTITY: ColorMatrix = ColorMatrix([
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
    ]);

    fn diagonal(gain: f32, offset: f32) -> Self {
        ColorMatrix([
            [gain, 0.0, 0.0, offset],
            [0.0, gain, 0.0, offset],
            [0.0, 0.0, gain, offset],
        ])
    }

    /// Rotation about the grey axis.
    pub fn hue(degrees: f32) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        let w: f32 = 1.0 / 3.0;
        let sqrt_w = w.sqrt();
        let a = cos + (1.0 - cos) * w;
        let b = w * (1.0 - cos) - sqrt_w * sin;
        let c = w * (1.0 - cos) + sqrt_w * sin;
        ColorMatrix([[a, b, c, 0.0], [c, a, b, 0.0], [b, c, a, 0.0]])
    }

    /// `percent` of 100 is identity, 0 is fully desaturated.
    pub fn saturate(percent: f32) -> Self {
        let amount = percent / 100.0 - 1.0;
        let x = amount * 2.0 / 3.0 + 1.0;
        let y = (x - 1.0) * -0.5;
        ColorMatrix([[x, y, y, 0.0], [y, x, y, 0.0], [y, y, x, 0.0]])
    }

    pub fn brightness(percent: f32) -> Self {
        Self::diagonal(percent / 100.0, 0.0)
    }

    /// Scales distance from mid-grey.
    pub fn contrast(percent: f32) -> Self {
        let gain = percent / 100.0;
        Self::diagonal(gain, 0.5 * (1.0 - gain))
    }

    pub fn grayscale(percent: f32) -> Self {
        let t = percent / 100.0;
        let mut m = [[0.0; 4]; 3];
        for (row, out) in m.iter_mut().enumerate() {
            for col in 0..3 {
                let keep = if row == col { 1.0 - t } else { 0.0 };
                out[col] = keep + t * LUMA[col];
            }
        }
        ColorMatrix(m)
    }

    pub fn invert(percent: f32) -> Self {
        let t = percent / 100.0;
        Self::diagonal(1.0 - 2.0 * t, t)
    }

    /// Matrix equivalent to applying `self` first, then `next`.
    pub fn then(&self, next: &ColorMatrix) -> ColorMatrix {
        let a = &self.0;
        let b = &next.0;
        let mut out = [[0.0; 4]; 3];
        for row in 0..3 {
            for col in 0..4 {
                let mut v = (0..3).map(|k| b[row][k] * a[k][col]).sum::<f32>();
                if col == 3 {
                    v += b[row][3];
                }
                out[row][col] = v;
            }
        }
        ColorMatrix(out)
    }

    #[inline]
    fn transform(&self, rgb: [f32; 3]) -> [f32; 3] {
        let m = &self.0;
        let mut out = [0.0; 3];
        for (row, o) in out.iter_mut().enumerate() {
            *o = m[row][0] * rgb[0] + m[row][1] * rgb[1] + m[row][2] * rgb[2] + m[row][3];
        }
        out
    }
}

/// Composes the colour part of one layer in fixed order:
/// hue → saturate → brightness → contrast → grayscale → invert.
/// Entries at identity contribute nothing; `None` when all of them are.
pub fn layer_matrix(values: &FilterValues) -> Option<ColorMatrix> {
    let hue = values.hue_degrees();
    let steps = [
        (hue != 0.0).then(|| ColorMatrix::hue(hue)),
        (values.saturation != 100.0).then(|| ColorMatrix::saturate(values.saturation)),
        (values.brightness != 100.0).then(|| ColorMatrix::brightness(values.brightness)),
        (values.contrast != 100.0).then(|| ColorMatrix::contrast(values.contrast)),
        (values.grayscale != 0.0).then(|| ColorMatrix::grayscale(values.grayscale)),
        (values.invert != 0.0).then(|| ColorMatrix::invert(values.invert)),
    ];
    steps
        .into_iter()
        .flatten()
        .reduce(|acc, next| acc.then(&next))
}

/// Runs one colour pass for a single layer.
pub fn apply(img: DynamicImage, values: &FilterValues) -> DynamicImage {
    let Some(matrix) = layer_matrix(values) else {
        return img;
    };

    let mut rgba = img.into_rgba8();
    let row_len = (rgba.width() as usize * 4).max(4);
    rgba.par_chunks_mut(row_len).for_each(|row| {
        for px in row.chunks_exact_mut(4) {
            let rgb = [
                px[0] as f32 / 255.0,
                px[1] as f32 / 255.0,
                px[2] as f32 / 255.0,
            ];
            let out = matrix.transform(rgb);
            for c in 0..3 {
                px[c] = (out[c].clamp(0.0, 1.0) * 255.0).round() as u8;
            }
        }
    });

    DynamicImage::ImageRgba8(rgba)
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, ImageBuffer, Rgba};

    use crate::state::FilterValues;

    use super::{ColorMatrix, apply, layer_matrix};

    fn one_pixel(rgb: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgba8(ImageBuffer::from_pixel(
            1,
            1,
            Rgba([rgb[0], rgb[1], rgb[2], 255]),
        ))
    }

    fn pixel_rgb(img: &DynamicImage) -> [u8; 3] {
        let p = img.to_rgba8().get_pixel(0, 0).0;
        [p[0], p[1], p[2]]
    }

    fn with(f: impl FnOnce(&mut FilterValues)) -> FilterValues {
        let mut v = FilterValues::IDENTITY;
        f(&mut v);
        v
    }

    #[test]
    fn identity_values_have_no_matrix() {
        assert_eq!(layer_matrix(&FilterValues::IDENTITY), None);
        assert_eq!(layer_matrix(&with(|v| v.blur = 5.0)), None);
    }

    #[test]
    fn hue_rotation_moves_red_toward_green() {
        let out = apply(one_pixel([255, 0, 0]), &with(|v| v.hue = 120.0));
        let rgb = pixel_rgb(&out);
        assert!(rgb[1] > rgb[0]);
    }

    #[test]
    fn hue_matrix_keeps_greys() {
        let m = ColorMatrix::hue(77.0);
        for row in m.0 {
            assert!((row[0] + row[1] + row[2] - 1.0).abs() < 1e-5);
        }
        let rgb = pixel_rgb(&apply(one_pixel([128, 128, 128]), &with(|v| v.hue = 77.0)));
        assert_eq!(rgb, [128, 128, 128]);
    }

    #[test]
    fn full_hue_turn_is_skipped() {
        let img = one_pixel([10, 200, 30]);
        let out = apply(img.clone(), &with(|v| v.hue = 720.0));
        assert_eq!(out.to_rgba8(), img.to_rgba8());
    }

    #[test]
    fn zero_saturation_produces_grey() {
        let rgb = pixel_rgb(&apply(one_pixel([200, 40, 90]), &with(|v| v.saturation = 0.0)));
        assert_eq!(rgb[0], rgb[1]);
        assert_eq!(rgb[1], rgb[2]);
    }

    #[test]
    fn brightness_scales_channels() {
        let rgb = pixel_rgb(&apply(one_pixel([100, 50, 20]), &with(|v| v.brightness = 200.0)));
        assert_eq!(rgb, [200, 100, 40]);
    }

    #[test]
    fn contrast_pivots_on_mid_grey() {
        let out = apply(one_pixel([64, 128, 192]), &with(|v| v.contrast = 150.0));
        let rgb = pixel_rgb(&out);
        assert!(rgb[0] < 64);
        assert!(rgb[2] > 192);
    }

    #[test]
    fn full_invert_flips_channels() {
        let rgb = pixel_rgb(&apply(one_pixel([0, 100, 255]), &with(|v| v.invert = 100.0)));
        assert_eq!(rgb, [255, 155, 0]);
    }

    #[test]
    fn half_invert_lands_on_mid_grey() {
        let rgb = pixel_rgb(&apply(one_pixel([0, 255, 30]), &with(|v| v.invert = 50.0)));
        assert_eq!(rgb, [128, 128, 128]);
    }

    #[test]
    fn full_grayscale_uses_luma() {
        let rgb = pixel_rgb(&apply(one_pixel([255, 0, 0]), &with(|v| v.grayscale = 100.0)));
        assert_eq!(rgb, [54, 54, 54]);
    }

    #[test]
    fn alpha_is_preserved() {
        let img = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(2, 2, Rgba([10, 20, 30, 77])));
        let out = apply(img, &with(|v| v.brightness = 150.0)).to_rgba8();
        assert!(out.pixels().all(|p| p[3] == 77));
    }

    #[test]
    fn composition_applies_in_sub_order() {
        // Invert after brightness differs from brightness after invert.
        let values = with(|v| {
            v.brightness = 50.0;
            v.invert = 100.0;
        });
        let composed = layer_matrix(&values).unwrap();
        let expected = ColorMatrix::brightness(50.0).then(&ColorMatrix::invert(100.0));
        assert_eq!(composed, expected);
        let rgb = pixel_rgb(&apply(one_pixel([200, 200, 200]), &values));
        assert_eq!(rgb, [155, 155, 155]);
    }
}
