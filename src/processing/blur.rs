use image::DynamicImage;
use imageproc::filter::gaussian_blur_f32;

use crate::state::FilterValues;

/// Below this the kernel is a single tap and the pass is skipped.
const MIN_SIGMA: f32 = 0.01;

/// Gaussian blurs compose by adding variances, so one pass with the combined
/// sigma stands in for every layer's blur.
pub fn combined_sigma(layers: &[FilterValues]) -> f32 {
    layers
        .iter()
        .map(|v| if v.blur.is_finite() { v.blur.max(0.0) } else { 0.0 })
        .map(|r| r * r)
        .sum::<f32>()
        .sqrt()
}

pub fn apply(img: DynamicImage, sigma: f32) -> DynamicImage {
    if sigma.is_nan() || sigma < MIN_SIGMA {
        return img;
    }
    let rgba = img.into_rgba8();
    DynamicImage::ImageRgba8(gaussian_blur_f32(&rgba, sigma))
}
