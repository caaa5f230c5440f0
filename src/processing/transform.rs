use image::imageops::FilterType;
use image::{DynamicImage, Rgba};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};

use crate::state::Geometry;

/// Apply the geometric stage: resample to the target size, then rotate about
/// the centre. The canvas keeps the target size; uncovered corners are
/// transparent.
pub fn apply(img: &DynamicImage, geometry: &Geometry) -> DynamicImage {
    let (w, h) = geometry.output_size(img.width(), img.height());
    let mut out = if (w, h) == (img.width(), img.height()) {
        img.clone()
    } else {
        img.resize_exact(w, h, FilterType::Triangle)
    };

    let degrees = geometry.rotation_degrees();
    if degrees == 180.0 {
        out = out.rotate180();
    } else if degrees != 0.0 {
        let rgba = out.into_rgba8();
        let rotated = rotate_about_center(
            &rgba,
            degrees.to_radians(),
            Interpolation::Bilinear,
            Rgba([0u8, 0u8, 0u8, 0u8]),
        );
        out = DynamicImage::ImageRgba8(rotated);
    }

    out
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, GenericImageView, ImageBuffer, Rgba};

    use crate::state::Geometry;

    use super::apply;

    fn gradient(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(ImageBuffer::from_fn(w, h, |x, y| {
            Rgba([(x * 20) as u8, (y * 20) as u8, 0, 255])
        }))
    }

    #[test]
    fn default_geometry_is_identity() {
        let img = gradient(6, 4);
        let out = apply(&img, &Geometry::default());
        assert_eq!(out.to_rgba8(), img.to_rgba8());
    }

    #[test]
    fn scale_changes_output_dimensions() {
        let geometry = Geometry {
            scale: 50.0,
            ..Geometry::default()
        };
        let out = apply(&gradient(8, 6), &geometry);
        assert_eq!(out.dimensions(), (4, 3));
    }

    #[test]
    fn explicit_size_then_scale() {
        let geometry = Geometry {
            width: Some(10),
            height: Some(4),
            scale: 200.0,
            ..Geometry::default()
        };
        let out = apply(&gradient(8, 6), &geometry);
        assert_eq!(out.dimensions(), (20, 8));
    }

    #[test]
    fn half_turn_flips_corners() {
        let img = gradient(4, 2);
        let geometry = Geometry {
            rotation: 180.0,
            ..Geometry::default()
        };
        let out = apply(&img, &geometry).to_rgba8();
        assert_eq!(out.get_pixel(0, 0), img.to_rgba8().get_pixel(3, 1));
    }

    #[test]
    fn rotation_wraps_and_keeps_canvas() {
        let img = gradient(9, 9);
        let wrapped = Geometry {
            rotation: 405.0,
            ..Geometry::default()
        };
        let plain = Geometry {
            rotation: 45.0,
            ..Geometry::default()
        };
        let a = apply(&img, &wrapped).to_rgba8();
        let b = apply(&img, &plain).to_rgba8();
        assert_eq!(a.dimensions(), (9, 9));
        assert_eq!(a, b);
        // Corners fall outside the rotated source.
        assert_eq!(a.get_pixel(0, 0)[3], 0);
    }
}
