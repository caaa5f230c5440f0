use std::path::Path;

use image::DynamicImage;

static RAW_EXTS: &[&str] = &["raf", "dng", "nef", "cr2", "arw"];
static SUPPORTED_IMAGE_EXTS: &[&str] = &[
    "jpg", "jpeg", "png", "tiff", "tif", "webp", "bmp", "gif", "avif", "raf", "dng", "nef", "cr2",
    "arw",
];

fn has_extension(path: &Path, exts: &[&str]) -> bool {
    let Some(ext) = path.extension().map(|e| e.to_string_lossy()) else {
        return false;
    };
    exts.iter().any(|known| ext.eq_ignore_ascii_case(known))
}

pub fn is_raw_image(path: &Path) -> bool {
    has_extension(path, RAW_EXTS)
}

/// Returns `true` if the path has a supported image extension.
pub fn is_supported_image(path: &Path) -> bool {
    has_extension(path, SUPPORTED_IMAGE_EXTS)
}

/// Decode an in-memory encoded image.
pub fn decode_bytes(bytes: &[u8]) -> anyhow::Result<DynamicImage> {
    Ok(image::load_from_memory(bytes)?)
}

/// Open an image, falling back to RAW develop for RAW extensions.
pub fn open_image(path: &Path) -> anyhow::Result<DynamicImage> {
    open_image_with_hooks(path, |p| Ok(image::open(p)?), open_raw)
}

fn open_image_with_hooks<FStd, FRaw>(
    path: &Path,
    open_std: FStd,
    open_raw: FRaw,
) -> anyhow::Result<DynamicImage>
where
    FStd: Fn(&Path) -> anyhow::Result<DynamicImage>,
    FRaw: Fn(&Path) -> anyhow::Result<DynamicImage>,
{
    match open_std(path) {
        Ok(img) => Ok(img),
        Err(err) if is_raw_image(path) => {
            tracing::debug!(path = %path.display(), %err, "standard decode failed, trying raw develop");
            open_raw(path)
        }
        Err(err) => Err(err),
    }
}

fn open_raw(path: &Path) -> anyhow::Result<DynamicImage> {
    let raw = rawler::decode_file(path)?;
    let develop = rawler::imgop::develop::RawDevelop::default();
    let intermediate = develop.develop_intermediate(&raw)?;
    intermediate
        .to_dynamic_image()
        .ok_or_else(|| anyhow::anyhow!("raw develop produced invalid image"))
}

/// Downscale so the longest edge is at most `max_edge`. Returns the image and
/// the factor applied (1.0 when already small enough).
pub fn fit_within(img: DynamicImage, max_edge: u32) -> (DynamicImage, f32) {
    let long = img.width().max(img.height());
    if max_edge == 0 || long <= max_edge {
        return (img, 1.0);
    }
    let thumb = img.thumbnail(max_edge, max_edge);
    let factor = thumb.width().max(thumb.height()) as f32 / long as f32;
    (thumb, factor)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::path::Path;

    use image::{DynamicImage, ImageBuffer, Rgba};

    use super::{decode_bytes, fit_within, is_raw_image, is_supported_image, open_image_with_hooks};

    fn img(px: [u8; 4]) -> DynamicImage {
        DynamicImage::ImageRgba8(ImageBuffer::from_pixel(1, 1, Rgba(px)))
    }

    #[test]
    fn raw_falls_back_when_standard_decode_fails() {
        let raw_calls = Cell::new(0);
        let out = open_image_with_hooks(
            Path::new("/tmp/test.raf"),
            |_: &Path| anyhow::bail!("unsupported"),
            |_: &Path| {
                raw_calls.set(raw_calls.get() + 1);
                Ok(img([9, 9, 9, 255]))
            },
        )
        .expect("raw fallback should succeed");
        assert_eq!(raw_calls.get(), 1);
        assert_eq!(out.to_rgba8().get_pixel(0, 0).0, [9, 9, 9, 255]);
    }

    #[test]
    fn non_raw_failure_is_reported() {
        let raw_calls = Cell::new(0);
        let out = open_image_with_hooks(
            Path::new("/tmp/test.jpg"),
            |_: &Path| anyhow::bail!("corrupt"),
            |_: &Path| {
                raw_calls.set(raw_calls.get() + 1);
                Ok(img([1, 1, 1, 255]))
            },
        );
        assert!(out.is_err());
        assert_eq!(raw_calls.get(), 0);
    }

    #[test]
    fn standard_decode_skips_raw() {
        let raw_calls = Cell::new(0);
        let out = open_image_with_hooks(
            Path::new("/tmp/test.dng"),
            |_: &Path| Ok(img([5, 6, 7, 255])),
            |_: &Path| {
                raw_calls.set(raw_calls.get() + 1);
                Ok(img([0, 0, 0, 255]))
            },
        )
        .unwrap();
        assert_eq!(raw_calls.get(), 0);
        assert_eq!(out.to_rgba8().get_pixel(0, 0).0, [5, 6, 7, 255]);
    }

    #[test]
    fn extension_detection_is_case_insensitive() {
        assert!(is_raw_image(Path::new("/tmp/a.RAF")));
        assert!(!is_raw_image(Path::new("/tmp/a.jpg")));
        assert!(is_supported_image(Path::new("/tmp/a.PNG")));
        assert!(!is_supported_image(Path::new("/tmp/a.txt")));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(decode_bytes(b"definitely not an image").is_err());
    }

    #[test]
    fn fit_within_reports_factor() {
        let big = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(400, 200, Rgba([0, 0, 0, 255])));
        let (small, factor) = fit_within(big, 100);
        assert_eq!((small.width(), small.height()), (100, 50));
        assert_eq!(factor, 0.25);

        let (same, factor) = fit_within(img([1, 2, 3, 4]), 100);
        assert_eq!((same.width(), same.height()), (1, 1));
        assert_eq!(factor, 1.0);
    }
}
