use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::DynamicImage;
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use serde::{Deserialize, Serialize};

/// ravif speed, 1 (slowest) to 10. Fixed so identical inputs encode identically.
const AVIF_SPEED: u8 = 6;

#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    #[error("{format} encode failed: {source}")]
    Encode {
        format: ExportFormat,
        #[source]
        source: image::ImageError,
    },

    #[error("{format} encoder produced no output")]
    EmptyOutput { format: ExportFormat },

    #[error("unknown export format: {0}")]
    UnknownFormat(String),

    #[error("writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Png,
    Jpeg,
    Webp,
    Avif,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 4] = [
        ExportFormat::Png,
        ExportFormat::Jpeg,
        ExportFormat::Webp,
        ExportFormat::Avif,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ExportFormat::Png => "PNG",
            ExportFormat::Jpeg => "JPEG",
            ExportFormat::Webp => "WEBP",
            ExportFormat::Avif => "AVIF",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpeg => "jpeg",
            ExportFormat::Webp => "webp",
            ExportFormat::Avif => "avif",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Png => "image/png",
            ExportFormat::Jpeg => "image/jpeg",
            ExportFormat::Webp => "image/webp",
            ExportFormat::Avif => "image/avif",
        }
    }

    /// Whether the quality setting has any effect on the encoded bytes.
    pub fn uses_quality(self) -> bool {
        matches!(self, ExportFormat::Jpeg | ExportFormat::Avif)
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(ExportFormat::Png),
            "jpeg" | "jpg" => Ok(ExportFormat::Jpeg),
            "webp" => Ok(ExportFormat::Webp),
            "avif" => Ok(ExportFormat::Avif),
            other => Err(ExportError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f32", into = "f32")]
/// Lossy compression quality as a fraction in `[0.1, 1.0]`. Out-of-range
/// values are clamped on construction.
pub struct Quality(f32);

impl Quality {
    pub const MIN: f32 = 0.1;
    pub const MAX: f32 = 1.0;
    pub const DEFAULT: Quality = Quality(0.8);

    pub fn new(fraction: f32) -> Self {
        if fraction.is_nan() {
            Self::DEFAULT
        } else {
            Quality(fraction.clamp(Self::MIN, Self::MAX))
        }
    }

    pub fn fraction(self) -> f32 {
        self.0
    }

    pub fn percent(self) -> u8 {
        ((self.0 * 100.0).round() as u8).clamp(1, 100)
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<f32> for Quality {
    fn from(v: f32) -> Self {
        Quality::new(v)
    }
}

impl From<Quality> for f32 {
    fn from(q: Quality) -> Self {
        q.0
    }
}

/// Encode `img` as `format`. PNG ignores `quality` (fixed compression and
/// filter), so identical pixels always produce identical bytes. The image
/// crate's WebP encoder is lossless only, so quality has no effect there
/// either.
pub fn encode(img: &DynamicImage, format: ExportFormat, quality: Quality) -> Result<Vec<u8>, ExportError> {
    let mut buf = Vec::new();
    let result = match format {
        ExportFormat::Png => {
            let encoder = PngEncoder::new_with_quality(
                &mut buf,
                CompressionType::Default,
                PngFilterType::Adaptive,
            );
            DynamicImage::ImageRgba8(img.to_rgba8()).write_with_encoder(encoder)
        }
        ExportFormat::Jpeg => {
            // JPEG has no alpha channel.
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality.percent());
            DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)
        }
        ExportFormat::Webp => {
            let encoder = WebPEncoder::new_lossless(&mut buf);
            DynamicImage::ImageRgba8(img.to_rgba8()).write_with_encoder(encoder)
        }
        ExportFormat::Avif => {
            let encoder = AvifEncoder::new_with_speed_quality(&mut buf, AVIF_SPEED, quality.percent());
            DynamicImage::ImageRgba8(img.to_rgba8()).write_with_encoder(encoder)
        }
    };
    result.map_err(|source| ExportError::Encode { format, source })?;

    if buf.is_empty() {
        return Err(ExportError::EmptyOutput { format });
    }
    tracing::debug!(%format, quality = quality.fraction(), bytes = buf.len(), "encoded");
    Ok(buf)
}

/// Encoded export ready to be written or compared.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportArtifact {
    pub format: ExportFormat,
    pub quality: Quality,
    pub bytes: Vec<u8>,
}

impl ExportArtifact {
    pub fn encode(img: &DynamicImage, format: ExportFormat, quality: Quality) -> Result<Self, ExportError> {
        let bytes = encode(img, format, quality)?;
        Ok(Self {
            format,
            quality,
            bytes,
        })
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn file_name(&self) -> String {
        suggested_file_name(self.format)
    }

    /// Write into `dir` without clobbering earlier exports. The bytes land in
    /// a temporary file first and are renamed into place, so a failed write
    /// never leaves a partial file under the final name.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, ExportError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| ExportError::Io { path, source }
        };
        if self.bytes.is_empty() {
            return Err(ExportError::EmptyOutput {
                format: self.format,
            });
        }
        std::fs::create_dir_all(dir).map_err(io_err(dir))?;

        let target = build_output_path(dir, self.format);
        let partial = target.with_extension(format!("{}.part", self.format.extension()));
        write_atomically(&self.bytes, &partial, &target)?;

        tracing::info!(path = %target.display(), bytes = self.bytes.len(), "exported");
        Ok(target)
    }
}

/// Write `bytes` to `partial` and rename it to `target`. On failure the
/// partial file is removed.
fn write_atomically(bytes: &[u8], partial: &Path, target: &Path) -> Result<(), ExportError> {
    let result = write_then_rename(bytes, partial, target);
    if result.is_err() {
        if let Err(cleanup) = std::fs::remove_file(partial) {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %partial.display(), %cleanup, "partial export left behind");
            }
        }
    }
    result
}

fn write_then_rename(bytes: &[u8], partial: &Path, target: &Path) -> Result<(), ExportError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| ExportError::Io { path, source }
    };
    let mut file = std::fs::File::create(partial).map_err(io_err(partial))?;
    file.write_all(bytes).map_err(io_err(partial))?;
    file.sync_all().map_err(io_err(partial))?;
    drop(file);
    std::fs::rename(partial, target).map_err(io_err(target))
}

pub fn suggested_file_name(format: ExportFormat) -> String {
    format!("optimized.{}", format.extension())
}

fn build_output_path(dir: &Path, format: ExportFormat) -> PathBuf {
    let base = dir.join(suggested_file_name(format));
    if !base.exists() {
        return base;
    }
    for n in 2..10000 {
        let candidate = dir.join(format!("optimized-{}.{}", n, format.extension()));
        if !candidate.exists() {
            return candidate;
        }
    }
    dir.join(format!("optimized-final.{}", format.extension()))
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// Encoded size relative to the source file.
pub enum SizeChange {
    Smaller { percent: f64 },
    Larger { percent: f64 },
    Same,
}

impl SizeChange {
    pub fn between(original: u64, encoded: u64) -> Option<Self> {
        if original == 0 {
            return None;
        }
        let ratio = encoded as f64 / original as f64;
        Some(if encoded < original {
            SizeChange::Smaller {
                percent: (1.0 - ratio) * 100.0,
            }
        } else if encoded > original {
            SizeChange::Larger {
                percent: (ratio - 1.0) * 100.0,
            }
        } else {
            SizeChange::Same
        })
    }
}

impl fmt::Display for SizeChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeChange::Smaller { percent } => write!(f, "↓{:.1}%", percent),
            SizeChange::Larger { percent } => write!(f, "↑{:.1}%", percent),
            SizeChange::Same => f.write_str("0.0%"),
        }
    }
}

pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};

    use super::*;

    fn sample() -> DynamicImage {
        DynamicImage::ImageRgba8(ImageBuffer::from_fn(16, 12, |x, y| {
            Rgba([(x * 15) as u8, (y * 20) as u8, 128, 255])
        }))
    }

    #[test]
    fn png_ignores_quality() {
        let img = sample();
        let a = encode(&img, ExportFormat::Png, Quality::new(0.2)).unwrap();
        let b = encode(&img, ExportFormat::Png, Quality::new(0.9)).unwrap();
        assert_eq!(a, b);
        assert_eq!(image::guess_format(&a).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn png_round_trips_pixels() {
        let img = sample();
        let bytes = encode(&img, ExportFormat::Png, Quality::default()).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.to_rgba8(), img.to_rgba8());
    }

    #[test]
    fn jpeg_quality_changes_output() {
        let img = sample();
        let low = encode(&img, ExportFormat::Jpeg, Quality::new(0.1)).unwrap();
        let high = encode(&img, ExportFormat::Jpeg, Quality::new(1.0)).unwrap();
        assert_ne!(low, high);
        assert!(low.len() < high.len());
        assert_eq!(image::guess_format(&low).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn webp_is_lossless() {
        let img = sample();
        let bytes = encode(&img, ExportFormat::Webp, Quality::default()).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::WebP);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.to_rgba8(), img.to_rgba8());
    }

    #[test]
    fn quality_is_clamped_into_range() {
        assert_eq!(Quality::new(0.0).fraction(), 0.1);
        assert_eq!(Quality::new(3.0).fraction(), 1.0);
        assert_eq!(Quality::new(f32::NAN), Quality::DEFAULT);
        assert_eq!(Quality::new(0.8).percent(), 80);
    }

    #[test]
    fn format_parses_case_insensitively() {
        assert_eq!("JPG".parse::<ExportFormat>().unwrap(), ExportFormat::Jpeg);
        assert_eq!(" avif ".parse::<ExportFormat>().unwrap(), ExportFormat::Avif);
        assert!(matches!(
            "gif".parse::<ExportFormat>(),
            Err(ExportError::UnknownFormat(_))
        ));
        assert!(!ExportFormat::Png.uses_quality());
    }

    #[test]
    fn suggested_name_uses_extension() {
        assert_eq!(suggested_file_name(ExportFormat::Webp), "optimized.webp");
    }

    #[test]
    fn empty_artifact_is_not_written() {
        let artifact = ExportArtifact {
            format: ExportFormat::Png,
            quality: Quality::default(),
            bytes: Vec::new(),
        };
        let dir = std::env::temp_dir().join(format!("filterstack-empty-{}", std::process::id()));
        assert!(matches!(
            artifact.write_to(&dir),
            Err(ExportError::EmptyOutput { .. })
        ));
        assert!(!dir.join("optimized.png").exists());
    }

    #[test]
    fn write_to_does_not_clobber() {
        let dir = std::env::temp_dir().join(format!("filterstack-export-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let artifact = ExportArtifact::encode(&sample(), ExportFormat::Png, Quality::default()).unwrap();
        let first = artifact.write_to(&dir).unwrap();
        let second = artifact.write_to(&dir).unwrap();
        assert_eq!(first.file_name().unwrap(), "optimized.png");
        assert_eq!(second.file_name().unwrap(), "optimized-2.png");
        assert_eq!(std::fs::read(&second).unwrap(), artifact.bytes);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn failed_rename_removes_partial_file() {
        let dir = std::env::temp_dir().join(format!("filterstack-export-partial-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        // A non-empty directory in the way makes the rename fail.
        let target = dir.join("optimized.png");
        std::fs::create_dir_all(target.join("occupied")).unwrap();
        let partial = dir.join("optimized.png.part");

        let err = write_atomically(b"bytes", &partial, &target).unwrap_err();
        assert!(matches!(err, ExportError::Io { ref path, .. } if path == &target));
        assert!(!partial.exists());
        assert!(target.is_dir());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn size_change_reports_direction() {
        assert_eq!(SizeChange::between(0, 10), None);
        assert_eq!(
            SizeChange::between(200, 150),
            Some(SizeChange::Smaller { percent: 25.0 })
        );
        assert_eq!(
            SizeChange::between(100, 150),
            Some(SizeChange::Larger { percent: 50.0 })
        );
        assert_eq!(SizeChange::between(100, 100).unwrap().to_string(), "0.0%");
        assert_eq!(
            SizeChange::Smaller { percent: 25.0 }.to_string(),
            "↓25.0%"
        );
    }

    #[test]
    fn file_sizes_are_human_readable() {
        assert_eq!(format_file_size(0), "0 Bytes");
        assert_eq!(format_file_size(512), "512 Bytes");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5 MB");
    }
}
