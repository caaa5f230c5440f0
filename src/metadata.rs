use std::path::Path;
use std::time::SystemTime;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ExifSummary {
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub lens: Option<String>,
    pub iso: Option<u32>,
    pub shutter_speed: Option<String>,
    pub aperture: Option<String>,
    pub focal_length: Option<String>,
    pub date_taken: Option<String>,
}

impl ExifSummary {
    pub fn camera(&self) -> Option<String> {
        match (&self.camera_make, &self.camera_model) {
            (Some(make), Some(model)) => Some(format!("{} {}", make, model)),
            (Some(make), None) => Some(make.clone()),
            (None, Some(model)) => Some(model.clone()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
/// File-level facts about the loaded image. Optional parts stay `None` when
/// they cannot be read.
pub struct ImageInfo {
    pub name: String,
    pub file_size: u64,
    pub format: String,
    pub dimensions: Option<(u32, u32)>,
    pub last_modified: Option<SystemTime>,
    pub exif: Option<ExifSummary>,
}

impl ImageInfo {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let fs_meta = std::fs::metadata(path)?;
        let exif = match read_exif(path) {
            Ok(summary) if !summary.is_empty() => Some(summary),
            Ok(_) => None,
            Err(err) => {
                tracing::debug!(path = %path.display(), %err, "no EXIF data");
                None
            }
        };
        Ok(Self {
            name: path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned(),
            file_size: fs_meta.len(),
            format: format_label(path),
            dimensions: None,
            last_modified: fs_meta.modified().ok(),
            exif,
        })
    }
}

fn format_label(path: &Path) -> String {
    image::ImageFormat::from_path(path)
        .ok()
        .and_then(|f| f.extensions_str().first().copied())
        .map(str::to_string)
        .or_else(|| {
            path.extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn read_exif(path: &Path) -> anyhow::Result<ExifSummary> {
    let file = std::fs::File::open(path)?;
    let mut bufreader = std::io::BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut bufreader)?;

    let field = |tag| {
        exif.get_field(tag, exif::In::PRIMARY)
            .map(|f| f.display_value().to_string())
    };

    Ok(ExifSummary {
        camera_make: field(exif::Tag::Make),
        camera_model: field(exif::Tag::Model),
        lens: field(exif::Tag::LensModel),
        iso: exif
            .get_field(exif::Tag::PhotographicSensitivity, exif::In::PRIMARY)
            .and_then(|f| match f.value {
                exif::Value::Short(ref v) => v.first().map(|&x| x as u32),
                _ => None,
            }),
        shutter_speed: field(exif::Tag::ExposureTime),
        aperture: field(exif::Tag::FNumber),
        focal_length: field(exif::Tag::FocalLength),
        date_taken: field(exif::Tag::DateTimeOriginal),
    })
}
