use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::export::{ExportFormat, Quality};

pub const EXPORT_DIR_ENV: &str = "FILTERSTACK_EXPORT_DIR";

const DEFAULT_PREVIEW_MAX_EDGE: u32 = 1600;
const DEFAULT_DEBOUNCE_MS: u64 = 150;
const DEFAULT_PALETTE_SIZE: usize = 6;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
/// Persisted settings. Every field is optional so older or hand-edited files
/// still load; the accessors supply defaults.
pub struct AppConfig {
    pub window_width: Option<f32>,
    pub window_height: Option<f32>,
    pub last_open_dir: Option<PathBuf>,
    pub export_format: Option<ExportFormat>,
    pub export_quality: Option<Quality>,
    pub preview_max_edge: Option<u32>,
    pub slider_debounce_ms: Option<u64>,
    pub export_dir: Option<PathBuf>,
    pub palette_size: Option<usize>,
}

impl AppConfig {
    /// Returns the user config file path, if a config directory is available.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("filterstack").join("config.toml"))
    }

    /// Loads config from disk, falling back to defaults on any error.
    pub fn load() -> Self {
        Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Self {
        let Ok(contents) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        toml::from_str(&contents).unwrap_or_else(|err| {
            tracing::warn!(path = %path.display(), %err, "ignoring unreadable config");
            Self::default()
        })
    }

    /// Writes config to disk, ignoring filesystem/serialization errors.
    pub fn save(&self) {
        if let Some(path) = Self::config_path() {
            self.save_to(&path);
        }
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match toml::to_string_pretty(self) {
            Ok(s) => {
                if let Err(err) = std::fs::write(path, s) {
                    tracing::warn!(path = %path.display(), %err, "config not saved");
                }
            }
            Err(err) => tracing::warn!(%err, "config not serializable"),
        }
    }

    pub fn format(&self) -> ExportFormat {
        self.export_format.unwrap_or(ExportFormat::Png)
    }

    pub fn quality(&self) -> Quality {
        self.export_quality.unwrap_or_default()
    }

    pub fn preview_max_edge(&self) -> u32 {
        self.preview_max_edge
            .filter(|&e| e >= 64)
            .unwrap_or(DEFAULT_PREVIEW_MAX_EDGE)
    }

    pub fn slider_debounce(&self) -> Duration {
        Duration::from_millis(self.slider_debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS))
    }

    pub fn palette_size(&self) -> usize {
        self.palette_size
            .unwrap_or(DEFAULT_PALETTE_SIZE)
            .clamp(crate::palette::MIN_COLORS, crate::palette::MAX_COLORS)
    }

    /// Where exports and palettes are written: the environment override,
    /// then the configured directory, then the user's downloads folder.
    pub fn export_dir(&self) -> PathBuf {
        resolve_export_dir(std::env::var_os(EXPORT_DIR_ENV).map(PathBuf::from), self)
    }
}

fn resolve_export_dir(env_override: Option<PathBuf>, config: &AppConfig) -> PathBuf {
    env_override
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(|| config.export_dir.clone())
        .or_else(dirs::download_dir)
        .or_else(dirs::picture_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}
