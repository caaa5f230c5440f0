use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// One set of colour/tone adjustments. Every field has an identity value at
/// which the adjustment is skipped entirely.
pub struct FilterValues {
    /// Degrees, wraps mod 360.
    pub hue: f32,
    /// Percent, 0–200.
    pub saturation: f32,
    /// Percent, 0–200.
    pub brightness: f32,
    /// Percent, 0–200.
    pub contrast: f32,
    /// Percent, 0–100.
    pub grayscale: f32,
    /// Percent, 0–100.
    pub invert: f32,
    /// Pixels, 0–20.
    pub blur: f32,
}

impl FilterValues {
    pub const IDENTITY: FilterValues = FilterValues {
        hue: 0.0,
        saturation: 100.0,
        brightness: 100.0,
        contrast: 100.0,
        grayscale: 0.0,
        invert: 0.0,
        blur: 0.0,
    };

    pub fn is_identity(&self) -> bool {
        self.color_is_identity() && self.blur == 0.0
    }

    /// True when none of the colour-matrix fields differ from identity.
    pub fn color_is_identity(&self) -> bool {
        self.hue_degrees() == 0.0
            && self.saturation == 100.0
            && self.brightness == 100.0
            && self.contrast == 100.0
            && self.grayscale == 0.0
            && self.invert == 0.0
    }

    /// Hue reduced into `[0, 360)`.
    pub fn hue_degrees(&self) -> f32 {
        let h = self.hue.rem_euclid(360.0);
        if h.is_finite() { h } else { 0.0 }
    }

    /// Copy with every field constrained to its domain.
    pub fn clamped(&self) -> Self {
        Self {
            hue: self.hue_degrees(),
            saturation: self.saturation.clamp(0.0, 200.0),
            brightness: self.brightness.clamp(0.0, 200.0),
            contrast: self.contrast.clamp(0.0, 200.0),
            grayscale: self.grayscale.clamp(0.0, 100.0),
            invert: self.invert.clamp(0.0, 100.0),
            blur: self.blur.clamp(0.0, 20.0),
        }
    }
}

impl Default for FilterValues {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Committed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
/// Immutable snapshot produced by applying the working layer.
pub struct Layer {
    pub kind: LayerKind,
    pub values: FilterValues,
}

impl Layer {
    pub fn committed(values: FilterValues) -> Self {
        Self {
            kind: LayerKind::Committed,
            values,
        }
    }
}

pub const MIN_SCALE: f32 = 10.0;
pub const MAX_SCALE: f32 = 200.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// Geometric parameters, independent of the filter stack.
pub struct Geometry {
    /// Degrees, wraps mod 360.
    pub rotation: f32,
    /// Percent, 10–200.
    pub scale: f32,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub keep_aspect_ratio: bool,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            rotation: 0.0,
            scale: 100.0,
            width: None,
            height: None,
            keep_aspect_ratio: true,
        }
    }
}

impl Geometry {
    pub fn rotation_degrees(&self) -> f32 {
        let r = self.rotation.rem_euclid(360.0);
        if r.is_finite() { r } else { 0.0 }
    }

    pub fn scale_factor(&self) -> f32 {
        if self.scale.is_finite() {
            self.scale.clamp(MIN_SCALE, MAX_SCALE) / 100.0
        } else {
            1.0
        }
    }

    /// Render target size: explicit dimensions (or natural ones) times scale.
    pub fn output_size(&self, natural_w: u32, natural_h: u32) -> (u32, u32) {
        let base_w = self.width.unwrap_or(natural_w);
        let base_h = self.height.unwrap_or(natural_h);
        let s = self.scale_factor();
        let w = ((base_w as f32 * s).round() as u32).max(1);
        let h = ((base_h as f32 * s).round() as u32).max(1);
        (w, h)
    }

    pub fn is_identity_for(&self, natural_w: u32, natural_h: u32) -> bool {
        self.rotation_degrees() == 0.0 && self.output_size(natural_w, natural_h) == (natural_w, natural_h)
    }

    /// Sets the explicit width, following with the height when the aspect
    /// ratio is locked.
    pub fn set_width(&mut self, width: u32, natural: (u32, u32)) {
        self.width = Some(width);
        if self.keep_aspect_ratio {
            if let Some(aspect) = aspect_ratio(natural) {
                self.height = Some(((width as f64 / aspect).round() as u32).max(1));
            }
        }
    }

    pub fn set_height(&mut self, height: u32, natural: (u32, u32)) {
        self.height = Some(height);
        if self.keep_aspect_ratio {
            if let Some(aspect) = aspect_ratio(natural) {
                self.width = Some(((height as f64 * aspect).round() as u32).max(1));
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn aspect_ratio((w, h): (u32, u32)) -> Option<f64> {
    if w == 0 || h == 0 {
        None
    } else {
        Some(w as f64 / h as f64)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Preset {
    pub key: &'static str,
    pub name: &'static str,
    pub values: FilterValues,
}

const fn preset(
    key: &'static str,
    name: &'static str,
    hue: f32,
    saturation: f32,
    brightness: f32,
    contrast: f32,
    grayscale: f32,
    invert: f32,
    blur: f32,
) -> Preset {
    Preset {
        key,
        name,
        values: FilterValues {
            hue,
            saturation,
            brightness,
            contrast,
            grayscale,
            invert,
            blur,
        },
    }
}

pub const PRESETS: [Preset; 12] = [
    preset("none", "None", 0.0, 100.0, 100.0, 100.0, 0.0, 0.0, 0.0),
    preset("vintage", "Vintage", 15.0, 80.0, 110.0, 105.0, 0.0, 0.0, 0.0),
    preset("cool", "Cool", 200.0, 90.0, 105.0, 115.0, 0.0, 0.0, 0.0),
    preset("warm", "Warm", 25.0, 110.0, 105.0, 105.0, 0.0, 0.0, 0.0),
    preset("dramatic", "Dramatic", 0.0, 70.0, 90.0, 130.0, 0.0, 0.0, 0.0),
    preset("soft", "Soft", 0.0, 85.0, 95.0, 85.0, 0.0, 0.0, 0.0),
    preset("high_contrast", "High Contrast", 0.0, 100.0, 110.0, 140.0, 0.0, 0.0, 0.0),
    preset("sepia", "Sepia", 35.0, 50.0, 100.0, 110.0, 0.0, 0.0, 0.0),
    preset("black_and_white", "Black & White", 0.0, 0.0, 100.0, 120.0, 100.0, 0.0, 0.0),
    preset("film_noir", "Film Noir", 0.0, 0.0, 80.0, 150.0, 100.0, 0.0, 0.0),
    preset("dreamy", "Dreamy", 0.0, 90.0, 110.0, 105.0, 0.0, 0.0, 3.0),
    preset("negative", "Negative", 0.0, 100.0, 100.0, 100.0, 0.0, 100.0, 0.0),
];

pub fn find_preset(key: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|p| p.key.eq_ignore_ascii_case(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_values_are_identity() {
        assert!(FilterValues::default().is_identity());
        assert!(FilterValues::default().color_is_identity());
    }

    #[test]
    fn full_turn_hue_counts_as_identity() {
        let v = FilterValues {
            hue: 360.0,
            ..FilterValues::IDENTITY
        };
        assert!(v.color_is_identity());
        assert_eq!(v.hue_degrees(), 0.0);
    }

    #[test]
    fn clamped_constrains_every_field() {
        let v = FilterValues {
            hue: -90.0,
            saturation: 500.0,
            brightness: -3.0,
            contrast: 201.0,
            grayscale: 140.0,
            invert: -1.0,
            blur: 99.0,
        }
        .clamped();
        assert_eq!(v.hue, 270.0);
        assert_eq!(v.saturation, 200.0);
        assert_eq!(v.brightness, 0.0);
        assert_eq!(v.contrast, 200.0);
        assert_eq!(v.grayscale, 100.0);
        assert_eq!(v.invert, 0.0);
        assert_eq!(v.blur, 20.0);
    }

    #[test]
    fn output_size_prefers_explicit_dimensions_then_scales() {
        let mut g = Geometry::default();
        assert_eq!(g.output_size(400, 200), (400, 200));
        g.scale = 50.0;
        assert_eq!(g.output_size(400, 200), (200, 100));
        g.width = Some(100);
        g.height = Some(80);
        assert_eq!(g.output_size(400, 200), (50, 40));
    }

    #[test]
    fn locked_aspect_ratio_follows_width_and_height() {
        let mut g = Geometry::default();
        g.set_width(300, (600, 400));
        assert_eq!((g.width, g.height), (Some(300), Some(200)));
        g.set_height(100, (600, 400));
        assert_eq!((g.width, g.height), (Some(150), Some(100)));

        g.keep_aspect_ratio = false;
        g.set_width(90, (600, 400));
        assert_eq!((g.width, g.height), (Some(90), Some(100)));
    }

    #[test]
    fn presets_are_within_domain() {
        for p in PRESETS.iter() {
            assert_eq!(p.values, p.values.clamped(), "{}", p.key);
        }
        assert!(find_preset("none").unwrap().values.is_identity());
        assert_eq!(find_preset("Dreamy").unwrap().values.blur, 3.0);
    }
}
