use std::sync::Arc;
use std::time::Instant;

use image::DynamicImage;

use crate::state::{FilterValues, Geometry};

use super::{blur, color, transform};

/// Render `source` through the full edit: geometry, then one colour pass per
/// layer in commit order, then a single blur over the result.
///
/// Preview and export both go through here, so the two never diverge. With
/// identity geometry and identity layers the output is a bit-identical copy
/// of the source.
pub fn render(source: &DynamicImage, geometry: &Geometry, layers: &[FilterValues]) -> DynamicImage {
    let started = Instant::now();

    let mut out = transform::apply(source, geometry);
    for values in layers {
        out = color::apply(out, values);
    }
    out = blur::apply(out, blur::combined_sigma(layers));

    tracing::debug!(
        width = out.width(),
        height = out.height(),
        layers = layers.len(),
        elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
        "rendered"
    );
    out
}

/// Self-contained render input, cheap to hand to a worker thread.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub source: Arc<DynamicImage>,
    pub geometry: Geometry,
    pub layers: Vec<FilterValues>,
}

impl RenderJob {
    pub fn run(&self) -> DynamicImage {
        render(&self.source, &self.geometry, &self.layers)
    }

    /// Re-express the job against a source downscaled by `factor`, so that
    /// explicit sizes and blur radii keep their proportions in the preview.
    pub fn at_preview_scale(mut self, preview_source: Arc<DynamicImage>, factor: f32) -> Self {
        if (factor - 1.0).abs() > f32::EPSILON {
            let shrink = |v: u32| ((v as f32 * factor).round() as u32).max(1);
            self.geometry.width = self.geometry.width.map(shrink);
            self.geometry.height = self.geometry.height.map(shrink);
            for layer in &mut self.layers {
                layer.blur *= factor;
            }
        }
        self.source = preview_source;
        self
    }
}
