use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use rayon::prelude::*;

#[path = "../decode.rs"]
mod decode;
#[path = "../export.rs"]
mod export;
#[path = "../history.rs"]
mod history;
#[path = "../processing/mod.rs"]
mod processing;
#[path = "../state.rs"]
mod state;

use export::{ExportArtifact, ExportFormat, Quality};
use processing::RenderJob;

const PREVIEW_MAX: u32 = 1600;

fn list_images(dir: &Path, limit: usize) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("read_dir failed for {}", dir.display()))?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && decode::is_supported_image(p))
        .collect();
    files.sort();
    files.truncate(limit);
    Ok(files)
}

fn median_ms(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) * 0.5
    } else {
        sorted[mid]
    }
}

/// Three committed presets plus an in-progress blur, a typical heavy edit.
fn build_stack() -> history::FilterStack {
    let mut stack = history::FilterStack::new();
    for key in ["warm", "dramatic", "vintage"] {
        if let Some(preset) = state::find_preset(key) {
            stack.set_working_layer(preset.values);
            stack.apply_working_layer();
        }
    }
    stack.set_working_layer(state::FilterValues {
        blur: 2.0,
        ..state::FilterValues::IDENTITY
    });
    stack
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args();
    let _bin = args.next();
    let dir = args
        .next()
        .map(PathBuf::from)
        .context("usage: perf_probe <image-dir> [count]")?;
    let count = args
        .next()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(20);

    let files = list_images(&dir, count)?;
    if files.is_empty() {
        anyhow::bail!("No images found in {}", dir.display());
    }
    eprintln!("Using {} images from {}", files.len(), dir.display());

    let stack = build_stack();
    let layers = stack.render_layers(true);
    let geometry = state::Geometry {
        rotation: 90.0,
        ..state::Geometry::default()
    };

    let mut decode_samples = Vec::with_capacity(files.len());
    let mut preview_samples = Vec::with_capacity(files.len());
    let mut sources = Vec::with_capacity(files.len());
    for path in &files {
        let t0 = Instant::now();
        let img = decode::open_image(path)
            .with_context(|| format!("open failed for {}", path.display()))?;
        decode_samples.push(t0.elapsed().as_secs_f64() * 1000.0);

        let full = Arc::new(img);
        let (small, factor) = decode::fit_within((*full).clone(), PREVIEW_MAX);
        let job = RenderJob {
            source: full.clone(),
            geometry,
            layers: layers.clone(),
        }
        .at_preview_scale(Arc::new(small), factor);
        let t0 = Instant::now();
        let _preview = job.run();
        preview_samples.push(t0.elapsed().as_secs_f64() * 1000.0);
        sources.push((path.clone(), full));
    }

    let out_dir = std::env::temp_dir().join(format!(
        "filterstack-perf-probe-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    ));

    let export_start = Instant::now();
    let sizes: Vec<(ExportFormat, u64)> = sources
        .par_iter()
        .map(|(path, full)| -> Result<Vec<(ExportFormat, u64)>> {
            let rendered = processing::render(full, &geometry, &layers);
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("image");
            let dir = out_dir.join(stem);
            ExportFormat::ALL
                .iter()
                .map(|&format| {
                    let artifact = ExportArtifact::encode(&rendered, format, Quality::DEFAULT)
                        .with_context(|| format!("{format} encode failed for {}", path.display()))?;
                    artifact.write_to(&dir)?;
                    Ok((format, artifact.size()))
                })
                .collect()
        })
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect();
    let export_wall_s = export_start.elapsed().as_secs_f64();

    println!("METRIC file_count={}", files.len());
    println!("METRIC decode_ms_median={:.2}", median_ms(&decode_samples));
    println!("METRIC preview_ms_median={:.2}", median_ms(&preview_samples));
    println!("METRIC export_wall_s={:.2}", export_wall_s);
    for format in ExportFormat::ALL {
        let total: u64 = sizes.iter().filter(|(f, _)| *f == format).map(|(_, s)| s).sum();
        println!(
            "METRIC export_{}_total={}",
            format.extension(),
            export::format_file_size(total)
        );
    }
    println!("METRIC export_out_dir={}", out_dir.display());

    Ok(())
}
