use std::path::Path;

use image::DynamicImage;
use serde_json::{Map, Value};

pub const MIN_COLORS: usize = 3;
pub const MAX_COLORS: usize = 32;
pub const FILE_NAME: &str = "color-palette.json";

/// Every Nth pixel is sampled.
const SAMPLE_STEP: usize = 5;
const MIN_ALPHA: u8 = 125;
const WHITE_CUTOFF: u8 = 250;

pub type Rgb = [u8; 3];

/// Dominant colours by median cut, most populous first. Returns `None` when
/// the image has no usable (opaque, non-white) pixels.
pub fn extract(img: &DynamicImage, count: usize) -> Option<Vec<Rgb>> {
    let count = count.clamp(MIN_COLORS, MAX_COLORS);
    let rgba = img.to_rgba8();
    let samples: Vec<Rgb> = rgba
        .pixels()
        .step_by(SAMPLE_STEP)
        .filter(|p| p[3] >= MIN_ALPHA)
        .filter(|p| !(p[0] > WHITE_CUTOFF && p[1] > WHITE_CUTOFF && p[2] > WHITE_CUTOFF))
        .map(|p| [p[0], p[1], p[2]])
        .collect();
    if samples.is_empty() {
        return None;
    }

    let mut boxes = vec![samples];
    while boxes.len() < count {
        let Some((index, channel)) = widest_box(&boxes) else {
            break;
        };
        let mut pixels = boxes.swap_remove(index);
        pixels.sort_unstable_by_key(|p| (p[channel], p[(channel + 1) % 3], p[(channel + 2) % 3]));
        let upper = pixels.split_off(pixels.len() / 2);
        boxes.push(pixels);
        boxes.push(upper);
    }

    let mut colors: Vec<(usize, Rgb)> = boxes.iter().map(|b| (b.len(), average(b))).collect();
    colors.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    Some(colors.into_iter().map(|(_, c)| c).collect())
}

/// Box with the widest single-channel range that can still be split.
fn widest_box(boxes: &[Vec<Rgb>]) -> Option<(usize, usize)> {
    boxes
        .iter()
        .enumerate()
        .filter(|(_, b)| b.len() >= 2)
        .map(|(i, b)| {
            let (channel, range) = (0..3)
                .map(|c| {
                    let min = b.iter().map(|p| p[c]).min().unwrap_or(0);
                    let max = b.iter().map(|p| p[c]).max().unwrap_or(0);
                    (c, max - min)
                })
                .max_by_key(|&(c, range)| (range, std::cmp::Reverse(c)))
                .unwrap_or((0, 0));
            (i, channel, range, b.len())
        })
        .filter(|&(_, _, range, _)| range > 0)
        .max_by_key(|&(i, _, range, len)| (range, len, std::cmp::Reverse(i)))
        .map(|(i, channel, _, _)| (i, channel))
}

fn average(pixels: &[Rgb]) -> Rgb {
    let n = pixels.len().max(1) as u64;
    let mut sum = [0u64; 3];
    for p in pixels {
        for c in 0..3 {
            sum[c] += p[c] as u64;
        }
    }
    [
        ((sum[0] + n / 2) / n) as u8,
        ((sum[1] + n / 2) / n) as u8,
        ((sum[2] + n / 2) / n) as u8,
    ]
}

pub fn to_hex(rgb: Rgb) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}

/// `{"color_01": "#rrggbb", ...}` in extraction order.
pub fn to_json(colors: &[Rgb]) -> serde_json::Result<String> {
    let mut map = Map::new();
    for (index, color) in colors.iter().enumerate() {
        map.insert(format!("color_{:02}", index + 1), Value::String(to_hex(*color)));
    }
    serde_json::to_string_pretty(&Value::Object(map))
}

pub fn save_json(colors: &[Rgb], dir: &Path) -> anyhow::Result<std::path::PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(FILE_NAME);
    std::fs::write(&path, to_json(colors)?)?;
    Ok(path)
}
