//! Everything tied to one loaded image.
//!
//! Loading a new image or clearing the current one replaces the whole session
//! state at once: filter stack, geometry, pixels and the last export.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use image::DynamicImage;

use crate::decode;
use crate::export::{ExportArtifact, ExportError, ExportFormat, Quality, SizeChange};
use crate::history::FilterStack;
use crate::metadata::ImageInfo;
use crate::palette::{self, Rgb};
use crate::processing::{RenderJob, render};
use crate::state::{FilterValues, Geometry};

/// Identity of one load request. Only the most recent ticket may complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadTicket(u64);

/// Result of decoding a file, produced off the UI thread.
pub struct Decoded {
    pub image: DynamicImage,
    pub info: Option<ImageInfo>,
    pub palette: Option<Vec<Rgb>>,
}

impl Decoded {
    /// Decode `path` and gather its optional extras. Only the pixel decode
    /// can fail; info and palette are simply absent when unavailable.
    pub fn from_path(path: &Path, palette_size: usize) -> anyhow::Result<Self> {
        let image = decode::open_image(path)
            .with_context(|| format!("decode failed for {}", path.display()))?;
        let info = match ImageInfo::read(path) {
            Ok(mut info) => {
                info.dimensions = Some((image.width(), image.height()));
                Some(info)
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "image info unavailable");
                None
            }
        };
        let palette = palette::extract(&image, palette_size);
        if palette.is_none() {
            tracing::warn!(path = %path.display(), "palette extraction found no usable pixels");
        }
        Ok(Self {
            image,
            info,
            palette,
        })
    }

    pub fn from_image(image: DynamicImage) -> Self {
        Self {
            image,
            info: None,
            palette: None,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum LoadOutcome {
    Loaded,
    /// A newer load superseded this one; nothing changed.
    Stale,
    /// Decode failed; nothing changed.
    Failed(String),
}

/// Decoded source pixels plus a downscaled copy for interactive preview.
pub struct SourceImage {
    pub full: Arc<DynamicImage>,
    pub preview: Arc<DynamicImage>,
    /// Preview size relative to the full image.
    pub preview_factor: f32,
}

impl SourceImage {
    pub fn new(image: DynamicImage, preview_max_edge: u32) -> Self {
        let full = Arc::new(image);
        let (preview, preview_factor) = if full.width().max(full.height()) > preview_max_edge {
            let (small, factor) = decode::fit_within((*full).clone(), preview_max_edge);
            (Arc::new(small), factor)
        } else {
            (full.clone(), 1.0)
        };
        Self {
            full,
            preview,
            preview_factor,
        }
    }

    pub fn natural_size(&self) -> (u32, u32) {
        (self.full.width(), self.full.height())
    }
}

/// Which image and which edit of it an export was rendered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportStamp {
    epoch: u64,
    revision: u64,
}

/// Everything needed to produce an export away from the session.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub job: RenderJob,
    pub format: ExportFormat,
    pub quality: Quality,
    stamp: ExportStamp,
}

impl ExportRequest {
    pub fn run(&self) -> Result<ExportArtifact, ExportError> {
        ExportArtifact::encode(&self.job.run(), self.format, self.quality)
    }

    pub fn stamp(&self) -> ExportStamp {
        self.stamp
    }
}

struct LoadedImage {
    path: Option<PathBuf>,
    source: SourceImage,
    info: Option<ImageInfo>,
    palette: Option<Vec<Rgb>>,
}

pub struct Session {
    next_ticket: u64,
    pending: Option<(LoadTicket, PathBuf)>,
    /// Bumped whenever the image is replaced or cleared.
    epoch: u64,
    /// Bumped whenever the stack or geometry changes.
    revision: u64,
    image: Option<LoadedImage>,
    stack: FilterStack,
    geometry: Geometry,
    format: ExportFormat,
    quality: Quality,
    last_export: Option<ExportArtifact>,
    preview_max_edge: u32,
}

impl Session {
    pub fn new(format: ExportFormat, quality: Quality, preview_max_edge: u32) -> Self {
        Self {
            next_ticket: 0,
            pending: None,
            epoch: 0,
            revision: 0,
            image: None,
            stack: FilterStack::new(),
            geometry: Geometry::default(),
            format,
            quality,
            last_export: None,
            preview_max_edge: preview_max_edge.max(1),
        }
    }

    /// Start loading `path`, superseding any load still in flight.
    pub fn begin_load(&mut self, path: PathBuf) -> LoadTicket {
        self.next_ticket += 1;
        let ticket = LoadTicket(self.next_ticket);
        tracing::info!(path = %path.display(), ?ticket, "load started");
        self.pending = Some((ticket, path));
        ticket
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    pub fn finish_load(&mut self, ticket: LoadTicket, result: anyhow::Result<Decoded>) -> LoadOutcome {
        let Some((pending, path)) = self.pending.take_if(|(t, _)| *t == ticket) else {
            tracing::debug!(?ticket, "discarding stale load");
            return LoadOutcome::Stale;
        };
        debug_assert_eq!(pending, ticket);
        match result {
            Ok(decoded) => {
                self.install(Some(path), decoded);
                LoadOutcome::Loaded
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), "load failed: {err:#}");
                LoadOutcome::Failed(format!("{err:#}"))
            }
        }
    }

    /// Install already-decoded pixels directly, bypassing the load ticket.
    pub fn load_decoded(&mut self, decoded: Decoded) {
        self.pending = None;
        self.install(None, decoded);
    }

    fn install(&mut self, path: Option<PathBuf>, decoded: Decoded) {
        let source = SourceImage::new(decoded.image, self.preview_max_edge);
        let (w, h) = source.natural_size();
        tracing::info!(width = w, height = h, preview_factor = source.preview_factor, "image loaded");
        self.epoch += 1;
        self.image = Some(LoadedImage {
            path,
            source,
            info: decoded.info,
            palette: decoded.palette,
        });
        self.stack = FilterStack::new();
        self.geometry = Geometry::default();
        self.last_export = None;
    }

    /// Drop the image and every edit made to it.
    pub fn clear(&mut self) {
        self.epoch += 1;
        self.pending = None;
        self.image = None;
        self.stack = FilterStack::new();
        self.geometry = Geometry::default();
        self.last_export = None;
        tracing::info!("image cleared");
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.image.as_ref().and_then(|i| i.path.as_deref())
    }

    pub fn info(&self) -> Option<&ImageInfo> {
        self.image.as_ref().and_then(|i| i.info.as_ref())
    }

    pub fn palette(&self) -> Option<&[Rgb]> {
        self.image.as_ref().and_then(|i| i.palette.as_deref())
    }

    pub fn source(&self) -> Option<&SourceImage> {
        self.image.as_ref().map(|i| &i.source)
    }

    pub fn natural_size(&self) -> Option<(u32, u32)> {
        self.source().map(SourceImage::natural_size)
    }

    pub fn stack(&self) -> &FilterStack {
        &self.stack
    }

    /// Runs a store operation. Returns whether the store changed; with no
    /// image loaded nothing happens.
    fn edit(&mut self, op: impl FnOnce(&mut FilterStack)) -> bool {
        if self.image.is_none() {
            tracing::debug!("ignoring edit without a loaded image");
            return false;
        }
        let before = self.stack.clone();
        op(&mut self.stack);
        let changed = self.stack != before;
        if changed {
            self.edited();
        }
        changed
    }

    /// The kept export no longer matches the edit.
    fn edited(&mut self) {
        self.revision += 1;
        if self.last_export.take().is_some() {
            tracing::debug!(revision = self.revision, "export invalidated by edit");
        }
    }

    pub fn set_working_layer(&mut self, values: FilterValues) -> bool {
        self.edit(|s| s.set_working_layer(values))
    }

    pub fn apply_working_layer(&mut self) -> bool {
        self.edit(FilterStack::apply_working_layer)
    }

    pub fn undo(&mut self) -> bool {
        self.edit(FilterStack::undo)
    }

    pub fn redo(&mut self) -> bool {
        self.edit(FilterStack::redo)
    }

    pub fn reset_all(&mut self) -> bool {
        self.edit(FilterStack::reset_all)
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn set_geometry(&mut self, geometry: Geometry) -> bool {
        if self.image.is_none() || geometry == self.geometry {
            return false;
        }
        self.geometry = geometry;
        self.edited();
        true
    }

    pub fn format(&self) -> ExportFormat {
        self.format
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    pub fn set_format(&mut self, format: ExportFormat) {
        if format != self.format {
            self.format = format;
            self.last_export = None;
        }
    }

    pub fn set_quality(&mut self, quality: Quality) {
        if quality != self.quality {
            self.quality = quality;
            if self.format.uses_quality() {
                self.last_export = None;
            }
        }
    }

    /// Preview render of the full edit, working layer included.
    pub fn preview_job(&self) -> Option<RenderJob> {
        self.preview_job_with(self.stack.render_layers(true))
    }

    /// Preview render of the unfiltered image under the same geometry.
    pub fn original_preview_job(&self) -> Option<RenderJob> {
        self.preview_job_with(Vec::new())
    }

    fn preview_job_with(&self, layers: Vec<FilterValues>) -> Option<RenderJob> {
        let source = self.source()?;
        let job = RenderJob {
            source: source.full.clone(),
            geometry: self.geometry,
            layers,
        };
        Some(job.at_preview_scale(source.preview.clone(), source.preview_factor))
    }

    /// Full-resolution render for export.
    pub fn render_export(&self, include_working: bool) -> Option<DynamicImage> {
        let source = self.source()?;
        Some(render(
            &source.full,
            &self.geometry,
            &self.stack.render_layers(include_working),
        ))
    }

    pub fn export_request(&self, include_working: bool) -> Option<ExportRequest> {
        let source = self.source()?;
        Some(ExportRequest {
            job: RenderJob {
                source: source.full.clone(),
                geometry: self.geometry,
                layers: self.stack.render_layers(include_working),
            },
            format: self.format,
            quality: self.quality,
            stamp: self.stamp(),
        })
    }

    fn stamp(&self) -> ExportStamp {
        ExportStamp {
            epoch: self.epoch,
            revision: self.revision,
        }
    }

    /// Keep a finished export unless the image, its edit or the export
    /// settings changed while it was encoding.
    pub fn accept_export(&mut self, stamp: ExportStamp, artifact: ExportArtifact) -> bool {
        let current = self.stamp();
        if stamp != current || artifact.format != self.format || artifact.quality != self.quality {
            tracing::debug!(?stamp, ?current, "discarding outdated export");
            return false;
        }
        tracing::info!(format = %artifact.format, bytes = artifact.size(), "optimized");
        self.last_export = Some(artifact);
        true
    }

    /// Encode the current edit with the current format and quality.
    pub fn optimize(&mut self, include_working: bool) -> anyhow::Result<&ExportArtifact> {
        let request = self.export_request(include_working).context("no image loaded")?;
        let artifact = request.run()?;
        self.accept_export(request.stamp(), artifact);
        self.last_export.as_ref().context("export discarded")
    }

    pub fn last_export(&self) -> Option<&ExportArtifact> {
        self.last_export.as_ref()
    }

    pub fn size_change(&self) -> Option<SizeChange> {
        let artifact = self.last_export.as_ref()?;
        SizeChange::between(self.info()?.file_size, artifact.size())
    }

    /// Write the last optimized export into `dir`, encoding first if needed.
    pub fn save_export(&mut self, dir: &Path, include_working: bool) -> anyhow::Result<PathBuf> {
        if self.last_export.is_none() {
            self.optimize(include_working)?;
        }
        let artifact = self.last_export.as_ref().context("no export available")?;
        Ok(artifact.write_to(dir)?)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use image::{DynamicImage, ImageBuffer, Rgba};

    use super::{Decoded, LoadOutcome, Session};
    use crate::export::{ExportFormat, Quality};
    use crate::state::{FilterValues, Geometry};

    fn session() -> Session {
        Session::new(ExportFormat::Png, Quality::default(), 64)
    }

    fn decoded(w: u32, h: u32) -> Decoded {
        Decoded::from_image(DynamicImage::ImageRgba8(ImageBuffer::from_fn(w, h, |x, y| {
            Rgba([(x * 3) as u8, (y * 3) as u8, 90, 255])
        })))
    }

    fn hue(v: f32) -> FilterValues {
        FilterValues {
            hue: v,
            ..FilterValues::IDENTITY
        }
    }

    #[test]
    fn stale_load_is_discarded() {
        let mut s = session();
        let first = s.begin_load(PathBuf::from("/tmp/a.png"));
        let second = s.begin_load(PathBuf::from("/tmp/b.png"));

        assert_eq!(s.finish_load(first, Ok(decoded(4, 4))), LoadOutcome::Stale);
        assert!(!s.has_image());
        assert!(s.is_loading());

        assert_eq!(s.finish_load(second, Ok(decoded(8, 2))), LoadOutcome::Loaded);
        assert_eq!(s.natural_size(), Some((8, 2)));
        assert_eq!(s.path(), Some(PathBuf::from("/tmp/b.png").as_path()));
    }

    #[test]
    fn failed_load_keeps_previous_state() {
        let mut s = session();
        s.load_decoded(decoded(4, 4));
        s.set_working_layer(hue(90.0));
        s.apply_working_layer();

        let ticket = s.begin_load(PathBuf::from("/tmp/broken.png"));
        let outcome = s.finish_load(ticket, Err(anyhow::anyhow!("corrupt")));
        assert!(matches!(outcome, LoadOutcome::Failed(msg) if msg.contains("corrupt")));
        assert_eq!(s.natural_size(), Some((4, 4)));
        assert_eq!(s.stack().layers().len(), 1);
    }

    #[test]
    fn new_image_resets_edits() {
        let mut s = session();
        s.load_decoded(decoded(4, 4));
        s.set_working_layer(hue(90.0));
        s.apply_working_layer();
        s.set_geometry(Geometry {
            rotation: 90.0,
            ..Geometry::default()
        });

        let ticket = s.begin_load(PathBuf::from("/tmp/next.png"));
        s.finish_load(ticket, Ok(decoded(6, 6)));
        assert!(s.stack().history().is_empty());
        assert_eq!(s.geometry(), Geometry::default());
    }

    #[test]
    fn clear_tears_everything_down() {
        let mut s = session();
        s.load_decoded(decoded(4, 4));
        s.set_working_layer(hue(10.0));
        s.apply_working_layer();
        s.optimize(true).unwrap();

        s.clear();
        assert!(!s.has_image());
        assert!(s.source().is_none());
        assert!(s.stack().layers().is_empty());
        assert!(s.last_export().is_none());
        assert!(s.preview_job().is_none());
    }

    #[test]
    fn edits_without_image_are_ignored() {
        let mut s = session();
        assert!(!s.set_working_layer(hue(10.0)));
        assert!(!s.apply_working_layer());
        assert!(s.stack().history().is_empty());
        assert!(!s.set_geometry(Geometry {
            scale: 50.0,
            ..Geometry::default()
        }));
    }

    #[test]
    fn edit_reports_changes() {
        let mut s = session();
        s.load_decoded(decoded(4, 4));
        assert!(!s.undo());
        assert!(s.set_working_layer(hue(30.0)));
        assert!(!s.set_working_layer(hue(30.0)));
        assert!(s.apply_working_layer());
        assert!(s.undo());
        assert!(s.redo());
        assert!(!s.redo());
    }

    #[test]
    fn preview_uses_downscaled_source() {
        let mut s = session();
        s.load_decoded(decoded(256, 128));
        let source = s.source().unwrap();
        assert_eq!(source.preview.width(), 64);
        assert_eq!(source.preview_factor, 0.25);

        s.set_working_layer(hue(45.0));
        let job = s.preview_job().unwrap();
        assert_eq!(job.layers, vec![hue(45.0)]);
        assert_eq!(job.run().width(), 64);
        assert!(s.original_preview_job().unwrap().layers.is_empty());
    }

    #[test]
    fn export_render_can_exclude_working_layer() {
        let mut s = session();
        s.load_decoded(decoded(4, 4));
        s.set_working_layer(FilterValues {
            invert: 100.0,
            ..FilterValues::IDENTITY
        });
        let with = s.render_export(true).unwrap();
        let without = s.render_export(false).unwrap();
        assert_ne!(with.as_bytes(), without.as_bytes());
        assert_eq!(without.as_bytes(), s.source().unwrap().full.as_bytes());
    }

    #[test]
    fn changing_format_invalidates_export() {
        let mut s = session();
        s.load_decoded(decoded(4, 4));
        s.optimize(true).unwrap();
        s.set_quality(Quality::new(0.3));
        assert!(s.last_export().is_some(), "png ignores quality");
        s.set_format(ExportFormat::Jpeg);
        assert!(s.last_export().is_none());
    }

    #[test]
    fn export_from_previous_image_is_rejected() {
        let mut s = session();
        s.load_decoded(decoded(4, 4));
        let request = s.export_request(true).unwrap();
        s.load_decoded(decoded(6, 6));
        let artifact = request.run().unwrap();
        assert!(!s.accept_export(request.stamp(), artifact));
        assert!(s.last_export().is_none());

        let request = s.export_request(true).unwrap();
        let artifact = request.run().unwrap();
        assert!(s.accept_export(request.stamp(), artifact));
    }

    #[test]
    fn export_started_before_an_edit_is_rejected() {
        let mut s = session();
        s.load_decoded(decoded(4, 4));
        let request = s.export_request(true).unwrap();
        s.set_working_layer(FilterValues {
            invert: 100.0,
            ..FilterValues::IDENTITY
        });
        let artifact = request.run().unwrap();
        assert!(!s.accept_export(request.stamp(), artifact));

        let request = s.export_request(true).unwrap();
        s.set_geometry(Geometry {
            rotation: 180.0,
            ..Geometry::default()
        });
        let artifact = request.run().unwrap();
        assert!(!s.accept_export(request.stamp(), artifact));
        assert!(s.last_export().is_none());
    }

    #[test]
    fn edits_invalidate_the_kept_export() {
        let mut s = session();
        s.load_decoded(decoded(4, 4));
        s.optimize(true).unwrap();
        assert!(!s.undo(), "nothing to undo");
        assert!(s.last_export().is_some(), "no-op edits keep the export");

        s.set_working_layer(FilterValues {
            invert: 100.0,
            ..FilterValues::IDENTITY
        });
        assert!(s.last_export().is_none());

        s.optimize(true).unwrap();
        s.set_geometry(Geometry {
            scale: 50.0,
            ..Geometry::default()
        });
        assert!(s.last_export().is_none());
    }

    #[test]
    fn saved_export_matches_the_current_edit() {
        let dir = std::env::temp_dir().join(format!("filterstack-session-edit-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let mut s = session();
        s.load_decoded(Decoded::from_image(DynamicImage::ImageRgba8(ImageBuffer::from_pixel(
            2,
            2,
            Rgba([10, 20, 30, 255]),
        ))));
        s.optimize(true).unwrap();
        s.set_working_layer(FilterValues {
            invert: 100.0,
            ..FilterValues::IDENTITY
        });
        s.apply_working_layer();

        let path = s.save_export(&dir, true).unwrap();
        let saved = image::open(&path).unwrap().to_rgba8();
        let expected = s.render_export(true).unwrap().to_rgba8();
        assert_eq!(saved.get_pixel(0, 0).0, [245, 235, 225, 255]);
        assert_eq!(saved, expected);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn save_export_encodes_on_demand() {
        let dir = std::env::temp_dir().join(format!("filterstack-session-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let mut s = session();
        s.load_decoded(decoded(4, 4));
        let path = s.save_export(&dir, true).unwrap();
        assert_eq!(path.file_name().unwrap(), "optimized.png");
        assert!(s.last_export().is_some());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
