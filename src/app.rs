use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant, SystemTime};

use anyhow::Context as _;
use image::DynamicImage;

use crate::compare::{self, SplitDrag, SplitPosition};
use crate::config::AppConfig;
use crate::export::{self, ExportArtifact, ExportError, ExportFormat, Quality};
use crate::metadata::ImageInfo;
use crate::palette;
use crate::preview::{PreviewFrame, PreviewRequest, PreviewWorker};
use crate::session::{Decoded, ExportStamp, LoadOutcome, LoadTicket, Session};
use crate::state::{FilterValues, MAX_SCALE, MIN_SCALE, PRESETS};
use crate::{decode, state};

/// Exports and the comparison image include the edit in progress.
const INCLUDE_WORKING: bool = true;
/// Pointer distance, in points, at which the split handle can be grabbed.
const SPLIT_GRAB: f32 = 12.0;
const ZOOM_STEP: f32 = 1.25;

enum AppEvent {
    Loaded {
        ticket: LoadTicket,
        result: anyhow::Result<Decoded>,
    },
    Optimized {
        stamp: ExportStamp,
        result: Result<ExportArtifact, ExportError>,
        then_save: bool,
    },
    Saved {
        what: &'static str,
        result: anyhow::Result<PathBuf>,
    },
}

pub struct FilterstackApp {
    config: AppConfig,
    session: Session,
    preview: PreviewWorker,
    tx: mpsc::Sender<AppEvent>,
    rx: mpsc::Receiver<AppEvent>,
    path_input: String,
    preset: &'static str,
    needs_preview: bool,
    last_slider_change: Option<Instant>,
    edited_tex: Option<egui::TextureHandle>,
    original_tex: Option<egui::TextureHandle>,
    comparison: bool,
    split: SplitPosition,
    split_drag: Option<SplitDrag>,
    view: CanvasView,
    exporting: bool,
    status: String,
}

impl FilterstackApp {
    pub fn new(cc: &eframe::CreationContext<'_>, config: AppConfig) -> Self {
        let (tx, rx) = mpsc::channel();
        let repaint = cc.egui_ctx.clone();
        let session = Session::new(config.format(), config.quality(), config.preview_max_edge());
        let path_input = config
            .last_open_dir
            .as_ref()
            .map(|d| format!("{}/", d.display()))
            .unwrap_or_default();
        Self {
            config,
            session,
            preview: PreviewWorker::new().with_notify(move || repaint.request_repaint()),
            tx,
            rx,
            path_input,
            preset: "none",
            needs_preview: false,
            last_slider_change: None,
            edited_tex: None,
            original_tex: None,
            comparison: false,
            split: SplitPosition::CENTER,
            split_drag: None,
            view: CanvasView::default(),
            exporting: false,
            status: String::new(),
        }
    }

    fn open_path(&mut self, path: PathBuf, ctx: &egui::Context) {
        if !decode::is_supported_image(&path) {
            self.status = format!("Unsupported file: {}", path.display());
            return;
        }
        if let Some(dir) = path.parent() {
            self.config.last_open_dir = Some(dir.to_path_buf());
        }
        self.path_input = path.display().to_string();
        self.status = format!("Loading {}…", file_label(&path));

        let ticket = self.session.begin_load(path.clone());
        let palette_size = self.config.palette_size();
        let tx = self.tx.clone();
        let ctx2 = ctx.clone();
        std::thread::spawn(move || {
            let result = Decoded::from_path(&path, palette_size);
            let _ = tx.send(AppEvent::Loaded { ticket, result });
            ctx2.request_repaint();
        });
    }

    /// Dropped files without a filesystem path (web) arrive as bytes.
    fn open_bytes(&mut self, name: String, bytes: std::sync::Arc<[u8]>, ctx: &egui::Context) {
        self.status = format!("Loading {}…", name);
        let ticket = self.session.begin_load(PathBuf::from(&name));
        let palette_size = self.config.palette_size();
        let tx = self.tx.clone();
        let ctx2 = ctx.clone();
        std::thread::spawn(move || {
            let result = decode::decode_bytes(&bytes).map(|image| {
                let palette = palette::extract(&image, palette_size);
                Decoded {
                    palette,
                    ..Decoded::from_image(image)
                }
            });
            let _ = tx.send(AppEvent::Loaded { ticket, result });
            ctx2.request_repaint();
        });
    }

    fn clear(&mut self) {
        self.session.clear();
        self.preview.discard();
        self.edited_tex = None;
        self.original_tex = None;
        self.split_drag = None;
        self.view = CanvasView::default();
        self.preset = "none";
        self.needs_preview = false;
        self.status.clear();
    }

    fn poll_events(&mut self, ctx: &egui::Context) {
        while let Ok(event) = self.rx.try_recv() {
            match event {
                AppEvent::Loaded { ticket, result } => match self.session.finish_load(ticket, result) {
                    LoadOutcome::Loaded => {
                        self.preview.discard();
                        self.edited_tex = None;
                        self.original_tex = None;
                        self.view = CanvasView::default();
                        self.preset = "none";
                        self.schedule_preview(false);
                        self.status = self
                            .session
                            .info()
                            .map(|i| format!("Loaded {}", i.name))
                            .unwrap_or_else(|| "Loaded".to_string());
                    }
                    LoadOutcome::Failed(err) => self.status = format!("Could not open image: {err}"),
                    LoadOutcome::Stale => {}
                },
                AppEvent::Optimized {
                    stamp,
                    result,
                    then_save,
                } => {
                    self.exporting = false;
                    match result {
                        Ok(artifact) => {
                            let size = export::format_file_size(artifact.size());
                            if self.session.accept_export(stamp, artifact) {
                                self.status = format!("Optimized: {size}");
                                if then_save {
                                    self.save_export();
                                }
                            } else {
                                self.status = "Edit changed while encoding; optimize again".to_string();
                            }
                        }
                        Err(err) => self.status = format!("Export failed: {err}"),
                    }
                }
                AppEvent::Saved { what, result } => {
                    self.status = match result {
                        Ok(path) => format!("Saved {what} to {}", path.display()),
                        Err(err) => format!("Saving {what} failed: {err:#}"),
                    };
                }
            }
        }

        if let Some(frame) = self.preview.poll() {
            self.show_frame(frame, ctx);
        }
    }

    fn show_frame(&mut self, frame: PreviewFrame, ctx: &egui::Context) {
        self.edited_tex = Some(ctx.load_texture("edited", to_color_image(&frame.edited), egui::TextureOptions::LINEAR));
        self.original_tex = frame
            .original
            .as_ref()
            .map(|img| ctx.load_texture("original", to_color_image(img), egui::TextureOptions::LINEAR));
    }

    /// Request a preview. Slider drags wait out the debounce window first.
    fn schedule_preview(&mut self, debounced: bool) {
        self.needs_preview = true;
        self.last_slider_change = debounced.then(Instant::now);
    }

    fn maybe_submit_preview(&mut self, ctx: &egui::Context) {
        if !self.needs_preview {
            return;
        }
        if let Some(wait) = debounce_remaining(self.last_slider_change, Instant::now(), self.config.slider_debounce()) {
            ctx.request_repaint_after(wait);
            return;
        }
        self.needs_preview = false;
        self.last_slider_change = None;
        let Some(edited) = self.session.preview_job() else {
            return;
        };
        let original = if self.comparison {
            self.session.original_preview_job()
        } else {
            None
        };
        self.preview.submit(PreviewRequest { edited, original });
    }

    fn start_optimize(&mut self, then_save: bool, ctx: &egui::Context) {
        let Some(request) = self.session.export_request(INCLUDE_WORKING) else {
            return;
        };
        self.exporting = true;
        self.status = format!("Encoding {}…", request.format);
        let tx = self.tx.clone();
        let ctx2 = ctx.clone();
        std::thread::spawn(move || {
            let result = request.run();
            let _ = tx.send(AppEvent::Optimized {
                stamp: request.stamp(),
                result,
                then_save,
            });
            ctx2.request_repaint();
        });
    }

    fn save_export(&mut self) {
        let Some(artifact) = self.session.last_export() else {
            return;
        };
        let dir = self.config.export_dir();
        self.status = match artifact.write_to(&dir) {
            Ok(path) => format!("Saved {}", path.display()),
            Err(err) => format!("Save failed: {err}"),
        };
    }

    fn save_palette(&mut self) {
        let Some(colors) = self.session.palette() else {
            return;
        };
        let dir = self.config.export_dir();
        self.status = match palette::save_json(colors, &dir) {
            Ok(path) => format!("Saved palette to {}", path.display()),
            Err(err) => format!("Saving palette failed: {err:#}"),
        };
    }

    fn save_comparison(&mut self, ctx: &egui::Context) {
        let Some(request) = self.session.export_request(INCLUDE_WORKING) else {
            return;
        };
        let split = self.split;
        let dir = self.config.export_dir();
        let tx = self.tx.clone();
        let ctx2 = ctx.clone();
        self.status = "Rendering comparison…".to_string();
        std::thread::spawn(move || {
            let result = write_comparison(&request.job, split, &dir);
            let _ = tx.send(AppEvent::Saved {
                what: "comparison",
                result,
            });
            ctx2.request_repaint();
        });
    }

    fn handle_input(&mut self, ctx: &egui::Context) {
        let dropped = ctx.input(|i| i.raw.dropped_files.clone());
        if let Some(file) = dropped.into_iter().next() {
            match (file.path, file.bytes) {
                (Some(path), _) => self.open_path(path, ctx),
                (None, Some(bytes)) => self.open_bytes(file.name, bytes, ctx),
                (None, None) => {}
            }
        }

        let (undo, redo) = ctx.input(|i| {
            let z = i.modifiers.command && i.key_pressed(egui::Key::Z);
            (z && !i.modifiers.shift, z && i.modifiers.shift)
        });
        if undo && self.session.undo() {
            self.schedule_preview(false);
        }
        if redo && self.session.redo() {
            self.schedule_preview(false);
        }
    }

    fn show_top_bar(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        ui.horizontal(|ui| {
            ui.label("Image");
            let resp = ui.add(
                egui::TextEdit::singleline(&mut self.path_input)
                    .desired_width((ui.available_width() - 220.0).max(120.0))
                    .hint_text("Path to an image, or drop a file")
                    .font(egui::TextStyle::Monospace),
            );
            let submitted = resp.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            if ui.button("Open").clicked() || submitted {
                let path = expand_home_prefix(self.path_input.trim());
                self.open_path(path, ctx);
            }
            if ui.add_enabled(self.session.has_image(), egui::Button::new("Clear")).clicked() {
                self.clear();
            }
            if self.session.is_loading() || self.exporting || self.preview.is_busy() {
                ui.spinner();
            }
        });
        if !self.status.is_empty() {
            ui.label(egui::RichText::new(&self.status).weak());
        }
    }

    fn show_filters(&mut self, ui: &mut egui::Ui) {
        ui.label(egui::RichText::new("Filters").strong());
        ui.add_space(4.0);

        let enabled = self.session.has_image();
        let mut working = self.session.stack().working_layer();
        let mut changed = false;
        ui.add_enabled_ui(enabled, |ui| {
            egui::Grid::new("filter_grid")
                .num_columns(2)
                .spacing([8.0, 4.0])
                .show(ui, |ui| {
                    let mut slider = |ui: &mut egui::Ui, label: &str, value: &mut f32, max: f32, suffix: &str| {
                        ui.label(label);
                        let resp = ui.add(
                            egui::Slider::new(value, 0.0..=max)
                                .suffix(suffix)
                                .fixed_decimals(0)
                                .clamping(egui::SliderClamping::Always),
                        );
                        changed |= resp.changed();
                        ui.end_row();
                    };
                    slider(ui, "Hue", &mut working.hue, 360.0, "°");
                    slider(ui, "Saturation", &mut working.saturation, 200.0, "%");
                    slider(ui, "Brightness", &mut working.brightness, 200.0, "%");
                    slider(ui, "Contrast", &mut working.contrast, 200.0, "%");
                    slider(ui, "Grayscale", &mut working.grayscale, 100.0, "%");
                    slider(ui, "Invert", &mut working.invert, 100.0, "%");
                    slider(ui, "Blur", &mut working.blur, 20.0, " px");
                });

            ui.add_space(6.0);
            let selected = state::find_preset(self.preset).map_or("None", |p| p.name);
            egui::ComboBox::from_label("Preset")
                .selected_text(selected)
                .show_ui(ui, |ui| {
                    for preset in &PRESETS {
                        if ui.selectable_label(self.preset == preset.key, preset.name).clicked() {
                            self.preset = preset.key;
                            if self.session.set_working_layer(preset.values) {
                                self.schedule_preview(false);
                            }
                        }
                    }
                });
        });
        if changed && self.session.set_working_layer(working) {
            self.schedule_preview(true);
        }

        ui.add_space(6.0);
        let stack = self.session.stack();
        let (can_apply, can_undo, can_redo) = (
            enabled && !stack.working_layer().is_identity(),
            stack.can_undo(),
            stack.can_redo(),
        );
        let mut edited = false;
        ui.horizontal(|ui| {
            if ui.add_enabled(can_apply, egui::Button::new("Apply")).clicked() {
                edited |= self.session.apply_working_layer();
                self.preset = "none";
            }
            if ui.add_enabled(can_undo, egui::Button::new("Undo")).clicked() {
                edited |= self.session.undo();
            }
            if ui.add_enabled(can_redo, egui::Button::new("Redo")).clicked() {
                edited |= self.session.redo();
            }
            if ui.add_enabled(enabled, egui::Button::new("Reset")).clicked() {
                edited |= self.session.reset_all();
                self.preset = "none";
            }
        });
        if edited {
            self.schedule_preview(false);
        }

        ui.add_space(6.0);
        ui.label(egui::RichText::new("Layers").strong());
        let stack = self.session.stack();
        if stack.history().is_empty() {
            ui.label(egui::RichText::new("No applied layers").weak());
        }
        let live = stack.committed().len();
        for (index, values) in stack.history().iter().enumerate() {
            let text = format!("{}. {}", index + 1, describe(values));
            if index < live {
                ui.label(text);
            } else {
                ui.label(egui::RichText::new(text).weak().italics());
            }
        }
    }

    fn show_transform(&mut self, ui: &mut egui::Ui) {
        ui.label(egui::RichText::new("Transform").strong());
        ui.add_space(4.0);
        let Some(natural) = self.session.natural_size() else {
            ui.label(egui::RichText::new("No image").weak());
            return;
        };

        let mut geometry = self.session.geometry();
        let mut debounced = false;
        ui.horizontal(|ui| {
            ui.label("Rotate");
            if ui.button("◀ 90°").clicked() {
                geometry.rotation = (geometry.rotation - 90.0).rem_euclid(360.0);
            }
            let resp = ui.add(
                egui::Slider::new(&mut geometry.rotation, 0.0..=360.0)
                    .suffix("°")
                    .fixed_decimals(0),
            );
            debounced |= resp.changed();
            if ui.button("90° ▶").clicked() {
                geometry.rotation = (geometry.rotation + 90.0).rem_euclid(360.0);
            }
        });
        ui.horizontal(|ui| {
            ui.label("Scale");
            let resp = ui.add(
                egui::Slider::new(&mut geometry.scale, MIN_SCALE..=MAX_SCALE)
                    .suffix("%")
                    .fixed_decimals(0)
                    .clamping(egui::SliderClamping::Always),
            );
            debounced |= resp.changed();
        });

        let mut width = geometry.width.unwrap_or(natural.0);
        let mut height = geometry.height.unwrap_or(natural.1);
        ui.horizontal(|ui| {
            ui.label("W");
            if ui
                .add(egui::DragValue::new(&mut width).range(1_u32..=20_000_u32).suffix(" px"))
                .changed()
            {
                geometry.set_width(width, natural);
                debounced = true;
            }
            ui.label("H");
            if ui
                .add(egui::DragValue::new(&mut height).range(1_u32..=20_000_u32).suffix(" px"))
                .changed()
            {
                geometry.set_height(height, natural);
                debounced = true;
            }
        });
        ui.checkbox(&mut geometry.keep_aspect_ratio, "Keep aspect ratio");

        let (out_w, out_h) = geometry.output_size(natural.0, natural.1);
        ui.label(egui::RichText::new(format!("Output {out_w} × {out_h}")).weak());
        if !geometry.is_identity_for(natural.0, natural.1) && ui.small_button("Reset transform").clicked() {
            geometry.reset();
        }

        if self.session.set_geometry(geometry) {
            self.schedule_preview(debounced);
        }
    }

    fn show_export(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        ui.label(egui::RichText::new("Export").strong());
        ui.add_space(4.0);

        let mut format = self.session.format();
        egui::ComboBox::from_label("Format")
            .selected_text(format.label())
            .show_ui(ui, |ui| {
                for f in ExportFormat::ALL {
                    ui.selectable_value(&mut format, f, f.label());
                }
            });
        if format != self.session.format() {
            self.session.set_format(format);
            self.config.export_format = Some(format);
        }

        let mut percent = self.session.quality().percent();
        ui.add_enabled_ui(format.uses_quality(), |ui| {
            ui.horizontal(|ui| {
                ui.label("Quality");
                if ui
                    .add(egui::Slider::new(&mut percent, 10_u8..=100_u8).suffix("%"))
                    .changed()
                {
                    let quality = Quality::new(percent as f32 / 100.0);
                    self.session.set_quality(quality);
                    self.config.export_quality = Some(quality);
                }
            });
        });
        if format == ExportFormat::Webp {
            ui.label(egui::RichText::new("WebP export is lossless").weak());
        }

        let ready = self.session.has_image() && !self.exporting;
        ui.horizontal(|ui| {
            if ui.add_enabled(ready, egui::Button::new("Optimize")).clicked() {
                self.start_optimize(false, ctx);
            }
            if ui.add_enabled(ready, egui::Button::new("Save")).clicked() {
                if self.session.last_export().is_some() {
                    self.save_export();
                } else {
                    self.start_optimize(true, ctx);
                }
            }
        });

        if let Some(artifact) = self.session.last_export() {
            let mut line = format!(
                "{} · {}",
                artifact.file_name(),
                export::format_file_size(artifact.size())
            );
            if let Some(change) = self.session.size_change() {
                line.push_str(&format!(" ({change})"));
            }
            ui.label(line);
        }
        ui.label(
            egui::RichText::new(format!("Saving to {}", self.config.export_dir().display()))
                .weak()
                .small(),
        );
    }

    fn show_palette(&mut self, ui: &mut egui::Ui) {
        ui.label(egui::RichText::new("Palette").strong());
        ui.add_space(4.0);
        let Some(colors) = self.session.palette() else {
            ui.label(egui::RichText::new("No palette").weak());
            return;
        };
        let mut copied = None;
        ui.horizontal_wrapped(|ui| {
            for &rgb in colors {
                let (rect, resp) = ui.allocate_exact_size(egui::vec2(26.0, 26.0), egui::Sense::click());
                ui.painter()
                    .rect_filled(rect, 3.0, egui::Color32::from_rgb(rgb[0], rgb[1], rgb[2]));
                let hex = palette::to_hex(rgb);
                if resp.on_hover_text(hex.as_str()).clicked() {
                    copied = Some(hex);
                }
            }
        });
        if let Some(hex) = copied {
            ui.ctx().copy_text(hex.clone());
            self.status = format!("Copied {hex}");
        }
        if ui.button("Save palette").clicked() {
            self.save_palette();
        }
    }

    fn show_info(&self, ui: &mut egui::Ui) {
        ui.label(egui::RichText::new("Info").strong());
        ui.add_space(4.0);
        let Some(info) = self.session.info() else {
            ui.label(egui::RichText::new("No file info").weak());
            return;
        };
        show_info_grid(ui, info);
    }

    fn show_canvas(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        ui.horizontal(|ui| {
            let has_image = self.session.has_image();
            if ui.add_enabled(has_image, egui::Button::new("−").small()).clicked() {
                self.view.zoom_by(1.0 / ZOOM_STEP, egui::Vec2::ZERO);
            }
            ui.label(egui::RichText::new(format!("{:.0}%", self.view.zoom * 100.0)).weak());
            if ui.add_enabled(has_image, egui::Button::new("+").small()).clicked() {
                self.view.zoom_by(ZOOM_STEP, egui::Vec2::ZERO);
            }
            if ui.add_enabled(has_image, egui::Button::new("Fit").small()).clicked() {
                self.view = CanvasView::default();
            }
            ui.separator();

            let toggle = ui.add_enabled(
                has_image,
                egui::SelectableLabel::new(self.comparison, "Compare"),
            );
            if toggle.clicked() {
                self.comparison = !self.comparison;
                self.schedule_preview(false);
            }
            if self.comparison {
                ui.label(egui::RichText::new(format!("{:.0}%", self.split.percent())).weak());
                if ui.small_button("Center").clicked() {
                    self.split = SplitPosition::CENTER;
                }
                if ui.small_button("Save comparison").clicked() {
                    self.save_comparison(ctx);
                }
            }
        });
        ui.separator();

        let Some(edited) = self.edited_tex.clone() else {
            ui.centered_and_justified(|ui| {
                if self.session.is_loading() || self.session.has_image() {
                    ui.spinner();
                } else {
                    ui.label("Open an image to start editing");
                }
            });
            return;
        };

        let (canvas, resp) = ui.allocate_exact_size(ui.available_size(), egui::Sense::click_and_drag());
        let tex_size = edited.size_vec2();
        let fit = (canvas.width() / tex_size.x)
            .min(canvas.height() / tex_size.y)
            .min(4.0);
        self.zoom_canvas(ui, &resp, canvas);

        let comparison = self.comparison;
        let original = self.original_tex.clone().filter(|_| comparison);
        let rect = self.view.image_rect(canvas, tex_size * fit);
        if original.is_some() {
            self.drag_split(&resp, rect);
        }
        if self.split_drag.is_none() && resp.dragged() {
            self.view.pan += resp.drag_delta();
        }

        let rect = self.view.image_rect(canvas, tex_size * fit);
        let painter = ui.painter_at(canvas);
        let uv = egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0));
        let Some(original) = original else {
            painter.image(edited.id(), rect, uv, egui::Color32::WHITE);
            if resp.dragged() {
                ctx.set_cursor_icon(egui::CursorIcon::Grabbing);
            }
            return;
        };

        let boundary = rect.left() + self.split.boundary_offset(rect.width());
        let (left, right) = rect.split_left_right_at_x(boundary);
        painter
            .with_clip_rect(left.intersect(canvas))
            .image(original.id(), rect, uv, egui::Color32::WHITE);
        painter
            .with_clip_rect(right.intersect(canvas))
            .image(edited.id(), rect, uv, egui::Color32::WHITE);
        painter.line_segment(
            [egui::pos2(boundary, rect.top()), egui::pos2(boundary, rect.bottom())],
            egui::Stroke::new(2.0, egui::Color32::WHITE),
        );

        let near_boundary = resp
            .hover_pos()
            .is_some_and(|p| (p.x - boundary).abs() <= SPLIT_GRAB);
        if self.split_drag.is_some() || near_boundary {
            ctx.set_cursor_icon(egui::CursorIcon::ResizeHorizontal);
        } else if resp.dragged() {
            ctx.set_cursor_icon(egui::CursorIcon::Grabbing);
        }
    }

    /// Wheel and pinch zoom about the pointer; double-click fits again.
    fn zoom_canvas(&mut self, ui: &egui::Ui, resp: &egui::Response, canvas: egui::Rect) {
        if resp.double_clicked() {
            self.view = CanvasView::default();
            return;
        }
        if !resp.hovered() {
            return;
        }
        let (scroll, pinch, pointer) = ui.input(|i| {
            (i.smooth_scroll_delta.y, i.zoom_delta(), i.pointer.hover_pos())
        });
        let factor = pinch * (scroll * 0.002).exp();
        if factor != 1.0 {
            let anchor = pointer.map_or(egui::Vec2::ZERO, |p| p - canvas.center());
            self.view.zoom_by(factor, anchor);
        }
    }

    fn drag_split(&mut self, resp: &egui::Response, rect: egui::Rect) {
        let Some(pointer) = resp.interact_pointer_pos() else {
            return;
        };
        if resp.drag_started() {
            let boundary = rect.left() + self.split.boundary_offset(rect.width());
            if (pointer.x - boundary).abs() <= SPLIT_GRAB {
                self.split_drag = Some(SplitDrag::begin(pointer.x, self.split));
            }
        }
        if let Some(drag) = self.split_drag {
            if resp.dragged() {
                self.split = drag.drag_to(pointer.x, rect.width());
            }
        }
        if resp.drag_stopped() {
            self.split_drag = None;
        }
    }
}

/// Zoom and pan of the canvas, relative to the image fitted and centred.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CanvasView {
    zoom: f32,
    pan: egui::Vec2,
}

impl Default for CanvasView {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            pan: egui::Vec2::ZERO,
        }
    }
}

impl CanvasView {
    const MIN_ZOOM: f32 = 0.1;
    const MAX_ZOOM: f32 = 5.0;

    /// `anchor` is an offset from the canvas centre; the image point under it
    /// stays put.
    fn zoom_by(&mut self, factor: f32, anchor: egui::Vec2) {
        let zoom = (self.zoom * factor).clamp(Self::MIN_ZOOM, Self::MAX_ZOOM);
        if !zoom.is_finite() || zoom == self.zoom {
            return;
        }
        self.pan = anchor - (anchor - self.pan) * (zoom / self.zoom);
        self.zoom = zoom;
    }

    fn image_rect(&self, canvas: egui::Rect, fitted: egui::Vec2) -> egui::Rect {
        egui::Rect::from_center_size(canvas.center() + self.pan, fitted * self.zoom)
    }
}

impl eframe::App for FilterstackApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if let Some(rect) = ctx.input(|i| i.viewport().inner_rect) {
            self.config.window_width = Some(rect.width());
            self.config.window_height = Some(rect.height());
        }

        self.poll_events(ctx);
        self.handle_input(ctx);

        egui::TopBottomPanel::top("path_bar").show(ctx, |ui| {
            self.show_top_bar(ui, ctx);
        });

        egui::SidePanel::left("filters_panel")
            .default_width(300.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical()
                    .id_salt("filters_scroll")
                    .show(ui, |ui| self.show_filters(ui));
            });

        egui::SidePanel::right("tools_panel")
            .default_width(300.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical()
                    .id_salt("tools_scroll")
                    .show(ui, |ui| {
                        self.show_transform(ui);
                        ui.separator();
                        self.show_export(ui, ctx);
                        ui.separator();
                        self.show_info(ui);
                        ui.separator();
                        self.show_palette(ui);
                    });
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.show_canvas(ui, ctx);
        });

        self.maybe_submit_preview(ctx);
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.config.save();
    }
}

fn to_color_image(img: &DynamicImage) -> egui::ColorImage {
    let rgba = img.to_rgba8();
    let size = [rgba.width() as usize, rgba.height() as usize];
    egui::ColorImage::from_rgba_unmultiplied(size, rgba.as_raw())
}

fn write_comparison(job: &crate::processing::RenderJob, split: SplitPosition, dir: &Path) -> anyhow::Result<PathBuf> {
    let edited = job.run();
    let original = crate::processing::render(&job.source, &job.geometry, &[]);
    let composed = DynamicImage::ImageRgba8(compare::composite(&original, &edited, split));
    let bytes = export::encode(&composed, ExportFormat::Png, Quality::default())?;
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join("comparison.png");
    std::fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn show_info_grid(ui: &mut egui::Ui, info: &ImageInfo) {
    egui::Grid::new("info_grid")
        .num_columns(2)
        .spacing([12.0, 4.0])
        .show(ui, |ui| {
            let mut row = |label: &str, value: Option<String>| {
                if let Some(v) = value {
                    ui.label(egui::RichText::new(label).weak());
                    ui.label(v);
                    ui.end_row();
                }
            };
            row("Name", Some(info.name.clone()));
            row("Size", Some(export::format_file_size(info.file_size)));
            row("Format", Some(info.format.to_uppercase()));
            row("Dimensions", info.dimensions.map(|(w, h)| format!("{w} × {h}")));
            row("Modified", info.last_modified.map(|t| format_age(t, SystemTime::now())));

            let Some(exif) = &info.exif else { return };
            row("Camera", exif.camera());
            row("Lens", exif.lens.clone());
            row("Date", exif.date_taken.clone());
            row("Shutter", exif.shutter_speed.clone());
            row("Aperture", exif.aperture.clone());
            row("ISO", exif.iso.map(|v| v.to_string()));
            row("Focal length", exif.focal_length.clone());
        });
}

/// Time left before a debounced change may render, if any.
fn debounce_remaining(last_change: Option<Instant>, now: Instant, debounce: Duration) -> Option<Duration> {
    let elapsed = now.saturating_duration_since(last_change?);
    (elapsed < debounce).then(|| debounce - elapsed)
}

/// Short summary of the non-identity fields of a layer.
fn describe(values: &FilterValues) -> String {
    let id = FilterValues::IDENTITY;
    let mut parts = Vec::new();
    if values.hue_degrees() != 0.0 {
        parts.push(format!("hue {:.0}°", values.hue_degrees()));
    }
    let mut pct = |name: &str, v: f32, identity: f32| {
        if v != identity {
            parts.push(format!("{name} {v:.0}%"));
        }
    };
    pct("sat", values.saturation, id.saturation);
    pct("bright", values.brightness, id.brightness);
    pct("contrast", values.contrast, id.contrast);
    pct("gray", values.grayscale, id.grayscale);
    pct("invert", values.invert, id.invert);
    if values.blur != 0.0 {
        parts.push(format!("blur {:.1}px", values.blur));
    }
    if parts.is_empty() {
        "no change".to_string()
    } else {
        parts.join(", ")
    }
}

fn format_age(then: SystemTime, now: SystemTime) -> String {
    let Ok(age) = now.duration_since(then) else {
        return "just now".to_string();
    };
    match age.as_secs() {
        s if s < 60 => "just now".to_string(),
        s if s < 3600 => format!("{} min ago", s / 60),
        s if s < 86_400 => format!("{} h ago", s / 3600),
        s => format!("{} days ago", s / 86_400),
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .into_owned()
}

fn expand_home_prefix(raw: &str) -> PathBuf {
    if raw == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}
