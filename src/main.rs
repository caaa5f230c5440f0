mod app;
mod compare;
mod config;
mod decode;
mod export;
mod history;
mod metadata;
mod palette;
mod preview;
mod processing;
mod session;
mod state;

use app::FilterstackApp;
use config::AppConfig;

fn main() -> eframe::Result {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AppConfig::load();
    tracing::info!(
        export_dir = %config.export_dir().display(),
        format = %config.format(),
        "starting"
    );

    let width = config.window_width.unwrap_or(1280.0);
    let height = config.window_height.unwrap_or(820.0);

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Filterstack")
            .with_app_id("filterstack")
            .with_drag_and_drop(true)
            .with_inner_size([width, height]),
        ..Default::default()
    };

    eframe::run_native(
        "filterstack",
        native_options,
        Box::new(|cc| Ok(Box::new(FilterstackApp::new(cc, config)))),
    )
}
