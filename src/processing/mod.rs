pub mod blur;
pub mod color;
pub mod pipeline;
pub mod transform;

pub use pipeline::{RenderJob, render};
