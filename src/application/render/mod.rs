//! Diagram rendering: document generation, the browser-backed pipeline and
//! its error taxonomy.
//!
//! The pipeline receives a validated [`RenderRequest`](crate::domain::render::RenderRequest)
//! and returns a plain [`RenderResult`](crate::domain::render::RenderResult).
//! HTTP framing stays in the caller.

pub mod document;
mod error;
mod pipeline;
mod script;

pub use error::RenderError;
pub use pipeline::{
    A4_HEIGHT_PX, A4_WIDTH_PX, METRIC_RENDER_DURATION_MS, METRIC_RENDER_TOTAL, RenderPipeline,
    WaitSettings,
};
pub use script::{RenderScript, ScriptError};
