//! Headless browser plumbing: executable discovery, the shared session and
//! the Chromium adapter.
//!
//! The render pipeline only talks to the traits defined here. [`chromium`]
//! provides the production implementation; tests substitute in-memory doubles.

pub mod chromium;
pub mod resolver;
pub mod session;

use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// DOM contract between the generated render document and the page probes.
pub mod dom {
    /// Id of the element the diagram is rendered into.
    pub const CONTAINER_ID: &str = "mermaid-diagram";
    /// `document.body.dataset` key carrying the render outcome.
    pub const STATE_KEY: &str = "renderState";
    /// `document.body.dataset` key carrying the script's error message.
    pub const ERROR_KEY: &str = "renderError";
    pub const STATE_DONE: &str = "done";
    pub const STATE_ERROR: &str = "error";

    pub fn diagram_selector() -> String {
        format!("#{CONTAINER_ID} svg")
    }
}

pub use chromium::ChromiumLauncher;
pub use resolver::{ExecutableResolver, Platform};
pub use session::{BrowserSession, SessionError, SessionSettings, SessionState};

/// Errors raised by a browser adapter.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("browser protocol error: {0}")]
    Protocol(String),
    #[error("unexpected value returned by page script: {0}")]
    Decode(String),
    #[error("browser connection closed")]
    Disconnected,
}

/// Where the executable handed to the launcher came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutableSource {
    /// Explicitly configured by the operator.
    Configured,
    /// Found by the [`ExecutableResolver`].
    Detected,
    /// Whatever the driver locates on its own.
    Bundled,
}

impl ExecutableSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutableSource::Configured => "configured",
            ExecutableSource::Detected => "detected",
            ExecutableSource::Bundled => "bundled",
        }
    }
}

/// Everything needed for one launch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    /// `None` defers executable lookup to the driver's bundled default.
    pub executable: Option<PathBuf>,
    pub source: ExecutableSource,
    pub args: Vec<String>,
    pub timeout: Duration,
}

/// Viewport applied to a page before any content is injected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageViewport {
    pub width: u32,
    pub height: u32,
    /// Device scale factor.
    pub scale: f64,
}

/// Axis-aligned box in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ElementBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Readiness checkpoints polled after the document is injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The document has been parsed.
    DocumentParsed,
    /// The rendering script's entry point is callable.
    ScriptReady,
    /// The script produced a diagram or reported a failure.
    DiagramSettled,
}

impl Readiness {
    pub fn as_str(self) -> &'static str {
        match self {
            Readiness::DocumentParsed => "document_parsed",
            Readiness::ScriptReady => "script_ready",
            Readiness::DiagramSettled => "diagram_settled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEncoding {
    Png,
    Jpeg { quality: u8 },
}

/// Bitmap capture of a clipped region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureSpec {
    pub clip: ElementBox,
    pub encoding: ImageEncoding,
    /// Leave the page background unpainted.
    pub omit_background: bool,
}

/// Paginated print settings, in inches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrintSpec {
    pub paper_width: f64,
    pub paper_height: f64,
    pub margin: f64,
    pub print_background: bool,
}

/// Starts browser processes.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, plan: &LaunchPlan) -> Result<Arc<dyn BrowserHandle>, BrowserError>;
}

/// A running browser process.
#[async_trait]
pub trait BrowserHandle: Send + Sync {
    async fn new_page(&self, viewport: PageViewport) -> Result<Box<dyn DiagramPage>, BrowserError>;

    async fn close(&self) -> Result<(), BrowserError>;
}

/// One isolated page, owned by a single render call.
#[async_trait]
pub trait DiagramPage: Send + Sync {
    /// Replace the page content with `html`.
    async fn load(&self, html: &str) -> Result<(), BrowserError>;

    async fn is_ready(&self, stage: Readiness) -> Result<bool, BrowserError>;

    /// Error message reported by the rendering script, if any.
    async fn render_error(&self) -> Result<Option<String>, BrowserError>;

    /// Bounding box of the rendered diagram element, if present.
    async fn diagram_box(&self) -> Result<Option<ElementBox>, BrowserError>;

    /// Serialized markup of the rendered diagram element, if present.
    async fn diagram_markup(&self) -> Result<Option<String>, BrowserError>;

    async fn capture(&self, spec: &CaptureSpec) -> Result<Vec<u8>, BrowserError>;

    async fn print(&self, spec: &PrintSpec) -> Result<Vec<u8>, BrowserError>;

    async fn close(&self) -> Result<(), BrowserError>;
}
