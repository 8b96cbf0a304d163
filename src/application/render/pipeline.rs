//! The per-request render protocol.
//!
//! Every browser-backed call opens one page, injects a self-contained
//! document, waits for the diagram to settle and captures the requested
//! output. The page is released on every exit path, including cancellation
//! of the caller's future.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use metrics::{counter, histogram};
use tracing::{debug, error, info, warn};

use crate::{
    domain::render::{OutputFormat, RenderPayload, RenderRequest, RenderResult},
    infra::{
        artifacts::{ArtifactStore, SweepReport},
        browser::{
            BrowserError, BrowserSession, CaptureSpec, DiagramPage, ElementBox, ImageEncoding,
            PageViewport, PrintSpec, Readiness,
        },
    },
};

use super::{RenderError, RenderScript, document};

const SOURCE: &str = "application::render::pipeline";

pub const METRIC_RENDER_TOTAL: &str = "mermaid_gateway_renders_total";
pub const METRIC_RENDER_DURATION_MS: &str = "mermaid_gateway_render_duration_ms";

/// A4 in inches, as expected by the print backend.
pub const A4_WIDTH_IN: f64 = 8.27;
pub const A4_HEIGHT_IN: f64 = 11.69;
pub const PRINT_MARGIN_IN: f64 = 0.4;
/// A4 at 96 CSS px per inch.
pub const A4_WIDTH_PX: u32 = 794;
pub const A4_HEIGHT_PX: u32 = 1123;

const DIAGRAM_NOT_FOUND: &str = "diagram not found after rendering";

/// Readiness budgets. Each is further capped by the request's own timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitSettings {
    /// Budget for the document to parse and for the script to become callable.
    pub script_ready: Duration,
    /// Budget for the diagram to be drawn or rejected.
    pub diagram_ready: Duration,
    pub poll_interval: Duration,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            script_ready: Duration::from_secs(30),
            diagram_ready: Duration::from_secs(30),
            poll_interval: Duration::from_millis(50),
        }
    }
}

struct Rendered {
    payload: RenderPayload,
    width: u32,
    height: u32,
}

/// Outputs captured from a live page. HTML page output has no counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BrowserCapture {
    Raster,
    RasterLossy,
    Vector,
    Document,
    Reference,
}

impl BrowserCapture {
    fn for_format(format: OutputFormat) -> Option<Self> {
        match format {
            OutputFormat::Raster => Some(Self::Raster),
            OutputFormat::RasterLossy => Some(Self::RasterLossy),
            OutputFormat::Vector => Some(Self::Vector),
            OutputFormat::Document => Some(Self::Document),
            OutputFormat::Reference => Some(Self::Reference),
            OutputFormat::Page => None,
        }
    }
}

#[derive(Debug)]
pub struct RenderPipeline {
    session: Arc<BrowserSession>,
    artifacts: Arc<ArtifactStore>,
    script: RenderScript,
    waits: WaitSettings,
}

impl RenderPipeline {
    pub fn new(
        session: Arc<BrowserSession>,
        artifacts: Arc<ArtifactStore>,
        script: RenderScript,
        waits: WaitSettings,
    ) -> Self {
        Self {
            session,
            artifacts,
            script,
            waits,
        }
    }

    pub fn session(&self) -> &Arc<BrowserSession> {
        &self.session
    }

    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    pub async fn render(&self, request: &RenderRequest) -> Result<RenderResult, RenderError> {
        let started = Instant::now();
        let format = request.format();

        let outcome = match BrowserCapture::for_format(format) {
            Some(capture) => self.render_in_browser(request, capture).await,
            None => Ok(self.render_page(request)),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        histogram!(METRIC_RENDER_DURATION_MS, "format" => format.as_str()).record(elapsed_ms as f64);

        match outcome {
            Ok(rendered) => {
                counter!(METRIC_RENDER_TOTAL, "format" => format.as_str(), "result" => "ok")
                    .increment(1);
                info!(
                    target = SOURCE,
                    op = "pipeline::render",
                    result = "ok",
                    format = format.as_str(),
                    width = rendered.width,
                    height = rendered.height,
                    elapsed_ms,
                    "Diagram rendered"
                );
                Ok(RenderResult {
                    payload: rendered.payload,
                    width: rendered.width,
                    height: rendered.height,
                    render_time_ms: elapsed_ms,
                    mime_type: format.mime_type(),
                })
            }
            Err(err) => {
                counter!(METRIC_RENDER_TOTAL, "format" => format.as_str(), "result" => err.kind())
                    .increment(1);
                if matches!(err, RenderError::Internal(_)) {
                    error!(
                        target = SOURCE,
                        op = "pipeline::render",
                        result = err.kind(),
                        format = format.as_str(),
                        elapsed_ms,
                        error = %err,
                        "Render failed"
                    );
                } else {
                    warn!(
                        target = SOURCE,
                        op = "pipeline::render",
                        result = err.kind(),
                        format = format.as_str(),
                        elapsed_ms,
                        error = %err,
                        "Render failed"
                    );
                }
                Err(err)
            }
        }
    }

    /// Close the browser session, then evict stale artifacts.
    pub async fn shutdown(&self) -> SweepReport {
        self.session.close().await;

        let artifacts = self.artifacts.clone();
        match tokio::task::spawn_blocking(move || artifacts.sweep()).await {
            Ok(report) => report,
            Err(err) => {
                warn!(target = SOURCE, op = "pipeline::shutdown", error = %err, "Artifact sweep aborted");
                SweepReport::default()
            }
        }
    }

    fn render_page(&self, request: &RenderRequest) -> Rendered {
        let options = request.options();
        Rendered {
            payload: RenderPayload::Text(document::viewer_document(
                request.diagram_text(),
                options,
                &self.script,
            )),
            width: options.width,
            height: options.height,
        }
    }

    async fn render_in_browser(
        &self,
        request: &RenderRequest,
        capture: BrowserCapture,
    ) -> Result<Rendered, RenderError> {
        let options = request.options();
        let viewport = PageViewport {
            width: options.width,
            height: options.height,
            scale: options.scale,
        };

        let guard = PageGuard::new(self.session.new_page(viewport).await?);
        let outcome = self.drive(guard.page(), request, capture).await;
        guard.release().await;
        outcome
    }

    async fn drive(
        &self,
        page: &dyn DiagramPage,
        request: &RenderRequest,
        output: BrowserCapture,
    ) -> Result<Rendered, RenderError> {
        let options = request.options();
        let html = document::capture_document(request.diagram_text(), options, &self.script);
        page.load(&html).await.map_err(browser_failure)?;

        let script_budget = self.waits.script_ready.min(options.timeout);
        let diagram_budget = self.waits.diagram_ready.min(options.timeout);
        self.wait_for(page, Readiness::DocumentParsed, script_budget)
            .await?;
        self.wait_for(page, Readiness::ScriptReady, script_budget)
            .await?;
        self.wait_for(page, Readiness::DiagramSettled, diagram_budget)
            .await?;

        if let Some(message) = page.render_error().await.map_err(browser_failure)? {
            return Err(RenderError::render_failed(message));
        }
        let bounds = page
            .diagram_box()
            .await
            .map_err(browser_failure)?
            .ok_or_else(|| RenderError::render_failed(DIAGRAM_NOT_FOUND))?;
        let (width, height) = rounded(&bounds);

        match output {
            BrowserCapture::Raster => {
                let bytes = capture(page, bounds, ImageEncoding::Png, options.is_transparent()).await?;
                Ok(Rendered {
                    payload: RenderPayload::Binary(bytes),
                    width,
                    height,
                })
            }
            BrowserCapture::RasterLossy => {
                let encoding = ImageEncoding::Jpeg {
                    quality: options.quality,
                };
                let bytes = capture(page, bounds, encoding, false).await?;
                Ok(Rendered {
                    payload: RenderPayload::Binary(bytes),
                    width,
                    height,
                })
            }
            BrowserCapture::Vector => {
                let markup = page
                    .diagram_markup()
                    .await
                    .map_err(browser_failure)?
                    .ok_or_else(|| RenderError::render_failed(DIAGRAM_NOT_FOUND))?;
                Ok(Rendered {
                    payload: RenderPayload::Text(markup),
                    width,
                    height,
                })
            }
            BrowserCapture::Document => {
                let spec = PrintSpec {
                    paper_width: A4_WIDTH_IN,
                    paper_height: A4_HEIGHT_IN,
                    margin: PRINT_MARGIN_IN,
                    print_background: true,
                };
                let bytes = page.print(&spec).await.map_err(browser_failure)?;
                Ok(Rendered {
                    payload: RenderPayload::Binary(bytes),
                    width: A4_WIDTH_PX,
                    height: A4_HEIGHT_PX,
                })
            }
            BrowserCapture::Reference => {
                let bytes = capture(page, bounds, ImageEncoding::Png, options.is_transparent()).await?;
                let artifacts = self.artifacts.clone();
                let stored = tokio::task::spawn_blocking(move || artifacts.save(&bytes, "png"))
                    .await
                    .map_err(|err| RenderError::internal(format!("artifact write aborted: {err}")))??;
                Ok(Rendered {
                    payload: RenderPayload::Reference {
                        path: stored.reference,
                    },
                    width,
                    height,
                })
            }
        }
    }

    async fn wait_for(
        &self,
        page: &dyn DiagramPage,
        stage: Readiness,
        budget: Duration,
    ) -> Result<(), RenderError> {
        let poll_interval = self.waits.poll_interval;
        let poll = async {
            loop {
                match page.is_ready(stage).await {
                    Ok(true) => return Ok(()),
                    Ok(false) => tokio::time::sleep(poll_interval).await,
                    Err(err) => return Err(browser_failure(err)),
                }
            }
        };

        match tokio::time::timeout(budget, poll).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RenderError::RenderTimeout {
                stage: stage.as_str(),
                budget_ms: budget.as_millis() as u64,
            }),
        }
    }
}

async fn capture(
    page: &dyn DiagramPage,
    clip: ElementBox,
    encoding: ImageEncoding,
    omit_background: bool,
) -> Result<Vec<u8>, RenderError> {
    let spec = CaptureSpec {
        clip,
        encoding,
        omit_background,
    };
    page.capture(&spec).await.map_err(browser_failure)
}

fn rounded(bounds: &ElementBox) -> (u32, u32) {
    (bounds.width.round() as u32, bounds.height.round() as u32)
}

fn browser_failure(err: BrowserError) -> RenderError {
    match err {
        BrowserError::Disconnected => RenderError::BrowserUnavailable {
            message: err.to_string(),
            guidance: crate::infra::browser::session::UNAVAILABLE_GUIDANCE,
        },
        other => RenderError::render_failed(other.to_string()),
    }
}

/// Owns a page for the duration of one call. Dropping the guard without
/// [`PageGuard::release`] schedules the close on the current runtime.
struct PageGuard {
    page: Arc<dyn DiagramPage>,
    released: bool,
}

impl PageGuard {
    fn new(page: Box<dyn DiagramPage>) -> Self {
        Self {
            page: Arc::from(page),
            released: false,
        }
    }

    fn page(&self) -> &dyn DiagramPage {
        self.page.as_ref()
    }

    async fn release(mut self) {
        close_page(self.page.clone()).await;
        self.released = true;
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(close_page(self.page.clone()));
            }
            Err(_) => {
                warn!(
                    target = SOURCE,
                    op = "pipeline::page_guard",
                    "No runtime available; page stays open until the browser closes"
                );
            }
        }
    }
}

async fn close_page(page: Arc<dyn DiagramPage>) {
    match page.close().await {
        Ok(()) => debug!(target = SOURCE, op = "pipeline::close_page", "Page closed"),
        Err(err) => warn!(target = SOURCE, op = "pipeline::close_page", error = %err, "Page close failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_round_to_nearest_pixel() {
        let bounds = ElementBox {
            x: 20.0,
            y: 20.0,
            width: 312.49,
            height: 180.5,
        };
        assert_eq!(rounded(&bounds), (312, 181));
    }

    #[test]
    fn disconnects_map_to_unavailable() {
        assert!(matches!(
            browser_failure(BrowserError::Disconnected),
            RenderError::BrowserUnavailable { .. }
        ));
        assert!(matches!(
            browser_failure(BrowserError::Protocol("boom".into())),
            RenderError::RenderFailed(_)
        ));
    }

    #[test]
    fn only_page_output_skips_the_browser() {
        assert_eq!(BrowserCapture::for_format(OutputFormat::Page), None);
        assert_eq!(
            BrowserCapture::for_format(OutputFormat::Reference),
            Some(BrowserCapture::Reference)
        );
        assert_eq!(
            BrowserCapture::for_format(OutputFormat::RasterLossy),
            Some(BrowserCapture::RasterLossy)
        );
    }

    #[test]
    fn a4_constants_are_consistent() {
        assert!((A4_WIDTH_IN * 96.0 - f64::from(A4_WIDTH_PX)).abs() < 1.0);
        assert!((A4_HEIGHT_IN * 96.0 - f64::from(A4_HEIGHT_PX)).abs() < 1.0);
    }
}
