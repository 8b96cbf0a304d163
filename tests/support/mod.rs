#![allow(dead_code)]

//! Scripted stand-in for the browser so the render protocol and the HTTP
//! surface can be exercised without Chromium.

use std::{
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use mermaid_gateway::{
    application::render::{RenderPipeline, RenderScript, WaitSettings},
    infra::{
        artifacts::ArtifactStore,
        browser::{
            BrowserError, BrowserHandle, BrowserLauncher, BrowserSession, CaptureSpec,
            DiagramPage, ElementBox, ExecutableResolver, LaunchPlan, PageViewport, Platform,
            PrintSpec, Readiness, SessionSettings,
        },
        http::{HttpState, build_router},
    },
};

pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake";
pub const PDF_BYTES: &[u8] = b"%PDF-1.7 fake";
pub const SVG_MARKUP: &str = r#"<svg id="mermaid-0" xmlns="http://www.w3.org/2000/svg"></svg>"#;

/// How every page opened by the fake browser behaves.
#[derive(Debug, Clone)]
pub struct PageBehavior {
    /// The first checkpoint that never becomes ready.
    pub stall_at: Option<Readiness>,
    pub render_error: Option<String>,
    pub bounds: Option<ElementBox>,
    pub markup: Option<String>,
    /// Fail the capture call with a protocol error.
    pub capture_fails: bool,
    /// Delay every readiness poll by this much.
    pub poll_delay: Duration,
}

impl Default for PageBehavior {
    fn default() -> Self {
        Self {
            stall_at: None,
            render_error: None,
            bounds: Some(ElementBox {
                x: 20.0,
                y: 20.0,
                width: 320.4,
                height: 180.6,
            }),
            markup: Some(SVG_MARKUP.to_string()),
            capture_fails: false,
            poll_delay: Duration::ZERO,
        }
    }
}

/// Shared record of everything the fake browser was asked to do.
#[derive(Debug, Default)]
pub struct BrowserLog {
    pub launches: AtomicUsize,
    pub pages_opened: AtomicUsize,
    pub pages_closed: AtomicUsize,
    pub browser_closes: AtomicUsize,
    pub viewports: Mutex<Vec<PageViewport>>,
    pub documents: Mutex<Vec<String>>,
    pub captures: Mutex<Vec<CaptureSpec>>,
    pub prints: Mutex<Vec<PrintSpec>>,
}

impl BrowserLog {
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn pages_opened(&self) -> usize {
        self.pages_opened.load(Ordering::SeqCst)
    }

    pub fn pages_closed(&self) -> usize {
        self.pages_closed.load(Ordering::SeqCst)
    }

    pub fn last_capture(&self) -> Option<CaptureSpec> {
        self.captures.lock().expect("captures lock").last().copied()
    }

    pub fn last_document(&self) -> Option<String> {
        self.documents.lock().expect("documents lock").last().cloned()
    }

    pub fn last_viewport(&self) -> Option<PageViewport> {
        self.viewports.lock().expect("viewports lock").last().copied()
    }
}

pub struct FakeLauncher {
    behavior: PageBehavior,
    fail_launch: bool,
    log: Arc<BrowserLog>,
}

impl FakeLauncher {
    pub fn new(behavior: PageBehavior) -> Self {
        Self {
            behavior,
            fail_launch: false,
            log: Arc::new(BrowserLog::default()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_launch: true,
            ..Self::new(PageBehavior::default())
        }
    }

    pub fn log(&self) -> Arc<BrowserLog> {
        self.log.clone()
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, _plan: &LaunchPlan) -> Result<Arc<dyn BrowserHandle>, BrowserError> {
        self.log.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail_launch {
            return Err(BrowserError::Launch("no browser in test sandbox".to_string()));
        }
        Ok(Arc::new(FakeBrowser {
            behavior: self.behavior.clone(),
            log: self.log.clone(),
        }))
    }
}

struct FakeBrowser {
    behavior: PageBehavior,
    log: Arc<BrowserLog>,
}

#[async_trait]
impl BrowserHandle for FakeBrowser {
    async fn new_page(&self, viewport: PageViewport) -> Result<Box<dyn DiagramPage>, BrowserError> {
        self.log.pages_opened.fetch_add(1, Ordering::SeqCst);
        self.log
            .viewports
            .lock()
            .expect("viewports lock")
            .push(viewport);
        Ok(Box::new(FakePage {
            behavior: self.behavior.clone(),
            log: self.log.clone(),
        }))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.log.browser_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakePage {
    behavior: PageBehavior,
    log: Arc<BrowserLog>,
}

fn stage_rank(stage: Readiness) -> u8 {
    match stage {
        Readiness::DocumentParsed => 0,
        Readiness::ScriptReady => 1,
        Readiness::DiagramSettled => 2,
    }
}

#[async_trait]
impl DiagramPage for FakePage {
    async fn load(&self, html: &str) -> Result<(), BrowserError> {
        self.log
            .documents
            .lock()
            .expect("documents lock")
            .push(html.to_string());
        Ok(())
    }

    async fn is_ready(&self, stage: Readiness) -> Result<bool, BrowserError> {
        if !self.behavior.poll_delay.is_zero() {
            tokio::time::sleep(self.behavior.poll_delay).await;
        }
        Ok(match self.behavior.stall_at {
            Some(stalled) => stage_rank(stage) < stage_rank(stalled),
            None => true,
        })
    }

    async fn render_error(&self) -> Result<Option<String>, BrowserError> {
        Ok(self.behavior.render_error.clone())
    }

    async fn diagram_box(&self) -> Result<Option<ElementBox>, BrowserError> {
        Ok(self.behavior.bounds)
    }

    async fn diagram_markup(&self) -> Result<Option<String>, BrowserError> {
        Ok(self.behavior.markup.clone())
    }

    async fn capture(&self, spec: &CaptureSpec) -> Result<Vec<u8>, BrowserError> {
        self.log.captures.lock().expect("captures lock").push(*spec);
        if self.behavior.capture_fails {
            return Err(BrowserError::Protocol("screenshot target closed".to_string()));
        }
        Ok(PNG_BYTES.to_vec())
    }

    async fn print(&self, spec: &PrintSpec) -> Result<Vec<u8>, BrowserError> {
        self.log.prints.lock().expect("prints lock").push(*spec);
        Ok(PDF_BYTES.to_vec())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.log.pages_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A resolver that never finds anything, so launches use the bundled plan.
pub fn empty_resolver() -> ExecutableResolver {
    ExecutableResolver::for_platform(Platform::Other)
        .with_candidates(Vec::<String>::new())
        .with_path_lookup("/nonexistent/which", Vec::<String>::new())
}

pub fn fast_waits() -> WaitSettings {
    WaitSettings {
        script_ready: Duration::from_millis(300),
        diagram_ready: Duration::from_millis(300),
        poll_interval: Duration::from_millis(5),
    }
}

pub fn pipeline_with(launcher: FakeLauncher, artifacts_root: &Path) -> Arc<RenderPipeline> {
    let session = BrowserSession::new(
        Arc::new(launcher),
        empty_resolver(),
        SessionSettings::default(),
    );
    let artifacts = ArtifactStore::new(
        artifacts_root.to_path_buf(),
        "/temp",
        Duration::from_secs(3600),
    );
    Arc::new(RenderPipeline::new(
        Arc::new(session),
        Arc::new(artifacts),
        RenderScript::from_source("window.mermaid = { initialize() {}, run() {} };"),
        fast_waits(),
    ))
}

pub fn router_with(pipeline: Arc<RenderPipeline>, expose_details: bool) -> axum::Router {
    build_router(HttpState::new(pipeline, expose_details))
}
