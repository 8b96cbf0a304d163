//! Chromium adapter over the DevTools protocol (`chromiumoxide`).

use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::{
    Browser, BrowserConfig, Page,
    cdp::browser_protocol::{
        emulation::SetDeviceMetricsOverrideParams,
        page::{CaptureScreenshotFormat, PrintToPdfParams, Viewport},
    },
    error::CdpError,
    page::ScreenshotParams,
};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, warn};

use super::{
    BrowserError, BrowserHandle, BrowserLauncher, CaptureSpec, DiagramPage, ElementBox,
    ImageEncoding, LaunchPlan, PageViewport, PrintSpec, Readiness, dom,
};

const SOURCE: &str = "infra::browser::chromium";

/// Launches a local Chromium and drives it over its debugging pipe.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChromiumLauncher;

impl ChromiumLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, plan: &LaunchPlan) -> Result<Arc<dyn BrowserHandle>, BrowserError> {
        let mut builder = BrowserConfig::builder()
            .launch_timeout(plan.timeout)
            .request_timeout(plan.timeout)
            .args(plan.args.iter().map(String::as_str));
        if let Some(executable) = &plan.executable {
            builder = builder.chrome_executable(executable);
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(target = SOURCE, op = "chromium::handler", error = %err, "DevTools event error");
                }
            }
            debug!(target = SOURCE, op = "chromium::handler", "DevTools connection ended");
        });

        Ok(Arc::new(ChromiumBrowser {
            browser: RwLock::new(Some(browser)),
            events: Mutex::new(Some(events)),
        }))
    }
}

struct ChromiumBrowser {
    browser: RwLock<Option<Browser>>,
    events: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl BrowserHandle for ChromiumBrowser {
    async fn new_page(&self, viewport: PageViewport) -> Result<Box<dyn DiagramPage>, BrowserError> {
        let page = {
            let guard = self.browser.read().await;
            let browser = guard.as_ref().ok_or(BrowserError::Disconnected)?;
            browser.new_page("about:blank").await.map_err(protocol)?
        };

        let metrics = SetDeviceMetricsOverrideParams::new(
            i64::from(viewport.width),
            i64::from(viewport.height),
            viewport.scale,
            false,
        );
        if let Err(err) = page.execute(metrics).await {
            let _ = page.close().await;
            return Err(protocol(err));
        }

        Ok(Box::new(ChromiumPage { page }))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        let taken = self.browser.write().await.take();
        let outcome = match taken {
            Some(mut browser) => {
                let closed = browser.close().await.map(|_| ()).map_err(protocol);
                if let Err(err) = browser.wait().await {
                    warn!(target = SOURCE, op = "chromium::close", error = %err, "Browser process did not exit cleanly");
                }
                closed
            }
            None => Ok(()),
        };

        if let Some(events) = self.events.lock().await.take() {
            events.abort();
        }
        outcome
    }
}

struct ChromiumPage {
    page: Page,
}

impl ChromiumPage {
    /// Evaluate `expression` and decode its value; `null` maps to `None`.
    async fn eval<T: DeserializeOwned>(&self, expression: String) -> Result<Option<T>, BrowserError> {
        let result = self
            .page
            .evaluate_expression(expression)
            .await
            .map_err(protocol)?;
        match result.value() {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|err| BrowserError::Decode(err.to_string())),
        }
    }
}

#[async_trait]
impl DiagramPage for ChromiumPage {
    async fn load(&self, html: &str) -> Result<(), BrowserError> {
        self.page.set_content(html).await.map_err(protocol)?;
        Ok(())
    }

    async fn is_ready(&self, stage: Readiness) -> Result<bool, BrowserError> {
        let ready = self.eval::<bool>(readiness_expression(stage)).await?;
        Ok(ready.unwrap_or(false))
    }

    async fn render_error(&self) -> Result<Option<String>, BrowserError> {
        self.eval(format!(
            "(() => {{ const b = document.body; \
             return b && b.dataset.{state} === '{error}' \
             ? (b.dataset.{message} || 'diagram rendering failed') : null; }})()",
            state = dom::STATE_KEY,
            error = dom::STATE_ERROR,
            message = dom::ERROR_KEY,
        ))
        .await
    }

    async fn diagram_box(&self) -> Result<Option<ElementBox>, BrowserError> {
        self.eval(format!(
            "(() => {{ const el = document.querySelector('{selector}'); if (!el) return null; \
             const r = el.getBoundingClientRect(); \
             return {{ x: r.x, y: r.y, width: r.width, height: r.height }}; }})()",
            selector = dom::diagram_selector(),
        ))
        .await
    }

    async fn diagram_markup(&self) -> Result<Option<String>, BrowserError> {
        self.eval(format!(
            "(() => {{ const el = document.querySelector('{selector}'); \
             return el ? el.outerHTML : null; }})()",
            selector = dom::diagram_selector(),
        ))
        .await
    }

    async fn capture(&self, spec: &CaptureSpec) -> Result<Vec<u8>, BrowserError> {
        let clip = Viewport {
            x: spec.clip.x,
            y: spec.clip.y,
            width: spec.clip.width,
            height: spec.clip.height,
            scale: 1.0,
        };
        let builder = ScreenshotParams::builder()
            .clip(clip)
            .omit_background(spec.omit_background)
            .capture_beyond_viewport(true);
        let params = match spec.encoding {
            ImageEncoding::Png => builder.format(CaptureScreenshotFormat::Png),
            ImageEncoding::Jpeg { quality } => builder
                .format(CaptureScreenshotFormat::Jpeg)
                .quality(i64::from(quality)),
        }
        .build();

        self.page.screenshot(params).await.map_err(protocol)
    }

    async fn print(&self, spec: &PrintSpec) -> Result<Vec<u8>, BrowserError> {
        let params = PrintToPdfParams {
            print_background: Some(spec.print_background),
            paper_width: Some(spec.paper_width),
            paper_height: Some(spec.paper_height),
            margin_top: Some(spec.margin),
            margin_bottom: Some(spec.margin),
            margin_left: Some(spec.margin),
            margin_right: Some(spec.margin),
            ..PrintToPdfParams::default()
        };
        self.page.pdf(params).await.map_err(protocol)
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.page.clone().close().await.map_err(protocol)
    }
}

fn readiness_expression(stage: Readiness) -> String {
    match stage {
        Readiness::DocumentParsed => "document.readyState !== 'loading'".to_string(),
        // A script that threw while loading reports through the init snippet.
        Readiness::ScriptReady => format!(
            "(typeof window.mermaid !== 'undefined' && typeof window.mermaid.run === 'function') \
             || (!!document.body && document.body.dataset.{state} === '{error}')",
            state = dom::STATE_KEY,
            error = dom::STATE_ERROR,
        ),
        Readiness::DiagramSettled => format!(
            "(() => {{ const s = document.body ? document.body.dataset.{state} : undefined; \
             return s === '{done}' || s === '{error}' \
             || document.querySelector('{selector}') !== null; }})()",
            state = dom::STATE_KEY,
            done = dom::STATE_DONE,
            error = dom::STATE_ERROR,
            selector = dom::diagram_selector(),
        ),
    }
}

fn protocol(err: CdpError) -> BrowserError {
    BrowserError::Protocol(err.to_string())
}
