//! The process-wide browser session.
//!
//! One browser process is launched lazily on the first page request and
//! shared by every render call until [`BrowserSession::close`]. Ready sessions
//! are served through a shared read lock; launches are serialized by a
//! separate gate so concurrent first callers produce exactly one process.
//! Callers that queued behind a launch share its outcome, failure included.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use metrics::{counter, gauge};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::{
    BrowserError, BrowserHandle, BrowserLauncher, DiagramPage, ExecutableResolver,
    ExecutableSource, LaunchPlan, PageViewport,
};

const SOURCE: &str = "infra::browser::session";

pub const METRIC_BROWSER_LAUNCH: &str = "mermaid_gateway_browser_launches_total";
pub const METRIC_BROWSER_READY: &str = "mermaid_gateway_browser_ready";

/// Flags for the primary launch, suitable for containers without a sandbox.
pub const LAUNCH_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
];

/// Flags for the retry with the driver's bundled executable.
pub const FALLBACK_ARGS: &[&str] = &["--no-sandbox"];

pub const UNAVAILABLE_GUIDANCE: &str = "Install Google Chrome or Chromium, or point CHROME_PATH \
     (or browser.executable_path) at a working executable. Run `mermaid-gateway detect-browser` \
     to see what is found automatically.";

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Operator-supplied executable; ignored when it does not exist.
    pub executable_path: Option<PathBuf>,
    pub launch_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            executable_path: None,
            launch_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{message}")]
    Unavailable {
        message: String,
        guidance: &'static str,
    },
    #[error("failed to open page: {0}")]
    Page(#[source] BrowserError),
}

impl SessionError {
    fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
            guidance: UNAVAILABLE_GUIDANCE,
        }
    }
}

/// Observable session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Launching,
    Ready,
    /// Last launch failed; the next page request tries again.
    Failed(String),
    Closed,
}

enum State {
    Uninitialized,
    Launching,
    Ready(Arc<dyn BrowserHandle>),
    Failed(String),
    Closed,
}

impl State {
    fn status(&self) -> SessionState {
        match self {
            State::Uninitialized => SessionState::Uninitialized,
            State::Launching => SessionState::Launching,
            State::Ready(_) => SessionState::Ready,
            State::Failed(reason) => SessionState::Failed(reason.clone()),
            State::Closed => SessionState::Closed,
        }
    }
}

pub struct BrowserSession {
    launcher: Arc<dyn BrowserLauncher>,
    resolver: ExecutableResolver,
    settings: SessionSettings,
    state: RwLock<State>,
    launch_gate: Mutex<()>,
    /// Bumped each time a launch settles, under the state write lock.
    generation: AtomicU64,
}

impl fmt::Debug for BrowserSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrowserSession")
            .field("resolver", &self.resolver)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl BrowserSession {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        resolver: ExecutableResolver,
        settings: SessionSettings,
    ) -> Self {
        Self {
            launcher,
            resolver,
            settings,
            state: RwLock::new(State::Uninitialized),
            launch_gate: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    pub async fn state(&self) -> SessionState {
        self.state.read().await.status()
    }

    /// Return the running browser, launching it first if needed.
    pub async fn ensure_ready(&self) -> Result<Arc<dyn BrowserHandle>, SessionError> {
        let observed = self.generation.load(Ordering::Acquire);
        if let Some(outcome) = self.current().await {
            return outcome;
        }

        let _gate = self.launch_gate.lock().await;
        // Another caller may have finished launching while we waited.
        if let Some(outcome) = self.current().await {
            return outcome;
        }
        if self.generation.load(Ordering::Acquire) != observed {
            if let State::Failed(reason) = &*self.state.read().await {
                debug!(
                    target = SOURCE,
                    op = "session::ensure_ready",
                    "Sharing the failure of the launch this call waited on"
                );
                return Err(launch_failed(reason));
            }
        }

        let previous = {
            let mut state = self.state.write().await;
            std::mem::replace(&mut *state, State::Launching).status()
        };
        info!(
            target = SOURCE,
            op = "session::ensure_ready",
            from = ?previous,
            "Launching browser"
        );

        let outcome = self.launch().await;
        let mut state = self.state.write().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        match outcome {
            Ok(handle) => {
                *state = State::Ready(handle.clone());
                gauge!(METRIC_BROWSER_READY).set(1.0);
                Ok(handle)
            }
            Err(reason) => {
                let error = launch_failed(&reason);
                *state = State::Failed(reason);
                Err(error)
            }
        }
    }

    /// Open an isolated page sized to `viewport`.
    pub async fn new_page(
        &self,
        viewport: PageViewport,
    ) -> Result<Box<dyn DiagramPage>, SessionError> {
        let handle = self.ensure_ready().await?;
        match handle.new_page(viewport).await {
            Ok(page) => Ok(page),
            Err(err) => {
                warn!(
                    target = SOURCE,
                    op = "session::new_page",
                    error = %err,
                    "Page creation failed; discarding browser"
                );
                self.discard(&handle).await;
                Err(SessionError::Page(err))
            }
        }
    }

    /// Shut the browser down. Safe to call repeatedly.
    pub async fn close(&self) {
        let _gate = self.launch_gate.lock().await;
        let previous = {
            let mut state = self.state.write().await;
            std::mem::replace(&mut *state, State::Closed)
        };
        gauge!(METRIC_BROWSER_READY).set(0.0);

        match previous {
            State::Ready(handle) => {
                if let Err(err) = handle.close().await {
                    warn!(target = SOURCE, op = "session::close", error = %err, "Browser close failed");
                }
                info!(target = SOURCE, op = "session::close", "Browser session closed");
            }
            State::Closed => {
                debug!(target = SOURCE, op = "session::close", "Session already closed");
            }
            other => {
                info!(
                    target = SOURCE,
                    op = "session::close",
                    from = ?other.status(),
                    "Session closed without a running browser"
                );
            }
        }
    }

    async fn current(&self) -> Option<Result<Arc<dyn BrowserHandle>, SessionError>> {
        match &*self.state.read().await {
            State::Ready(handle) => Some(Ok(handle.clone())),
            State::Closed => Some(Err(SessionError::unavailable(
                "browser session has been shut down",
            ))),
            _ => None,
        }
    }

    /// Forget `handle` if it is still the current browser.
    async fn discard(&self, handle: &Arc<dyn BrowserHandle>) {
        let removed = {
            let mut state = self.state.write().await;
            let is_current =
                matches!(&*state, State::Ready(current) if Arc::ptr_eq(current, handle));
            if is_current {
                *state = State::Uninitialized;
                gauge!(METRIC_BROWSER_READY).set(0.0);
            }
            is_current
        };

        if removed {
            if let Err(err) = handle.close().await {
                debug!(target = SOURCE, op = "session::discard", error = %err, "Discarded browser did not close cleanly");
            }
        }
    }

    async fn launch(&self) -> Result<Arc<dyn BrowserHandle>, String> {
        let (executable, source) = self.pick_executable().await;
        let plan = LaunchPlan {
            executable,
            source,
            args: LAUNCH_ARGS.iter().map(|s| s.to_string()).collect(),
            timeout: self.settings.launch_timeout,
        };

        let primary = match self.attempt(&plan).await {
            Ok(handle) => return Ok(handle),
            Err(err) => err,
        };

        if source == ExecutableSource::Bundled {
            return Err(primary.to_string());
        }

        warn!(
            target = SOURCE,
            op = "session::launch",
            source = source.as_str(),
            error = %primary,
            "Retrying with bundled browser"
        );
        let fallback = LaunchPlan {
            executable: None,
            source: ExecutableSource::Bundled,
            args: FALLBACK_ARGS.iter().map(|s| s.to_string()).collect(),
            timeout: self.settings.launch_timeout,
        };

        self.attempt(&fallback).await.map_err(|err| {
            format!("{} executable failed ({primary}); bundled fallback failed ({err})", source.as_str())
        })
    }

    async fn attempt(&self, plan: &LaunchPlan) -> Result<Arc<dyn BrowserHandle>, BrowserError> {
        let started = Instant::now();
        let outcome = self.launcher.launch(plan).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let executable = plan
            .executable
            .as_deref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "<bundled>".to_string());

        match &outcome {
            Ok(_) => {
                counter!(METRIC_BROWSER_LAUNCH, "source" => plan.source.as_str(), "result" => "ok")
                    .increment(1);
                info!(
                    target = SOURCE,
                    op = "session::launch",
                    result = "ok",
                    source = plan.source.as_str(),
                    executable = %executable,
                    elapsed_ms,
                    "Browser launched"
                );
            }
            Err(err) => {
                counter!(METRIC_BROWSER_LAUNCH, "source" => plan.source.as_str(), "result" => "error")
                    .increment(1);
                error!(
                    target = SOURCE,
                    op = "session::launch",
                    result = "error",
                    source = plan.source.as_str(),
                    executable = %executable,
                    elapsed_ms,
                    error = %err,
                    "Browser launch failed"
                );
            }
        }

        outcome
    }

    async fn pick_executable(&self) -> (Option<PathBuf>, ExecutableSource) {
        if let Some(path) = &self.settings.executable_path {
            if is_file(path) {
                return (Some(path.clone()), ExecutableSource::Configured);
            }
            warn!(
                target = SOURCE,
                op = "session::pick_executable",
                path = %path.display(),
                "Configured browser executable does not exist"
            );
        }

        let resolver = self.resolver.clone();
        match tokio::task::spawn_blocking(move || resolver.resolve()).await {
            Ok(Some(path)) => (Some(path), ExecutableSource::Detected),
            Ok(None) => (None, ExecutableSource::Bundled),
            Err(err) => {
                warn!(target = SOURCE, op = "session::pick_executable", error = %err, "Executable lookup aborted");
                (None, ExecutableSource::Bundled)
            }
        }
    }
}

fn launch_failed(reason: &str) -> SessionError {
    SessionError::unavailable(format!("browser could not be started: {reason}"))
}

fn is_file(path: &Path) -> bool {
    std::fs::metadata(path).map(|meta| meta.is_file()).unwrap_or(false)
}
