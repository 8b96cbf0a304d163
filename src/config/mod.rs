//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{env, ffi::OsString, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{CliArgs, Command, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "mermaid-gateway";
const ENV_PREFIX: &str = "MERMAID_GATEWAY";
/// Executable override honoured for compatibility with existing deployments.
pub const CHROME_PATH_ENV: &str = "CHROME_PATH";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_LAUNCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SCRIPT_READY_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_DIAGRAM_READY_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 50;
pub(crate) const DEFAULT_SCRIPT_PATH: &str = "assets/mermaid.min.js";
const DEFAULT_ARTIFACTS_DIR: &str = "temp";
const DEFAULT_ARTIFACTS_URL_PREFIX: &str = "/temp";
const DEFAULT_ARTIFACTS_TTL_SECS: u64 = 60 * 60;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub browser: BrowserSettings,
    pub render: RenderSettings,
    pub artifacts: ArtifactSettings,
    pub diagnostics: DiagnosticsSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub executable_path: Option<PathBuf>,
    pub launch_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub script_path: PathBuf,
    pub script_ready_timeout: Duration,
    pub diagram_ready_timeout: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ArtifactSettings {
    pub directory: PathBuf,
    pub url_prefix: String,
    pub ttl: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct DiagnosticsSettings {
    /// Include error source chains in API error bodies.
    pub expose_details: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_chrome_path(env::var_os(CHROME_PATH_ENV));

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::DetectBrowser) | None => {
            raw.apply_serve_overrides(&ServeOverrides::default())
        }
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    browser: RawBrowserSettings,
    render: RawRenderSettings,
    artifacts: RawArtifactSettings,
    diagnostics: RawDiagnosticsSettings,
}

impl RawSettings {
    /// `CHROME_PATH` only fills in when no other layer named an executable.
    fn apply_chrome_path(&mut self, value: Option<OsString>) {
        if self.browser.executable_path.is_some() {
            return;
        }
        if let Some(value) = value.filter(|value| !value.is_empty()) {
            self.browser.executable_path = Some(PathBuf::from(value));
        }
    }

    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(path) = overrides.browser_executable.as_ref() {
            self.browser.executable_path = Some(path.clone());
        }
        if let Some(seconds) = overrides.browser_launch_timeout_seconds {
            self.browser.launch_timeout_seconds = Some(seconds);
        }
        if let Some(path) = overrides.render_script_path.as_ref() {
            self.render.script_path = Some(path.clone());
        }
        if let Some(directory) = overrides.artifacts_directory.as_ref() {
            self.artifacts.directory = Some(directory.clone());
        }
        if let Some(ttl) = overrides.artifacts_ttl_seconds {
            self.artifacts.ttl_seconds = Some(ttl);
        }
        if let Some(expose) = overrides.diagnostics_expose_details {
            self.diagnostics.expose_details = Some(expose);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            browser,
            render,
            artifacts,
            diagnostics,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            browser: build_browser_settings(browser)?,
            render: build_render_settings(render)?,
            artifacts: build_artifact_settings(artifacts)?,
            diagnostics: DiagnosticsSettings {
                expose_details: diagnostics.expose_details.unwrap_or(false),
            },
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    let graceful_shutdown = positive_secs(graceful_secs, "server.graceful_shutdown_seconds")?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_browser_settings(browser: RawBrowserSettings) -> Result<BrowserSettings, LoadError> {
    let executable_path = browser
        .executable_path
        .filter(|path| !path.as_os_str().is_empty());
    let launch_timeout = positive_secs(
        browser
            .launch_timeout_seconds
            .unwrap_or(DEFAULT_LAUNCH_TIMEOUT_SECS),
        "browser.launch_timeout_seconds",
    )?;

    Ok(BrowserSettings {
        executable_path,
        launch_timeout,
    })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let script_path = render
        .script_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SCRIPT_PATH));
    if script_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "render.script_path",
            "path must not be empty",
        ));
    }

    let script_ready_timeout = positive_millis(
        render
            .script_ready_timeout_ms
            .unwrap_or(DEFAULT_SCRIPT_READY_TIMEOUT_MS),
        "render.script_ready_timeout_ms",
    )?;
    let diagram_ready_timeout = positive_millis(
        render
            .diagram_ready_timeout_ms
            .unwrap_or(DEFAULT_DIAGRAM_READY_TIMEOUT_MS),
        "render.diagram_ready_timeout_ms",
    )?;
    let poll_interval = positive_millis(
        render.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
        "render.poll_interval_ms",
    )?;
    if poll_interval > script_ready_timeout.min(diagram_ready_timeout) {
        return Err(LoadError::invalid(
            "render.poll_interval_ms",
            "must not exceed the readiness timeouts",
        ));
    }

    Ok(RenderSettings {
        script_path,
        script_ready_timeout,
        diagram_ready_timeout,
        poll_interval,
    })
}

fn build_artifact_settings(artifacts: RawArtifactSettings) -> Result<ArtifactSettings, LoadError> {
    let directory = artifacts
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACTS_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "artifacts.directory",
            "path must not be empty",
        ));
    }

    let url_prefix = artifacts
        .url_prefix
        .unwrap_or_else(|| DEFAULT_ARTIFACTS_URL_PREFIX.to_string());
    let url_prefix = url_prefix.trim().trim_end_matches('/').to_string();
    if !url_prefix.starts_with('/') || url_prefix.len() < 2 {
        return Err(LoadError::invalid(
            "artifacts.url_prefix",
            "must be an absolute path such as `/temp`",
        ));
    }
    if url_prefix.contains(['{', '}', '*']) {
        return Err(LoadError::invalid(
            "artifacts.url_prefix",
            "must not contain route wildcards",
        ));
    }

    let ttl = positive_secs(
        artifacts.ttl_seconds.unwrap_or(DEFAULT_ARTIFACTS_TTL_SECS),
        "artifacts.ttl_seconds",
    )?;

    Ok(ArtifactSettings {
        directory,
        url_prefix,
        ttl,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBrowserSettings {
    executable_path: Option<PathBuf>,
    launch_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    script_path: Option<PathBuf>,
    script_ready_timeout_ms: Option<u64>,
    diagram_ready_timeout_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawArtifactSettings {
    directory: Option<PathBuf>,
    url_prefix: Option<String>,
    ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDiagnosticsSettings {
    expose_details: Option<bool>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn positive_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn positive_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
