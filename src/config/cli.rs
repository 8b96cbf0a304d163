use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the gateway binary.
#[derive(Debug, Parser)]
#[command(
    name = "mermaid-gateway",
    version,
    about = "Render Mermaid diagrams over HTTP through headless Chromium"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "MERMAID_GATEWAY_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP gateway (default).
    Serve(Box<ServeArgs>),
    /// Report which browser executable would be used, then exit.
    #[command(name = "detect-browser")]
    DetectBrowser,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Use this browser executable instead of searching for one.
    #[arg(long = "browser-executable", value_name = "PATH", value_hint = ValueHint::ExecutablePath)]
    pub browser_executable: Option<PathBuf>,

    /// Override how long a browser launch may take.
    #[arg(long = "browser-launch-timeout-seconds", value_name = "SECONDS")]
    pub browser_launch_timeout_seconds: Option<u64>,

    /// Override the Mermaid bundle inlined into render documents.
    #[arg(long = "render-script-path", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub render_script_path: Option<PathBuf>,

    /// Override the directory that stores reference-format images.
    #[arg(long = "artifacts-directory", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub artifacts_directory: Option<PathBuf>,

    /// Override how long stored images are kept.
    #[arg(long = "artifacts-ttl-seconds", value_name = "SECONDS")]
    pub artifacts_ttl_seconds: Option<u64>,

    /// Include error source chains in API error responses.
    #[arg(
        long = "diagnostics-expose-details",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub diagnostics_expose_details: Option<bool>,
}
