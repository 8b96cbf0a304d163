use std::{process, sync::Arc, time::Duration};

use mermaid_gateway::{
    application::{
        error::AppError,
        render::{RenderPipeline, RenderScript, WaitSettings},
    },
    config,
    infra::{
        artifacts::ArtifactStore,
        browser::{BrowserSession, ChromiumLauncher, ExecutableResolver, SessionSettings},
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const SOURCE: &str = "mermaid_gateway::main";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    match command {
        config::Command::Serve(_) => {
            telemetry::init(&settings.logging).map_err(AppError::from)?;
            run_serve(settings).await
        }
        config::Command::DetectBrowser => {
            detect_browser(&settings);
            Ok(())
        }
    }
}

fn detect_browser(settings: &config::Settings) {
    let resolver = ExecutableResolver::for_current_platform();
    println!("platform: {}", resolver.platform().as_str());

    match &settings.browser.executable_path {
        Some(path) if path.is_file() => println!("configured: {}", path.display()),
        Some(path) => println!("configured: {} (not found, ignored)", path.display()),
        None => println!("configured: none"),
    }

    match resolver.resolve() {
        Some(path) => println!("detected: {}", path.display()),
        None => println!("detected: none (the bundled browser lookup will be used)"),
    }
}

fn build_pipeline(
    settings: &config::Settings,
    script: RenderScript,
) -> Arc<RenderPipeline> {
    let session = BrowserSession::new(
        Arc::new(ChromiumLauncher::new()),
        ExecutableResolver::for_current_platform(),
        SessionSettings {
            executable_path: settings.browser.executable_path.clone(),
            launch_timeout: settings.browser.launch_timeout,
        },
    );
    let artifacts = ArtifactStore::new(
        settings.artifacts.directory.clone(),
        settings.artifacts.url_prefix.clone(),
        settings.artifacts.ttl,
    );
    let waits = WaitSettings {
        script_ready: settings.render.script_ready_timeout,
        diagram_ready: settings.render.diagram_ready_timeout,
        poll_interval: settings.render.poll_interval,
    };

    Arc::new(RenderPipeline::new(
        Arc::new(session),
        Arc::new(artifacts),
        script,
        waits,
    ))
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let script = RenderScript::load(&settings.render.script_path).await?;
    let pipeline = build_pipeline(&settings, script);

    let sweeper = spawn_artifact_sweeper(pipeline.clone(), settings.artifacts.ttl);
    let router = http::build_router(HttpState::new(
        pipeline.clone(),
        settings.diagnostics.expose_details,
    ));

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = SOURCE,
        addr = %settings.server.addr,
        script = %settings.render.script_path.display(),
        artifacts = %settings.artifacts.directory.display(),
        "Mermaid gateway listening"
    );

    let served = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper.abort();
    let grace = settings.server.graceful_shutdown;
    match tokio::time::timeout(grace, pipeline.shutdown()).await {
        Ok(report) => info!(
            target = SOURCE,
            removed = report.removed,
            retained = report.retained,
            failed = report.failed,
            "Gateway stopped"
        ),
        Err(_) => warn!(
            target = SOURCE,
            grace_secs = grace.as_secs(),
            "Shutdown cleanup did not finish in time"
        ),
    }

    served.map_err(|err| AppError::unexpected(format!("server error: {err}")))
}

/// Periodically evict expired artifacts while the server runs.
fn spawn_artifact_sweeper(
    pipeline: Arc<RenderPipeline>,
    ttl: Duration,
) -> tokio::task::JoinHandle<()> {
    let period = (ttl / 2).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            let store = pipeline.artifacts().clone();
            if let Err(err) = tokio::task::spawn_blocking(move || store.sweep()).await {
                warn!(target = SOURCE, error = %err, "Artifact sweep task failed");
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target = SOURCE, error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(target = SOURCE, error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!(target = SOURCE, "Shutdown signal received");
}
