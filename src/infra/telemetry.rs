use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::{
    application::render::{METRIC_RENDER_DURATION_MS, METRIC_RENDER_TOTAL},
    config::{LogFormat, LoggingSettings},
    infra::{
        artifacts::METRIC_ARTIFACT_SWEPT,
        browser::session::{METRIC_BROWSER_LAUNCH, METRIC_BROWSER_READY},
    },
};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every metric the gateway emits. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_RENDER_TOTAL,
            Unit::Count,
            "Render calls by output format and result."
        );
        describe_histogram!(
            METRIC_RENDER_DURATION_MS,
            Unit::Milliseconds,
            "Wall-clock render latency in milliseconds, by output format."
        );
        describe_counter!(
            METRIC_BROWSER_LAUNCH,
            Unit::Count,
            "Browser launch attempts by executable source and result."
        );
        describe_gauge!(
            METRIC_BROWSER_READY,
            Unit::Count,
            "1 while a browser process is running and accepting pages, otherwise 0."
        );
        describe_counter!(
            METRIC_ARTIFACT_SWEPT,
            Unit::Count,
            "Expired reference-format images deleted by the artifact sweep."
        );
    });
}
