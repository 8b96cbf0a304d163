//! HTTP surface of the gateway.

mod error;
mod handlers;
mod middleware;
mod models;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

pub use error::{ApiError, status_for};
pub use handlers::SERVICE_NAME;
pub use models::{
    DEFAULT_FORMAT_TAG, RenderQuery, RequestedFormat, build_request, parse_format_tag,
    resolve_options,
};

use crate::application::render::RenderPipeline;

#[derive(Clone)]
pub struct HttpState {
    pub pipeline: Arc<RenderPipeline>,
    /// Include error source chains in JSON error bodies.
    pub expose_details: bool,
}

impl HttpState {
    pub fn new(pipeline: Arc<RenderPipeline>, expose_details: bool) -> Self {
        Self {
            pipeline,
            expose_details,
        }
    }
}

pub fn build_router(state: HttpState) -> Router {
    let artifact_route = format!("{}/{{name}}", state.pipeline.artifacts().url_prefix());

    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/render", post(handlers::render))
        .route(&artifact_route, get(handlers::serve_artifact))
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}
