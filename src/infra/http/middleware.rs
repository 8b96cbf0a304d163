use std::time::Instant;

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use tracing::{error, warn};
use uuid::Uuid;

use crate::application::error::ErrorReport;

const TARGET: &str = "mermaid_gateway::http::response";

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

/// What the render handler knew when it failed: the wire code, the format
/// tag the client asked for and, for timeouts, the stage that ran out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderFailure {
    pub code: &'static str,
    pub format: Option<String>,
    pub stage: Option<&'static str>,
}

impl RenderFailure {
    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    request.extensions_mut().insert(RequestContext {
        request_id: Uuid::new_v4().to_string(),
    });
    next.run(request).await
}

/// Log every failed response with the diagnostics the handler attached.
/// Both extensions are removed so they never leave the process.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let start = Instant::now();

    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();
    let report = response.extensions_mut().remove::<ErrorReport>();
    let failure = response.extensions_mut().remove::<RenderFailure>();

    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }

    let elapsed_ms = start.elapsed().as_millis() as u64;
    let (source, chain) = report
        .map(|report| (report.source, report.messages))
        .unwrap_or(("unknown", Vec::new()));
    let detail = chain.first().map(String::as_str).unwrap_or("no diagnostic available");
    let code = failure.as_ref().map(|f| f.code).unwrap_or("");
    let format = failure
        .as_ref()
        .and_then(|f| f.format.as_deref())
        .unwrap_or("");
    let stage = failure.as_ref().and_then(|f| f.stage).unwrap_or("");

    if status.is_server_error() {
        error!(
            target = TARGET,
            status = status.as_u16(),
            code,
            format,
            stage,
            method = %method,
            path = %path,
            elapsed_ms,
            source,
            detail,
            chain = ?chain,
            request_id = %request_id,
            "Render gateway request failed",
        );
    } else {
        warn!(
            target = TARGET,
            status = status.as_u16(),
            code,
            format,
            stage,
            method = %method,
            path = %path,
            elapsed_ms,
            source,
            detail,
            request_id = %request_id,
            "Render gateway request rejected",
        );
    }

    response
}
