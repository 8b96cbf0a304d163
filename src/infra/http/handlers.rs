use std::io::ErrorKind;

use axum::{
    Json,
    body::Body,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{
        HeaderName, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use mermaid_gateway_api_types::{
    HealthResponse, IndexResponse, RenderMetadata, RenderRequestBody, RenderResponse,
};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::error;

use super::{
    HttpState,
    error::ApiError,
    models::{RenderQuery, RequestedFormat, build_request},
};
use crate::{
    application::{error::HttpError, render::RenderError},
    domain::render::{RenderPayload, RenderResult},
    infra::artifacts::ArtifactError,
};

pub const SERVICE_NAME: &str = "mermaid-gateway";

const HEADER_WIDTH: HeaderName = HeaderName::from_static("x-render-width");
const HEADER_HEIGHT: HeaderName = HeaderName::from_static("x-render-height");
const HEADER_RENDER_TIME: HeaderName = HeaderName::from_static("x-render-time-ms");

pub async fn index() -> Json<IndexResponse> {
    Json(IndexResponse {
        message: "Mermaid Render Gateway is running!".to_string(),
    })
}

pub async fn health() -> Json<HealthResponse> {
    let now = OffsetDateTime::now_utc();
    let timestamp = now
        .format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string());

    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp,
        service: SERVICE_NAME.to_string(),
    })
}

pub async fn render(
    State(state): State<HttpState>,
    query: Result<Query<RenderQuery>, QueryRejection>,
    body: Result<Json<RenderRequestBody>, JsonRejection>,
) -> Response {
    let mut requested_format = None;
    let outcome = async {
        let Query(query) =
            query.map_err(|rejection| RenderError::invalid_input(rejection.body_text()))?;
        let Json(body) = body.map_err(|rejection| {
            RenderError::invalid_input(format!("Invalid request body: {}", rejection.body_text()))
        })?;
        requested_format = body.format.clone();
        let (format, request) = build_request(body)?;
        let result = state.pipeline.render(&request).await?;
        Ok::<_, RenderError>((format, query, result))
    }
    .await;

    match outcome {
        Ok((format, query, result)) => respond(&format, query.raw, result),
        Err(err) => ApiError::from_render(&err, state.expose_details)
            .with_format(requested_format)
            .into_response(),
    }
}

fn respond(format: &RequestedFormat, raw: bool, result: RenderResult) -> Response {
    let metadata = RenderMetadata {
        width: result.width,
        height: result.height,
        render_time_ms: result.render_time_ms,
        content_type: result.mime_type.to_string(),
    };

    let data = match result.payload {
        RenderPayload::Binary(bytes) if raw => {
            return raw_response(result.mime_type, Body::from(bytes), &metadata);
        }
        RenderPayload::Text(text) if raw => {
            return raw_response(result.mime_type, Body::from(text), &metadata);
        }
        RenderPayload::Binary(bytes) => {
            let encoded = STANDARD.encode(bytes);
            if format.data_uri {
                format!("data:{};base64,{encoded}", result.mime_type)
            } else {
                encoded
            }
        }
        RenderPayload::Text(text) => text,
        RenderPayload::Reference { path } => path,
    };

    Json(RenderResponse::success(format.tag.clone(), data, metadata)).into_response()
}

fn raw_response(mime_type: &'static str, body: Body, metadata: &RenderMetadata) -> Response {
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(mime_type));
    headers.insert(HEADER_WIDTH, HeaderValue::from(metadata.width));
    headers.insert(HEADER_HEIGHT, HeaderValue::from(metadata.height));
    headers.insert(HEADER_RENDER_TIME, HeaderValue::from(metadata.render_time_ms));
    response
}

pub async fn serve_artifact(State(state): State<HttpState>, Path(name): Path<String>) -> Response {
    const SOURCE: &str = "infra::http::serve_artifact";

    let not_found = || {
        HttpError::new(
            SOURCE,
            StatusCode::NOT_FOUND,
            "Artifact not found",
            "The requested artifact is not available",
        )
        .into_response()
    };

    match state.pipeline.artifacts().read(&name).await {
        Ok(bytes) => artifact_response(&name, bytes),
        Err(ArtifactError::InvalidName) => not_found(),
        Err(ArtifactError::Io(err)) if err.kind() == ErrorKind::NotFound => not_found(),
        Err(err) => {
            error!(
                target = SOURCE,
                name = %name,
                error = %err,
                "failed to read stored artifact"
            );
            HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read artifact",
                &err,
            )
            .into_response()
        }
    }
}

fn artifact_response(name: &str, bytes: Bytes) -> Response {
    let mime = mime_guess::from_path(name).first_or_octet_stream();
    let length = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("private, max-age=300"));
    response
}
