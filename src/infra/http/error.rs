use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use mermaid_gateway_api_types::{ApiErrorMessage, RenderResponse};

use super::middleware::RenderFailure;
use crate::application::{
    error::{ErrorReport, error_chain},
    render::RenderError,
};

const SOURCE: &str = "infra::http::render";

/// A render failure framed as the JSON error envelope.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<Vec<String>>,
    report: ErrorReport,
    failure: RenderFailure,
}

impl ApiError {
    pub fn from_render(error: &RenderError, expose_details: bool) -> Self {
        let status = status_for(error);
        let message = match error {
            RenderError::Internal(_) => "Internal server error".to_string(),
            RenderError::BrowserUnavailable { message, guidance } => {
                format!("{message}. {guidance}")
            }
            other => other.to_string(),
        };

        Self {
            status,
            code: error.code(),
            message,
            details: expose_details.then(|| error_chain(error)),
            report: ErrorReport::from_error(SOURCE, status, error),
            failure: RenderFailure {
                code: error.code(),
                format: None,
                stage: match error {
                    RenderError::RenderTimeout { stage, .. } => Some(*stage),
                    _ => None,
                },
            },
        }
    }

    /// Record the format tag the client asked for, as sent.
    pub fn with_format(mut self, format: Option<String>) -> Self {
        self.failure.format = format;
        self
    }
}

pub fn status_for(error: &RenderError) -> StatusCode {
    match error {
        RenderError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        RenderError::BrowserUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RenderError::RenderTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        RenderError::RenderFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
        RenderError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        RenderError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = RenderResponse::failure(ApiErrorMessage {
            code: self.code.to_string(),
            message: self.message,
            details: self.details,
        });
        let mut response = (self.status, Json(body)).into_response();
        self.report.attach(&mut response);
        self.failure.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        let cases = [
            (RenderError::invalid_input("x"), StatusCode::BAD_REQUEST),
            (
                RenderError::BrowserUnavailable {
                    message: "x".into(),
                    guidance: "y",
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                RenderError::RenderTimeout {
                    stage: "diagram_settled",
                    budget_ms: 10,
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (RenderError::render_failed("x"), StatusCode::UNPROCESSABLE_ENTITY),
            (RenderError::NotImplemented("x".into()), StatusCode::NOT_IMPLEMENTED),
            (RenderError::internal("x"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(status_for(&error), status, "{error:?}");
        }
    }

    #[test]
    fn internal_errors_hide_their_message() {
        let error = ApiError::from_render(&RenderError::internal("disk full at /var"), false);
        assert_eq!(error.message, "Internal server error");
        assert_eq!(error.code, "INTERNAL_ERROR");
        assert!(error.details.is_none());
        assert_eq!(error.report.messages[0], "internal error: disk full at /var");
    }

    #[test]
    fn timeouts_carry_stage_and_format_to_the_log() {
        let error = RenderError::RenderTimeout {
            stage: "script_ready",
            budget_ms: 250,
        };
        let response = ApiError::from_render(&error, false)
            .with_format(Some("PDF".to_string()))
            .into_response();

        assert_eq!(
            response.extensions().get::<RenderFailure>(),
            Some(&RenderFailure {
                code: "RENDER_TIMEOUT",
                format: Some("PDF".to_string()),
                stage: Some("script_ready"),
            })
        );
        assert_eq!(
            response.extensions().get::<ErrorReport>().map(|r| r.source),
            Some(SOURCE)
        );
    }

    #[test]
    fn details_only_when_exposed() {
        let error = RenderError::render_failed("Parse error on line 2");
        assert!(ApiError::from_render(&error, false).details.is_none());
        assert_eq!(
            ApiError::from_render(&error, true).details,
            Some(vec!["Parse error on line 2".to_string()])
        );
    }
}
