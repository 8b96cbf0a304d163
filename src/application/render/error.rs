use thiserror::Error;

use crate::{
    domain::error::DomainError,
    infra::{artifacts::ArtifactError, browser::SessionError},
};

/// Classified failure of a render call.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{message}")]
    BrowserUnavailable {
        message: String,
        guidance: &'static str,
    },
    #[error("rendering timed out waiting for {stage} after {budget_ms} ms")]
    RenderTimeout { stage: &'static str, budget_ms: u64 },
    #[error("{0}")]
    RenderFailed(String),
    #[error("{0}")]
    NotImplemented(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RenderError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn render_failed(message: impl Into<String>) -> Self {
        Self::RenderFailed(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable wire code.
    pub fn code(&self) -> &'static str {
        match self {
            RenderError::InvalidInput(_) => "INVALID_INPUT",
            RenderError::BrowserUnavailable { .. } => "BROWSER_UNAVAILABLE",
            RenderError::RenderTimeout { .. } => "RENDER_TIMEOUT",
            RenderError::RenderFailed(_) => "RENDER_FAILED",
            RenderError::NotImplemented(_) => "NOT_IMPLEMENTED",
            RenderError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Short label used as a metrics dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            RenderError::InvalidInput(_) => "invalid_input",
            RenderError::BrowserUnavailable { .. } => "browser_unavailable",
            RenderError::RenderTimeout { .. } => "timeout",
            RenderError::RenderFailed(_) => "failed",
            RenderError::NotImplemented(_) => "not_implemented",
            RenderError::Internal(_) => "internal",
        }
    }
}

impl From<DomainError> for RenderError {
    fn from(error: DomainError) -> Self {
        Self::InvalidInput(error.message().to_string())
    }
}

impl From<SessionError> for RenderError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::Unavailable { message, guidance } => {
                Self::BrowserUnavailable { message, guidance }
            }
            SessionError::Page(err) => Self::BrowserUnavailable {
                message: format!("browser could not open a page: {err}"),
                guidance: crate::infra::browser::session::UNAVAILABLE_GUIDANCE,
            },
        }
    }
}

impl From<ArtifactError> for RenderError {
    fn from(error: ArtifactError) -> Self {
        Self::Internal(format!("failed to store render artifact: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::browser::BrowserError;

    #[test]
    fn codes_match_the_wire_contract() {
        let cases = [
            (RenderError::invalid_input("x"), "INVALID_INPUT"),
            (
                RenderError::BrowserUnavailable {
                    message: "x".into(),
                    guidance: "y",
                },
                "BROWSER_UNAVAILABLE",
            ),
            (
                RenderError::RenderTimeout {
                    stage: "diagram_settled",
                    budget_ms: 1000,
                },
                "RENDER_TIMEOUT",
            ),
            (RenderError::render_failed("x"), "RENDER_FAILED"),
            (RenderError::NotImplemented("x".into()), "NOT_IMPLEMENTED"),
            (RenderError::internal("x"), "INTERNAL_ERROR"),
        ];
        for (error, code) in cases {
            assert_eq!(error.code(), code);
        }
    }

    #[test]
    fn timeout_message_names_the_stage() {
        let error = RenderError::RenderTimeout {
            stage: "script_ready",
            budget_ms: 1500,
        };
        assert_eq!(
            error.to_string(),
            "rendering timed out waiting for script_ready after 1500 ms"
        );
    }

    #[test]
    fn page_failures_become_unavailable() {
        let error = RenderError::from(SessionError::Page(BrowserError::Disconnected));
        assert!(matches!(error, RenderError::BrowserUnavailable { .. }));
    }
}
