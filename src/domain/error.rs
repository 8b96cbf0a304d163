use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("domain validation failed: {message}")]
    Validation { message: String },
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Human-readable reason without the layer prefix.
    pub fn message(&self) -> &str {
        match self {
            DomainError::Validation { message } => message,
        }
    }
}
