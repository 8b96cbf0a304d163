//! Wire types shared by the Mermaid render gateway and its clients.
//!
//! Every field is optional on the request side so that the server can apply
//! defaults and report validation failures with its own error codes instead of
//! a deserializer message.

use serde::{Deserialize, Serialize};

/// Body accepted by `POST /render`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequestBody {
    /// Diagram source text.
    #[serde(alias = "diagram", alias = "diagramText")]
    pub mermaid: Option<String>,
    /// Output format tag, e.g. `png`, `svg`, `url` or `raster-lossy`.
    pub format: Option<String>,
    #[serde(default)]
    pub options: Option<RenderOptionsBody>,
}

/// Optional render tuning; missing values fall back to server defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptionsBody {
    pub theme: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub background_color: Option<String>,
    pub quality: Option<u8>,
    pub scale: Option<f64>,
    /// Render budget in milliseconds.
    #[serde(alias = "timeoutMs")]
    pub timeout: Option<u64>,
}

/// Envelope returned by `POST /render` for both outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RenderMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiErrorMessage>,
}

impl RenderResponse {
    pub fn success(format: impl Into<String>, data: String, metadata: RenderMetadata) -> Self {
        Self {
            success: true,
            format: Some(format.into()),
            data: Some(data),
            metadata: Some(metadata),
            error: None,
        }
    }

    pub fn failure(error: ApiErrorMessage) -> Self {
        Self {
            success: false,
            format: None,
            data: None,
            metadata: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderMetadata {
    pub width: u32,
    pub height: u32,
    pub render_time_ms: u64,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

/// Body of `GET /`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexResponse {
    pub message: String,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub service: String,
}
