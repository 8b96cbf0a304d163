//! Render request, option and result types shared by every layer.

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use super::error::DomainError;

pub const MIN_DIMENSION: u32 = 100;
pub const MAX_DIMENSION: u32 = 2000;
pub const MIN_QUALITY: u8 = 1;
pub const MAX_QUALITY: u8 = 100;
pub const MIN_SCALE: f64 = 0.1;
pub const MAX_SCALE: f64 = 3.0;
pub const MIN_TIMEOUT_MS: u64 = 1_000;
pub const MAX_TIMEOUT_MS: u64 = 30_000;

pub const DEFAULT_WIDTH: u32 = 800;
pub const DEFAULT_HEIGHT: u32 = 600;
pub const DEFAULT_BACKGROUND: &str = "#ffffff";
pub const DEFAULT_QUALITY: u8 = 90;
pub const DEFAULT_SCALE: f64 = 1.0;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Background value that disables background painting in raster captures.
pub const TRANSPARENT: &str = "transparent";

const MAX_BACKGROUND_LEN: usize = 64;

/// The six output shapes produced by the render pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// PNG bitmap of the diagram element.
    Raster,
    /// JPEG bitmap of the diagram element.
    RasterLossy,
    /// Serialized SVG markup.
    Vector,
    /// Paginated PDF of the whole page.
    Document,
    /// Standalone HTML that renders client-side.
    Page,
    /// PNG persisted to the artifact store, returned as a path.
    Reference,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Raster => "raster",
            OutputFormat::RasterLossy => "raster-lossy",
            OutputFormat::Vector => "vector",
            OutputFormat::Document => "document",
            OutputFormat::Page => "page",
            OutputFormat::Reference => "reference",
        }
    }

    /// MIME type of the payload the format produces. For `Reference` this is
    /// the type of the stored artifact, not of the returned path.
    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Raster | OutputFormat::Reference => "image/png",
            OutputFormat::RasterLossy => "image/jpeg",
            OutputFormat::Vector => "image/svg+xml",
            OutputFormat::Document => "application/pdf",
            OutputFormat::Page => "text/html; charset=utf-8",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    Default,
    Dark,
    Neutral,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Default => "default",
            Theme::Dark => "dark",
            Theme::Neutral => "neutral",
        }
    }
}

impl FromStr for Theme {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Theme::Default),
            "dark" => Ok(Theme::Dark),
            "neutral" => Ok(Theme::Neutral),
            other => Err(DomainError::validation(format!(
                "theme must be one of default, dark, neutral (got `{other}`)"
            ))),
        }
    }
}

/// Fully-resolved render options. Construct with [`RenderOptions::default`]
/// and override fields, then call [`RenderOptions::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub theme: Theme,
    pub width: u32,
    pub height: u32,
    pub background_color: String,
    pub quality: u8,
    pub scale: f64,
    pub timeout: Duration,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            theme: Theme::Default,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            background_color: DEFAULT_BACKGROUND.to_string(),
            quality: DEFAULT_QUALITY,
            scale: DEFAULT_SCALE,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

impl RenderOptions {
    pub fn validate(&self) -> Result<(), DomainError> {
        check_dimension("width", self.width)?;
        check_dimension("height", self.height)?;

        if !(MIN_QUALITY..=MAX_QUALITY).contains(&self.quality) {
            return Err(DomainError::validation(format!(
                "quality must be between {MIN_QUALITY} and {MAX_QUALITY}"
            )));
        }

        if !self.scale.is_finite() || !(MIN_SCALE..=MAX_SCALE).contains(&self.scale) {
            return Err(DomainError::validation(format!(
                "scale must be between {MIN_SCALE} and {MAX_SCALE}"
            )));
        }

        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&timeout_ms) {
            return Err(DomainError::validation(format!(
                "timeout must be between {MIN_TIMEOUT_MS} and {MAX_TIMEOUT_MS} milliseconds"
            )));
        }

        validate_background(&self.background_color)
    }

    /// The background colour as it is written into the page stylesheet.
    pub fn background(&self) -> &str {
        self.background_color.trim()
    }

    /// Matches the CSS keyword, so it agrees with what the page paints.
    pub fn is_transparent(&self) -> bool {
        self.background().eq_ignore_ascii_case(TRANSPARENT)
    }
}

fn check_dimension(name: &str, value: u32) -> Result<(), DomainError> {
    if (MIN_DIMENSION..=MAX_DIMENSION).contains(&value) {
        Ok(())
    } else {
        Err(DomainError::validation(format!(
            "{name} must be between {MIN_DIMENSION} and {MAX_DIMENSION}"
        )))
    }
}

/// The colour ends up inside a CSS declaration, so only characters that can
/// appear in hex, named, `rgb()` and `hsl()` colours are accepted.
fn validate_background(value: &str) -> Result<(), DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_BACKGROUND_LEN {
        return Err(DomainError::validation(
            "backgroundColor must be a non-empty CSS colour",
        ));
    }

    let allowed = |c: char| c.is_ascii_alphanumeric() || " #(),.%-".contains(c);
    if trimmed.chars().all(allowed) {
        Ok(())
    } else {
        Err(DomainError::validation(
            "backgroundColor contains unsupported characters",
        ))
    }
}

/// One render call. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    diagram_text: String,
    format: OutputFormat,
    options: RenderOptions,
}

impl RenderRequest {
    pub fn new(
        diagram_text: impl Into<String>,
        format: OutputFormat,
        options: RenderOptions,
    ) -> Result<Self, DomainError> {
        let diagram_text = diagram_text.into();
        if diagram_text.trim().is_empty() {
            return Err(DomainError::validation("diagram text must not be empty"));
        }
        options.validate()?;

        Ok(Self {
            diagram_text,
            format,
            options,
        })
    }

    pub fn diagram_text(&self) -> &str {
        &self.diagram_text
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderPayload {
    Binary(Vec<u8>),
    Text(String),
    /// Relative path under which the stored artifact is served.
    Reference { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderResult {
    pub payload: RenderPayload,
    pub width: u32,
    pub height: u32,
    pub render_time_ms: u64,
    pub mime_type: &'static str,
}
