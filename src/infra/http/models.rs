//! Translation between wire bodies and validated render requests.

use std::time::Duration;

use mermaid_gateway_api_types::{RenderOptionsBody, RenderRequestBody};
use serde::Deserialize;

use crate::{
    application::render::RenderError,
    domain::render::{OutputFormat, RenderOptions, RenderRequest, Theme},
};

/// Tag used when a request does not name a format.
pub const DEFAULT_FORMAT_TAG: &str = "base64";

const SUPPORTED_TAGS: &str = "base64, raster (png), raster-lossy (jpeg, jpg), vector (svg), \
                              document (pdf), page (html), reference (url)";

/// How the client wants the rendered output delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedFormat {
    /// The tag echoed back in the response, normalised to lower case.
    pub tag: String,
    pub output: OutputFormat,
    /// Deliver raster bytes as a `data:` URI instead of bare base64.
    pub data_uri: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RenderQuery {
    /// Return binary and text payloads as the response body.
    pub raw: bool,
}

pub fn parse_format_tag(tag: Option<&str>) -> Result<RequestedFormat, RenderError> {
    let tag = tag
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_FORMAT_TAG.to_string());

    let (output, data_uri) = match tag.as_str() {
        "base64" => (OutputFormat::Raster, true),
        "raster" | "png" => (OutputFormat::Raster, false),
        "raster-lossy" | "jpeg" | "jpg" => (OutputFormat::RasterLossy, false),
        "vector" | "svg" => (OutputFormat::Vector, false),
        "document" | "pdf" => (OutputFormat::Document, false),
        "page" | "html" => (OutputFormat::Page, false),
        "reference" | "url" => (OutputFormat::Reference, false),
        "binary" => {
            return Err(RenderError::NotImplemented(format!(
                "Format '{tag}' is not yet implemented"
            )));
        }
        _ => {
            return Err(RenderError::invalid_input(format!(
                "Unsupported format '{tag}'. Supported formats: {SUPPORTED_TAGS}"
            )));
        }
    };

    Ok(RequestedFormat {
        tag,
        output,
        data_uri,
    })
}

/// Apply defaults to the optional wire options and validate the result.
pub fn resolve_options(body: Option<RenderOptionsBody>) -> Result<RenderOptions, RenderError> {
    let body = body.unwrap_or_default();
    let defaults = RenderOptions::default();

    let theme = match body.theme.as_deref() {
        Some(value) if !value.trim().is_empty() => value.parse::<Theme>()?,
        _ => defaults.theme,
    };

    let options = RenderOptions {
        theme,
        width: body.width.unwrap_or(defaults.width),
        height: body.height.unwrap_or(defaults.height),
        background_color: body
            .background_color
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.background_color),
        quality: body.quality.unwrap_or(defaults.quality),
        scale: body.scale.unwrap_or(defaults.scale),
        timeout: body
            .timeout
            .map(Duration::from_millis)
            .unwrap_or(defaults.timeout),
    };
    options.validate()?;
    Ok(options)
}

/// Validate a request body. The format tag is checked before anything else so
/// unsupported tags never reach the browser.
pub fn build_request(
    body: RenderRequestBody,
) -> Result<(RequestedFormat, RenderRequest), RenderError> {
    let text = body
        .mermaid
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| RenderError::invalid_input("Mermaid code is required and must be a string"))?;
    let format = parse_format_tag(body.format.as_deref())?;
    let options = resolve_options(body.options)?;
    let request = RenderRequest::new(text, format.output, options)?;
    Ok((format, request))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_map_to_canonical_formats() {
        let cases = [
            ("png", OutputFormat::Raster),
            ("JPG", OutputFormat::RasterLossy),
            ("jpeg", OutputFormat::RasterLossy),
            ("svg", OutputFormat::Vector),
            ("pdf", OutputFormat::Document),
            ("html", OutputFormat::Page),
            ("url", OutputFormat::Reference),
            ("raster-lossy", OutputFormat::RasterLossy),
        ];
        for (tag, expected) in cases {
            let parsed = parse_format_tag(Some(tag)).expect(tag);
            assert_eq!(parsed.output, expected, "{tag}");
            assert!(!parsed.data_uri);
        }
    }

    #[test]
    fn missing_tag_defaults_to_data_uri_raster() {
        let parsed = parse_format_tag(None).expect("default");
        assert_eq!(parsed.tag, "base64");
        assert_eq!(parsed.output, OutputFormat::Raster);
        assert!(parsed.data_uri);
    }

    #[test]
    fn binary_is_not_implemented_and_unknown_is_invalid() {
        assert!(matches!(
            parse_format_tag(Some("binary")),
            Err(RenderError::NotImplemented(_))
        ));
        let err = parse_format_tag(Some("gif")).expect_err("unknown");
        assert_eq!(err.code(), "INVALID_INPUT");
        assert!(err.to_string().contains("'gif'"));
    }

    #[test]
    fn options_fall_back_to_defaults() {
        let options = resolve_options(Some(RenderOptionsBody {
            width: Some(1024),
            theme: Some("neutral".to_string()),
            background_color: Some("  ".to_string()),
            ..RenderOptionsBody::default()
        }))
        .expect("valid");

        assert_eq!(options.width, 1024);
        assert_eq!(options.height, 600);
        assert_eq!(options.theme, Theme::Neutral);
        assert_eq!(options.background_color, "#ffffff");
        assert_eq!(options.timeout, Duration::from_millis(30_000));
    }

    #[test]
    fn out_of_range_options_are_invalid_input() {
        for body in [
            RenderOptionsBody {
                width: Some(50),
                ..RenderOptionsBody::default()
            },
            RenderOptionsBody {
                quality: Some(0),
                ..RenderOptionsBody::default()
            },
            RenderOptionsBody {
                timeout: Some(60_000),
                ..RenderOptionsBody::default()
            },
            RenderOptionsBody {
                theme: Some("forest".to_string()),
                ..RenderOptionsBody::default()
            },
        ] {
            let err = resolve_options(Some(body)).expect_err("rejected");
            assert_eq!(err.code(), "INVALID_INPUT");
        }
    }

    #[test]
    fn missing_diagram_is_rejected_before_format() {
        let err = build_request(RenderRequestBody {
            mermaid: None,
            format: Some("gif".to_string()),
            options: None,
        })
        .expect_err("missing text");
        assert_eq!(err.to_string(), "Mermaid code is required and must be a string");
    }
}
