//! Submitted image references
//!
//! The page sends `data:` URIs produced by `FileReader.readAsDataURL`.
//! Plain `http(s)` URLs are accepted too since the provider fetches those itself.

use std::sync::LazyLock;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use regex::Regex;
use thiserror::Error;

static DATA_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^data:(?P<mime>[A-Za-z0-9!#$&^_.+-]+/[A-Za-z0-9!#$&^_.+-]+)(?:;[^,;]+=[^,;]*)*;base64,(?P<payload>.*)$")
        .expect("data URI regex is valid")
});

/// Why a submitted value is not usable as an image
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("expected a string")]
    NotAString,

    #[error("not a data URI or http(s) URL")]
    UnsupportedScheme,

    #[error("data URI is not base64 encoded")]
    NotBase64,

    #[error("unsupported media type: {0}")]
    NotAnImage(String),

    #[error("image payload is empty")]
    EmptyPayload,

    #[error("invalid base64 payload")]
    InvalidPayload,
}

/// A validated image reference, kept in its original string form
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    DataUri { mime_type: String, raw: String },
    Url(String),
}

impl ImageRef {
    /// Validate a submitted image string
    pub fn parse(value: &str) -> Result<Self, ImageError> {
        let value = value.trim();

        if value.starts_with("https://") || value.starts_with("http://") {
            return Ok(ImageRef::Url(value.to_string()));
        }

        if !value.starts_with("data:") {
            return Err(ImageError::UnsupportedScheme);
        }

        let caps = DATA_URI.captures(value).ok_or(ImageError::NotBase64)?;
        let mime_type = caps["mime"].to_ascii_lowercase();
        if !mime_type.starts_with("image/") {
            return Err(ImageError::NotAnImage(mime_type));
        }

        let payload = &caps["payload"];
        if payload.is_empty() {
            return Err(ImageError::EmptyPayload);
        }
        BASE64
            .decode(payload)
            .map_err(|_| ImageError::InvalidPayload)?;

        Ok(ImageRef::DataUri {
            mime_type,
            raw: value.to_string(),
        })
    }

    /// The string forwarded to the provider
    pub fn as_str(&self) -> &str {
        match self {
            ImageRef::DataUri { raw, .. } => raw,
            ImageRef::Url(url) => url,
        }
    }

    pub fn mime_type(&self) -> Option<&str> {
        match self {
            ImageRef::DataUri { mime_type, .. } => Some(mime_type),
            ImageRef::Url(_) => None,
        }
    }
}
