//! Environment name rules.
//!
//! Names are case-sensitive, at most [`ENVIRONMENT_NAME_MAX_LENGTH`]
//! characters by default, and may not contain newline, carriage return,
//! form-feed or `/`. The last restriction keeps names safe to embed in URL
//! path segments. Ingestion schemas elsewhere mirror these rules, so changes
//! here must be made in both places.

use crate::{TerrainResult, ValidationError};
use once_cell::sync::Lazy;
use regex::Regex;

/// Default maximum environment name length, in characters.
pub const ENVIRONMENT_NAME_MAX_LENGTH: usize = 64;

/// Allow-list pattern for environment names.
pub const ENVIRONMENT_NAME_PATTERN: &str = r"^[^\n\r\f/]*$";

/// Path segment that stands for the empty environment name.
pub const EMPTY_NAME_PATH_SEGMENT: &str = "none";

static OK_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    // The pattern is a compile-time constant; a failure here is a programming error.
    Regex::new(ENVIRONMENT_NAME_PATTERN).unwrap_or_else(|e| panic!("invalid name pattern: {e}"))
});

/// Normalize an optional raw name: absent and empty both map to `""`.
pub fn name_or_default(name: Option<&str>) -> &str {
    name.unwrap_or("")
}

/// Check a name against the length limit and the allow-list pattern.
pub fn is_valid_name(name: &str, max_length: usize) -> bool {
    if name.chars().count() > max_length {
        return false;
    }
    OK_NAME_PATTERN.is_match(name)
}

/// Like [`is_valid_name`], but reports why a name was rejected.
pub fn validate_name(name: &str, max_length: usize) -> TerrainResult<()> {
    let len = name.chars().count();
    if len > max_length {
        return Err(ValidationError::InvalidEnvironmentName {
            name: name.to_string(),
            reason: format!("length {} exceeds maximum {}", len, max_length),
        }
        .into());
    }
    if !OK_NAME_PATTERN.is_match(name) {
        return Err(ValidationError::InvalidEnvironmentName {
            name: name.to_string(),
            reason: "contains newline, carriage return, form-feed or '/'".to_string(),
        }
        .into());
    }
    Ok(())
}

/// Decode an environment name taken from a URL path segment.
///
/// The case-sensitive segment `none` denotes the empty name. Everywhere
/// else (query strings included) the empty string is used directly.
pub fn name_from_path_segment(segment: &str) -> TerrainResult<String> {
    if segment == EMPTY_NAME_PATH_SEGMENT {
        return Ok(String::new());
    }
    urlencoding::decode(segment)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| {
            ValidationError::InvalidValue {
                field: "environment".to_string(),
                reason: format!("path segment is not valid UTF-8 after decoding: {}", e),
            }
            .into()
        })
}
