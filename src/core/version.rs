//! Version comparison helpers
//!
//! A version string `major.minor.patch` is folded into one ordered integer so
//! that dependency bounds can be checked with plain integer comparisons.

use super::error::{SiteError, SiteResult};

/// Upper bound for each version segment
pub const MAX_SEGMENT: u32 = 999;

const MAX_SEGMENTS: usize = 3;
const SEGMENT_BASE: u32 = MAX_SEGMENT + 1;

/// Parse a version string of one to three numeric segments into its ordered number.
///
/// Missing segments are zero, so `"2"` and `"2.0.0"` produce the same number.
pub fn parse_version(version: &str) -> SiteResult<u32> {
    let version = version.trim();
    if version.is_empty() {
        return Err(SiteError::Validation("version must not be empty".to_string()));
    }

    let segments: Vec<&str> = version.split('.').collect();
    if segments.len() > MAX_SEGMENTS {
        return Err(SiteError::Validation(format!(
            "version '{version}' has more than {MAX_SEGMENTS} segments"
        )));
    }

    let mut number = 0u32;
    for index in 0..MAX_SEGMENTS {
        let value = match segments.get(index) {
            Some(segment) => parse_segment(version, segment)?,
            None => 0,
        };
        number = number * SEGMENT_BASE + value;
    }

    Ok(number)
}

fn parse_segment(version: &str, segment: &str) -> SiteResult<u32> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SiteError::Validation(format!(
            "version '{version}' contains non-numeric segment '{segment}'"
        )));
    }

    let value: u32 = segment.parse().map_err(|_| {
        SiteError::Validation(format!("version '{version}' segment '{segment}' overflows"))
    })?;

    if value > MAX_SEGMENT {
        return Err(SiteError::Validation(format!(
            "version '{version}' segment {value} exceeds {MAX_SEGMENT}"
        )));
    }

    Ok(value)
}

/// Render a version number back into `major.minor.patch` form
pub fn format_version(number: u32) -> String {
    let patch = number % SEGMENT_BASE;
    let minor = (number / SEGMENT_BASE) % SEGMENT_BASE;
    let major = number / (SEGMENT_BASE * SEGMENT_BASE);
    format!("{major}.{minor}.{patch}")
}

/// Normalize a version string, e.g. `"2"` becomes `"2.0.0"`
pub fn normalize_version(version: &str) -> SiteResult<String> {
    parse_version(version).map(format_version)
}
