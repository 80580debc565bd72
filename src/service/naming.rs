//! File and project naming for ingested uploads

use chrono::{DateTime, TimeZone};
use std::path::Path;

const FALLBACK_NAME: &str = "file";
const FALLBACK_PREFIX: &str = "xx";

/// Keeps ASCII alphanumerics, `_` and `-` of the file name; the extension
/// survives when it is plain ASCII alphanumeric.
pub fn sanitize_filename(filename: &str) -> String {
    let path = Path::new(filename);
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sanitized: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    let sanitized = if sanitized.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        sanitized
    };

    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            format!("{}.{}", sanitized, ext)
        }
        _ => sanitized,
    }
}

/// First `length` ASCII alphanumerics of `text`, or `xx` when there are none
pub fn ascii_prefix(text: &str, length: usize) -> String {
    let prefix: String = text
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(length)
        .collect();
    if prefix.is_empty() {
        FALLBACK_PREFIX.to_string()
    } else {
        prefix
    }
}

/// `<YYYYmmddHHMMSS>_<prefix>` for a sanitized file name
pub fn project_id_for<Tz: TimeZone>(timestamp: &DateTime<Tz>, filename: &str) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let stem = Path::new(filename)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!(
        "{}_{}",
        timestamp.format("%Y%m%d%H%M%S"),
        ascii_prefix(&stem, 2)
    )
}

/// Timestamp portion of a project id, if it has one
pub fn project_date(project_id: &str) -> Option<&str> {
    project_id
        .split_once('_')
        .map(|(date, _)| date)
        .filter(|date| !date.is_empty())
}
