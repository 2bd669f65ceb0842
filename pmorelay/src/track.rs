//! Track identifiers

use percent_encoding::percent_decode_str;
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// An opaque track identifier (local path or URL) with its display name.
///
/// The display name is the last path segment of the identifier; for URLs
/// the query string and fragment are ignored and percent-escapes decoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "pmoserver", derive(utoipa::ToSchema))]
pub struct TrackRef {
    /// Path or URL handed to the encoder
    pub id: String,
    /// Human-readable name reported by `/nowplaying`
    pub name: String,
}

impl TrackRef {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let name = display_name(&id);
        Self { id, name }
    }

    /// True for `http://` and `https://` identifiers
    pub fn is_remote(&self) -> bool {
        is_remote(&self.id)
    }
}

impl fmt::Display for TrackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

pub(crate) fn is_remote(id: &str) -> bool {
    let lower = id.get(..8).unwrap_or(id).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn display_name(id: &str) -> String {
    if is_remote(id) {
        if let Ok(url) = url::Url::parse(id) {
            return url
                .path_segments()
                .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
                .map(percent_decode)
                .or_else(|| url.host_str().map(str::to_string))
                .unwrap_or_else(|| id.to_string());
        }
        let trimmed = id.split(['?', '#']).next().unwrap_or(id);
        return trimmed
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(id)
            .to_string();
    }

    Path::new(id)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| id.to_string())
}

fn percent_decode(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}
