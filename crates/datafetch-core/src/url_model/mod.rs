//! URL modeling: target kind resolution and local filename derivation.

mod path;
mod sanitize;

pub use path::{directory_url, filename_from_url_path, join_entry, parse_source_url};
pub use sanitize::sanitize_filename;

use url::Url;

/// Local name used when the URL yields nothing usable.
pub const FALLBACK_FILENAME: &str = "download.bin";

/// What a task URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    SingleResource,
    Directory,
}

/// Directory when the path is empty, ends with `/`, or its last segment has no extension.
///
/// - `https://h/data/` → Directory
/// - `https://h/data/2020` → Directory
/// - `https://h/data/t2m.nc` → SingleResource
pub fn resolve_target(url: &Url) -> TargetKind {
    let path = url.path();
    if path.is_empty() || path.ends_with('/') {
        return TargetKind::Directory;
    }
    let last = path.rsplit('/').next().unwrap_or("");
    match last.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < last.len() => TargetKind::SingleResource,
        _ => TargetKind::Directory,
    }
}

/// Safe local filename for a single-resource URL.
pub fn local_filename(url: &Url) -> String {
    let sanitized = filename_from_url_path(url)
        .map(|s| sanitize_filename(&s))
        .unwrap_or_default();
    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        FALLBACK_FILENAME.to_string()
    } else {
        sanitized
    }
}
