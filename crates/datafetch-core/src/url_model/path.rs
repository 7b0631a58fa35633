//! URL path helpers shared by the drivers.

use url::Url;

use crate::error::TransferError;

/// Parse a data source URL, mapping failure to `InvalidSource`.
pub fn parse_source_url(raw: &str) -> Result<Url, TransferError> {
    Url::parse(raw.trim()).map_err(|e| TransferError::InvalidSource(format!("{}: {}", raw, e)))
}

/// Last non-empty path segment, percent-decoded.
pub fn filename_from_url_path(url: &Url) -> Option<String> {
    let segment = url.path().split('/').filter(|s| !s.is_empty()).last()?;
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    if decoded.is_empty() || decoded == "." || decoded == ".." {
        return None;
    }
    Some(decoded)
}

/// Same URL with a trailing `/` on the path, so relative joins land inside it.
pub fn directory_url(url: &Url) -> Url {
    let mut dir = url.clone();
    if !dir.path().ends_with('/') {
        let path = format!("{}/", dir.path());
        dir.set_path(&path);
    }
    dir.set_query(None);
    dir.set_fragment(None);
    dir
}

/// URL of a listed entry inside `dir`.
pub fn join_entry(dir: &Url, name: &str) -> Result<Url, TransferError> {
    directory_url(dir)
        .join(&urlencoding::encode(name))
        .map_err(|e| TransferError::InvalidSource(format!("{}{}: {}", dir, name, e)))
}
