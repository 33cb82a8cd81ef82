/// One media segment announced by a playlist.
///
/// Identity is the URI string exactly as written in the playlist; two
/// descriptors with the same URI name the same segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentDescriptor {
    pub uri: String,
    /// Declared duration in seconds (always > 0).
    pub duration: f64,
}

/// Whether `uri` is already an absolute `http`/`https` locator.
pub fn is_absolute_uri(uri: &str) -> bool {
    let lower = uri.get(..8).unwrap_or(uri).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Directory of the manifest: everything up to and including the last `/`.
///
/// Computed once per session and used as the prefix for relative segment URIs.
pub fn base_url(manifest_url: &str) -> String {
    match manifest_url.rfind('/') {
        Some(idx) => manifest_url[..=idx].to_string(),
        None => String::new(),
    }
}

/// Resolve a segment URI: absolute URIs are used as-is, anything else is
/// appended to `base_url`.
pub fn resolve_segment_url(uri: &str, base_url: &str) -> String {
    if is_absolute_uri(uri) {
        uri.to_string()
    } else {
        format!("{base_url}{uri}")
    }
}
