//! Line scanner for live media playlists.
//!
//! Only the tags a live player needs are interpreted; everything else is
//! skipped. Parsing never fails: a malformed line simply contributes
//! nothing.

use tracing::trace;

use crate::segment::SegmentDescriptor;

/// Target duration assumed when the playlist does not declare one.
pub const DEFAULT_TARGET_DURATION: u64 = 2;

const TAG_EXTINF: &str = "#EXTINF:";
const TAG_TARGET_DURATION: &str = "#EXT-X-TARGETDURATION:";
const TAG_MEDIA_SEQUENCE: &str = "#EXT-X-MEDIA-SEQUENCE:";
const TAG_ENDLIST: &str = "#EXT-X-ENDLIST";

/// Result of scanning one playlist fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestSnapshot {
    /// Segments in playlist order.
    pub segments: Vec<SegmentDescriptor>,
    /// `#EXT-X-TARGETDURATION` in seconds.
    pub target_duration: u64,
    pub media_sequence: Option<u64>,
    /// The playlist ended with `#EXT-X-ENDLIST`; no more segments will appear.
    pub end_list: bool,
}

impl Default for ManifestSnapshot {
    fn default() -> Self {
        Self {
            segments: Vec::new(),
            target_duration: DEFAULT_TARGET_DURATION,
            media_sequence: None,
            end_list: false,
        }
    }
}

impl ManifestSnapshot {
    pub fn uris(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(|s| s.uri.as_str())
    }
}

/// Longest prefix of `s` (after leading whitespace) that reads as a decimal
/// number, e.g. `"4.0,Title"` -> `4.0`.
fn parse_float_prefix(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let digits_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    if bytes.get(end) == Some(&b'.') {
        end += 1;
        while bytes.get(end).is_some_and(u8::is_ascii_digit) {
            end += 1;
        }
    }
    if end == digits_start || &s[digits_start..end] == "." {
        return None;
    }
    // optional exponent, only if it has digits
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }
    s[..end].parse().ok()
}

/// Longest unsigned integer prefix of `s` (after leading whitespace).
fn parse_int_prefix(s: &str) -> Option<u64> {
    let s = s.trim_start();
    let s = s.strip_prefix('+').unwrap_or(s);
    let end = s.bytes().take_while(u8::is_ascii_digit).count();
    s[..end].parse().ok()
}

/// Scan a media playlist.
///
/// `#EXTINF` sets the duration of the next URI line; a URI without a
/// preceding positive duration is dropped, as is a trailing `#EXTINF` with
/// no URI after it.
pub fn parse_manifest(text: &str) -> ManifestSnapshot {
    let mut snapshot = ManifestSnapshot::default();
    let mut pending_duration: Option<f64> = None;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(value) = line.strip_prefix(TAG_EXTINF) {
            pending_duration = parse_float_prefix(value).filter(|d| d.is_finite() && *d > 0.0);
        } else if let Some(value) = line.strip_prefix(TAG_TARGET_DURATION) {
            match parse_int_prefix(value) {
                Some(target) => snapshot.target_duration = target,
                None => trace!(line, "Ignoring unparsable target duration"),
            }
        } else if let Some(value) = line.strip_prefix(TAG_MEDIA_SEQUENCE) {
            snapshot.media_sequence = parse_int_prefix(value);
        } else if line == TAG_ENDLIST {
            snapshot.end_list = true;
        } else if line.starts_with('#') {
            continue;
        } else if let Some(duration) = pending_duration.take() {
            snapshot.segments.push(SegmentDescriptor {
                uri: line.to_string(),
                duration,
            });
        } else {
            trace!(uri = line, "Dropping URI without a preceding duration");
        }
    }

    snapshot
}
