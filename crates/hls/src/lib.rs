// HLS (HTTP Live Streaming) media playlist handling
pub mod manifest;
pub mod segment;

pub use manifest::{DEFAULT_TARGET_DURATION, ManifestSnapshot, parse_manifest};
pub use segment::{SegmentDescriptor, base_url, is_absolute_uri, resolve_segment_url};
