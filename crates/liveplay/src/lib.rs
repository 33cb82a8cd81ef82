//! Live HLS playback engine.
//!
//! A [`LiveSession`] polls a live media playlist, downloads new segments in
//! order, repackages their transport stream payload into fragmented MP4 and
//! feeds the fragments into a [`MediaSink`] one append at a time.

pub mod config;
pub mod controller;
pub mod error;
pub mod fetcher;
pub mod repackager;
pub mod session;
pub mod sink;
pub mod stats;
pub mod surface;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use config::{DEFAULT_USER_AGENT, FetcherConfig, SessionConfig, SessionConfigBuilder};
pub use controller::{Command, Phase, SessionController, SessionEvent, SessionParts};
pub use error::{FetchError, PlayError, PlayerError, SinkError};
pub use fetcher::{HttpFetcher, SegmentSource};
pub use repackager::Repackager;
pub use session::LiveSession;
pub use sink::{FMP4_MIME, MediaSink, Notifier, TimeRange};
pub use stats::{PlaybackStats, SessionListener, compute_stats};
pub use surface::PlaybackSurface;
