use crate::error::PlayerError;
use crate::sink::TimeRange;

/// Snapshot published to the session listener.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlaybackStats {
    /// Span from the start of the first buffered range to the end of the last.
    pub buffered_seconds: f64,
    /// Segments handed to the repackager so far.
    pub downloaded_count: usize,
}

pub fn compute_stats(ranges: &[TimeRange], downloaded_count: usize) -> PlaybackStats {
    let buffered_seconds = match (ranges.first(), ranges.last()) {
        (Some(first), Some(last)) => last.end - first.start,
        _ => 0.0,
    };
    PlaybackStats {
        buffered_seconds,
        downloaded_count,
    }
}

/// Receives stats and the fatal error of a session.
///
/// Any `Fn(PlaybackStats)` closure is a listener that ignores errors.
pub trait SessionListener: Send + Sync {
    fn on_stats(&self, stats: PlaybackStats);

    fn on_error(&self, _error: &PlayerError) {}
}

impl<F> SessionListener for F
where
    F: Fn(PlaybackStats) + Send + Sync,
{
    fn on_stats(&self, stats: PlaybackStats) {
        self(stats)
    }
}
