use bytes::Bytes;

use crate::error::SinkError;

/// Callback registered with a sink or surface; invoked from any thread.
pub type Notifier = Box<dyn Fn() + Send + Sync>;

/// MIME type the session requires the sink to accept.
pub const FMP4_MIME: &str = "video/mp4; codecs=\"avc1.42E01E,mp4a.40.2\"";

/// A buffered span of the presentation timeline, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Local media buffer consuming fMP4 fragments.
///
/// Appends complete asynchronously: [`append`](MediaSink::append) starts one,
/// `is_appending` stays true until it finishes, and then the notifier passed to
/// [`on_update_end`](MediaSink::on_update_end) is invoked.
pub trait MediaSink: Send {
    fn is_type_supported(&self, mime: &str) -> bool;

    /// Start appending `data`. Only valid while `is_appending()` is false.
    fn append(&mut self, data: Bytes) -> Result<(), SinkError>;

    fn is_appending(&self) -> bool;

    fn on_update_end(&mut self, notifier: Notifier);

    /// Buffered ranges, ordered by start time.
    fn buffered(&self) -> Vec<TimeRange>;

    fn is_open(&self) -> bool;

    /// Cancel an in-progress append.
    fn abort(&mut self);

    /// Signal that no more data will be appended.
    fn end_of_stream(&mut self);

    /// Drop the sink's attachment to its consumer.
    fn detach(&mut self);
}
