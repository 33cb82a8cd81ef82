use transmux::{MediaFragment, TransmuxError, Transmuxer};

/// Stateful TS -> fMP4 conversion as seen by the session.
pub trait Repackager: Send {
    /// Feed the next transport stream chunk, in arrival order.
    fn push(&mut self, chunk: &[u8]) -> Result<(), TransmuxError>;

    /// Emit fragments for everything pushed since the last flush.
    fn flush(&mut self) -> Result<Vec<MediaFragment>, TransmuxError>;

    fn dispose(&mut self);
}

impl Repackager for Transmuxer {
    fn push(&mut self, chunk: &[u8]) -> Result<(), TransmuxError> {
        Transmuxer::push(self, chunk)
    }

    fn flush(&mut self) -> Result<Vec<MediaFragment>, TransmuxError> {
        Transmuxer::flush(self)
    }

    fn dispose(&mut self) {
        Transmuxer::dispose(self)
    }
}
