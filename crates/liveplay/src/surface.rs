use crate::error::PlayError;
use crate::sink::Notifier;

/// The consumer side of playback: a clock, a play control and a stall signal.
pub trait PlaybackSurface: Send {
    /// Playback position in seconds.
    fn current_time(&self) -> f64;

    /// Register the callback fired when playback stalls for lack of data.
    fn on_waiting(&mut self, notifier: Notifier);

    fn play(&mut self) -> Result<(), PlayError>;

    /// Release the binding between this surface and its sink.
    fn release(&mut self);
}
