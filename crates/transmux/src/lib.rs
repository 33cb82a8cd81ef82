//! MPEG-TS to fragmented MP4 repackaging for live HLS playback.
//!
//! Handles one H.264 video stream and one ADTS AAC audio stream per program.

pub mod aac;
mod bits;
pub mod error;
pub mod h264;
pub mod transmuxer;

pub use error::TransmuxError;
pub use transmuxer::{AUDIO_TRACK_ID, MediaFragment, Transmuxer, VIDEO_TRACK_ID};
