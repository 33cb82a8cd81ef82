use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransmuxError {
    #[error("Transmuxer has been disposed")]
    Disposed,

    #[error("H.264 keyframe without SPS/PPS")]
    MissingParameterSets,

    #[error("Invalid SPS: {0}")]
    InvalidSps(&'static str),

    #[error("Invalid ADTS header: {0}")]
    InvalidAdts(&'static str),
}
