use reqwest::StatusCode;
use transmux::TransmuxError;

/// Failure to retrieve a manifest or segment.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to read response body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build HTTP client: {source}")]
    Client {
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    pub fn http_status(status: StatusCode, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    /// HTTP status of the failed response, if the server answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::Transport { source, .. } | Self::Body { source, .. } => source.status(),
            Self::Client { .. } => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("an append is already in progress")]
    Busy,

    #[error("media sink is closed")]
    Closed,

    #[error("media sink I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum PlayError {
    #[error("playback refused: {reason}")]
    Refused { reason: String },

    #[error("playback surface released")]
    Released,
}

/// Errors surfaced by a live session.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("network error: {0}")]
    Network(#[from] FetchError),

    #[error("media sink does not support `{mime}`")]
    UnsupportedEnvironment { mime: String },

    #[error("repackaging failed: {0}")]
    Repackaging(#[from] TransmuxError),

    #[error("sink append failed: {0}")]
    SinkAppend(#[from] SinkError),

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl PlayerError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Whether the session can keep going after this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Network(_)
            | Self::UnsupportedEnvironment { .. }
            | Self::InvalidUrl { .. }
            | Self::Internal { .. } => true,
            Self::Repackaging(_) | Self::SinkAppend(_) => false,
        }
    }
}
