//! Error types for the broadcast engine
//!
//! None of these errors is fatal to the process: the scheduler skips
//! tracks, the catalog keeps its previous snapshot, and a listener error
//! only ends that listener's session.

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A catalog refresh could not list tracks
    #[error("Catalog fetch failed: {0}")]
    CatalogFetch(String),

    /// The encoder process could not be started for a track
    #[error("Failed to launch encoder for {track}: {reason}")]
    LaunchFailure { track: String, reason: String },

    /// The encoder process exited abnormally while streaming
    #[error("Encoder crashed while playing {track} ({status})")]
    EncoderCrashed { track: String, status: String },

    /// A full pass over the catalog failed to launch
    #[error("All {tracks} tracks failed to launch")]
    AllTracksFailing { tracks: usize },

    /// Writing to a listener transport failed (client gone)
    #[error("Listener write failed: {0}")]
    ListenerWrite(String),

    /// The broadcast buffer was closed (shutdown)
    #[error("Broadcast buffer closed")]
    BufferClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a generic error from a string
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    pub fn launch(track: impl Into<String>, reason: impl ToString) -> Self {
        Self::LaunchFailure {
            track: track.into(),
            reason: reason.to_string(),
        }
    }

    pub fn catalog(msg: impl ToString) -> Self {
        Self::CatalogFetch(msg.to_string())
    }
}
