/// Core error types for the Playout pipeline.
use std::path::PathBuf;

/// A specialized Result type for Playout operations.
pub type PlayoutResult<T> = Result<T, PlayoutError>;

/// Top-level error type encompassing all Playout subsystems.
#[derive(Debug, thiserror::Error)]
pub enum PlayoutError {
    /// A single tick failed to composite. The pipeline keeps running.
    #[error("render error: {0}")]
    Render(String),

    /// Frame storage could not be allocated on a pool miss.
    #[error("allocation failed: {requested} bytes for {what}")]
    Allocation { what: String, requested: usize },

    /// A required graphics capability is missing.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A frame does not match the geometry of the output format.
    #[error("format mismatch: expected {expected}, got {actual}")]
    FormatMismatch { expected: String, actual: String },

    /// A graphics API call failed.
    #[error("backend error: {0}")]
    Backend(String),

    #[error("config error: {message} ({path:?})")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// The component was asked to stop before the operation ran.
    #[error("shutting down")]
    ShuttingDown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlWrite(#[from] toml::ser::Error),

    #[error("{0}")]
    Other(String),
}

impl PlayoutError {
    /// Create a config error, optionally tied to a file.
    pub fn config(message: impl Into<String>, path: Option<PathBuf>) -> Self {
        PlayoutError::Config {
            message: message.into(),
            path,
        }
    }

    /// Create an allocation error.
    pub fn allocation(what: impl Into<String>, requested: usize) -> Self {
        PlayoutError::Allocation {
            what: what.into(),
            requested,
        }
    }

    /// Whether this error must stop the thread that hit it.
    ///
    /// Allocation and capability failures are fatal; a failed tick or a
    /// shutdown in progress are not.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PlayoutError::Allocation { .. } | PlayoutError::Unsupported(_)
        )
    }
}
