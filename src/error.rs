//! Error types for relay.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for relay operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Requested name resolves outside the served root.
    #[error("path escapes the served root: {requested}")]
    PathTraversal { requested: String },

    /// Requested name does not exist or is not a regular file.
    #[error("file not found: {name}")]
    FileNotFound { name: String },

    /// Header, command or chunk-length token could not be parsed.
    #[error("malformed header: {message}")]
    MalformedHeader { message: String },

    /// Peer closed the connection before the expected bytes arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// Local file I/O failed.
    #[error("filesystem error on {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Command line was neither `LIST` nor `GET <name>`.
    #[error("unknown command: {command}")]
    UnknownCommand { command: String },

    /// A socket operation did not finish before its deadline.
    #[error("operation timed out")]
    Timeout,

    /// Chunk length does not fit the 8-digit length token.
    #[error("chunk of {0} bytes does not fit the length token")]
    ChunkTooLarge(u64),

    /// A requested glob pattern does not parse.
    #[error("invalid pattern {pattern:?}: {message}")]
    Pattern { pattern: String, message: String },

    /// Configuration could not be loaded.
    #[error("config error: {message}")]
    Config { message: String },

    /// The tracing subscriber could not be installed.
    #[error("logging setup failed: {message}")]
    Logging { message: String },

    /// Socket I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedHeader {
            message: message.into(),
        }
    }
}

/// Convenience result type for relay operations.
pub type Result<T> = std::result::Result<T, Error>;
