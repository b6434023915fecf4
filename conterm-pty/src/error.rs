//! Error types for PTY sessions

use std::io;

use thiserror::Error;

/// PTY error type
///
/// End-of-stream is deliberately absent: a child exiting is reported by the
/// channel as a zero-length read, not as a failure.
#[derive(Error, Debug)]
pub enum Error {
    /// OS resource allocation failed (pty pair, pipes, sockets, threads)
    #[error("failed to allocate {what}: {source}")]
    Resource {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    /// The child process could not be created
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// A required platform entry point is missing
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// The live pty object rejected a new size
    #[error("failed to resize to {cols}x{rows}: {source}")]
    Resize {
        cols: u16,
        rows: u16,
        #[source]
        source: io::Error,
    },

    /// Read or write failure that is not "would block"
    #[error("channel {op} failed: {source}")]
    Channel {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn resource(what: &'static str, source: impl Into<io::Error>) -> Self {
        Error::Resource {
            what,
            source: source.into(),
        }
    }

    pub(crate) fn spawn(program: impl Into<String>, source: impl Into<io::Error>) -> Self {
        Error::Spawn {
            program: program.into(),
            source: source.into(),
        }
    }

    pub(crate) fn channel(op: &'static str, source: io::Error) -> Self {
        Error::Channel { op, source }
    }

    /// Whether the session survives this error.
    ///
    /// Only resize failures are recoverable; the session keeps its previous
    /// size until the next attempt.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Resize { .. })
    }
}

/// Result type for PTY operations
pub type Result<T> = std::result::Result<T, Error>;
