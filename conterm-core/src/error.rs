//! Error types for the session glue

use thiserror::Error;

use crate::lifecycle::LifecycleState;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// Failure reported by the pseudoterminal layer
    #[error(transparent)]
    Pty(#[from] conterm_pty::Error),

    /// Font metrics that cannot produce a grid
    #[error("invalid font metrics: {0}")]
    InvalidMetrics(String),

    /// Operation not allowed in the current lifecycle state
    #[error("operation not allowed while {0:?}")]
    InvalidState(LifecycleState),
}

impl Error {
    /// Whether the session survives this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Pty(e) => e.is_recoverable(),
            Error::InvalidMetrics(_) => true,
            Error::InvalidState(_) => false,
        }
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;
