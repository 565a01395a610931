//! Error types for the RTT console

use thiserror::Error;

/// Main error type for the RTT console
#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Transport lost: {0}")]
    TransportLost(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ConsoleError {
    /// Whether this error ends the session.
    ///
    /// Only an unreachable or lost transport is fatal; write failures and
    /// everything else are reported and the read path keeps going.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConsoleError::TransportUnavailable(_) | ConsoleError::TransportLost(_)
        )
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ConsoleError>;

/// RTT control block and channel errors, carried as the message of a transport error
#[derive(Error, Debug)]
pub enum RttError {
    #[error("Control block not found")]
    ControlBlockNotFound,

    #[error("Up channel not found: {0}")]
    UpChannelNotFound(usize),

    #[error("Attach failed: {0}")]
    AttachFailed(String),

    #[error("Symbol lookup failed: {0}")]
    SymbolLookupFailed(String),
}
