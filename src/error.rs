//! Error types for ipclane
//!
//! Centralized error handling using thiserror.

use std::io;

use thiserror::Error;

/// All error types that can occur in ipclane
#[derive(Debug, Error)]
pub enum IpcError {
    /// Peer closed the connection abruptly
    #[error("Broken pipe: peer closed the connection")]
    BrokenPipe,

    /// Any other transport failure, including operator-initiated shutdown
    #[error("Connection aborted")]
    ConnectionAborted,

    /// Message carries an unrecognized mode
    #[error("Bad message: unrecognized mode")]
    BadMessage,

    /// Header decoded before it was fully populated, or declares an impossible size
    #[error("Malformed header")]
    MalformedHeader,

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl IpcError {
    /// Classify a failed read or write on a session socket.
    pub fn from_transport(err: io::Error) -> Self {
        if Self::is_broken_pipe(&err) {
            IpcError::BrokenPipe
        } else {
            IpcError::ConnectionAborted
        }
    }

    /// Peer went away underneath us.
    pub fn is_broken_pipe(err: &io::Error) -> bool {
        matches!(
            err.kind(),
            io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::UnexpectedEof
        )
    }

    /// Operation was interrupted and may simply be reissued.
    pub fn is_transient(err: &io::Error) -> bool {
        matches!(err.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock)
    }

    /// Flatten an error coming out of a session exchange into one of the
    /// four kinds surfaced to callers.
    pub fn into_session_error(self) -> Self {
        match self {
            IpcError::Io(err) => Self::from_transport(err),
            IpcError::Config(_) => IpcError::ConnectionAborted,
            other => other,
        }
    }
}

/// Result type alias for ipclane operations
pub type Result<T> = std::result::Result<T, IpcError>;
