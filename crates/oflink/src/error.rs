//! Error types for transport operations.

use std::io;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur on netlink sockets and virtual connections.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Kernel returned an error code (netlink NAK).
    #[error("kernel error: {message} (errno {errno})")]
    Kernel {
        /// The errno value from the kernel.
        errno: i32,
        /// Human-readable error message.
        message: String,
    },

    /// Malformed wire data.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Peer shut the stream down cleanly.
    #[error("connection closed by peer")]
    Disconnected,

    /// Connection target string could not be parsed.
    #[error("invalid connection target: {0}")]
    InvalidTarget(String),
}

impl Error {
    /// Build a `Kernel` error from a positive errno value.
    pub fn kernel(errno: i32) -> Self {
        Error::Kernel {
            errno,
            message: io::Error::from_raw_os_error(errno).to_string(),
        }
    }

    /// The errno behind this error, if it maps to one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Io(err) => err.raw_os_error(),
            Error::Kernel { errno, .. } => Some(*errno),
            _ => None,
        }
    }

    /// Whether this error is the non-blocking "try again later" signal.
    pub fn is_would_block(&self) -> bool {
        matches!(self, Error::Io(err) if err.kind() == io::ErrorKind::WouldBlock)
    }
}
