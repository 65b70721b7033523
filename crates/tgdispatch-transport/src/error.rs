//! Transport-level errors.

use thiserror::Error;

/// Errors raised while setting up a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The listener could not bind its socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    /// Other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for transport setup.
pub type TransportResult<T> = Result<T, TransportError>;
