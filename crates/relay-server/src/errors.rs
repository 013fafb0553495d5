//! Server error types.

use thiserror::Error;

/// Errors raised while starting the HTTP listener.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding the TCP listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// `host:port` we tried to bind.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Other listener I/O failure.
    #[error("server i/o error: {0}")]
    Io(#[from] std::io::Error),
}
