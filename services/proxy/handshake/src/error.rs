//! Handshake error types.

use thiserror::Error;

/// Handshake errors
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// Socket read failed
    #[error("handshake read failed: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed the connection before the handshake completed
    #[error("connection closed after {consumed} handshake bytes")]
    ConnectionClosed {
        /// Bytes consumed before EOF
        consumed: usize,
    },
}
