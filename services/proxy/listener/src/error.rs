//! Listener error types.

use std::net::SocketAddr;
use thiserror::Error;

/// Listener and dispatch errors
#[derive(Error, Debug)]
pub enum ListenerError {
    /// Listening socket could not be set up
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        /// Requested listen address
        addr: SocketAddr,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// Worker executable could not be resolved
    #[error("cannot resolve worker executable: {0}")]
    Executable(#[source] std::io::Error),

    /// Accepted socket could not be detached for handoff
    #[error("failed to detach socket for handoff: {0}")]
    Handoff(#[source] std::io::Error),

    /// Worker process failed to start
    #[error("failed to spawn worker for {device_id}: {source}")]
    Spawn {
        /// Device the worker was meant to serve
        device_id: String,
        /// Underlying process error
        #[source]
        source: std::io::Error,
    },
}
