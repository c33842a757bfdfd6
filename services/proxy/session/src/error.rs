//! Session manager error types.

use proxy_listener::ListenerError;
use thiserror::Error;

/// Session manager errors
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Error raised by the device SDK, passed through as-is
    #[error(transparent)]
    Device(anyhow::Error),

    /// Operation needs a session but `init` has not succeeded
    #[error("no device session: missing key 'conn'")]
    NotConnected,

    /// Proxy configuration could not be turned into connection arguments
    #[error("invalid proxy configuration: {0}")]
    Config(String),

    /// Listener mode failed to start
    #[error(transparent)]
    Listener(#[from] ListenerError),
}
