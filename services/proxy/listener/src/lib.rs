//! Listener for devices that initiate outbound connections to the proxy.
//!
//! Instead of being dialed, some devices connect to a well-known port and
//! identify themselves with a short handshake. This crate accepts those
//! connections, reads the handshake, and hands each identified socket to a
//! dedicated worker process so the listener can go straight back to
//! accepting.
//!
//! ## Example
//!
//! ```rust,no_run
//! use proxy_listener::{Dispatcher, ListenerConfig, ProcessSpawner};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), proxy_listener::ListenerError> {
//! let spawner = ProcessSpawner::current_exe()?.with_extra_args(["--config", "proxy.yaml"]);
//! let dispatcher = Dispatcher::bind(&ListenerConfig::new(2200), Arc::new(spawner)).await?;
//!
//! // Never returns
//! match dispatcher.run().await {}
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dispatcher;
pub mod error;
pub mod spawner;

pub use dispatcher::{
    ConnectionState, Dispatcher, DropReason, ListenerConfig, Outcome, DEFAULT_BACKLOG,
};
pub use error::ListenerError;
pub use spawner::{
    ProcessSpawner, WorkerSpawner, DISABLE_KEEPALIVE_ARG, PROXYID_ARG, SOCKFD_ARG,
};
