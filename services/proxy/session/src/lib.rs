//! Managed device session for a single proxy process.
//!
//! A [`JunosProxy`] owns at most one device session. `init` either opens it
//! (dialing `proxy.host`, or adopting a socket handed over by a listener) or,
//! when neither is configured, turns the process into the listener for
//! devices that connect outbound. The remaining operations query and close
//! the open session.
//!
//! ## Example
//!
//! ```rust,no_run
//! use proxy_session::{JunosProxy, ProxyOpts, TcpTransportConnector};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), proxy_session::ProxyError> {
//! let proxy_config = serde_yaml::from_str("host: 10.0.0.1\nuser: netconf\n")
//!     .map_err(|e| proxy_session::ProxyError::Config(e.to_string()))?;
//! let mut opts = ProxyOpts::new("vmx1", proxy_config);
//!
//! let mut proxy = JunosProxy::new(Arc::new(TcpTransportConnector::new()));
//! proxy.init(&mut opts).await?;
//! assert!(proxy.ping()?);
//!
//! proxy.shutdown(&opts).await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod args;
pub mod device;
pub mod error;
pub mod facts;
pub mod manager;
pub mod opts;
pub mod registry;
pub mod transport;

pub use args::{ConnectMode, ConnectionArgs, OPTIONAL_ARGS};
pub use device::{Capability, DeviceConnector, DeviceSession};
pub use error::ProxyError;
pub use facts::{facts_to_json, serialize_facts, FactObject, FactValue, Facts};
pub use manager::{JunosProxy, PROXY_TYPE};
pub use opts::{ProxyOpts, WorkerOpts};
pub use registry::{SessionHandle, SessionRegistry};
pub use transport::{TcpTransportConnector, TransportSession, DEFAULT_PORT};
