//! Bootstrap handshake for devices that initiate outbound connections.
//!
//! Before any management session exists, a device dialing in to the proxy
//! announces itself with a few `KEY: VALUE` header lines:
//!
//! ```text
//! MSG-ID: DEVICE-CONN-INFO
//! MSG-VER: V1
//! DEVICE-ID: vmx1
//! ```
//!
//! This crate reads those lines straight off the raw socket and extracts
//! the device identity used to launch a dedicated worker.
//!
//! ## Example
//!
//! ```rust
//! use proxy_handshake::read_handshake;
//!
//! # async fn example() -> Result<(), proxy_handshake::HandshakeError> {
//! let mut stream: &[u8] = b"MSG-ID: DEVICE-CONN-INFO\r\nMSG-VER: V1\r\nDEVICE-ID: vmx1\r\n";
//! let record = read_handshake(&mut stream).await?;
//! assert_eq!(record.device_id(), Some("vmx1"));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod parser;
pub mod record;

pub use error::HandshakeError;
pub use parser::{read_handshake, HandshakeParser, ParseStatus, HANDSHAKE_LINES, MAX_LINE_BYTES};
pub use record::{HandshakeRecord, DEVICE_ID, MSG_ID, MSG_VER};
