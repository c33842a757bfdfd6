//! Header fields extracted from an outbound device's bootstrap handshake.

use tracing::trace;

/// Message identifier header key
pub const MSG_ID: &str = "MSG-ID";
/// Message version header key
pub const MSG_VER: &str = "MSG-VER";
/// Device identifier header key
pub const DEVICE_ID: &str = "DEVICE-ID";

/// Parsed handshake headers for one inbound connection.
///
/// Only the three known keys are tracked. Each starts absent and is filled
/// as a matching `KEY: VALUE` line is parsed; a repeated key overwrites the
/// earlier value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeRecord {
    msg_id: Option<String>,
    msg_ver: Option<String>,
    device_id: Option<String>,
}

impl HandshakeRecord {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`. Returns false if `key` is not a handshake header.
    pub fn set(&mut self, key: &str, value: String) -> bool {
        let slot = match key {
            MSG_ID => &mut self.msg_id,
            MSG_VER => &mut self.msg_ver,
            DEVICE_ID => &mut self.device_id,
            _ => {
                trace!("Ignoring unknown handshake header {:?}", key);
                return false;
            }
        };
        *slot = Some(value);
        true
    }

    /// Raw value stored under `key`, including empty values
    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            MSG_ID => self.msg_id.as_deref(),
            MSG_VER => self.msg_ver.as_deref(),
            DEVICE_ID => self.device_id.as_deref(),
            _ => None,
        }
    }

    /// Value of `MSG-ID`, if received
    pub fn msg_id(&self) -> Option<&str> {
        self.msg_id.as_deref()
    }

    /// Value of `MSG-VER`, if received
    pub fn msg_ver(&self) -> Option<&str> {
        self.msg_ver.as_deref()
    }

    /// Device identifier, only when it was received and is non-empty.
    ///
    /// This is the value that decides whether a worker gets spawned.
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Whether no header has been stored yet
    pub fn is_empty(&self) -> bool {
        self.msg_id.is_none() && self.msg_ver.is_none() && self.device_id.is_none()
    }
}
