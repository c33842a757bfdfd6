//! Contract between the session manager and the device SDK.
//!
//! The proxy does not speak the device management protocol itself. It
//! drives whatever SDK is plugged in through these traits. SDK errors are
//! plain `anyhow::Error`s and reach callers unmodified.

use async_trait::async_trait;
use std::fmt;

use crate::args::ConnectionArgs;
use crate::facts::Facts;

/// Service sub-objects bound to an open session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Candidate configuration editing
    Config,
    /// Software package management
    Software,
}

impl Capability {
    /// Name the capability is bound under
    pub fn name(&self) -> &'static str {
        match self {
            Capability::Config => "cu",
            Capability::Software => "sw",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opens device sessions
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    /// Open and authenticate a session using `args`
    async fn open(&self, args: &ConnectionArgs) -> anyhow::Result<Box<dyn DeviceSession>>;
}

/// An open device management session
#[async_trait]
pub trait DeviceSession: Send + Sync + fmt::Debug {
    /// Attach a capability to the session under `name`
    fn bind(&mut self, name: &str, capability: Capability) -> anyhow::Result<()>;

    /// Whether the session is still usable
    fn connected(&self) -> bool;

    /// Current fact set reported by the device
    fn facts(&self) -> Facts;

    /// Close the session
    async fn close(&mut self) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_names() {
        assert_eq!(Capability::Config.name(), "cu");
        assert_eq!(Capability::Software.to_string(), "sw");
    }
}
