//! Per-process slot holding the open device session.

use crate::device::{Capability, DeviceSession};
use crate::error::ProxyError;

/// Capabilities bound to every new session
pub const BOUND_CAPABILITIES: [Capability; 2] = [Capability::Config, Capability::Software];

/// An open session together with the capabilities bound to it
#[derive(Debug)]
pub struct SessionHandle {
    session: Box<dyn DeviceSession>,
    capabilities: Vec<Capability>,
}

impl SessionHandle {
    /// Bind [`BOUND_CAPABILITIES`] to `session`
    pub fn bind(mut session: Box<dyn DeviceSession>) -> anyhow::Result<Self> {
        for capability in BOUND_CAPABILITIES {
            session.bind(capability.name(), capability)?;
        }
        Ok(Self {
            session,
            capabilities: BOUND_CAPABILITIES.to_vec(),
        })
    }

    /// Underlying device session
    pub fn session(&self) -> &dyn DeviceSession {
        self.session.as_ref()
    }

    /// Mutable access to the underlying device session
    pub fn session_mut(&mut self) -> &mut dyn DeviceSession {
        self.session.as_mut()
    }

    /// Capabilities bound to the session
    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    /// Whether `capability` is bound
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Holds the session handle and the initialized flag.
///
/// Empty on creation. Filled by a successful `init`, emptied by `shutdown`.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    conn: Option<SessionHandle>,
    initialized: bool,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a freshly opened session and mark the registry initialized
    pub fn store(&mut self, handle: SessionHandle) {
        self.conn = Some(handle);
        self.initialized = true;
    }

    /// Whether a session has been stored
    pub fn initialized(&self) -> bool {
        self.initialized
    }

    /// The stored session
    pub fn conn(&self) -> Result<&SessionHandle, ProxyError> {
        self.conn.as_ref().ok_or(ProxyError::NotConnected)
    }

    /// Remove the stored session, leaving the registry empty
    pub fn take(&mut self) -> Option<SessionHandle> {
        self.initialized = false;
        self.conn.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::Facts;
    use async_trait::async_trait;

    #[derive(Debug, Default)]
    struct StubSession {
        bound: Vec<String>,
        reject_bind: bool,
    }

    #[async_trait]
    impl DeviceSession for StubSession {
        fn bind(&mut self, name: &str, _capability: Capability) -> anyhow::Result<()> {
            if self.reject_bind {
                anyhow::bail!("bind refused");
            }
            self.bound.push(name.to_string());
            Ok(())
        }

        fn connected(&self) -> bool {
            true
        }

        fn facts(&self) -> Facts {
            Facts::new()
        }

        async fn close(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_empty_registry() {
        let registry = SessionRegistry::new();
        assert!(!registry.initialized());
        assert!(matches!(registry.conn(), Err(ProxyError::NotConnected)));
    }

    #[test]
    fn test_store_and_take() {
        let handle = SessionHandle::bind(Box::new(StubSession::default())).unwrap();
        assert!(handle.has_capability(Capability::Config));
        assert!(handle.has_capability(Capability::Software));

        let mut registry = SessionRegistry::new();
        registry.store(handle);
        assert!(registry.initialized());
        assert!(registry.conn().is_ok());

        assert!(registry.take().is_some());
        assert!(!registry.initialized());
        assert!(registry.conn().is_err());
        assert!(registry.take().is_none());
    }

    #[test]
    fn test_bind_failure_propagates() {
        let session = StubSession {
            reject_bind: true,
            ..Default::default()
        };
        let err = SessionHandle::bind(Box::new(session)).unwrap_err();
        assert_eq!(err.to_string(), "bind refused");
    }
}
