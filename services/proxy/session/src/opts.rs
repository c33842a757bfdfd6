//! Options handed to the session manager by the proxy process.

use serde_yaml::{Mapping, Value};
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::time::Duration;

/// Worker launch settings used in listener mode
#[derive(Debug, Clone, Default)]
pub struct WorkerOpts {
    /// Proxy executable to spawn; defaults to the running executable
    pub executable: Option<PathBuf>,
    /// Arguments appended after the handoff arguments
    pub extra_args: Vec<String>,
    /// Upper bound on reading one inbound handshake
    pub handshake_timeout: Option<Duration>,
}

/// Proxy process options
#[derive(Debug, Clone)]
pub struct ProxyOpts {
    /// Proxy identifier
    pub id: String,
    /// Raw `proxy` mapping from the configuration store
    pub proxy: Mapping,
    /// Socket descriptor inherited from a listener process
    pub sockfd: Option<RawFd>,
    /// Whether the proxy may fork internally; `init` forces this off
    pub multiprocessing: bool,
    /// Listener-mode worker settings
    pub worker: WorkerOpts,
}

impl ProxyOpts {
    /// Options for proxy `id` with the given `proxy` mapping
    pub fn new(id: impl Into<String>, proxy: Mapping) -> Self {
        Self {
            id: id.into(),
            proxy,
            sockfd: None,
            multiprocessing: true,
            worker: WorkerOpts::default(),
        }
    }

    /// Look up a key in the `proxy` mapping
    pub fn proxy_value(&self, key: &str) -> Option<&Value> {
        self.proxy.get(key)
    }

    /// Set a key in the `proxy` mapping
    pub fn set_proxy_value(&mut self, key: &str, value: impl Into<Value>) {
        self.proxy.insert(Value::from(key), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_defaults() {
        let opts = ProxyOpts::new("vmx", Mapping::new());
        assert_eq!(opts.id, "vmx");
        assert!(opts.sockfd.is_none());
        assert!(opts.multiprocessing);
        assert!(opts.worker.executable.is_none());
    }

    #[test]
    fn test_proxy_values() {
        let mut opts = ProxyOpts::new("vmx", Mapping::new());
        opts.set_proxy_value("host", "10.0.0.1");
        opts.set_proxy_value("port", 830);

        assert_eq!(opts.proxy_value("host"), Some(&Value::from("10.0.0.1")));
        assert_eq!(opts.proxy_value("port").and_then(Value::as_u64), Some(830));
        assert_eq!(opts.proxy_value("user"), None);
    }
}
