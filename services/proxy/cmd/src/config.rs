//! Configuration handling for the proxy process.
//!
//! Reads the proxy configuration file and environment variables, and turns
//! them into the options handed to the session manager.

use anyhow::{bail, Context, Result};
use proxy_session::{ProxyOpts, WorkerOpts, PROXY_TYPE};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Proxy identifier used when neither the command line nor the file sets one
pub const DEFAULT_PROXY_ID: &str = "junos";

/// Resolved proxy configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Proxy identifier
    pub id: String,
    /// Connection settings for the device
    pub proxy: Mapping,
    /// Listener-mode worker settings
    pub worker: WorkerConfig,
}

/// Worker launch settings
#[derive(Debug, Clone, Default)]
pub struct WorkerConfig {
    /// Executable spawned per device
    pub executable: Option<PathBuf>,
    /// Upper bound on reading one inbound handshake
    pub handshake_timeout: Option<Duration>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            id: DEFAULT_PROXY_ID.to_string(),
            proxy: Mapping::new(),
            worker: WorkerConfig::default(),
        }
    }
}

/// Root configuration structure (matches the YAML layout)
#[derive(Debug, Deserialize)]
struct RootConfig {
    id: Option<String>,
    proxy: Option<Mapping>,
    pillars: Option<HashMap<String, PillarConfig>>,
    worker: Option<RawWorkerConfig>,
}

/// Per-device overrides keyed by proxy id
#[derive(Debug, Deserialize)]
struct PillarConfig {
    proxy: Option<Mapping>,
}

#[derive(Debug, Deserialize)]
struct RawWorkerConfig {
    executable: Option<PathBuf>,
    handshake_timeout: Option<String>,
}

impl ProxyConfig {
    /// Load configuration for `proxy_id` from file and environment variables.
    ///
    /// `proxy_id` wins over the `id` in the file. A missing or unparseable
    /// file leaves the defaults in place.
    pub fn load_from_file<P: AsRef<Path>>(config_path: P, proxy_id: Option<&str>) -> Result<Self> {
        let mut config = Self::default();
        let mut root = None;

        if let Ok(content) = std::fs::read_to_string(&config_path) {
            match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(parsed) => {
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                    root = Some(parsed);
                }
                Err(e) => warn!(
                    "Failed to parse config file {:?}: {}, using defaults",
                    config_path.as_ref(),
                    e
                ),
            }
        } else {
            warn!("Config file {:?} not found, using defaults", config_path.as_ref());
        }

        if let Some(id) = proxy_id.or_else(|| root.as_ref().and_then(|r| r.id.as_deref())) {
            config.id = id.to_string();
        }
        if let Some(root) = root {
            config.apply_root_config(root)?;
        }

        config.apply_environment_overrides();
        config.validate()?;

        let host = config.proxy.get("host").and_then(Value::as_str);
        let port = config.proxy.get("port").and_then(Value::as_u64);
        info!(
            "Final proxy configuration: id={}, host={:?}, port={:?}",
            config.id, host, port
        );

        Ok(config)
    }

    fn apply_root_config(&mut self, root: RootConfig) -> Result<()> {
        if let Some(proxy) = root.proxy {
            self.proxy = proxy;
        }

        // Device-specific keys layered over the shared ones
        if let Some(pillar) = root.pillars.and_then(|mut p| p.remove(&self.id)) {
            for (key, value) in pillar.proxy.unwrap_or_default() {
                self.proxy.insert(key, value);
            }
        }

        if let Some(worker) = root.worker {
            self.worker.executable = worker.executable;
            if let Some(timeout) = worker.handshake_timeout {
                let timeout = humantime::parse_duration(&timeout)
                    .with_context(|| format!("invalid worker.handshake_timeout '{}'", timeout))?;
                self.worker.handshake_timeout = Some(timeout);
            }
        }

        Ok(())
    }

    fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("PROXY_HOST") {
            info!("Host overridden by environment: {}", host);
            self.proxy.insert(Value::from("host"), Value::from(host));
        }

        if let Some(port) = lookup("PROXY_PORT") {
            match port.parse::<u16>() {
                Ok(port) => {
                    self.proxy.insert(Value::from("port"), Value::from(port));
                    info!("Port overridden by environment: {}", port);
                }
                Err(_) => warn!("Ignoring invalid PROXY_PORT '{}'", port),
            }
        }

        if let Some(user) = lookup("PROXY_USERNAME") {
            info!("User overridden by environment: {}", user);
            self.proxy.insert(Value::from("user"), Value::from(user));
        }

        if let Some(password) = lookup("PROXY_PASSWORD") {
            info!("Password overridden by environment");
            self.proxy.insert(Value::from("password"), Value::from(password));
        }
    }

    fn validate(&self) -> Result<()> {
        match self.proxy.get("proxytype") {
            None => Ok(()),
            Some(Value::String(kind)) if kind == PROXY_TYPE => Ok(()),
            Some(other) => bail!(
                "proxy.proxytype must be '{}', got {:?}",
                PROXY_TYPE,
                other
            ),
        }
    }

    /// Session manager options for this configuration.
    ///
    /// Workers spawned in listener mode are pointed back at `config_path`.
    pub fn proxy_opts(&self, sockfd: Option<RawFd>, config_path: &Path) -> ProxyOpts {
        let mut opts = ProxyOpts::new(self.id.clone(), self.proxy.clone());
        opts.sockfd = sockfd;
        opts.worker = WorkerOpts {
            executable: self.worker.executable.clone(),
            extra_args: vec![
                "--config".to_string(),
                config_path.to_string_lossy().into_owned(),
            ],
            handshake_timeout: self.worker.handshake_timeout,
        };
        opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const CONFIG: &str = r#"
id: gateway
proxy:
  proxytype: junos
  port: 2200
  username: netconf
pillars:
  vmx1:
    proxy:
      host: 192.0.2.10
      port: 830
worker:
  executable: /usr/local/bin/junos-proxy
  handshake_timeout: 5s
"#;

    fn config_file(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config() {
        let config = ProxyConfig::default();
        assert_eq!(config.id, DEFAULT_PROXY_ID);
        assert!(config.proxy.is_empty());
        assert!(config.worker.handshake_timeout.is_none());
    }

    #[test]
    fn test_load_listener_config() {
        let file = config_file(CONFIG);
        let config = ProxyConfig::load_from_file(file.path(), None).unwrap();

        assert_eq!(config.id, "gateway");
        assert_eq!(config.proxy.get("port").and_then(Value::as_u64), Some(2200));
        assert!(config.proxy.get("host").is_none());
        assert_eq!(
            config.worker.executable,
            Some(PathBuf::from("/usr/local/bin/junos-proxy"))
        );
        assert_eq!(config.worker.handshake_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_pillar_overrides_shared_proxy() {
        let file = config_file(CONFIG);
        let config = ProxyConfig::load_from_file(file.path(), Some("vmx1")).unwrap();

        assert_eq!(config.id, "vmx1");
        assert_eq!(config.proxy.get("host").and_then(Value::as_str), Some("192.0.2.10"));
        assert_eq!(config.proxy.get("port").and_then(Value::as_u64), Some(830));
        assert_eq!(config.proxy.get("username").and_then(Value::as_str), Some("netconf"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProxyConfig::load_from_file(dir.path().join("absent.yaml"), Some("vmx2")).unwrap();

        assert_eq!(config.id, "vmx2");
        assert!(config.proxy.get("proxytype").is_none());
    }

    #[test]
    fn test_wrong_proxytype_rejected() {
        let file = config_file("proxy:\n  proxytype: eos\n");
        assert!(ProxyConfig::load_from_file(file.path(), None).is_err());
    }

    #[test]
    fn test_invalid_handshake_timeout_rejected() {
        let file = config_file("worker:\n  handshake_timeout: soon\n");
        assert!(ProxyConfig::load_from_file(file.path(), None).is_err());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("PROXY_HOST", "198.51.100.7"),
            ("PROXY_PORT", "8300"),
            ("PROXY_USERNAME", "ops"),
            ("PROXY_PASSWORD", "secret"),
        ]
        .into_iter()
        .collect();

        let mut config = ProxyConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.proxy.get("host").and_then(Value::as_str), Some("198.51.100.7"));
        assert_eq!(config.proxy.get("port").and_then(Value::as_u64), Some(8300));
        assert_eq!(config.proxy.get("user").and_then(Value::as_str), Some("ops"));
        assert_eq!(config.proxy.get("password").and_then(Value::as_str), Some("secret"));
    }

    #[test]
    fn test_invalid_port_override_ignored() {
        let mut config = ProxyConfig::default();
        config.apply_overrides(|key| (key == "PROXY_PORT").then(|| "eight".to_string()));
        assert!(config.proxy.get("port").is_none());
    }

    #[test]
    fn test_proxy_opts() {
        let file = config_file(CONFIG);
        let config = ProxyConfig::load_from_file(file.path(), Some("vmx1")).unwrap();

        let opts = config.proxy_opts(Some(7), Path::new("/etc/junos-proxy/proxy.yaml"));

        assert_eq!(opts.id, "vmx1");
        assert_eq!(opts.sockfd, Some(7));
        assert_eq!(opts.worker.extra_args, ["--config", "/etc/junos-proxy/proxy.yaml"]);
        assert_eq!(opts.worker.handshake_timeout, Some(Duration::from_secs(5)));
    }
}
