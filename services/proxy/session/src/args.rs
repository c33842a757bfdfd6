//! Connection arguments assembled from the proxy configuration.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::os::fd::RawFd;
use std::path::PathBuf;

use crate::error::ProxyError;
use crate::opts::ProxyOpts;

/// Optional keys copied from the `proxy` mapping when present
pub const OPTIONAL_ARGS: &[&str] = &[
    "user",
    "password",
    "port",
    "gather_facts",
    "mode",
    "baud",
    "attempts",
    "auto_probe",
    "ssh_private_key_file",
    "ssh_config",
    "normalize",
];

/// Legacy key names and the canonical key they are renamed to
const LEGACY_ALIASES: &[(&str, &str)] = &[("username", "user"), ("passwd", "password")];

/// How the session gets established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// No host and no inherited socket: wait for devices to dial in
    Listen,
    /// Open a session immediately over `host` or `sockfd`
    Direct,
}

/// Parameters used to open a device session
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionArgs {
    /// Device address to dial
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Already-connected socket inherited from the listener
    #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub sockfd: Option<RawFd>,
    /// Login user
    #[serde(
        default,
        deserialize_with = "scalar_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub user: Option<String>,
    /// Login password
    #[serde(
        default,
        deserialize_with = "scalar_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub password: Option<String>,
    /// Management port on the device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Whether facts are collected when the session opens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gather_facts: Option<bool>,
    /// Transport mode, e.g. `telnet` or `serial` for console access
    #[serde(
        default,
        deserialize_with = "scalar_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub mode: Option<String>,
    /// Serial console baud rate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baud: Option<u32>,
    /// Number of connection attempts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    /// Seconds to probe the device port before opening
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_probe: Option<u64>,
    /// Private key used for SSH authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_private_key_file: Option<PathBuf>,
    /// SSH client configuration file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_config: Option<PathBuf>,
    /// Whether device replies are whitespace-normalized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalize: Option<bool>,
}

impl ConnectionArgs {
    /// Build connection arguments from the proxy options.
    ///
    /// Legacy keys in `opts.proxy` are renamed in place first: `username`
    /// becomes `user` and `passwd` becomes `password`, overwriting any value
    /// already stored under the canonical key.
    pub fn from_opts(opts: &mut ProxyOpts) -> Result<Self, ProxyError> {
        alias_legacy_keys(&mut opts.proxy);

        let mut selected = Mapping::new();
        if let Some(host) = opts.proxy.get("host") {
            selected.insert(Value::from("host"), host.clone());
        }
        for key in OPTIONAL_ARGS {
            if let Some(value) = opts.proxy.get(*key) {
                selected.insert(Value::from(*key), value.clone());
            }
        }

        let mut args: ConnectionArgs = serde_yaml::from_value(Value::Mapping(selected))
            .map_err(|e| ProxyError::Config(e.to_string()))?;
        args.sockfd = opts.sockfd;
        Ok(args)
    }

    /// Connect path selected by these arguments
    pub fn mode(&self) -> ConnectMode {
        if self.host.is_none() && self.sockfd.is_none() {
            ConnectMode::Listen
        } else {
            ConnectMode::Direct
        }
    }
}

impl fmt::Debug for ConnectionArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionArgs")
            .field("host", &self.host)
            .field("sockfd", &self.sockfd)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("port", &self.port)
            .field("gather_facts", &self.gather_facts)
            .field("mode", &self.mode)
            .field("baud", &self.baud)
            .field("attempts", &self.attempts)
            .field("auto_probe", &self.auto_probe)
            .field("ssh_private_key_file", &self.ssh_private_key_file)
            .field("ssh_config", &self.ssh_config)
            .field("normalize", &self.normalize)
            .finish()
    }
}

/// Accept any YAML scalar where a string is expected. Unquoted values
/// such as `password: 123456` load as numbers.
fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected a scalar value, found {:?}",
            other
        ))),
    }
}

fn alias_legacy_keys(proxy: &mut Mapping) {
    for (legacy, canonical) in LEGACY_ALIASES {
        if let Some(value) = proxy.remove(*legacy) {
            proxy.insert(Value::from(*canonical), value);
        }
    }
}
