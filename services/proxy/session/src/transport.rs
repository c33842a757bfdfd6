//! Plain TCP device connector.
//!
//! Opens the TCP connection to a device, or adopts one inherited from the
//! listener, and reports connection-level facts. The management protocol
//! carried over the socket is left to whatever runs on top of it.

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::args::ConnectionArgs;
use crate::device::{Capability, DeviceConnector, DeviceSession};
use crate::facts::{FactValue, Facts};

/// Port dialed when the configuration names none
pub const DEFAULT_PORT: u16 = 830;

/// Transport modes carried over a TCP socket
const SUPPORTED_MODES: &[&str] = &["ssh", "netconf"];

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Opens [`TransportSession`]s over TCP
#[derive(Debug, Clone)]
pub struct TcpTransportConnector {
    initial_backoff: Duration,
}

impl Default for TcpTransportConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpTransportConnector {
    /// Create a connector with the default retry backoff
    pub fn new() -> Self {
        Self {
            initial_backoff: INITIAL_BACKOFF,
        }
    }

    /// Start retry backoff at `delay` instead of one second
    pub fn with_initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    /// Dial `host:port`, making up to `attempts` tries with exponential
    /// backoff between them. `auto_probe` bounds each try in seconds.
    async fn dial(&self, host: &str, args: &ConnectionArgs) -> anyhow::Result<TcpStream> {
        let port = args.port.unwrap_or(DEFAULT_PORT);
        let attempts = args.attempts.unwrap_or(1).max(1);
        let probe = args.auto_probe.filter(|secs| *secs > 0).map(Duration::from_secs);

        let mut delay = self.initial_backoff;
        let mut attempt = 1;
        loop {
            match connect(host, port, probe).await {
                Ok(stream) => return Ok(stream),
                Err(e) if attempt < attempts => {
                    warn!(
                        "Connection attempt {}/{} to {}:{} failed: {:#}. Retrying in {:?}",
                        attempt, attempts, host, port, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, MAX_BACKOFF);
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e.context(format!(
                        "failed to connect to {}:{} after {} attempt(s)",
                        host, port, attempts
                    )))
                }
            }
        }
    }
}

#[async_trait]
impl DeviceConnector for TcpTransportConnector {
    async fn open(&self, args: &ConnectionArgs) -> anyhow::Result<Box<dyn DeviceSession>> {
        if let Some(mode) = args.mode.as_deref() {
            if !SUPPORTED_MODES.contains(&mode) {
                bail!("transport mode '{}' is not supported over TCP", mode);
            }
        }

        let stream = match (args.sockfd, args.host.as_deref()) {
            (Some(fd), _) => adopt(fd).context("failed to adopt inherited socket")?,
            (None, Some(host)) => self.dial(host, args).await?,
            (None, None) => bail!("no host or inherited socket to open a session on"),
        };

        let session = TransportSession::new(stream, args.host.clone())?;
        info!(
            "Opened TCP session {} -> {}",
            session.local_addr, session.peer_addr
        );
        Ok(Box::new(session))
    }
}

async fn connect(host: &str, port: u16, probe: Option<Duration>) -> anyhow::Result<TcpStream> {
    let stream = match probe {
        Some(limit) => tokio::time::timeout(limit, TcpStream::connect((host, port)))
            .await
            .map_err(|_| anyhow!("no answer within {:?}", limit))??,
        None => TcpStream::connect((host, port)).await?,
    };
    Ok(stream)
}

/// Take ownership of a connected socket descriptor inherited from the
/// listener process.
fn adopt(fd: RawFd) -> io::Result<TcpStream> {
    if fd < 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid socket descriptor {}", fd),
        ));
    }

    // The listener hands over exactly one connected socket per worker and
    // nothing else in this process owns it.
    let stream = unsafe { std::net::TcpStream::from_raw_fd(fd) };
    stream.set_nonblocking(true)?;
    TcpStream::from_std(stream)
}

/// Device session backed by a single TCP connection
#[derive(Debug)]
pub struct TransportSession {
    stream: Option<TcpStream>,
    hostname: Option<String>,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    bound: Vec<Capability>,
}

impl TransportSession {
    fn new(stream: TcpStream, hostname: Option<String>) -> io::Result<Self> {
        Ok(Self {
            peer_addr: stream.peer_addr()?,
            local_addr: stream.local_addr()?,
            stream: Some(stream),
            hostname,
            bound: Vec::new(),
        })
    }

    /// Remote end of the connection
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Capabilities bound so far
    pub fn bound(&self) -> &[Capability] {
        &self.bound
    }
}

#[async_trait]
impl DeviceSession for TransportSession {
    fn bind(&mut self, name: &str, capability: Capability) -> anyhow::Result<()> {
        if self.stream.is_none() {
            bail!("cannot bind '{}' to a closed session", name);
        }
        debug!("Bound {} to session with {}", name, self.peer_addr);
        self.bound.push(capability);
        Ok(())
    }

    fn connected(&self) -> bool {
        match &self.stream {
            Some(stream) => matches!(stream.take_error(), Ok(None)) && peer_open(stream),
            None => false,
        }
    }

    fn facts(&self) -> Facts {
        let hostname = self
            .hostname
            .clone()
            .unwrap_or_else(|| self.peer_addr.ip().to_string());

        let mut facts = Facts::new();
        facts.insert("hostname".to_string(), FactValue::from(hostname));
        facts.insert("transport".to_string(), FactValue::from("tcp"));
        facts.insert(
            "remote_addr".to_string(),
            FactValue::from(self.peer_addr.to_string()),
        );
        facts.insert(
            "local_addr".to_string(),
            FactValue::from(self.local_addr.to_string()),
        );
        facts.insert(
            "port".to_string(),
            FactValue::Int(i64::from(self.peer_addr.port())),
        );
        facts
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        let Some(mut stream) = self.stream.take() else {
            bail!("session with {} already closed", self.peer_addr);
        };
        stream
            .shutdown()
            .await
            .with_context(|| format!("failed to shut down session with {}", self.peer_addr))
    }
}

/// Peek one byte without blocking: an orderly shutdown from the peer reads
/// as zero bytes, a live idle connection as `WouldBlock`.
fn peer_open(stream: &TcpStream) -> bool {
    let mut buf = [0u8; 1];
    let n = unsafe {
        libc::recv(
            stream.as_raw_fd(),
            buf.as_mut_ptr().cast(),
            buf.len(),
            libc::MSG_PEEK | libc::MSG_DONTWAIT,
        )
    };
    match n {
        0 => false,
        n if n > 0 => true,
        _ => io::Error::last_os_error().kind() == io::ErrorKind::WouldBlock,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::IntoRawFd;
    use tokio::net::TcpListener;

    async fn loopback_listener() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    fn host_args(addr: SocketAddr) -> ConnectionArgs {
        ConnectionArgs {
            host: Some(addr.ip().to_string()),
            port: Some(addr.port()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_dial_host() {
        let (listener, addr) = loopback_listener().await;

        let mut session = TcpTransportConnector::new()
            .open(&host_args(addr))
            .await
            .unwrap();
        let (_server, _) = listener.accept().await.unwrap();

        assert!(session.connected());
        let facts = session.facts();
        assert_eq!(facts["hostname"].as_str(), Some("127.0.0.1"));
        assert_eq!(facts["remote_addr"].as_str(), Some(addr.to_string().as_str()));
        assert_eq!(facts["port"], FactValue::Int(i64::from(addr.port())));

        session.close().await.unwrap();
        assert!(!session.connected());
    }

    #[tokio::test]
    async fn test_adopt_inherited_socket() {
        let (listener, addr) = loopback_listener().await;
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (_server, _) = listener.accept().await.unwrap();

        let args = ConnectionArgs {
            sockfd: Some(client.into_raw_fd()),
            ..Default::default()
        };
        let session = TcpTransportConnector::new().open(&args).await.unwrap();

        assert!(session.connected());
        let facts = session.facts();
        assert_eq!(facts["remote_addr"].as_str(), Some(addr.to_string().as_str()));
        assert_eq!(facts["hostname"].as_str(), Some("127.0.0.1"));
    }

    #[tokio::test]
    async fn test_peer_close_is_detected() {
        let (listener, addr) = loopback_listener().await;
        let session = TcpTransportConnector::new()
            .open(&host_args(addr))
            .await
            .unwrap();

        let (server, _) = listener.accept().await.unwrap();
        drop(server);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!session.connected());
    }

    #[tokio::test]
    async fn test_closed_session() {
        let (listener, addr) = loopback_listener().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let _server = listener.accept().await.unwrap();

        let mut session = TransportSession::new(stream, None).unwrap();
        session.bind("cu", Capability::Config).unwrap();
        assert_eq!(session.bound(), &[Capability::Config]);

        session.close().await.unwrap();
        assert!(session.close().await.is_err());
        assert!(session.bind("sw", Capability::Software).is_err());
    }

    #[tokio::test]
    async fn test_retries_then_fails() {
        let (listener, addr) = loopback_listener().await;
        drop(listener);

        let args = ConnectionArgs {
            attempts: Some(2),
            ..host_args(addr)
        };
        let err = TcpTransportConnector::new()
            .with_initial_backoff(Duration::from_millis(10))
            .open(&args)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("after 2 attempt(s)"));
    }

    #[tokio::test]
    async fn test_unsupported_mode() {
        let args = ConnectionArgs {
            host: Some("127.0.0.1".to_string()),
            mode: Some("telnet".to_string()),
            ..Default::default()
        };
        let err = TcpTransportConnector::new().open(&args).await.unwrap_err();
        assert!(err.to_string().contains("telnet"));
    }

    #[tokio::test]
    async fn test_negative_sockfd_rejected() {
        let args = ConnectionArgs {
            sockfd: Some(-1),
            ..Default::default()
        };
        let err = TcpTransportConnector::new().open(&args).await.unwrap_err();
        assert!(format!("{:#}", err).contains("invalid socket descriptor -1"));
    }

    #[tokio::test]
    async fn test_nothing_to_open() {
        let err = TcpTransportConnector::new()
            .open(&ConnectionArgs::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no host"));
    }
}
