//! Accept loop for devices that dial in to the proxy.
//!
//! Every accepted connection goes through a small state machine:
//!
//! ```text
//! Accepted -> Parsing -> Spawned
//!                     -> Dropped
//! ```
//!
//! Connections are handled one at a time on the accept task. A client that
//! stalls mid-handshake holds up the queue unless a handshake timeout is
//! configured.

use proxy_handshake::{read_handshake, HandshakeError, HandshakeRecord};
use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{debug, info, warn};

use crate::error::ListenerError;
use crate::spawner::WorkerSpawner;

/// Pending-connection backlog of the listening socket
pub const DEFAULT_BACKLOG: u32 = 5;

/// Delay before retrying after a failed accept
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Listener settings
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// TCP port, bound on all interfaces
    pub port: u16,
    /// Listen backlog
    pub backlog: u32,
    /// Upper bound on reading one handshake; `None` waits indefinitely
    pub handshake_timeout: Option<Duration>,
}

impl ListenerConfig {
    /// Listen on `port` with the default backlog and no handshake timeout
    pub fn new(port: u16) -> Self {
        Self {
            port,
            backlog: DEFAULT_BACKLOG,
            handshake_timeout: None,
        }
    }

    /// Address the listener binds to
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }
}

/// Why a connection was closed without spawning a worker
#[derive(Debug)]
pub enum DropReason {
    /// Handshake finished without a usable `DEVICE-ID`
    MissingDeviceId,
    /// Handshake could not be read
    Handshake(HandshakeError),
    /// Handshake did not finish in time
    HandshakeTimeout(Duration),
    /// Worker could not be started
    Spawn(ListenerError),
}

/// Lifecycle of one inbound connection
#[derive(Debug)]
pub enum ConnectionState {
    /// Connection accepted, nothing read yet
    Accepted(TcpStream),
    /// Reading handshake headers
    Parsing(TcpStream),
    /// Socket handed to a worker for `device_id`
    Spawned {
        /// Identifier announced by the device
        device_id: String,
    },
    /// Connection closed without a worker
    Dropped(DropReason),
}

impl ConnectionState {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Spawned { .. } | Self::Dropped(_))
    }

    /// Split off the terminal states
    fn into_outcome(self) -> Result<Outcome, Self> {
        match self {
            Self::Spawned { device_id } => Ok(Outcome::Spawned { device_id }),
            Self::Dropped(reason) => Ok(Outcome::Dropped(reason)),
            pending => Err(pending),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Accepted(_) => "accepted",
            Self::Parsing(_) => "parsing",
            Self::Spawned { .. } => "spawned",
            Self::Dropped(_) => "dropped",
        }
    }
}

/// Where a connection ended up
#[derive(Debug)]
pub enum Outcome {
    /// Socket handed to a worker for `device_id`
    Spawned {
        /// Identifier announced by the device
        device_id: String,
    },
    /// Connection closed without a worker
    Dropped(DropReason),
}

/// Accepts outbound device connections and hands each one to a worker
pub struct Dispatcher {
    listener: TcpListener,
    spawner: Arc<dyn WorkerSpawner>,
    handshake_timeout: Option<Duration>,
}

impl Dispatcher {
    /// Bind the listening socket with address reuse enabled
    pub async fn bind(
        config: &ListenerConfig,
        spawner: Arc<dyn WorkerSpawner>,
    ) -> Result<Self, ListenerError> {
        let addr = config.listen_addr();
        let bind_err = |source: std::io::Error| ListenerError::Bind { addr, source };

        let socket = TcpSocket::new_v4().map_err(bind_err)?;
        socket.set_reuseaddr(true).map_err(bind_err)?;
        socket.bind(addr).map_err(bind_err)?;
        let listener = socket.listen(config.backlog).map_err(bind_err)?;

        info!(
            "Listening for outbound devices on {} (backlog {})",
            addr, config.backlog
        );

        Ok(Self {
            listener,
            spawner,
            handshake_timeout: config.handshake_timeout,
        })
    }

    /// Address actually bound, useful when listening on port 0
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever.
    ///
    /// Failures only ever affect the connection they happened on.
    pub async fn run(self) -> Infallible {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    info!("Accepted connection from {}", peer);
                    match self.handle_connection(stream, peer).await {
                        Outcome::Spawned { device_id } => {
                            debug!("Connection from {} handed to worker {}", peer, device_id);
                        }
                        Outcome::Dropped(DropReason::MissingDeviceId) => {
                            debug!("Dropped connection from {}: no device id", peer);
                        }
                        Outcome::Dropped(reason) => {
                            warn!("Dropped connection from {}: {:?}", peer, reason);
                        }
                    }
                }
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }

    /// Drive one connection to a terminal state
    pub async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> Outcome {
        let mut state = ConnectionState::Accepted(stream);
        loop {
            state = match state.into_outcome() {
                Ok(outcome) => return outcome,
                Err(pending) => self.step(pending).await,
            };
            debug!("Connection {} -> {}", peer, state.name());
        }
    }

    async fn step(&self, state: ConnectionState) -> ConnectionState {
        match state {
            ConnectionState::Accepted(stream) => ConnectionState::Parsing(stream),
            ConnectionState::Parsing(mut stream) => {
                let record = match self.read_record(&mut stream).await {
                    Ok(record) => record,
                    Err(reason) => return ConnectionState::Dropped(reason),
                };
                match record.device_id() {
                    Some(device_id) => self.handoff(stream, device_id),
                    None => ConnectionState::Dropped(DropReason::MissingDeviceId),
                }
            }
            terminal => terminal,
        }
    }

    async fn read_record(&self, stream: &mut TcpStream) -> Result<HandshakeRecord, DropReason> {
        let Some(limit) = self.handshake_timeout else {
            return read_handshake(stream).await.map_err(DropReason::Handshake);
        };

        match tokio::time::timeout(limit, read_handshake(stream)).await {
            Ok(result) => result.map_err(DropReason::Handshake),
            Err(_) => Err(DropReason::HandshakeTimeout(limit)),
        }
    }

    /// Give up the socket to a worker. After this the listener holds no
    /// reference to the descriptor.
    fn handoff(&self, stream: TcpStream, device_id: &str) -> ConnectionState {
        info!("Launching worker for device {}", device_id);

        let socket = match stream.into_std() {
            Ok(std_stream) => OwnedFd::from(std_stream),
            Err(e) => return ConnectionState::Dropped(DropReason::Spawn(ListenerError::Handoff(e))),
        };

        match self.spawner.spawn(device_id, socket) {
            Ok(()) => ConnectionState::Spawned {
                device_id: device_id.to_string(),
            },
            Err(e) => ConnectionState::Dropped(DropReason::Spawn(e)),
        }
    }
}
