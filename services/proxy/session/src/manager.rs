//! Session manager for the proxy process.
//!
//! One manager owns one device session. Depending on the configuration it
//! either opens that session directly (a known host, or a socket inherited
//! from a listener) or turns into a listener for devices that dial in,
//! spawning a worker process per device.

use proxy_listener::{Dispatcher, ListenerConfig, ProcessSpawner, WorkerSpawner};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, info};

use crate::args::{ConnectMode, ConnectionArgs};
use crate::device::DeviceConnector;
use crate::error::ProxyError;
use crate::facts::{serialize_facts, Facts};
use crate::opts::{ProxyOpts, WorkerOpts};
use crate::registry::{SessionHandle, SessionRegistry};

/// Identifier of this proxy kind
pub const PROXY_TYPE: &str = "junos";

/// Manages the device session of a single proxy process
pub struct JunosProxy {
    connector: Arc<dyn DeviceConnector>,
    spawner: Option<Arc<dyn WorkerSpawner>>,
    registry: SessionRegistry,
}

impl JunosProxy {
    /// Create a manager opening sessions through `connector`
    pub fn new(connector: Arc<dyn DeviceConnector>) -> Self {
        Self {
            connector,
            spawner: None,
            registry: SessionRegistry::new(),
        }
    }

    /// Use `spawner` for listener-mode workers instead of spawning processes
    /// from the worker options
    pub fn with_spawner(mut self, spawner: Arc<dyn WorkerSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Open the device session described by `opts`.
    ///
    /// With neither `proxy.host` nor an inherited socket this listens for
    /// outbound devices instead and only returns if the listener cannot be
    /// set up. Session open failures from the SDK are returned unmodified;
    /// nothing is retried here.
    pub async fn init(&mut self, opts: &mut ProxyOpts) -> Result<(), ProxyError> {
        opts.multiprocessing = false;
        debug!("Opening connection to {}", PROXY_TYPE);

        let args = ConnectionArgs::from_opts(opts)?;
        match args.mode() {
            ConnectMode::Listen => match self.listen(&args, &opts.worker).await? {},
            ConnectMode::Direct => self.connect(&args).await,
        }
    }

    async fn connect(&mut self, args: &ConnectionArgs) -> Result<(), ProxyError> {
        let session = self.connector.open(args).await.map_err(ProxyError::Device)?;
        let handle = SessionHandle::bind(session).map_err(ProxyError::Device)?;
        self.registry.store(handle);

        info!(
            "Device session open (host: {:?}, sockfd: {:?})",
            args.host, args.sockfd
        );
        Ok(())
    }

    async fn listen(
        &self,
        args: &ConnectionArgs,
        worker: &WorkerOpts,
    ) -> Result<Infallible, ProxyError> {
        let port = args.port.ok_or_else(|| {
            ProxyError::Config("proxy.port is required to listen for outbound devices".to_string())
        })?;
        debug!("Listen for outbound {} devices on port {}", PROXY_TYPE, port);

        let spawner = match &self.spawner {
            Some(spawner) => spawner.clone(),
            None => Arc::new(process_spawner(worker)?),
        };

        let mut config = ListenerConfig::new(port);
        config.handshake_timeout = worker.handshake_timeout;

        let dispatcher = Dispatcher::bind(&config, spawner).await?;
        Ok(dispatcher.run().await)
    }

    /// Whether `init` has stored a session
    pub fn initialized(&self) -> bool {
        self.registry.initialized()
    }

    /// The open session
    pub fn conn(&self) -> Result<&SessionHandle, ProxyError> {
        self.registry.conn()
    }

    /// Name of this proxy kind
    pub fn proxytype(&self) -> &'static str {
        PROXY_TYPE
    }

    /// Device facts with SDK containers converted to plain mappings
    pub fn get_serialized_facts(&self) -> Result<Facts, ProxyError> {
        let facts = self.registry.conn()?.session().facts();
        Ok(serialize_facts(&facts))
    }

    /// Whether the device session is still connected
    pub fn ping(&self) -> Result<bool, ProxyError> {
        Ok(self.registry.conn()?.session().connected())
    }

    /// Close the device session on the way out.
    ///
    /// Close errors are logged and dropped; this never fails.
    pub async fn shutdown(&mut self, opts: &ProxyOpts) {
        info!("Proxy module {} shutting down", opts.id);

        let Some(mut handle) = self.registry.take() else {
            debug!("No device session to close");
            return;
        };

        if let Err(e) = handle.session_mut().close().await {
            debug!("Ignoring error while closing device session: {:#}", e);
        }
    }
}

fn process_spawner(worker: &WorkerOpts) -> Result<ProcessSpawner, ProxyError> {
    let spawner = match &worker.executable {
        Some(executable) => ProcessSpawner::new(executable),
        None => ProcessSpawner::current_exe()?,
    };
    Ok(spawner.with_extra_args(worker.extra_args.iter().cloned()))
}
