//! Keeps the device session alive for the lifetime of the process.
//!
//! Opens the session, pings it on an interval and, with keepalive enabled,
//! re-runs `init` after a backoff whenever opening fails or the session is
//! lost. SIGTERM and SIGINT close the session and end the loop.

use anyhow::{bail, Context, Result};
use proxy_session::{JunosProxy, ProxyOpts};
use std::time::Duration;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{debug, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Keepalive behaviour
#[derive(Debug, Clone, Copy)]
pub struct KeepaliveConfig {
    /// Reconnect on failure instead of exiting
    pub enabled: bool,
    /// Time between liveness checks
    pub ping_interval: Duration,
}

/// Delay before reconnect attempt `failures` (counting from 1)
pub fn backoff_delay(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    std::cmp::min(INITIAL_BACKOFF * 2u32.pow(exponent), MAX_BACKOFF)
}

struct ShutdownSignals {
    sigterm: Signal,
    sigint: Signal,
}

impl ShutdownSignals {
    fn install() -> Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?,
            sigint: signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?,
        })
    }

    async fn recv(&mut self) {
        tokio::select! {
            _ = self.sigterm.recv() => info!("Received SIGTERM signal, shutting down"),
            _ = self.sigint.recv() => info!("Received SIGINT signal, shutting down"),
        }
    }
}

/// Run the session until a shutdown signal arrives.
///
/// Returns an error when keepalive is disabled and the session cannot be
/// opened or is lost.
pub async fn run(proxy: &mut JunosProxy, opts: &mut ProxyOpts, config: KeepaliveConfig) -> Result<()> {
    let mut signals = ShutdownSignals::install()?;
    let mut failures = 0u32;

    loop {
        if !proxy.initialized() {
            let result = tokio::select! {
                result = proxy.init(opts) => result,
                _ = signals.recv() => break,
            };

            match result {
                Ok(()) => {
                    failures = 0;
                    info!(component = "keepalive", "Device session for {} established", opts.id);
                }
                Err(e) if !config.enabled => {
                    return Err(e).context(format!("failed to open device session for {}", opts.id));
                }
                Err(e) => {
                    failures += 1;
                    let delay = backoff_delay(failures);
                    warn!(
                        component = "keepalive",
                        "Failed to open device session for {} (attempt {}): {}. Retrying in {:?}",
                        opts.id, failures, e, delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => continue,
                        _ = signals.recv() => break,
                    }
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(config.ping_interval) => {}
            _ = signals.recv() => break,
        }

        match proxy.ping() {
            Ok(true) => debug!(component = "keepalive", "Device session for {} alive", opts.id),
            Ok(false) | Err(_) => {
                proxy.shutdown(opts).await;
                if !config.enabled {
                    bail!("device session for {} lost", opts.id);
                }
                warn!(component = "keepalive", "Device session for {} lost, reconnecting", opts.id);
            }
        }
    }

    proxy.shutdown(opts).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxy_session::TcpTransportConnector;
    use serde_yaml::Mapping;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    fn opts_for(port: u16) -> ProxyOpts {
        let mut opts = ProxyOpts::new("vmx1", Mapping::new());
        opts.set_proxy_value("host", "127.0.0.1");
        opts.set_proxy_value("port", port);
        opts
    }

    fn disabled() -> KeepaliveConfig {
        KeepaliveConfig {
            enabled: false,
            ping_interval: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_backoff_delay() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(5), Duration::from_secs(16));
        assert_eq!(backoff_delay(6), Duration::from_secs(30));
        assert_eq!(backoff_delay(u32::MAX), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_disabled_keepalive_fails_on_open_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut proxy = JunosProxy::new(Arc::new(TcpTransportConnector::new()));
        let mut opts = opts_for(port);

        let err = run(&mut proxy, &mut opts, disabled()).await.unwrap_err();

        assert!(err.to_string().contains("vmx1"));
        assert!(!proxy.initialized());
    }

    #[tokio::test]
    async fn test_disabled_keepalive_fails_on_lost_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            drop(stream);
        });

        let mut proxy = JunosProxy::new(Arc::new(TcpTransportConnector::new()));
        let mut opts = opts_for(port);

        let err = tokio::time::timeout(Duration::from_secs(5), run(&mut proxy, &mut opts, disabled()))
            .await
            .unwrap()
            .unwrap_err();

        assert!(err.to_string().contains("lost"));
        assert!(!proxy.initialized());
        server.await.unwrap();
    }
}
