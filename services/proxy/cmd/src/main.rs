//! Junos device proxy binary.
//!
//! Runs one of two roles depending on configuration. With a device host or
//! an inherited socket it holds a managed session to that device. Without
//! either it listens for devices that connect outbound and spawns itself
//! once per device as a worker that adopts the connected socket.

use clap::Parser;
use proxy_session::{JunosProxy, TcpTransportConnector};
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod keepalive;
mod logging;

use config::ProxyConfig;
use keepalive::KeepaliveConfig;
use logging::ProxyLogFormatter;

/// Junos device proxy with an outbound-connection listener
#[derive(Parser, Debug)]
#[command(name = "junos-proxy", version, about = "Junos device proxy with outbound-connection listener")]
struct Args {
    /// Proxy identifier; selects the per-device section of the config
    #[arg(long)]
    proxyid: Option<String>,

    /// Connected socket descriptor inherited from the listener
    #[arg(long)]
    sockfd: Option<RawFd>,

    /// Exit instead of reconnecting when the device session fails
    #[arg(long)]
    disable_keepalive: bool,

    /// Configuration file path
    #[arg(long, default_value = "proxy.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Session liveness check interval, e.g. 60s
    #[arg(long, default_value = "60s")]
    ping_interval: humantime::Duration,

    /// Upper bound on reading one inbound handshake, e.g. 10s
    #[arg(long)]
    handshake_timeout: Option<humantime::Duration>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("junos_proxy={}", args.log_level).parse()?)
        .add_directive(format!("proxy_session={}", args.log_level).parse()?)
        .add_directive(format!("proxy_listener={}", args.log_level).parse()?)
        .add_directive(format!("proxy_handshake={}", args.log_level).parse()?);

    let service_name = match &args.proxyid {
        Some(id) => format!("proxy-{}", id),
        None => "junos-proxy".to_string(),
    };
    let formatter = ProxyLogFormatter::new(service_name);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(true)
        .event_format(formatter)
        .init();

    info!("Starting Junos proxy v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ProxyConfig::load_from_file(&args.config, args.proxyid.as_deref())?;
    if let Some(timeout) = args.handshake_timeout {
        config.worker.handshake_timeout = Some(timeout.into());
    }

    if let Some(fd) = args.sockfd {
        info!("Proxy {} adopting inherited socket {}", config.id, fd);
    }

    // An inherited socket cannot be re-established, so never reconnect
    let keepalive = KeepaliveConfig {
        enabled: !args.disable_keepalive && args.sockfd.is_none(),
        ping_interval: args.ping_interval.into(),
    };

    let mut opts = config.proxy_opts(args.sockfd, &args.config);
    let mut proxy = JunosProxy::new(Arc::new(TcpTransportConnector::new()));

    keepalive::run(&mut proxy, &mut opts, keepalive).await?;

    info!("Proxy {} stopped", opts.id);
    Ok(())
}
