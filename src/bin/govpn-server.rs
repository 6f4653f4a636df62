//! Server entry point: accepts handshakes from any peer listed in the
//! peers directory and bridges each established session to its own
//! TAP device.
//!
//! Grounded on `server/main.rs`'s load-config/init-tracing/run shape.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use govpn::config::{self, Protocol};
use govpn::identity::conf::load_peers_dir;
use govpn::identity::IDENTITY_REFRESH_SECS;
use govpn::runtime::{self, RuntimeConfig};
use govpn::session::Daemon;
use govpn::substrate::tcp::TcpSubstrate;
use govpn::substrate::udp::UdpSubstrate;
use govpn::substrate::Substrate;

#[derive(Parser, Debug)]
#[command(author, version, about = "GoVPN server", long_about = None)]
struct Args {
    /// Path to the server's TOML configuration file.
    #[arg(short, long, default_value = "govpn-server.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> govpn::Result<()> {
    let args = Args::parse();
    govpn::telemetry::init()?;

    let conf = config::load(&args.config)?;
    let addr: SocketAddr = conf
        .addr
        .parse()
        .map_err(|e| govpn::GovpnError::ConfigError(format!("bad listen address: {e}")))?;

    let daemon = Arc::new(Daemon::new(conf.protocol == Protocol::Udp));
    let peers = load_peers_dir(&conf.peers_dir)?;
    tracing::info!(count = peers.len(), "loaded peer records");
    daemon.identities.replace_all(peers);

    {
        let daemon = daemon.clone();
        let peers_dir = conf.peers_dir.clone();
        tokio::spawn(runtime::run_identity_refresh(
            daemon,
            peers_dir,
            std::time::Duration::from_secs(IDENTITY_REFRESH_SECS),
        ));
    }

    if let Some(stats_addr) = &conf.stats_addr {
        let stats_addr: SocketAddr = stats_addr
            .parse()
            .map_err(|e| govpn::GovpnError::ConfigError(format!("bad stats address: {e}")))?;
        let daemon = daemon.clone();
        tokio::spawn(async move {
            if let Err(e) = govpn::stats::serve(stats_addr, daemon).await {
                tracing::error!(error = %e, "stats endpoint exited");
            }
        });
    }

    let runtime_config = RuntimeConfig {
        mtu: conf.mtu,
        timeout: conf.timeout(),
        up_hook: conf.up_hook.clone(),
        down_hook: conf.down_hook.clone(),
        gc_interval: conf.timeout() / 4,
    };

    match conf.protocol {
        Protocol::Udp => {
            let substrate: Arc<dyn Substrate> = Arc::new(UdpSubstrate::bind(addr).await?);
            runtime::run(daemon, substrate, runtime_config).await
        }
        Protocol::Tcp => run_tcp_server(addr, daemon, runtime_config).await,
    }
}

/// TCP has no shared socket to multiplex peers over: each accepted
/// stream gets its own substrate and its own copy of the dispatch loop.
async fn run_tcp_server(addr: SocketAddr, daemon: Arc<Daemon>, runtime_config: RuntimeConfig) -> govpn::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "tcp server listening");

    loop {
        let substrate = TcpSubstrate::accept_one(&listener).await?;
        let daemon = daemon.clone();
        let mtu = runtime_config.mtu;
        let timeout = runtime_config.timeout;
        let up_hook = runtime_config.up_hook.clone();
        let down_hook = runtime_config.down_hook.clone();
        let gc_interval = runtime_config.gc_interval;

        tokio::spawn(async move {
            let substrate: Arc<dyn Substrate> = Arc::new(substrate);
            let config = RuntimeConfig {
                mtu,
                timeout,
                up_hook,
                down_hook,
                gc_interval,
            };
            if let Err(e) = runtime::run(daemon, substrate, config).await {
                tracing::warn!(error = %e, "peer connection closed");
            }
        });
    }
}
