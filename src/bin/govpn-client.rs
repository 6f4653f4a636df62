//! Client entry point: dials a single remote peer, runs the
//! initiator side of the handshake, then bridges the session to a
//! local TAP device.
//!
//! Grounded on `client/main.rs`'s parse-args/connect/run shape.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use govpn::config::{self, Protocol};
use govpn::error::GovpnError;
use govpn::identity::conf::with_signing_key;
use govpn::identity::{PeerConfigRaw, PeerId};
use govpn::runtime::{self, RuntimeConfig};
use govpn::session::{Daemon, Dispatch};
use govpn::substrate::tcp::TcpSubstrate;
use govpn::substrate::udp::UdpSubstrate;
use govpn::substrate::Substrate;

#[derive(Parser, Debug)]
#[command(author, version, about = "GoVPN client", long_about = None)]
struct Args {
    /// Path to the client's TOML configuration file.
    #[arg(short, long, default_value = "govpn-client.toml")]
    config: String,

    /// This connection's peer id, hex-encoded.
    #[arg(long)]
    peer_id: String,

    /// Path to the single peer record (verifier + timeout/noise/etc.)
    /// describing this connection, loaded the same way the server
    /// loads one file per entry in its peers directory.
    #[arg(long)]
    peer_file: String,

    /// Shared password this connection authenticates with. Read from
    /// the environment so it never appears in `ps`.
    #[arg(long, env = "GOVPN_PASSWORD")]
    password: String,
}

#[tokio::main]
async fn main() -> govpn::Result<()> {
    let args = Args::parse();
    govpn::telemetry::init()?;

    let conf = config::load(&args.config)?;
    let remote: SocketAddr = conf
        .addr
        .parse()
        .map_err(|e| GovpnError::ConfigError(format!("bad remote address: {e}")))?;

    let peer_id = PeerId::from_hex(&args.peer_id)?;
    let raw_text = std::fs::read_to_string(&args.peer_file).map_err(GovpnError::Io)?;
    let raw: PeerConfigRaw =
        toml::from_str(&raw_text).map_err(|e| GovpnError::ConfigError(format!("{}: {e}", args.peer_file)))?;
    let peer_conf = govpn::identity::conf::peer_config_from_raw(peer_id, &args.peer_file, raw)?;
    let peer_conf = with_signing_key(peer_conf, &args.password);

    let daemon = Arc::new(Daemon::new(conf.protocol == Protocol::Udp));
    daemon.identities.replace_all(vec![peer_conf.clone()]);

    let substrate: Arc<dyn Substrate> = match conf.protocol {
        Protocol::Udp => Arc::new(UdpSubstrate::connect(remote).await?),
        Protocol::Tcp => Arc::new(TcpSubstrate::connect(remote).await?),
    };

    let mut buf = vec![0u8; peer_conf.mtu + 256];
    let msg1 = daemon.start_handshake(remote, peer_conf.clone());
    substrate.send_to(&msg1, remote).await?;

    loop {
        let (n, addr) = substrate.recv_from(&mut buf).await?;
        match daemon.client_on_message(addr, &buf[..n]) {
            Some(Dispatch::Reply(reply)) => {
                substrate.send_to(&reply, remote).await?;
            }
            Some(_) => break,
            None => {
                tracing::warn!(%addr, "datagram outside of an in-progress handshake, dropping");
            }
        }
        if daemon.session_for(&remote).is_some() {
            break;
        }
    }

    tracing::info!(peer_id = %peer_id, %remote, "handshake established");

    let runtime_config = RuntimeConfig {
        mtu: conf.mtu,
        timeout: conf.timeout(),
        up_hook: conf.up_hook.clone(),
        down_hook: conf.down_hook.clone(),
        gc_interval: conf.timeout() / 4,
    };
    runtime::run(daemon, substrate, runtime_config).await
}
