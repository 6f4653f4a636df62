//! Process-level wiring: pumps datagrams between a [`Substrate`], the
//! [`Daemon`] supervisor, and a per-peer TAP device, invoking up/down
//! hooks as sessions come and go.
//!
//! The central loop here generalizes `server/server.rs`'s accept-and-
//! dispatch shape and `client/device.rs`'s device-pump task to a single
//! function usable from both binaries: a server substrate multiplexes
//! many remote addresses over one socket, a client substrate talks to
//! one fixed remote, but both reduce to the same
//! `(addr, bytes) -> Dispatch` loop.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::identity::conf::load_peers_dir;
use crate::session::{Daemon, Dispatch};
use crate::substrate::Substrate;
use crate::tap::{self, TapConfig, TapDevice};

/// Periodically re-scan `peers_dir`, evicting removed peers and
/// picking up added ones, the way the teacher's config watcher
/// reloads its routes file on a fixed interval.
pub async fn run_identity_refresh(daemon: Arc<Daemon>, peers_dir: PathBuf, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; peers are already loaded at startup.

    loop {
        ticker.tick().await;
        match load_peers_dir(&peers_dir) {
            Ok(peers) => {
                tracing::info!(count = peers.len(), "reloaded peers directory");
                daemon.identities.replace_all(peers);
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to reload peers directory, keeping previous table");
            }
        }
    }
}

pub struct RuntimeConfig {
    pub mtu: usize,
    pub timeout: Duration,
    pub up_hook: Option<String>,
    pub down_hook: Option<String>,
    /// How often the idle-GC/heartbeat sweep runs.
    pub gc_interval: Duration,
}

struct PeerRuntime {
    payload_tx: mpsc::Sender<Vec<u8>>,
    down_hook: Option<String>,
    iface: String,
    task: JoinHandle<()>,
}

/// Drive one substrate until it errors out. Spawns and tears down a
/// TAP device + hook pair per peer address as sessions establish and
/// go idle.
pub async fn run(daemon: Arc<Daemon>, substrate: Arc<dyn Substrate>, config: RuntimeConfig) -> Result<()> {
    let peers: Arc<Mutex<HashMap<SocketAddr, PeerRuntime>>> = Arc::new(Mutex::new(HashMap::new()));
    let mut buf = vec![0u8; config.mtu + 256];
    let mut gc_ticker = tokio::time::interval(config.gc_interval);

    loop {
        tokio::select! {
            received = substrate.recv_from(&mut buf) => {
                let (n, addr) = received?;
                let data = buf[..n].to_vec();
                handle_datagram(&daemon, &substrate, &peers, &config, addr, data).await;
            }
            _ = gc_ticker.tick() => {
                for addr in daemon.purge_idle(config.timeout).await {
                    teardown_peer(&peers, addr).await;
                }
                rekey_overdue_sessions(&daemon, &substrate).await;
            }
        }
    }
}

/// Start a fresh handshake for each session past its byte budget, per
/// the rekey trigger in the transport layer. Only the side holding a
/// signing key (the client) can initiate; a responder-side session
/// just waits to be rekeyed by its peer.
async fn rekey_overdue_sessions(daemon: &Arc<Daemon>, substrate: &Arc<dyn Substrate>) {
    for addr in daemon.sessions_needing_rekey() {
        let Some(conf) = daemon.peer_config_for(&addr) else {
            continue;
        };
        if conf.signing_key.is_none() {
            continue;
        }
        tracing::info!(%addr, peer_id = %conf.id, "session byte budget exceeded, starting rekey");
        let msg1 = daemon.start_handshake(addr, conf);
        if let Err(e) = substrate.send_to(&msg1, addr).await {
            tracing::warn!(%addr, error = %e, "failed to send rekey handshake");
        }
    }
}

async fn handle_datagram(
    daemon: &Arc<Daemon>,
    substrate: &Arc<dyn Substrate>,
    peers: &Arc<Mutex<HashMap<SocketAddr, PeerRuntime>>>,
    config: &RuntimeConfig,
    addr: SocketAddr,
    data: Vec<u8>,
) {
    match daemon.dispatch(addr, &data).await {
        Dispatch::Reply(bytes) => {
            if let Err(e) = substrate.send_to(&bytes, addr).await {
                tracing::warn!(%addr, error = %e, "failed to send handshake reply");
            }
            ensure_peer_runtime(daemon, substrate, peers, config, addr).await;
        }
        Dispatch::Payload(payload) => {
            ensure_peer_runtime(daemon, substrate, peers, config, addr).await;
            let tx = peers.lock().unwrap_or_else(|e| e.into_inner()).get(&addr).map(|p| p.payload_tx.clone());
            if let Some(tx) = tx {
                let _ = tx.send(payload).await;
            }
        }
        Dispatch::Heartbeat | Dispatch::None => {}
    }
}

/// Spawn a TAP device and pump task for `addr` the first time its
/// session shows up; a no-op for every later datagram from the same peer.
async fn ensure_peer_runtime(
    daemon: &Arc<Daemon>,
    substrate: &Arc<dyn Substrate>,
    peers: &Arc<Mutex<HashMap<SocketAddr, PeerRuntime>>>,
    config: &RuntimeConfig,
    addr: SocketAddr,
) {
    if peers.lock().unwrap_or_else(|e| e.into_inner()).contains_key(&addr) {
        return;
    }
    let Some(session) = daemon.session_for(&addr) else {
        return;
    };

    let (device, iface) = match TapDevice::create(TapConfig { mtu: config.mtu }).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to create tap device for new session");
            return;
        }
    };

    if let Some(path) = &config.up_hook {
        tap::run_up_hook(path, &iface).await;
    }

    let (payload_tx, payload_rx) = mpsc::channel(1024);
    let task = tokio::spawn(run_peer_pump(session, substrate.clone(), addr, device, payload_rx));

    peers.lock().unwrap_or_else(|e| e.into_inner()).insert(
        addr,
        PeerRuntime {
            payload_tx,
            down_hook: config.down_hook.clone(),
            iface,
            task,
        },
    );
}

async fn teardown_peer(peers: &Arc<Mutex<HashMap<SocketAddr, PeerRuntime>>>, addr: SocketAddr) {
    let removed = peers.lock().unwrap_or_else(|e| e.into_inner()).remove(&addr);
    if let Some(runtime) = removed {
        runtime.task.abort();
        if let Some(path) = &runtime.down_hook {
            tap::run_down_hook(path, &runtime.iface).await;
        }
    }
}

/// Per-peer pump: device -> session -> substrate, and the decrypted
/// inbound payloads handed down from the central dispatch loop ->
/// device. Also drives the heartbeat clock while the device is idle.
async fn run_peer_pump(
    session: Arc<crate::transport::Session>,
    substrate: Arc<dyn Substrate>,
    addr: SocketAddr,
    mut device: TapDevice,
    mut payload_rx: mpsc::Receiver<Vec<u8>>,
) {
    let mut heartbeat = tokio::time::interval(session.timeout);

    loop {
        tokio::select! {
            frame = device.recv() => {
                match frame {
                    Some(frame) => {
                        if let Some(wire) = session.eth_process(&frame).await
                            && let Err(e) = substrate.send_to(&wire, addr).await {
                            tracing::warn!(%addr, error = %e, "failed to send data frame");
                        }
                    }
                    None => return,
                }
            }
            payload = payload_rx.recv() => {
                match payload {
                    Some(payload) => {
                        if let Err(e) = device.send(payload).await {
                            tracing::warn!(%addr, error = %e, "failed to write tap device");
                        }
                    }
                    None => return,
                }
            }
            _ = heartbeat.tick() => {
                if let Some(wire) = session.eth_process(&[]).await
                    && let Err(e) = substrate.send_to(&wire, addr).await {
                    tracing::warn!(%addr, error = %e, "failed to send heartbeat");
                }
            }
        }
    }
}
