//! Stats HTTP endpoint, dumping the live peer set as JSON.
//!
//! Grounded on `client/http/server.rs`/`handlers.rs`'s axum `Router`
//! plus `/status` route shape; the response model replaces that file's
//! relay/P2P/cluster fields with GoVPN's per-session counters (bytes,
//! frames, replay/auth rejects, heartbeats) sourced from
//! `transport::Stats`, matching the wire intent of `stats.go`.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::error::Result;
use crate::session::Daemon;

#[derive(Serialize)]
struct PeerStatus {
    peer_id: String,
    addr: String,
    role: &'static str,
    established_secs_ago: u64,
    bytes_in: u64,
    bytes_out: u64,
    bytes_payload_in: u64,
    bytes_payload_out: u64,
    frames_in: u64,
    frames_out: u64,
    frames_unauth: u64,
    frames_dup: u64,
    heartbeat_recv: u64,
    heartbeat_sent: u64,
}

#[derive(Serialize)]
struct StatusResponse {
    peers: Vec<PeerStatus>,
}

#[derive(Clone)]
struct AppState {
    daemon: Arc<Daemon>,
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let peers = state
        .daemon
        .sessions_snapshot()
        .into_iter()
        .map(|session| PeerStatus {
            peer_id: session.peer_id.to_string(),
            addr: session.remote_addr.to_string(),
            role: match session.role {
                crate::transport::Role::Initiator => "initiator",
                crate::transport::Role::Responder => "responder",
            },
            established_secs_ago: session.established.elapsed().as_secs(),
            bytes_in: session.stats.bytes_in.load(Ordering::Relaxed),
            bytes_out: session.stats.bytes_out.load(Ordering::Relaxed),
            bytes_payload_in: session.stats.bytes_payload_in.load(Ordering::Relaxed),
            bytes_payload_out: session.stats.bytes_payload_out.load(Ordering::Relaxed),
            frames_in: session.stats.frames_in.load(Ordering::Relaxed),
            frames_out: session.stats.frames_out.load(Ordering::Relaxed),
            frames_unauth: session.stats.frames_unauth.load(Ordering::Relaxed),
            frames_dup: session.stats.frames_dup.load(Ordering::Relaxed),
            heartbeat_recv: session.stats.heartbeat_recv.load(Ordering::Relaxed),
            heartbeat_sent: session.stats.heartbeat_sent.load(Ordering::Relaxed),
        })
        .collect();

    Json(StatusResponse { peers })
}

async fn health() -> &'static str {
    "ok"
}

/// Serve `/status` and `/health` on `addr` until the process exits.
pub async fn serve(addr: SocketAddr, daemon: Arc<Daemon>) -> Result<()> {
    let app = Router::new()
        .route("/status", get(status))
        .route("/health", get(health))
        .with_state(AppState { daemon });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "stats endpoint listening");
    axum::serve(listener, app).await?;
    Ok(())
}
