//! The session supervisor: three maps tying identity, handshake state
//! and established sessions together, plus the dispatch and heartbeat
//! logic that drives them.
//!
//! Grounded on the server-side dispatch described in spec §4.4 and on
//! the teacher's `ConnectionManager`/`ClientManager` for the
//! `RwLock<HashMap<..>>` idiom (poisoned-lock recovery via
//! `unwrap_or_else(|e| e.into_inner())`).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::GovpnError;
use crate::handshake::{Handshake, HandshakeOutcome};
use crate::identity::{IdentityTable, PeerConfig, PeerId};
use crate::transport::Session;

/// Result of handing one inbound datagram to the supervisor.
pub enum Dispatch {
    /// Deliver this decrypted payload to the tunnel device.
    Payload(Vec<u8>),
    /// An accepted heartbeat; nothing to deliver.
    Heartbeat,
    /// Send this datagram back to `addr` over the substrate.
    Reply(Vec<u8>),
    /// The datagram was handled internally (e.g. dropped); no action.
    None,
}

/// Live per-peer state shared between the datagram dispatch loop and
/// the periodic heartbeat/idle-GC task.
pub struct Daemon {
    pub identities: IdentityTable,
    handshakes: RwLock<HashMap<SocketAddr, Handshake>>,
    sessions: RwLock<HashMap<SocketAddr, Arc<Session>>>,
    peer_by_identity: RwLock<HashMap<PeerId, SocketAddr>>,
    /// Whether this substrate permits reordering (datagram) or
    /// requires strict in-order delivery (stream).
    reorderable: bool,
}

impl Daemon {
    pub fn new(reorderable: bool) -> Self {
        Self {
            identities: IdentityTable::new(),
            handshakes: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            peer_by_identity: RwLock::new(HashMap::new()),
            reorderable,
        }
    }

    pub fn session_for(&self, addr: &SocketAddr) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(addr)
            .cloned()
    }

    /// Server-side dispatch of one inbound datagram, per spec §4.4.
    pub async fn dispatch(&self, addr: SocketAddr, data: &[u8]) -> Dispatch {
        if let Some(session) = self.session_for(&addr) {
            match session.pkt_process(data).await {
                Ok(Some(payload)) => return Dispatch::Payload(payload),
                Ok(None) => return Dispatch::Heartbeat,
                Err(GovpnError::AuthenticationFailed { .. }) | Err(GovpnError::MalformedDatagram { .. }) => {
                    // Fall through: treat as a possible handshake restart
                    // (peer changed address, or a rekey's short msg4 leg
                    // arriving while the old session is still installed).
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "dropping transport frame");
                    return Dispatch::None;
                }
            }
        }

        let Some(peer_id) = self.identities.find(data) else {
            tracing::warn!(%addr, "unknown identity, dropping handshake datagram");
            return Dispatch::None;
        };

        let mut handshakes = self.handshakes.write().unwrap_or_else(|e| e.into_inner());
        if !handshakes.contains_key(&addr) {
            let Some(conf) = self.identities.get(&peer_id) else {
                return Dispatch::None;
            };
            handshakes.insert(addr, Handshake::new_responder(addr, conf));
        }
        let hs = handshakes.get_mut(&addr).expect("just inserted");

        match hs.on_message(data) {
            Ok(HandshakeOutcome::Reply(reply)) => Dispatch::Reply(reply),
            Ok(HandshakeOutcome::Established(session)) => {
                let final_reply = hs.take_final_reply();
                handshakes.remove(&addr);
                drop(handshakes);
                self.install_session(peer_id, addr, session);
                Dispatch::Reply(final_reply)
            }
            Err(e) => {
                tracing::warn!(%addr, error = %e, "handshake failed");
                handshakes.remove(&addr);
                Dispatch::None
            }
        }
    }

    /// Install a newly-established session, migrating the TAP binding
    /// away from any prior address this identity held (address change
    /// across a rehandshake), per spec §4.4 step 3.
    fn install_session(&self, peer_id: PeerId, addr: SocketAddr, session: Session) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let mut by_identity = self.peer_by_identity.write().unwrap_or_else(|e| e.into_inner());

        if let Some(old_addr) = by_identity.insert(peer_id, addr) {
            if old_addr != addr {
                sessions.remove(&old_addr);
                tracing::info!(%peer_id, %old_addr, %addr, "peer migrated address, old session terminated");
            }
        }
        sessions.insert(addr, Arc::new(session));
    }

    /// Start a fresh handshake as the initiator (client mode, or a
    /// supervisor-triggered rekey).
    pub fn start_handshake(&self, addr: SocketAddr, conf: PeerConfig) -> Vec<u8> {
        let (hs, msg1) = Handshake::start(addr, conf);
        self.handshakes.write().unwrap_or_else(|e| e.into_inner()).insert(addr, hs);
        msg1
    }

    /// Client-side: feed a received datagram into the single
    /// in-progress (or just-established) handshake for `addr`.
    pub fn client_on_message(&self, addr: SocketAddr, data: &[u8]) -> Option<Dispatch> {
        let mut handshakes = self.handshakes.write().unwrap_or_else(|e| e.into_inner());
        let hs = handshakes.get_mut(&addr)?;
        match hs.on_message(data) {
            Ok(HandshakeOutcome::Reply(reply)) => Some(Dispatch::Reply(reply)),
            Ok(HandshakeOutcome::Established(session)) => {
                handshakes.remove(&addr);
                drop(handshakes);
                let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
                sessions.insert(addr, Arc::new(session));
                Some(Dispatch::None)
            }
            Err(e) => {
                tracing::warn!(%addr, error = %e, "handshake failed");
                handshakes.remove(&addr);
                Some(Dispatch::None)
            }
        }
    }

    /// Snapshot of every live session, for the stats endpoint.
    pub fn sessions_snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Sessions whose accumulated byte budget requires a rekey.
    pub fn sessions_needing_rekey(&self) -> Vec<SocketAddr> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, session)| session.needs_rekey())
            .map(|(addr, _)| *addr)
            .collect()
    }

    /// The identity config backing the session at `addr`, if any. Used
    /// by the supervisor-triggered rekey: only a peer whose config
    /// carries a signing key (the client side) can start a fresh
    /// handshake on its own initiative.
    pub fn peer_config_for(&self, addr: &SocketAddr) -> Option<PeerConfig> {
        let peer_id = self.session_for(addr)?.peer_id;
        self.identities.get(&peer_id)
    }

    /// Periodic heartbeat/idle-GC pass: purge handshakes and sessions
    /// whose last activity predates `timeout`. Returns the addresses
    /// of sessions that were purged, so the caller can invoke the
    /// down-hook for each.
    pub async fn purge_idle(&self, timeout: Duration) -> Vec<SocketAddr> {
        {
            let mut handshakes = self.handshakes.write().unwrap_or_else(|e| e.into_inner());
            handshakes.retain(|_, hs| !hs.is_idle());
        }

        let mut purged = Vec::new();
        let candidates: Vec<SocketAddr> = self
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();

        for addr in candidates {
            let idle = match self.session_for(&addr) {
                Some(session) => session.last_ping().await.elapsed() > timeout,
                None => false,
            };
            if idle {
                purged.push(addr);
            }
        }

        if !purged.is_empty() {
            let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
            let mut by_identity = self.peer_by_identity.write().unwrap_or_else(|e| e.into_inner());
            for addr in &purged {
                if let Some(session) = sessions.remove(addr) {
                    by_identity.retain(|_, a| a != addr);
                    tracing::info!(%addr, peer_id = %session.peer_id, "session idle, terminated");
                }
            }
        }

        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{PeerConfig, MTU_DEFAULT};
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration as StdDuration;

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 2000)
    }

    fn peer_config() -> PeerConfig {
        let id = PeerId::from_bytes([2u8; 16]);
        let signing_key = crate::crypto::verifier::derive_signing_key(&id, "pw");
        PeerConfig {
            id,
            name: "p".into(),
            up: None,
            down: None,
            timeout: StdDuration::from_secs(60),
            noise: false,
            encless: false,
            cpr: None,
            mtu: MTU_DEFAULT,
            verifying_key: signing_key.verifying_key(),
            signing_key: Some(signing_key),
        }
    }

    #[tokio::test]
    async fn full_server_side_handshake_via_dispatch() {
        let daemon = Daemon::new(true);
        let conf = peer_config();
        daemon.identities.replace_all(vec![conf.clone()]);

        let (mut initiator, msg1) = Handshake::start(addr(), conf);
        let reply1 = match daemon.dispatch(addr(), &msg1).await {
            Dispatch::Reply(r) => r,
            _ => panic!("expected msg2 reply"),
        };
        let msg3 = match initiator.on_message(&reply1).unwrap() {
            HandshakeOutcome::Reply(m) => m,
            _ => panic!(),
        };
        let reply2 = match daemon.dispatch(addr(), &msg3).await {
            Dispatch::Reply(r) => r,
            _ => panic!("expected msg4 reply"),
        };
        let established = initiator.on_message(&reply2).unwrap();
        assert!(matches!(established, HandshakeOutcome::Established(_)));
        assert!(daemon.session_for(&addr()).is_some());
    }
}
