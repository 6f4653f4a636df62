//! The per-packet transport engine: an established session's
//! encrypt/authenticate/replay-check/rate-shape pipeline.
//!
//! Grounded on `peer.go`'s `Peer`/`EthProcess`/`PktProcess`, adapted to
//! the padded (`0x80`-terminator) plaintext body format rather than the
//! original's 16-bit length prefix (an Open Question resolution), and
//! extended with the Encless AONT alternative described in spec §4.3.

pub mod cpr;
pub mod replay;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rand_core::{OsRng, RngCore};
use tokio::sync::Mutex;

use crate::crypto::aont;
use crate::crypto::nonce_cipher::NonceCipher;
use crate::crypto::stream::{poly1305_tag, poly1305_verify, salsa20_xor, TAG_SIZE};
use crate::error::{GovpnError, Result};
use crate::identity::{PeerConfig, PeerId};

pub const NONCE_SIZE: usize = 8;
/// Maximum bytes a single session key may encrypt before a rekey is
/// required (`MaxBytesPerKey` in `peer.go`).
pub const MAX_BYTES_PER_KEY: u64 = 1 << 32;
/// Heartbeat period is `Timeout / TimeoutHeartbeat` unless CPR sets it.
pub const TIMEOUT_HEARTBEAT_DIVISOR: u32 = 4;

const PAD_TERMINATOR: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    /// First value of this side's outbound nonce sequence. Initiator
    /// uses odd nonces starting at 1, responder even nonces starting
    /// at 2 — see spec invariants in §3. Every later send bumps by 2.
    fn first_nonce_out(self) -> u64 {
        match self {
            Role::Initiator => 1,
            Role::Responder => 2,
        }
    }

    /// First nonce this side expects to *receive* from its peer.
    fn first_nonce_expect(self) -> u64 {
        match self {
            Role::Initiator => 2,
            Role::Responder => 1,
        }
    }
}

/// Either a sliding reorderable window (datagram substrates) or a
/// strict in-order window (stream substrates).
pub enum ReplayMode {
    Reorderable(replay::ReorderableWindow),
    Strict(replay::StrictWindow),
}

impl ReplayMode {
    fn check(&mut self, nonce: u64) -> replay::ReplayVerdict {
        match self {
            ReplayMode::Reorderable(w) => w.check(nonce),
            ReplayMode::Strict(w) => w.check(nonce),
        }
    }
}

/// Per-session traffic counters, visible on the stats endpoint.
#[derive(Default)]
pub struct Stats {
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
    pub bytes_payload_in: AtomicU64,
    pub bytes_payload_out: AtomicU64,
    pub frames_in: AtomicU64,
    pub frames_out: AtomicU64,
    pub frames_unauth: AtomicU64,
    pub frames_dup: AtomicU64,
    pub heartbeat_recv: AtomicU64,
    pub heartbeat_sent: AtomicU64,
}

impl Stats {
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed) + self.bytes_out.load(Ordering::Relaxed)
    }
}

struct TransmitState {
    nonce_out: u64,
    started: bool,
    last_sent: Instant,
}

struct ReceiveState {
    replay: ReplayMode,
    last_ping: Instant,
}

/// An established, authenticated session. Two independent mutexes —
/// one for the transmit path, one for the receive path — so a
/// session's send and receive directions never contend, per the
/// concurrency model.
pub struct Session {
    pub role: Role,
    pub peer_id: PeerId,
    pub remote_addr: SocketAddr,
    pub established: Instant,
    pub noise: bool,
    pub encless: bool,
    pub mtu: usize,
    pub timeout: Duration,
    pub cpr_cycle: Option<Duration>,
    session_key: [u8; 32],
    nonce_cipher: NonceCipher,
    transmit: Mutex<TransmitState>,
    receive: Mutex<ReceiveState>,
    pub stats: Stats,
}

impl Session {
    /// Build a freshly-established session from the handshake's
    /// derived key material, mirroring `newPeer` in `peer.go`.
    pub fn new(role: Role, remote_addr: SocketAddr, conf: &PeerConfig, session_key: [u8; 32], reorderable: bool) -> Self {
        let now = Instant::now();
        let cpr_cycle = conf.cpr.and_then(|rate| cpr::cycle_duration(rate, conf.mtu));
        let noise = conf.noise || cpr_cycle.is_some() || conf.encless;
        let timeout = if cpr_cycle.is_some() {
            cpr_cycle.unwrap()
        } else {
            conf.timeout / TIMEOUT_HEARTBEAT_DIVISOR
        };
        let replay = if reorderable {
            ReplayMode::Reorderable(replay::ReorderableWindow::new())
        } else {
            ReplayMode::Strict(replay::StrictWindow::new(role.first_nonce_expect()))
        };

        Self {
            role,
            peer_id: conf.id,
            remote_addr,
            established: now,
            noise,
            encless: conf.encless,
            mtu: conf.mtu,
            timeout,
            cpr_cycle,
            nonce_cipher: NonceCipher::from_session_key(&session_key),
            session_key,
            transmit: Mutex::new(TransmitState {
                nonce_out: role.first_nonce_out(),
                started: false,
                last_sent: now,
            }),
            receive: Mutex::new(ReceiveState {
                replay,
                last_ping: now,
            }),
            stats: Stats::default(),
        }
    }

    fn plaintext_body_len(&self, payload_len: usize) -> usize {
        if self.noise {
            let overhead = if self.encless {
                NONCE_SIZE + aont::H_SIZE + aont::R_SIZE
            } else {
                TAG_SIZE + NONCE_SIZE
            };
            self.mtu - overhead
        } else {
            payload_len + 1
        }
    }

    /// Encode `payload` (empty slice for a heartbeat) into the
    /// plaintext body: payload followed by the `0x80` terminator, then
    /// zero padding out to the body's fixed length.
    fn encode_body(&self, payload: &[u8]) -> Vec<u8> {
        let len = self.plaintext_body_len(payload.len());
        let mut body = vec![0u8; len];
        body[..payload.len()].copy_from_slice(payload);
        body[payload.len()] = PAD_TERMINATOR;
        body
    }

    /// Recover the payload from a decoded plaintext body: scan back
    /// from the end for the `0x80` terminator, verifying every byte
    /// after it is zero.
    fn decode_body(&self, body: &[u8], addr: SocketAddr) -> Result<&[u8]> {
        let terminator = body
            .iter()
            .rposition(|&b| b != 0)
            .ok_or(GovpnError::MalformedDatagram {
                addr: Some(addr),
                reason: "body has no terminator",
            })?;
        if body[terminator] != PAD_TERMINATOR {
            return Err(GovpnError::MalformedDatagram {
                addr: Some(addr),
                reason: "body terminator is not 0x80",
            });
        }
        Ok(&body[..terminator])
    }

    /// Whether a heartbeat should be emitted right now given the time
    /// of the last send.
    fn heartbeat_due(&self, last_sent: Instant, now: Instant) -> bool {
        now.duration_since(last_sent) >= self.timeout
    }

    /// Encrypt and frame one outbound Ethernet payload (or an empty
    /// slice to force a heartbeat), enforcing CPR pacing. Returns the
    /// wire frame ready to hand to the substrate, or `None` when a
    /// zero-length call arrives but no heartbeat is currently due.
    pub async fn eth_process(&self, payload: &[u8]) -> Option<Vec<u8>> {
        let mut tx = self.transmit.lock().await;
        let now = Instant::now();

        if payload.is_empty() && !self.heartbeat_due(tx.last_sent, now) {
            return None;
        }

        if tx.started {
            tx.nonce_out += 2;
        }
        tx.started = true;
        let wire_nonce = self.nonce_cipher.encrypt_counter(tx.nonce_out);
        let body = self.encode_body(payload);

        let frame = if self.encless {
            let mut r = [0u8; aont::R_SIZE];
            OsRng.fill_bytes(&mut r);
            let ciphertext = aont::encode(&r, &body, &wire_nonce);
            let mut frame = ciphertext;
            frame.extend_from_slice(&wire_nonce);
            frame
        } else {
            let mut keystream_input = vec![0u8; 32 + body.len()];
            keystream_input[32..].copy_from_slice(&body);
            salsa20_xor(&mut keystream_input, &wire_nonce, &self.session_key);
            let poly_key: [u8; 32] = keystream_input[..32].try_into().unwrap();
            let ciphertext_body = &keystream_input[32..];

            let mut signed = Vec::with_capacity(ciphertext_body.len() + NONCE_SIZE);
            signed.extend_from_slice(ciphertext_body);
            signed.extend_from_slice(&wire_nonce);
            let tag = poly1305_tag(&signed, &poly_key);

            let mut frame = Vec::with_capacity(TAG_SIZE + signed.len());
            frame.extend_from_slice(&tag);
            frame.extend_from_slice(&signed);
            frame
        };

        self.stats.bytes_out.fetch_add(frame.len() as u64, Ordering::Relaxed);
        self.stats.frames_out.fetch_add(1, Ordering::Relaxed);
        if payload.is_empty() {
            self.stats.heartbeat_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.bytes_payload_out.fetch_add(payload.len() as u64, Ordering::Relaxed);
        }

        if let Some(cycle) = self.cpr_cycle {
            let target = tx.last_sent + cycle;
            if target > now {
                tokio::time::sleep(target - now).await;
                tx.last_sent = target;
            } else {
                tx.last_sent = now;
            }
        } else {
            tx.last_sent = now;
        }

        Some(frame)
    }

    /// Decrypt and replay-check one inbound wire frame. Returns
    /// `Ok(Some(payload))` for a data frame, `Ok(None)` for an
    /// accepted heartbeat, and an error kind for anything rejected.
    pub async fn pkt_process(&self, data: &[u8]) -> Result<Option<Vec<u8>>> {
        let min_len = if self.encless {
            aont::H_SIZE + aont::R_SIZE + NONCE_SIZE
        } else {
            TAG_SIZE + 1 + NONCE_SIZE
        };
        if data.len() < min_len {
            return Err(GovpnError::MalformedDatagram {
                addr: Some(self.remote_addr),
                reason: "frame shorter than minimum",
            });
        }

        let wire_nonce: [u8; NONCE_SIZE] = data[data.len() - NONCE_SIZE..].try_into().unwrap();

        let body = if self.encless {
            let package = &data[..data.len() - NONCE_SIZE];
            aont::decode(package, &wire_nonce).map_err(|_| GovpnError::AuthenticationFailed {
                addr: Some(self.remote_addr),
            })?
        } else {
            let tag: [u8; TAG_SIZE] = data[..TAG_SIZE].try_into().unwrap();
            let signed = &data[TAG_SIZE..];

            let mut poly_key_buf = [0u8; 32];
            salsa20_xor(&mut poly_key_buf, &wire_nonce, &self.session_key);

            if !poly1305_verify(&tag, signed, &poly_key_buf) {
                self.stats.frames_unauth.fetch_add(1, Ordering::Relaxed);
                return Err(GovpnError::AuthenticationFailed {
                    addr: Some(self.remote_addr),
                });
            }

            let ciphertext_body = &signed[..signed.len() - NONCE_SIZE];
            let mut keystream_input = vec![0u8; 32 + ciphertext_body.len()];
            keystream_input[32..].copy_from_slice(ciphertext_body);
            salsa20_xor(&mut keystream_input, &wire_nonce, &self.session_key);
            keystream_input.split_off(32)
        };

        let counter = self.nonce_cipher.decrypt_counter(&wire_nonce);

        {
            let mut rx = self.receive.lock().await;
            if rx.replay.check(counter) == replay::ReplayVerdict::Replayed {
                self.stats.frames_dup.fetch_add(1, Ordering::Relaxed);
                return Err(GovpnError::ReplayedOrOld {
                    addr: Some(self.remote_addr),
                });
            }
            rx.last_ping = Instant::now();
        }

        self.stats.frames_in.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes_in.fetch_add(data.len() as u64, Ordering::Relaxed);

        let payload = self.decode_body(&body, self.remote_addr)?;
        if payload.is_empty() {
            self.stats.heartbeat_recv.fetch_add(1, Ordering::Relaxed);
            Ok(None)
        } else {
            self.stats.bytes_payload_in.fetch_add(payload.len() as u64, Ordering::Relaxed);
            Ok(Some(payload.to_vec()))
        }
    }

    pub async fn last_ping(&self) -> Instant {
        self.receive.lock().await.last_ping
    }

    pub fn needs_rekey(&self) -> bool {
        self.stats.bytes_transferred() >= MAX_BYTES_PER_KEY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_conf(noise: bool, encless: bool) -> PeerConfig {
        let id = crate::identity::PeerId::from_bytes([1u8; 16]);
        let signing_key = SigningKey::from_bytes(&[2u8; 32]);
        PeerConfig {
            id,
            name: "test".into(),
            up: None,
            down: None,
            timeout: Duration::from_secs(60),
            noise,
            encless,
            cpr: None,
            mtu: 1452,
            verifying_key: signing_key.verifying_key(),
            signing_key: Some(signing_key),
        }
    }

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1194)
    }

    #[tokio::test]
    async fn roundtrips_default_mode() {
        let conf = test_conf(false, false);
        let tx = Session::new(Role::Initiator, addr(), &conf, [7u8; 32], true);
        let rx = Session::new(Role::Responder, addr(), &conf, [7u8; 32], true);

        let payload = b"ethernet frame bytes".to_vec();
        let frame = tx.eth_process(&payload).await.unwrap();
        assert_eq!(frame.len(), payload.len() + 1 + NONCE_SIZE + TAG_SIZE);

        let recovered = rx.pkt_process(&frame).await.unwrap();
        assert_eq!(recovered, Some(payload));
    }

    #[tokio::test]
    async fn roundtrips_noise_mode_at_mtu() {
        let conf = test_conf(true, false);
        let tx = Session::new(Role::Initiator, addr(), &conf, [3u8; 32], true);
        let rx = Session::new(Role::Responder, addr(), &conf, [3u8; 32], true);

        let payload = b"short".to_vec();
        let frame = tx.eth_process(&payload).await.unwrap();
        assert_eq!(frame.len(), conf.mtu);

        let recovered = rx.pkt_process(&frame).await.unwrap();
        assert_eq!(recovered, Some(payload));
    }

    #[tokio::test]
    async fn roundtrips_encless_mode() {
        let conf = test_conf(true, true);
        let tx = Session::new(Role::Initiator, addr(), &conf, [9u8; 32], true);
        let rx = Session::new(Role::Responder, addr(), &conf, [9u8; 32], true);

        let payload = b"encless payload".to_vec();
        let frame = tx.eth_process(&payload).await.unwrap();
        assert_eq!(frame.len(), conf.mtu);

        let recovered = rx.pkt_process(&frame).await.unwrap();
        assert_eq!(recovered, Some(payload));
    }

    #[tokio::test]
    async fn tampered_frame_fails_authentication() {
        let conf = test_conf(false, false);
        let tx = Session::new(Role::Initiator, addr(), &conf, [5u8; 32], true);
        let rx = Session::new(Role::Responder, addr(), &conf, [5u8; 32], true);

        let mut frame = tx.eth_process(b"data").await.unwrap();
        frame[0] ^= 0xff;
        assert!(matches!(
            rx.pkt_process(&frame).await,
            Err(GovpnError::AuthenticationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn replayed_frame_is_rejected() {
        let conf = test_conf(false, false);
        let tx = Session::new(Role::Initiator, addr(), &conf, [5u8; 32], true);
        let rx = Session::new(Role::Responder, addr(), &conf, [5u8; 32], true);

        let frame = tx.eth_process(b"data").await.unwrap();
        assert!(rx.pkt_process(&frame).await.unwrap().is_some());
        assert!(matches!(
            rx.pkt_process(&frame).await,
            Err(GovpnError::ReplayedOrOld { .. })
        ));
    }

    #[tokio::test]
    async fn heartbeat_is_suppressed_until_due() {
        let mut conf = test_conf(false, false);
        conf.timeout = Duration::from_secs(3600);
        let tx = Session::new(Role::Initiator, addr(), &conf, [5u8; 32], true);
        assert!(tx.eth_process(&[]).await.is_none());
    }
}
