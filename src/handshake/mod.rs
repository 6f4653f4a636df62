//! The four-message authenticated Diffie-Hellman key exchange.
//!
//! Grounded on `handshake.go`'s `Handshake`/`HandshakeStart`/`Server`/
//! `Client`. The per-address state machine here uses an explicit
//! [`Stage`] enum rather than the original's nil-field sniffing, but
//! every message's byte layout and the signature/Rs-echo checks are
//! unchanged.

pub mod message;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use ed25519_dalek::{Signature, Signer, Verifier, SIGNATURE_LENGTH};
use rand_core::{OsRng, RngCore};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::crypto::dh::DhKeypair;
use crate::crypto::nonce_cipher::id_tag;
use crate::crypto::stream::{h_apply, salsa20_xor};
use crate::error::{GovpnError, Result};
use crate::identity::PeerConfig;
use crate::transport::{Role, Session};
use message::{R_SIZE, REPR_SIZE, S_SIZE};

/// Outcome of feeding one wire datagram to a [`Handshake`].
pub enum HandshakeOutcome {
    /// Send this datagram back to the peer; the handshake continues.
    Reply(Vec<u8>),
    /// The handshake completed; a session is ready to replace it.
    Established(Session),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    RespAwaitingMsg1,
    RespAwaitingMsg3,
    InitAwaitingMsg2,
    InitAwaitingMsg4,
}

/// Per-address in-progress AKE state. Every secret field is zeroed on
/// drop, matching `Handshake.Zero()`.
pub struct Handshake {
    pub addr: SocketAddr,
    pub role: Role,
    conf: PeerConfig,
    pub last_activity: Instant,
    dsa_pub_h: [u8; 32],
    stage: Stage,

    dh_priv: Option<DhKeypair>,
    r_nonce: Option<[u8; R_SIZE]>,
    key: Option<[u8; S_SIZE]>,
    r_server: Option<[u8; R_SIZE]>,
    r_client: Option<[u8; R_SIZE]>,
    s_server: Option<[u8; S_SIZE]>,
    s_client: Option<[u8; S_SIZE]>,

    /// The responder's message 4 is produced in the same step that
    /// establishes the session, so `on_message` has no slot left in
    /// its return value to carry it. The supervisor pulls it out with
    /// [`Handshake::take_final_reply`] right after seeing
    /// `HandshakeOutcome::Established` on the responder side.
    final_reply: Option<Vec<u8>>,
}

impl Drop for Handshake {
    fn drop(&mut self) {
        if let Some(k) = &mut self.key {
            k.zeroize();
        }
        if let Some(s) = &mut self.s_server {
            s.zeroize();
        }
        if let Some(s) = &mut self.s_client {
            s.zeroize();
        }
        if let Some(r) = &mut self.r_server {
            r.zeroize();
        }
        if let Some(r) = &mut self.r_client {
            r.zeroize();
        }
        if let Some(r) = &mut self.r_nonce {
            r.zeroize();
        }
        self.dsa_pub_h.zeroize();
    }
}

fn r_nonce_next(r_nonce: &[u8; R_SIZE], count: u64) -> [u8; R_SIZE] {
    (u64::from_be_bytes(*r_nonce) + count).to_be_bytes()
}

fn idle_timeout_exceeded(last_activity: Instant, timeout: Duration) -> bool {
    last_activity.elapsed() > timeout
}

impl Handshake {
    fn new(addr: SocketAddr, role: Role, conf: PeerConfig, stage: Stage) -> Self {
        let dsa_pub_h = h_apply(&conf.verifying_key.to_bytes());
        Self {
            addr,
            role,
            conf,
            last_activity: Instant::now(),
            dsa_pub_h,
            stage,
            dh_priv: None,
            r_nonce: None,
            key: None,
            r_server: None,
            r_client: None,
            s_server: None,
            s_client: None,
            final_reply: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        idle_timeout_exceeded(self.last_activity, self.conf.timeout)
    }

    /// Take the responder's final (message 4) reply after it reported
    /// `HandshakeOutcome::Established`. Panics if called at any other
    /// time — a programmer error in the supervisor, not a protocol one.
    pub fn take_final_reply(&mut self) -> Vec<u8> {
        self.final_reply
            .take()
            .expect("take_final_reply called before the handshake established a session")
    }

    /// Start the handshake from the initiator: generate an ephemeral
    /// DH keypair and a fresh nonce, and produce message 1 immediately.
    pub fn start(addr: SocketAddr, conf: PeerConfig) -> (Self, Vec<u8>) {
        let dh = DhKeypair::generate();
        let mut r_nonce = [0u8; R_SIZE];
        OsRng.fill_bytes(&mut r_nonce);

        let mut hs = Self::new(addr, Role::Initiator, conf, Stage::InitAwaitingMsg2);

        let enc_len = message::msg1_enc_len(hs.conf.mtu, hs.conf.noise);
        let mut enc = vec![0u8; enc_len];
        enc[..REPR_SIZE].copy_from_slice(&dh.representative);
        salsa20_xor(&mut enc, &r_nonce, &hs.dsa_pub_h);

        let mut out = Vec::with_capacity(R_SIZE + enc_len + 8);
        out.extend_from_slice(&r_nonce);
        out.extend_from_slice(&enc);
        out.extend_from_slice(&id_tag(hs.conf.id.as_bytes(), &r_nonce));

        hs.dh_priv = Some(dh);
        hs.r_nonce = Some(r_nonce);
        (hs, out)
    }

    /// Begin tracking a brand new incoming handshake as the responder.
    /// The first datagram is fed via [`Handshake::on_message`] exactly
    /// like any other.
    pub fn new_responder(addr: SocketAddr, conf: PeerConfig) -> Self {
        Self::new(addr, Role::Responder, conf, Stage::RespAwaitingMsg1)
    }

    /// Feed one received datagram to the state machine.
    pub fn on_message(&mut self, data: &[u8]) -> Result<HandshakeOutcome> {
        self.last_activity = Instant::now();
        match self.stage {
            Stage::RespAwaitingMsg1 => self.handle_msg1(data),
            Stage::RespAwaitingMsg3 => self.handle_msg3(data),
            Stage::InitAwaitingMsg2 => self.handle_msg2(data),
            Stage::InitAwaitingMsg4 => self.handle_msg4(data),
        }
    }

    /// Responder: R ∥ STREAM(H(DSAPub), R, El(I_dh_pub)) ∥ IDtag.
    fn handle_msg1(&mut self, data: &[u8]) -> Result<HandshakeOutcome> {
        if data.len() < message::msg1_len(self.conf.mtu, false) {
            return Err(self.protocol_error("message 1 too short"));
        }
        let mut r_nonce = [0u8; R_SIZE];
        r_nonce.copy_from_slice(&data[..R_SIZE]);

        let mut repr = data[R_SIZE..R_SIZE + REPR_SIZE].to_vec();
        salsa20_xor(&mut repr, &r_nonce, &self.dsa_pub_h);
        let their_repr: [u8; REPR_SIZE] = repr.try_into().unwrap();

        let dh = DhKeypair::generate();
        let key = dh.shared_secret(&their_repr);

        let enc_pub_len = REPR_SIZE;
        let mut enc_pub = vec![0u8; enc_pub_len];
        enc_pub.copy_from_slice(&dh.representative);
        salsa20_xor(&mut enc_pub, &r_nonce_next(&r_nonce, 1), &self.dsa_pub_h);

        let mut r_server = [0u8; R_SIZE];
        OsRng.fill_bytes(&mut r_server);
        let mut s_server = [0u8; S_SIZE];
        OsRng.fill_bytes(&mut s_server);

        let rs_len = message::msg2_rs_len(self.conf.mtu, self.conf.noise);
        let mut enc_rs = vec![0u8; rs_len];
        enc_rs[..R_SIZE].copy_from_slice(&r_server);
        enc_rs[R_SIZE..R_SIZE + S_SIZE].copy_from_slice(&s_server);
        salsa20_xor(&mut enc_rs, &r_nonce, &key);

        let mut out = Vec::with_capacity(enc_pub_len + rs_len + 8);
        out.extend_from_slice(&enc_pub);
        out.extend_from_slice(&enc_rs);
        out.extend_from_slice(&id_tag(self.conf.id.as_bytes(), &enc_pub));

        self.r_nonce = Some(r_nonce);
        self.dh_priv = Some(dh);
        self.key = Some(key);
        self.r_server = Some(r_server);
        self.s_server = Some(s_server);
        self.stage = Stage::RespAwaitingMsg3;

        Ok(HandshakeOutcome::Reply(out))
    }

    /// Responder: STREAM(K, R+1, Rs ∥ Rc ∥ Sc ∥ Sign(DSAPriv, K)) ∥ IDtag.
    fn handle_msg3(&mut self, data: &[u8]) -> Result<HandshakeOutcome> {
        let enc_len = message::msg3_enc_len(self.conf.mtu, false);
        if data.len() < enc_len + 8 {
            return Err(self.protocol_error("message 3 too short"));
        }
        let r_nonce = self.r_nonce.expect("set by handle_msg1");
        let key = self.key.expect("set by handle_msg1");
        let r_server = self.r_server.expect("set by handle_msg1");

        let mut dec = data[..enc_len].to_vec();
        salsa20_xor(&mut dec, &r_nonce_next(&r_nonce, 1), &key);

        if dec[..R_SIZE].ct_eq(&r_server).unwrap_u8() != 1 {
            return Err(self.protocol_error("echoed server random does not match"));
        }

        let sig_bytes: [u8; SIGNATURE_LENGTH] =
            dec[R_SIZE + R_SIZE + S_SIZE..R_SIZE + R_SIZE + S_SIZE + SIGNATURE_LENGTH]
                .try_into()
                .unwrap();
        let signature = Signature::from_bytes(&sig_bytes);
        self.conf
            .verifying_key
            .verify(&key, &signature)
            .map_err(|_| self.protocol_error("bad signature"))?;

        let mut r_client = [0u8; R_SIZE];
        r_client.copy_from_slice(&dec[R_SIZE..R_SIZE + R_SIZE]);
        let mut s_client = [0u8; S_SIZE];
        s_client.copy_from_slice(&dec[R_SIZE + R_SIZE..R_SIZE + R_SIZE + S_SIZE]);

        let enc4_len = message::msg4_enc_len(self.conf.mtu, self.conf.noise);
        let mut enc4 = vec![0u8; enc4_len];
        enc4[..R_SIZE].copy_from_slice(&r_client);
        salsa20_xor(&mut enc4, &r_nonce_next(&r_nonce, 2), &key);

        let mut out = Vec::with_capacity(enc4_len + 8);
        out.extend_from_slice(&enc4);
        out.extend_from_slice(&id_tag(self.conf.id.as_bytes(), &enc4));

        let session_key = xor_secrets(&self.s_server.take().unwrap(), &s_client);
        let session = Session::new(Role::Responder, self.addr, &self.conf, session_key, true);

        self.r_client = Some(r_client);
        self.s_client = Some(s_client);
        self.final_reply = Some(out);

        Ok(HandshakeOutcome::Established(session))
    }

    /// Initiator: STREAM(H(DSAPub), R+1, El(R_dh_pub)) ∥ STREAM(K, R, Rs ∥ Ss) ∥ IDtag.
    fn handle_msg2(&mut self, data: &[u8]) -> Result<HandshakeOutcome> {
        if data.len() < message::msg2_len(self.conf.mtu, false) {
            return Err(self.protocol_error("message 2 too short"));
        }
        let r_nonce = self.r_nonce.expect("set by start");
        let dh_priv = self.dh_priv.as_ref().expect("set by start");

        let mut repr = data[..REPR_SIZE].to_vec();
        salsa20_xor(&mut repr, &r_nonce_next(&r_nonce, 1), &self.dsa_pub_h);
        let their_repr: [u8; REPR_SIZE] = repr.try_into().unwrap();
        let key = dh_priv.shared_secret(&their_repr);

        let rs_len = R_SIZE + S_SIZE;
        let mut dec_rs = data[REPR_SIZE..REPR_SIZE + rs_len].to_vec();
        salsa20_xor(&mut dec_rs, &r_nonce, &key);
        let mut r_server = [0u8; R_SIZE];
        r_server.copy_from_slice(&dec_rs[..R_SIZE]);
        let mut s_server = [0u8; S_SIZE];
        s_server.copy_from_slice(&dec_rs[R_SIZE..]);

        let mut r_client = [0u8; R_SIZE];
        OsRng.fill_bytes(&mut r_client);
        let mut s_client = [0u8; S_SIZE];
        OsRng.fill_bytes(&mut s_client);

        let signing_key = self
            .conf
            .signing_key
            .as_ref()
            .ok_or_else(|| GovpnError::ConfigError("client handshake requires a signing key".into()))?;
        let signature = signing_key.sign(&key);

        let enc3_len = message::msg3_enc_len(self.conf.mtu, self.conf.noise);
        let mut enc3 = vec![0u8; enc3_len];
        enc3[..R_SIZE].copy_from_slice(&r_server);
        enc3[R_SIZE..R_SIZE + R_SIZE].copy_from_slice(&r_client);
        enc3[R_SIZE + R_SIZE..R_SIZE + R_SIZE + S_SIZE].copy_from_slice(&s_client);
        enc3[R_SIZE + R_SIZE + S_SIZE..R_SIZE + R_SIZE + S_SIZE + SIGNATURE_LENGTH]
            .copy_from_slice(&signature.to_bytes());
        salsa20_xor(&mut enc3, &r_nonce_next(&r_nonce, 1), &key);

        let mut out = Vec::with_capacity(enc3_len + 8);
        out.extend_from_slice(&enc3);
        out.extend_from_slice(&id_tag(self.conf.id.as_bytes(), &enc3));

        self.key = Some(key);
        self.r_server = Some(r_server);
        self.s_server = Some(s_server);
        self.r_client = Some(r_client);
        self.s_client = Some(s_client);
        self.stage = Stage::InitAwaitingMsg4;

        Ok(HandshakeOutcome::Reply(out))
    }

    /// Initiator: STREAM(K, R+2, Rc) ∥ IDtag.
    fn handle_msg4(&mut self, data: &[u8]) -> Result<HandshakeOutcome> {
        let enc_len = message::msg4_enc_len(self.conf.mtu, false);
        if data.len() < enc_len + 8 {
            return Err(self.protocol_error("message 4 too short"));
        }
        let r_nonce = self.r_nonce.expect("set by start");
        let key = self.key.expect("set by handle_msg2");

        let mut dec = data[..enc_len].to_vec();
        salsa20_xor(&mut dec, &r_nonce_next(&r_nonce, 2), &key);

        let r_client = self.r_client.expect("set by handle_msg2");
        if dec[..R_SIZE].ct_eq(&r_client).unwrap_u8() != 1 {
            return Err(self.protocol_error("echoed client random does not match"));
        }

        let session_key = xor_secrets(&self.s_server.take().unwrap(), &self.s_client.take().unwrap());
        let session = Session::new(Role::Initiator, self.addr, &self.conf, session_key, true);
        Ok(HandshakeOutcome::Established(session))
    }

    fn protocol_error(&self, reason: &'static str) -> GovpnError {
        GovpnError::HandshakeProtocolError {
            addr: self.addr,
            reason,
        }
    }
}

fn xor_secrets(a: &[u8; S_SIZE], b: &[u8; S_SIZE]) -> [u8; S_SIZE] {
    let mut out = [0u8; S_SIZE];
    for i in 0..S_SIZE {
        out[i] = a[i] ^ b[i];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::verifier::derive_signing_key;
    use crate::identity::{PeerConfig, PeerId, MTU_DEFAULT};
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1194)
    }

    fn confs(noise: bool) -> (PeerConfig, PeerConfig) {
        let id = PeerId::from_bytes([0u8; 16]);
        let signing_key = derive_signing_key(&id, "does not matter");
        let verifying_key = signing_key.verifying_key();
        let server = PeerConfig {
            id,
            name: "peer".into(),
            up: None,
            down: None,
            timeout: Duration::from_secs(60),
            noise,
            encless: false,
            cpr: None,
            mtu: MTU_DEFAULT,
            verifying_key,
            signing_key: None,
        };
        let mut client = server.clone();
        client.signing_key = Some(signing_key);
        (server, client)
    }

    fn run_full_handshake(noise: bool) -> (Session, Session) {
        let (server_conf, client_conf) = confs(noise);
        let (mut initiator, msg1) = Handshake::start(addr(), client_conf);
        let mut responder = Handshake::new_responder(addr(), server_conf);

        let msg2 = match responder.on_message(&msg1).unwrap() {
            HandshakeOutcome::Reply(m) => m,
            _ => panic!("expected reply"),
        };
        let msg3 = match initiator.on_message(&msg2).unwrap() {
            HandshakeOutcome::Reply(m) => m,
            _ => panic!("expected reply"),
        };
        let (msg4, responder_session) = match responder.on_message(&msg3).unwrap() {
            HandshakeOutcome::Established(session) => (responder.final_reply.take().unwrap(), session),
            _ => panic!("expected established"),
        };
        let initiator_session = match initiator.on_message(&msg4).unwrap() {
            HandshakeOutcome::Established(session) => session,
            _ => panic!("expected established"),
        };

        (initiator_session, responder_session)
    }

    #[test]
    fn message_sizes_match_protocol_without_noise() {
        let (server_conf, client_conf) = confs(false);
        let (_initiator, msg1) = Handshake::start(addr(), client_conf);
        assert_eq!(msg1.len(), 48);

        let mut responder = Handshake::new_responder(addr(), server_conf);
        let msg2 = match responder.on_message(&msg1).unwrap() {
            HandshakeOutcome::Reply(m) => m,
            _ => panic!(),
        };
        assert_eq!(msg2.len(), 80);
    }

    #[tokio::test]
    async fn handshake_produces_matching_session_keys() {
        let (initiator, responder) = run_full_handshake(false);
        let frame = initiator.eth_process(b"hello").await.unwrap();
        let recovered = responder.pkt_process(&frame).await.unwrap();
        assert_eq!(recovered, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn noise_handshake_still_establishes() {
        let (initiator, responder) = run_full_handshake(true);
        let frame = initiator.eth_process(b"hi").await.unwrap();
        assert_eq!(frame.len(), MTU_DEFAULT);
        let recovered = responder.pkt_process(&frame).await.unwrap();
        assert_eq!(recovered, Some(b"hi".to_vec()));
    }
}
