//! Transport-engine properties exercised at the crate's public
//! boundary: CPR pacing, the rekey threshold, and Encless vs. default
//! mode under a strict (non-reorderable) replay window, the shape a
//! TCP substrate would use.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use ed25519_dalek::SigningKey;
use govpn::identity::{PeerConfig, PeerId};
use govpn::transport::{Role, Session};

fn addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1234)
}

fn conf(cpr: Option<u32>, mtu: usize) -> PeerConfig {
    let id = PeerId::from_bytes([9u8; 16]);
    let signing_key = SigningKey::from_bytes(&[4u8; 32]);
    PeerConfig {
        id,
        name: "p".into(),
        up: None,
        down: None,
        timeout: Duration::from_secs(60),
        noise: false,
        encless: false,
        cpr,
        mtu,
        verifying_key: signing_key.verifying_key(),
        signing_key: Some(signing_key),
    }
}

#[tokio::test]
async fn strict_window_rejects_out_of_order_frames() {
    let c = conf(None, 1400);
    let tx = Session::new(Role::Initiator, addr(), &c, [1u8; 32], false);
    let rx = Session::new(Role::Responder, addr(), &c, [1u8; 32], false);

    let first = tx.eth_process(b"one").await.unwrap();
    let second = tx.eth_process(b"two").await.unwrap();

    // A strict (stream) window demands in-order delivery: the second
    // frame arriving before the first is rejected even though neither
    // has been seen before. The first frame, once it does arrive, is
    // still the expected next nonce and is accepted normally.
    assert!(rx.pkt_process(&second).await.is_err());
    assert_eq!(rx.pkt_process(&first).await.unwrap(), Some(b"one".to_vec()));
}

#[tokio::test]
async fn cpr_paces_sends_to_the_configured_cycle() {
    // 5 KiB/s over a 200-byte MTU is a ~40ms inter-packet cycle: long
    // enough to observe reliably, short enough to keep the test fast.
    let c = conf(Some(5), 200);
    let tx = Session::new(Role::Initiator, addr(), &c, [2u8; 32], true);

    let started = std::time::Instant::now();
    let _ = tx.eth_process(b"a").await.unwrap();
    let _ = tx.eth_process(b"b").await.unwrap();
    let _ = tx.eth_process(b"c").await.unwrap();
    // Three sends at a 40ms cycle should take at least ~2 cycles: far
    // longer than three unpaced sends (effectively instantaneous).
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[tokio::test]
async fn rekey_is_not_yet_due_for_a_fresh_session() {
    let c = conf(None, 1400);
    let session = Session::new(Role::Initiator, addr(), &c, [3u8; 32], true);
    assert!(!session.needs_rekey());
}

#[tokio::test]
async fn encless_and_default_modes_do_not_interoperate() {
    let mut encless_conf = conf(None, 1400);
    encless_conf.encless = true;
    encless_conf.noise = true;
    let default_conf = conf(None, 1400);

    let tx = Session::new(Role::Initiator, addr(), &encless_conf, [6u8; 32], true);
    let rx = Session::new(Role::Responder, addr(), &default_conf, [6u8; 32], true);

    let frame = tx.eth_process(b"secret").await.unwrap();
    assert!(rx.pkt_process(&frame).await.is_err());
}
