//! Identity-table and peer-record loading properties exercised
//! through the real filesystem, the way `govpn-server` loads its
//! peers directory at startup and on refresh.

use std::io::Write;

use govpn::crypto::verifier::derive_signing_key;
use govpn::identity::conf::load_peers_dir;
use govpn::identity::{IdentityTable, PeerId};

fn temp_peers_dir(tag: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("govpn-identity-test-{tag}-{:?}", std::thread::current().id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn malformed_peer_file_is_skipped_not_fatal() {
    let dir = temp_peers_dir("malformed");

    let good_id = PeerId::from_bytes([0x01; 16]);
    let signing_key = derive_signing_key(&good_id, "hunter2");
    let verifier_hex = hex::encode(signing_key.verifying_key().to_bytes());
    let mut good = std::fs::File::create(dir.join(format!("{good_id}.toml"))).unwrap();
    writeln!(good, "verifier = \"{verifier_hex}\"").unwrap();

    let bad_id = PeerId::from_bytes([0x02; 16]);
    let mut bad = std::fs::File::create(dir.join(format!("{bad_id}.toml"))).unwrap();
    writeln!(bad, "verifier = \"not valid hex at all\"").unwrap();

    // Not a toml file at all; extension mismatch means it is ignored
    // entirely rather than attempted and logged.
    std::fs::write(dir.join("notes.txt"), b"irrelevant").unwrap();

    let peers = load_peers_dir(&dir).unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].id, good_id);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn peer_file_name_must_be_a_valid_id() {
    let dir = temp_peers_dir("badname");

    let mut file = std::fs::File::create(dir.join("not-a-hex-id.toml")).unwrap();
    writeln!(file, "verifier = \"{}\"", hex::encode([0u8; 32])).unwrap();

    let peers = load_peers_dir(&dir).unwrap();
    assert!(peers.is_empty());

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn identity_table_replace_all_clears_stale_peers() {
    let table = IdentityTable::new();
    let id_a = PeerId::from_bytes([0xaa; 16]);
    let id_b = PeerId::from_bytes([0xbb; 16]);

    let peer_a = dummy_peer(id_a);
    table.replace_all(vec![peer_a]);
    assert_eq!(table.ids(), vec![id_a]);

    let peer_b = dummy_peer(id_b);
    table.replace_all(vec![peer_b]);
    assert_eq!(table.ids(), vec![id_b]);
    assert!(table.get(&id_a).is_none());
}

fn dummy_peer(id: PeerId) -> govpn::identity::PeerConfig {
    let signing_key = derive_signing_key(&id, "whatever");
    govpn::identity::PeerConfig {
        id,
        name: "t".into(),
        up: None,
        down: None,
        timeout: std::time::Duration::from_secs(60),
        noise: false,
        encless: false,
        cpr: None,
        mtu: govpn::identity::MTU_DEFAULT,
        verifying_key: signing_key.verifying_key(),
        signing_key: Some(signing_key),
    }
}
