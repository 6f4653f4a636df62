//! Loading [`PeerConfig`]s from the peers directory.
//!
//! One TOML file per peer, named `<peer-id-hex>.toml`, grounded on the
//! `confRead`/`confRefresh` shape in `cmd/govpn-server/conf.go` but
//! split one-file-per-peer instead of a single combined JSON blob, the
//! way the teacher's `server/client_manager.rs` keeps one record per
//! client rather than one monolithic file.

use std::path::Path;
use std::time::Duration;

use ed25519_dalek::{VerifyingKey, PUBLIC_KEY_LENGTH};

use crate::error::{GovpnError, Result};
use crate::identity::{PeerConfig, PeerConfigRaw, PeerId, MTU_DEFAULT, TIMEOUT_DEFAULT_SECS};

/// Load every `*.toml` file in `dir` into a [`PeerConfig`]. Malformed
/// individual files are logged and skipped rather than aborting the
/// whole refresh, matching the supervisor's policy of never letting
/// one bad peer record take the daemon down.
pub fn load_peers_dir(dir: &Path) -> Result<Vec<PeerConfig>> {
    let mut peers = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(GovpnError::Io)?;

    for entry in entries {
        let entry = entry.map_err(GovpnError::Io)?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        let stem = match path.file_stem().and_then(|s| s.to_str()) {
            Some(s) => s,
            None => continue,
        };
        let id = match PeerId::from_hex(stem) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "peer file name is not a valid id, skipping");
                continue;
            }
        };

        let name = stem.to_string();
        match load_one(&path, id, name) {
            Ok(peer) => peers.push(peer),
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "unreadable peer record, skipping");
            }
        }
    }

    Ok(peers)
}

fn load_one(path: &Path, id: PeerId, name: String) -> Result<PeerConfig> {
    let raw_text = std::fs::read_to_string(path).map_err(GovpnError::Io)?;
    let raw: PeerConfigRaw = toml::from_str(&raw_text)
        .map_err(|e| GovpnError::ConfigError(format!("{}: {e}", path.display())))?;
    peer_config_from_raw(id, &name, raw)
}

/// Build a [`PeerConfig`] from an already-deserialized [`PeerConfigRaw`].
/// Used both by [`load_peers_dir`]'s per-file scan and by a client
/// pointed directly at a single peer record outside any directory.
pub fn peer_config_from_raw(id: PeerId, name: &str, raw: PeerConfigRaw) -> Result<PeerConfig> {
    let verifier_bytes = hex::decode(&raw.verifier)
        .map_err(|_| GovpnError::ConfigError(format!("{name}: bad verifier hex")))?;
    let verifier_arr: [u8; PUBLIC_KEY_LENGTH] = verifier_bytes
        .try_into()
        .map_err(|_| GovpnError::ConfigError(format!("{name}: verifier must be {PUBLIC_KEY_LENGTH} bytes")))?;
    let verifying_key = VerifyingKey::from_bytes(&verifier_arr)
        .map_err(|e| GovpnError::ConfigError(format!("{name}: invalid verifier: {e}")))?;

    Ok(PeerConfig {
        id,
        name: name.to_string(),
        up: raw.up,
        down: raw.down,
        timeout: Duration::from_secs(raw.timeout.unwrap_or(TIMEOUT_DEFAULT_SECS)),
        noise: raw.noise || raw.encless,
        encless: raw.encless,
        cpr: raw.cpr,
        mtu: raw.mtu.unwrap_or(MTU_DEFAULT),
        verifying_key,
        signing_key: None,
    })
}

/// Attach a locally-known signing key to a client-side peer record,
/// derived on demand from the shared password rather than stored.
pub fn with_signing_key(mut peer: PeerConfig, password: &str) -> PeerConfig {
    let signing_key = crate::crypto::verifier::derive_signing_key(&peer.id, password);
    debug_assert_eq!(
        signing_key.verifying_key().to_bytes(),
        peer.verifying_key.to_bytes(),
        "derived key does not match configured verifier"
    );
    peer.signing_key = Some(signing_key);
    peer
}
