//! Peer identity: the 128-bit [`PeerId`], its dual role as an XTEA key
//! for cheap wire-level identification, and the per-peer configuration
//! loaded from the peers directory.
//!
//! Grounded on `identify.go` (`PeerId`, `CipherCache`) and
//! `cmd/govpn-server/conf.go` (the peer config schema and its refresh
//! loop).

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use std::time::Duration;

use ed25519_dalek::{VerifyingKey, SigningKey};
use serde::{Deserialize, Serialize, Serializer};
use subtle::ConstantTimeEq;

use crate::crypto::nonce_cipher::BLOCK_SIZE;
use crate::error::{GovpnError, Result};

pub mod conf;

pub const ID_SIZE: usize = 16;

/// A peer's 128-bit identifier. Doubles as the key for the XTEA
/// identity tag, so two peers sharing an id are indistinguishable on
/// the wire — ids must be unique per deployment.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId([u8; ID_SIZE]);

impl PeerId {
    pub fn from_bytes(bytes: [u8; ID_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| GovpnError::ConfigError(format!("bad peer id hex: {s}")))?;
        let arr: [u8; ID_SIZE] = bytes
            .try_into()
            .map_err(|_| GovpnError::ConfigError(format!("peer id must be {ID_SIZE} bytes: {s}")))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self)
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Static, per-peer parameters loaded from the peers directory and
/// combined with the runtime-derived Ed25519 verifier.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub id: PeerId,
    pub name: String,
    pub up: Option<String>,
    pub down: Option<String>,
    pub timeout: Duration,
    pub noise: bool,
    pub encless: bool,
    pub cpr: Option<u32>,
    pub mtu: usize,
    pub verifying_key: VerifyingKey,
    /// Only present on the client side, where the password is known
    /// locally and the signing key can be derived on demand.
    pub signing_key: Option<SigningKey>,
}

/// Default MTU and handshake idle timeout, mirroring `MTUDefault` and
/// `TimeoutDefault` in the original `govpn` package.
pub const MTU_DEFAULT: usize = 1500;
pub const TIMEOUT_DEFAULT_SECS: u64 = 60;

/// How often server mode re-scans its peers directory, evicting
/// removed peers and picking up added ones.
pub const IDENTITY_REFRESH_SECS: u64 = 60;

/// Deserialized shape of one entry in the peers TOML/JSON file, before
/// the verifier hex string is decoded and defaults are applied.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PeerConfigRaw {
    pub verifier: String,
    #[serde(default)]
    pub up: Option<String>,
    #[serde(default)]
    pub down: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub noise: bool,
    #[serde(default)]
    pub encless: bool,
    #[serde(default)]
    pub cpr: Option<u32>,
    #[serde(default)]
    pub mtu: Option<usize>,
}

/// Live set of known peers, keyed by [`PeerId`], together with the
/// XTEA cipher cache used to identify incoming datagrams. Both maps
/// are rebuilt wholesale on each config refresh, the way
/// `confRefresh`/`CipherCache.Update` do.
pub struct IdentityTable {
    peers: RwLock<HashMap<PeerId, PeerConfig>>,
}

impl IdentityTable {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
        }
    }

    pub fn replace_all(&self, peers: Vec<PeerConfig>) {
        let mut table = self.peers.write().unwrap_or_else(|e| e.into_inner());
        table.clear();
        for peer in peers {
            table.insert(peer.id, peer);
        }
    }

    pub fn get(&self, id: &PeerId) -> Option<PeerConfig> {
        self.peers.read().unwrap_or_else(|e| e.into_inner()).get(id).cloned()
    }

    pub fn ids(&self) -> Vec<PeerId> {
        self.peers.read().unwrap_or_else(|e| e.into_inner()).keys().copied().collect()
    }

    /// Find the peer whose id's XTEA cipher matches `data`'s trailing
    /// identity tag, the way `CipherCache.Find` does: decrypt the last
    /// block with each candidate key and compare against the first
    /// block of plaintext.
    pub fn find(&self, data: &[u8]) -> Option<PeerId> {
        if data.len() < BLOCK_SIZE * 2 {
            return None;
        }
        let first_block = &data[..BLOCK_SIZE];
        let last_block: [u8; BLOCK_SIZE] = data[data.len() - BLOCK_SIZE..].try_into().unwrap();

        let table = self.peers.read().unwrap_or_else(|e| e.into_inner());
        for id in table.keys() {
            let cipher = xtea::Xtea::new(id.as_bytes());
            let mut candidate = last_block;
            cipher.decrypt(&mut candidate);
            if candidate.ct_eq(first_block).into() {
                return Some(*id);
            }
        }
        None
    }
}

impl Default for IdentityTable {
    fn default() -> Self {
        Self::new()
    }
}
