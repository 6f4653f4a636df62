//! The 64-bit block cipher used for identity tags and on-wire nonces.
//!
//! GoVPN reuses a single XTEA instance for two unrelated jobs: keyed
//! directly by a [`PeerId`](crate::identity::PeerId), it produces the
//! cheap identity tag appended to every wire packet (§4.1); keyed by a
//! value derived from the session key, it encrypts/decrypts the
//! outbound nonce counter (§4.3). Both are grounded in the same
//! `xtea.Cipher` usage in `identify.go` and `peer.go`.

use xtea::Xtea;

/// Block size of XTEA in bytes. The identity tag and the on-wire
/// nonce field are both exactly one block.
pub const BLOCK_SIZE: usize = 8;

/// Wraps an XTEA instance keyed either by a `PeerId` or by a
/// session-derived nonce key. Deterministic and read-only once
/// constructed, so it is `Send + Sync` without any interior locking.
pub struct NonceCipher {
    xtea: Xtea,
}

impl NonceCipher {
    pub fn new(key: &[u8; 16]) -> Self {
        Self {
            xtea: Xtea::new(key),
        }
    }

    /// Derive the nonce cipher's key from the session key the way
    /// `newNonceCipher` in `peer.go` does: Salsa20 keystream of sixteen
    /// zero bytes under the session key and an all-zero XTEA-sized nonce.
    pub fn from_session_key(session_key: &[u8; 32]) -> Self {
        let mut key = [0u8; 16];
        crate::crypto::stream::salsa20_xor(
            &mut key,
            &[0u8; BLOCK_SIZE],
            session_key,
        );
        Self::new(&key)
    }

    pub fn encrypt_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        self.xtea.encrypt(block);
    }

    pub fn decrypt_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        self.xtea.decrypt(block);
    }

    /// Encrypt a monotonic 64-bit counter into the on-wire nonce field.
    pub fn encrypt_counter(&self, counter: u64) -> [u8; BLOCK_SIZE] {
        let mut block = counter.to_be_bytes();
        self.encrypt_block(&mut block);
        block
    }

    /// Recover the 64-bit counter from an on-wire nonce field.
    pub fn decrypt_counter(&self, wire_nonce: &[u8; BLOCK_SIZE]) -> u64 {
        let mut block = *wire_nonce;
        self.decrypt_block(&mut block);
        u64::from_be_bytes(block)
    }
}

/// Produce the 8-byte identity tag for `data`: the block-cipher
/// encryption of `data`'s first block under `id`. Appended to every
/// handshake and, indirectly via the nonce field, every transport
/// packet, so a server can cheaply partition incoming datagrams by
/// peer (§4.1).
pub fn id_tag(id: &[u8; 16], data: &[u8]) -> [u8; BLOCK_SIZE] {
    let cipher = Xtea::new(id);
    let mut block = [0u8; BLOCK_SIZE];
    block.copy_from_slice(&data[..BLOCK_SIZE]);
    cipher.encrypt(&mut block);
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_tag_is_deterministic() {
        let id = [7u8; 16];
        let data = [1u8; 16];
        assert_eq!(id_tag(&id, &data), id_tag(&id, &data));
    }

    #[test]
    fn counter_roundtrips() {
        let cipher = NonceCipher::new(&[9u8; 16]);
        let wire = cipher.encrypt_counter(12345);
        assert_eq!(cipher.decrypt_counter(&wire), 12345);
    }

    #[test]
    fn different_ids_disagree() {
        let data = [3u8; 16];
        assert_ne!(id_tag(&[1u8; 16], &data), id_tag(&[2u8; 16], &data));
    }
}
