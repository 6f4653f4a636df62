//! Salsa20 keystream helpers and the Poly1305 one-time-key convention
//! shared by the handshake and transport engines.
//!
//! Grounded in `HApply`/`salsa20.XORKeyStream` call sites throughout
//! `handshake.go` and `peer.go`. `salsa20_xor` always uses an 8-byte
//! nonce — GoVPN never needs Salsa20's 24-byte XSalsa20 extension.

use poly1305::{
    universal_hash::{KeyInit, UniversalHash},
    Poly1305,
};
use salsa20::{
    cipher::{KeyIvInit, StreamCipher},
    hsalsa, Key, Salsa20,
};

pub const TAG_SIZE: usize = 16;

/// XOR `data` in place with the Salsa20 keystream under `key` and the
/// given 8-byte nonce. Used both to encrypt/decrypt handshake messages
/// and, in the transport engine, to generate the Poly1305 one-time key
/// alongside the ciphertext body in a single keystream pass.
pub fn salsa20_xor(data: &mut [u8], nonce: &[u8; 8], key: &[u8; 32]) {
    let mut cipher = Salsa20::new(Key::from_slice(key), nonce.into());
    cipher.apply_keystream(data);
}

/// `H(x)`: HSalsa20-with-Sigma applied to a 32-byte key. Used to turn
/// the long-term verifier into the obfuscation key `DSAPubH` that
/// hides the first handshake message's ephemeral public key.
pub fn h_apply(data: &[u8; 32]) -> [u8; 32] {
    let sub_key = hsalsa::<salsa20::cipher::consts::U10>(Key::from_slice(data), &[0u8; 16].into());
    sub_key.into()
}

/// Run the Poly1305 one-time authenticator over `data` under `key`.
/// `key` is always the first 32 bytes of a Salsa20 keystream, as
/// required by the Poly1305/Salsa20 composition used on the wire.
pub fn poly1305_tag(data: &[u8], key: &[u8; 32]) -> [u8; TAG_SIZE] {
    let mut mac = Poly1305::new(key.into());
    mac.update_padded(data);
    mac.finalize().into()
}

/// Constant-time Poly1305 tag verification.
pub fn poly1305_verify(tag: &[u8; TAG_SIZE], data: &[u8], key: &[u8; 32]) -> bool {
    use subtle::ConstantTimeEq;
    let expected = poly1305_tag(data, key);
    expected.ct_eq(tag).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salsa20_xor_is_involutive() {
        let key = [1u8; 32];
        let nonce = [2u8; 8];
        let mut data = b"hello world, this is plaintext!".to_vec();
        let original = data.clone();
        salsa20_xor(&mut data, &nonce, &key);
        assert_ne!(data, original);
        salsa20_xor(&mut data, &nonce, &key);
        assert_eq!(data, original);
    }

    #[test]
    fn poly1305_tag_verifies() {
        let key = [5u8; 32];
        let data = b"authenticated ciphertext body";
        let tag = poly1305_tag(data, &key);
        assert!(poly1305_verify(&tag, data, &key));
    }

    #[test]
    fn poly1305_rejects_tampered_data() {
        let key = [5u8; 32];
        let mut data = b"authenticated ciphertext body".to_vec();
        let tag = poly1305_tag(&data, &key);
        data[0] ^= 0xff;
        assert!(!poly1305_verify(&tag, &data, &key));
    }
}
