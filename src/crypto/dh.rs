//! Curve25519 ephemeral Diffie-Hellman with Elligator2 point hiding.
//!
//! Grounded in `dhKeypairGen`/`dhKeyGen` in `handshake.go`, which lean
//! on `golang.org/x/crypto/curve25519` and `agl/ed25519/extra25519`.
//! The Rust equivalent of `extra25519`'s representative encoding lives
//! in `curve25519-dalek`'s `elligator2` cargo feature, used here
//! instead of hand-rolling the field arithmetic.
//!
//! A Curve25519 public point is representable roughly half the time;
//! `DhKeypair::generate` loops on fresh randomness until it finds one,
//! exactly as `dhKeypairGen`'s `for !reprFound` loop does.

use curve25519_dalek::{
    montgomery::{elligator_decode, elligator_encode},
    scalar::{clamp_integer, Scalar},
};
use rand_core::{OsRng, RngCore};

use crate::crypto::stream::h_apply;

/// An ephemeral DH keypair together with the Elligator2 representative
/// of its public point. Only the representative — never the point
/// itself — goes on the wire.
pub struct DhKeypair {
    private: Scalar,
    pub representative: [u8; 32],
}

impl DhKeypair {
    /// Generate a fresh keypair, retrying until the public point
    /// happens to be Elligator2-representable.
    pub fn generate() -> Self {
        loop {
            let mut raw = [0u8; 32];
            OsRng.fill_bytes(&mut raw);
            let scalar = Scalar::from_bytes_mod_order(clamp_integer(raw));
            if let Some((_point, representative)) = elligator_encode(&scalar) {
                return Self {
                    private: scalar,
                    representative,
                };
            }
        }
    }

    /// Compute `H(curve25519(priv, their_pub))`: the shared DH secret,
    /// hashed through HSalsa20 the same way `dhKeyGen` does.
    pub fn shared_secret(&self, their_representative: &[u8; 32]) -> [u8; 32] {
        let their_point = elligator_decode(their_representative);
        let shared = self.private * their_point;
        h_apply(&shared.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypairs_agree_on_shared_secret() {
        let a = DhKeypair::generate();
        let b = DhKeypair::generate();
        let k_a = a.shared_secret(&b.representative);
        let k_b = b.shared_secret(&a.representative);
        assert_eq!(k_a, k_b);
    }

    #[test]
    fn distinct_keypairs_yield_distinct_secrets() {
        let a = DhKeypair::generate();
        let b = DhKeypair::generate();
        let c = DhKeypair::generate();
        assert_ne!(a.shared_secret(&b.representative), a.shared_secret(&c.representative));
    }
}
