//! Deriving an Ed25519 identity keypair from a human password.
//!
//! Grounded on `NewVerifier` in `verifier.go`: PBKDF2-HMAC-SHA512 over
//! the password, salted with the peer's id, stretched into the seed
//! material for an Ed25519 keypair. Every peer sharing a `PeerId` and
//! password derives the identical keypair, which is how GoVPN avoids
//! ever storing or transmitting a long-term private key.
use ed25519_dalek::{SigningKey, SECRET_KEY_LENGTH};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha512;
use zeroize::Zeroize;

use crate::identity::PeerId;

/// Number of PBKDF2 rounds. Matches `PBKDF2Iters` in `verifier.go`;
/// kept here rather than in the config so two builds never silently
/// disagree on it.
pub const PBKDF2_ITERS: u32 = 1 << 16;

/// Derive the long-term Ed25519 signing key for `id` from `password`.
/// Deterministic: the only secret state a peer config needs to carry
/// is the password itself (or, equivalently, nothing at all if it is
/// supplied out of band at daemon startup).
pub fn derive_signing_key(id: &PeerId, password: &str) -> SigningKey {
    let mut seed = [0u8; SECRET_KEY_LENGTH];
    pbkdf2_hmac::<Sha512>(password.as_bytes(), id.as_bytes(), PBKDF2_ITERS, &mut seed);
    let key = SigningKey::from_bytes(&seed);
    seed.zeroize();
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let id = PeerId::from_bytes([4u8; 16]);
        let a = derive_signing_key(&id, "correct horse battery staple");
        let b = derive_signing_key(&id, "correct horse battery staple");
        assert_eq!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn different_ids_derive_different_keys() {
        let a = derive_signing_key(&PeerId::from_bytes([1u8; 16]), "same password");
        let b = derive_signing_key(&PeerId::from_bytes([2u8; 16]), "same password");
        assert_ne!(a.to_bytes(), b.to_bytes());
    }
}
