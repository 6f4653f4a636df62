//! Cryptographic primitives: the Curve25519/Elligator2/Ed25519 stack
//! used by the handshake, and the Salsa20/Poly1305/XTEA/AONT stack used
//! by the per-packet transport engine.

pub mod aont;
pub mod dh;
pub mod nonce_cipher;
pub mod stream;
pub mod verifier;
