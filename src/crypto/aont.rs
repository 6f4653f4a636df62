//! All-Or-Nothing-Transform used by Encless mode, an OAEP/SAEP+-style
//! construction keeping the per-packet overhead to a single 48-byte
//! checksum instead of Salsa20 keystream plus Poly1305 tag.
//!
//! Grounded directly on `aont/oaep.go`:
//!
//! ```text
//! PKG = P1 || P2
//!  P1 = HKDF(BLAKE2b, r) XOR (M || BLAKE2b256(r || M))
//!  P2 = BLAKE2b256(P1) XOR r
//! ```
//!
//! `r` is 16 random bytes generated fresh per packet by the caller;
//! losing any byte of the package makes every other byte unrecoverable,
//! which is the point of an AONT layered under a weaker cipher.
//!
//! The transport engine's Encless mode mixes the packet's wire nonce
//! into the transform as a public tweak (HKDF's `info` parameter), so
//! two packets with identical plaintext but different nonces never
//! produce the same package.

use blake2::{
    digest::{consts::U32, FixedOutput, Update},
    Blake2b,
};
use hkdf::Hkdf;

use crate::error::{GovpnError, Result};

pub const H_SIZE: usize = 32;
pub const R_SIZE: usize = 16;

type Blake2b256 = Blake2b<U32>;
type Blake2b512 = blake2::Blake2b512;

/// Encode `input` into an AONT package `H_SIZE + R_SIZE` bytes larger.
/// `tweak` is mixed into the HKDF expansion as public context; pass an
/// empty slice when there is none.
pub fn encode(r: &[u8; R_SIZE], input: &[u8], tweak: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; input.len() + H_SIZE + R_SIZE];

    let hk = Hkdf::<Blake2b512>::new(None, r);
    hk.expand(tweak, &mut out[..input.len() + H_SIZE])
        .expect("hkdf output length is within the digest's expansion limit");

    for (o, i) in out.iter_mut().zip(input.iter()) {
        *o ^= i;
    }

    let mut checksum = Blake2b256::default();
    Update::update(&mut checksum, r);
    Update::update(&mut checksum, input);
    let digest: [u8; H_SIZE] = checksum.finalize_fixed().into();
    for (o, b) in out[input.len()..input.len() + H_SIZE].iter_mut().zip(digest.iter()) {
        *o ^= b;
    }

    let mut p1_hash = Blake2b256::default();
    Update::update(&mut p1_hash, &out[..input.len() + H_SIZE]);
    let p1_digest: [u8; H_SIZE] = p1_hash.finalize_fixed().into();
    for i in 0..R_SIZE {
        out[input.len() + H_SIZE + i] = p1_digest[i] ^ r[i];
    }

    out
}

/// Recover the original input from an AONT package, verifying the
/// embedded checksum. Any single flipped bit anywhere in `input`
/// makes the recovered checksum disagree and the whole package
/// is rejected. `tweak` must match the value passed to [`encode`].
pub fn decode(input: &[u8], tweak: &[u8]) -> Result<Vec<u8>> {
    if input.len() < H_SIZE + R_SIZE {
        return Err(GovpnError::MalformedDatagram {
            addr: None,
            reason: "aont package shorter than checksum + r",
        });
    }

    let p1 = &input[..input.len() - R_SIZE];
    let mut p1_hash = Blake2b256::default();
    Update::update(&mut p1_hash, p1);
    let p1_digest: [u8; H_SIZE] = p1_hash.finalize_fixed().into();

    let mut r = [0u8; R_SIZE];
    for i in 0..R_SIZE {
        r[i] = p1_digest[i] ^ input[input.len() - R_SIZE + i];
    }

    let mut out = vec![0u8; p1.len()];
    let hk = Hkdf::<Blake2b512>::new(None, &r);
    hk.expand(tweak, &mut out)
        .expect("hkdf output length is within the digest's expansion limit");
    for (o, i) in out.iter_mut().zip(p1.iter()) {
        *o ^= i;
    }

    let data_len = out.len() - H_SIZE;
    let mut checksum = Blake2b256::default();
    Update::update(&mut checksum, &r);
    Update::update(&mut checksum, &out[..data_len]);
    let expected: [u8; H_SIZE] = checksum.finalize_fixed().into();

    use subtle::ConstantTimeEq;
    if expected.ct_eq(&out[data_len..]).unwrap_u8() != 1 {
        return Err(GovpnError::AuthenticationFailed { addr: None });
    }

    out.truncate(data_len);
    Ok(out)
}
