//! Wire sizes of the four handshake messages.
//!
//! Every message is `fixed-prefix ∥ padded-ciphertext ∥ IDtag(8)`.
//! Without Noise the ciphertext fields take their minimum size; with
//! Noise enabled they are padded so every handshake datagram is
//! exactly `mtu` bytes, matching a transport datagram's size. Grounded
//! on the `make([]byte, ...)` size arithmetic throughout
//! `handshake.go`'s `HandshakeStart`/`Server`/`Client`.

use ed25519_dalek::SIGNATURE_LENGTH;

use crate::crypto::nonce_cipher::BLOCK_SIZE as ID_TAG_SIZE;

pub const R_SIZE: usize = 8;
pub const S_SIZE: usize = 32;
/// Size of the Elligator2 representative carried in messages 1 and 2.
pub const REPR_SIZE: usize = 32;

/// Length of message 1's encrypted portion (the obfuscated DH
/// representative).
pub fn msg1_enc_len(mtu: usize, noise: bool) -> usize {
    if noise {
        mtu - ID_TAG_SIZE - R_SIZE
    } else {
        REPR_SIZE
    }
}

pub fn msg1_len(mtu: usize, noise: bool) -> usize {
    R_SIZE + msg1_enc_len(mtu, noise) + ID_TAG_SIZE
}

/// Length of message 2's second encrypted portion (Rs ∥ Ss). The
/// responder's DH representative (`REPR_SIZE` bytes) is never padded.
pub fn msg2_rs_len(mtu: usize, noise: bool) -> usize {
    if noise {
        mtu - REPR_SIZE - ID_TAG_SIZE
    } else {
        R_SIZE + S_SIZE
    }
}

pub fn msg2_len(mtu: usize, noise: bool) -> usize {
    REPR_SIZE + msg2_rs_len(mtu, noise) + ID_TAG_SIZE
}

/// Length of message 3's encrypted portion (Rs ∥ Rc ∥ Sc ∥ signature).
pub fn msg3_enc_len(mtu: usize, noise: bool) -> usize {
    if noise {
        mtu - ID_TAG_SIZE
    } else {
        R_SIZE + R_SIZE + S_SIZE + SIGNATURE_LENGTH
    }
}

pub fn msg3_len(mtu: usize, noise: bool) -> usize {
    msg3_enc_len(mtu, noise) + ID_TAG_SIZE
}

/// Length of message 4's encrypted portion (just the echoed Rc).
pub fn msg4_enc_len(mtu: usize, noise: bool) -> usize {
    if noise {
        mtu - ID_TAG_SIZE
    } else {
        R_SIZE
    }
}

pub fn msg4_len(mtu: usize, noise: bool) -> usize {
    msg4_enc_len(mtu, noise) + ID_TAG_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_noise_sizes_match_the_protocol_constants() {
        assert_eq!(msg1_len(1452, false), 48);
        assert_eq!(msg2_len(1452, false), 80);
        assert_eq!(msg3_len(1452, false), 120);
        assert_eq!(msg4_len(1452, false), 16);
    }

    #[test]
    fn noise_pads_every_message_to_mtu() {
        let mtu = 1452;
        assert_eq!(msg1_len(mtu, true), mtu);
        assert_eq!(msg2_len(mtu, true), mtu);
        assert_eq!(msg3_len(mtu, true), mtu);
        assert_eq!(msg4_len(mtu, true), mtu);
    }
}
