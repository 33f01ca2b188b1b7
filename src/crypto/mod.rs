//! Cryptographic capabilities consumed by the rounds.
//!
//! The protocol code treats these as opaque: a fixed-size hash, x25519 key
//! agreement, a deterministic mask generator seeded from an agreement output,
//! and Ed25519 signatures for the members' long-term identities.

pub mod dh;
pub mod prg;
pub mod sig;

use sha2::{Digest as _, Sha256};

/// Size in bytes of the round hash function's output.
pub const DIGEST_LEN: usize = 32;

/// Output of the round hash function.
pub type Digest = [u8; DIGEST_LEN];

/// Hashes a byte string with SHA-256.
pub fn hash(data: &[u8]) -> Digest {
    Sha256::digest(data).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_of_empty_is_fixed() {
        // SHA-256 of the empty string.
        let expected = [
            0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f,
            0xb9, 0x24, 0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95, 0x99, 0x1b,
            0x78, 0x52, 0xb8, 0x55,
        ];
        assert_eq!(hash(b""), expected);
        assert_ne!(hash(b"a"), hash(b"b"));
    }
}
