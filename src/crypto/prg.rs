//! Deterministic mask generation.
//!
//! Masks are drawn from a ChaCha20 stream seeded with a key agreement output.
//! Both ends of an agreement derive byte-identical masks.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

use super::dh::DH_SECRET_LEN;

/// A pseudorandom byte stream seeded from a shared secret.
#[derive(Debug)]
pub struct MaskGenerator(ChaCha20Rng);

impl MaskGenerator {
    /// Creates a generator for the given seed.
    pub fn new(seed: &[u8; DH_SECRET_LEN]) -> Self {
        MaskGenerator(ChaCha20Rng::from_seed(*seed))
    }

    /// Draws the next `len` bytes of the stream.
    pub fn generate(&mut self, len: usize) -> Vec<u8> {
        let mut out = vec![0; len];
        self.0.fill_bytes(&mut out);
        out
    }
}

/// Draws the first `len` bytes of the stream seeded with `seed`.
pub fn mask(seed: &[u8; DH_SECRET_LEN], len: usize) -> Vec<u8> {
    MaskGenerator::new(seed).generate(len)
}
