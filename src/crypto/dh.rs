//! x25519 key agreement.

use std::convert::TryInto;
use std::fmt;

use rand::{CryptoRng, Rng};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Size in bytes of an x25519 public component.
pub const DH_PUBLIC_LEN: usize = 32;

/// Size in bytes of a key agreement output.
pub const DH_SECRET_LEN: usize = 32;

/// A key agreement pair. The secret component is zeroized on drop.
///
/// The secret is a static (reusable) x25519 key: a round computes agreement
/// outputs against every peer's public component, and may later reveal
/// individual outputs during blame.
#[derive(Clone)]
pub struct DhKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl DhKeyPair {
    /// Generates a fresh key pair.
    pub fn generate<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        let secret = StaticSecret::new(rng);
        let public = PublicKey::from(&secret);
        DhKeyPair { secret, public }
    }

    /// The public component's canonical bytes.
    pub fn public_bytes(&self) -> [u8; DH_PUBLIC_LEN] {
        *self.public.as_bytes()
    }

    /// Computes the key agreement output with a peer's public component,
    /// given by its canonical bytes. Returns `None` if the bytes are not a
    /// valid public component encoding.
    pub fn shared_secret(&self, their_public: &[u8]) -> Option<Zeroizing<[u8; DH_SECRET_LEN]>> {
        let bytes: [u8; DH_PUBLIC_LEN] = their_public.try_into().ok()?;
        let shared = self.secret.diffie_hellman(&PublicKey::from(bytes));
        Some(Zeroizing::new(*shared.as_bytes()))
    }
}

impl fmt::Debug for DhKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never reveal the secret component in debug output.
        f.debug_struct("DhKeyPair")
            .field("public", &hex_fmt::HexFmt(self.public.as_bytes()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agreement_is_symmetric() {
        let mut rng = rand::thread_rng();
        let alice = DhKeyPair::generate(&mut rng);
        let bob = DhKeyPair::generate(&mut rng);
        let ab = alice.shared_secret(&bob.public_bytes()).unwrap();
        let ba = bob.shared_secret(&alice.public_bytes()).unwrap();
        assert_eq!(*ab, *ba);
    }

    #[test]
    fn rejects_wrong_length_public() {
        let mut rng = rand::thread_rng();
        let pair = DhKeyPair::generate(&mut rng);
        assert!(pair.shared_secret(&[]).is_none());
        assert!(pair.shared_secret(&[0; 31]).is_none());
    }
}
