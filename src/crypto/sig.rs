//! Ed25519 signatures for long-term member identities.
//!
//! Roster entries hold verification keys by their canonical byte encoding,
//! so lookups for unknown members can return an empty sentinel instead of
//! failing.

use std::convert::TryFrom;
use std::fmt;

use ed25519_dalek::{Keypair, Signature, Signer, Verifier};
use rand::{CryptoRng, Rng};
use serde::{Deserialize, Serialize};

/// A member's public signature-verification key, held as canonical bytes.
///
/// The zero-length encoding is the well-known "empty key" sentinel; it
/// verifies nothing.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VerifyKey(Vec<u8>);

impl VerifyKey {
    /// The well-known sentinel for "no key".
    pub fn empty() -> Self {
        VerifyKey(Vec::new())
    }

    /// Creates a key from its canonical bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        VerifyKey(bytes)
    }

    /// The key's canonical bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns `true` if this is the sentinel value.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Verifies a signature over `msg`. Returns `false` if the key or the
    /// signature bytes do not parse.
    pub fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
        let key = match ed25519_dalek::PublicKey::from_bytes(&self.0) {
            Ok(key) => key,
            Err(_) => return false,
        };
        let sig = match Signature::try_from(sig) {
            Ok(sig) => sig,
            Err(_) => return false,
        };
        key.verify(msg, &sig).is_ok()
    }
}

impl fmt::Debug for VerifyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerifyKey({:10})", hex_fmt::HexFmt(&self.0))
    }
}

/// A long-term signing key pair.
pub struct SigningKeyPair(Keypair);

impl SigningKeyPair {
    /// Generates a fresh key pair.
    pub fn generate<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        SigningKeyPair(Keypair::generate(rng))
    }

    /// The verification half of the pair.
    pub fn verify_key(&self) -> VerifyKey {
        VerifyKey(self.0.public.as_bytes().to_vec())
    }

    /// Signs `msg`, returning the signature bytes.
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        self.0.sign(msg).to_bytes().to_vec()
    }
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never reveal the secret component in debug output.
        f.debug_tuple("SigningKeyPair")
            .field(&hex_fmt::HexFmt(self.0.public.as_bytes()))
            .finish()
    }
}
