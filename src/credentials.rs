//! The local node's long-term identity.

use rand::{CryptoRng, Rng};

use crate::crypto::dh::DhKeyPair;
use crate::crypto::sig::SigningKeyPair;
use crate::group::GroupMember;
use crate::id::PeerId;

/// A node's credentials: its id, signing key pair, and long-term key
/// agreement pair. The public halves are what the rest of the group carries
/// in its roster.
#[derive(Debug)]
pub struct Credentials {
    id: PeerId,
    signing: SigningKeyPair,
    dh: DhKeyPair,
}

impl Credentials {
    /// Creates credentials from existing key material.
    pub fn new(id: PeerId, signing: SigningKeyPair, dh: DhKeyPair) -> Self {
        Credentials { id, signing, dh }
    }

    /// Generates fresh credentials for the given id.
    pub fn generate<R: Rng + CryptoRng>(id: PeerId, rng: &mut R) -> Self {
        Credentials {
            id,
            signing: SigningKeyPair::generate(rng),
            dh: DhKeyPair::generate(rng),
        }
    }

    /// The node's id.
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// The node's signing key pair.
    pub fn signing(&self) -> &SigningKeyPair {
        &self.signing
    }

    /// The node's long-term key agreement pair.
    pub fn dh(&self) -> &DhKeyPair {
        &self.dh
    }

    /// The roster entry describing this node.
    pub fn to_member(&self) -> GroupMember {
        GroupMember::new(
            self.id,
            self.signing.verify_key(),
            self.dh.public_bytes().to_vec(),
        )
    }
}
