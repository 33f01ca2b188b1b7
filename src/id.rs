//! Fixed-width identifiers for peers and rounds.

use std::fmt;

use hex_fmt::HexFmt;
use rand::distributions::{Distribution, Standard};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Width in bytes of peer and round identifiers.
pub const ID_LENGTH: usize = 16;

/// A group member's opaque identifier.
///
/// Ids are totally ordered; the all-zero value is reserved as a sentinel,
/// e.g. for "no leader".
#[derive(
    Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PeerId([u8; ID_LENGTH]);

impl PeerId {
    /// The reserved all-zero sentinel.
    pub const ZERO: PeerId = PeerId([0; ID_LENGTH]);

    /// Creates an id from its raw bytes.
    pub fn from_bytes(bytes: [u8; ID_LENGTH]) -> Self {
        PeerId(bytes)
    }

    /// The id's raw bytes.
    pub fn as_bytes(&self) -> &[u8; ID_LENGTH] {
        &self.0
    }

    /// Returns `true` if this is the reserved sentinel value.
    pub fn is_zero(&self) -> bool {
        *self == PeerId::ZERO
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({:10})", HexFmt(&self.0))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:10}", HexFmt(&self.0))
    }
}

impl Distribution<PeerId> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> PeerId {
        PeerId(rng.gen())
    }
}

/// A round's unique nonce.
#[derive(
    Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RoundId([u8; ID_LENGTH]);

impl RoundId {
    /// Creates a round id from its raw bytes.
    pub fn from_bytes(bytes: [u8; ID_LENGTH]) -> Self {
        RoundId(bytes)
    }

    /// The round id's raw bytes.
    pub fn as_bytes(&self) -> &[u8; ID_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoundId({:10})", HexFmt(&self.0))
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:10}", HexFmt(&self.0))
    }
}

impl Distribution<RoundId> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> RoundId {
        RoundId(rng.gen())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sentinel() {
        assert!(PeerId::ZERO.is_zero());
        assert!(PeerId::default().is_zero());
        assert!(!PeerId::from_bytes([1; ID_LENGTH]).is_zero());
    }

    #[test]
    fn ordering_is_bytewise() {
        let low = PeerId::from_bytes([0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        let high = PeerId::from_bytes([1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(PeerId::ZERO < low);
        assert!(low < high);
    }
}
