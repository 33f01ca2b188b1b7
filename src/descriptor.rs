//! Per-slot commitments published through the descriptor shuffle.
//!
//! A descriptor commits its anonymous slot to a message length, an anonymous
//! key agreement component identifying the slot, one XOR-mask hash per group
//! member, and the hash of the cleartext the slot will carry.

use std::convert::TryInto;

use derivative::Derivative;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::crypto::{Digest, DIGEST_LEN};
use crate::util::{self, put_i32, SliceReader};

/// A descriptor decoding error.
#[derive(Clone, PartialEq, Debug, ThisError)]
pub enum Error {
    /// The encoding ended early.
    #[error("Descriptor encoding is truncated")]
    Truncated,
    /// A length field was negative.
    #[error("Descriptor contains a negative length")]
    NegativeLength,
    /// The number of XOR-mask hashes does not match the group size.
    #[error("Expected {expected} XOR-mask hashes, found {found}")]
    WrongHashCount {
        /// The receiver's group size.
        expected: usize,
        /// The hash count in the encoding.
        found: usize,
    },
    /// A hash field is not the digest size.
    #[error("Hash field of {0} bytes is not a digest")]
    WrongDigestSize(usize),
    /// Extra bytes after the encoded descriptor.
    #[error("Trailing bytes after descriptor")]
    TrailingBytes,
}

/// A descriptor result.
pub type Result<T> = std::result::Result<T, Error>;

/// A per-slot commitment: message length, anonymous key agreement component,
/// one XOR-mask hash per member, and the cleartext hash.
#[derive(Clone, Derivative, PartialEq, Eq, Serialize, Deserialize)]
#[derivative(Debug)]
pub struct Descriptor {
    length: usize,
    #[derivative(Debug(format_with = "util::fmt_hex"))]
    anon_dh: Vec<u8>,
    #[derivative(Debug = "ignore")]
    xor_hashes: Vec<Digest>,
    #[derivative(Debug(format_with = "util::fmt_hex"))]
    cleartext_hash: Digest,
}

impl Descriptor {
    /// Creates a descriptor.
    pub fn new(
        length: usize,
        anon_dh: Vec<u8>,
        xor_hashes: Vec<Digest>,
        cleartext_hash: Digest,
    ) -> Self {
        Descriptor {
            length,
            anon_dh,
            xor_hashes,
            cleartext_hash,
        }
    }

    /// Length in bytes of the slot's message.
    pub fn length(&self) -> usize {
        self.length
    }

    /// The anonymous key agreement component identifying the slot.
    pub fn anon_dh(&self) -> &[u8] {
        &self.anon_dh
    }

    /// One committed XOR-mask hash per group member, in roster order.
    pub fn xor_hashes(&self) -> &[Digest] {
        &self.xor_hashes
    }

    /// The committed XOR-mask hash for the member at `peer_index`.
    pub fn xor_hash(&self, peer_index: usize) -> Option<&Digest> {
        self.xor_hashes.get(peer_index)
    }

    /// The hash of the cleartext this slot will carry.
    pub fn cleartext_hash(&self) -> &Digest {
        &self.cleartext_hash
    }

    /// Serializes the descriptor. All integers are big-endian.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_i32(&mut out, self.length as i32);
        put_i32(&mut out, self.anon_dh.len() as i32);
        out.extend_from_slice(&self.anon_dh);
        put_i32(&mut out, self.xor_hashes.len() as i32);
        for hash in &self.xor_hashes {
            put_i32(&mut out, hash.len() as i32);
            out.extend_from_slice(hash);
        }
        put_i32(&mut out, self.cleartext_hash.len() as i32);
        out.extend_from_slice(&self.cleartext_hash);
        out
    }

    /// Parses a descriptor, validating it against the receiver's group size.
    pub fn decode(bytes: &[u8], expected_peers: usize) -> Result<Self> {
        let mut reader = SliceReader::new(bytes);
        let length = reader.i32().ok_or(Error::Truncated)?;
        if length < 0 {
            return Err(Error::NegativeLength);
        }
        let anon_dh = read_len_prefixed(&mut reader)?.to_vec();
        let count = reader.i32().ok_or(Error::Truncated)?;
        if count < 0 {
            return Err(Error::NegativeLength);
        }
        if count as usize != expected_peers {
            return Err(Error::WrongHashCount {
                expected: expected_peers,
                found: count as usize,
            });
        }
        let mut xor_hashes = Vec::with_capacity(expected_peers);
        for _ in 0..count {
            xor_hashes.push(read_digest(&mut reader)?);
        }
        let cleartext_hash = read_digest(&mut reader)?;
        if !reader.is_exhausted() {
            return Err(Error::TrailingBytes);
        }
        Ok(Descriptor {
            length: length as usize,
            anon_dh,
            xor_hashes,
            cleartext_hash,
        })
    }
}

fn read_len_prefixed<'a>(reader: &mut SliceReader<'a>) -> Result<&'a [u8]> {
    let len = reader.i32().ok_or(Error::Truncated)?;
    if len < 0 {
        return Err(Error::NegativeLength);
    }
    reader.bytes(len as usize).ok_or(Error::Truncated)
}

fn read_digest(reader: &mut SliceReader<'_>) -> Result<Digest> {
    let bytes = read_len_prefixed(reader)?;
    let digest: [u8; DIGEST_LEN] = bytes
        .try_into()
        .map_err(|_| Error::WrongDigestSize(bytes.len()))?;
    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;

    fn sample(peers: usize) -> Descriptor {
        let hashes = (0..peers).map(|i| crypto::hash(&[i as u8])).collect();
        Descriptor::new(42, vec![5; 32], hashes, crypto::hash(b"cleartext"))
    }

    #[test]
    fn encode_decode_round_trip() {
        let descriptor = sample(4);
        let decoded = Descriptor::decode(&descriptor.encode(), 4).unwrap();
        assert_eq!(descriptor, decoded);
    }

    #[test]
    fn zero_length_slot() {
        let descriptor = Descriptor::new(0, vec![5; 32], vec![], crypto::hash(b""));
        let decoded = Descriptor::decode(&descriptor.encode(), 0).unwrap();
        assert_eq!(decoded.length(), 0);
        assert_eq!(decoded.cleartext_hash(), &crypto::hash(b""));
    }

    #[test]
    fn hash_count_must_match_group_size() {
        let encoded = sample(4).encode();
        match Descriptor::decode(&encoded, 5) {
            Err(Error::WrongHashCount {
                expected: 5,
                found: 4,
            }) => (),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn negative_length_rejected() {
        let mut encoded = sample(2).encode();
        encoded[0] = 0xff; // Most significant byte of the big-endian length.
        assert_eq!(Descriptor::decode(&encoded, 2), Err(Error::NegativeLength));
    }

    #[test]
    fn truncation_and_trailing_bytes_rejected() {
        let encoded = sample(2).encode();
        assert_eq!(
            Descriptor::decode(&encoded[..encoded.len() - 1], 2),
            Err(Error::Truncated)
        );
        let mut extended = encoded;
        extended.push(0);
        assert_eq!(Descriptor::decode(&extended, 2), Err(Error::TrailingBytes));
    }
}
