//! Fault localization for the bulk phase.
//!
//! When a slot's recovered cleartext fails its committed hash, the members
//! whose XOR masks mismatched the slot's commitments are reported as
//! `BadHash`es. The slot's anonymous owner then reveals, through the blame
//! shuffle, the key agreement outputs it used to commit those members'
//! masks. Every member replays the mask derivation from the revealed
//! secrets and convicts the members whose transmitted masks contradict
//! commitments the reveals confirm.

use std::convert::TryInto;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::crypto::dh::DH_SECRET_LEN;
use crate::crypto::{self, prg};
use crate::descriptor::Descriptor;
use crate::util::{put_i32, SliceReader};

/// A blame payload decoding error.
#[derive(Clone, PartialEq, Debug, ThisError)]
pub enum Error {
    /// The encoding ended early.
    #[error("Blame payload is truncated")]
    Truncated,
    /// A length or index field was negative.
    #[error("Blame payload contains a negative field")]
    NegativeField,
    /// Extra bytes after the encoded entries.
    #[error("Trailing bytes after blame payload")]
    TrailingBytes,
}

/// A blame result.
pub type Result<T> = std::result::Result<T, Error>;

/// Identifies a mask whose hash did not match its commitment: the member at
/// `peer`'s XOR contribution for the slot at `descriptor`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BadHash {
    /// The slot index in shuffle order.
    pub descriptor: usize,
    /// The contributing member's group index.
    pub peer: usize,
}

/// A revealed key agreement output: the secret the slot owner at
/// `descriptor` shares with the member at `peer`, which seeded that
/// member's mask for the slot.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlameEntry {
    /// The slot index in shuffle order.
    pub descriptor: usize,
    /// The contributing member's group index.
    pub peer: usize,
    /// The revealed agreement output.
    pub secret: Vec<u8>,
}

/// Serializes blame entries: a count, then each entry's slot index, member
/// index and length-prefixed secret. All integers are big-endian.
pub fn encode_entries(entries: &[BlameEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    put_i32(&mut out, entries.len() as i32);
    for entry in entries {
        put_i32(&mut out, entry.descriptor as i32);
        put_i32(&mut out, entry.peer as i32);
        put_i32(&mut out, entry.secret.len() as i32);
        out.extend_from_slice(&entry.secret);
    }
    out
}

/// Parses blame entries.
pub fn decode_entries(bytes: &[u8]) -> Result<Vec<BlameEntry>> {
    let mut reader = SliceReader::new(bytes);
    let count = reader.i32().ok_or(Error::Truncated)?;
    if count < 0 {
        return Err(Error::NegativeField);
    }
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let descriptor = reader.i32().ok_or(Error::Truncated)?;
        let peer = reader.i32().ok_or(Error::Truncated)?;
        if descriptor < 0 || peer < 0 {
            return Err(Error::NegativeField);
        }
        let secret = reader.len_prefixed().ok_or(Error::Truncated)?.to_vec();
        entries.push(BlameEntry {
            descriptor: descriptor as usize,
            peer: peer as usize,
            secret,
        });
    }
    if !reader.is_exhausted() {
        return Err(Error::TrailingBytes);
    }
    Ok(entries)
}

/// Replays revealed secrets against the descriptors and the transcript of
/// received XOR messages, returning the group indices of convicted members,
/// sorted and deduplicated.
///
/// For each entry, the mask is regenerated from the revealed secret. If its
/// hash does not reproduce the descriptor's commitment for that member, the
/// reveal proves nothing — the anonymous revealer may itself be lying — and
/// the entry is skipped. If it does, the commitment is confirmed correct,
/// so a transmitted mask that fails it convicts the member who sent it.
///
/// Entries are processed in `(descriptor, peer)` order regardless of the
/// order the shuffle delivered them in, so all members convict
/// deterministically.
pub fn convict(
    entries: &[BlameEntry],
    descriptors: &[Descriptor],
    offsets: &[usize],
    messages: &[Vec<u8>],
) -> Vec<usize> {
    let mut entries: Vec<&BlameEntry> = entries.iter().collect();
    entries.sort();
    entries.dedup();

    let mut convicted = Vec::new();
    for entry in entries {
        let descriptor = match descriptors.get(entry.descriptor) {
            Some(descriptor) => descriptor,
            None => {
                debug!("ignoring blame entry for unknown slot {}", entry.descriptor);
                continue;
            }
        };
        let committed = match descriptor.xor_hash(entry.peer) {
            Some(committed) => committed,
            None => {
                debug!("ignoring blame entry for unknown member {}", entry.peer);
                continue;
            }
        };
        let seed: [u8; DH_SECRET_LEN] = match entry.secret.as_slice().try_into() {
            Ok(seed) => seed,
            Err(_) => {
                debug!("ignoring blame entry with an unusable secret");
                continue;
            }
        };
        let regenerated = prg::mask(&seed, descriptor.length());
        if crypto::hash(&regenerated) != *committed {
            // The reveal contradicts the slot's own commitment; it cannot
            // localize anyone.
            debug!(
                "blame reveal for slot {} member {} does not reproduce the commitment",
                entry.descriptor, entry.peer
            );
            continue;
        }
        let transmitted = messages
            .get(entry.peer)
            .zip(offsets.get(entry.descriptor))
            .and_then(|(message, &offset)| message.get(offset..))
            .and_then(|tail| tail.get(..descriptor.length()));
        match transmitted {
            Some(mask) if crypto::hash(mask) == *committed => (),
            _ => convicted.push(entry.peer),
        }
    }
    convicted.sort_unstable();
    convicted.dedup();
    convicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::dh::DhKeyPair;
    use crate::util::xor_into;

    #[test]
    fn entries_round_trip() {
        let entries = vec![
            BlameEntry {
                descriptor: 0,
                peer: 2,
                secret: vec![9; DH_SECRET_LEN],
            },
            BlameEntry {
                descriptor: 1,
                peer: 0,
                secret: Vec::new(),
            },
        ];
        let decoded = decode_entries(&encode_entries(&entries)).unwrap();
        assert_eq!(decoded, entries);
        assert!(decode_entries(&encode_entries(&[])).unwrap().is_empty());
    }

    #[test]
    fn malformed_entries_rejected() {
        let encoded = encode_entries(&[BlameEntry {
            descriptor: 0,
            peer: 1,
            secret: vec![1, 2, 3],
        }]);
        assert_eq!(
            decode_entries(&encoded[..encoded.len() - 1]),
            Err(Error::Truncated)
        );
        let mut extended = encoded;
        extended.push(0);
        assert_eq!(decode_entries(&extended), Err(Error::TrailingBytes));
    }

    /// Builds a two-member slot: the owner commits masks for members 0 and
    /// 1, member 1's transmitted mask is corrupted, and the revealed secret
    /// convicts member 1.
    #[test]
    fn confirmed_reveal_convicts_corrupt_mask() {
        let mut rng = rand::thread_rng();
        let owner_anon = DhKeyPair::generate(&mut rng);
        let member = DhKeyPair::generate(&mut rng);
        let length = 24;

        let secret = owner_anon.shared_secret(&member.public_bytes()).unwrap();
        let honest_mask = prg::mask(&secret, length);
        let own_mask = vec![0x5a; length];
        let cleartext = {
            let mut out = Vec::new();
            xor_into(&mut out, &honest_mask, &own_mask);
            out
        };
        let descriptor = Descriptor::new(
            length,
            owner_anon.public_bytes().to_vec(),
            vec![crypto::hash(&own_mask), crypto::hash(&honest_mask)],
            crypto::hash(&cleartext),
        );

        let mut corrupted = honest_mask.clone();
        corrupted[0] ^= 0xff;
        let messages = vec![own_mask.clone(), corrupted];
        let entry = BlameEntry {
            descriptor: 0,
            peer: 1,
            secret: secret.to_vec(),
        };

        let convicted = convict(&[entry.clone()], &[descriptor.clone()], &[0], &messages);
        assert_eq!(convicted, vec![1]);

        // An honest transcript convicts no one.
        let honest = vec![own_mask, honest_mask];
        assert!(convict(&[entry], &[descriptor], &[0], &honest).is_empty());
    }

    #[test]
    fn unconfirmed_reveal_convicts_no_one() {
        let mut rng = rand::thread_rng();
        let owner_anon = DhKeyPair::generate(&mut rng);
        let member = DhKeyPair::generate(&mut rng);
        let length = 16;

        let secret = owner_anon.shared_secret(&member.public_bytes()).unwrap();
        let honest_mask = prg::mask(&secret, length);
        let descriptor = Descriptor::new(
            length,
            owner_anon.public_bytes().to_vec(),
            vec![crypto::hash(&honest_mask)],
            crypto::hash(&honest_mask),
        );

        // A fabricated secret does not reproduce the commitment, so even a
        // mismatching transmitted mask stays unattributed.
        let entry = BlameEntry {
            descriptor: 0,
            peer: 0,
            secret: vec![7; DH_SECRET_LEN],
        };
        let messages = vec![vec![0; length]];
        assert!(convict(&[entry], &[descriptor], &[0], &messages).is_empty());
    }

    #[test]
    fn out_of_range_entries_are_skipped() {
        let entries = vec![
            BlameEntry {
                descriptor: 7,
                peer: 0,
                secret: vec![0; DH_SECRET_LEN],
            },
            BlameEntry {
                descriptor: 0,
                peer: 7,
                secret: vec![0; DH_SECRET_LEN],
            },
        ];
        let descriptor = Descriptor::new(4, vec![0; 32], vec![crypto::hash(b"x")], crypto::hash(b"y"));
        assert!(convict(&entries, &[descriptor], &[0], &[vec![0; 4]]).is_empty());
    }
}
