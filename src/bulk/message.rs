use std::fmt::{self, Debug};

use hex_fmt::HexFmt;
use rand::distributions::{Distribution, Standard};
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::id::{PeerId, RoundId, ID_LENGTH};
use crate::util::{put_i32, SliceReader};

/// A message decoding error.
#[derive(Clone, PartialEq, Debug, ThisError)]
pub enum Error {
    /// The type tag is not known.
    #[error("Unknown message tag {0}")]
    UnknownTag(u8),
    /// The encoding ended early.
    #[error("Message encoding is truncated")]
    Truncated,
    /// A length or count field was negative.
    #[error("Message contains a negative length field")]
    NegativeLength,
    /// Extra bytes after the encoded message.
    #[error("Trailing bytes after message")]
    TrailingBytes,
}

/// A message result.
pub type Result<T> = std::result::Result<T, Error>;

const TAG_BULK_DATA: u8 = 0;
const TAG_LOGGED_BULK_DATA: u8 = 1;
const TAG_AGGREGATED_BULK_DATA: u8 = 2;
const TAG_SHUFFLE: u8 = 3;
const TAG_BLAME_SHUFFLE: u8 = 4;

/// The messages exchanged during a bulk round.
///
/// Every encoded message carries the round's nonce so the transport can
/// route it and receivers can reject strays. All integers are big-endian.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// A member's XOR message: broadcast to everyone, or sent to the leader
    /// when application broadcast is enabled.
    BulkData(Vec<u8>),
    /// The full per-member transcript, distributed by the leader when an
    /// XOR-mask hash check failed, so all members can replay it.
    LoggedBulkData(Vec<(PeerId, Vec<u8>)>),
    /// The aggregated cleartext bulk, distributed by the leader.
    AggregatedBulkData(Vec<u8>),
    /// Carried traffic for the descriptor shuffle.
    Shuffle(Vec<u8>),
    /// Carried traffic for the blame shuffle.
    BlameShuffle(Vec<u8>),
}

impl Message {
    /// The message's wire tag.
    pub fn tag(&self) -> u8 {
        match self {
            Message::BulkData(_) => TAG_BULK_DATA,
            Message::LoggedBulkData(_) => TAG_LOGGED_BULK_DATA,
            Message::AggregatedBulkData(_) => TAG_AGGREGATED_BULK_DATA,
            Message::Shuffle(_) => TAG_SHUFFLE,
            Message::BlameShuffle(_) => TAG_BLAME_SHUFFLE,
        }
    }

    /// The message's kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::BulkData(_) => "BulkData",
            Message::LoggedBulkData(_) => "LoggedBulkData",
            Message::AggregatedBulkData(_) => "AggregatedBulkData",
            Message::Shuffle(_) => "Shuffle",
            Message::BlameShuffle(_) => "BlameShuffle",
        }
    }

    /// Serializes the message for the given round.
    pub fn encode(&self, round_id: &RoundId) -> Vec<u8> {
        let mut out = vec![self.tag()];
        out.extend_from_slice(round_id.as_bytes());
        match self {
            Message::BulkData(payload)
            | Message::AggregatedBulkData(payload)
            | Message::Shuffle(payload)
            | Message::BlameShuffle(payload) => {
                put_i32(&mut out, payload.len() as i32);
                out.extend_from_slice(payload);
            }
            Message::LoggedBulkData(entries) => {
                put_i32(&mut out, entries.len() as i32);
                for (peer_id, payload) in entries {
                    out.extend_from_slice(peer_id.as_bytes());
                    put_i32(&mut out, payload.len() as i32);
                    out.extend_from_slice(payload);
                }
            }
        }
        out
    }

    /// Parses a message, returning the round id it was sent for.
    pub fn decode(bytes: &[u8]) -> Result<(RoundId, Message)> {
        let mut reader = SliceReader::new(bytes);
        let tag = reader.u8().ok_or(Error::Truncated)?;
        let round_id = read_round_id(&mut reader)?;
        let message = match tag {
            TAG_BULK_DATA => Message::BulkData(read_payload(&mut reader)?),
            TAG_AGGREGATED_BULK_DATA => Message::AggregatedBulkData(read_payload(&mut reader)?),
            TAG_SHUFFLE => Message::Shuffle(read_payload(&mut reader)?),
            TAG_BLAME_SHUFFLE => Message::BlameShuffle(read_payload(&mut reader)?),
            TAG_LOGGED_BULK_DATA => {
                let count = reader.i32().ok_or(Error::Truncated)?;
                if count < 0 {
                    return Err(Error::NegativeLength);
                }
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let mut id_bytes = [0; ID_LENGTH];
                    id_bytes.copy_from_slice(reader.bytes(ID_LENGTH).ok_or(Error::Truncated)?);
                    let payload = read_payload(&mut reader)?;
                    entries.push((PeerId::from_bytes(id_bytes), payload));
                }
                Message::LoggedBulkData(entries)
            }
            other => return Err(Error::UnknownTag(other)),
        };
        if !reader.is_exhausted() {
            return Err(Error::TrailingBytes);
        }
        Ok((round_id, message))
    }
}

fn read_round_id(reader: &mut SliceReader<'_>) -> Result<RoundId> {
    let mut bytes = [0; ID_LENGTH];
    bytes.copy_from_slice(reader.bytes(ID_LENGTH).ok_or(Error::Truncated)?);
    Ok(RoundId::from_bytes(bytes))
}

fn read_payload(reader: &mut SliceReader<'_>) -> Result<Vec<u8>> {
    let len = reader.i32().ok_or(Error::Truncated)?;
    if len < 0 {
        return Err(Error::NegativeLength);
    }
    Ok(reader.bytes(len as usize).ok_or(Error::Truncated)?.to_vec())
}

impl Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::BulkData(payload) => write!(f, "BulkData({:0.10})", HexFmt(payload)),
            Message::LoggedBulkData(entries) => f
                .debug_tuple("LoggedBulkData")
                .field(&entries.len())
                .finish(),
            Message::AggregatedBulkData(payload) => {
                write!(f, "AggregatedBulkData({:0.10})", HexFmt(payload))
            }
            Message::Shuffle(payload) => write!(f, "Shuffle({:0.10})", HexFmt(payload)),
            Message::BlameShuffle(payload) => write!(f, "BlameShuffle({:0.10})", HexFmt(payload)),
        }
    }
}

// A random generation impl is provided for test cases. Unfortunately
// `#[cfg(test)]` does not work for integration tests.
impl Distribution<Message> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Message {
        let message_type = *["bulk", "logged", "aggregated", "shuffle", "blame"]
            .choose(rng)
            .unwrap();

        let mut payload = vec![0; 8];
        rng.fill_bytes(&mut payload);

        match message_type {
            "bulk" => Message::BulkData(payload),
            "logged" => Message::LoggedBulkData(vec![(rng.gen(), payload)]),
            "aggregated" => Message::AggregatedBulkData(payload),
            "shuffle" => Message::Shuffle(payload),
            "blame" => Message::BlameShuffle(payload),
            _ => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_id() -> RoundId {
        RoundId::from_bytes([3; ID_LENGTH])
    }

    #[test]
    fn encode_decode_round_trip() {
        let peer = PeerId::from_bytes([1; ID_LENGTH]);
        let messages = vec![
            Message::BulkData(b"mask bytes".to_vec()),
            Message::LoggedBulkData(vec![(peer, b"logged".to_vec()), (peer, Vec::new())]),
            Message::AggregatedBulkData(Vec::new()),
            Message::Shuffle(b"wrapped".to_vec()),
            Message::BlameShuffle(b"reveal".to_vec()),
        ];
        for message in messages {
            let encoded = message.encode(&round_id());
            assert_eq!(encoded[0], message.tag());
            let (id, decoded) = Message::decode(&encoded).unwrap();
            assert_eq!(id, round_id());
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn unknown_tag_rejected() {
        let mut encoded = Message::BulkData(vec![1]).encode(&round_id());
        encoded[0] = 9;
        assert_eq!(Message::decode(&encoded), Err(Error::UnknownTag(9)));
    }

    #[test]
    fn truncation_and_trailing_bytes_rejected() {
        let encoded = Message::BulkData(vec![1, 2, 3]).encode(&round_id());
        assert_eq!(
            Message::decode(&encoded[..encoded.len() - 1]),
            Err(Error::Truncated)
        );
        let mut extended = encoded;
        extended.push(0);
        assert_eq!(Message::decode(&extended), Err(Error::TrailingBytes));
    }

    #[test]
    fn random_messages_round_trip() {
        let mut rng = rand::thread_rng();
        for _ in 0..32 {
            let message: Message = rng.gen();
            let (_, decoded) = Message::decode(&message.encode(&round_id())).unwrap();
            assert_eq!(decoded, message);
        }
    }
}
