//! Interface to the verifiable shuffle.
//!
//! The shuffle itself is an external collaborator: the bulk round only
//! requires a round abstraction that transmits each member's input blob
//! anonymously and, on success, exposes the blobs in a permuted order that
//! is identical at every honest member. The bulk round drives two such
//! instances per round — one for descriptors and, on demand, one for blame
//! reveals — wrapping their traffic in its own carrier messages.

use std::fmt;

use thiserror::Error as ThisError;

use crate::credentials::Credentials;
use crate::group::Group;
use crate::id::{PeerId, RoundId};
use crate::traits::TargetedMessage;

/// A shuffle error.
#[derive(Clone, PartialEq, Debug, ThisError)]
pub enum Error {
    /// `start` was called more than once.
    #[error("Shuffle round already started")]
    AlreadyStarted,
    /// An implementation-specific failure.
    #[error("Shuffle round failed: {0}")]
    Failed(String),
}

/// A shuffle result.
pub type Result<T> = std::result::Result<T, Error>;

/// Outgoing shuffle traffic: opaque payloads the owning round must wrap and
/// deliver.
pub type ShuffleMessages = Vec<TargetedMessage<Vec<u8>, PeerId>>;

/// A single anonymizing shuffle round.
///
/// Implementations must never return an error for misbehavior of remote
/// peers; like the bulk round itself, they record it in their bad-member
/// list and terminate unsuccessfully instead.
pub trait ShuffleRound: fmt::Debug + Send + Sync {
    /// Starts the round, transmitting `input` anonymously on the local
    /// node's behalf.
    fn start(&mut self, input: Vec<u8>) -> Result<ShuffleMessages>;

    /// Handles a (carrier-unwrapped) message from `sender_id`. Valid before
    /// `start`: implementations buffer early traffic.
    fn handle_message(&mut self, sender_id: &PeerId, payload: &[u8]) -> Result<ShuffleMessages>;

    /// The phase deadline expired. The round must terminate, recording the
    /// members it was still waiting on as bad.
    fn handle_timeout(&mut self);

    /// Returns `true` once the round has completed, successfully or not.
    fn terminated(&self) -> bool;

    /// Returns `true` if the round completed and produced an output.
    fn succeeded(&self) -> bool;

    /// The permuted input blobs; meaningful once `succeeded`.
    fn output(&self) -> &[Vec<u8>];

    /// Group indices of members found misbehaving; meaningful once
    /// `terminated`.
    fn bad_members(&self) -> &[usize];
}

/// Factory for shuffle rounds, given the group, the local node's credentials
/// and the round nonce.
pub type CreateShuffle =
    Box<dyn Fn(&Group, &Credentials, &RoundId) -> Box<dyn ShuffleRound> + Send + Sync>;
