use std::result;

use thiserror::Error as ThisError;

use crate::shuffle;

/// A bulk round error.
///
/// Errors cover local misconfiguration and API misuse only. Misbehavior of
/// remote peers never surfaces as an error: it is recorded in the fault log
/// and the bad-member list, and the round transitions instead.
#[derive(Clone, PartialEq, Debug, ThisError)]
pub enum Error {
    /// The sender is not a group member.
    #[error("Unknown sender")]
    UnknownSender,
    /// `start` was called more than once.
    #[error("Round already started")]
    AlreadyStarted,
    /// The local node is not in the roster.
    #[error("The local node is not a member of the group")]
    NotMember,
    /// Application broadcast is enabled but the group has no usable leader.
    #[error("Application broadcast requires the leader to be a group member")]
    NoLeader,
    /// A roster entry's key agreement component is unusable.
    #[error("A roster key agreement component is malformed")]
    InvalidDhKey,
    /// Error driving a shuffle round.
    #[error("Error in the shuffle round: {0}")]
    Shuffle(shuffle::Error),
}

/// A bulk round result.
pub type Result<T> = result::Result<T, Error>;

/// Represents each reason why a bulk round message could be faulty.
#[derive(Clone, Debug, ThisError, PartialEq)]
pub enum FaultKind {
    /// `BulkRound` received a message that could not be parsed.
    #[error("`BulkRound` received a message that could not be parsed.")]
    MalformedMessage,
    /// `BulkRound` received a message carrying a different round id.
    #[error("`BulkRound` received a message carrying a different round id.")]
    WrongRound,
    /// `BulkRound` received conflicting duplicate bulk data from the same
    /// sender.
    #[error("`BulkRound` received conflicting duplicate bulk data from the same sender.")]
    DuplicateBulkData,
    /// `BulkRound` received bulk data whose length does not match the
    /// descriptors.
    #[error("`BulkRound` received bulk data whose length does not match the descriptors.")]
    WrongLengthBulkData,
    /// `BulkRound` received a message that does not belong in the current
    /// mode or phase.
    #[error("`BulkRound` received a message that does not belong in the current mode or phase.")]
    UnexpectedMessage,
    /// `BulkRound` received leader data from a member that is not the leader.
    #[error("`BulkRound` received leader data from a member that is not the leader.")]
    NotLeader,
    /// A member's XOR mask did not match the hash committed in the slot
    /// descriptor.
    #[error("A member's XOR mask did not match the hash committed in the slot descriptor.")]
    BadMaskHash,
    /// The leader's aggregated output contradicts the messages it logged.
    #[error("The leader's aggregated output contradicts the messages it logged.")]
    LeaderEquivocation,
    /// A member failed to send the message expected in the current phase
    /// before the deadline.
    #[error("A member failed to send the message expected in the current phase before the deadline.")]
    Timeout,
    /// The shuffle reported the member as misbehaving.
    #[error("The shuffle reported the member as misbehaving.")]
    ShuffleFault,
}
