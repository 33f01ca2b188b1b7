//! # dcnet
//!
//! Cryptographically secure anonymous broadcast rounds in the
//! dining-cryptographers style: a bulk transmission phase layered on a
//! verifiable shuffle. Each member of a fixed group contributes one message
//! per round; at the end, every honest member learns the full multiset of
//! messages, but cannot tell which member authored which message beyond
//! what coalitions of corrupt members can infer.
//!
//! The crate is transport-agnostic: rounds are sans-io state machines that
//! advance only in response to events — an incoming message, a shuffle
//! completing, a timeout, a cancellation — and every event handler returns
//! a [`Step`] carrying the messages to deliver, any output, and a log of
//! observed peer faults. The shuffle itself and the network are external
//! collaborators, consumed through the [`shuffle::ShuffleRound`] trait and
//! the step's targeted messages.

pub mod bulk;
pub mod credentials;
pub mod crypto;
pub mod descriptor;
mod fault_log;
pub mod group;
mod id;
pub mod message_log;
pub mod shuffle;
mod traits;
pub mod util;

pub use crate::credentials::Credentials;
pub use crate::fault_log::{Fault, FaultLog, FaultT};
pub use crate::group::{Group, GroupMember, SubgroupPolicy};
pub use crate::id::{PeerId, RoundId, ID_LENGTH};
pub use crate::traits::{
    ConsensusProtocol, CpStep, Message, NodeIdT, Step, Target, TargetedMessage,
};
