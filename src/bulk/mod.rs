//! # Bulk round
//!
//! A bulk round lets every member of a group contribute one message per
//! round so that all honest members learn the full set of messages, but
//! nobody learns which member contributed which message.
//!
//! ## How it works
//!
//! * Each member draws a fresh anonymous key agreement pair and derives one
//!   mask per other member, seeded by the agreement of the anonymous secret
//!   with that member's long-term public component. It commits the hash of
//!   every mask — picking its *own* mask so that all masks XOR to its
//!   cleartext — together with the message length, the anonymous public
//!   component and the cleartext hash into a *descriptor*.
//!
//! * The descriptors travel through a verifiable shuffle. The permuted
//!   position a descriptor comes out at is its *slot*: the position of the
//!   committed message in the bulk. The permutation is the same at every
//!   honest member, and nobody knows which member owns which slot.
//!
//! * Each member derives its mask for every slot — the retained one for the
//!   slot it owns, and for every other slot the mask seeded by its long-term
//!   secret and the slot's anonymous public component — and broadcasts the
//!   concatenation. XOR-accumulating all members' messages yields the
//!   cleartexts, each verified against its committed hash.
//!
//! * With *application broadcast* enabled the members instead send their
//!   XOR messages to the group leader only. The leader verifies every mask
//!   against its committed hash and broadcasts the aggregated cleartexts,
//!   or, if any check fails, the full per-member transcript so everyone can
//!   replay the verification.
//!
//! * When a mask fails its commitment, the faulted slot's owner anonymously
//!   reveals the agreement outputs behind the commitments through a second,
//!   *blame* shuffle. Every member regenerates the masks from the revealed
//!   secrets and convicts the members that transmitted something else.

mod builder;
mod bulk_round;
mod error;
mod message;
mod params;

pub mod blame;

pub use self::builder::BulkRoundBuilder;
pub use self::bulk_round::{BulkRound, GetDataFn, RoundState, Step};
pub use self::error::{Error, FaultKind, Result};
pub use self::message::Message;
pub use self::params::Params;
