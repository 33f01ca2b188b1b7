//! Common supertraits for protocol rounds and the sans-io step primitives.

use std::fmt::Debug;
use std::hash::Hash;
use std::iter::once;

use rand::Rng;

use crate::fault_log::{Fault, FaultLog, FaultT};

/// A peer's unique identifier.
pub trait NodeIdT: Eq + Ord + Clone + Debug + Hash + Send + Sync {}
impl<N> NodeIdT for N where N: Eq + Ord + Clone + Debug + Hash + Send + Sync {}

/// Messages.
pub trait Message: Debug + Send + Sync {}
impl<M> Message for M where M: Debug + Send + Sync {}

/// Message destination: all other group members, or a single member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target<N> {
    /// The message must be sent to every other group member.
    All,
    /// The message must be sent to the given peer.
    Node(N),
}

impl<N> Target<N> {
    /// Returns a `TargetedMessage` with this target, and the given message.
    pub fn message<M>(self, message: M) -> TargetedMessage<M, N> {
        TargetedMessage {
            target: self,
            message,
        }
    }
}

/// Message with a designated target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetedMessage<M, N> {
    /// The node or nodes that this message must be delivered to.
    pub target: Target<N>,
    /// The content of the message that must be delivered.
    pub message: M,
}

impl<M, N> TargetedMessage<M, N> {
    /// Applies the given transformation of messages, preserving the target.
    pub fn map<T, F: Fn(M) -> T>(self, f: F) -> TargetedMessage<T, N> {
        TargetedMessage {
            target: self.target,
            message: f(self.message),
        }
    }
}

/// Result of one step of the local state machine of a round. Such a result
/// should be used and never discarded by the client of the round.
#[must_use = "The round step result must be used."]
#[derive(Debug)]
pub struct Step<M, O, N, F: FaultT> {
    /// The round's output, after consensus has been reached. This is guaranteed
    /// to be the same in all participating nodes.
    pub output: Vec<O>,
    /// A list of nodes that are not following consensus, together with
    /// information about the detected misbehavior.
    pub fault_log: FaultLog<N, F>,
    /// A list of messages that must be sent to remote nodes as a result of this
    /// step.
    pub messages: Vec<TargetedMessage<M, N>>,
}

impl<M, O, N, F: FaultT> Default for Step<M, O, N, F> {
    fn default() -> Self {
        Step {
            output: Vec::default(),
            fault_log: FaultLog::default(),
            messages: Vec::default(),
        }
    }
}

impl<M, O, N, F: FaultT> Step<M, O, N, F> {
    /// Returns the same step, with the given additional output.
    pub fn with_output<T: Into<Option<O>>>(mut self, output: T) -> Self {
        self.output.extend(output.into());
        self
    }

    /// Adds the outputs, fault logs and messages of `other` to `self`.
    pub fn extend(&mut self, other: Self) {
        self.output.extend(other.output);
        self.fault_log.extend(other.fault_log);
        self.messages.extend(other.messages);
    }

    /// Extends this step with `other` and returns the result.
    pub fn join(mut self, other: Self) -> Self {
        self.extend(other);
        self
    }

    /// Returns `true` if there are no messages, faults or outputs.
    pub fn is_empty(&self) -> bool {
        self.output.is_empty() && self.fault_log.is_empty() && self.messages.is_empty()
    }
}

impl<M, O, N, F: FaultT> From<FaultLog<N, F>> for Step<M, O, N, F> {
    fn from(fault_log: FaultLog<N, F>) -> Self {
        Step {
            fault_log,
            ..Step::default()
        }
    }
}

impl<M, O, N, F: FaultT> From<Fault<N, F>> for Step<M, O, N, F> {
    fn from(fault: Fault<N, F>) -> Self {
        Step {
            fault_log: fault.into(),
            ..Step::default()
        }
    }
}

impl<M, O, N, F: FaultT> From<TargetedMessage<M, N>> for Step<M, O, N, F> {
    fn from(msg: TargetedMessage<M, N>) -> Self {
        Step {
            messages: once(msg).collect(),
            ..Step::default()
        }
    }
}

/// A step belonging to the given round type.
pub type CpStep<D> = Step<
    <D as ConsensusProtocol>::Message,
    <D as ConsensusProtocol>::Output,
    <D as ConsensusProtocol>::NodeId,
    <D as ConsensusProtocol>::FaultKind,
>;

/// A protocol round that defines a message flow.
///
/// Instances never perform I/O themselves: every call returns a step whose
/// messages the caller must deliver, and incoming messages must be fed back
/// via `handle_message`.
pub trait ConsensusProtocol: Send + Sync {
    /// Unique node identifier.
    type NodeId: NodeIdT;
    /// The input provided by the user.
    type Input;
    /// The output type. Some rounds return an output exactly once, others
    /// return multiple times.
    type Output;
    /// The messages that need to be exchanged between the instances in the
    /// participating nodes.
    type Message: Message;
    /// The errors that can occur during execution.
    type Error: std::error::Error;
    /// The kinds of message faults that can be detected during execution.
    type FaultKind: FaultT;

    /// Handles an input provided by the user, and returns a step.
    fn handle_input<R: Rng>(
        &mut self,
        input: Self::Input,
        rng: &mut R,
    ) -> Result<CpStep<Self>, Self::Error>
    where
        Self: Sized;

    /// Handles a message received from node `sender_id`, and returns a step.
    fn handle_message<R: Rng>(
        &mut self,
        sender_id: &Self::NodeId,
        message: Self::Message,
        rng: &mut R,
    ) -> Result<CpStep<Self>, Self::Error>
    where
        Self: Sized;

    /// Returns `true` if execution has completed and this instance can be
    /// dropped.
    fn terminated(&self) -> bool;

    /// Returns this node's own ID.
    fn our_id(&self) -> &Self::NodeId;
}
