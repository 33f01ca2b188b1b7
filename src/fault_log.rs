//! Functionality for logging faulty peer behavior encountered by a round.
//!
//! Rounds propagate their fault logs upwards to the caller via the `Step`
//! returned from `handle_input()` and `handle_message()`.

use std::fmt::Debug;

/// A fault kind: the reason a peer is blamed for an entry in the log.
pub trait FaultT: Debug + Send + Sync {}
impl<F> FaultT for F where F: Debug + Send + Sync {}

/// A structure representing the context of a faulty peer. This structure
/// describes which peer is faulty (`node_id`) and which faulty behavior
/// the peer exhibited (`kind`).
#[derive(Clone, Debug, PartialEq)]
pub struct Fault<N, F: FaultT> {
    /// The faulty peer's ID.
    pub node_id: N,
    /// The kind of fault the peer is blamed for.
    pub kind: F,
}

impl<N, F: FaultT> Fault<N, F> {
    /// Creates a new fault, blaming `node_id` for the `kind`.
    pub fn new(node_id: N, kind: F) -> Self {
        Fault { node_id, kind }
    }
}

impl<N, F: FaultT> From<Fault<N, F>> for FaultLog<N, F> {
    /// Creates a new `FaultLog` where `fault` is the first element in the log
    /// vector.
    fn from(fault: Fault<N, F>) -> Self {
        FaultLog(vec![fault])
    }
}

/// A structure used to contain reports of faulty peer behavior.
#[derive(Debug, PartialEq)]
pub struct FaultLog<N, F: FaultT>(pub Vec<Fault<N, F>>);

impl<N, F: FaultT> FaultLog<N, F> {
    /// Creates an empty `FaultLog`.
    pub fn new() -> Self {
        FaultLog::default()
    }

    /// Creates a new `FaultLog` initialized with a single log.
    pub fn init(node_id: N, kind: F) -> Self {
        Fault::new(node_id, kind).into()
    }

    /// Creates a new `Fault` and pushes it onto the fault log.
    pub fn append(&mut self, node_id: N, kind: F) {
        self.0.push(Fault::new(node_id, kind));
    }

    /// Consumes `new_logs`, appending its logs onto the end of `self`.
    pub fn extend(&mut self, new_logs: FaultLog<N, F>) {
        self.0.extend(new_logs.0);
    }

    /// Returns `true` if there are no fault entries in the log.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<N, F: FaultT> Default for FaultLog<N, F> {
    fn default() -> Self {
        FaultLog(vec![])
    }
}

impl<N, F: FaultT> IntoIterator for FaultLog<N, F> {
    type Item = Fault<N, F>;
    type IntoIter = std::vec::IntoIter<Fault<N, F>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<N, F: FaultT> std::iter::FromIterator<Fault<N, F>> for FaultLog<N, F> {
    fn from_iter<I: IntoIterator<Item = Fault<N, F>>>(iter: I) -> Self {
        FaultLog(iter.into_iter().collect())
    }
}
