use serde::{Deserialize, Serialize};

/// Parameters controlling a bulk round's behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    /// Whether the leader aggregates all XOR messages and re-broadcasts the
    /// result (application broadcast), instead of every member broadcasting
    /// its own.
    pub app_broadcast: bool,
    /// The maximum number of bytes requested from the data source per round.
    pub max_payload: usize,
}

impl Default for Params {
    fn default() -> Params {
        Params {
            app_broadcast: false,
            max_payload: 65_536,
        }
    }
}
