use rand::{CryptoRng, Rng};

use super::{BulkRound, GetDataFn, Params, Result};
use crate::credentials::Credentials;
use crate::group::Group;
use crate::id::RoundId;
use crate::shuffle::CreateShuffle;

/// A bulk round builder, to configure the parameters and create new
/// instances of `BulkRound`.
pub struct BulkRoundBuilder {
    /// Shared group data.
    group: Group,
    /// Round parameters.
    params: Params,
}

impl BulkRoundBuilder {
    /// Returns a new `BulkRoundBuilder` for rounds in the given group, with
    /// default parameters.
    pub fn new(group: Group) -> Self {
        BulkRoundBuilder {
            group,
            params: Params::default(),
        }
    }

    /// Sets all round parameters at once.
    pub fn params(&mut self, params: Params) -> &mut Self {
        self.params = params;
        self
    }

    /// Enables or disables application broadcast through the leader.
    pub fn app_broadcast(&mut self, app_broadcast: bool) -> &mut Self {
        self.params.app_broadcast = app_broadcast;
        self
    }

    /// Sets the maximum number of bytes requested from the data source per
    /// round.
    pub fn max_payload(&mut self, max_payload: usize) -> &mut Self {
        self.params.max_payload = max_payload;
        self
    }

    /// Creates a new round in the `Offline` state. The round begins once
    /// `start` is called on it.
    pub fn build<R: Rng + CryptoRng>(
        &self,
        creds: Credentials,
        round_id: RoundId,
        get_data: GetDataFn,
        create_shuffle: CreateShuffle,
        rng: &mut R,
    ) -> Result<BulkRound> {
        BulkRound::new(
            self.group.clone(),
            creds,
            round_id,
            self.params.clone(),
            get_data,
            create_shuffle,
            rng,
        )
    }
}
