use std::fmt;
use std::mem;

use derivative::Derivative;
use itertools::Itertools;
use log::{debug, warn};
use rand::{CryptoRng, Rng};

use super::blame::{self, BadHash, BlameEntry};
use super::{Error, FaultKind, Message, Params, Result};
use crate::credentials::Credentials;
use crate::crypto::dh::{DhKeyPair, DH_PUBLIC_LEN};
use crate::crypto::{self, prg};
use crate::descriptor::Descriptor;
use crate::fault_log::Fault;
use crate::group::Group;
use crate::id::{PeerId, RoundId, ID_LENGTH};
use crate::message_log::MessageLog;
use crate::shuffle::{CreateShuffle, ShuffleMessages, ShuffleRound};
use crate::traits::{ConsensusProtocol, Target};
use crate::util::xor_into;

/// A `BulkRound` step. The single output, emitted on success, is the
/// recovered cleartexts in slot order.
pub type Step = crate::traits::Step<Message, Vec<Vec<u8>>, PeerId, FaultKind>;

/// Supplies the local node's contribution: called with the maximum number of
/// bytes to return, yields the bytes and whether more are queued for later
/// rounds.
pub type GetDataFn = Box<dyn FnMut(usize) -> (Vec<u8>, bool) + Send + Sync>;

/// The stages of a bulk round.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RoundState {
    /// Not yet started.
    Offline,
    /// The descriptor shuffle is running.
    Shuffling,
    /// XOR messages are being exchanged.
    DataSharing,
    /// Awaiting processing of data received from the leader.
    ReceivingLeaderData,
    /// The leader is verifying and aggregating the received XOR messages.
    ProcessingLeaderData,
    /// The round is over.
    Finished,
}

impl RoundState {
    /// The state's name.
    pub fn name(self) -> &'static str {
        match self {
            RoundState::Offline => "Offline",
            RoundState::Shuffling => "Shuffling",
            RoundState::DataSharing => "DataSharing",
            RoundState::ReceivingLeaderData => "ReceivingLeaderData",
            RoundState::ProcessingLeaderData => "ProcessingLeaderData",
            RoundState::Finished => "Finished",
        }
    }
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single instance of a cryptographically secure anonymous exchange.
///
/// The round first runs a descriptor shuffle: each member anonymously
/// publishes a descriptor committing a slot to its message length, an
/// anonymous key agreement component, one XOR-mask hash per member, and the
/// cleartext hash. The slot a descriptor lands on in the permuted shuffle
/// output is the position of that member's message in the bulk.
///
/// Every member then derives one mask per slot — for its own slot, the mask
/// that makes all masks XOR to its cleartext — concatenates them into a
/// single XOR message, and broadcasts it. XOR-accumulating all members'
/// messages reveals the cleartexts. With application broadcast enabled, the
/// XOR messages instead go to the leader, which verifies every mask against
/// the committed hashes and broadcasts either the aggregate or, on a hash
/// fault, the full transcript so all members can replay it and localize the
/// fault through the blame shuffle.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct BulkRound {
    /// Shared group data.
    group: Group,
    /// The local node's long-term identity.
    creds: Credentials,
    /// The round nonce.
    round_id: RoundId,
    /// Round configuration.
    params: Params,
    /// The local node's group index.
    our_idx: usize,
    /// Whether the local node is the group leader.
    is_leader: bool,
    /// Current state of the round.
    state: RoundState,
    /// Supplies the data to share this round.
    #[derivative(Debug = "ignore")]
    get_data: GetDataFn,
    /// Creates the descriptor and blame shuffles.
    #[derivative(Debug = "ignore")]
    create_shuffle: CreateShuffle,
    /// The descriptor shuffle, while it is running.
    shuffle: Option<Box<dyn ShuffleRound>>,
    /// The blame shuffle, prepared when data sharing begins.
    blame_shuffle: Option<Box<dyn ShuffleRound>>,
    /// The anonymous key agreement pair identifying our slot. Its secret
    /// half is confined to this round and zeroized on drop.
    anon_dh: DhKeyPair,
    /// The cleartext contributed this round.
    my_cleartext: Vec<u8>,
    /// The mask for our own slot: all other members' masks XORed with the
    /// cleartext.
    my_slot_mask: Vec<u8>,
    /// Our slot index in the shuffle output, once identified.
    my_idx: Option<usize>,
    /// Our concatenated XOR message, once generated.
    my_xor_message: Vec<u8>,
    /// The parsed descriptors, in shuffle order.
    descriptors: Vec<Descriptor>,
    /// Byte offset of each slot within an XOR message.
    offsets: Vec<usize>,
    /// Total XOR message length: the sum of all slot lengths.
    expected_bulk_size: usize,
    /// Received XOR messages, by group index.
    messages: Vec<Vec<u8>>,
    /// Which members' XOR messages have been received.
    received: Vec<bool>,
    /// Count of received XOR messages.
    received_messages: usize,
    /// Messages that arrived before the state machine was ready for them,
    /// replayed in arrival order on the next state transition.
    offline_log: MessageLog<Message>,
    /// Everything received, for duplicate detection and post-mortem.
    log: MessageLog<Message>,
    /// Hash-check failures: the member at `peer`'s mask for the slot at
    /// `descriptor` did not match the committed hash.
    bad_message_hashes: Vec<BadHash>,
    /// Whether the blame shuffle has been started.
    blaming: bool,
    /// Group indices of members found misbehaving.
    bad_members: Vec<usize>,
    /// The recovered cleartexts in slot order, on success.
    cleartexts: Vec<Vec<u8>>,
}

impl BulkRound {
    /// Creates a new bulk round.
    ///
    /// `get_data` supplies the local contribution, and `create_shuffle` the
    /// shuffle rounds; both are captured for the lifetime of the round. The
    /// anonymous key agreement pair for the round is drawn from `rng`.
    pub fn new<R: Rng + CryptoRng>(
        group: Group,
        creds: Credentials,
        round_id: RoundId,
        params: Params,
        get_data: GetDataFn,
        create_shuffle: CreateShuffle,
        rng: &mut R,
    ) -> Result<Self> {
        let our_idx = group.index_of(creds.id()).map_err(|_| Error::NotMember)?;
        if params.app_broadcast && !group.contains(group.leader()) {
            return Err(Error::NoLeader);
        }
        let is_leader = creds.id() == group.leader();
        let size = group.size();
        Ok(BulkRound {
            group,
            creds,
            round_id,
            params,
            our_idx,
            is_leader,
            state: RoundState::Offline,
            get_data,
            create_shuffle,
            shuffle: None,
            blame_shuffle: None,
            anon_dh: DhKeyPair::generate(rng),
            my_cleartext: Vec::new(),
            my_slot_mask: Vec::new(),
            my_idx: None,
            my_xor_message: Vec::new(),
            descriptors: Vec::with_capacity(size),
            offsets: Vec::with_capacity(size),
            expected_bulk_size: 0,
            messages: vec![Vec::new(); size],
            received: vec![false; size],
            received_messages: 0,
            offline_log: MessageLog::new(),
            log: MessageLog::new(),
            bad_message_hashes: Vec::new(),
            blaming: false,
            bad_members: Vec::new(),
            cleartexts: Vec::new(),
        })
    }

    /// Starts the round: fetches the local contribution, commits it into a
    /// descriptor, and hands the serialized descriptor to a fresh shuffle.
    pub fn start(&mut self) -> Result<Step> {
        if self.state != RoundState::Offline {
            return Err(Error::AlreadyStarted);
        }
        let (data, _more) = (self.get_data)(self.params.max_payload);
        debug!("{}: sharing {} bytes this round", self, data.len());
        let (descriptor, my_slot_mask) = self.create_descriptor(&data)?;
        let blob = descriptor.encode();
        self.my_cleartext = data;
        self.my_slot_mask = my_slot_mask;

        let mut shuffle = (self.create_shuffle)(&self.group, &self.creds, &self.round_id);
        let messages = shuffle.start(blob).map_err(Error::Shuffle)?;
        self.shuffle = Some(shuffle);
        self.set_state(RoundState::Shuffling);

        let mut step = wrap_shuffle_step(messages, Message::Shuffle);
        step.extend(self.replay_offline()?);
        step.extend(self.poll_shuffle()?);
        Ok(step)
    }

    /// Handles a message received from `sender_id`.
    ///
    /// This must be called with every message we receive from another node.
    pub fn handle_message(&mut self, sender_id: &PeerId, message: Message) -> Result<Step> {
        if !self.group.contains(sender_id) {
            return Err(Error::UnknownSender);
        }
        let bytes = message.encode(&self.round_id);
        self.log.append(*sender_id, bytes, Some(message.clone()));
        self.dispatch(sender_id, message)
    }

    /// Handles raw message bytes received from `sender_id`, parsing them
    /// first. Peers sending unparseable bytes or a foreign round id are
    /// reported in the fault log and their message is dropped.
    pub fn handle_payload(&mut self, sender_id: &PeerId, payload: &[u8]) -> Result<Step> {
        if !self.group.contains(sender_id) {
            return Err(Error::UnknownSender);
        }
        match Message::decode(payload) {
            Err(err) => {
                debug!("{}: unparseable message from {}: {}", self, sender_id, err);
                self.log.append(*sender_id, payload.to_vec(), None);
                Ok(Fault::new(*sender_id, FaultKind::MalformedMessage).into())
            }
            Ok((round_id, message)) => {
                self.log
                    .append(*sender_id, payload.to_vec(), Some(message.clone()));
                if round_id != self.round_id {
                    debug!(
                        "{}: message for round {} from {} dropped",
                        self, round_id, sender_id
                    );
                    return Ok(Fault::new(*sender_id, FaultKind::WrongRound).into());
                }
                self.dispatch(sender_id, message)
            }
        }
    }

    /// The phase deadline expired. Fatal in every active phase: the members
    /// the round is still waiting on become bad members.
    pub fn handle_timeout(&mut self) -> Step {
        let mut step = Step::default();
        match self.state {
            RoundState::Offline | RoundState::Finished => return step,
            RoundState::Shuffling => {
                if let Some(shuffle) = &mut self.shuffle {
                    shuffle.handle_timeout();
                }
                let bad = self
                    .shuffle
                    .as_ref()
                    .map(|shuffle| shuffle.bad_members().to_vec())
                    .unwrap_or_default();
                self.adopt_bad_members(&bad, FaultKind::Timeout, &mut step);
            }
            RoundState::DataSharing
            | RoundState::ReceivingLeaderData
            | RoundState::ProcessingLeaderData => {
                if self.blaming {
                    if let Some(shuffle) = &mut self.blame_shuffle {
                        shuffle.handle_timeout();
                    }
                    let bad = self
                        .blame_shuffle
                        .as_ref()
                        .map(|shuffle| shuffle.bad_members().to_vec())
                        .unwrap_or_default();
                    self.adopt_bad_members(&bad, FaultKind::Timeout, &mut step);
                } else if self.params.app_broadcast && !self.is_leader {
                    // Still waiting on the leader's aggregate or transcript.
                    if let Ok(leader) = self.group.index_of(self.group.leader()) {
                        self.adopt_bad_members(&[leader], FaultKind::Timeout, &mut step);
                    }
                } else {
                    let missing: Vec<usize> = (0..self.group.size())
                        .filter(|&index| !self.received[index])
                        .collect();
                    self.adopt_bad_members(&missing, FaultKind::Timeout, &mut step);
                }
            }
        }
        self.finish_failed();
        step
    }

    /// Cancels the round: it finishes with no cleartexts and no bad members,
    /// and both shuffles are released.
    pub fn cancel(&mut self) {
        debug!("{}: round cancelled", self);
        self.shuffle = None;
        self.blame_shuffle = None;
        self.blaming = false;
        self.cleartexts.clear();
        self.bad_members.clear();
        self.set_state(RoundState::Finished);
    }

    /// Internal bulk state.
    pub fn state(&self) -> RoundState {
        self.state
    }

    /// The group this round runs in.
    pub fn group(&self) -> &Group {
        &self.group
    }

    /// The round nonce.
    pub fn round_id(&self) -> &RoundId {
        &self.round_id
    }

    /// Returns `true` if this member is the group leader.
    pub fn is_leader(&self) -> bool {
        self.is_leader
    }

    /// Group indices of members found misbehaving in the round.
    pub fn bad_members(&self) -> &[usize] {
        &self.bad_members
    }

    /// The recovered cleartexts in slot order; empty unless the round
    /// finished successfully.
    pub fn cleartexts(&self) -> &[Vec<u8>] {
        &self.cleartexts
    }

    /// The local node's anonymous slot index, once the shuffle completed.
    pub fn my_index(&self) -> Option<usize> {
        self.my_idx
    }

    /// The parsed descriptors in shuffle order.
    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    /// The recorded hash-check failures.
    pub fn bad_hashes(&self) -> &[BadHash] {
        &self.bad_message_hashes
    }

    /// The transcript of everything received.
    pub fn message_log(&self) -> &MessageLog<Message> {
        &self.log
    }

    /// Builds the descriptor for `data`, committing one mask hash per
    /// member, and returns it along with our own slot's mask.
    ///
    /// For every other member the mask is seeded by the agreement of our
    /// anonymous secret with that member's long-term public component; the
    /// member will derive the identical mask from its long-term secret and
    /// the anonymous public component in the descriptor. Our own mask is
    /// whatever makes all masks XOR to the cleartext.
    fn create_descriptor(&self, data: &[u8]) -> Result<(Descriptor, Vec<u8>)> {
        let size = self.group.size();
        let length = data.len();
        let mut xor_hashes = vec![[0; crypto::DIGEST_LEN]; size];
        let mut own_mask = data.to_vec();
        for index in 0..size {
            if index == self.our_idx {
                continue;
            }
            let secret = self
                .anon_dh
                .shared_secret(self.group.dh_at(index))
                .ok_or(Error::InvalidDhKey)?;
            let mask = prg::mask(&secret, length);
            xor_hashes[index] = crypto::hash(&mask);
            let previous = mem::take(&mut own_mask);
            xor_into(&mut own_mask, &previous, &mask);
        }
        xor_hashes[self.our_idx] = crypto::hash(&own_mask);
        let descriptor = Descriptor::new(
            length,
            self.anon_dh.public_bytes().to_vec(),
            xor_hashes,
            crypto::hash(data),
        );
        Ok((descriptor, own_mask))
    }

    /// Routes a message according to the current state: messages the state
    /// machine is not ready for are buffered and replayed on the next
    /// transition.
    fn dispatch(&mut self, sender_id: &PeerId, message: Message) -> Result<Step> {
        match (self.state, &message) {
            (RoundState::Finished, _) => {
                warn!("{}: dropping {} after round end", self, message.kind());
                Ok(Step::default())
            }
            (RoundState::Offline, _) | (RoundState::Shuffling, Message::BulkData(_))
            | (RoundState::Shuffling, Message::LoggedBulkData(_))
            | (RoundState::Shuffling, Message::AggregatedBulkData(_))
            | (RoundState::Shuffling, Message::BlameShuffle(_)) => {
                debug!("{}: buffering early {} from {}", self, message.kind(), sender_id);
                let bytes = message.encode(&self.round_id);
                self.offline_log.append(*sender_id, bytes, Some(message));
                Ok(Step::default())
            }
            (_, _) => match message {
                Message::Shuffle(payload) => self.handle_shuffle_message(sender_id, &payload),
                Message::BlameShuffle(payload) => {
                    self.handle_blame_shuffle_message(sender_id, &payload)
                }
                Message::BulkData(payload) => self.handle_bulk_data(sender_id, payload),
                Message::LoggedBulkData(entries) => {
                    self.handle_logged_bulk_data(sender_id, entries)
                }
                Message::AggregatedBulkData(payload) => {
                    self.handle_aggregated_bulk_data(sender_id, payload)
                }
            },
        }
    }

    /// Replays buffered messages in arrival order.
    fn replay_offline(&mut self) -> Result<Step> {
        let mut step = Step::default();
        for entry in self.offline_log.drain() {
            if let Some(message) = entry.message {
                step.extend(self.dispatch(&entry.sender, message)?);
            }
        }
        Ok(step)
    }

    /// Forwards carried traffic to the descriptor shuffle.
    fn handle_shuffle_message(&mut self, sender_id: &PeerId, payload: &[u8]) -> Result<Step> {
        let messages = match &mut self.shuffle {
            Some(shuffle) if !shuffle.terminated() => shuffle
                .handle_message(sender_id, payload)
                .map_err(Error::Shuffle)?,
            _ => {
                warn!("{}: dropping late shuffle message from {}", self, sender_id);
                return Ok(Step::default());
            }
        };
        let mut step = wrap_shuffle_step(messages, Message::Shuffle);
        step.extend(self.poll_shuffle()?);
        Ok(step)
    }

    /// Checks the descriptor shuffle for completion and processes its
    /// output.
    fn poll_shuffle(&mut self) -> Result<Step> {
        if self.state != RoundState::Shuffling {
            return Ok(Step::default());
        }
        let terminated = self
            .shuffle
            .as_ref()
            .map_or(false, |shuffle| shuffle.terminated());
        if !terminated {
            return Ok(Step::default());
        }
        let shuffle = self.shuffle.take().expect("checked above");
        if !shuffle.succeeded() {
            debug!("{}: descriptor shuffle failed", self);
            let mut step = Step::default();
            let bad = shuffle.bad_members().to_vec();
            self.adopt_bad_members(&bad, FaultKind::ShuffleFault, &mut step);
            self.finish_failed();
            return Ok(step);
        }
        let blobs = shuffle.output().to_vec();
        self.shuffle_finished(blobs)
    }

    /// The descriptor shuffle ended: parse the permuted descriptors, locate
    /// our slot, and begin data sharing.
    fn shuffle_finished(&mut self, blobs: Vec<Vec<u8>>) -> Result<Step> {
        let size = self.group.size();
        if blobs.len() != size {
            debug!(
                "{}: shuffle output has {} slots for {} members",
                self,
                blobs.len(),
                size
            );
            self.finish_failed();
            return Ok(Step::default());
        }
        let mut descriptors = Vec::with_capacity(size);
        for blob in &blobs {
            match Descriptor::decode(blob, size) {
                Ok(descriptor) if descriptor.anon_dh().len() == DH_PUBLIC_LEN => {
                    descriptors.push(descriptor)
                }
                Ok(_) => {
                    // A slot is anonymous until its owner is proven, so a bad
                    // descriptor cannot be pinned on anyone.
                    debug!("{}: descriptor with unusable agreement component", self);
                    self.finish_failed();
                    return Ok(Step::default());
                }
                Err(err) => {
                    debug!("{}: malformed descriptor in shuffle output: {}", self, err);
                    self.finish_failed();
                    return Ok(Step::default());
                }
            }
        }

        let my_public = self.anon_dh.public_bytes();
        let matches: Vec<usize> = descriptors
            .iter()
            .positions(|descriptor| descriptor.anon_dh() == my_public)
            .collect();
        let my_idx = match matches.as_slice() {
            [index] => *index,
            [] => {
                debug!("{}: no shuffle slot carries our anonymous key", self);
                self.finish_failed();
                return Ok(Step::default());
            }
            _ => {
                debug!("{}: multiple shuffle slots carry our anonymous key", self);
                self.finish_failed();
                return Ok(Step::default());
            }
        };

        self.offsets = descriptors
            .iter()
            .scan(0, |offset, descriptor| {
                let current = *offset;
                *offset += descriptor.length();
                Some(current)
            })
            .collect();
        self.expected_bulk_size = descriptors.iter().map(Descriptor::length).sum();
        self.descriptors = descriptors;
        self.my_idx = Some(my_idx);
        self.set_state(RoundState::DataSharing);
        self.prepare_blame_shuffle();

        let my_xor_message = self.generate_xor_messages()?;
        self.my_xor_message = my_xor_message.clone();
        self.messages[self.our_idx] = my_xor_message.clone();
        self.received[self.our_idx] = true;
        self.received_messages += 1;

        let mut step = Step::default();
        if self.params.app_broadcast {
            if !self.is_leader {
                let leader = *self.group.leader();
                step.messages
                    .push(Target::Node(leader).message(Message::BulkData(my_xor_message)));
            }
        } else {
            step.messages
                .push(Target::All.message(Message::BulkData(my_xor_message)));
        }
        step.extend(self.replay_offline()?);
        step.extend(self.try_process_messages()?);
        Ok(step)
    }

    /// Derives the concatenation of our masks for every slot.
    ///
    /// For our own slot this is the retained mask committed in our
    /// descriptor; for every other slot it is seeded by the agreement of our
    /// long-term secret with the slot's anonymous public component.
    fn generate_xor_messages(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.expected_bulk_size);
        for (index, descriptor) in self.descriptors.iter().enumerate() {
            if Some(index) == self.my_idx {
                out.extend_from_slice(&self.my_slot_mask);
                continue;
            }
            let secret = self
                .creds
                .dh()
                .shared_secret(descriptor.anon_dh())
                .ok_or(Error::InvalidDhKey)?;
            out.extend_from_slice(&prg::mask(&secret, descriptor.length()));
        }
        Ok(out)
    }

    /// Handles a member's XOR message.
    fn handle_bulk_data(&mut self, sender_id: &PeerId, payload: Vec<u8>) -> Result<Step> {
        if self.state != RoundState::DataSharing {
            warn!("{}: dropping BulkData from {} in {}", self, sender_id, self.state);
            return Ok(Step::default());
        }
        if self.params.app_broadcast && !self.is_leader {
            return Ok(Fault::new(*sender_id, FaultKind::UnexpectedMessage).into());
        }
        let index = self
            .group
            .index_of(sender_id)
            .map_err(|_| Error::UnknownSender)?;
        if self.received[index] {
            if self.messages[index] == payload {
                warn!("{}: duplicate BulkData from {}", self, sender_id);
                return Ok(Step::default());
            }
            return Ok(Fault::new(*sender_id, FaultKind::DuplicateBulkData).into());
        }
        if payload.len() != self.expected_bulk_size {
            debug!(
                "{}: BulkData from {} has {} bytes, expected {}",
                self,
                sender_id,
                payload.len(),
                self.expected_bulk_size
            );
            let step: Step = Fault::new(*sender_id, FaultKind::WrongLengthBulkData).into();
            self.bad_members.push(index);
            self.finish_failed();
            return Ok(step);
        }
        self.messages[index] = payload;
        self.received[index] = true;
        self.received_messages += 1;
        self.try_process_messages()
    }

    /// Processes the accumulated XOR messages once all members have
    /// delivered theirs.
    fn try_process_messages(&mut self) -> Result<Step> {
        if self.state != RoundState::DataSharing
            || self.blaming
            || self.received_messages < self.group.size()
        {
            return Ok(Step::default());
        }
        if self.params.app_broadcast {
            if self.is_leader {
                self.process_leader_data()
            } else {
                Ok(Step::default())
            }
        } else {
            self.process_messages()
        }
    }

    /// Recovers the cleartexts from the broadcast XOR messages, recording a
    /// `BadHash` for every member whose mask fails its commitment in a slot
    /// whose cleartext came out wrong.
    fn process_messages(&mut self) -> Result<Step> {
        let mut cleartexts = Vec::with_capacity(self.descriptors.len());
        let mut reports = Vec::new();
        for (index, descriptor) in self.descriptors.iter().enumerate() {
            let offset = self.offsets[index];
            let length = descriptor.length();
            let mut piece = vec![0; length];
            for message in &self.messages {
                let previous = mem::take(&mut piece);
                xor_into(&mut piece, &previous, &message[offset..offset + length]);
            }
            if crypto::hash(&piece) == *descriptor.cleartext_hash() {
                cleartexts.push(piece);
                continue;
            }
            if Some(index) == self.my_idx && piece != self.my_cleartext {
                warn!("{}: our own slot did not survive the round", self);
            }
            let implicated = find_bad_hashes(descriptor, index, offset, &self.messages);
            if implicated.is_empty() {
                // No mask contradicts the commitments: the anonymous owner
                // corrupted its own slot and cannot be localized.
                debug!("{}: slot {} dropped, no mask implicated", self, index);
            }
            reports.extend(implicated);
            cleartexts.push(Vec::new());
        }
        if reports.is_empty() {
            return Ok(self.finish_success(cleartexts));
        }
        let mut step = Step::default();
        self.report_bad_hashes(reports, &mut step);
        step.extend(self.begin_blame()?);
        Ok(step)
    }

    /// Leader only: verifies every member's mask for every slot, then either
    /// broadcasts the aggregated cleartext bulk or, on any failure, the full
    /// transcript.
    fn process_leader_data(&mut self) -> Result<Step> {
        self.set_state(RoundState::ProcessingLeaderData);
        let reports = self.check_all_hashes();
        let mut step = Step::default();
        if reports.is_empty() {
            let aggregate = self.aggregate();
            step.messages
                .push(Target::All.message(Message::AggregatedBulkData(aggregate.clone())));
            step.extend(self.process_aggregate(&aggregate));
            return Ok(step);
        }
        let entries: Vec<(PeerId, Vec<u8>)> = self
            .group
            .roster()
            .iter()
            .map(|member| *member.id())
            .zip(self.messages.iter().cloned())
            .collect();
        step.messages
            .push(Target::All.message(Message::LoggedBulkData(entries)));
        self.report_bad_hashes(reports, &mut step);
        step.extend(self.begin_blame()?);
        Ok(step)
    }

    /// XOR-accumulates all received messages into the cleartext bulk.
    fn aggregate(&self) -> Vec<u8> {
        let mut out = vec![0; self.expected_bulk_size];
        for message in &self.messages {
            let previous = mem::take(&mut out);
            xor_into(&mut out, &previous, message);
        }
        out
    }

    /// Splits an aggregated bulk into slots and verifies each against its
    /// committed cleartext hash. A mismatching slot is dropped: with every
    /// mask already validated, only the slot's anonymous owner can be
    /// responsible, and it cannot be localized.
    fn process_aggregate(&mut self, aggregate: &[u8]) -> Step {
        let mut cleartexts = Vec::with_capacity(self.descriptors.len());
        for (index, descriptor) in self.descriptors.iter().enumerate() {
            let offset = self.offsets[index];
            let piece = &aggregate[offset..offset + descriptor.length()];
            if crypto::hash(piece) == *descriptor.cleartext_hash() {
                cleartexts.push(piece.to_vec());
            } else {
                if Some(index) == self.my_idx && piece != self.my_cleartext.as_slice() {
                    warn!("{}: our own slot did not survive the round", self);
                }
                debug!("{}: slot {} dropped, cleartext hash mismatch", self, index);
                cleartexts.push(Vec::new());
            }
        }
        self.finish_success(cleartexts)
    }

    /// Handles the leader's aggregated cleartext bulk.
    fn handle_aggregated_bulk_data(&mut self, sender_id: &PeerId, payload: Vec<u8>) -> Result<Step> {
        if !self.params.app_broadcast {
            return Ok(Fault::new(*sender_id, FaultKind::UnexpectedMessage).into());
        }
        if sender_id != self.group.leader() {
            return Ok(Fault::new(*sender_id, FaultKind::NotLeader).into());
        }
        if self.state != RoundState::DataSharing || self.blaming {
            warn!("{}: dropping AggregatedBulkData in {}", self, self.state);
            return Ok(Step::default());
        }
        self.set_state(RoundState::ReceivingLeaderData);
        if payload.len() != self.expected_bulk_size {
            debug!(
                "{}: aggregate of {} bytes, expected {}",
                self,
                payload.len(),
                self.expected_bulk_size
            );
            let step: Step = Fault::new(*sender_id, FaultKind::LeaderEquivocation).into();
            if let Ok(leader) = self.group.index_of(sender_id) {
                self.bad_members.push(leader);
            }
            self.finish_failed();
            return Ok(step);
        }
        Ok(self.process_aggregate(&payload))
    }

    /// Handles the transcript the leader distributes when a mask failed its
    /// commitment: adopts it, reproduces the check, and either joins blame
    /// or — if the transcript replays clean or contradicts what we sent —
    /// convicts the leader of equivocation.
    fn handle_logged_bulk_data(
        &mut self,
        sender_id: &PeerId,
        entries: Vec<(PeerId, Vec<u8>)>,
    ) -> Result<Step> {
        if !self.params.app_broadcast {
            return Ok(Fault::new(*sender_id, FaultKind::UnexpectedMessage).into());
        }
        if sender_id != self.group.leader() {
            return Ok(Fault::new(*sender_id, FaultKind::NotLeader).into());
        }
        if self.state != RoundState::DataSharing || self.blaming {
            warn!("{}: dropping LoggedBulkData in {}", self, self.state);
            return Ok(Step::default());
        }
        let size = self.group.size();
        let leader_index = self
            .group
            .index_of(sender_id)
            .map_err(|_| Error::UnknownSender)?;

        let mut adopted = vec![Vec::new(); size];
        let mut seen = vec![false; size];
        let mut malformed = entries.len() != size;
        for (peer_id, payload) in entries {
            match self.group.index_of(&peer_id) {
                Ok(index) if !seen[index] => {
                    seen[index] = true;
                    adopted[index] = payload;
                }
                _ => {
                    malformed = true;
                    break;
                }
            }
        }
        if malformed {
            let step: Step = Fault::new(*sender_id, FaultKind::MalformedMessage).into();
            self.bad_members.push(leader_index);
            self.finish_failed();
            return Ok(step);
        }

        let wrong_length: Vec<usize> = adopted
            .iter()
            .positions(|payload| payload.len() != self.expected_bulk_size)
            .collect();
        if !wrong_length.is_empty() {
            let mut step = Step::default();
            self.adopt_bad_members(&wrong_length, FaultKind::WrongLengthBulkData, &mut step);
            self.finish_failed();
            return Ok(step);
        }

        // We know what we sent; a diverging transcript convicts the leader.
        if adopted[self.our_idx] != self.my_xor_message {
            debug!("{}: leader transcript contradicts our own message", self);
            let step: Step = Fault::new(*sender_id, FaultKind::LeaderEquivocation).into();
            self.bad_members.push(leader_index);
            self.finish_failed();
            return Ok(step);
        }

        self.messages = adopted;
        self.received = vec![true; size];
        self.received_messages = size;

        let reports = self.check_all_hashes();
        if reports.is_empty() {
            // The leader claimed a fault that the transcript does not show.
            debug!("{}: leader transcript replays clean", self);
            let step: Step = Fault::new(*sender_id, FaultKind::LeaderEquivocation).into();
            self.bad_members.push(leader_index);
            self.finish_failed();
            return Ok(step);
        }
        let mut step = Step::default();
        self.report_bad_hashes(reports, &mut step);
        step.extend(self.begin_blame()?);
        Ok(step)
    }

    /// Verifies every member's mask for every slot against the committed
    /// hashes, in `(slot, member)` order.
    fn check_all_hashes(&self) -> Vec<BadHash> {
        let mut reports = Vec::new();
        for (index, descriptor) in self.descriptors.iter().enumerate() {
            reports.extend(find_bad_hashes(
                descriptor,
                index,
                self.offsets[index],
                &self.messages,
            ));
        }
        reports
    }

    /// Records hash-check failures and their fault log entries.
    fn report_bad_hashes(&mut self, reports: Vec<BadHash>, step: &mut Step) {
        for report in &reports {
            debug!(
                "{}: mask hash mismatch in slot {} from member {}",
                self, report.descriptor, report.peer
            );
            if let Some(&id) = self.group.id_at(report.peer) {
                step.fault_log.append(id, FaultKind::BadMaskHash);
            }
        }
        self.bad_message_hashes = reports;
    }

    /// Creates the blame shuffle so it is ready on demand. Its nonce is
    /// derived from the round nonce.
    fn prepare_blame_shuffle(&mut self) {
        let blame_id = self.blame_round_id();
        self.blame_shuffle = Some((self.create_shuffle)(&self.group, &self.creds, &blame_id));
    }

    fn blame_round_id(&self) -> RoundId {
        let mut input = self.round_id.as_bytes().to_vec();
        input.extend_from_slice(b"blame");
        let digest = crypto::hash(&input);
        let mut bytes = [0; ID_LENGTH];
        bytes.copy_from_slice(&digest[..ID_LENGTH]);
        RoundId::from_bytes(bytes)
    }

    /// Starts the blame shuffle, revealing the agreement outputs behind the
    /// failed commitments of our own slot.
    fn begin_blame(&mut self) -> Result<Step> {
        if self.blaming {
            return Ok(Step::default());
        }
        debug!("{}: entering blame", self);
        self.blaming = true;
        if self.blame_shuffle.is_none() {
            self.prepare_blame_shuffle();
        }
        let payload = self.blame_payload();
        let messages = match &mut self.blame_shuffle {
            Some(shuffle) => shuffle.start(payload).map_err(Error::Shuffle)?,
            None => Vec::new(),
        };
        let mut step = wrap_shuffle_step(messages, Message::BlameShuffle);
        step.extend(self.poll_blame_shuffle()?);
        Ok(step)
    }

    /// The blame entries we can reveal: one per failed commitment of the
    /// slot we own.
    fn blame_payload(&self) -> Vec<u8> {
        let mut entries = Vec::new();
        if let Some(my_idx) = self.my_idx {
            for report in &self.bad_message_hashes {
                if report.descriptor != my_idx {
                    continue;
                }
                if let Some(secret) = self.anon_dh.shared_secret(self.group.dh_at(report.peer)) {
                    entries.push(BlameEntry {
                        descriptor: report.descriptor,
                        peer: report.peer,
                        secret: secret.to_vec(),
                    });
                }
            }
        }
        blame::encode_entries(&entries)
    }

    /// Forwards carried traffic to the blame shuffle.
    fn handle_blame_shuffle_message(&mut self, sender_id: &PeerId, payload: &[u8]) -> Result<Step> {
        let messages = match &mut self.blame_shuffle {
            Some(shuffle) if !shuffle.terminated() => shuffle
                .handle_message(sender_id, payload)
                .map_err(Error::Shuffle)?,
            _ => {
                warn!("{}: dropping blame shuffle message from {}", self, sender_id);
                return Ok(Step::default());
            }
        };
        let mut step = wrap_shuffle_step(messages, Message::BlameShuffle);
        step.extend(self.poll_blame_shuffle()?);
        Ok(step)
    }

    /// Checks the blame shuffle for completion and convicts from its
    /// reveals.
    fn poll_blame_shuffle(&mut self) -> Result<Step> {
        if !self.blaming || self.state == RoundState::Finished {
            return Ok(Step::default());
        }
        let terminated = self
            .blame_shuffle
            .as_ref()
            .map_or(false, |shuffle| shuffle.terminated());
        if !terminated {
            return Ok(Step::default());
        }
        let shuffle = self.blame_shuffle.take().expect("checked above");
        let mut step = Step::default();
        if !shuffle.succeeded() {
            debug!("{}: blame shuffle failed", self);
            let bad = shuffle.bad_members().to_vec();
            self.adopt_bad_members(&bad, FaultKind::ShuffleFault, &mut step);
            self.finish_failed();
            return Ok(step);
        }
        let mut entries = Vec::new();
        for blob in shuffle.output() {
            match blame::decode_entries(blob) {
                Ok(mut parsed) => entries.append(&mut parsed),
                Err(err) => debug!("{}: ignoring malformed blame reveal: {}", self, err),
            }
        }
        let convicted = blame::convict(&entries, &self.descriptors, &self.offsets, &self.messages);
        self.adopt_bad_members(&convicted, FaultKind::BadMaskHash, &mut step);
        self.finish_failed();
        Ok(step)
    }

    /// Records the given group indices as bad members, with fault log
    /// entries of the given kind.
    fn adopt_bad_members(&mut self, indices: &[usize], kind: FaultKind, step: &mut Step) {
        for &index in indices {
            if let Some(&id) = self.group.id_at(index) {
                step.fault_log.append(id, kind.clone());
            }
            self.bad_members.push(index);
        }
    }

    /// Ends the round successfully with the recovered cleartexts.
    fn finish_success(&mut self, cleartexts: Vec<Vec<u8>>) -> Step {
        self.cleartexts = cleartexts;
        self.shuffle = None;
        self.blame_shuffle = None;
        self.set_state(RoundState::Finished);
        Step::default().with_output(self.cleartexts.clone())
    }

    /// Ends the round without cleartexts.
    fn finish_failed(&mut self) {
        self.cleartexts.clear();
        self.bad_members.sort_unstable();
        self.bad_members.dedup();
        self.shuffle = None;
        self.blame_shuffle = None;
        self.set_state(RoundState::Finished);
    }

    fn set_state(&mut self, state: RoundState) {
        debug!("{}: {} -> {}", self, self.state, state);
        self.state = state;
    }
}

/// Returns a `BadHash` for every member whose mask for the given slot fails
/// the committed hash, in member order.
fn find_bad_hashes(
    descriptor: &Descriptor,
    index: usize,
    offset: usize,
    messages: &[Vec<u8>],
) -> Vec<BadHash> {
    let length = descriptor.length();
    let mut reports = Vec::new();
    for (peer, message) in messages.iter().enumerate() {
        let mask = &message[offset..offset + length];
        if descriptor.xor_hash(peer) != Some(&crypto::hash(mask)) {
            reports.push(BadHash {
                descriptor: index,
                peer,
            });
        }
    }
    reports
}

fn wrap_shuffle_step(messages: ShuffleMessages, wrap: fn(Vec<u8>) -> Message) -> Step {
    let mut step = Step::default();
    step.messages = messages
        .into_iter()
        .map(|message| message.map(&wrap))
        .collect();
    step
}

impl ConsensusProtocol for BulkRound {
    type NodeId = PeerId;
    type Input = ();
    type Output = Vec<Vec<u8>>;
    type Message = Message;
    type Error = Error;
    type FaultKind = FaultKind;

    fn handle_input<R: Rng>(&mut self, _input: (), _rng: &mut R) -> Result<Step> {
        self.start()
    }

    fn handle_message<R: Rng>(
        &mut self,
        sender_id: &PeerId,
        message: Message,
        _rng: &mut R,
    ) -> Result<Step> {
        self.handle_message(sender_id, message)
    }

    fn terminated(&self) -> bool {
        self.state == RoundState::Finished
    }

    fn our_id(&self) -> &PeerId {
        self.creds.id()
    }
}

impl fmt::Display for BulkRound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} BulkRound({})", self.our_id(), self.round_id)
    }
}
