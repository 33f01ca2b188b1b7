//! A virtual network for bulk round tests: an in-memory message queue with
//! deterministic cranking, an adversary hook that can tamper with or drop
//! in-flight messages, and a deterministic in-memory shuffle.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};

use rand::{CryptoRng, Rng};

use dcnet::bulk::{BulkRoundBuilder, FaultKind, Message, Params, Step};
use dcnet::crypto::dh::DhKeyPair;
use dcnet::crypto::{self, prg};
use dcnet::descriptor::Descriptor;
use dcnet::shuffle::{self, CreateShuffle, ShuffleMessages, ShuffleRound};
use dcnet::util::xor_into;
use dcnet::{
    Credentials, Fault, Group, PeerId, RoundId, SubgroupPolicy, Target, ID_LENGTH,
};

/// The nonce every test round runs under.
pub fn round_id() -> RoundId {
    RoundId::from_bytes([0x42; ID_LENGTH])
}

/// Small ids whose roster order matches their index order.
pub fn make_ids(count: usize) -> Vec<PeerId> {
    (1..=count as u8)
        .map(|byte| PeerId::from_bytes([byte; ID_LENGTH]))
        .collect()
}

pub fn make_credentials<R: Rng + CryptoRng>(ids: &[PeerId], rng: &mut R) -> Vec<Credentials> {
    ids.iter()
        .map(|id| Credentials::generate(*id, rng))
        .collect()
}

pub fn make_group(creds: &[Credentials], leader: PeerId) -> Group {
    let roster = creds.iter().map(Credentials::to_member).collect();
    Group::new(roster, leader, SubgroupPolicy::CompleteGroup).expect("valid roster")
}

/// A deterministic in-memory shuffle: every member broadcasts its blob, and
/// once all blobs are collected they are output in sorted order, which is
/// identical at every member. Anonymity is irrelevant here; only the round
/// abstraction is.
#[derive(Debug)]
pub struct TestShuffle {
    group: Group,
    our_id: PeerId,
    started: bool,
    inputs: BTreeMap<PeerId, Vec<u8>>,
    output: Vec<Vec<u8>>,
    terminated: bool,
    succeeded: bool,
    bad_members: Vec<usize>,
    tamper: Option<fn(&mut Vec<Vec<u8>>)>,
}

impl TestShuffle {
    pub fn new(group: Group, our_id: PeerId) -> Self {
        TestShuffle {
            group,
            our_id,
            started: false,
            inputs: BTreeMap::new(),
            output: Vec::new(),
            terminated: false,
            succeeded: false,
            bad_members: Vec::new(),
            tamper: None,
        }
    }

    pub fn with_tamper(group: Group, our_id: PeerId, tamper: fn(&mut Vec<Vec<u8>>)) -> Self {
        let mut shuffle = Self::new(group, our_id);
        shuffle.tamper = Some(tamper);
        shuffle
    }

    fn try_complete(&mut self) {
        if self.terminated || !self.started || self.inputs.len() < self.group.size() {
            return;
        }
        let mut blobs: Vec<Vec<u8>> = self.inputs.values().cloned().collect();
        blobs.sort();
        if let Some(tamper) = self.tamper {
            tamper(&mut blobs);
        }
        self.output = blobs;
        self.succeeded = true;
        self.terminated = true;
    }
}

impl ShuffleRound for TestShuffle {
    fn start(&mut self, input: Vec<u8>) -> shuffle::Result<ShuffleMessages> {
        if self.started {
            return Err(shuffle::Error::AlreadyStarted);
        }
        self.started = true;
        self.inputs.insert(self.our_id, input.clone());
        self.try_complete();
        Ok(vec![Target::All.message(input)])
    }

    fn handle_message(&mut self, sender_id: &PeerId, payload: &[u8]) -> shuffle::Result<ShuffleMessages> {
        if self.terminated || !self.group.contains(sender_id) {
            return Ok(Vec::new());
        }
        self.inputs
            .entry(*sender_id)
            .or_insert_with(|| payload.to_vec());
        self.try_complete();
        Ok(Vec::new())
    }

    fn handle_timeout(&mut self) {
        if self.terminated {
            return;
        }
        self.bad_members = self
            .group
            .roster()
            .iter()
            .enumerate()
            .filter(|(_, member)| !self.inputs.contains_key(member.id()))
            .map(|(index, _)| index)
            .collect();
        self.succeeded = false;
        self.terminated = true;
    }

    fn terminated(&self) -> bool {
        self.terminated
    }

    fn succeeded(&self) -> bool {
        self.succeeded
    }

    fn output(&self) -> &[Vec<u8>] {
        &self.output
    }

    fn bad_members(&self) -> &[usize] {
        &self.bad_members
    }
}

pub fn test_shuffle_factory() -> CreateShuffle {
    Box::new(|group, creds, _round_id| Box::new(TestShuffle::new(group.clone(), *creds.id())))
}

pub fn tampering_shuffle_factory(tamper: fn(&mut Vec<Vec<u8>>)) -> CreateShuffle {
    Box::new(move |group, creds, _round_id| {
        Box::new(TestShuffle::with_tamper(group.clone(), *creds.id(), tamper))
    })
}

/// One simulated node: its round plus everything it emitted.
pub struct TestNode {
    pub round: dcnet::bulk::BulkRound,
    pub outputs: Vec<Vec<Vec<u8>>>,
    pub faults: Vec<Fault<PeerId, FaultKind>>,
}

/// Decides the fate of an in-flight message: mutate it at will, return
/// `false` to drop it.
pub type Adversary = Box<dyn FnMut(&PeerId, &PeerId, &mut Message) -> bool>;

/// An in-memory network of bulk rounds with a FIFO message queue.
pub struct VirtualNet {
    pub nodes: BTreeMap<PeerId, TestNode>,
    member_ids: Vec<PeerId>,
    queue: VecDeque<(PeerId, PeerId, Message)>,
    /// Deliveries to members without a simulated node, e.g. a hand-driven
    /// adversarial member.
    pub inboxes: BTreeMap<PeerId, Vec<(PeerId, Message)>>,
    adversary: Option<Adversary>,
}

impl VirtualNet {
    pub fn new(group: &Group) -> Self {
        VirtualNet {
            nodes: BTreeMap::new(),
            member_ids: group.roster().iter().map(|member| *member.id()).collect(),
            queue: VecDeque::new(),
            inboxes: BTreeMap::new(),
            adversary: None,
        }
    }

    pub fn set_adversary(&mut self, adversary: Adversary) {
        self.adversary = Some(adversary);
    }

    pub fn add_node<R: Rng + CryptoRng>(
        &mut self,
        group: &Group,
        creds: Credentials,
        params: Params,
        contribution: Vec<u8>,
        create_shuffle: CreateShuffle,
        rng: &mut R,
    ) {
        let id = *creds.id();
        let round = BulkRoundBuilder::new(group.clone())
            .params(params)
            .build(
                creds,
                round_id(),
                Box::new(move |_max| (contribution.clone(), false)),
                create_shuffle,
                rng,
            )
            .expect("valid round configuration");
        self.nodes.insert(
            id,
            TestNode {
                round,
                outputs: Vec::new(),
                faults: Vec::new(),
            },
        );
    }

    pub fn start_all(&mut self) {
        let ids: Vec<PeerId> = self.nodes.keys().cloned().collect();
        for id in ids {
            let step = self
                .nodes
                .get_mut(&id)
                .unwrap()
                .round
                .start()
                .expect("start");
            self.dispatch_step(id, step);
        }
    }

    /// Injects a message as if sent by `from`, who need not have a node.
    pub fn inject(&mut self, from: PeerId, target: Target<PeerId>, message: Message) {
        match target {
            Target::Node(to) => self.queue.push_back((from, to, message)),
            Target::All => {
                for &to in &self.member_ids.clone() {
                    if to != from {
                        self.queue.push_back((from, to, message.clone()));
                    }
                }
            }
        }
    }

    /// Delivers one queued message. Returns `false` once the queue is empty.
    pub fn crank(&mut self) -> bool {
        let (from, to, mut message) = match self.queue.pop_front() {
            Some(item) => item,
            None => return false,
        };
        if let Some(adversary) = &mut self.adversary {
            if !adversary(&from, &to, &mut message) {
                return true;
            }
        }
        if self.nodes.contains_key(&to) {
            let step = self
                .nodes
                .get_mut(&to)
                .unwrap()
                .round
                .handle_message(&from, message)
                .expect("handle_message");
            self.dispatch_step(to, step);
        } else {
            self.inboxes.entry(to).or_default().push((from, message));
        }
        true
    }

    /// Delivers messages until the network is quiescent.
    pub fn run(&mut self) {
        while self.crank() {}
    }

    /// Expires the current phase deadline at every node.
    pub fn timeout_all(&mut self) {
        let ids: Vec<PeerId> = self.nodes.keys().cloned().collect();
        for id in ids {
            let step = self.nodes.get_mut(&id).unwrap().round.handle_timeout();
            self.dispatch_step(id, step);
        }
    }

    fn dispatch_step(&mut self, from: PeerId, step: Step) {
        if let Some(node) = self.nodes.get_mut(&from) {
            node.outputs.extend(step.output);
            node.faults.extend(step.fault_log);
        }
        for targeted in step.messages {
            match targeted.target {
                Target::Node(to) => self.queue.push_back((from, to, targeted.message)),
                Target::All => {
                    for &to in &self.member_ids {
                        if to != from {
                            self.queue.push_back((from, to, targeted.message.clone()));
                        }
                    }
                }
            }
        }
    }
}

/// Builds a fully honest network, one node per contribution, with ids in
/// roster order. With application broadcast the first id is the leader.
pub fn honest_net<R: Rng + CryptoRng>(
    contributions: &[&[u8]],
    app_broadcast: bool,
    rng: &mut R,
) -> VirtualNet {
    let ids = make_ids(contributions.len());
    let creds = make_credentials(&ids, rng);
    let leader = if app_broadcast { ids[0] } else { PeerId::ZERO };
    let group = make_group(&creds, leader);
    let params = Params {
        app_broadcast,
        ..Params::default()
    };
    let mut net = VirtualNet::new(&group);
    for (creds, contribution) in creds.into_iter().zip(contributions) {
        net.add_node(
            &group,
            creds,
            params.clone(),
            contribution.to_vec(),
            test_shuffle_factory(),
            rng,
        );
    }
    net
}

/// A hand-driven group member: it follows the descriptor protocol honestly
/// up to commitment, then sends exactly the bytes a test tells it to. Used
/// to play the corrupting peer in blame scenarios.
pub struct Puppet {
    pub creds: Credentials,
    pub anon: DhKeyPair,
    pub group: Group,
    pub cleartext: Vec<u8>,
    pub own_mask: Vec<u8>,
    pub descriptor: Descriptor,
}

impl Puppet {
    pub fn new<R: Rng + CryptoRng>(
        creds: Credentials,
        group: Group,
        cleartext: Vec<u8>,
        rng: &mut R,
    ) -> Self {
        let anon = DhKeyPair::generate(rng);
        let our_idx = group.index_of(creds.id()).unwrap();
        let length = cleartext.len();
        let mut xor_hashes = vec![[0; crypto::DIGEST_LEN]; group.size()];
        let mut own_mask = cleartext.clone();
        for index in 0..group.size() {
            if index == our_idx {
                continue;
            }
            let secret = anon.shared_secret(group.dh_at(index)).unwrap();
            let mask = prg::mask(&secret, length);
            xor_hashes[index] = crypto::hash(&mask);
            let previous = std::mem::take(&mut own_mask);
            xor_into(&mut own_mask, &previous, &mask);
        }
        xor_hashes[our_idx] = crypto::hash(&own_mask);
        let descriptor = Descriptor::new(
            length,
            anon.public_bytes().to_vec(),
            xor_hashes,
            crypto::hash(&cleartext),
        );
        Puppet {
            creds,
            anon,
            group,
            cleartext,
            own_mask,
            descriptor,
        }
    }

    pub fn id(&self) -> PeerId {
        *self.creds.id()
    }

    pub fn shuffle_blob(&self) -> Vec<u8> {
        self.descriptor.encode()
    }

    /// The slot index our descriptor landed on.
    pub fn slot_in(&self, descriptors: &[Descriptor]) -> usize {
        descriptors
            .iter()
            .position(|descriptor| descriptor.anon_dh() == self.anon.public_bytes())
            .expect("own descriptor in shuffle output")
    }

    /// Our honest XOR message for the given shuffle output.
    pub fn xor_message(&self, descriptors: &[Descriptor]) -> Vec<u8> {
        let own_slot = self.slot_in(descriptors);
        let mut out = Vec::new();
        for (index, descriptor) in descriptors.iter().enumerate() {
            if index == own_slot {
                out.extend_from_slice(&self.own_mask);
                continue;
            }
            let secret = self
                .creds
                .dh()
                .shared_secret(descriptor.anon_dh())
                .expect("valid anonymous component");
            out.extend_from_slice(&prg::mask(&secret, descriptor.length()));
        }
        out
    }
}

/// Decodes and sorts the shuffle blobs exactly as `TestShuffle` outputs
/// them, yielding the descriptors in slot order.
pub fn slot_descriptors(mut blobs: Vec<Vec<u8>>, group_size: usize) -> Vec<Descriptor> {
    blobs.sort();
    blobs
        .iter()
        .map(|blob| Descriptor::decode(blob, group_size).expect("valid descriptor"))
        .collect()
}

/// Byte range of the given slot within an XOR message.
pub fn slot_range(descriptors: &[Descriptor], slot: usize) -> std::ops::Range<usize> {
    let offset: usize = descriptors[..slot].iter().map(Descriptor::length).sum();
    offset..offset + descriptors[slot].length()
}
