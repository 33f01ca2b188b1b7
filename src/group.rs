//! Ordered, immutable membership rosters.
//!
//! A `Group` is the reference frame every round is indexed against: members
//! are sorted into a canonical order, and a member's position in that order
//! is its index in descriptors, XOR messages and blame reports. Groups are
//! immutable; "mutations" return new groups that share the roster storage
//! with the old one where possible.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use derivative::Derivative;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::crypto::sig::VerifyKey;
use crate::id::{PeerId, ID_LENGTH};
use crate::util::{self, put_i32, SliceReader};

/// A group error.
#[derive(Clone, PartialEq, Debug, ThisError)]
pub enum Error {
    /// Two roster entries share an id.
    #[error("Duplicate member id in roster")]
    DuplicateMember,
    /// The id is not in the roster.
    #[error("Id is not a group member")]
    NotMember,
    /// An unknown subgroup policy tag or name.
    #[error("Unknown subgroup policy")]
    UnknownPolicy,
    /// The group encoding is truncated or otherwise unreadable.
    #[error("Malformed group encoding")]
    Malformed,
}

/// A group result.
pub type Result<T> = std::result::Result<T, Error>;

/// The rule governing which subset of the roster participates in an inner
/// round.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubgroupPolicy {
    /// The subgroup is the whole roster.
    CompleteGroup,
    /// The subgroup is a fixed, externally supplied subset of the roster.
    FixedSubgroup,
    /// There is no subgroup.
    DisabledGroup,
}

/// Policy names, one entry per variant. Conversions go through this table in
/// both directions rather than through any runtime reflection.
const POLICY_NAMES: &[(SubgroupPolicy, &str)] = &[
    (SubgroupPolicy::CompleteGroup, "CompleteGroup"),
    (SubgroupPolicy::FixedSubgroup, "FixedSubgroup"),
    (SubgroupPolicy::DisabledGroup, "DisabledGroup"),
];

impl SubgroupPolicy {
    /// The policy's wire tag.
    pub fn tag(self) -> u8 {
        match self {
            SubgroupPolicy::CompleteGroup => 0,
            SubgroupPolicy::FixedSubgroup => 1,
            SubgroupPolicy::DisabledGroup => 255,
        }
    }

    /// Looks a policy up by its wire tag.
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(SubgroupPolicy::CompleteGroup),
            1 => Ok(SubgroupPolicy::FixedSubgroup),
            255 => Ok(SubgroupPolicy::DisabledGroup),
            _ => Err(Error::UnknownPolicy),
        }
    }

    /// The policy's name.
    pub fn name(self) -> &'static str {
        POLICY_NAMES
            .iter()
            .find(|(policy, _)| *policy == self)
            .expect("every policy is in the name table")
            .1
    }
}

impl fmt::Display for SubgroupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SubgroupPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        POLICY_NAMES
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(policy, _)| *policy)
            .ok_or(Error::UnknownPolicy)
    }
}

/// A roster entry: a member's id, verification key and long-term key
/// agreement public component.
///
/// Members order by `(id, key bytes, agreement bytes)`, strictly
/// lexicographic, so that ties on id can never order inconsistently with
/// equality.
#[derive(Clone, Derivative, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[derivative(Debug)]
pub struct GroupMember {
    id: PeerId,
    key: VerifyKey,
    #[derivative(Debug(format_with = "util::fmt_hex"))]
    dh_key: Vec<u8>,
}

impl GroupMember {
    /// Creates a roster entry.
    pub fn new(id: PeerId, key: VerifyKey, dh_key: Vec<u8>) -> Self {
        GroupMember { id, key, dh_key }
    }

    /// The member's id.
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// The member's verification key.
    pub fn key(&self) -> &VerifyKey {
        &self.key
    }

    /// The member's key agreement public component.
    pub fn dh_key(&self) -> &[u8] {
        &self.dh_key
    }
}

/// Shared storage behind a `Group`.
#[derive(Debug)]
struct GroupData {
    /// The members in canonical order.
    roster: Vec<GroupMember>,
    /// Member id to roster index.
    indices: BTreeMap<PeerId, usize>,
    /// The designated leader; `PeerId::ZERO` for "no leader".
    leader: PeerId,
    /// The subgroup policy.
    policy: SubgroupPolicy,
}

/// An ordered, immutable roster of members with a designated leader and a
/// subgroup policy.
#[derive(Clone, Debug)]
pub struct Group {
    data: Arc<GroupData>,
    /// The derived subgroup; `None` means the subgroup is the group itself.
    subgroup: Option<Arc<Group>>,
}

impl Group {
    /// Creates a group from a potentially unsorted roster.
    ///
    /// The roster is sorted into canonical order and indexed by id. Fails
    /// with `DuplicateMember` if two entries share an id. The subgroup is
    /// derived from the policy: the whole roster for `CompleteGroup` and
    /// (absent explicit configuration, see [`Group::with_subgroup`]) for
    /// `FixedSubgroup`; empty for `DisabledGroup`.
    pub fn new(roster: Vec<GroupMember>, leader: PeerId, policy: SubgroupPolicy) -> Result<Self> {
        let subgroup = match policy {
            SubgroupPolicy::CompleteGroup | SubgroupPolicy::FixedSubgroup => None,
            SubgroupPolicy::DisabledGroup => Some(Arc::new(Group::empty())),
        };
        Self::with_parts(roster, leader, policy, subgroup)
    }

    /// Creates a `FixedSubgroup` group with an explicitly configured inner
    /// subgroup. The membership rule producing `subgroup_roster` is supplied
    /// by the caller; it is not re-derived here.
    pub fn with_subgroup(
        roster: Vec<GroupMember>,
        leader: PeerId,
        subgroup_roster: Vec<GroupMember>,
    ) -> Result<Self> {
        let inner = Group::new(subgroup_roster, leader, SubgroupPolicy::CompleteGroup)?;
        Self::with_parts(
            roster,
            leader,
            SubgroupPolicy::FixedSubgroup,
            Some(Arc::new(inner)),
        )
    }

    fn with_parts(
        mut roster: Vec<GroupMember>,
        leader: PeerId,
        policy: SubgroupPolicy,
        subgroup: Option<Arc<Group>>,
    ) -> Result<Self> {
        roster.sort();
        if roster.windows(2).any(|pair| pair[0].id == pair[1].id) {
            return Err(Error::DuplicateMember);
        }
        let indices = roster
            .iter()
            .enumerate()
            .map(|(index, member)| (member.id, index))
            .collect();
        Ok(Group {
            data: Arc::new(GroupData {
                roster,
                indices,
                leader,
                policy,
            }),
            subgroup,
        })
    }

    /// Creates an empty group: no members, no leader, `CompleteGroup` policy.
    pub fn empty() -> Self {
        Group {
            data: Arc::new(GroupData {
                roster: Vec::new(),
                indices: BTreeMap::new(),
                leader: PeerId::ZERO,
                policy: SubgroupPolicy::CompleteGroup,
            }),
            subgroup: None,
        }
    }

    /// The members in canonical order.
    pub fn roster(&self) -> &[GroupMember] {
        &self.data.roster
    }

    /// The number of members.
    pub fn size(&self) -> usize {
        self.data.roster.len()
    }

    /// Returns `true` if the group has no members.
    pub fn is_empty(&self) -> bool {
        self.data.roster.is_empty()
    }

    /// The designated leader; `PeerId::ZERO` for "no leader".
    pub fn leader(&self) -> &PeerId {
        &self.data.leader
    }

    /// The subgroup policy.
    pub fn policy(&self) -> SubgroupPolicy {
        self.data.policy
    }

    /// The inner subgroup derived from the policy.
    pub fn subgroup(&self) -> &Group {
        match &self.subgroup {
            Some(inner) => inner,
            None => self,
        }
    }

    /// The id at the given roster index.
    pub fn id_at(&self, index: usize) -> Option<&PeerId> {
        self.data.roster.get(index).map(GroupMember::id)
    }

    /// The roster index of the given id.
    pub fn index_of(&self, id: &PeerId) -> Result<usize> {
        self.data.indices.get(id).copied().ok_or(Error::NotMember)
    }

    /// Returns `true` if the id is a member.
    pub fn contains(&self, id: &PeerId) -> bool {
        self.data.indices.contains_key(id)
    }

    /// The id after the given one in roster order, wrapping around.
    pub fn next(&self, id: &PeerId) -> Result<&PeerId> {
        let index = self.index_of(id)?;
        Ok(self.data.roster[(index + 1) % self.size()].id())
    }

    /// The id before the given one in roster order, wrapping around.
    pub fn previous(&self, id: &PeerId) -> Result<&PeerId> {
        let index = self.index_of(id)?;
        Ok(self.data.roster[(index + self.size() - 1) % self.size()].id())
    }

    /// The verification key of the given id, or the empty sentinel if the id
    /// is not a member. Callers that need to distinguish the two cases must
    /// check `contains` first.
    pub fn key_of(&self, id: &PeerId) -> VerifyKey {
        match self.data.indices.get(id) {
            Some(&index) => self.data.roster[index].key.clone(),
            None => VerifyKey::empty(),
        }
    }

    /// The verification key at the given roster index, or the empty sentinel
    /// if out of range.
    pub fn key_at(&self, index: usize) -> VerifyKey {
        self.data
            .roster
            .get(index)
            .map(|member| member.key.clone())
            .unwrap_or_else(VerifyKey::empty)
    }

    /// The key agreement public component of the given id, or empty bytes if
    /// the id is not a member.
    pub fn dh_of(&self, id: &PeerId) -> &[u8] {
        match self.data.indices.get(id) {
            Some(&index) => &self.data.roster[index].dh_key,
            None => &[],
        }
    }

    /// The key agreement public component at the given roster index, or empty
    /// bytes if out of range.
    pub fn dh_at(&self, index: usize) -> &[u8] {
        self.data
            .roster
            .get(index)
            .map(|member| member.dh_key.as_slice())
            .unwrap_or(&[])
    }

    /// Returns a new group with `member` added. The roster is re-sorted and
    /// re-indexed. Fails with `DuplicateMember` if the id is already present.
    pub fn add_member(&self, member: GroupMember) -> Result<Group> {
        let mut roster = self.data.roster.clone();
        roster.push(member);
        Group::new(roster, self.data.leader, self.data.policy)
    }

    /// Returns a new group with the given id removed. If the id is not a
    /// member, the result shares this group's storage.
    pub fn remove_member(&self, id: &PeerId) -> Group {
        if !self.contains(id) {
            return self.clone();
        }
        let roster = self
            .data
            .roster
            .iter()
            .filter(|member| member.id() != id)
            .cloned()
            .collect();
        Group::new(roster, self.data.leader, self.data.policy)
            .expect("removal cannot introduce duplicates")
    }

    /// Serializes the group: policy tag, leader id, member count, then each
    /// member as id, length-prefixed key bytes and length-prefixed agreement
    /// bytes. All integers are big-endian.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.data.policy.tag());
        out.extend_from_slice(self.data.leader.as_bytes());
        put_i32(&mut out, self.size() as i32);
        for member in &self.data.roster {
            out.extend_from_slice(member.id.as_bytes());
            put_i32(&mut out, member.key.as_bytes().len() as i32);
            out.extend_from_slice(member.key.as_bytes());
            put_i32(&mut out, member.dh_key.len() as i32);
            out.extend_from_slice(&member.dh_key);
        }
        out
    }

    /// Deserializes a group. The roster order is recomputed by `new`, not
    /// trusted from the input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Group> {
        let mut reader = SliceReader::new(bytes);
        let policy = SubgroupPolicy::from_tag(reader.u8().ok_or(Error::Malformed)?)?;
        let leader = read_id(&mut reader).ok_or(Error::Malformed)?;
        let count = reader.i32().ok_or(Error::Malformed)?;
        if count < 0 {
            return Err(Error::Malformed);
        }
        let mut roster = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = read_id(&mut reader).ok_or(Error::Malformed)?;
            let key = reader.len_prefixed().ok_or(Error::Malformed)?.to_vec();
            let dh_key = reader.len_prefixed().ok_or(Error::Malformed)?.to_vec();
            roster.push(GroupMember::new(id, VerifyKey::from_bytes(key), dh_key));
        }
        if !reader.is_exhausted() {
            return Err(Error::Malformed);
        }
        Group::new(roster, leader, policy)
    }
}

fn read_id(reader: &mut SliceReader<'_>) -> Option<PeerId> {
    let mut bytes = [0; ID_LENGTH];
    bytes.copy_from_slice(reader.bytes(ID_LENGTH)?);
    Some(PeerId::from_bytes(bytes))
}

impl PartialEq for Group {
    /// Groups are equal iff they have the same policy, the same leader and
    /// the same roster in the same order.
    fn eq(&self, other: &Self) -> bool {
        self.data.policy == other.data.policy
            && self.data.leader == other.data.leader
            && self.data.roster == other.data.roster
    }
}

impl Eq for Group {}

/// Returns `true` if every member of `subset` is a member of `set`.
pub fn is_subset(set: &Group, subset: &Group) -> bool {
    subset
        .roster()
        .iter()
        .all(|member| match set.index_of(member.id()) {
            Ok(index) => set.roster()[index] == *member,
            Err(_) => false,
        })
}

/// Returns the members removed and the members added between two rosters, as
/// `(lost, joined)`. Both lists are empty iff the rosters are identical.
pub fn difference(old: &Group, new: &Group) -> (Vec<GroupMember>, Vec<GroupMember>) {
    let lost = old
        .roster()
        .iter()
        .filter(|member| !new.roster().contains(member))
        .cloned()
        .collect();
    let joined = new
        .roster()
        .iter()
        .filter(|member| !old.roster().contains(member))
        .cloned()
        .collect();
    (lost, joined)
}
