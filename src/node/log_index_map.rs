use crate::node::log::Index;
use crate::node::membership::{MemberId, MembershipConfig};
use std::collections::{BTreeSet, HashMap};

/// LogIndexMap tracks a log index per member. A leader keeps two of these: the next
/// index to send each peer, and the highest index known replicated on each peer.
/// Members without an explicit value are at `Index::ZERO`.
#[derive(Debug, Default)]
pub(crate) struct LogIndexMap {
    indexes: HashMap<MemberId, Index>,
}

impl LogIndexMap {
    pub(crate) fn new() -> Self {
        LogIndexMap {
            indexes: HashMap::new(),
        }
    }

    pub(crate) fn put(&mut self, member: &MemberId, index: Index) {
        self.indexes.insert(member.clone(), index);
    }

    pub(crate) fn put_if_greater(&mut self, member: &MemberId, index: Index) {
        if index > self.value_for(member) {
            self.put(member, index);
        }
    }

    pub(crate) fn put_if_smaller(&mut self, member: &MemberId, index: Index) {
        if index < self.value_for(member) {
            self.put(member, index);
        }
    }

    pub(crate) fn value_for(&self, member: &MemberId) -> Index {
        self.indexes.get(member).copied().unwrap_or(Index::ZERO)
    }

    pub(crate) fn remove(&mut self, member: &MemberId) {
        self.indexes.remove(member);
    }

    pub(crate) fn contains(&self, member: &MemberId) -> bool {
        self.indexes.contains_key(member)
    }

    pub(crate) fn member_ids(&self) -> Vec<MemberId> {
        self.indexes.keys().cloned().collect()
    }

    /// The largest index replicated on a quorum under `config`: the lower median over
    /// a stable member set, and the minimum of the two medians for a joint
    /// configuration (an index is only quorum-replicated if it is quorum-replicated
    /// in both halves).
    pub(crate) fn consensus_for_index(&self, config: &MembershipConfig) -> Index {
        match config {
            MembershipConfig::Stable { members } => self.quorum_index(members),
            MembershipConfig::Joint { old, new } => self.quorum_index(old).min(self.quorum_index(new)),
        }
    }

    fn quorum_index(&self, members: &BTreeSet<MemberId>) -> Index {
        if members.is_empty() {
            return Index::ZERO;
        }

        let mut indexes: Vec<Index> = members.iter().map(|m| self.value_for(m)).collect();
        indexes.sort_unstable();

        // Lower median: the largest k such that a strict majority holds >= k.
        indexes[(indexes.len() - 1) / 2]
    }
}
