use std::collections::BTreeSet;
use std::fmt;

/// MemberId is the stable identity of a cluster member. It doubles as the member's
/// address on the message bus.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(member_id: impl Into<String>) -> Self {
        MemberId(member_id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// MembershipConfig is the set of replicas participating in a single instance of raft
/// together. During a membership change the cluster passes through a transitional
/// `Joint` phase that requires overlapping quorums of the old and new member sets.
///
/// A configuration takes effect the moment it is appended to a node's log, not when
/// it commits.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MembershipConfig {
    Stable { members: BTreeSet<MemberId> },
    Joint { old: BTreeSet<MemberId>, new: BTreeSet<MemberId> },
}

impl MembershipConfig {
    pub fn stable(members: impl IntoIterator<Item = MemberId>) -> Self {
        MembershipConfig::Stable {
            members: members.into_iter().collect(),
        }
    }

    /// The "unconfigured" state of a node awaiting discovery. Any real configuration
    /// is newer than this one.
    pub fn unconfigured() -> Self {
        MembershipConfig::Stable {
            members: BTreeSet::new(),
        }
    }

    pub fn is_unconfigured(&self) -> bool {
        match self {
            MembershipConfig::Stable { members } => members.is_empty(),
            MembershipConfig::Joint { .. } => false,
        }
    }

    /// All members this configuration talks to. For a joint configuration this is the
    /// union of both member sets.
    pub fn members(&self) -> BTreeSet<MemberId> {
        match self {
            MembershipConfig::Stable { members } => members.clone(),
            MembershipConfig::Joint { old, new } => old.union(new).cloned().collect(),
        }
    }

    pub fn contains(&self, member_id: &MemberId) -> bool {
        match self {
            MembershipConfig::Stable { members } => members.contains(member_id),
            MembershipConfig::Joint { old, new } => old.contains(member_id) || new.contains(member_id),
        }
    }

    /// Whether `member_id` will remain a member once this configuration (or the stable
    /// configuration it transitions into) is fully in effect. A leader absent from the
    /// target set must eventually step down.
    pub fn is_part_of_new_configuration(&self, member_id: &MemberId) -> bool {
        match self {
            MembershipConfig::Stable { members } => members.contains(member_id),
            MembershipConfig::Joint { new, .. } => new.contains(member_id),
        }
    }

    /// Begin a joint-consensus transition from this configuration's member set to
    /// `target`.
    pub fn transition_to(&self, target: BTreeSet<MemberId>) -> MembershipConfig {
        MembershipConfig::Joint {
            old: self.members(),
            new: target,
        }
    }

    /// Version ordering between configurations, derived structurally:
    /// a joint whose `old` set equals our current view succeeds that view, and the
    /// stable configuration carrying a joint's `new` set succeeds that joint. Any
    /// configuration succeeds the unconfigured state. Everything else is a regression
    /// and must be ignored.
    pub fn is_newer_than(&self, other: &MembershipConfig) -> bool {
        if self.is_unconfigured() {
            return false;
        }
        if other.is_unconfigured() {
            return true;
        }

        match (self, other) {
            (MembershipConfig::Joint { old, .. }, MembershipConfig::Stable { members }) => old == members,
            (MembershipConfig::Stable { members }, MembershipConfig::Joint { new, .. }) => members == new,
            _ => false,
        }
    }

    /// Quorum test over a set of assenting members (voters, or replicas known to hold
    /// an entry). Stable requires a strict majority of `members`; joint requires a
    /// strict majority of `old` AND of `new`.
    pub fn has_quorum(&self, assenting: &BTreeSet<MemberId>) -> bool {
        match self {
            MembershipConfig::Stable { members } => Self::is_majority(assenting, members),
            MembershipConfig::Joint { old, new } => {
                Self::is_majority(assenting, old) && Self::is_majority(assenting, new)
            }
        }
    }

    fn is_majority(assenting: &BTreeSet<MemberId>, members: &BTreeSet<MemberId>) -> bool {
        if members.is_empty() {
            return false;
        }
        let count = assenting.iter().filter(|m| members.contains(*m)).count();
        count >= members.len() / 2 + 1
    }
}
