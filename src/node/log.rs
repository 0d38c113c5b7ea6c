use crate::node::local_state::Term;
use crate::node::membership::{MemberId, MembershipConfig};
use crate::node::storage::LogStorage;
use bytes::Bytes;
use std::fmt;
use std::io;

/// Index is the position of an entry in the replicated log. Index 0 is a sentinel
/// meaning "before the first entry"; real entries start at 1.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Index(u64);

impl Index {
    pub const ZERO: Index = Index(0);
    pub const START: Index = Index(1);

    pub fn new(index: u64) -> Self {
        Index(index)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn plus(self, offset: u64) -> Index {
        Index(self.0 + offset)
    }

    /// The index immediately before this one, saturating at the sentinel.
    pub fn prev(self) -> Index {
        Index(self.0.saturating_sub(1))
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Index({})", self.0)
    }
}

/// Command is the payload of a log entry. Configuration commands are consensus
/// metadata and are never handed to the application state machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Application(Bytes),
    Configuration(MembershipConfig),
}

impl Command {
    pub fn as_configuration(&self) -> Option<&MembershipConfig> {
        match self {
            Command::Configuration(config) => Some(config),
            Command::Application(_) => None,
        }
    }
}

/// A single replicated log record. `client` is the bus address to route the apply
/// result back to, carried only on entries originated by a client request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Entry {
    pub command: Command,
    pub term: Term,
    pub index: Index,
    pub client: Option<MemberId>,
}

/// ReplicatedLog is the raft-specific log facade: an append-only, term-tagged
/// sequence with a monotonic commit pointer. Reads are served from memory; every
/// mutation is written through the `LogStorage` adapter first.
///
/// Invariants maintained here:
/// * entry indexes are contiguous starting at 1
/// * terms are nondecreasing along the log
/// * `committed_index <= last_index`, and it never moves backwards
pub(crate) struct ReplicatedLog<L: LogStorage> {
    storage: L,
    entries: Vec<Entry>,
    committed: Index,
}

impl<L: LogStorage> ReplicatedLog<L> {
    pub(crate) fn new(storage: L) -> Result<Self, io::Error> {
        let entries = storage.read_all()?;

        Ok(ReplicatedLog {
            storage,
            entries,
            committed: Index::ZERO,
        })
    }

    pub(crate) fn last_index(&self) -> Index {
        self.entries.last().map(|e| e.index).unwrap_or(Index::ZERO)
    }

    pub(crate) fn last_term(&self) -> Term {
        self.entries.last().map(|e| e.term).unwrap_or(Term::ZERO)
    }

    pub(crate) fn committed_index(&self) -> Index {
        self.committed
    }

    /// Term of the entry at `index`. The sentinel index has term 0; indexes past the
    /// end of the log have no term.
    pub(crate) fn term_at(&self, index: Index) -> Option<Term> {
        if index == Index::ZERO {
            return Some(Term::ZERO);
        }

        self.vec_pos(index).map(|pos| self.entries[pos].term)
    }

    /// Whether our log contains an entry at `index` with term `term` (the
    /// AppendEntries prefix-match check). An empty prefix always matches.
    pub(crate) fn matches(&self, index: Index, term: Term) -> bool {
        self.term_at(index) == Some(term)
    }

    /// Up to `max_count` entries starting at `from` (inclusive).
    pub(crate) fn entries_from(&self, from: Index, max_count: usize) -> Vec<Entry> {
        match self.vec_pos(from) {
            Some(pos) => self.entries[pos..].iter().take(max_count).cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Entries in the half-open range `(from_exclusive, to_inclusive]`.
    pub(crate) fn between(&self, from_exclusive: Index, to_inclusive: Index) -> Vec<Entry> {
        self.entries
            .iter()
            .filter(|e| e.index > from_exclusive && e.index <= to_inclusive)
            .cloned()
            .collect()
    }

    pub(crate) fn append(&mut self, entry: Entry) -> Result<Index, io::Error> {
        // These are local-logic bugs, not peer misbehavior, so assert hard.
        assert_eq!(
            entry.index,
            self.last_index().plus(1),
            "Log entries must be contiguous"
        );
        assert!(
            entry.term >= self.last_term(),
            "Terms along the log must be nondecreasing"
        );

        self.storage.append(&entry)?;

        let index = entry.index;
        self.entries.push(entry);
        Ok(index)
    }

    /// Remove every entry after `index`. Only a follower resolving a conflict
    /// reported by the leader may do this, and never below the commit pointer.
    pub(crate) fn truncate_after(&mut self, index: Index) -> Result<(), io::Error> {
        assert!(
            index >= self.committed,
            "Refusing to truncate committed entries"
        );

        self.storage.truncate_after(index)?;
        self.entries.truncate(index.as_u64() as usize);
        Ok(())
    }

    /// Advance the commit pointer to `index` (clamped to the last entry we hold) and
    /// return the newly committed entries in order. Moving backwards is a no-op.
    pub(crate) fn commit(&mut self, index: Index) -> Vec<Entry> {
        let target = index.min(self.last_index());
        if target <= self.committed {
            return Vec::new();
        }

        let newly_committed = self.between(self.committed, target);
        self.committed = target;
        newly_committed
    }

    /// The most recent configuration entry still present in the log, if any. Used to
    /// roll the effective configuration back after a truncation.
    pub(crate) fn latest_configuration(&self) -> Option<&MembershipConfig> {
        self.entries
            .iter()
            .rev()
            .find_map(|e| e.command.as_configuration())
    }

    fn vec_pos(&self, index: Index) -> Option<usize> {
        if index == Index::ZERO || index > self.last_index() {
            return None;
        }
        Some((index.as_u64() - 1) as usize)
    }
}
