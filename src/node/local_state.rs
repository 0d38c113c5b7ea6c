use crate::node::membership::MemberId;
use std::fmt;

/// Term is raft's logical election epoch. Starts at 0 and only ever increases.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct Term(u64);

impl Term {
    pub const ZERO: Term = Term(0);

    pub fn new(term: u64) -> Self {
        Term(term)
    }

    pub fn next(self) -> Term {
        Term(self.0 + 1)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Term({})", self.0)
    }
}

/// PersistentState is the adapter boundary for state that raft requires to survive a
/// crash to stay safe: the current term and the vote cast in it. Only
/// correctness-critical state goes through here; the log has its own adapter.
pub trait PersistentState: Send + 'static {
    /// Store `new_term` iff it is greater than the current term, clearing any vote.
    /// Returns whether the term advanced.
    fn store_term_if_increased(&mut self, new_term: Term) -> bool;

    /// Record a vote for `candidate` in `expected_term` iff that is the current term
    /// and no vote has been cast in it. Returns whether the vote was recorded.
    fn store_vote_for_term_if_unvoted(&mut self, expected_term: Term, candidate: MemberId) -> bool;

    /// Atomically advance the term by one and vote for ourselves in it. Used when
    /// standing for election.
    fn increment_term_and_vote_for_self(&mut self, my_id: &MemberId) -> Term;

    fn current_term(&self) -> Term;

    fn voted_for_current_term(&self) -> (Term, Option<&MemberId>);
}

/// In-memory PersistentState. Losing it on restart forfeits the double-vote guarantee
/// across crashes; embedders wanting that guarantee supply a durable implementation.
pub struct VolatileState {
    current_term: Term,
    voted_for_this_term: Option<MemberId>,
}

impl VolatileState {
    pub fn new() -> Self {
        VolatileState {
            current_term: Term::ZERO,
            voted_for_this_term: None,
        }
    }
}

impl Default for VolatileState {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistentState for VolatileState {
    fn store_term_if_increased(&mut self, new_term: Term) -> bool {
        if new_term <= self.current_term {
            return false;
        }

        self.current_term = new_term;
        self.voted_for_this_term = None;
        true
    }

    fn store_vote_for_term_if_unvoted(&mut self, expected_term: Term, candidate: MemberId) -> bool {
        if expected_term != self.current_term || self.voted_for_this_term.is_some() {
            return false;
        }

        self.voted_for_this_term.replace(candidate);
        true
    }

    fn increment_term_and_vote_for_self(&mut self, my_id: &MemberId) -> Term {
        self.current_term = self.current_term.next();
        self.voted_for_this_term = Some(my_id.clone());
        self.current_term
    }

    fn current_term(&self) -> Term {
        self.current_term
    }

    fn voted_for_current_term(&self) -> (Term, Option<&MemberId>) {
        (self.current_term, self.voted_for_this_term.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_only_ratchets_forward() {
        let mut state = VolatileState::new();

        assert!(state.store_term_if_increased(Term::new(3)));
        assert!(!state.store_term_if_increased(Term::new(3)));
        assert!(!state.store_term_if_increased(Term::new(1)));
        assert_eq!(state.current_term(), Term::new(3));
    }

    #[test]
    fn at_most_one_vote_per_term() {
        let mut state = VolatileState::new();
        state.store_term_if_increased(Term::new(1));

        assert!(state.store_vote_for_term_if_unvoted(Term::new(1), MemberId::new("a")));
        // Same term, different candidate: denied.
        assert!(!state.store_vote_for_term_if_unvoted(Term::new(1), MemberId::new("b")));
        // Stale term: denied.
        assert!(!state.store_vote_for_term_if_unvoted(Term::ZERO, MemberId::new("b")));

        let (term, voted_for) = state.voted_for_current_term();
        assert_eq!(term, Term::new(1));
        assert_eq!(voted_for, Some(&MemberId::new("a")));
    }

    #[test]
    fn observing_newer_term_clears_vote() {
        let mut state = VolatileState::new();
        state.store_term_if_increased(Term::new(1));
        state.store_vote_for_term_if_unvoted(Term::new(1), MemberId::new("a"));

        state.store_term_if_increased(Term::new(2));

        let (_, voted_for) = state.voted_for_current_term();
        assert_eq!(voted_for, None);
        assert!(state.store_vote_for_term_if_unvoted(Term::new(2), MemberId::new("b")));
    }

    #[test]
    fn standing_for_election_votes_for_self() {
        let mut state = VolatileState::new();
        let me = MemberId::new("me");

        let term = state.increment_term_and_vote_for_self(&me);

        assert_eq!(term, Term::new(1));
        assert_eq!(state.voted_for_current_term(), (Term::new(1), Some(&me)));
        assert!(!state.store_vote_for_term_if_unvoted(Term::new(1), MemberId::new("other")));
    }
}
