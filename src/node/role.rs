use crate::actor::WeakNodeClient;
use crate::node::log::Index;
use crate::node::log_index_map::LogIndexMap;
use crate::node::membership::MemberId;
use crate::node::timers::{ElectionTimerHandle, HeartbeatTimerHandle};
use std::collections::BTreeSet;
use std::fmt;
use tokio::sync::watch;
use tokio::time::Duration;

/// The externally visible role tag, as reported by `IAmInState` and the role
/// watcher.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NodeRole {
    Follower,
    Candidate,
    Leader,
}

/// A point-in-time view of the node's role plus the leader it currently follows (if
/// it knows one). Published on every transition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RoleSnapshot {
    pub role: NodeRole,
    pub leader: Option<MemberId>,
}

#[derive(Clone)]
pub(crate) struct RoleTimerConfig {
    pub(crate) election_timeout_min: Duration,
    pub(crate) election_timeout_max: Duration,
    pub(crate) heartbeat_interval: Duration,
}

/// RoleState holds what is specific to the node's current stage in an election:
/// which timers are armed, votes tallied as a candidate, per-peer replication
/// progress as a leader. It decides none of the protocol itself; `RaftNode` does.
/// Dropping a role's state tears its timer tasks down.
pub(crate) struct RoleState {
    state: State,
    timer_config: RoleTimerConfig,
    actor_client: WeakNodeClient,
    snapshot_notifier: watch::Sender<RoleSnapshot>,
}

enum State {
    Follower(FollowerState),
    Candidate(CandidateState),
    Leader(LeaderState),
}

struct FollowerState {
    leader: Option<MemberId>,
    election_timer: ElectionTimerHandle,
}

struct CandidateState {
    votes_received: BTreeSet<MemberId>,
    // Kept armed so a stalemated election times out into a fresh one.
    election_timer: ElectionTimerHandle,
}

pub(crate) struct LeaderState {
    /// Per peer: the next log index to send. Backs off on AppendRejected.
    pub(crate) next_index: LogIndexMap,
    /// Per member (self included): the highest log index known replicated there.
    pub(crate) match_index: LogIndexMap,
    heartbeat_timer: HeartbeatTimerHandle,
}

impl RoleState {
    /// Every node is born a follower with no known leader.
    pub(crate) fn new_follower(
        timer_config: RoleTimerConfig,
        actor_client: WeakNodeClient,
    ) -> (Self, watch::Receiver<RoleSnapshot>) {
        let state = State::Follower(FollowerState {
            leader: None,
            election_timer: Self::arm_election_timer(&timer_config, &actor_client),
        });
        let (snapshot_notifier, snapshot_watcher) = watch::channel(Self::snapshot_of(&state));

        (
            RoleState {
                state,
                timer_config,
                actor_client,
                snapshot_notifier,
            },
            snapshot_watcher,
        )
    }

    pub(crate) fn role(&self) -> NodeRole {
        match self.state {
            State::Follower(_) => NodeRole::Follower,
            State::Candidate(_) => NodeRole::Candidate,
            State::Leader(_) => NodeRole::Leader,
        }
    }

    pub(crate) fn is_leader(&self) -> bool {
        self.role() == NodeRole::Leader
    }

    pub(crate) fn is_candidate(&self) -> bool {
        self.role() == NodeRole::Candidate
    }

    pub(crate) fn known_leader(&self) -> Option<MemberId> {
        match &self.state {
            State::Follower(fs) => fs.leader.clone(),
            State::Candidate(_) => None,
            State::Leader(_) => None,
        }
    }

    pub(crate) fn snapshot(&self) -> RoleSnapshot {
        Self::snapshot_of(&self.state)
    }

    pub(crate) fn transition_to_follower(&mut self, leader: Option<MemberId>) {
        self.state = State::Follower(FollowerState {
            leader,
            election_timer: Self::arm_election_timer(&self.timer_config, &self.actor_client),
        });
        self.notify();
    }

    /// Become a candidate with our own vote already tallied. The fresh election timer
    /// carries a new random draw, which is what eventually breaks split votes.
    pub(crate) fn transition_to_candidate(&mut self, my_id: MemberId) {
        let mut votes_received = BTreeSet::new();
        votes_received.insert(my_id);

        self.state = State::Candidate(CandidateState {
            votes_received,
            election_timer: Self::arm_election_timer(&self.timer_config, &self.actor_client),
        });
        self.notify();
    }

    /// Become leader: every peer starts at `next = last_index + 1` with nothing known
    /// replicated, and our own log is fully "replicated" to ourselves.
    pub(crate) fn transition_to_leader(
        &mut self,
        my_id: &MemberId,
        peers: impl IntoIterator<Item = MemberId>,
        last_index: Index,
    ) {
        let mut next_index = LogIndexMap::new();
        let mut match_index = LogIndexMap::new();
        for peer in peers {
            next_index.put(&peer, last_index.plus(1));
            match_index.put(&peer, Index::ZERO);
        }
        match_index.put(my_id, last_index);

        self.state = State::Leader(LeaderState {
            next_index,
            match_index,
            heartbeat_timer: HeartbeatTimerHandle::arm(
                self.timer_config.heartbeat_interval,
                self.actor_client.clone(),
            ),
        });
        self.notify();
    }

    /// Remember who leads the current term (learned from a valid AppendEntries).
    pub(crate) fn note_leader(&mut self, leader: &MemberId) {
        if let State::Follower(fs) = &mut self.state {
            if fs.leader.as_ref() != Some(leader) {
                fs.leader.replace(leader.clone());
                self.notify();
            }
        }
    }

    pub(crate) fn reset_election_timer(&self) {
        match &self.state {
            State::Follower(fs) => fs.election_timer.reset(),
            State::Candidate(cs) => cs.election_timer.reset(),
            State::Leader(_) => {}
        }
    }

    /// Tally a granted vote. Returns the set of members that have voted for us so
    /// far, or None if we are not (any longer) a candidate.
    pub(crate) fn tally_vote(&mut self, vote_from: MemberId) -> Option<&BTreeSet<MemberId>> {
        if let State::Candidate(cs) = &mut self.state {
            cs.votes_received.insert(vote_from);
            Some(&cs.votes_received)
        } else {
            None
        }
    }

    pub(crate) fn leader_state_mut(&mut self) -> Option<&mut LeaderState> {
        if let State::Leader(ls) = &mut self.state {
            Some(ls)
        } else {
            None
        }
    }

    fn arm_election_timer(
        timer_config: &RoleTimerConfig,
        actor_client: &WeakNodeClient,
    ) -> ElectionTimerHandle {
        ElectionTimerHandle::arm(
            timer_config.election_timeout_min,
            timer_config.election_timeout_max,
            actor_client.clone(),
        )
    }

    fn snapshot_of(state: &State) -> RoleSnapshot {
        match state {
            State::Follower(fs) => RoleSnapshot {
                role: NodeRole::Follower,
                leader: fs.leader.clone(),
            },
            State::Candidate(_) => RoleSnapshot {
                role: NodeRole::Candidate,
                leader: None,
            },
            State::Leader(_) => RoleSnapshot {
                role: NodeRole::Leader,
                leader: None,
            },
        }
    }

    fn notify(&self) {
        let _ = self.snapshot_notifier.send(Self::snapshot_of(&self.state));
    }
}

impl LeaderState {
    /// Track any members of `members` we are not yet replicating to (they joined via
    /// a configuration entry). Existing progress is preserved.
    pub(crate) fn track_new_peers(&mut self, my_id: &MemberId, members: &BTreeSet<MemberId>, last_index: Index) {
        for member in members {
            if member != my_id && !self.next_index.contains(member) {
                self.next_index.put(member, last_index.plus(1));
                self.match_index.put(member, Index::ZERO);
            }
        }
    }

    /// Stop replicating to members outside `members`. Called once the stable
    /// configuration that removed them has committed, so they have had the chance to
    /// learn their own removal.
    pub(crate) fn retain_peers(&mut self, my_id: &MemberId, members: &BTreeSet<MemberId>) {
        let tracked: Vec<MemberId> = self.peer_ids();
        for peer in tracked {
            if !members.contains(&peer) && peer != *my_id {
                self.next_index.remove(&peer);
                self.match_index.remove(&peer);
            }
        }
    }

    pub(crate) fn peer_ids(&self) -> Vec<MemberId> {
        self.next_index.member_ids()
    }

    pub(crate) fn defer_heartbeat(&self) {
        self.heartbeat_timer.defer_next_tick();
    }
}

impl fmt::Debug for RoleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            State::Leader(_) => write!(f, "Leader"),
            State::Candidate(cs) => write!(f, "Candidate(votes={})", cs.votes_received.len()),
            State::Follower(FollowerState { leader: Some(l), .. }) => write!(f, "Follower(leader={:?})", l),
            State::Follower(FollowerState { leader: None, .. }) => write!(f, "Follower(leader=None)"),
        }
    }
}
