use crate::actor::WeakNodeClient;
use crate::api::events::{TestEvent, TestEventPublisher};
use crate::api::state_machine::StateMachine;
use crate::api::MessageBus;
use crate::node::local_state::{PersistentState, Term};
use crate::node::log::{Command, Entry, Index, ReplicatedLog};
use crate::node::membership::{MemberId, MembershipConfig};
use crate::node::messages::{AppendEntries, Envelope, Message, RequestVote};
use crate::node::role::{RoleSnapshot, RoleState, RoleTimerConfig};
use crate::node::storage::LogStorage;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;

pub(crate) struct RaftNodeConfig<L, S, M>
where
    L: LogStorage,
    S: PersistentState,
    M: StateMachine,
{
    pub(crate) logger: slog::Logger,
    pub(crate) my_id: MemberId,
    pub(crate) initial_config: MembershipConfig,
    pub(crate) storage: L,
    pub(crate) local_state: S,
    pub(crate) state_machine: M,
    pub(crate) bus: Arc<dyn MessageBus>,
    pub(crate) actor_client: WeakNodeClient,
    pub(crate) test_events: TestEventPublisher,
    pub(crate) election_timeout_min: Duration,
    pub(crate) election_timeout_max: Duration,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) append_entries_batch_size: usize,
}

/// RaftNode is the protocol state machine. Every event funnels through here on the
/// node's actor thread; handlers mutate local state, emit sends on the bus, and
/// re-arm timers, nothing else.
pub(crate) struct RaftNode<L, S>
where
    L: LogStorage,
    S: PersistentState,
{
    logger: slog::Logger,
    my_id: MemberId,
    /// Effective configuration. Updated the moment a configuration entry is appended
    /// (leader or follower), not when it commits.
    config: MembershipConfig,
    /// The floor to fall back to if a truncation removes every configuration entry
    /// from the log.
    bootstrap_config: MembershipConfig,
    log: ReplicatedLog<L>,
    local_state: S,
    role: RoleState,
    state_machine: Box<dyn StateMachine>,
    bus: Arc<dyn MessageBus>,
    test_events: TestEventPublisher,
    append_entries_batch_size: usize,
}

impl<L, S> RaftNode<L, S>
where
    L: LogStorage,
    S: PersistentState,
{
    pub(crate) fn new<M: StateMachine>(
        config: RaftNodeConfig<L, S, M>,
    ) -> Result<(Self, watch::Receiver<RoleSnapshot>), std::io::Error> {
        let log = ReplicatedLog::new(config.storage)?;

        let (role, role_watcher) = RoleState::new_follower(
            RoleTimerConfig {
                election_timeout_min: config.election_timeout_min,
                election_timeout_max: config.election_timeout_max,
                heartbeat_interval: config.heartbeat_interval,
            },
            config.actor_client,
        );

        let node = RaftNode {
            logger: config.logger,
            my_id: config.my_id,
            config: config.initial_config.clone(),
            bootstrap_config: config.initial_config,
            log,
            local_state: config.local_state,
            role,
            state_machine: Box::new(config.state_machine),
            bus: config.bus,
            test_events: config.test_events,
            append_entries_batch_size: config.append_entries_batch_size,
        };

        Ok((node, role_watcher))
    }

    // ------- Event dispatch -------

    pub(crate) fn handle_envelope(&mut self, envelope: Envelope) {
        let Envelope { from, message } = envelope;

        match message {
            Message::RequestVote(request) => self.handle_request_vote(from, request),
            Message::VoteGranted { term } => self.handle_vote_granted(from, term),
            Message::VoteDenied { term } => self.handle_vote_denied(term),
            Message::AppendEntries(request) => self.handle_append_entries(from, request),
            Message::AppendSuccessful { term, match_index } => {
                self.handle_append_successful(from, term, match_index)
            }
            Message::AppendRejected { term, last_index } => {
                self.handle_append_rejected(from, term, last_index)
            }
            Message::ClientMessage { client, command } => self.handle_client_message(from, client, command),
            Message::ChangeConfiguration { members } => self.handle_change_configuration(from, members),
            Message::RequestConfiguration => {
                let members = self.config.members();
                self.send(&from, Message::ChangeConfiguration { members });
            }
            Message::AskForState => {
                let role = self.role.role();
                self.send(&from, Message::IAmInState { role });
            }
            Message::ClientReply { .. } | Message::NotLeader { .. } | Message::IAmInState { .. } => {
                slog::debug!(self.logger, "Ignoring reply-only message from '{:?}'", from);
            }
        }
    }

    pub(crate) fn handle_leader_tick(&mut self) {
        if !self.role.is_leader() {
            // A stale tick raced a role transition.
            return;
        }

        self.broadcast_append_entries();
    }

    pub(crate) fn handle_election_timeout(&mut self) {
        if self.role.is_leader() {
            return;
        }
        if !self.config.contains(&self.my_id) {
            // Unconfigured, or removed by a membership change: not a voter, so a
            // timeout must not disturb the cluster.
            slog::debug!(self.logger, "Election timeout while not a member, staying quiet");
            return;
        }

        let term = self.local_state.increment_term_and_vote_for_self(&self.my_id);
        slog::info!(self.logger, "Standing for election in {:?}", term);

        self.role.transition_to_candidate(self.my_id.clone());
        self.test_events.publish(TestEvent::BeginElection);

        // A single-member cluster is its own quorum.
        let mut votes = BTreeSet::new();
        votes.insert(self.my_id.clone());
        if self.config.has_quorum(&votes) {
            self.become_leader();
            return;
        }

        let request = RequestVote {
            term,
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        };
        for peer in self.config.members() {
            if peer != self.my_id {
                self.send(&peer, Message::RequestVote(request.clone()));
            }
        }
    }

    // ------- Elections -------

    fn handle_request_vote(&mut self, from: MemberId, request: RequestVote) {
        let current_term = self.local_state.current_term();
        if request.term < current_term {
            self.send(&from, Message::VoteDenied { term: current_term });
            return;
        }
        self.observe_term(request.term);
        let term = self.local_state.current_term();

        let (_, voted_for) = self.local_state.voted_for_current_term();
        let can_vote = match voted_for {
            None => true,
            Some(candidate) => *candidate == from,
        };

        if can_vote && self.is_candidate_log_up_to_date(&request) {
            let granted = self
                .local_state
                .store_vote_for_term_if_unvoted(term, from.clone());
            // `granted` can only be false here if we already voted for this same
            // candidate, in which case repeating the grant is the idempotent answer.
            slog::info!(self.logger, "Granting vote to '{:?}' in {:?} (new={})", from, term, granted);
            self.role.reset_election_timer();
            self.send(&from, Message::VoteGranted { term });
        } else {
            self.send(&from, Message::VoteDenied { term });
        }
    }

    // > If the logs have last entries with different terms, then the log with the
    // > later term is more up-to-date. If the logs end with the same term, then
    // > whichever log is longer is more up-to-date.
    fn is_candidate_log_up_to_date(&self, request: &RequestVote) -> bool {
        (request.last_log_term, request.last_log_index) >= (self.log.last_term(), self.log.last_index())
    }

    fn handle_vote_granted(&mut self, from: MemberId, term: Term) {
        if term != self.local_state.current_term() {
            return;
        }

        let reached_quorum = match self.role.tally_vote(from) {
            Some(votes) => self.config.has_quorum(votes),
            // Vote for an election we already won or abandoned.
            None => false,
        };

        if reached_quorum {
            self.become_leader();
        }
    }

    fn handle_vote_denied(&mut self, term: Term) {
        // A denial can carry a newer term; that alone forces us back to follower.
        self.observe_term(term);
    }

    fn become_leader(&mut self) {
        let term = self.local_state.current_term();
        slog::info!(self.logger, "Elected as leader in {:?}", term);

        let peers: Vec<MemberId> = self
            .config
            .members()
            .into_iter()
            .filter(|m| *m != self.my_id)
            .collect();
        self.role
            .transition_to_leader(&self.my_id, peers, self.log.last_index());
        self.test_events.publish(TestEvent::ElectedAsLeader(term));

        // The first heartbeat round comes from the heartbeat timer's eager initial
        // tick, so there is nothing more to do here.
    }

    // ------- Replication: follower side -------

    fn handle_append_entries(&mut self, from: MemberId, request: AppendEntries) {
        let current_term = self.local_state.current_term();
        if request.term < current_term {
            self.send(
                &from,
                Message::AppendRejected {
                    term: current_term,
                    last_index: self.log.last_index(),
                },
            );
            return;
        }
        self.observe_term(request.term);

        if self.role.is_leader() {
            // Two leaders in one term would break Election Safety; don't dignify it.
            slog::error!(
                self.logger,
                "AppendEntries from '{:?}' in our own term {:?}, dropping",
                from,
                request.term
            );
            return;
        }
        if self.role.is_candidate() {
            // Someone else won this term.
            self.role.transition_to_follower(Some(from.clone()));
        }
        self.role.note_leader(&from);
        self.role.reset_election_timer();

        let term = self.local_state.current_term();

        // > Reply false if log doesn't contain an entry at prevLogIndex whose term
        // > matches prevLogTerm (§5.3)
        if !self.log.matches(request.prev_log_index, request.prev_log_term) {
            self.send(
                &from,
                Message::AppendRejected {
                    term,
                    last_index: self.log.last_index(),
                },
            );
            return;
        }

        // > If an existing entry conflicts with a new one (same index but different
        // > terms), delete the existing entry and all that follow it (§5.3).
        // > Append any new entries not already in the log.
        for entry in request.entries {
            match self.log.term_at(entry.index) {
                Some(existing_term) if existing_term == entry.term => {
                    // Duplicate delivery; the entry is already ours.
                    continue;
                }
                Some(_) => {
                    if !self.truncate_conflict(entry.index) || !self.append_to_log(entry) {
                        return;
                    }
                }
                None => {
                    if !self.append_to_log(entry) {
                        return;
                    }
                }
            }
        }

        // > If leaderCommit > commitIndex, set commitIndex =
        // > min(leaderCommit, index of last new entry)
        let newly_committed = self.log.commit(request.leader_commit);
        self.apply_committed(newly_committed);

        self.send(
            &from,
            Message::AppendSuccessful {
                term,
                match_index: self.log.last_index(),
            },
        );
    }

    fn truncate_conflict(&mut self, conflict_index: Index) -> bool {
        if let Err(e) = self.log.truncate_after(conflict_index.prev()) {
            slog::error!(self.logger, "Failed to truncate conflicting suffix: {:?}", e);
            return false;
        }

        // The truncation may have taken configuration entries with it.
        let reverted = self
            .log
            .latest_configuration()
            .cloned()
            .unwrap_or_else(|| self.bootstrap_config.clone());
        if reverted != self.config {
            slog::info!(self.logger, "Reverting to configuration {:?} after truncation", reverted);
            self.config = reverted;
        }

        true
    }

    /// Append one entry, locally adopting any configuration it carries.
    fn append_to_log(&mut self, entry: Entry) -> bool {
        let carried_config = entry.command.as_configuration().cloned();

        if let Err(e) = self.log.append(entry) {
            slog::error!(self.logger, "Failed to persist log entry: {:?}", e);
            return false;
        }

        if let Some(config) = carried_config {
            self.adopt_if_newer(config);
        }
        true
    }

    fn adopt_if_newer(&mut self, config: MembershipConfig) {
        if !config.is_newer_than(&self.config) {
            // ConfigRegression: a replayed or reordered configuration entry.
            slog::warn!(self.logger, "Ignoring stale configuration {:?}", config);
            return;
        }

        slog::info!(self.logger, "Configuration is now {:?}", config);
        self.config = config;

        // A leader starts replicating to freshly added members right away.
        let members = self.config.members();
        let last_index = self.log.last_index();
        let my_id = self.my_id.clone();
        if let Some(leader_state) = self.role.leader_state_mut() {
            leader_state.track_new_peers(&my_id, &members, last_index);
        }
    }

    // ------- Replication: leader side -------

    fn handle_client_message(&mut self, from: MemberId, client: MemberId, command: Bytes) {
        if !self.role.is_leader() {
            self.send(
                &from,
                Message::NotLeader {
                    leader_hint: self.role.known_leader(),
                },
            );
            return;
        }

        self.leader_append(Command::Application(command), Some(client));
    }

    fn handle_change_configuration(&mut self, from: MemberId, members: BTreeSet<MemberId>) {
        if members.is_empty() {
            slog::warn!(self.logger, "Ignoring ChangeConfiguration with no members");
            return;
        }

        if self.role.is_leader() {
            if self.config == (MembershipConfig::Stable { members: members.clone() }) {
                slog::debug!(self.logger, "Requested configuration already in effect");
                return;
            }
            if matches!(self.config, MembershipConfig::Joint { .. }) {
                // One change at a time; overlapping joints would need quorums we
                // cannot reason about.
                slog::warn!(self.logger, "Membership change already in progress, rejecting another");
                return;
            }

            let joint = self.config.transition_to(members);
            slog::info!(self.logger, "Beginning joint consensus: {:?}", joint);
            self.leader_append(Command::Configuration(joint), None);
        } else if self.config.is_unconfigured() {
            // Bootstrap injection from cluster discovery. Not log-borne, so it also
            // becomes the new truncation floor.
            let config = MembershipConfig::Stable { members };
            slog::info!(self.logger, "Bootstrapped with configuration {:?}", config);
            self.bootstrap_config = config.clone();
            self.config = config;
        } else {
            self.send(
                &from,
                Message::NotLeader {
                    leader_hint: self.role.known_leader(),
                },
            );
        }
    }

    /// Leader-only: append an entry to the local log, count ourselves as having
    /// replicated it, and push a replication round.
    fn leader_append(&mut self, command: Command, client: Option<MemberId>) {
        let entry = Entry {
            command,
            term: self.local_state.current_term(),
            index: self.log.last_index().plus(1),
            client,
        };
        let index = entry.index;

        if !self.append_to_log(entry) {
            return;
        }

        let my_id = self.my_id.clone();
        if let Some(leader_state) = self.role.leader_state_mut() {
            leader_state.match_index.put_if_greater(&my_id, index);
        }

        // A single-member cluster commits on local append.
        self.try_advance_commit();
        self.broadcast_append_entries();
    }

    fn broadcast_append_entries(&mut self) {
        let peers = match self.role.leader_state_mut() {
            Some(leader_state) => leader_state.peer_ids(),
            None => return,
        };

        for peer in peers {
            self.send_append_entries_to(&peer);
        }

        if let Some(leader_state) = self.role.leader_state_mut() {
            leader_state.defer_heartbeat();
        }
    }

    fn send_append_entries_to(&mut self, peer: &MemberId) {
        let next = match self.role.leader_state_mut() {
            Some(leader_state) => leader_state.next_index.value_for(peer).max(Index::START),
            None => return,
        };

        let prev_log_index = next.prev();
        let prev_log_term = match self.log.term_at(prev_log_index) {
            Some(term) => term,
            None => {
                // next has run past our log; it will straighten out on the reply.
                slog::warn!(self.logger, "nextIndex for '{:?}' is beyond our log, skipping", peer);
                return;
            }
        };

        let request = AppendEntries {
            term: self.local_state.current_term(),
            prev_log_index,
            prev_log_term,
            entries: self.log.entries_from(next, self.append_entries_batch_size),
            leader_commit: self.log.committed_index(),
        };
        self.send(peer, Message::AppendEntries(request));
    }

    fn handle_append_successful(&mut self, from: MemberId, term: Term, match_index: Index) {
        self.observe_term(term);
        if !self.role.is_leader() || term != self.local_state.current_term() {
            return;
        }

        let tracked = match self.role.leader_state_mut() {
            Some(leader_state) if leader_state.next_index.contains(&from) => {
                leader_state.match_index.put_if_greater(&from, match_index);
                leader_state.next_index.put(&from, match_index.plus(1));
                true
            }
            // Replies from peers we no longer track (removed members).
            _ => false,
        };
        if !tracked {
            return;
        }

        self.try_advance_commit();

        if match_index < self.log.last_index() {
            // The peer is still catching up; keep the pipeline moving rather than
            // waiting for the next heartbeat.
            self.send_append_entries_to(&from);
        }
    }

    fn handle_append_rejected(&mut self, from: MemberId, term: Term, their_last_index: Index) {
        if term > self.local_state.current_term() {
            self.observe_term(term);
            return;
        }
        if !self.role.is_leader() || term != self.local_state.current_term() {
            return;
        }

        let tracked = match self.role.leader_state_mut() {
            Some(leader_state) if leader_state.next_index.contains(&from) => {
                // > After a rejection, the leader decrements nextIndex and retries
                // > the AppendEntries RPC (§5.3).
                // Jump straight toward the follower's tail, but always make progress
                // and never go below the first index.
                let current_next = leader_state.next_index.value_for(&from);
                let backed_off = Index::START.max(current_next.prev().min(their_last_index.plus(1)));
                leader_state.next_index.put_if_smaller(&from, backed_off);
                true
            }
            _ => false,
        };

        if tracked {
            self.send_append_entries_to(&from);
        }
    }

    // ------- Commit & apply -------

    fn try_advance_commit(&mut self) {
        let consensus_index = match self.role.leader_state_mut() {
            Some(leader_state) => leader_state.match_index.consensus_for_index(&self.config),
            None => return,
        };

        if consensus_index <= self.log.committed_index() {
            return;
        }
        // > If there exists an N such that N > commitIndex, a majority of
        // > matchIndex[i] >= N, and log[N].term == currentTerm: set commitIndex = N
        // > (§5.3, §5.4).
        if self.log.term_at(consensus_index) != Some(self.local_state.current_term()) {
            return;
        }

        let newly_committed = self.log.commit(consensus_index);
        self.apply_committed(newly_committed);
    }

    fn apply_committed(&mut self, entries: Vec<Entry>) {
        for entry in entries {
            match entry.command {
                Command::Application(data) => {
                    let output = self.state_machine.apply(data).into_data();
                    if self.role.is_leader() {
                        if let Some(client) = entry.client {
                            self.send(
                                &client,
                                Message::ClientReply {
                                    index: entry.index,
                                    output,
                                },
                            );
                        }
                    }
                }
                Command::Configuration(config) => self.handle_committed_configuration(config),
            }

            self.test_events.publish(TestEvent::EntryCommitted(entry.index));
        }
    }

    fn handle_committed_configuration(&mut self, committed: MembershipConfig) {
        if !self.role.is_leader() {
            return;
        }
        // Only act on the configuration that is actually in effect; a replayed older
        // entry committing along the way must not restart the transition.
        if committed != self.config {
            return;
        }

        match committed {
            MembershipConfig::Joint { new, .. } => {
                // Both quorums have the joint entry; it is safe to move to the
                // target configuration outright.
                slog::info!(self.logger, "Joint configuration committed, proposing {:?}", new);
                self.leader_append(
                    Command::Configuration(MembershipConfig::Stable { members: new }),
                    None,
                );
            }
            MembershipConfig::Stable { members } => {
                // Removed members have replicated their own removal; stop talking to
                // them now that it is durable.
                let my_id = self.my_id.clone();
                if let Some(leader_state) = self.role.leader_state_mut() {
                    leader_state.retain_peers(&my_id, &members);
                }

                if !members.contains(&self.my_id) {
                    slog::info!(self.logger, "Not part of the new configuration, stepping down");
                    self.role.transition_to_follower(None);
                }
            }
        }
    }

    // ------- Shared plumbing -------

    /// The uniform precondition on every term-carrying message: a newer term makes
    /// us a follower of that term before anything else is considered.
    fn observe_term(&mut self, term: Term) {
        if self.local_state.store_term_if_increased(term) {
            slog::info!(self.logger, "Observed newer {:?}, becoming follower", term);
            self.role.transition_to_follower(None);
        }
    }

    fn send(&self, to: &MemberId, message: Message) {
        self.bus.send(
            to,
            Envelope {
                from: self.my_id.clone(),
                message,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::events;
    use crate::api::state_machine::{NoOpStateMachine, StateMachineOutput};
    use crate::node::local_state::VolatileState;
    use crate::node::storage::InMemoryLogStorage;
    use crate::node::role::NodeRole;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    /// Records every outbound envelope instead of delivering it.
    struct CapturingBus {
        sent: Mutex<Vec<(MemberId, Envelope)>>,
    }

    impl CapturingBus {
        fn new() -> Arc<Self> {
            Arc::new(CapturingBus {
                sent: Mutex::new(Vec::new()),
            })
        }

        fn drain(&self) -> Vec<(MemberId, Envelope)> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    impl MessageBus for CapturingBus {
        fn send(&self, to: &MemberId, envelope: Envelope) {
            self.sent.lock().unwrap().push((to.clone(), envelope));
        }
    }

    fn id(name: &str) -> MemberId {
        MemberId::new(name)
    }

    fn ids(names: &[&str]) -> BTreeSet<MemberId> {
        names.iter().copied().map(MemberId::new).collect()
    }

    fn test_node(
        my_id: &str,
        members: &[&str],
        bus: Arc<CapturingBus>,
    ) -> RaftNode<InMemoryLogStorage, VolatileState> {
        // A strong client is leaked so the weak timer handles stay upgradeable; the
        // mailbox itself is never drained because these tests drive handlers
        // directly.
        let (client, mailbox) = crate::actor::NodeClient::new(64);
        std::mem::forget(mailbox);
        std::mem::forget(client.clone());

        let initial_config = if members.is_empty() {
            MembershipConfig::unconfigured()
        } else {
            MembershipConfig::Stable { members: ids(members) }
        };

        let (node, _role_watcher) = RaftNode::new(RaftNodeConfig {
            logger: slog::Logger::root(slog::Discard, slog::o!()),
            my_id: id(my_id),
            initial_config,
            storage: InMemoryLogStorage::new(),
            local_state: VolatileState::new(),
            state_machine: NoOpStateMachine,
            bus,
            actor_client: client.weak(),
            test_events: events::TestEventPublisher::disabled(),
            election_timeout_min: Duration::from_secs(60),
            election_timeout_max: Duration::from_secs(120),
            heartbeat_interval: Duration::from_secs(1),
            append_entries_batch_size: 5,
        })
        .unwrap();

        node
    }

    fn deliver(node: &mut RaftNode<InMemoryLogStorage, VolatileState>, from: &str, message: Message) {
        node.handle_envelope(Envelope {
            from: id(from),
            message,
        });
    }

    fn elect(node: &mut RaftNode<InMemoryLogStorage, VolatileState>, granting_peer: &str) {
        node.handle_election_timeout();
        let term = node.local_state.current_term();
        deliver(node, granting_peer, Message::VoteGranted { term });
        assert_eq!(node.role.role(), NodeRole::Leader);
    }

    fn client_command(node: &mut RaftNode<InMemoryLogStorage, VolatileState>, data: &str) {
        deliver(
            node,
            "client",
            Message::ClientMessage {
                client: id("client"),
                command: Bytes::copy_from_slice(data.as_bytes()),
            },
        );
    }

    fn append_entries_msg(term: u64, prev: (u64, u64), entries: Vec<Entry>, commit: u64) -> Message {
        Message::AppendEntries(AppendEntries {
            term: Term::new(term),
            prev_log_index: Index::new(prev.0),
            prev_log_term: Term::new(prev.1),
            entries,
            leader_commit: Index::new(commit),
        })
    }

    fn app_entry(index: u64, term: u64, data: &str) -> Entry {
        Entry {
            command: Command::Application(Bytes::copy_from_slice(data.as_bytes())),
            term: Term::new(term),
            index: Index::new(index),
            client: None,
        }
    }

    #[tokio::test]
    async fn leader_commits_only_entries_from_its_own_term() {
        let bus = CapturingBus::new();
        let mut node = test_node("a", &["a", "b", "c"], bus.clone());

        // Inherit one entry from a term-1 leader.
        deliver(&mut node, "old-leader", append_entries_msg(1, (0, 0), vec![app_entry(1, 1, "x")], 0));

        // Win term 2 ourselves.
        elect(&mut node, "b");
        assert_eq!(node.local_state.current_term(), Term::new(2));
        bus.drain();

        // A quorum holds index 1, but it is a term-1 entry: not committable yet.
        deliver(
            &mut node,
            "b",
            Message::AppendSuccessful {
                term: Term::new(2),
                match_index: Index::new(1),
            },
        );
        assert_eq!(node.log.committed_index(), Index::ZERO);

        // Our own term-2 entry reaching the quorum commits both.
        client_command(&mut node, "y");
        deliver(
            &mut node,
            "b",
            Message::AppendSuccessful {
                term: Term::new(2),
                match_index: Index::new(2),
            },
        );
        assert_eq!(node.log.committed_index(), Index::new(2));
    }

    #[tokio::test]
    async fn replication_progress_is_keyed_by_the_replying_peer() {
        let bus = CapturingBus::new();
        let mut node = test_node("a", &["a", "b", "c"], bus.clone());
        elect(&mut node, "b");

        for word in ["w1", "w2", "w3"] {
            client_command(&mut node, word);
        }
        bus.drain();

        // c is far behind: its rejection must rewind only c's nextIndex, and the
        // retry goes to c alone, from the start of the log.
        let term = node.local_state.current_term();
        deliver(
            &mut node,
            "c",
            Message::AppendRejected {
                term,
                last_index: Index::ZERO,
            },
        );

        let sent = bus.drain();
        assert_eq!(sent.len(), 1);
        let (to, envelope) = &sent[0];
        assert_eq!(*to, id("c"));
        match &envelope.message {
            Message::AppendEntries(request) => {
                assert_eq!(request.prev_log_index, Index::ZERO);
                assert_eq!(request.entries.len(), 3);
            }
            other => panic!("Expected AppendEntries retry, got {:?}", other),
        }

        // b meanwhile confirms everything; with b and ourselves that is a quorum.
        let term = node.local_state.current_term();
        deliver(
            &mut node,
            "b",
            Message::AppendSuccessful {
                term,
                match_index: Index::new(3),
            },
        );
        assert_eq!(node.log.committed_index(), Index::new(3));
    }

    #[tokio::test]
    async fn joint_consensus_runs_to_stable_and_excluded_leader_steps_down() {
        let bus = CapturingBus::new();
        let mut node = test_node("a", &["a", "b"], bus.clone());
        elect(&mut node, "b");
        let term = node.local_state.current_term();

        // Replace ourselves with c: {a, b} -> {b, c}.
        deliver(
            &mut node,
            "admin",
            Message::ChangeConfiguration { members: ids(&["b", "c"]) },
        );
        assert_eq!(
            node.config,
            MembershipConfig::Joint {
                old: ids(&["a", "b"]),
                new: ids(&["b", "c"]),
            }
        );

        // Joint entry commits once both halves hold it (a+b for old, b+c for new).
        deliver(&mut node, "b", Message::AppendSuccessful { term, match_index: Index::new(1) });
        deliver(&mut node, "c", Message::AppendSuccessful { term, match_index: Index::new(1) });

        // That commit makes the leader propose the stable configuration, which takes
        // effect at append time.
        assert_eq!(node.config, MembershipConfig::Stable { members: ids(&["b", "c"]) });
        assert_eq!(node.log.last_index(), Index::new(2));
        assert!(node.role.is_leader());

        // Once the stable entry commits, we are no longer a member: step down.
        deliver(&mut node, "b", Message::AppendSuccessful { term, match_index: Index::new(2) });
        deliver(&mut node, "c", Message::AppendSuccessful { term, match_index: Index::new(2) });
        assert_eq!(node.log.committed_index(), Index::new(2));
        assert_eq!(node.role.role(), NodeRole::Follower);
    }

    #[tokio::test]
    async fn follower_reverts_configuration_when_truncation_removes_it() {
        let bus = CapturingBus::new();
        let mut node = test_node("a", &["a", "b", "c"], bus.clone());

        // A term-1 leader replicates a joint configuration entry to us; we adopt it
        // on append.
        let joint = MembershipConfig::Joint {
            old: ids(&["a", "b", "c"]),
            new: ids(&["a", "b", "d"]),
        };
        let config_entry = Entry {
            command: Command::Configuration(joint.clone()),
            term: Term::new(1),
            index: Index::new(1),
            client: None,
        };
        deliver(&mut node, "old-leader", append_entries_msg(1, (0, 0), vec![config_entry], 0));
        assert_eq!(node.config, joint);

        // A term-2 leader overwrites index 1 with a plain entry: the truncation must
        // roll the configuration back to the bootstrap one.
        deliver(&mut node, "new-leader", append_entries_msg(2, (0, 0), vec![app_entry(1, 2, "z")], 0));
        assert_eq!(node.config, MembershipConfig::Stable { members: ids(&["a", "b", "c"]) });
    }

    #[tokio::test]
    async fn unconfigured_node_does_not_stand_for_election() {
        let bus = CapturingBus::new();
        let mut node = test_node("a", &[], bus.clone());

        node.handle_election_timeout();

        assert_eq!(node.role.role(), NodeRole::Follower);
        assert_eq!(node.local_state.current_term(), Term::ZERO);
        assert!(bus.drain().is_empty());
    }

    #[tokio::test]
    async fn bootstrap_injection_makes_a_node_electable() {
        let bus = CapturingBus::new();
        let mut node = test_node("a", &[], bus.clone());

        deliver(
            &mut node,
            "discovery",
            Message::ChangeConfiguration { members: ids(&["a"]) },
        );

        node.handle_election_timeout();
        // Sole member of its configuration: leader immediately.
        assert_eq!(node.role.role(), NodeRole::Leader);
    }

    #[tokio::test]
    async fn stale_configuration_entries_are_ignored() {
        let bus = CapturingBus::new();
        let mut node = test_node("a", &["a", "b", "c"], bus.clone());

        // An unrelated stable configuration does not follow from ours.
        let unrelated = Entry {
            command: Command::Configuration(MembershipConfig::Stable { members: ids(&["x", "y"]) }),
            term: Term::new(1),
            index: Index::new(1),
            client: None,
        };
        deliver(&mut node, "old-leader", append_entries_msg(1, (0, 0), vec![unrelated], 0));

        // The entry is in the log (the leader decides what is in the log), but the
        // effective configuration is unchanged.
        assert_eq!(node.log.last_index(), Index::new(1));
        assert_eq!(node.config, MembershipConfig::Stable { members: ids(&["a", "b", "c"]) });
    }

    #[tokio::test]
    async fn leader_replies_to_the_entry_client_on_commit() {
        let bus = CapturingBus::new();
        let mut node = test_node("a", &["a", "b", "c"], bus.clone());
        elect(&mut node, "b");
        bus.drain();

        client_command(&mut node, "hello");
        let term = node.local_state.current_term();
        deliver(
            &mut node,
            "b",
            Message::AppendSuccessful {
                term,
                match_index: Index::new(1),
            },
        );

        let reply = bus
            .drain()
            .into_iter()
            .find(|(to, _)| *to == id("client"))
            .expect("No reply sent to the client");
        match reply.1.message {
            Message::ClientReply { index, output } => {
                assert_eq!(index, Index::new(1));
                // NoOpStateMachine produces no output data.
                assert_eq!(output, None);
            }
            other => panic!("Expected ClientReply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn no_op_state_machine_produces_no_output() {
        let mut sm = NoOpStateMachine;
        assert!(matches!(sm.apply(Bytes::from_static(b"x")), StateMachineOutput::NoData));
    }
}

