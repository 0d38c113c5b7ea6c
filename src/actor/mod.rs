use crate::node::storage::LogStorage;
use crate::node::{Envelope, PersistentState, RaftNode};
use tokio::sync::mpsc;

/// Everything a node reacts to, funneled through one mailbox so that all state
/// mutation happens on a single logical thread.
#[derive(Debug)]
pub(crate) enum Event {
    /// A wire message delivered by the bus: peer RPC, client traffic, or admin.
    Receive(Envelope),

    /// Leader only: time to send a round of AppendEntries to every peer. An empty
    /// batch serves as the heartbeat. Discarded in other roles.
    LeaderTick,

    /// Follower/candidate: no valid AppendEntries inside the randomized window.
    /// Stand for election. Discarded by a leader.
    ElectionTimeout,
}

/// NodeClient is the ingress handle for a node: the bus (or a test harness) pushes
/// inbound envelopes through it. Dropping every NodeClient shuts the node down.
#[derive(Clone)]
pub struct NodeClient {
    sender: mpsc::Sender<Event>,
}

impl NodeClient {
    pub(crate) fn new(buffer: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer);
        (NodeClient { sender: tx }, rx)
    }

    /// Deliver one inbound envelope into the node's mailbox. Returns Err if the node
    /// has shut down.
    pub async fn deliver(&self, envelope: Envelope) -> Result<(), NodeStopped> {
        self.sender
            .send(Event::Receive(envelope))
            .await
            .map_err(|_| NodeStopped)
    }

    pub(crate) fn weak(&self) -> WeakNodeClient {
        WeakNodeClient {
            sender: self.sender.downgrade(),
        }
    }
}

/// Timer tasks hold a weak handle so that an orphaned timer can never keep a dead
/// node's mailbox alive.
#[derive(Clone)]
pub(crate) struct WeakNodeClient {
    sender: mpsc::WeakSender<Event>,
}

impl WeakNodeClient {
    pub(crate) async fn election_timeout(&self) -> Result<(), NodeStopped> {
        self.send(Event::ElectionTimeout).await
    }

    pub(crate) async fn leader_tick(&self) -> Result<(), NodeStopped> {
        self.send(Event::LeaderTick).await
    }

    async fn send(&self, event: Event) -> Result<(), NodeStopped> {
        match self.sender.upgrade() {
            Some(sender) => sender.send(event).await.map_err(|_| NodeStopped),
            None => Err(NodeStopped),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("raft node has stopped")]
pub struct NodeStopped;

/// NodeActor drains the mailbox and runs each event to completion against the node
/// state machine. Handlers are synchronous; anything slow (bus I/O, timers) lives in
/// other tasks and comes back as an event.
pub(crate) struct NodeActor<L, S>
where
    L: LogStorage,
    S: PersistentState,
{
    logger: slog::Logger,
    receiver: mpsc::Receiver<Event>,
    node: RaftNode<L, S>,
}

impl<L, S> NodeActor<L, S>
where
    L: LogStorage,
    S: PersistentState,
{
    pub(crate) fn new(logger: slog::Logger, receiver: mpsc::Receiver<Event>, node: RaftNode<L, S>) -> Self {
        NodeActor {
            logger,
            receiver,
            node,
        }
    }

    pub(crate) async fn run_event_loop(mut self) {
        while let Some(event) = self.receiver.recv().await {
            slog::trace!(self.logger, "Received: {:?}", event);
            self.handle_event(event);
        }

        slog::debug!(self.logger, "Mailbox closed, node actor exiting.");
    }

    // Must stay non-async: an event handler never blocks or yields mid-mutation.
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Receive(envelope) => self.node.handle_envelope(envelope),
            Event::LeaderTick => self.node.handle_leader_tick(),
            Event::ElectionTimeout => self.node.handle_election_timeout(),
        }
    }
}
