use crate::actor::{NodeActor, NodeClient};
use crate::api::events::{self, TestEventPublisher, TestEventStream};
use crate::api::options::{RaftOptions, RaftOptionsValidated};
use crate::api::state_machine::StateMachine;
use crate::api::MessageBus;
use crate::node::local_state::VolatileState;
use crate::node::membership::{MemberId, MembershipConfig};
use crate::node::role::RoleSnapshot;
use crate::node::storage::InMemoryLogStorage;
use crate::node::{RaftNode, RaftNodeConfig};
use std::collections::BTreeSet;
use std::convert::TryFrom;
use std::sync::Arc;
use tokio::sync::watch;

/// Everything needed to start one cluster member.
pub struct NodeConfig<M: StateMachine> {
    pub logger: slog::Logger,
    pub my_id: MemberId,
    /// Initial cluster membership. `None` boots the node unconfigured; it will wait
    /// for cluster discovery to inject a `ChangeConfiguration` before taking part in
    /// elections.
    pub bootstrap_members: Option<BTreeSet<MemberId>>,
    pub options: RaftOptions,
    pub state_machine: M,
    pub bus: Arc<dyn MessageBus>,
}

#[derive(Debug, thiserror::Error)]
pub enum NodeStartError {
    #[error("illegal options: {0}")]
    IllegalOptions(&'static str),
    #[error("bootstrap configuration has no members")]
    EmptyBootstrapConfig,
    #[error("member '{0}' is not part of its own bootstrap configuration")]
    SelfNotInBootstrapConfig(String),
    #[error("log storage initialization failed")]
    StorageInitialization(#[from] std::io::Error),
}

/// The application's grip on a running node. Dropping the handle (and every clone of
/// `client`) shuts the node and its timers down.
pub struct NodeHandle {
    /// Ingress: the transport delivers inbound envelopes through this.
    pub client: NodeClient,
    /// Present when `publish_testing_events` was set.
    pub test_events: Option<TestEventStream>,
    role_watcher: watch::Receiver<RoleSnapshot>,
}

impl NodeHandle {
    pub fn role_watcher(&self) -> RoleWatcher {
        RoleWatcher {
            receiver: self.role_watcher.clone(),
        }
    }
}

/// Lets an application await leadership changes instead of polling `AskForState`.
/// Intermediate transitions may be clobbered: only the most recent snapshot is kept.
#[derive(Clone)]
pub struct RoleWatcher {
    receiver: watch::Receiver<RoleSnapshot>,
}

impl RoleWatcher {
    pub fn current(&self) -> RoleSnapshot {
        self.receiver.borrow().clone()
    }

    /// The next snapshot after a change, or None once the node has stopped.
    pub async fn next_change(&mut self) -> Option<RoleSnapshot> {
        match self.receiver.changed().await {
            Ok(()) => Some(self.receiver.borrow().clone()),
            Err(_) => None,
        }
    }
}

/// Validate the configuration, assemble a node around in-memory adapters, and spawn
/// its actor. Must be called from within a tokio runtime.
pub fn start_node<M: StateMachine>(config: NodeConfig<M>) -> Result<NodeHandle, NodeStartError> {
    let options = RaftOptionsValidated::try_from(config.options).map_err(NodeStartError::IllegalOptions)?;

    let initial_config = match config.bootstrap_members {
        Some(members) => {
            if members.is_empty() {
                return Err(NodeStartError::EmptyBootstrapConfig);
            }
            if !members.contains(&config.my_id) {
                return Err(NodeStartError::SelfNotInBootstrapConfig(
                    config.my_id.to_string(),
                ));
            }
            MembershipConfig::Stable { members }
        }
        None => MembershipConfig::unconfigured(),
    };

    let (test_event_publisher, test_events) = if options.publish_testing_events {
        let (publisher, stream) = events::enabled_pair();
        (publisher, Some(stream))
    } else {
        (TestEventPublisher::disabled(), None)
    };

    let logger = config
        .logger
        .new(slog::o!("MemberId" => config.my_id.to_string()));

    let (node_client, mailbox) = NodeClient::new(16);

    let (node, role_watcher) = RaftNode::new(RaftNodeConfig {
        logger: logger.clone(),
        my_id: config.my_id,
        initial_config,
        storage: InMemoryLogStorage::new(),
        local_state: VolatileState::new(),
        state_machine: config.state_machine,
        bus: config.bus,
        actor_client: node_client.weak(),
        test_events: test_event_publisher,
        election_timeout_min: options.election_timeout_min,
        election_timeout_max: options.election_timeout_max,
        heartbeat_interval: options.heartbeat_interval,
        append_entries_batch_size: options.append_entries_batch_size,
    })?;

    let actor = NodeActor::new(logger, mailbox, node);
    tokio::task::spawn(actor.run_event_loop());

    Ok(NodeHandle {
        client: node_client,
        test_events,
        role_watcher,
    })
}
