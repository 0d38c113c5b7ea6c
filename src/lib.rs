mod actor;
mod api;
mod node;

pub use actor::NodeClient;
pub use actor::NodeStopped;
pub use api::start_node;
pub use api::LocalBus;
pub use api::MessageBus;
pub use api::NoOpStateMachine;
pub use api::NodeConfig;
pub use api::NodeHandle;
pub use api::NodeStartError;
pub use api::RaftOptions;
pub use api::RoleWatcher;
pub use api::StateMachine;
pub use api::StateMachineOutput;
pub use api::TestEvent;
pub use api::TestEventStream;
pub use node::AppendEntries;
pub use node::Command;
pub use node::Entry;
pub use node::Envelope;
pub use node::Index;
pub use node::InMemoryLogStorage;
pub use node::LogStorage;
pub use node::MemberId;
pub use node::MembershipConfig;
pub use node::Message;
pub use node::NodeRole;
pub use node::PersistentState;
pub use node::RequestVote;
pub use node::RoleSnapshot;
pub use node::Term;
pub use node::VolatileState;
