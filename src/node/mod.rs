pub(crate) mod local_state;
pub(crate) mod log;
pub(crate) mod log_index_map;
pub(crate) mod membership;
pub(crate) mod messages;
pub(crate) mod node;
pub(crate) mod role;
pub(crate) mod storage;
pub(crate) mod timers;

pub use local_state::PersistentState;
pub use local_state::Term;
pub use local_state::VolatileState;
pub use log::Command;
pub use log::Entry;
pub use log::Index;
pub use membership::MemberId;
pub use membership::MembershipConfig;
pub use messages::AppendEntries;
pub use messages::Envelope;
pub use messages::Message;
pub use messages::RequestVote;
pub use role::NodeRole;
pub use role::RoleSnapshot;
pub use storage::InMemoryLogStorage;
pub use storage::LogStorage;

pub(crate) use node::RaftNode;
pub(crate) use node::RaftNodeConfig;
