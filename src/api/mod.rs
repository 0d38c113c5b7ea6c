pub(crate) mod bus;
pub(crate) mod events;
pub(crate) mod options;
pub(crate) mod state_machine;
pub(crate) mod wiring;

pub use bus::LocalBus;
pub use bus::MessageBus;
pub use events::TestEvent;
pub use events::TestEventStream;
pub use options::RaftOptions;
pub use state_machine::NoOpStateMachine;
pub use state_machine::StateMachine;
pub use state_machine::StateMachineOutput;
pub use wiring::start_node;
pub use wiring::NodeConfig;
pub use wiring::NodeHandle;
pub use wiring::NodeStartError;
pub use wiring::RoleWatcher;
