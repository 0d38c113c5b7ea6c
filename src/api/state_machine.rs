use bytes::Bytes;

/// StateMachine is the application's view of the replicated log: committed commands,
/// in log order, exactly once each. The engine only ever calls `apply` for
/// application commands; configuration entries are consensus metadata and are
/// consumed internally.
///
/// `apply` runs on the node's event thread. It must be deterministic and should be
/// quick; every node in the cluster applies the same sequence. The returned output
/// is routed back over the bus to the client that originated the entry (leader side
/// only), so a client can correlate a reply with its request. Application-level
/// failures belong inside the output payload; from raft's point of view the entry is
/// committed either way.
pub trait StateMachine: Send + 'static {
    fn apply(&mut self, command: Bytes) -> StateMachineOutput;
}

pub enum StateMachineOutput {
    Data(Bytes),
    NoData,
}

impl StateMachineOutput {
    pub(crate) fn into_data(self) -> Option<Bytes> {
        match self {
            StateMachineOutput::Data(data) => Some(data),
            StateMachineOutput::NoData => None,
        }
    }
}

/// A state machine that ignores every command. Useful for clusters that only care
/// about leadership, and for tests.
pub struct NoOpStateMachine;

impl StateMachine for NoOpStateMachine {
    fn apply(&mut self, _: Bytes) -> StateMachineOutput {
        StateMachineOutput::NoData
    }
}
