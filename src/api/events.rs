use crate::node::local_state::Term;
use crate::node::log::Index;
use tokio::sync::mpsc;

/// Internal milestones published for tests when `publish_testing_events` is set.
/// Purely observational; nothing in the engine reads them back.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TestEvent {
    BeginElection,
    ElectedAsLeader(Term),
    EntryCommitted(Index),
}

/// The node-side publisher. Disabled in production: `publish` is a no-op and costs a
/// single branch.
pub(crate) struct TestEventPublisher {
    sender: Option<mpsc::UnboundedSender<TestEvent>>,
}

impl TestEventPublisher {
    pub(crate) fn disabled() -> Self {
        TestEventPublisher { sender: None }
    }

    pub(crate) fn publish(&self, event: TestEvent) {
        if let Some(sender) = &self.sender {
            // A dropped listener just means the test stopped watching.
            let _ = sender.send(event);
        }
    }
}

/// The test-side consumer of published milestones.
pub struct TestEventStream {
    receiver: mpsc::UnboundedReceiver<TestEvent>,
}

impl TestEventStream {
    pub async fn next_event(&mut self) -> Option<TestEvent> {
        self.receiver.recv().await
    }
}

pub(crate) fn enabled_pair() -> (TestEventPublisher, TestEventStream) {
    let (tx, rx) = mpsc::unbounded_channel();

    (
        TestEventPublisher { sender: Some(tx) },
        TestEventStream { receiver: rx },
    )
}
