use crate::actor::{Event, NodeClient, WeakNodeClient};
use tokio::sync::mpsc;
use tokio::time::Duration;

/// MailboxProbe stands in for the node actor in timer tests: it owns the mailbox and
/// asserts on what the timer tasks push into it.
pub(crate) struct MailboxProbe {
    // Held so the timer tasks' weak client can still upgrade.
    _strong_client: NodeClient,
    receiver: mpsc::Receiver<Event>,
}

impl MailboxProbe {
    pub(crate) fn new() -> (Self, WeakNodeClient) {
        let (client, receiver) = NodeClient::new(16);
        let weak = client.weak();

        (
            MailboxProbe {
                _strong_client: client,
                receiver,
            },
            weak,
        )
    }

    pub(crate) async fn assert_election_timeout(&mut self) {
        match self.next_event().await {
            Some(Event::ElectionTimeout) => {}
            other => panic!("Expected ElectionTimeout, got {:?}", other),
        }
    }

    pub(crate) async fn assert_leader_tick(&mut self) {
        match self.next_event().await {
            Some(Event::LeaderTick) => {}
            other => panic!("Expected LeaderTick, got {:?}", other),
        }
    }

    pub(crate) async fn assert_no_event(&mut self) {
        // Real time, not mock time: just long enough for a runaway timer task to
        // betray itself.
        let outcome = tokio::time::timeout(Duration::from_millis(50), self.receiver.recv()).await;
        if let Ok(event) = outcome {
            panic!("Expected no event, got {:?}", event);
        }
    }

    async fn next_event(&mut self) -> Option<Event> {
        tokio::time::timeout(Duration::from_secs(5), self.receiver.recv())
            .await
            .expect("Timed out waiting for a timer event")
    }
}
