//! A three-member in-process cluster replicating a word-concatenation state
//! machine. Each submitted word is appended to the shared sentence; the reply to
//! each submission is the sentence so far.

use busraft::{
    start_node, Envelope, LocalBus, MemberId, Message, MessageBus, NodeConfig, NodeHandle, NodeRole,
    RaftOptions, StateMachine, StateMachineOutput,
};
use bytes::Bytes;
use slog::Drain;
use std::collections::BTreeSet;
use tokio::time::{sleep, timeout, Duration};

#[tokio::main]
async fn main() {
    let logger = create_root_logger_for_stdout();
    let bus = LocalBus::new(logger.clone());

    let member_ids: BTreeSet<MemberId> = ["wc-1", "wc-2", "wc-3"].into_iter().map(MemberId::new).collect();

    let mut handles = Vec::new();
    for member in &member_ids {
        let handle = start_node(NodeConfig {
            logger: logger.clone(),
            my_id: member.clone(),
            bootstrap_members: Some(member_ids.clone()),
            options: RaftOptions::default(),
            state_machine: WordConcatStateMachine::default(),
            bus: bus.clone(),
        })
        .expect("node failed to start");
        bus.register_node(member.clone(), handle.client.clone());
        handles.push((member.clone(), handle));
    }

    let leader = wait_for_leader(&handles).await;
    slog::info!(logger, "Cluster elected '{}'", leader);

    let client_id = MemberId::new("demo-client");
    let mut client_rx = bus.open_endpoint(client_id.clone());

    let mut sentence = String::new();
    for word in ["the", "quick", "brown", "fox"] {
        bus_send_client_word(&bus, &client_id, &leader, word);

        let envelope = timeout(Duration::from_secs(5), client_rx.recv())
            .await
            .expect("timed out waiting for a reply")
            .expect("bus endpoint closed");
        match envelope.message {
            Message::ClientReply { index, output } => {
                sentence = String::from_utf8(output.expect("empty reply").to_vec()).unwrap();
                slog::info!(logger, "Committed '{}' at index {:?}: \"{}\"", word, index, sentence);
            }
            Message::NotLeader { leader_hint } => {
                panic!("leadership moved mid-demo, hint: {:?}", leader_hint);
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    println!("Replicated sentence: {}", sentence);
}

fn bus_send_client_word(bus: &LocalBus, client_id: &MemberId, leader: &MemberId, word: &str) {
    bus.send(
        leader,
        Envelope {
            from: client_id.clone(),
            message: Message::ClientMessage {
                client: client_id.clone(),
                command: Bytes::copy_from_slice(word.as_bytes()),
            },
        },
    );
}

async fn wait_for_leader(handles: &[(MemberId, NodeHandle)]) -> MemberId {
    loop {
        for (member, handle) in handles {
            if handle.role_watcher().current().role == NodeRole::Leader {
                return member.clone();
            }
        }
        sleep(Duration::from_millis(20)).await;
    }
}

fn create_root_logger_for_stdout() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}

#[derive(Default)]
struct WordConcatStateMachine {
    words: Vec<String>,
}

impl StateMachine for WordConcatStateMachine {
    fn apply(&mut self, command: Bytes) -> StateMachineOutput {
        self.words.push(String::from_utf8_lossy(&command).into_owned());
        StateMachineOutput::Data(Bytes::from(self.words.join(" ")))
    }
}
