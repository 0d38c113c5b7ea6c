use crate::node::local_state::Term;
use crate::node::log::{Entry, Index};
use crate::node::membership::MemberId;
use crate::node::role::NodeRole;
use bytes::Bytes;
use std::collections::BTreeSet;

/// Envelope is what actually travels on the message bus: a message plus the sender's
/// bus address. Reply routing and per-peer bookkeeping are always keyed off
/// `from`, never off anything inside the message.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub from: MemberId,
    pub message: Message,
}

/// Every message a node sends or receives. Delivery is best-effort and unordered;
/// the protocol tolerates drops and duplicates by construction.
#[derive(Clone, Debug)]
pub enum Message {
    // Election RPCs. The candidate's identity is the envelope sender.
    RequestVote(RequestVote),
    VoteGranted { term: Term },
    VoteDenied { term: Term },

    // Replication RPCs.
    AppendEntries(AppendEntries),
    AppendSuccessful { term: Term, match_index: Index },
    AppendRejected { term: Term, last_index: Index },

    // Client traffic. `client` is the reply address for the apply result.
    ClientMessage { client: MemberId, command: Bytes },
    ClientReply { index: Index, output: Option<Bytes> },
    NotLeader { leader_hint: Option<MemberId> },

    // Admin / discovery traffic.
    ChangeConfiguration { members: BTreeSet<MemberId> },
    RequestConfiguration,
    AskForState,
    IAmInState { role: NodeRole },
}

#[derive(Clone, Debug)]
pub struct RequestVote {
    pub term: Term,
    pub last_log_index: Index,
    pub last_log_term: Term,
}

#[derive(Clone, Debug)]
pub struct AppendEntries {
    pub term: Term,
    pub prev_log_index: Index,
    pub prev_log_term: Term,
    pub entries: Vec<Entry>,
    pub leader_commit: Index,
}

impl AppendEntries {
    /// An empty batch doubles as the leader's heartbeat.
    pub fn is_heartbeat(&self) -> bool {
        self.entries.is_empty()
    }
}
