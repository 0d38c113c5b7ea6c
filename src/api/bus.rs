use crate::actor::NodeClient;
use crate::node::membership::MemberId;
use crate::node::messages::Envelope;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// MessageBus is the engine's only transport seam. `send` must not block: it hands
/// the envelope to the transport and returns. Delivery is best-effort and unordered;
/// envelopes may be dropped or duplicated, and the protocol tolerates both.
///
/// The inbound direction is not part of this trait: a transport delivers received
/// envelopes by calling `NodeClient::deliver`.
pub trait MessageBus: Send + Sync + 'static {
    fn send(&self, to: &MemberId, envelope: Envelope);
}

enum Route {
    Node(mpsc::UnboundedSender<Envelope>),
    Endpoint(mpsc::UnboundedSender<Envelope>),
}

/// LocalBus routes envelopes between nodes (and plain endpoints, e.g. test clients)
/// living in the same process. Sends to unknown addresses are dropped, which is
/// exactly the best-effort contract — a crashed node is simply deregistered.
pub struct LocalBus {
    logger: slog::Logger,
    routes: Mutex<HashMap<MemberId, Route>>,
}

impl LocalBus {
    pub fn new(logger: slog::Logger) -> Arc<Self> {
        Arc::new(LocalBus {
            logger,
            routes: Mutex::new(HashMap::new()),
        })
    }

    /// Attach a node's mailbox to `address`. A pump task feeds the node for as long
    /// as both the bus entry and the node live.
    pub fn register_node(&self, address: MemberId, client: NodeClient) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        tokio::task::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                if client.deliver(envelope).await.is_err() {
                    return;
                }
            }
        });

        self.routes_locked().insert(address, Route::Node(tx));
    }

    /// Open a plain receive endpoint at `address` (a client, in raft's vocabulary).
    pub fn open_endpoint(&self, address: MemberId) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes_locked().insert(address, Route::Endpoint(tx));
        rx
    }

    /// Remove an address. Subsequent sends to it vanish, as if the network ate them.
    pub fn disconnect(&self, address: &MemberId) {
        self.routes_locked().remove(address);
    }

    fn routes_locked(&self) -> std::sync::MutexGuard<'_, HashMap<MemberId, Route>> {
        self.routes.lock().expect("LocalBus routes mutex poisoned")
    }
}

impl MessageBus for LocalBus {
    fn send(&self, to: &MemberId, envelope: Envelope) {
        let routes = self.routes_locked();
        let delivered = match routes.get(to) {
            Some(Route::Node(tx)) => tx.send(envelope).is_ok(),
            Some(Route::Endpoint(tx)) => tx.send(envelope).is_ok(),
            None => false,
        };

        if !delivered {
            slog::debug!(self.logger, "Dropping envelope to unreachable '{:?}'", to);
        }
    }
}
