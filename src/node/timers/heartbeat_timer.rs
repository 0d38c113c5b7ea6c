use crate::actor::WeakNodeClient;
use crate::node::timers::signals::SharedDeadline;
use crate::node::timers::time::{Clock, TokioClock};
use std::sync::{Arc, Weak};
use tokio::time::{Duration, Instant};

/// HeartbeatTimerHandle drives a leader's periodic replication round. The task fires
/// a `LeaderTick` immediately on spawn (a fresh leader must assert itself before
/// follower timeouts lapse) and then every `heartbeat_interval`, unless a proactive
/// broadcast pushes the next tick out. Dropping the handle stops the task.
pub(crate) struct HeartbeatTimerHandle<C: Clock = TokioClock> {
    shared: Arc<Shared<C>>,
}

struct Shared<C: Clock> {
    heartbeat_interval: Duration,
    next_tick: SharedDeadline,
    clock: C,
}

struct HeartbeatTimerTask<C: Clock> {
    weak_shared: Weak<Shared<C>>,
    next_tick: SharedDeadline,
    node: WeakNodeClient,
    clock: C,
}

impl HeartbeatTimerHandle {
    pub(crate) fn arm(heartbeat_interval: Duration, node: WeakNodeClient) -> Self {
        let (task, handle) = HeartbeatTimerTask::new(heartbeat_interval, node, TokioClock);
        tokio::task::spawn(task.run());

        handle
    }
}

impl<C: Clock + Send + Sync + 'static> HeartbeatTimerHandle<C> {
    /// The leader just broadcast on its own (new client entry); the periodic tick can
    /// wait a full interval again.
    pub(crate) fn defer_next_tick(&self) {
        self.shared.defer_next_tick();
    }
}

impl<C: Clock> Shared<C> {
    fn defer_next_tick(&self) {
        self.next_tick.push_out_to(self.next_deadline());
    }

    fn next_deadline(&self) -> Instant {
        self.clock.now() + self.heartbeat_interval
    }
}

impl<C: Clock + Send + Sync + 'static> HeartbeatTimerTask<C> {
    fn new(heartbeat_interval: Duration, node: WeakNodeClient, clock: C) -> (Self, HeartbeatTimerHandle<C>) {
        let next_tick = SharedDeadline::new();
        let shared = Arc::new(Shared {
            heartbeat_interval,
            next_tick: next_tick.clone(),
            clock: clock.clone(),
        });

        let task = HeartbeatTimerTask {
            weak_shared: Arc::downgrade(&shared),
            next_tick,
            node,
            clock,
        };
        let handle = HeartbeatTimerHandle { shared };

        (task, handle)
    }

    async fn run(mut self) {
        // The deadline starts empty, so the first iteration ticks immediately. That
        // is deliberate: it is the newly elected leader's first heartbeat round.
        loop {
            match self.next_tick.take() {
                Some(deadline) => {
                    self.clock.sleep_until(deadline).await;
                }
                None => {
                    // Exit quietly once the leader role (and with it the handle) is
                    // gone.
                    let Some(shared) = self.weak_shared.upgrade() else {
                        return;
                    };

                    let _ = self.node.leader_tick().await;
                    shared.defer_next_tick();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::timers::test_utils::MailboxProbe;
    use crate::node::timers::time;

    #[tokio::test]
    async fn ticks_eagerly_then_periodically() {
        let interval = Duration::from_millis(100);
        let (mut probe, node) = MailboxProbe::new();
        let (mock_clock, mut clock_driver) = time::manual_clock();

        let (task, handle) = HeartbeatTimerTask::new(interval, node, mock_clock);
        let task_join = tokio::task::spawn(task.run());

        // First tick arrives without any time passing.
        probe.assert_leader_tick().await;
        probe.assert_no_event().await;

        for _ in 0..3 {
            clock_driver.advance(interval);
            probe.assert_leader_tick().await;
            probe.assert_no_event().await;
        }

        // A long stall still produces a single tick, not a burst.
        clock_driver.advance(interval * 5);
        probe.assert_leader_tick().await;
        probe.assert_no_event().await;

        drop(handle);
        clock_driver.advance(interval);
        task_join.await.unwrap();
        probe.assert_no_event().await;
    }

    #[tokio::test]
    async fn proactive_broadcasts_defer_the_tick() {
        let interval = Duration::from_millis(100);
        let (mut probe, node) = MailboxProbe::new();
        let (mock_clock, mut clock_driver) = time::manual_clock();

        let (task, handle) = HeartbeatTimerTask::new(interval, node, mock_clock);
        tokio::task::spawn(task.run());

        probe.assert_leader_tick().await;

        // Keep deferring at half-interval pace: no periodic tick gets through.
        for _ in 0..4 {
            clock_driver.advance(interval / 2);
            handle.defer_next_tick();
        }
        probe.assert_no_event().await;

        // One full quiet interval later, the periodic tick resumes.
        clock_driver.advance(interval / 2);
        probe.assert_no_event().await;
        clock_driver.advance(interval / 2);
        probe.assert_leader_tick().await;
    }
}
