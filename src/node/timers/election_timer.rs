use crate::actor::WeakNodeClient;
use crate::node::timers::signals::{self, SharedDeadline, StopCheck};
use crate::node::timers::time::{Clock, TokioClock};
use rand::Rng;
use std::ops::RangeInclusive;
use tokio::time::{Duration, Instant};

/// ElectionTimerHandle arms the randomized election timeout for a follower or
/// candidate. Every reset draws a fresh duration uniformly from
/// `[election_timeout_min, election_timeout_max]`; if the deadline passes without a
/// reset, the timer task notifies the node's mailbox. Dropping the handle (on a role
/// transition) stops the task.
pub(crate) struct ElectionTimerHandle<C: Clock = TokioClock> {
    deadline: SharedDeadline,
    timeout_range: RangeInclusive<Duration>,
    clock: C,
    _stopper: signals::TaskStopper,
}

struct ElectionTimerTask<C: Clock> {
    deadline: SharedDeadline,
    node: WeakNodeClient,
    clock: C,
    stop_check: StopCheck,
    // After firing, wait this long before firing again, in case the node stays in a
    // timeout-prone role (e.g. a candidate that failed to win).
    refire_delay: Duration,
}

impl ElectionTimerHandle {
    pub(crate) fn arm(min_timeout: Duration, max_timeout: Duration, node: WeakNodeClient) -> Self {
        let (task, handle) = ElectionTimerTask::new(min_timeout, max_timeout, node, TokioClock);
        tokio::task::spawn(task.run());

        handle
    }
}

impl<C: Clock + Send + Sync + 'static> ElectionTimerHandle<C> {
    /// Called whenever a valid AppendEntries arrives or a vote is granted.
    pub(crate) fn reset(&self) {
        self.deadline.push_out_to(self.random_deadline());
    }

    fn random_deadline(&self) -> Instant {
        let jittered = rand::thread_rng().gen_range(self.timeout_range.clone());
        self.clock.now() + jittered
    }
}

impl<C: Clock + Send + Sync + 'static> ElectionTimerTask<C> {
    fn new(
        min_timeout: Duration,
        max_timeout: Duration,
        node: WeakNodeClient,
        clock: C,
    ) -> (Self, ElectionTimerHandle<C>) {
        let deadline = SharedDeadline::new();
        let (stopper, stop_check) = signals::stop_signal();

        let task = ElectionTimerTask {
            deadline: deadline.clone(),
            node,
            clock: clock.clone(),
            stop_check,
            refire_delay: min_timeout,
        };
        let handle = ElectionTimerHandle {
            deadline,
            timeout_range: RangeInclusive::new(min_timeout, max_timeout),
            clock,
            _stopper: stopper,
        };

        // The task must start with a deadline in place, or it would fire the moment
        // it is spawned.
        handle.reset();

        (task, handle)
    }

    async fn run(mut self) {
        loop {
            match self.deadline.take() {
                Some(deadline) => {
                    // Someone pushed the deadline out while we slept. Sleep again.
                    self.clock.sleep_until(deadline).await;
                }
                None => {
                    // We reached the last deadline with no reset: the leader has gone
                    // quiet. Tell the node, unless the handle was dropped while we
                    // slept (race between a role transition and this wakeup).
                    if self.stop_check.should_stop() {
                        return;
                    }
                    let _ = self.node.election_timeout().await;
                    self.clock.sleep(self.refire_delay).await;
                }
            }

            if self.stop_check.should_stop() {
                return;
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
    async fn fires_only_after_an_unreset_window() {
        // Pin min == max so the test isn't at the mercy of the jitter.
        let timeout = Duration::from_millis(100);
        let (mut probe, node) = MailboxProbe::new();
        let (mock_clock, mut clock_driver) = time::manual_clock();

        let (task, handle) = ElectionTimerTask::new(timeout, timeout, node, mock_clock);
        tokio::task::spawn(task.run());

        probe.assert_no_event().await;

        // Keep resetting before the window elapses: never fires.
        for _ in 0..4 {
            clock_driver.advance(timeout / 2);
            handle.reset();
        }
        probe.assert_no_event().await;
        assert_eq!(clock_driver.elapsed(), timeout * 2);

        // Let the full window elapse: fires exactly once.
        clock_driver.advance(timeout);
        probe.assert_election_timeout().await;
        probe.assert_no_event().await;
    }

    #[tokio::test]
    async fn refires_while_still_armed() {
        let timeout = Duration::from_millis(100);
        let (mut probe, node) = MailboxProbe::new();
        let (mock_clock, mut clock_driver) = time::manual_clock();

        let (task, _handle) = ElectionTimerTask::new(timeout, timeout, node, mock_clock);
        tokio::task::spawn(task.run());

        // A candidate that doesn't win keeps getting timeouts at refire_delay pace.
        clock_driver.advance(timeout);
        probe.assert_election_timeout().await;

        clock_driver.advance(timeout);
        probe.assert_election_timeout().await;
    }

    #[tokio::test]
    async fn dropping_the_handle_stops_the_task() {
        let timeout = Duration::from_millis(100);
        let (mut probe, node) = MailboxProbe::new();
        let (mock_clock, mut clock_driver) = time::manual_clock();

        let (task, handle) = ElectionTimerTask::new(timeout, timeout, node, mock_clock);
        let task_join = tokio::task::spawn(task.run());

        drop(handle);
        clock_driver.advance(timeout * 2);

        task_join.await.unwrap();
        probe.assert_no_event().await;
    }

    #[tokio::test]
    async fn reset_after_fire_is_harmless() {
        let timeout = Duration::from_millis(100);
        let (mut probe, node) = MailboxProbe::new();
        let (mock_clock, mut clock_driver) = time::manual_clock();

        let (task, handle) = ElectionTimerTask::new(timeout, timeout, node, mock_clock);
        tokio::task::spawn(task.run());

        // The timeout can land in the mailbox while an AppendEntries (which will
        // reset us) is already queued behind it. The late reset must not panic and
        // must keep the timer serviceable.
        clock_driver.advance(timeout);
        probe.assert_election_timeout().await;
        handle.reset();

        for _ in 0..4 {
            clock_driver.advance(timeout / 2);
            handle.reset();
        }
        probe.assert_no_event().await;
    }
}
