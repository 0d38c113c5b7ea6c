use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// A deadline shared between a timer handle (writer) and its timer task (consumer).
/// The task `take()`s the deadline each loop iteration; a `None` means nobody pushed
/// the deadline out while the task slept, i.e. the timer fired.
#[derive(Clone)]
pub(super) struct SharedDeadline {
    deadline: Arc<Mutex<Option<Instant>>>,
}

impl SharedDeadline {
    pub(super) fn new() -> Self {
        SharedDeadline {
            deadline: Arc::new(Mutex::new(None)),
        }
    }

    pub(super) fn push_out_to(&self, new_deadline: Instant) {
        self.lock().replace(new_deadline);
    }

    pub(super) fn take(&self) -> Option<Instant> {
        self.lock().take()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.deadline.lock().expect("SharedDeadline mutex poisoned")
    }
}

/// Drop-based stop signal: the handle side holds a `TaskStopper`, the task polls its
/// `StopCheck`. Dropping the handle (e.g. on a role transition) stops the task.
pub(super) struct TaskStopper {
    stopped: Arc<AtomicBool>,
}

pub(super) struct StopCheck {
    stopped: Arc<AtomicBool>,
}

pub(super) fn stop_signal() -> (TaskStopper, StopCheck) {
    let stopped = Arc::new(AtomicBool::new(false));

    (
        TaskStopper {
            stopped: stopped.clone(),
        },
        StopCheck { stopped },
    )
}

impl Drop for TaskStopper {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::Release);
    }
}

impl StopCheck {
    pub(super) fn should_stop(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}
