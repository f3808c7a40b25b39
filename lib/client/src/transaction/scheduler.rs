use parking_lot::{Condvar, Mutex, MutexGuard};
use rdf_fusion_protocol::ProtocolError;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

const SCHEDULER_THREAD_NAME: &str = "rdf-fusion-ping-scheduler";

/// The task run when the deadline expires. Returns `false` to stop the scheduler.
pub(crate) type PingTask = Box<dyn FnMut() -> bool + Send>;

#[derive(Debug, Default)]
struct SchedulerState {
    deadline: Option<Instant>,
    shutdown: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<SchedulerState>,
    wakeup: Condvar,
}

/// Controls the single pending deadline of a [`PingScheduler`].
///
/// Scheduling replaces the pending deadline, so at most one ping is ever pending.
#[derive(Debug, Clone, Default)]
pub(crate) struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    /// Replaces the pending deadline. A zero delay only cancels it.
    pub(crate) fn schedule(&self, delay: Duration) {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return;
        }
        state.deadline = if delay.is_zero() {
            None
        } else {
            Some(Instant::now() + delay)
        };
        self.shared.wakeup.notify_all();
    }

    pub(crate) fn cancel(&self) {
        let mut state = self.shared.state.lock();
        state.deadline = None;
        self.shared.wakeup.notify_all();
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.shared.state.lock().deadline
    }

    /// Stops the scheduler thread without waiting for a running task.
    pub(crate) fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        state.shutdown = true;
        state.deadline = None;
        self.shared.wakeup.notify_all();
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shared.state.lock().shutdown
    }
}

/// A dedicated timer thread running one task at the scheduled deadline.
///
/// The thread is started on first use and is never shared with result parsing, so slow
/// consumers cannot delay a ping.
pub(crate) struct PingScheduler {
    handle: SchedulerHandle,
    task: Mutex<Option<PingTask>>,
}

impl PingScheduler {
    pub(crate) fn new(handle: SchedulerHandle, task: PingTask) -> Self {
        Self {
            handle,
            task: Mutex::new(Some(task)),
        }
    }

    pub(crate) fn handle(&self) -> &SchedulerHandle {
        &self.handle
    }

    /// Starts the timer thread if it is not running yet.
    pub(crate) fn ensure_started(&self) -> Result<(), ProtocolError> {
        let mut task = self.task.lock();
        let Some(pending) = task.take() else {
            return Ok(());
        };
        if self.handle.is_shut_down() {
            return Err(ProtocolError::Closed);
        }
        let shared = Arc::clone(&self.handle.shared);
        // The task is handed back if the thread cannot be spawned.
        let pending = Arc::new(Mutex::new(Some(pending)));
        let worker_task = Arc::clone(&pending);
        let spawned = thread::Builder::new()
            .name(SCHEDULER_THREAD_NAME.to_owned())
            .spawn(move || {
                if let Some(task) = worker_task.lock().take() {
                    run(&shared, task);
                }
            });
        if let Err(error) = spawned {
            *task = pending.lock().take();
            return Err(ProtocolError::worker_spawn(error));
        }
        Ok(())
    }

    pub(crate) fn shutdown(&self) {
        self.handle.shutdown();
        self.task.lock().take();
    }
}

fn run(shared: &Shared, mut task: PingTask) {
    debug!("Ping scheduler started");
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        let deadline = state.deadline;
        match deadline {
            None => shared.wakeup.wait(&mut state),
            Some(deadline) if Instant::now() >= deadline => {
                state.deadline = None;
                let keep_running = MutexGuard::unlocked(&mut state, || task());
                if !keep_running {
                    break;
                }
            }
            Some(deadline) => {
                shared.wakeup.wait_until(&mut state, deadline);
            }
        }
    }
    debug!("Ping scheduler stopped");
}
