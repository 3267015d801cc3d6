#![forbid(unsafe_code)]

//! Lifetime-bound task queue.
//!
//! A [`TaskQueue`] holds closures that only run while its owning
//! [`Activity`] is active. It pauses on `deactivated`, resumes and
//! drains on `activated`, and stops permanently (discarding queued
//! tasks) when the activity's node unlinks. Because emission is
//! synchronous and single-threaded, pause and resume cannot race a
//! draining task.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use graft_core::Listener;

use crate::activity::{ACTIVATED_EVENT, Activity, DEACTIVATED_EVENT};

type Task = Box<dyn FnOnce()>;

struct QueueState {
    tasks: VecDeque<Task>,
    paused: bool,
    stopped: bool,
    /// Re-entrancy guard: a draining task that pushes more tasks must
    /// not start a nested drain.
    running: bool,
}

/// Queue of deferred closures gated on an activity's lifecycle.
#[derive(Clone)]
pub struct TaskQueue {
    state: Rc<RefCell<QueueState>>,
}

impl TaskQueue {
    /// Create a queue bound to `activity`.
    ///
    /// The queue starts paused unless the activity is already active.
    /// Binding to an already-unlinked activity yields a permanently
    /// stopped queue.
    #[must_use]
    pub fn bound_to(activity: &Activity) -> Self {
        let queue = Self {
            state: Rc::new(RefCell::new(QueueState {
                tasks: VecDeque::new(),
                paused: !activity.is_active(),
                stopped: false,
                running: false,
            })),
        };

        let on_event = queue.clone();
        let on_gone = queue.clone();
        let installed = activity.node().listen_with(
            Listener::new()
                .on_event(move |_, event| {
                    match event.name() {
                        ACTIVATED_EVENT => on_event.resume(),
                        DEACTIVATED_EVENT => on_event.pause(),
                        _ => {}
                    }
                    Ok(())
                })
                .on_unlinked(move || on_gone.stop()),
        );
        if installed.is_err() {
            queue.stop();
        }
        queue
    }

    /// Enqueue a task. Runs immediately if the queue is unpaused;
    /// discarded if the queue has stopped.
    pub fn push(&self, task: impl FnOnce() + 'static) {
        {
            let mut state = self.state.borrow_mut();
            if state.stopped {
                tracing::trace!("task dropped: queue stopped");
                return;
            }
            state.tasks.push_back(Box::new(task));
        }
        self.drain();
    }

    /// Number of tasks waiting to run.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.borrow().tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.borrow().tasks.is_empty()
    }

    /// Whether the queue is currently gated.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.state.borrow().paused
    }

    /// Whether the queue has been permanently stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state.borrow().stopped
    }

    fn resume(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.stopped {
                return;
            }
            state.paused = false;
        }
        self.drain();
    }

    fn pause(&self) {
        let mut state = self.state.borrow_mut();
        if !state.stopped {
            state.paused = true;
        }
    }

    fn stop(&self) {
        let mut state = self.state.borrow_mut();
        state.stopped = true;
        state.paused = true;
        let dropped = state.tasks.len();
        state.tasks.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "task queue stopped with tasks pending");
        }
    }

    /// Run queued tasks until the queue empties or pauses. One task is
    /// popped per borrow so a task may push, pause, or stop the queue
    /// it runs on.
    fn drain(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.running || state.paused {
                return;
            }
            state.running = true;
        }
        loop {
            let task = {
                let mut state = self.state.borrow_mut();
                if state.paused || state.stopped {
                    None
                } else {
                    state.tasks.pop_front()
                }
            };
            let Some(task) = task else { break };
            task();
        }
        self.state.borrow_mut().running = false;
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("TaskQueue")
            .field("pending", &state.tasks.len())
            .field("paused", &state.paused)
            .field("stopped", &state.stopped)
            .finish()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::LocalExecutor;
    use std::cell::Cell;

    fn active_activity(exec: &LocalExecutor) -> Activity {
        let activity = Activity::builder().build(exec);
        exec.run_until(activity.activate()).unwrap();
        activity
    }

    #[test]
    fn starts_paused_when_inactive() {
        let exec = LocalExecutor::new();
        let activity = Activity::builder().build(&exec);
        let queue = TaskQueue::bound_to(&activity);

        let ran = Rc::new(Cell::new(false));
        let r = Rc::clone(&ran);
        queue.push(move || r.set(true));

        assert!(queue.is_paused());
        assert!(!ran.get());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn runs_immediately_when_active() {
        let exec = LocalExecutor::new();
        let activity = active_activity(&exec);
        let queue = TaskQueue::bound_to(&activity);

        let ran = Rc::new(Cell::new(false));
        let r = Rc::clone(&ran);
        queue.push(move || r.set(true));
        assert!(ran.get());
        assert!(queue.is_empty());
    }

    #[test]
    fn activation_drains_backlog_in_order() {
        let exec = LocalExecutor::new();
        let activity = Activity::builder().build(&exec);
        let queue = TaskQueue::bound_to(&activity);

        let log = Rc::new(RefCell::new(Vec::new()));
        for label in ["a", "b", "c"] {
            let l = Rc::clone(&log);
            queue.push(move || l.borrow_mut().push(label));
        }
        assert!(log.borrow().is_empty());

        exec.run_until(activity.activate()).unwrap();
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn deactivation_pauses_new_tasks() {
        let exec = LocalExecutor::new();
        let activity = active_activity(&exec);
        let queue = TaskQueue::bound_to(&activity);

        exec.run_until(activity.deactivate()).unwrap();
        let ran = Rc::new(Cell::new(false));
        let r = Rc::clone(&ran);
        queue.push(move || r.set(true));
        assert!(!ran.get());

        exec.run_until(activity.activate()).unwrap();
        assert!(ran.get(), "reactivation drains tasks queued while paused");
    }

    #[test]
    fn unlink_stops_queue_and_discards_tasks() {
        let exec = LocalExecutor::new();
        let activity = Activity::builder().build(&exec);
        let queue = TaskQueue::bound_to(&activity);

        let ran = Rc::new(Cell::new(false));
        let r = Rc::clone(&ran);
        queue.push(move || r.set(true));

        activity.unlink();
        exec.run_until_stalled();

        assert!(queue.is_stopped());
        assert!(queue.is_empty(), "stop discards queued tasks");
        assert!(!ran.get());

        let r2 = Rc::new(Cell::new(false));
        let r2c = Rc::clone(&r2);
        queue.push(move || r2c.set(true));
        assert!(!r2.get(), "stopped queue drops new tasks");
    }

    #[test]
    fn binding_to_unlinked_activity_yields_stopped_queue() {
        let exec = LocalExecutor::new();
        let activity = Activity::builder().build(&exec);
        activity.unlink();

        let queue = TaskQueue::bound_to(&activity);
        assert!(queue.is_stopped());
    }

    #[test]
    fn task_may_push_onto_its_own_queue() {
        let exec = LocalExecutor::new();
        let activity = active_activity(&exec);
        let queue = TaskQueue::bound_to(&activity);

        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        let q = queue.clone();
        queue.push(move || {
            l.borrow_mut().push("outer");
            let l2 = Rc::clone(&l);
            q.push(move || l2.borrow_mut().push("inner"));
        });

        assert_eq!(*log.borrow(), vec!["outer", "inner"]);
    }
}
