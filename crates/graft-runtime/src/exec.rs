#![forbid(unsafe_code)]

//! Single-threaded cooperative executor.
//!
//! Drives the activation state machine and fire-and-forget after-hooks.
//! There is no parallelism anywhere in Graft: tasks are polled one at a
//! time on the caller's thread, and a task only suspends at explicit
//! `await` points. Wakes are collected in a deduplicated list and
//! drained in FIFO order.
//!
//! # Invariants
//!
//! 1. A task is polled only after it has been woken (tasks start woken).
//! 2. `run_until_stalled` returns only when no task can make progress.
//! 3. `run_until` panics rather than spinning if the driven future can
//!    no longer be woken by anything (a deadlocked await).

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Wake, Waker};

/// Reserved id for the future driven by [`LocalExecutor::run_until`].
const MAIN_TASK: u64 = u64::MAX;

// ─── Wake list ───────────────────────────────────────────────────────────────

/// Deduplicated list of woken task ids.
struct WakeList {
    woken: Mutex<Vec<u64>>,
}

impl WakeList {
    fn new() -> Self {
        Self {
            woken: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, task: u64) {
        let mut woken = self.woken.lock().expect("lock poisoned");
        if !woken.contains(&task) {
            woken.push(task);
        }
    }

    fn drain(&self) -> Vec<u64> {
        let mut woken = self.woken.lock().expect("lock poisoned");
        std::mem::take(&mut *woken)
    }

    fn has_pending(&self) -> bool {
        !self.woken.lock().expect("lock poisoned").is_empty()
    }
}

struct TaskWaker {
    list: Arc<WakeList>,
    task: u64,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.list.push(self.task);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.list.push(self.task);
    }
}

// ─── Executor ────────────────────────────────────────────────────────────────

type TaskFuture = Pin<Box<dyn Future<Output = ()>>>;

struct ExecInner {
    tasks: HashMap<u64, TaskFuture>,
    next_id: u64,
}

/// Handle to the executor. Cloning shares the same task set.
#[derive(Clone)]
pub struct LocalExecutor {
    inner: Rc<RefCell<ExecInner>>,
    wakes: Arc<WakeList>,
}

impl LocalExecutor {
    /// Create an empty executor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(ExecInner {
                tasks: HashMap::new(),
                next_id: 1,
            })),
            wakes: Arc::new(WakeList::new()),
        }
    }

    /// Spawn a detached task. It starts woken and runs on the next
    /// [`run_until_stalled`](Self::run_until_stalled) pass.
    pub fn spawn(&self, fut: impl Future<Output = ()> + 'static) {
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.tasks.insert(id, Box::pin(fut));
            id
        };
        self.wakes.push(id);
    }

    /// Number of live (not yet completed) tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.inner.borrow().tasks.len()
    }

    /// Poll woken tasks until none can make further progress.
    pub fn run_until_stalled(&self) {
        let _ = self.run_tasks();
    }

    /// Drive `fut` to completion, interleaving spawned tasks.
    ///
    /// # Panics
    ///
    /// Panics if the future is pending and nothing can wake it again.
    pub fn run_until<F: Future>(&self, fut: F) -> F::Output {
        let mut fut = Box::pin(fut);
        let main_waker = Waker::from(Arc::new(TaskWaker {
            list: Arc::clone(&self.wakes),
            task: MAIN_TASK,
        }));
        loop {
            let main_woken = self.run_tasks();
            let mut cx = Context::from_waker(&main_waker);
            if let Poll::Ready(out) = fut.as_mut().poll(&mut cx) {
                return out;
            }
            if !main_woken && !self.wakes.has_pending() {
                panic!("local executor stalled: the driven future cannot make progress");
            }
        }
    }

    /// Drain and poll woken tasks; returns whether the main future was
    /// woken along the way.
    fn run_tasks(&self) -> bool {
        let mut main_woken = false;
        loop {
            let woken = self.wakes.drain();
            if woken.is_empty() {
                return main_woken;
            }
            for id in woken {
                if id == MAIN_TASK {
                    main_woken = true;
                    continue;
                }
                // Take the task out of the map so the poll itself may
                // spawn or wake without re-entering the borrow.
                let task = self.inner.borrow_mut().tasks.remove(&id);
                let Some(mut task) = task else { continue };
                let waker = Waker::from(Arc::new(TaskWaker {
                    list: Arc::clone(&self.wakes),
                    task: id,
                }));
                let mut cx = Context::from_waker(&waker);
                match task.as_mut().poll(&mut cx) {
                    Poll::Ready(()) => {}
                    Poll::Pending => {
                        self.inner.borrow_mut().tasks.insert(id, task);
                    }
                }
            }
        }
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalExecutor")
            .field("tasks", &self.inner.borrow().tasks.len())
            .finish()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
