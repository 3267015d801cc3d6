#![forbid(unsafe_code)]

//! The activation state machine.
//!
//! An [`ActivationQueue`] serializes asynchronous activate/deactivate
//! transitions for one activity. Requests for the target already being
//! transitioned to coalesce onto the same in-flight handle; a request
//! for the opposite target supersedes whatever is pending, and the
//! superseded transition settles with [`GraftError::Cancelled`].
//!
//! Serialization uses an explicit pending slot plus one driver task per
//! request: each driver awaits its predecessor's handle, then re-reads
//! the pending slot to decide
//! whether it still speaks for the latest request. That re-read happens
//! again after the before-hook await, so a request arriving mid-hook
//! still wins.
//!
//! # Invariants
//!
//! 1. At most one transition executes hooks at a time (strict
//!    serialization through the predecessor chain).
//! 2. A superseded transition never commits and never runs its
//!    after-hook; if its before-hook had not started, neither hook runs
//!    at all.
//! 3. A before-hook error propagates to the transition's awaiter;
//!    after-hook errors go to the global error sink.
//! 4. Bookkeeping clears once nothing is pending, so the next request
//!    is evaluated fresh against the settled state.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, Waker};

use graft_core::{GraftError, Result, report_error};

use crate::exec::LocalExecutor;

/// Boxed future returned by lifecycle hooks.
pub type HookFuture = Pin<Box<dyn Future<Output = Result<()>>>>;

// ─── Diagnostics ─────────────────────────────────────────────────────────────

/// Total number of transitions that settled as superseded.
static TRANSITIONS_CANCELLED_TOTAL: AtomicU64 = AtomicU64::new(0);

/// Read the total cancelled-transition count (for diagnostics).
#[must_use]
pub fn transitions_cancelled_total() -> u64 {
    TRANSITIONS_CANCELLED_TOTAL.load(Ordering::Relaxed)
}

// ─── TransitionHandle ────────────────────────────────────────────────────────

#[derive(Default)]
struct TransitionState {
    result: Option<Result<()>>,
    wakers: Vec<Waker>,
}

/// Shared completion handle for one requested transition.
///
/// Clones observe the same settlement; awaiting an already-settled
/// handle resolves immediately with the recorded result.
#[derive(Clone)]
pub struct TransitionHandle {
    state: Rc<RefCell<TransitionState>>,
}

impl TransitionHandle {
    fn pending() -> Self {
        Self {
            state: Rc::new(RefCell::new(TransitionState::default())),
        }
    }

    pub(crate) fn ready(result: Result<()>) -> Self {
        Self {
            state: Rc::new(RefCell::new(TransitionState {
                result: Some(result),
                wakers: Vec::new(),
            })),
        }
    }

    fn complete(&self, result: Result<()>) {
        let mut state = self.state.borrow_mut();
        if state.result.is_none() {
            state.result = Some(result);
            for waker in state.wakers.drain(..) {
                waker.wake();
            }
        }
    }

    fn is_same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    /// The settled result, if the transition has settled.
    #[must_use]
    pub fn result(&self) -> Option<Result<()>> {
        self.state.borrow().result.clone()
    }
}

impl Future for TransitionHandle {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.borrow_mut();
        if let Some(result) = state.result.clone() {
            return Poll::Ready(result);
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl std::fmt::Debug for TransitionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionHandle")
            .field("settled", &self.state.borrow().result.is_some())
            .finish()
    }
}

// ─── ActivationQueue ─────────────────────────────────────────────────────────

struct PendingRequest {
    target: bool,
    handle: TransitionHandle,
}

struct QueueInner {
    /// Last settled state.
    active: bool,
    /// The latest unsettled request, if any.
    pending: Option<PendingRequest>,
    /// Handle of the most recently spawned driver; successors chain
    /// behind it for strict serialization.
    tail: Option<TransitionHandle>,
}

/// Per-activity queue of activate/deactivate transitions.
#[derive(Clone)]
pub struct ActivationQueue {
    inner: Rc<RefCell<QueueInner>>,
    exec: LocalExecutor,
}

impl ActivationQueue {
    /// Create a queue in the `Inactive` state.
    #[must_use]
    pub fn new(exec: &LocalExecutor) -> Self {
        Self {
            inner: Rc::new(RefCell::new(QueueInner {
                active: false,
                pending: None,
                tail: None,
            })),
            exec: exec.clone(),
        }
    }

    /// Last settled state.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.borrow().active
    }

    /// Whether a transition toward `Active` is in flight.
    #[must_use]
    pub fn activating(&self) -> bool {
        self.inner
            .borrow()
            .pending
            .as_ref()
            .is_some_and(|p| p.target)
    }

    /// Whether a transition toward `Inactive` is in flight.
    #[must_use]
    pub fn deactivating(&self) -> bool {
        self.inner
            .borrow()
            .pending
            .as_ref()
            .is_some_and(|p| !p.target)
    }

    /// Request a transition to `target`.
    ///
    /// - Already settled at `target` with nothing pending: resolves
    ///   immediately (idempotent).
    /// - Same target already pending: returns the same in-flight handle
    ///   (coalescing).
    /// - Otherwise the request supersedes the pending one, which will
    ///   settle as [`GraftError::Cancelled`].
    ///
    /// `before` errors propagate through the returned handle; on success
    /// the state commits, `commit` runs synchronously, and `after` runs
    /// fire-and-forget with errors routed to the global sink.
    pub fn request(
        &self,
        target: bool,
        before: impl FnOnce() -> HookFuture + 'static,
        commit: impl FnOnce(bool) + 'static,
        after: impl FnOnce() -> HookFuture + 'static,
    ) -> TransitionHandle {
        let (handle, prior) = {
            let mut q = self.inner.borrow_mut();
            if let Some(pending) = &q.pending {
                if pending.target == target {
                    return pending.handle.clone();
                }
            } else if q.active == target {
                return TransitionHandle::ready(Ok(()));
            }

            let handle = TransitionHandle::pending();
            let prior = q.tail.clone();
            q.pending = Some(PendingRequest {
                target,
                handle: handle.clone(),
            });
            q.tail = Some(handle.clone());
            (handle, prior)
        };

        let inner = Rc::clone(&self.inner);
        let exec = self.exec.clone();
        let mine = handle.clone();
        self.exec.spawn(async move {
            // Strict serialization: wait for the predecessor to settle.
            // Its outcome is irrelevant here.
            if let Some(prev) = prior {
                let _ = prev.await;
            }

            // Superseded while queued? Then neither hook runs.
            if !is_current(&inner, &mine) {
                settle_cancelled(&inner, &mine, target, "superseded before start");
                return;
            }

            let before_result = before().await;

            // Re-read after the await: a newer request may have arrived
            // while the before-hook was running.
            let still_current = is_current(&inner, &mine);
            match (before_result, still_current) {
                (Err(err), _) => {
                    tracing::debug!(target, error = %err, "before-hook failed");
                    finish(&inner, &mine, Err(err));
                }
                (Ok(()), false) => {
                    settle_cancelled(&inner, &mine, target, "superseded during before-hook");
                }
                (Ok(()), true) => {
                    inner.borrow_mut().active = target;
                    commit(target);
                    finish(&inner, &mine, Ok(()));
                    exec.spawn(async move {
                        if let Err(err) = after().await {
                            report_error(&err);
                        }
                    });
                }
            }
        });
        handle
    }
}

impl std::fmt::Debug for ActivationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let q = self.inner.borrow();
        f.debug_struct("ActivationQueue")
            .field("active", &q.active)
            .field("pending", &q.pending.as_ref().map(|p| p.target))
            .finish()
    }
}

/// Whether `handle` still speaks for the latest request.
fn is_current(inner: &Rc<RefCell<QueueInner>>, handle: &TransitionHandle) -> bool {
    inner
        .borrow()
        .pending
        .as_ref()
        .is_some_and(|p| p.handle.is_same(handle))
}

fn settle_cancelled(
    inner: &Rc<RefCell<QueueInner>>,
    handle: &TransitionHandle,
    target: bool,
    reason: &str,
) {
    TRANSITIONS_CANCELLED_TOTAL.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(target, reason, "transition cancelled");
    finish(inner, handle, Err(GraftError::Cancelled));
}

/// Clear bookkeeping owned by `handle`, then settle it.
fn finish(inner: &Rc<RefCell<QueueInner>>, handle: &TransitionHandle, result: Result<()>) {
    {
        let mut q = inner.borrow_mut();
        if q.pending.as_ref().is_some_and(|p| p.handle.is_same(handle)) {
            q.pending = None;
        }
        if q.tail.as_ref().is_some_and(|t| t.is_same(handle)) {
            q.tail = None;
        }
    }
    handle.complete(result);
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn counting_hook(counter: &Rc<Cell<u32>>) -> impl FnOnce() -> HookFuture + 'static {
        let counter = Rc::clone(counter);
        move || {
            counter.set(counter.get() + 1);
            Box::pin(std::future::ready(Ok(())))
        }
    }

    fn noop_hook() -> HookFuture {
        Box::pin(std::future::ready(Ok(())))
    }

    #[test]
    fn simple_activate() {
        let exec = LocalExecutor::new();
        let q = ActivationQueue::new(&exec);
        let before = Rc::new(Cell::new(0));
        let after = Rc::new(Cell::new(0));

        let h = q.request(true, counting_hook(&before), |_| {}, counting_hook(&after));
        assert!(q.activating());
        exec.run_until(h).unwrap();
        exec.run_until_stalled();

        assert!(q.is_active());
        assert!(!q.activating());
        assert_eq!(before.get(), 1);
        assert_eq!(after.get(), 1);
    }

    #[test]
    fn idempotent_when_settled() {
        let exec = LocalExecutor::new();
        let q = ActivationQueue::new(&exec);

        // Initially inactive; deactivate resolves immediately.
        let h = q.request(false, || noop_hook(), |_| {}, || noop_hook());
        assert_eq!(h.result(), Some(Ok(())));

        exec.run_until(q.request(true, || noop_hook(), |_| {}, || noop_hook()))
            .unwrap();
        let again = q.request(true, || noop_hook(), |_| {}, || noop_hook());
        assert_eq!(again.result(), Some(Ok(())), "already active: resolved handle");
    }

    #[test]
    fn same_target_coalesces_onto_one_handle() {
        let exec = LocalExecutor::new();
        let q = ActivationQueue::new(&exec);
        let before = Rc::new(Cell::new(0));

        let h1 = q.request(true, counting_hook(&before), |_| {}, || noop_hook());
        let h2 = q.request(true, || noop_hook(), |_| {}, || noop_hook());
        assert!(h1.is_same(&h2), "same-target request reuses the in-flight handle");

        exec.run_until(h2).unwrap();
        assert_eq!(before.get(), 1, "hooks run once for the coalesced pair");
    }

    #[test]
    fn rapid_flip_settles_on_last_request() {
        let exec = LocalExecutor::new();
        let q = ActivationQueue::new(&exec);
        let before_active = Rc::new(Cell::new(0));
        let before_inactive = Rc::new(Cell::new(0));

        // activate -> deactivate -> activate, issued synchronously.
        let h1 = q.request(true, counting_hook(&before_active), |_| {}, || noop_hook());
        let h2 = q.request(false, counting_hook(&before_inactive), |_| {}, || noop_hook());
        let h3 = q.request(true, counting_hook(&before_active), |_| {}, || noop_hook());

        let r3 = exec.run_until(h3);
        exec.run_until_stalled();

        assert_eq!(r3, Ok(()));
        assert_eq!(exec.run_until(h1), Err(GraftError::Cancelled));
        assert_eq!(exec.run_until(h2), Err(GraftError::Cancelled));
        assert!(q.is_active());
        assert_eq!(before_active.get(), 1, "before-activate runs exactly once");
        assert_eq!(before_inactive.get(), 0, "before-deactivate never runs");
    }

    #[test]
    fn before_hook_error_propagates() {
        let exec = LocalExecutor::new();
        let q = ActivationQueue::new(&exec);

        let h = q.request(
            true,
            || Box::pin(std::future::ready(Err(GraftError::other("refused")))),
            |_| {},
            || noop_hook(),
        );
        assert_eq!(exec.run_until(h), Err(GraftError::other("refused")));
        assert!(!q.is_active(), "failed transition must not commit");

        // The queue recovers: a fresh request works.
        exec.run_until(q.request(true, || noop_hook(), |_| {}, || noop_hook()))
            .unwrap();
        assert!(q.is_active());
    }

    #[test]
    fn superseded_before_start_runs_no_hooks() {
        let exec = LocalExecutor::new();
        let q = ActivationQueue::new(&exec);
        let before_active = Rc::new(Cell::new(0));

        let h1 = q.request(true, counting_hook(&before_active), |_| {}, || noop_hook());
        let h2 = q.request(false, || noop_hook(), |_| {}, || noop_hook());

        assert_eq!(exec.run_until(h1), Err(GraftError::Cancelled));
        // Queue was inactive and the winning request targets inactive:
        // it settles without committing anything new.
        exec.run_until(h2).unwrap();
        assert_eq!(before_active.get(), 0, "superseded request must not run hooks");
        assert!(!q.is_active());
    }

    #[test]
    fn only_the_winning_request_commits() {
        let exec = LocalExecutor::new();
        let q = ActivationQueue::new(&exec);
        let activations = Rc::new(Cell::new(0));
        let deactivations = Rc::new(Cell::new(0));

        let c = Rc::clone(&activations);
        let h1 = q.request(true, || noop_hook(), move |_| c.set(c.get() + 1), || noop_hook());
        let c = Rc::clone(&deactivations);
        let h2 = q.request(false, || noop_hook(), move |_| c.set(c.get() + 1), || noop_hook());

        assert_eq!(exec.run_until(h1), Err(GraftError::Cancelled));
        exec.run_until(h2).unwrap();

        // h2 was in flight when requested, so it runs its full hook
        // sequence and commits; only h1's commit is discarded.
        assert_eq!(activations.get(), 0, "superseded request must not commit");
        assert_eq!(deactivations.get(), 1, "winning request commits exactly once");
        assert!(!q.is_active());
    }

    #[test]
    fn cancelled_counter_increments() {
        let exec = LocalExecutor::new();
        let q = ActivationQueue::new(&exec);
        let before = transitions_cancelled_total();

        let h1 = q.request(true, || noop_hook(), |_| {}, || noop_hook());
        let _h2 = q.request(false, || noop_hook(), |_| {}, || noop_hook());
        let _ = exec.run_until(h1);
        exec.run_until_stalled();

        assert!(transitions_cancelled_total() >= before + 1);
    }
}
