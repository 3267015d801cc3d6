#![forbid(unsafe_code)]

//! Activities: nodes with an asynchronous active/inactive lifecycle.
//!
//! An [`Activity`] pairs a [`Node`] with an [`ActivationQueue`] and four
//! optional async lifecycle hooks. Activation and deactivation go
//! through the queue, so rapid flips coalesce and supersede per the
//! queue's rules; on every committed transition the activity emits an
//! `activated` or `deactivated` event on its node, after the state
//! commit and before the after-hook runs.

use std::future::Future;
use std::rc::Rc;

use graft_core::{Event, GraftError, Node, Result, report_error};

use crate::activation::{ActivationQueue, HookFuture, TransitionHandle};
use crate::exec::LocalExecutor;

/// Event emitted on the activity's node when it commits to active.
pub const ACTIVATED_EVENT: &str = "activated";
/// Event emitted on the activity's node when it commits to inactive.
pub const DEACTIVATED_EVENT: &str = "deactivated";

type HookFn = Rc<dyn Fn() -> HookFuture>;

#[derive(Clone, Default)]
struct Hooks {
    before_active: Option<HookFn>,
    after_active: Option<HookFn>,
    before_inactive: Option<HookFn>,
    after_inactive: Option<HookFn>,
}

/// Adapt an optional hook into the queue's `FnOnce` shape. Absent hooks
/// resolve immediately.
fn hook_call(hook: &Option<HookFn>) -> impl FnOnce() -> HookFuture + 'static {
    let hook = hook.clone();
    move || match hook {
        Some(f) => f(),
        None => Box::pin(std::future::ready(Ok(()))),
    }
}

/// A node with a serialized async activation lifecycle.
///
/// Cloning shares the same node, queue, and hooks.
#[derive(Clone)]
pub struct Activity {
    node: Node,
    queue: ActivationQueue,
    exec: LocalExecutor,
    hooks: Hooks,
}

impl Activity {
    /// Start configuring an activity around a fresh node.
    #[must_use]
    pub fn builder() -> ActivityBuilder {
        ActivityBuilder {
            node: None,
            hooks: Hooks::default(),
        }
    }

    /// The underlying node. Listen here for [`ACTIVATED_EVENT`] and
    /// [`DEACTIVATED_EVENT`].
    #[must_use]
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Last committed state.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.queue.is_active()
    }

    /// Whether a transition toward active is in flight.
    #[must_use]
    pub fn activating(&self) -> bool {
        self.queue.activating()
    }

    /// Whether a transition toward inactive is in flight.
    #[must_use]
    pub fn deactivating(&self) -> bool {
        self.queue.deactivating()
    }

    /// Request a transition to active.
    ///
    /// Coalesces with an in-flight activation and supersedes an
    /// in-flight deactivation. Rejects with
    /// [`GraftError::AlreadyUnlinked`] once the node is torn down.
    pub fn activate(&self) -> TransitionHandle {
        self.request(true)
    }

    /// Request a transition to inactive. Mirror of [`Activity::activate`].
    pub fn deactivate(&self) -> TransitionHandle {
        self.request(false)
    }

    fn request(&self, target: bool) -> TransitionHandle {
        if self.node.is_unlinked() {
            return TransitionHandle::ready(Err(GraftError::AlreadyUnlinked));
        }
        let (before, after) = if target {
            (&self.hooks.before_active, &self.hooks.after_active)
        } else {
            (&self.hooks.before_inactive, &self.hooks.after_inactive)
        };
        let node = self.node.clone();
        self.queue.request(
            target,
            hook_call(before),
            move |committed| {
                let name = if committed { ACTIVATED_EVENT } else { DEACTIVATED_EVENT };
                node.emit(Event::new(name));
            },
            hook_call(after),
        )
    }

    /// Tear the activity down.
    ///
    /// If the activity is active or activating, deactivation is
    /// requested first, best effort: its outcome is awaited on a
    /// detached task and non-cancellation errors go to the global sink.
    /// The node itself unlinks immediately, so the `deactivated` event
    /// of that final transition is not observable.
    pub fn unlink(&self) {
        if !self.node.is_unlinked() && (self.queue.is_active() || self.queue.activating()) {
            let handle = self.deactivate();
            self.exec.spawn(async move {
                if let Err(err) = handle.await {
                    if !err.is_cancelled() {
                        report_error(&err);
                    }
                }
            });
        }
        self.node.unlink();
    }
}

impl std::fmt::Debug for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Activity")
            .field("node", &self.node.id())
            .field("active", &self.queue.is_active())
            .finish()
    }
}

/// Builder for [`Activity`]. All hooks are optional.
pub struct ActivityBuilder {
    node: Option<Node>,
    hooks: Hooks,
}

impl ActivityBuilder {
    /// Use an existing node instead of a fresh one.
    #[must_use]
    pub fn node(mut self, node: Node) -> Self {
        self.node = Some(node);
        self
    }

    /// Async hook run before committing to active; an error aborts the
    /// transition.
    #[must_use]
    pub fn on_before_active<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        self.hooks.before_active = Some(Rc::new(move || Box::pin(f())));
        self
    }

    /// Async hook run after committing to active; errors go to the
    /// global sink.
    #[must_use]
    pub fn on_after_active<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        self.hooks.after_active = Some(Rc::new(move || Box::pin(f())));
        self
    }

    /// Async hook run before committing to inactive; an error aborts the
    /// transition.
    #[must_use]
    pub fn on_before_inactive<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        self.hooks.before_inactive = Some(Rc::new(move || Box::pin(f())));
        self
    }

    /// Async hook run after committing to inactive; errors go to the
    /// global sink.
    #[must_use]
    pub fn on_after_inactive<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        self.hooks.after_inactive = Some(Rc::new(move || Box::pin(f())));
        self
    }

    /// Finish the build, binding the activity to `exec`.
    #[must_use]
    pub fn build(self, exec: &LocalExecutor) -> Activity {
        Activity {
            node: self.node.unwrap_or_default(),
            queue: ActivationQueue::new(exec),
            exec: exec.clone(),
            hooks: self.hooks,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
