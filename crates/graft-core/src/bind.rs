#![forbid(unsafe_code)]

//! Property bindings built on the observation substrate.
//!
//! A [`Binding`] traps a source property and re-applies every written
//! value to a destination property, syncing the current value at
//! creation. Forwarding stops automatically when either endpoint
//! unlinks: the source side via trap teardown, the destination side via
//! a lazily-set stop flag. [`TwoWayBinding`] connects two properties in
//! both directions with a shared re-entrancy guard so updates cannot
//! cycle.

use std::cell::Cell;
use std::rc::Rc;

use crate::error::{GraftError, Result};
use crate::node::Node;
use crate::trap::TrapHandle;

/// One-way property binding: source writes flow to the destination.
pub struct Binding {
    source_trap: TrapHandle,
    stopped: Rc<Cell<bool>>,
}

impl Binding {
    /// Bind `source.source_prop` to `target.target_prop`.
    ///
    /// The destination is synced to the source's current value
    /// immediately. The source property must exist
    /// ([`GraftError::InvalidArgument`] otherwise); the destination slot
    /// is created on first write. Either endpoint being unlinked yields
    /// [`GraftError::AlreadyUnlinked`].
    pub fn one_way(
        source: &Node,
        source_prop: &str,
        target: &Node,
        target_prop: &str,
    ) -> Result<Self> {
        Self::one_way_guarded(
            source,
            source_prop,
            target,
            target_prop,
            Rc::new(Cell::new(false)),
        )
    }

    fn one_way_guarded(
        source: &Node,
        source_prop: &str,
        target: &Node,
        target_prop: &str,
        guard: Rc<Cell<bool>>,
    ) -> Result<Self> {
        if source.is_unlinked() || target.is_unlinked() {
            return Err(GraftError::AlreadyUnlinked);
        }

        // Initial sync before the trap goes in, so the trap never sees
        // its own priming write.
        if let Some(current) = source.get_prop(source_prop) {
            guard.set(true);
            let synced = target.set_prop(target_prop, current);
            guard.set(false);
            synced?;
        }

        let stopped = Rc::new(Cell::new(false));
        let stop_flag = Rc::clone(&stopped);
        let target_weak = Rc::downgrade(&target.inner);
        let target_prop = target_prop.to_string();
        let mut handles = source.observe(&[source_prop], move |_, _, value| {
            if stop_flag.get() || guard.get() {
                return Ok(());
            }
            let Some(target) = target_weak.upgrade().map(Node::from_inner) else {
                stop_flag.set(true);
                return Ok(());
            };
            if target.is_unlinked() {
                stop_flag.set(true);
                return Ok(());
            }
            guard.set(true);
            let applied = target.set_prop(&target_prop, value.clone());
            guard.set(false);
            applied
        })?;

        Ok(Self {
            // observe() returns exactly one handle per requested property.
            source_trap: handles.remove(0),
            stopped,
        })
    }

    /// Stop forwarding and remove the source trap. Idempotent.
    pub fn stop(&self) {
        self.stopped.set(true);
        self.source_trap.remove();
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("stopped", &self.stopped.get())
            .finish()
    }
}

/// Bidirectional property binding with cycle prevention.
///
/// Initially syncs `b` to `a`'s current value; afterwards writes on
/// either side propagate to the other. The shared guard keeps the
/// propagation from re-triggering itself.
pub struct TwoWayBinding {
    forward: Binding,
    backward: Binding,
}

impl TwoWayBinding {
    /// Bind `a.a_prop` and `b.b_prop` in both directions.
    pub fn new(a: &Node, a_prop: &str, b: &Node, b_prop: &str) -> Result<Self> {
        let guard = Rc::new(Cell::new(false));
        let forward = Binding::one_way_guarded(a, a_prop, b, b_prop, Rc::clone(&guard))?;
        let backward = Binding::one_way_guarded(b, b_prop, a, a_prop, guard)?;
        Ok(Self { forward, backward })
    }

    /// Disconnect both directions. Idempotent.
    pub fn stop(&self) {
        self.forward.stop();
        self.backward.stop();
    }
}

impl std::fmt::Debug for TwoWayBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoWayBinding").finish()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
