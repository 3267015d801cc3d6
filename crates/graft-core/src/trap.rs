#![forbid(unsafe_code)]

//! The per-node trap table.
//!
//! A trap is a callback registered against a tracked key: either a
//! property name or the reserved event channel. Every write to a tracked
//! key fires the matching traps synchronously, in installation order.
//! This single table is the substrate for `listen`, `observe`, bindings,
//! and the forwarding installed by `attach`.
//!
//! # Invariants
//!
//! 1. Traps fire in installation order, globally across keys for
//!    teardown (`on_unlink`) and per key for writes.
//! 2. Traps registered on an unlinked node are never invoked again;
//!    `unlink` drains the table exactly once.
//! 3. Removal via [`TrapHandle::remove`] is idempotent.

use std::rc::{Rc, Weak};

use crate::error::Result;
use crate::event::Event;
use crate::node::{Node, NodeInner};
use crate::value::Value;

/// A tracked key: a property slot or the reserved event channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TrapKey {
    /// A named property slot.
    Prop(String),
    /// The reserved event-delivery channel.
    Events,
}

/// The payload handed to a trap's write callback.
pub enum Payload<'a> {
    /// A property write carrying the new value.
    Value(&'a Value),
    /// An event delivered on the event channel.
    Event(&'a Event),
}

/// Write callback. Errors are routed to the global error sink by the
/// firing site, never propagated to the writer.
pub type WriteFn = Rc<dyn Fn(&Node, &Payload<'_>) -> Result<()>>;

pub(crate) type UnlinkFn = Box<dyn FnOnce()>;

pub(crate) struct TrapSlot {
    id: u64,
    key: TrapKey,
    on_write: WriteFn,
    on_unlink: Option<UnlinkFn>,
}

impl TrapSlot {
    pub(crate) fn take_unlink(&mut self) -> Option<UnlinkFn> {
        self.on_unlink.take()
    }
}

/// Flat, installation-ordered trap storage for one node.
///
/// Nodes carry few traps; a linear scan keyed by [`TrapKey`] keeps the
/// global installation order that teardown relies on.
#[derive(Default)]
pub(crate) struct TrapTable {
    slots: Vec<TrapSlot>,
}

impl TrapTable {
    pub(crate) fn install(
        &mut self,
        id: u64,
        key: TrapKey,
        on_write: WriteFn,
        on_unlink: Option<UnlinkFn>,
    ) {
        self.slots.push(TrapSlot {
            id,
            key,
            on_write,
            on_unlink,
        });
    }

    /// Remove a trap by id. Returns whether anything was removed.
    pub(crate) fn remove(&mut self, id: u64) -> bool {
        let before = self.slots.len();
        self.slots.retain(|s| s.id != id);
        before != self.slots.len()
    }

    /// Clone out the write callbacks for one key, preserving order.
    ///
    /// Callers invoke the callbacks after releasing the table borrow so
    /// handlers may freely install or remove traps re-entrantly.
    pub(crate) fn writers_for(&self, key: &TrapKey) -> Vec<WriteFn> {
        self.slots
            .iter()
            .filter(|s| s.key == *key)
            .map(|s| Rc::clone(&s.on_write))
            .collect()
    }

    /// Drain every slot, in installation order, for teardown.
    pub(crate) fn drain_all(&mut self) -> Vec<TrapSlot> {
        std::mem::take(&mut self.slots)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Handle to an installed trap. Removal is explicit and idempotent.
///
/// Unlike a scoped subscription guard, dropping the handle leaves the
/// trap in place: attach-installed forwarding and bindings must outlive
/// the call site that created them. `unlink` is the terminal cleanup.
#[derive(Clone)]
pub struct TrapHandle {
    node: Weak<NodeInner>,
    id: u64,
}

impl TrapHandle {
    pub(crate) fn new(node: Weak<NodeInner>, id: u64) -> Self {
        Self { node, id }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Remove the trap. Safe to call more than once, or after the node
    /// has been unlinked.
    pub fn remove(&self) {
        if let Some(inner) = self.node.upgrade() {
            inner.traps.borrow_mut().remove(self.id);
        }
    }
}

impl std::fmt::Debug for TrapHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrapHandle").field("id", &self.id).finish()
    }
}
