#![forbid(unsafe_code)]

//! The ownership tree: nodes, attach/detach, cascading unlink.
//!
//! A [`Node`] is a cheaply-cloneable handle (`Rc` inside) to a managed
//! object in a single-parent ownership tree. Attaching establishes the
//! ownership relation that drives cascading teardown and event
//! delegation; unlinking is the terminal lifecycle transition and
//! cascades depth-first through every owned node.
//!
//! # Invariants
//!
//! 1. A node has at most one owner; re-attaching moves it (silent detach
//!    from the prior owner).
//! 2. No node may become its own ancestor: `attach` walks the owner
//!    chain and rejects cycles without mutating either node.
//! 3. `unlinked` is set exactly once and never reset. Unlinking cascades
//!    to owned nodes *before* the parent's own trap teardown runs.
//! 4. Trap `on_unlink` callbacks fire exactly once each, in installation
//!    order, after which the trap table is empty.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;

use crate::error::{GraftError, Result};
use crate::event::{Event, InterceptFn};
use crate::trap::{Payload, TrapHandle, TrapKey, TrapTable, UnlinkFn, WriteFn};
use crate::value::Value;

// ─── Id generation and diagnostics counters ─────────────────────────────────

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

fn next_node_id() -> u64 {
    NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Total number of nodes unlinked since process start.
static NODES_UNLINKED_TOTAL: AtomicU64 = AtomicU64::new(0);

/// Read the total unlink count (for diagnostics/telemetry).
#[must_use]
pub fn nodes_unlinked_total() -> u64 {
    NODES_UNLINKED_TOTAL.load(Ordering::Relaxed)
}

// ─── Inner state ─────────────────────────────────────────────────────────────

/// The ownership link stored on an attached child.
struct OwnerLink {
    owner: Weak<NodeInner>,
    /// Trap ids installed on the child by `attach`; removed on detach so
    /// a moved node stops forwarding to its old owner.
    installed: Vec<u64>,
}

pub(crate) struct NodeInner {
    id: u64,
    tag: Option<&'static str>,
    root: bool,
    unlinked: Cell<bool>,
    next_trap_id: Cell<u64>,
    owner: RefCell<Option<OwnerLink>>,
    owned: RefCell<Vec<Weak<NodeInner>>>,
    props: RefCell<AHashMap<String, Value>>,
    pub(crate) traps: RefCell<TrapTable>,
    pub(crate) interceptors: RefCell<AHashMap<String, InterceptFn>>,
}

// ─── Node ────────────────────────────────────────────────────────────────────

/// Handle to a managed object in the ownership tree.
///
/// Cloning shares the same underlying object; use [`Node::same`] for
/// identity comparison.
#[derive(Clone)]
pub struct Node {
    pub(crate) inner: Rc<NodeInner>,
}

impl Node {
    fn with_parts(tag: Option<&'static str>, root: bool) -> Self {
        Self {
            inner: Rc::new(NodeInner {
                id: next_node_id(),
                tag,
                root,
                unlinked: Cell::new(false),
                next_trap_id: Cell::new(1),
                owner: RefCell::new(None),
                owned: RefCell::new(Vec::new()),
                props: RefCell::new(AHashMap::new()),
                traps: RefCell::new(TrapTable::default()),
                interceptors: RefCell::new(AHashMap::new()),
            }),
        }
    }

    /// Create a detached, untagged node.
    #[must_use]
    pub fn new() -> Self {
        Self::with_parts(None, false)
    }

    /// Create a detached node carrying a tag for [`Node::whence`] lookup.
    #[must_use]
    pub fn tagged(tag: &'static str) -> Self {
        Self::with_parts(Some(tag), false)
    }

    /// Create the process-wide root node, exempt from needing an owner.
    #[must_use]
    pub fn root() -> Self {
        Self::with_parts(None, true)
    }

    pub(crate) fn from_inner(inner: Rc<NodeInner>) -> Self {
        Self { inner }
    }

    // ── Accessors ────────────────────────────────────────────────────

    /// Unique id of this node.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The tag given at construction, if any.
    #[must_use]
    pub fn tag(&self) -> Option<&'static str> {
        self.inner.tag
    }

    /// Whether this is the explicit root node.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.inner.root
    }

    /// Whether this node has been torn down.
    #[must_use]
    pub fn is_unlinked(&self) -> bool {
        self.inner.unlinked.get()
    }

    /// Identity comparison: do both handles refer to the same object?
    #[must_use]
    pub fn same(&self, other: &Node) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The current owner, if attached.
    #[must_use]
    pub fn owner(&self) -> Option<Node> {
        self.inner
            .owner
            .borrow()
            .as_ref()
            .and_then(|link| link.owner.upgrade())
            .map(Node::from_inner)
    }

    /// Whether `child` is currently attached directly under this node.
    #[must_use]
    pub fn owns(&self, child: &Node) -> bool {
        self.inner
            .owned
            .borrow()
            .iter()
            .any(|w| w.upgrade().is_some_and(|rc| Rc::ptr_eq(&rc, &child.inner)))
    }

    /// Whether `candidate` appears in this node's owner chain.
    #[must_use]
    pub fn has_ancestor(&self, candidate: &Node) -> bool {
        let mut cur = self.owner();
        while let Some(n) = cur {
            if n.same(candidate) {
                return true;
            }
            cur = n.owner();
        }
        false
    }

    /// Walk the owner chain to the first node tagged `tag`.
    ///
    /// Returns `None` once the walk reaches the root or runs out of
    /// owners.
    #[must_use]
    pub fn whence(&self, tag: &str) -> Option<Node> {
        let mut cur = self.owner();
        while let Some(n) = cur {
            if n.tag() == Some(tag) {
                return Some(n);
            }
            if n.is_root() {
                return None;
            }
            cur = n.owner();
        }
        None
    }

    // ── Attach / detach ──────────────────────────────────────────────

    /// Attach `child` under this node. See [`Node::attach_with`].
    pub fn attach(&self, child: &Node) -> Result<()> {
        self.attach_with(child, AttachOptions::new())
    }

    /// Attach `child` under this node, establishing single-parent
    /// ownership.
    ///
    /// If `child` already has an owner it is silently detached first
    /// (re-attaching moves it). Fails with [`GraftError::AlreadyUnlinked`]
    /// if either node is unlinked and [`GraftError::CycleDetected`] if
    /// the attachment would make `child` its own ancestor; on failure
    /// neither node is mutated.
    pub fn attach_with(&self, child: &Node, options: AttachOptions) -> Result<()> {
        if self.is_unlinked() || child.is_unlinked() {
            return Err(GraftError::AlreadyUnlinked);
        }
        if child.is_root() {
            return Err(GraftError::invalid_argument("the root node cannot be owned"));
        }
        if self.same(child) || self.has_ancestor(child) {
            return Err(GraftError::CycleDetected);
        }

        child.detach_from_owner();

        let AttachOptions {
            on_event,
            delegate,
            on_detach,
        } = options;

        let mut installed = Vec::new();
        if on_event.is_some() || delegate {
            let owner_weak = Rc::downgrade(&self.inner);
            let handle = child.install_trap_raw(
                TrapKey::Events,
                Rc::new(move |child_node: &Node, payload: &Payload<'_>| {
                    let Payload::Event(event) = payload else {
                        return Ok(());
                    };
                    if let Some(cb) = &on_event {
                        cb(child_node, event)?;
                    } else if delegate && event.propagates() {
                        if let Some(owner) = owner_weak.upgrade().map(Node::from_inner) {
                            owner.emit(event.delegated_via(&owner));
                        }
                    }
                    Ok(())
                }),
                None,
            );
            installed.push(handle.id());
        }
        if let Some(on_detach) = on_detach {
            // Fires from the child's trap teardown, exactly once.
            let handle =
                child.install_trap_raw(TrapKey::Events, Rc::new(|_, _| Ok(())), Some(on_detach));
            installed.push(handle.id());
        }

        *child.inner.owner.borrow_mut() = Some(OwnerLink {
            owner: Rc::downgrade(&self.inner),
            installed,
        });
        self.inner.owned.borrow_mut().push(Rc::downgrade(&child.inner));
        tracing::debug!(child = child.id(), owner = self.id(), "attach");
        Ok(())
    }

    /// Remove this node from its current owner, if any, including the
    /// traps that `attach` installed.
    fn detach_from_owner(&self) {
        let Some(link) = self.inner.owner.borrow_mut().take() else {
            return;
        };
        {
            let mut traps = self.inner.traps.borrow_mut();
            for id in &link.installed {
                traps.remove(*id);
            }
        }
        if let Some(owner) = link.owner.upgrade() {
            let me = Rc::downgrade(&self.inner);
            owner.owned.borrow_mut().retain(|w| !Weak::ptr_eq(w, &me));
        }
    }

    // ── Unlink ───────────────────────────────────────────────────────

    /// Tear this node down, cascading depth-first through every node it
    /// owns. Idempotent.
    pub fn unlink(&self) {
        if self.inner.unlinked.replace(true) {
            return;
        }
        NODES_UNLINKED_TOTAL.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(node = self.id(), "unlink");

        // Drop out of the owner's child list; the forwarding traps are
        // about to be drained anyway.
        if let Some(link) = self.inner.owner.borrow_mut().take() {
            if let Some(owner) = link.owner.upgrade() {
                let me = Rc::downgrade(&self.inner);
                owner.owned.borrow_mut().retain(|w| !Weak::ptr_eq(w, &me));
            }
        }

        // Owned nodes go first, before this node's own trap teardown.
        let children: Vec<Weak<NodeInner>> =
            self.inner.owned.borrow_mut().drain(..).collect();
        for weak in children {
            if let Some(rc) = weak.upgrade() {
                Node::from_inner(rc).unlink();
            }
        }

        // Fire each trap's teardown callback once, in installation order.
        let slots = self.inner.traps.borrow_mut().drain_all();
        for mut slot in slots {
            if let Some(f) = slot.take_unlink() {
                f();
            }
        }
        self.inner.interceptors.borrow_mut().clear();
    }

    // ── Properties ───────────────────────────────────────────────────

    /// Whether a property slot exists.
    #[must_use]
    pub fn has_prop(&self, name: &str) -> bool {
        self.inner.props.borrow().contains_key(name)
    }

    /// Read a property slot.
    #[must_use]
    pub fn get_prop(&self, name: &str) -> Option<Value> {
        self.inner.props.borrow().get(name).cloned()
    }

    /// Write a property slot (creating it if absent), then fire the
    /// property traps for that key synchronously.
    ///
    /// Trap errors are routed to the global error sink; the write itself
    /// only fails on an unlinked node.
    pub fn set_prop(&self, name: &str, value: Value) -> Result<()> {
        if self.is_unlinked() {
            return Err(GraftError::AlreadyUnlinked);
        }
        self.inner
            .props
            .borrow_mut()
            .insert(name.to_string(), value.clone());
        let key = TrapKey::Prop(name.to_string());
        let writers = self.inner.traps.borrow().writers_for(&key);
        for f in writers {
            if let Err(err) = f(self, &Payload::Value(&value)) {
                crate::error::report_error(&err);
            }
        }
        Ok(())
    }

    // ── Trap installation ────────────────────────────────────────────

    /// Install a trap on a tracked key.
    ///
    /// Fails with [`GraftError::AlreadyUnlinked`] on a torn-down node:
    /// its traps could never fire.
    pub fn install_trap(
        &self,
        key: TrapKey,
        on_write: impl Fn(&Node, &Payload<'_>) -> Result<()> + 'static,
        on_unlink: Option<UnlinkFn>,
    ) -> Result<TrapHandle> {
        if self.is_unlinked() {
            return Err(GraftError::AlreadyUnlinked);
        }
        Ok(self.install_trap_raw(key, Rc::new(on_write), on_unlink))
    }

    fn install_trap_raw(
        &self,
        key: TrapKey,
        on_write: WriteFn,
        on_unlink: Option<UnlinkFn>,
    ) -> TrapHandle {
        let id = self.inner.next_trap_id.get();
        self.inner.next_trap_id.set(id + 1);
        self.inner
            .traps
            .borrow_mut()
            .install(id, key, on_write, on_unlink);
        TrapHandle::new(Rc::downgrade(&self.inner), id)
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.inner.id)
            .field("tag", &self.inner.tag)
            .field("unlinked", &self.inner.unlinked.get())
            .field("root", &self.inner.root)
            .finish()
    }
}

// ─── AttachOptions ───────────────────────────────────────────────────────────

type OnEventFn = Rc<dyn Fn(&Node, &Event) -> Result<()>>;

/// Options for [`Node::attach_with`].
#[derive(Default)]
pub struct AttachOptions {
    on_event: Option<OnEventFn>,
    delegate: bool,
    on_detach: Option<UnlinkFn>,
}

impl AttachOptions {
    /// No forwarding, no delegation, no detach callback.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke `f(child, event)` for every event the child emits.
    #[must_use]
    pub fn on_event(mut self, f: impl Fn(&Node, &Event) -> Result<()> + 'static) -> Self {
        self.on_event = Some(Rc::new(f));
        self
    }

    /// Re-emit the child's events on the owner, tagged with the owner as
    /// `delegated_from`. Ignored when an `on_event` callback is set.
    #[must_use]
    pub fn delegate(mut self) -> Self {
        self.delegate = true;
        self
    }

    /// Fire once when the child becomes unlinked.
    #[must_use]
    pub fn on_detach(mut self, f: impl FnOnce() + 'static) -> Self {
        self.on_detach = Some(Box::new(f));
        self
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
