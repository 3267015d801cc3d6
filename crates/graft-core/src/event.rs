#![forbid(unsafe_code)]

//! The synchronous event bus: emit, listen, intercept, delegate.
//!
//! Emission is fully synchronous: `emit` runs every event-channel trap to
//! completion before returning. There is no queueing between `emit`
//! calls on one node; a handler that emits again on the same node
//! recurses. Handler errors are caught and routed to the global error
//! sink so they never crash the emitting call site.
//!
//! # Interception
//!
//! At most one interceptor is registered per event name per node (last
//! registration wins). The interceptor runs before ordinary traps and
//! receives the event plus a re-emit callback; the event only reaches
//! trap handlers if the interceptor invokes that callback.

use std::rc::{Rc, Weak};

use ahash::AHashMap;

use crate::error::{GraftError, Result};
use crate::node::{Node, NodeInner};
use crate::trap::{Payload, TrapHandle, TrapKey, UnlinkFn};
use crate::value::Value;

pub(crate) type InterceptFn = Rc<dyn Fn(Event, &dyn Fn(Event))>;

// ─── Event ───────────────────────────────────────────────────────────────────

/// An event travelling through the bus. Immutable after creation;
/// ownership is transient (consumed by handlers, never stored long-term
/// by the bus itself).
#[derive(Clone)]
pub struct Event {
    name: String,
    source: Option<Weak<NodeInner>>,
    data: AHashMap<String, Value>,
    no_propagation: bool,
    delegated_from: Option<Node>,
    inner: Option<Box<Event>>,
}

impl Event {
    /// Create a named event with no payload.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: None,
            data: AHashMap::new(),
            no_propagation: false,
            delegated_from: None,
            inner: None,
        }
    }

    /// Add a payload entry.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Mark the event as non-propagating: delegation will not re-emit it
    /// on the owner.
    #[must_use]
    pub fn no_propagation(mut self) -> Self {
        self.no_propagation = true;
        self
    }

    /// The event name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read a payload entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// The emitting node, if it is still alive.
    #[must_use]
    pub fn source(&self) -> Option<Node> {
        self.source.as_ref()?.upgrade().map(Node::from_inner)
    }

    /// The owner this event was delegated through, if any.
    #[must_use]
    pub fn delegated_from(&self) -> Option<&Node> {
        self.delegated_from.as_ref()
    }

    /// The wrapped original event, for delegated events.
    #[must_use]
    pub fn inner(&self) -> Option<&Event> {
        self.inner.as_deref()
    }

    /// Whether delegation may re-emit this event on the owner.
    #[must_use]
    pub fn propagates(&self) -> bool {
        !self.no_propagation
    }

    /// Wrap this event for re-emission on `owner`, keeping the original
    /// as `inner`.
    pub(crate) fn delegated_via(&self, owner: &Node) -> Event {
        Event {
            name: self.name.clone(),
            source: self.source.clone(),
            data: self.data.clone(),
            no_propagation: self.no_propagation,
            delegated_from: Some(owner.clone()),
            inner: Some(Box::new(self.clone())),
        }
    }

    pub(crate) fn set_source_if_unset(&mut self, node: &Node) {
        if self.source.is_none() {
            self.source = Some(Rc::downgrade(&node.inner));
        }
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("delegated", &self.delegated_from.is_some())
            .finish()
    }
}

// ─── Listener ────────────────────────────────────────────────────────────────

type HandlerFn = Box<dyn Fn(&Node, &Event) -> Result<()>>;
type InitFn = Box<dyn FnOnce(TrapHandle)>;

/// Object-shaped listener separating payload handling from lifecycle
/// callbacks.
#[derive(Default)]
pub struct Listener {
    handler: Option<HandlerFn>,
    unlinked: Option<UnlinkFn>,
    init: Option<InitFn>,
}

impl Listener {
    /// An empty listener; add callbacks with the builder methods.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle every event emitted by the node.
    #[must_use]
    pub fn on_event(mut self, f: impl Fn(&Node, &Event) -> Result<()> + 'static) -> Self {
        self.handler = Some(Box::new(f));
        self
    }

    /// Fires once when the node is torn down.
    #[must_use]
    pub fn on_unlinked(mut self, f: impl FnOnce() + 'static) -> Self {
        self.unlinked = Some(Box::new(f));
        self
    }

    /// Fires synchronously at install time, receiving the deregistration
    /// handle.
    #[must_use]
    pub fn on_init(mut self, f: impl FnOnce(TrapHandle) + 'static) -> Self {
        self.init = Some(Box::new(f));
        self
    }
}

// ─── Bus operations on Node ──────────────────────────────────────────────────

impl Node {
    /// Emit an event on this node.
    ///
    /// No-op on an unlinked node. The interceptor for the event name, if
    /// any, runs first; ordinary event traps fire in installation order
    /// only if it re-emits (or if no interceptor is registered).
    pub fn emit(&self, event: Event) {
        if self.is_unlinked() {
            return;
        }
        let mut event = event;
        event.set_source_if_unset(self);

        let interceptor = self.inner.interceptors.borrow().get(event.name()).cloned();
        match interceptor {
            Some(f) => {
                let me = self.clone();
                let re_emit = move |ev: Event| me.deliver(ev);
                f(event, &re_emit);
            }
            None => self.deliver(event),
        }
    }

    /// Emit an event if one is present. Absence is "nothing to emit",
    /// not an error.
    pub fn emit_opt(&self, event: Option<Event>) {
        if let Some(event) = event {
            self.emit(event);
        }
    }

    /// Fire the event-channel traps directly, bypassing interception.
    pub(crate) fn deliver(&self, event: Event) {
        if self.is_unlinked() {
            return;
        }
        let writers = self.inner.traps.borrow().writers_for(&TrapKey::Events);
        for f in writers {
            if let Err(err) = f(self, &Payload::Event(&event)) {
                crate::error::report_error(&err);
            }
        }
    }

    /// Install an event handler. Handler errors go to the global error
    /// sink.
    pub fn listen(
        &self,
        handler: impl Fn(&Node, &Event) -> Result<()> + 'static,
    ) -> Result<TrapHandle> {
        self.install_trap(
            TrapKey::Events,
            move |node, payload| match payload {
                Payload::Event(event) => handler(node, event),
                Payload::Value(_) => Ok(()),
            },
            None,
        )
    }

    /// Install an object-shaped [`Listener`].
    pub fn listen_with(&self, listener: Listener) -> Result<TrapHandle> {
        let Listener {
            handler,
            unlinked,
            init,
        } = listener;
        let handle = self.install_trap(
            TrapKey::Events,
            move |node, payload| match (&handler, payload) {
                (Some(h), Payload::Event(event)) => h(node, event),
                _ => Ok(()),
            },
            unlinked,
        )?;
        if let Some(init) = init {
            init(handle.clone());
        }
        Ok(handle)
    }

    /// Register the interceptor for `name`. At most one per event name;
    /// the last registration wins.
    pub fn intercept(
        &self,
        name: impl Into<String>,
        f: impl Fn(Event, &dyn Fn(Event)) + 'static,
    ) -> Result<()> {
        if self.is_unlinked() {
            return Err(GraftError::AlreadyUnlinked);
        }
        self.inner
            .interceptors
            .borrow_mut()
            .insert(name.into(), Rc::new(f));
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
