#![forbid(unsafe_code)]

//! Pull-based asynchronous view of a node's events.
//!
//! [`EventStream`] buffers events in an unbounded FIFO queue while no
//! consumer is awaiting; a pending [`next()`](EventStream::next) resolves
//! on the next emitted event. Iteration terminates once the node
//! unlinks, after delivering every event emitted strictly before the
//! unlink. `emit` never blocks: there is no producer backpressure, and a
//! long-lived, never-consumed stream grows with each emission. That is a
//! documented property, not a leak to fix. Dropping the stream removes
//! its trap, so emissions stop being buffered at that point.
//!
//! The future is hand-written against `std::task`; the runtime is
//! single-threaded and cooperative, so no executor integration beyond a
//! stored [`Waker`] is needed.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::event::Event;
use crate::TrapHandle;
use crate::node::Node;
use crate::trap::{Payload, TrapKey};

struct StreamShared {
    buffer: VecDeque<Event>,
    waker: Option<Waker>,
    done: bool,
}

impl StreamShared {
    fn wake(&mut self) {
        if let Some(w) = self.waker.take() {
            w.wake();
        }
    }
}

/// Asynchronous iterator over a node's emitted events.
///
/// Holds the buffering trap for as long as it lives; dropping the
/// stream deregisters it.
pub struct EventStream {
    shared: Rc<RefCell<StreamShared>>,
    trap: Option<TrapHandle>,
}

impl Node {
    /// Open an async iterator over this node's events.
    ///
    /// On an already-unlinked node the stream is immediately terminated.
    #[must_use]
    pub fn events(&self) -> EventStream {
        let shared = Rc::new(RefCell::new(StreamShared {
            buffer: VecDeque::new(),
            waker: None,
            done: self.is_unlinked(),
        }));
        let mut trap = None;
        if !self.is_unlinked() {
            let on_event = Rc::clone(&shared);
            let on_unlink = Rc::clone(&shared);
            // The node is live, so installation cannot fail.
            trap = self
                .install_trap(
                    TrapKey::Events,
                    move |_, payload| {
                        if let Payload::Event(event) = payload {
                            let mut s = on_event.borrow_mut();
                            s.buffer.push_back((*event).clone());
                            s.wake();
                        }
                        Ok(())
                    },
                    Some(Box::new(move || {
                        let mut s = on_unlink.borrow_mut();
                        s.done = true;
                        s.wake();
                    })),
                )
                .ok();
        }
        EventStream { shared, trap }
    }
}

impl EventStream {
    /// Resolve to the next event, or `None` once the source is unlinked
    /// and the buffer is drained.
    pub fn next(&mut self) -> NextEvent<'_> {
        NextEvent { stream: self }
    }

    /// Number of buffered, unconsumed events.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.shared.borrow().buffer.len()
    }

    /// Whether the source has unlinked. Buffered events may remain.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.shared.borrow().done
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(trap) = self.trap.take() {
            trap.remove();
        }
        self.shared.borrow_mut().done = true;
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.shared.borrow();
        f.debug_struct("EventStream")
            .field("buffered", &s.buffer.len())
            .field("done", &s.done)
            .finish()
    }
}

/// Future returned by [`EventStream::next`].
pub struct NextEvent<'a> {
    stream: &'a mut EventStream,
}

impl Future for NextEvent<'_> {
    type Output = Option<Event>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut s = self.get_mut().stream.shared.borrow_mut();
        if let Some(event) = s.buffer.pop_front() {
            return Poll::Ready(Some(event));
        }
        if s.done {
            return Poll::Ready(None);
        }
        s.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::task::Wake;

    struct NoopWaker;
    impl Wake for NoopWaker {
        fn wake(self: Arc<Self>) {}
    }

    fn poll_once<F: Future + Unpin>(fut: &mut F) -> Poll<F::Output> {
        let waker = Waker::from(Arc::new(NoopWaker));
        let mut cx = Context::from_waker(&waker);
        Pin::new(fut).poll(&mut cx)
    }

    #[test]
    fn buffered_events_delivered_in_order() {
        let n = Node::new();
        let mut stream = n.events();
        n.emit(Event::new("one"));
        n.emit(Event::new("two"));
        n.emit(Event::new("three"));
        assert_eq!(stream.buffered(), 3);

        for expected in ["one", "two", "three"] {
            let Poll::Ready(Some(ev)) = poll_once(&mut stream.next()) else {
                panic!("expected a buffered event");
            };
            assert_eq!(ev.name(), expected);
        }
        assert!(matches!(poll_once(&mut stream.next()), Poll::Pending));
    }

    #[test]
    fn pending_next_resolves_on_emit() {
        let n = Node::new();
        let mut stream = n.events();

        assert!(matches!(poll_once(&mut stream.next()), Poll::Pending));
        n.emit(Event::new("later"));
        let Poll::Ready(Some(ev)) = poll_once(&mut stream.next()) else {
            panic!("emit should have resolved the stream");
        };
        assert_eq!(ev.name(), "later");
    }

    #[test]
    fn terminates_after_unlink_with_buffer_drained_first() {
        let n = Node::new();
        let mut stream = n.events();
        n.emit(Event::new("before"));
        n.unlink();

        assert!(stream.is_terminated());
        let Poll::Ready(Some(ev)) = poll_once(&mut stream.next()) else {
            panic!("pre-unlink event must still be delivered");
        };
        assert_eq!(ev.name(), "before");
        assert!(matches!(poll_once(&mut stream.next()), Poll::Ready(None)));
    }

    #[test]
    fn stream_on_unlinked_node_is_terminated() {
        let n = Node::new();
        n.unlink();
        let mut stream = n.events();
        assert!(stream.is_terminated());
        assert!(matches!(poll_once(&mut stream.next()), Poll::Ready(None)));
    }

    #[test]
    fn dropped_stream_releases_its_trap() {
        let n = Node::new();
        let stream = n.events();
        let shared = Rc::downgrade(&stream.shared);
        drop(stream);

        // The trap (and with it the buffer) must be gone: nothing may
        // keep accumulating events for a consumer that no longer exists.
        n.emit(Event::new("after-drop"));
        assert!(
            shared.upgrade().is_none(),
            "dropping the stream must deregister its buffering trap"
        );
    }

    #[test]
    fn events_after_unlink_are_not_observable() {
        let n = Node::new();
        let mut stream = n.events();
        n.unlink();
        n.emit(Event::new("too-late"));
        assert!(matches!(poll_once(&mut stream.next()), Poll::Ready(None)));
    }
}
