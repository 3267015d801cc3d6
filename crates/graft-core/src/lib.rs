#![forbid(unsafe_code)]

//! Graft core: the reactive object-graph substrate.
//!
//! This crate provides the ownership tree and event machinery that the
//! rest of Graft is defined in terms of:
//!
//! - [`Node`]: a managed object in a single-parent ownership tree, with
//!   cascading teardown ([`Node::unlink`]) and ancestor lookup
//!   ([`Node::whence`]).
//! - The trap table ([`TrapKey`], [`TrapHandle`]): per-node callbacks
//!   fired synchronously on tracked writes — the shared substrate for
//!   listeners, observers, and bindings.
//! - The event bus ([`Event`], [`Node::emit`], [`Node::listen`],
//!   [`Node::intercept`]) with owner delegation and an async iterator
//!   view ([`EventStream`]).
//! - Property observation ([`Node::observe`]) and bindings
//!   ([`Binding`], [`TwoWayBinding`]).
//! - The error taxonomy ([`GraftError`]) and the replaceable global
//!   error sink ([`set_error_sink`]).
//!
//! # Concurrency model
//!
//! Single-threaded and cooperative. `emit` is fully synchronous and runs
//! every trap to completion before returning; suspension only happens at
//! the explicitly asynchronous boundaries (the event stream, and the
//! activation machinery in `graft-runtime`). Handles are `Rc`-based and
//! not `Send`.

pub mod bind;
pub mod error;
pub mod event;
pub mod node;
pub mod stream;
pub mod trap;
pub mod value;

mod observe;

pub use bind::{Binding, TwoWayBinding};
pub use error::{GraftError, Result, report_error, reset_error_sink, set_error_sink};
pub use event::{Event, Listener};
pub use node::{AttachOptions, Node, nodes_unlinked_total};
pub use stream::EventStream;
pub use trap::{Payload, TrapHandle, TrapKey};
pub use value::Value;
