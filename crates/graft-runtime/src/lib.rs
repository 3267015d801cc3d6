#![forbid(unsafe_code)]

//! Graft runtime: the activation layer on top of `graft-core`.
//!
//! Everything here is single-threaded and cooperative:
//!
//! - [`LocalExecutor`]: a minimal task executor driving the async
//!   lifecycle hooks. No external runtime; tasks are polled on the
//!   caller's thread.
//! - [`ActivationQueue`]: serialized activate/deactivate transitions
//!   with coalescing and supersession.
//! - [`Activity`]: a [`graft_core::Node`] paired with an activation
//!   queue and async lifecycle hooks, emitting `activated` /
//!   `deactivated` events on commit.
//! - [`TaskQueue`]: deferred closures gated on an activity's lifecycle.

pub mod activation;
pub mod activity;
pub mod exec;
pub mod task_queue;

pub use activation::{ActivationQueue, HookFuture, TransitionHandle, transitions_cancelled_total};
pub use activity::{ACTIVATED_EVENT, Activity, ActivityBuilder, DEACTIVATED_EVENT};
pub use exec::LocalExecutor;
pub use task_queue::TaskQueue;
