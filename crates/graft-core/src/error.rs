#![forbid(unsafe_code)]

//! Error taxonomy and the global error sink.
//!
//! Errors fall into two propagation classes:
//!
//! - **Synchronous**: misuse of `attach`/`observe`/`intercept` and
//!   before-hook failures propagate as `Err` to the caller of the
//!   triggering operation.
//! - **Sunk**: listener and after-hook errors are caught and routed to a
//!   single process-wide error sink. They must never crash the emitting
//!   call site.
//!
//! The sink is replaceable at runtime via [`set_error_sink`] and defaults
//! to a `tracing::error!` logger.

use std::sync::{Arc, LazyLock};

use arc_swap::ArcSwap;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GraftError>;

/// Errors raised by the object-graph runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraftError {
    /// An operation received an argument it cannot act on (e.g. observing
    /// a property that does not exist).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation targeted a node that has already been torn down.
    #[error("object is already unlinked")]
    AlreadyUnlinked,

    /// An activation transition was superseded by a newer request before
    /// it committed. Expected under rapid activate/deactivate flips;
    /// terminal but not a bug.
    #[error("transition superseded by a newer request")]
    Cancelled,

    /// Attaching would have made a node its own ancestor.
    #[error("attaching would create an ownership cycle")]
    CycleDetected,

    /// Application-defined failure, carried through handler plumbing.
    #[error("{0}")]
    Other(String),
}

impl GraftError {
    /// Build an [`InvalidArgument`](Self::InvalidArgument) error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Build an [`Other`](Self::Other) error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Whether this is the expected supersession outcome.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

// ─── Global error sink ───────────────────────────────────────────────────────

type SinkFn = dyn Fn(&GraftError) + Send + Sync;

struct Sink(Box<SinkFn>);

fn default_sink() -> Sink {
    Sink(Box::new(|err| {
        tracing::error!(error = %err, "unhandled runtime error");
    }))
}

static ERROR_SINK: LazyLock<ArcSwap<Sink>> =
    LazyLock::new(|| ArcSwap::from_pointee(default_sink()));

/// Replace the global error sink. The previous sink is discarded.
pub fn set_error_sink(sink: impl Fn(&GraftError) + Send + Sync + 'static) {
    ERROR_SINK.store(Arc::new(Sink(Box::new(sink))));
}

/// Restore the default `tracing`-backed sink.
pub fn reset_error_sink() {
    ERROR_SINK.store(Arc::new(default_sink()));
}

/// Route an error to the global sink.
pub fn report_error(err: &GraftError) {
    (ERROR_SINK.load().0)(err);
}
