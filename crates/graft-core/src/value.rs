#![forbid(unsafe_code)]

//! Dynamically-typed property values.
//!
//! The object graph stores property slots and event payloads as [`Value`]:
//! a cheaply-cloneable wrapper over `Rc<dyn Any>` with typed read access.
//! Slots are explicit, never reflective; writes flow through the trap
//! table, reads come back out via [`Value::downcast_ref`].

use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// A shared, dynamically-typed value.
///
/// Cloning is an `Rc` bump; the underlying payload is immutable.
#[derive(Clone)]
pub struct Value {
    raw: Rc<dyn Any>,
}

impl Value {
    /// Wrap an arbitrary payload.
    pub fn new<T: Any>(payload: T) -> Self {
        Self {
            raw: Rc::new(payload),
        }
    }

    /// Typed read access. `None` if the payload is a different type.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.raw.downcast_ref()
    }

    /// Whether the payload is of type `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.raw.is::<T>()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Value(..)")
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::new(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::new(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::new(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::new(v.to_string())
    }
}
