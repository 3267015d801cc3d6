#![forbid(unsafe_code)]

//! Property observation over the trap table.
//!
//! `observe` is the single substrate used by explicit observers and by
//! the binding layer: a write trap per named property, fired after the
//! underlying slot has been updated.

use std::rc::Rc;

use crate::error::{GraftError, Result};
use crate::node::Node;
use crate::trap::{Payload, TrapHandle, TrapKey};
use crate::value::Value;

impl Node {
    /// Observe writes to the named properties.
    ///
    /// For each property, `f(node, property, value)` runs synchronously
    /// after every write, with the slot already updated. All properties
    /// must already exist; otherwise [`GraftError::InvalidArgument`] is
    /// returned and nothing is installed. An unlinked node yields
    /// [`GraftError::AlreadyUnlinked`].
    ///
    /// Returns one [`TrapHandle`] per property, in argument order.
    pub fn observe(
        &self,
        properties: &[&str],
        f: impl Fn(&Node, &str, &Value) -> Result<()> + 'static,
    ) -> Result<Vec<TrapHandle>> {
        if self.is_unlinked() {
            return Err(GraftError::AlreadyUnlinked);
        }
        for prop in properties {
            if !self.has_prop(prop) {
                return Err(GraftError::invalid_argument(format!(
                    "no such property: {prop}"
                )));
            }
        }

        let f = Rc::new(f);
        let mut handles = Vec::with_capacity(properties.len());
        for prop in properties {
            let name = (*prop).to_string();
            let f = Rc::clone(&f);
            let handle = self.install_trap(
                TrapKey::Prop(name.clone()),
                move |node, payload| match payload {
                    Payload::Value(value) => f(node, &name, value),
                    Payload::Event(_) => Ok(()),
                },
                None,
            )?;
            handles.push(handle);
        }
        Ok(handles)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
