//! Hierarchical variable scope chain (spec.md §4.4).
//!
//! A [`Scope`] is a cheap-clone handle (`Rc<RefCell<..>>`) onto a node in a
//! parent-linked chain, the same shape as the teacher's namespace chain:
//! child scopes share nothing but a read/write path to their ancestors.
//! Three write modes give callers control over where a binding lands:
//! `set` walks the chain looking for an existing binding to mutate (and
//! only creates locally if none exists), `set_local` always creates/updates
//! in the current frame, and `set_global` always targets the root.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::value::Value;

struct ScopeInner {
    locals: IndexMap<String, Value>,
    parent: Option<Scope>,
}

/// A node in the variable scope chain. Clones share the same underlying
/// frame; call [`Scope::create_child`] to introduce a new frame.
#[derive(Clone)]
pub struct Scope(Rc<RefCell<ScopeInner>>);

impl Scope {
    /// Creates a new root scope with no parent.
    #[must_use]
    pub fn root() -> Self {
        Self(Rc::new(RefCell::new(ScopeInner { locals: IndexMap::new(), parent: None })))
    }

    /// Creates a child frame whose lookups fall through to `self` on miss.
    /// Used for `call` (flow isolation), `for_each` iteration bodies, and
    /// `repeat` bodies (spec.md §4.4's "fresh child scope per invocation").
    #[must_use]
    pub fn create_child(&self) -> Self {
        Self(Rc::new(RefCell::new(ScopeInner { locals: IndexMap::new(), parent: Some(self.clone()) })))
    }

    /// Walks the chain from `self` toward the root, returning the first
    /// binding found. Unbound names read as `null` (spec.md §4.4), never an
    /// error — the VM's `missing_variable` classification happens at the use
    /// site, not at lookup time.
    #[must_use]
    pub fn get(&self, name: &str) -> Value {
        let inner = self.0.borrow();
        if let Some(value) = inner.locals.get(name) {
            return value.clone();
        }
        match &inner.parent {
            Some(parent) => parent.get(name),
            None => Value::Null,
        }
    }

    #[must_use]
    pub fn is_bound(&self, name: &str) -> bool {
        let inner = self.0.borrow();
        if inner.locals.contains_key(name) {
            return true;
        }
        match &inner.parent {
            Some(parent) => parent.is_bound(name),
            None => false,
        }
    }

    /// Mutates an existing binding anywhere up the chain; if none exists,
    /// creates it in the current (local) frame. This is the default write
    /// mode for the `set` action (spec.md §4.4).
    pub fn set(&self, name: &str, value: Value) {
        if self.set_existing(name, &value) {
            return;
        }
        self.0.borrow_mut().locals.insert(name.to_owned(), value);
    }

    fn set_existing(&self, name: &str, value: &Value) -> bool {
        let mut inner = self.0.borrow_mut();
        if let Some(slot) = inner.locals.get_mut(name) {
            *slot = value.clone();
            return true;
        }
        match &inner.parent {
            Some(parent) => parent.set_existing(name, value),
            None => false,
        }
    }

    /// Always binds in the current frame, shadowing any ancestor binding of
    /// the same name (spec.md §4.4's `set_local` mode).
    pub fn set_local(&self, name: &str, value: Value) {
        self.0.borrow_mut().locals.insert(name.to_owned(), value);
    }

    /// Always binds at the root of the chain (spec.md §4.4's `set_global`
    /// mode), the one sanctioned way to escape a `call`'s child-scope
    /// isolation.
    pub fn set_global(&self, name: &str, value: Value) {
        let mut current = self.clone();
        loop {
            let parent = current.0.borrow().parent.clone();
            match parent {
                Some(next) => current = next,
                None => break,
            }
        }
        current.0.borrow_mut().locals.insert(name.to_owned(), value);
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_reads_through_to_parent() {
        let root = Scope::root();
        root.set_local("x", Value::Int(1));
        let child = root.create_child();
        assert_eq!(child.get("x").type_name(), "int");
    }

    #[test]
    fn set_mutates_existing_ancestor_binding() {
        let root = Scope::root();
        root.set_local("x", Value::Int(1));
        let child = root.create_child();
        child.set("x", Value::Int(2));
        assert!(matches!(root.get("x"), Value::Int(2)));
    }

    #[test]
    fn set_creates_locally_when_unbound_anywhere() {
        let root = Scope::root();
        let child = root.create_child();
        child.set("y", Value::Int(3));
        assert!(matches!(root.get("y"), Value::Null));
        assert!(matches!(child.get("y"), Value::Int(3)));
    }

    #[test]
    fn set_local_shadows_without_touching_parent() {
        let root = Scope::root();
        root.set_local("x", Value::Int(1));
        let child = root.create_child();
        child.set_local("x", Value::Int(9));
        assert!(matches!(root.get("x"), Value::Int(1)));
        assert!(matches!(child.get("x"), Value::Int(9)));
    }

    #[test]
    fn set_global_escapes_to_root() {
        let root = Scope::root();
        let child = root.create_child().create_child();
        child.set_global("g", Value::Int(7));
        assert!(matches!(root.get("g"), Value::Int(7)));
    }

    #[test]
    fn unbound_name_reads_as_null() {
        let root = Scope::root();
        assert!(root.get("nope").is_null());
    }
}
