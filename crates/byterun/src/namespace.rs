//! Variable environments: shared, insertion-ordered name → value mappings.

use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;

use crate::value::Value;

/// A variable, attribute or parameter name.
pub type Identifier = Rc<str>;

/// A shared handle to a name → value mapping.
///
/// Cloning the handle aliases the same mapping: a callee frame writing through a clone of
/// its caller's globals is visible to the caller. Use [`Namespace::new`] for a fresh one.
#[derive(Debug, Clone, Default)]
pub struct Namespace(Rc<RefCell<IndexMap<Identifier, Value>>>);

impl Namespace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh module-level globals, seeded the way a `__main__` module starts out.
    #[must_use]
    pub fn module() -> Self {
        let ns = Self::new();
        ns.set("__name__", Value::from("__main__"));
        ns.set("__doc__", Value::None);
        ns.set("__package__", Value::None);
        ns
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.borrow().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<Identifier>, value: Value) {
        self.0.borrow_mut().insert(name.into(), value);
    }

    /// Removes `name`, keeping the order of the remaining entries.
    pub fn remove(&self, name: &str) -> Option<Value> {
        self.0.borrow_mut().shift_remove(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.borrow().contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Bound names in insertion order.
    #[must_use]
    pub fn names(&self) -> Vec<Identifier> {
        self.0.borrow().keys().cloned().collect()
    }

    /// Snapshot of every binding in insertion order.
    #[must_use]
    pub fn entries(&self) -> Vec<(Identifier, Value)> {
        self.0.borrow().iter().map(|(k, v)| (Rc::clone(k), v.clone())).collect()
    }

    /// Whether both handles refer to the same mapping.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl FromIterator<(Identifier, Value)> for Namespace {
    fn from_iter<I: IntoIterator<Item = (Identifier, Value)>>(iter: I) -> Self {
        Self(Rc::new(RefCell::new(iter.into_iter().collect())))
    }
}

/// The globals/locals pair a root frame runs against.
#[derive(Debug, Clone)]
pub struct Environment {
    globals: Namespace,
    locals: Namespace,
}

impl Environment {
    /// Module-level environment: `locals` is the same mapping as `globals`.
    #[must_use]
    pub fn new() -> Self {
        let globals = Namespace::module();
        Self {
            locals: globals.clone(),
            globals,
        }
    }

    /// Environment with caller-supplied mappings, e.g. to inspect them after a run.
    #[must_use]
    pub fn with_namespaces(globals: Namespace, locals: Namespace) -> Self {
        Self { globals, locals }
    }

    #[must_use]
    pub fn globals(&self) -> &Namespace {
        &self.globals
    }

    #[must_use]
    pub fn locals(&self) -> &Namespace {
        &self.locals
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}
