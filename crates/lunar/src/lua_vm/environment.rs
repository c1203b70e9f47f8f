// Lexical environments
//
// A scope frame maps names to upvalue cells and links to its parent.
// The parent link is weak: a child scope does not extend the parent's
// lifetime; what closures capture are the cells, never the frames.
//
// An isolated environment stops every lookup at itself. It still sees
// whatever was declared directly in it, which is how a sandboxed chunk
// gets `_ENV` and `_G` without seeing the caller's locals.

use ahash::RandomState;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::lua_value::LuaValue;

use super::upvalue::Upvalue;

pub type EnvRef = Rc<Environment>;

pub struct Environment {
    vars: RefCell<HashMap<Rc<str>, Upvalue, RandomState>>,
    parent: Option<Weak<Environment>>,
    isolated: bool,
}

impl Environment {
    pub fn new() -> EnvRef {
        Rc::new(Self {
            vars: RefCell::new(HashMap::with_hasher(RandomState::new())),
            parent: None,
            isolated: false,
        })
    }

    pub fn child(parent: &EnvRef) -> EnvRef {
        Rc::new(Self {
            vars: RefCell::new(HashMap::with_hasher(RandomState::new())),
            parent: Some(Rc::downgrade(parent)),
            isolated: false,
        })
    }

    /// A parentless scope whose lookups never leave it.
    pub fn isolated() -> EnvRef {
        Rc::new(Self {
            vars: RefCell::new(HashMap::with_hasher(RandomState::new())),
            parent: None,
            isolated: true,
        })
    }

    pub fn is_isolated(&self) -> bool {
        self.isolated
    }

    fn parent_env(&self) -> Option<EnvRef> {
        if self.isolated {
            return None;
        }
        self.raw_parent()
    }

    /// Parent link regardless of isolation; liveness walks use this.
    pub(crate) fn raw_parent(&self) -> Option<EnvRef> {
        self.parent.as_ref().and_then(|w| w.upgrade())
    }

    /// Introduce a binding in this frame, shadowing any outer binding.
    pub fn declare(&self, name: &str, value: LuaValue) {
        self.vars
            .borrow_mut()
            .insert(Rc::from(name), Upvalue::new(name, value));
    }

    /// Introduce a binding backed by an existing cell (closure capture).
    pub fn declare_slot(&self, name: &str, slot: Upvalue) {
        self.vars.borrow_mut().insert(Rc::from(name), slot);
    }

    /// Update an existing binding found on the chain, or create one here.
    pub fn define(&self, name: &str, value: LuaValue) {
        if !self.set(name, value.clone()) {
            self.declare(name, value);
        }
    }

    pub fn get(&self, name: &str) -> Option<LuaValue> {
        if let Some(slot) = self.vars.borrow().get(name) {
            return Some(slot.get());
        }
        self.parent_env().and_then(|p| p.get(name))
    }

    /// Assign through the chain. Returns false when no binding exists.
    pub fn set(&self, name: &str, value: LuaValue) -> bool {
        if let Some(slot) = self.vars.borrow().get(name) {
            slot.set(value);
            return true;
        }
        match self.parent_env() {
            Some(p) => p.set(name, value),
            None => false,
        }
    }

    /// Resolve the cell behind a name, for capture at closure creation.
    pub fn slot(&self, name: &str) -> Option<Upvalue> {
        if let Some(slot) = self.vars.borrow().get(name) {
            return Some(slot.clone());
        }
        self.parent_env().and_then(|p| p.slot(name))
    }

    pub fn contains_local(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
    }

    pub(crate) fn for_each_slot(&self, mut f: impl FnMut(&str, &Upvalue)) {
        for (name, slot) in self.vars.borrow().iter() {
            f(name, slot);
        }
    }
}
