// Upvalues
//
// A captured variable is a shared mutable cell: every closure that
// captures the same lexical variable holds a handle to the same cell,
// and the cell outlives any closure holding it. The name is kept for
// debug introspection.

use std::cell::RefCell;
use std::rc::Rc;

use crate::lua_value::LuaValue;

#[derive(Clone)]
pub struct Upvalue {
    name: Rc<str>,
    cell: Rc<RefCell<LuaValue>>,
}

impl Upvalue {
    pub fn new(name: &str, value: LuaValue) -> Self {
        Self {
            name: Rc::from(name),
            cell: Rc::new(RefCell::new(value)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self) -> LuaValue {
        self.cell.borrow().clone()
    }

    pub fn set(&self, value: LuaValue) {
        *self.cell.borrow_mut() = value;
    }

    /// True when both handles write through the same cell.
    pub fn shares_cell(&self, other: &Upvalue) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    pub(crate) fn cell_ptr(&self) -> usize {
        Rc::as_ptr(&self.cell) as usize
    }
}

impl std::fmt::Debug for Upvalue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "upvalue {} = {:?}", self.name, self.cell.borrow())
    }
}
