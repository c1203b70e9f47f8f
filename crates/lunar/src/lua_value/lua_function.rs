// Callable values
//
// Three callable shapes share one value type: bare native functions,
// boxed native closures (host callbacks capturing state), and
// interpreted closures built by the chunk loader. An interpreted closure
// is a parsed chunk handle plus an ordered upvalue list plus the
// environment it was created in; the executor that runs the chunk body
// lives outside this crate.

use std::cell::RefCell;
use std::rc::Rc;

use crate::lua_vm::{ChunkAst, EnvRef, LuaResult, LuaVm, Upvalue};

use super::lua_value::LuaValue;

pub type NativeFn = fn(&mut LuaVm, &[LuaValue]) -> LuaResult<LuaValue>;

pub struct NativeClosure {
    pub name: String,
    pub func: Box<dyn Fn(&mut LuaVm, &[LuaValue]) -> LuaResult<LuaValue>>,
}

/// An interpreted closure. Upvalue slots are fixed at construction;
/// mutation through any closure sharing a cell is visible to all of them.
pub struct LuaClosure {
    pub chunk: Rc<dyn ChunkAst>,
    upvalues: RefCell<Vec<Upvalue>>,
    pub env: EnvRef,
}

impl LuaClosure {
    pub fn new(chunk: Rc<dyn ChunkAst>, env: EnvRef, upvalues: Vec<Upvalue>) -> Self {
        Self {
            chunk,
            upvalues: RefCell::new(upvalues),
            env,
        }
    }

    /// Standard chunk layout: slot 0 is a reserved placeholder, slot 1
    /// shares the `_ENV` cell of the chunk environment. A chunk whose
    /// environment somehow lacks `_ENV` still gets a stable nil slot so
    /// upvalue introspection has something to write into.
    pub fn with_chunk_upvalues(chunk: Rc<dyn ChunkAst>, env: EnvRef) -> Self {
        let env_slot = env
            .slot("_ENV")
            .unwrap_or_else(|| Upvalue::new("_ENV", LuaValue::Nil));
        let upvalues = vec![Upvalue::new("(reserved)", LuaValue::Nil), env_slot];
        Self::new(chunk, env, upvalues)
    }

    pub fn upvalue_count(&self) -> usize {
        self.upvalues.borrow().len()
    }

    pub fn upvalue_name(&self, index: usize) -> Option<String> {
        self.upvalues
            .borrow()
            .get(index)
            .map(|u| u.name().to_string())
    }

    pub fn get_upvalue(&self, index: usize) -> Option<LuaValue> {
        self.upvalues.borrow().get(index).map(|u| u.get())
    }

    pub fn set_upvalue(&self, index: usize, value: LuaValue) -> bool {
        match self.upvalues.borrow().get(index) {
            Some(u) => {
                u.set(value);
                true
            }
            None => false,
        }
    }

    pub(crate) fn upvalues(&self) -> Vec<Upvalue> {
        self.upvalues.borrow().clone()
    }
}

#[derive(Clone)]
pub enum LuaFunction {
    Native { name: &'static str, func: NativeFn },
    NativeClosure(Rc<NativeClosure>),
    Closure(Rc<LuaClosure>),
}

impl LuaFunction {
    pub fn native(name: &'static str, func: NativeFn) -> Self {
        LuaFunction::Native { name, func }
    }

    pub fn native_closure(
        name: impl Into<String>,
        func: impl Fn(&mut LuaVm, &[LuaValue]) -> LuaResult<LuaValue> + 'static,
    ) -> Self {
        LuaFunction::NativeClosure(Rc::new(NativeClosure {
            name: name.into(),
            func: Box::new(func),
        }))
    }

    pub fn name(&self) -> &str {
        match self {
            LuaFunction::Native { name, .. } => name,
            LuaFunction::NativeClosure(nc) => &nc.name,
            LuaFunction::Closure(c) => c.chunk.chunk_name(),
        }
    }

    pub fn as_closure(&self) -> Option<&Rc<LuaClosure>> {
        match self {
            LuaFunction::Closure(c) => Some(c),
            _ => None,
        }
    }

    /// Stable address used for identity comparison and hashing.
    pub fn addr(&self) -> usize {
        match self {
            LuaFunction::Native { func, .. } => *func as usize,
            LuaFunction::NativeClosure(nc) => Rc::as_ptr(nc) as *const () as usize,
            LuaFunction::Closure(c) => Rc::as_ptr(c) as *const () as usize,
        }
    }
}

impl std::fmt::Debug for LuaFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "function(0x{:x})", self.addr())
    }
}

impl PartialEq for LuaFunction {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for LuaFunction {}
