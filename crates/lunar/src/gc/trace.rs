// Reachability tracing
//
// A mark pass over the value ownership graph: tables (entries plus
// metatable), closures (upvalue cells plus environment chain), multis
// and boxed numbers. Visited objects are keyed by allocation identity so
// cycles terminate. The product is a live-byte estimate and object
// counts; memory itself is reference-counted, so nothing is freed here.

use ahash::RandomState;
use std::collections::HashSet;

use crate::lua_value::{LuaFunction, LuaValue};
use crate::lua_vm::EnvRef;

pub struct Reachability {
    pub bytes: usize,
    pub objects: usize,
    visited: HashSet<usize, RandomState>,
}

// Size heuristics per object class; keep in sync with the allocation
// accounting in the VM constructors.
const SIZE_TABLE: usize = 64;
const SIZE_TABLE_ENTRY: usize = 40;
const SIZE_STRING_HEADER: usize = 40;
const SIZE_CLOSURE: usize = 64;
const SIZE_CELL: usize = 24;
const SIZE_BIGINT: usize = 32;
const SIZE_USERDATA: usize = 48;

impl Reachability {
    fn new() -> Self {
        Self {
            bytes: 0,
            objects: 0,
            visited: HashSet::with_hasher(RandomState::new()),
        }
    }

    fn enter(&mut self, ptr: usize) -> bool {
        if self.visited.insert(ptr) {
            self.objects += 1;
            true
        } else {
            false
        }
    }
}

pub fn trace_reachable(roots: &[LuaValue]) -> Reachability {
    let mut reach = Reachability::new();
    for root in roots {
        visit_value(root, &mut reach);
    }
    reach
}

fn visit_value(value: &LuaValue, reach: &mut Reachability) {
    match value {
        LuaValue::Nil | LuaValue::Boolean(_) | LuaValue::Integer(_) | LuaValue::Float(_) => {}
        LuaValue::BigInt(_) => {
            let ptr = value.heap_ptr().unwrap_or(0);
            if reach.enter(ptr) {
                reach.bytes += SIZE_BIGINT;
            }
        }
        LuaValue::Str(s) => {
            if reach.enter(s.data_ptr()) {
                reach.bytes += SIZE_STRING_HEADER + s.len();
            }
        }
        LuaValue::Table(t) => {
            let ptr = std::rc::Rc::as_ptr(t) as usize;
            if !reach.enter(ptr) {
                return;
            }
            // Clone entries out so the borrow does not span recursion; a
            // metatable may point back at this very table.
            let (entries, meta) = {
                let tb = t.borrow();
                let entries: Vec<(LuaValue, LuaValue)> = tb
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                (entries, tb.metatable())
            };
            reach.bytes += SIZE_TABLE + SIZE_TABLE_ENTRY * entries.len();
            if let Some(mt) = meta {
                visit_value(&LuaValue::Table(mt), reach);
            }
            for (k, v) in entries {
                visit_value(&k, reach);
                visit_value(&v, reach);
            }
        }
        LuaValue::Function(f) => match f {
            LuaFunction::Native { .. } => {}
            LuaFunction::NativeClosure(nc) => {
                let ptr = std::rc::Rc::as_ptr(nc) as *const () as usize;
                if reach.enter(ptr) {
                    reach.bytes += SIZE_CLOSURE;
                }
            }
            LuaFunction::Closure(c) => {
                let ptr = std::rc::Rc::as_ptr(c) as *const () as usize;
                if !reach.enter(ptr) {
                    return;
                }
                reach.bytes += SIZE_CLOSURE;
                for upvalue in c.upvalues() {
                    if reach.enter(upvalue.cell_ptr()) {
                        reach.bytes += SIZE_CELL;
                        visit_value(&upvalue.get(), reach);
                    }
                }
                visit_env(&c.env, reach);
            }
        },
        LuaValue::Userdata(u) => {
            let ptr = std::rc::Rc::as_ptr(u) as *const () as usize;
            if reach.enter(ptr) {
                reach.bytes += SIZE_USERDATA;
            }
        }
        LuaValue::Multi(vs) => {
            for v in vs.iter() {
                visit_value(v, reach);
            }
        }
    }
}

fn visit_env(env: &EnvRef, reach: &mut Reachability) {
    let mut current = Some(env.clone());
    while let Some(e) = current {
        let ptr = std::rc::Rc::as_ptr(&e) as usize;
        if !reach.enter(ptr) {
            return;
        }
        let mut values = Vec::new();
        e.for_each_slot(|_, slot| {
            if reach.enter(slot.cell_ptr()) {
                reach.bytes += SIZE_CELL;
                values.push(slot.get());
            }
        });
        for v in values {
            visit_value(&v, reach);
        }
        current = e.raw_parent();
    }
}
