// Environments, closures and upvalue sharing.

use std::rc::Rc;

use super::{new_vm, ScriptChunk};
use crate::lua_value::{LuaClosure, LuaFunction, LuaValue};
use crate::lua_vm::{ControlSignal, Environment, LuaVm};

#[test]
fn test_two_closures_share_a_captured_cell() {
    let mut vm = new_vm();
    let scope = Environment::new();
    scope.declare("counter", LuaValue::Integer(0));
    let slot = scope.slot("counter").unwrap();

    // Both closures capture the same cell, the way two functions built
    // in one lexical scope capture one local.
    let writer_slot = slot.clone();
    let writer = LuaValue::Function(LuaFunction::native_closure("writer", move |_vm, args| {
        writer_slot.set(args[0].clone());
        Ok(LuaValue::Nil)
    }));
    let reader_slot = slot.clone();
    let reader = LuaValue::Function(LuaFunction::native_closure("reader", move |_vm, _args| {
        Ok(reader_slot.get())
    }));

    vm.call_value(writer, vec![LuaValue::Integer(42)]).unwrap();
    let seen = vm.call_value(reader, vec![]).unwrap();
    assert_eq!(seen, LuaValue::Integer(42));
    // The environment agrees: the cell is the variable
    assert_eq!(scope.get("counter"), Some(LuaValue::Integer(42)));
}

#[test]
fn test_chunk_closure_reads_env_upvalue() {
    let mut vm = new_vm();
    let chunk = ScriptChunk::new("=(read-upvalue)", |_vm, closure, _args| {
        Ok(ControlSignal::Return(
            closure.get_upvalue(1).unwrap_or(LuaValue::Nil),
        ))
    });
    let func = vm.build_chunk_closure(chunk, None);
    let result = vm.call_value(func, vec![]).unwrap();
    // Default environment: _ENV is the globals table
    assert_eq!(result, LuaValue::Table(vm.globals()));
}

#[test]
fn test_set_upvalue_is_visible_through_environment() {
    let vm = &mut new_vm();
    let env = Environment::new();
    env.declare("x", LuaValue::Integer(1));
    let chunk = ScriptChunk::new("=(x)", |_vm, closure, _args| {
        Ok(ControlSignal::Return(
            closure.get_upvalue(0).unwrap_or(LuaValue::Nil),
        ))
    });
    let closure = Rc::new(LuaClosure::new(
        chunk,
        env.clone(),
        vec![env.slot("x").unwrap()],
    ));
    closure.set_upvalue(0, LuaValue::Integer(77));
    assert_eq!(env.get("x"), Some(LuaValue::Integer(77)));

    let func = LuaValue::Function(LuaFunction::Closure(closure));
    let result = vm.call_value(func, vec![]).unwrap();
    assert_eq!(result, LuaValue::Integer(77));
}

#[test]
fn test_upvalue_introspection_names() {
    let vm = &mut new_vm();
    let chunk = ScriptChunk::new("=(names)", |_vm, _closure, _args| {
        Ok(ControlSignal::Done(LuaValue::Nil))
    });
    let func = vm.build_chunk_closure(chunk, None);
    let closure = func
        .as_function()
        .and_then(|f| f.as_closure())
        .cloned()
        .unwrap();
    assert_eq!(closure.upvalue_count(), 2);
    assert_eq!(closure.upvalue_name(0).as_deref(), Some("(reserved)"));
    assert_eq!(closure.upvalue_name(1).as_deref(), Some("_ENV"));
    assert!(closure.upvalue_name(2).is_none());
}

#[test]
fn test_environment_scope_restored_around_calls() {
    let mut vm = new_vm();
    let outer_env = vm.current_env();

    let chunk = ScriptChunk::new("=(scope-probe)", |vm, closure, _args| {
        // Inside the call the active environment is the closure's own
        assert!(Rc::ptr_eq(&vm.current_env(), &closure.env));
        Ok(ControlSignal::Done(LuaValue::Nil))
    });
    let func = vm.build_chunk_closure(chunk, None);
    vm.call_value(func, vec![]).unwrap();
    assert!(Rc::ptr_eq(&vm.current_env(), &outer_env));
}

#[test]
fn test_environment_restored_after_error() {
    let mut vm = new_vm();
    let outer_env = vm.current_env();
    let chunk = ScriptChunk::new("=(fails)", |vm, _closure, _args| {
        Err(vm.error("deliberate failure"))
    });
    let func = vm.build_chunk_closure(chunk, None);
    assert!(vm.call_value(func, vec![]).is_err());
    assert!(Rc::ptr_eq(&vm.current_env(), &outer_env));
}

#[test]
fn test_script_path_scope() {
    let mut vm = new_vm();
    assert!(vm.current_script_path().is_none());
    let inner = vm.with_script_path(Some("lib/mod.lua".into()), |vm: &mut LuaVm| {
        vm.current_script_path().cloned()
    });
    assert_eq!(inner, Some(std::path::PathBuf::from("lib/mod.lua")));
    assert!(vm.current_script_path().is_none());
}

#[test]
fn test_tail_call_completed_by_dispatch() {
    let mut vm = new_vm();
    vm.set_global(
        "finisher",
        LuaValue::Function(LuaFunction::native("finisher", |_vm, args| {
            Ok(LuaValue::Integer(args[0].as_integer().unwrap_or(0) + 1))
        })),
    );
    let chunk = ScriptChunk::new("=(tail)", |vm, _closure, _args| {
        Ok(ControlSignal::TailCall {
            func: vm.get_global("finisher"),
            args: vec![LuaValue::Integer(41)],
        })
    });
    let func = vm.build_chunk_closure(chunk, None);
    let result = vm.call_value(func, vec![]).unwrap();
    assert_eq!(result, LuaValue::Integer(42));
}
