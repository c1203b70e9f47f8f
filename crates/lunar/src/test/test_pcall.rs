// Protected calls: tuple shapes, raw error payloads, yieldability,
// handler behavior, assert and error semantics.

use super::{call_global, new_vm, ScriptChunk};
use crate::lua_value::{LuaFunction, LuaValue};
use crate::lua_vm::ControlSignal;

#[test]
fn test_pcall_success_tuple() {
    let mut vm = new_vm();
    let f = LuaValue::Function(LuaFunction::native("two_values", |_vm, args| {
        Ok(LuaValue::multi(vec![args[0].clone(), args[1].clone()]))
    }));
    let result = call_global(
        &mut vm,
        "pcall",
        vec![f, LuaValue::Integer(7), LuaValue::Integer(8)],
    )
    .unwrap()
    .into_values();
    assert_eq!(
        result,
        vec![
            LuaValue::Boolean(true),
            LuaValue::Integer(7),
            LuaValue::Integer(8)
        ]
    );
}

#[test]
fn test_pcall_failure_preserves_table_identity() {
    let mut vm = new_vm();
    let payload = vm.new_table();
    if let LuaValue::Table(t) = &payload {
        t.borrow_mut().set_str("code", LuaValue::Integer(42));
    }
    let thrown = payload.clone();
    let f = LuaValue::Function(LuaFunction::native_closure("thrower", move |vm, _args| {
        Err(vm.raise_error(thrown.clone()))
    }));
    let result = call_global(&mut vm, "pcall", vec![f]).unwrap().into_values();
    assert_eq!(result[0], LuaValue::Boolean(false));
    // The very table, not a stringified form
    assert_eq!(result[1], payload);
    let code = result[1].as_table().unwrap().borrow().get_str("code");
    assert_eq!(code, LuaValue::Integer(42));
}

#[test]
fn test_pcall_string_error_stays_exact_under_protection() {
    let mut vm = new_vm();
    let f = LuaValue::Function(LuaFunction::native("string_thrower", |vm, _args| {
        let msg = vm.new_string("plain message");
        Err(vm.raise_error(msg))
    }));
    let result = call_global(&mut vm, "pcall", vec![f]).unwrap().into_values();
    assert_eq!(result[0], LuaValue::Boolean(false));
    assert_eq!(result[1], vm.new_string("plain message"));
}

#[test]
fn test_error_with_no_arguments_throws_nil() {
    let mut vm = new_vm();
    let error_fn = vm.get_global("error");
    let f = LuaValue::Function(LuaFunction::native_closure("bare_error", move |vm, _args| {
        vm.call_value(error_fn.clone(), vec![])
    }));
    let result = call_global(&mut vm, "pcall", vec![f]).unwrap().into_values();
    assert_eq!(result[0], LuaValue::Boolean(false));
    assert_eq!(result.get(1).cloned().unwrap_or(LuaValue::Nil), LuaValue::Nil);
}

#[test]
fn test_nested_pcall_restores_yieldable() {
    let mut vm = new_vm();
    assert!(vm.yieldable());

    let probe = LuaValue::Function(LuaFunction::native("probe", |vm, _args| {
        // Inside protection, suspension is forbidden
        assert!(!vm.yieldable());
        // A nested protected region must restore *this* false state
        let inner = LuaValue::Function(LuaFunction::native("inner", |vm, _args| {
            assert!(!vm.yieldable());
            Ok(LuaValue::Nil)
        }));
        let (ok, _) = vm.protected_call(inner, vec![])?;
        assert!(ok);
        assert!(!vm.yieldable());
        Ok(LuaValue::Nil)
    }));
    let (ok, _) = vm.protected_call(probe, vec![]).unwrap();
    assert!(ok);
    assert!(vm.yieldable());
}

#[test]
fn test_yieldable_restored_after_failure() {
    let mut vm = new_vm();
    let f = LuaValue::Function(LuaFunction::native("fails", |vm, _args| {
        Err(vm.error("boom"))
    }));
    let (ok, _) = vm.protected_call(f, vec![]).unwrap();
    assert!(!ok);
    assert!(vm.yieldable());
    assert!(!vm.is_in_protected_call());
}

#[test]
fn test_xpcall_handler_transforms_payload() {
    let mut vm = new_vm();
    let f = LuaValue::Function(LuaFunction::native("fails", |vm, _args| {
        let msg = vm.new_string("original");
        Err(vm.raise_error(msg))
    }));
    let handler = LuaValue::Function(LuaFunction::native("handler", |vm, args| {
        let text = args[0].as_str().unwrap_or("?").to_string();
        Ok(vm.new_string(&format!("handled: {}", text)))
    }));
    let result = call_global(&mut vm, "xpcall", vec![f, handler])
        .unwrap()
        .into_values();
    assert_eq!(result[0], LuaValue::Boolean(false));
    assert_eq!(result[1], vm.new_string("handled: original"));
}

#[test]
fn test_xpcall_handler_error_collapses_to_fixed_shape() {
    let mut vm = new_vm();
    let f = LuaValue::Function(LuaFunction::native("fails", |vm, _args| {
        Err(vm.error("first failure"))
    }));
    let handler = LuaValue::Function(LuaFunction::native("bad_handler", |vm, _args| {
        Err(vm.error("handler failure"))
    }));
    let result = call_global(&mut vm, "xpcall", vec![f, handler])
        .unwrap()
        .into_values();
    assert_eq!(result[0], LuaValue::Boolean(false));
    assert_eq!(result[1], vm.new_string("error in error handling"));
}

#[test]
fn test_pcall_completes_tail_call_in_controller() {
    let mut vm = new_vm();
    vm.set_global(
        "target",
        LuaValue::Function(LuaFunction::native("target", |_vm, _args| {
            Ok(LuaValue::multi(vec![
                LuaValue::Integer(1),
                LuaValue::Integer(2),
            ]))
        })),
    );
    let chunk = ScriptChunk::new("=(tail-into-pcall)", |vm, _closure, _args| {
        Ok(ControlSignal::TailCall {
            func: vm.get_global("target"),
            args: vec![],
        })
    });
    let func = vm.build_chunk_closure(chunk, None);
    let result = call_global(&mut vm, "pcall", vec![func]).unwrap().into_values();
    // The tail call resolved into the success tuple, not an error
    assert_eq!(
        result,
        vec![
            LuaValue::Boolean(true),
            LuaValue::Integer(1),
            LuaValue::Integer(2)
        ]
    );
}

#[test]
fn test_assert_returns_all_arguments() {
    let mut vm = new_vm();
    let msg = vm.new_string("context");
    let result = call_global(
        &mut vm,
        "assert",
        vec![LuaValue::Integer(5), msg.clone(), LuaValue::Boolean(true)],
    )
    .unwrap()
    .into_values();
    assert_eq!(
        result,
        vec![LuaValue::Integer(5), msg, LuaValue::Boolean(true)]
    );
}

#[test]
fn test_assert_failure_messages() {
    let mut vm = new_vm();
    let err = call_global(&mut vm, "assert", vec![LuaValue::Nil]).unwrap_err();
    assert!(err.to_string().contains("assertion failed!"));

    let msg = vm.new_string("custom reason");
    let err = call_global(&mut vm, "assert", vec![LuaValue::Boolean(false), msg]).unwrap_err();
    assert_eq!(err.to_string(), "custom reason");

    // Only nil and false fail the assertion; zero passes
    assert!(call_global(&mut vm, "assert", vec![LuaValue::Integer(0)]).is_ok());
}

#[test]
fn test_assert_failure_with_table_message_throws_raw() {
    let mut vm = new_vm();
    let reason = vm.new_table();
    let assert_fn = vm.get_global("assert");
    let reason_for_call = reason.clone();
    let f = LuaValue::Function(LuaFunction::native_closure("asserter", move |vm, _args| {
        vm.call_value(
            assert_fn.clone(),
            vec![LuaValue::Boolean(false), reason_for_call.clone()],
        )
    }));
    let result = call_global(&mut vm, "pcall", vec![f]).unwrap().into_values();
    assert_eq!(result[0], LuaValue::Boolean(false));
    assert_eq!(result[1], reason);
}

#[test]
fn test_protection_depth_visible_to_natives() {
    let mut vm = new_vm();
    assert!(!vm.is_in_protected_call());
    let f = LuaValue::Function(LuaFunction::native("probe", |vm, _args| {
        assert!(vm.is_in_protected_call());
        Ok(LuaValue::Nil)
    }));
    let (ok, _) = vm.protected_call(f, vec![]).unwrap();
    assert!(ok);
    assert!(!vm.is_in_protected_call());
}
