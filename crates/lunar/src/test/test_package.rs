// Module loading: package.loaded caching, circular requires, searchers.

use std::cell::Cell;
use std::rc::Rc;

use super::{call_global, new_vm};
use crate::lua_value::{LuaFunction, LuaValue, TableRef};
use crate::lua_vm::LuaVm;

fn preload_table(vm: &LuaVm) -> TableRef {
    vm.registry_get("_PRELOAD").as_table().unwrap()
}

fn loaded_table(vm: &LuaVm) -> TableRef {
    vm.registry_get("_LOADED").as_table().unwrap()
}

fn preload(vm: &mut LuaVm, name: &str, loader: LuaValue) {
    preload_table(vm).borrow_mut().set_str(name, loader);
}

#[test]
fn test_require_through_preload() {
    let mut vm = new_vm();
    preload(
        &mut vm,
        "greeter",
        LuaValue::Function(LuaFunction::native("greeter_loader", |vm, args| {
            // loader(modname, data)
            assert_eq!(args[0].as_str(), Some("greeter"));
            assert_eq!(args[1].as_str(), Some(":preload:"));
            let exports = vm.new_table();
            if let LuaValue::Table(t) = &exports {
                t.borrow_mut().set_str("hello", LuaValue::Boolean(true));
            }
            Ok(exports)
        })),
    );

    let name = vm.new_string("greeter");
    let reply = call_global(&mut vm, "require", vec![name]).unwrap().into_values();
    assert!(reply[0].is_table());
    assert_eq!(reply[1].as_str(), Some(":preload:"));
}

#[test]
fn test_require_caches_result() {
    let mut vm = new_vm();
    let calls = Rc::new(Cell::new(0u32));
    let counter = calls.clone();
    preload(
        &mut vm,
        "once",
        LuaValue::Function(LuaFunction::native_closure("once_loader", move |vm, _args| {
            counter.set(counter.get() + 1);
            Ok(vm.new_table())
        })),
    );

    let name = vm.new_string("once");
    let first = call_global(&mut vm, "require", vec![name.clone()])
        .unwrap()
        .first_value();
    let second = call_global(&mut vm, "require", vec![name]).unwrap().first_value();
    assert_eq!(calls.get(), 1);
    // Cached hits return the stored value itself
    assert_eq!(first, second);
}

#[test]
fn test_module_returning_nothing_stores_true() {
    let mut vm = new_vm();
    preload(
        &mut vm,
        "silent",
        LuaValue::Function(LuaFunction::native("silent_loader", |_vm, _args| {
            Ok(LuaValue::Nil)
        })),
    );
    let name = vm.new_string("silent");
    let value = call_global(&mut vm, "require", vec![name.clone()])
        .unwrap()
        .first_value();
    assert_eq!(value, LuaValue::Boolean(true));
    let cached = loaded_table(&vm).borrow().get_str("silent");
    assert_eq!(cached, LuaValue::Boolean(true));
}

#[test]
fn test_circular_require_sees_in_progress_marker() {
    let mut vm = new_vm();

    preload(
        &mut vm,
        "alpha",
        LuaValue::Function(LuaFunction::native("alpha_loader", |vm, _args| {
            // alpha pulls in beta while still loading
            let require = vm.get_global("require");
            let beta = vm.new_string("beta");
            vm.call_value(require, vec![beta])?;
            let exports = vm.new_table();
            if let LuaValue::Table(t) = &exports {
                t.borrow_mut().set_str("who", LuaValue::Integer(1));
            }
            Ok(exports)
        })),
    );
    preload(
        &mut vm,
        "beta",
        LuaValue::Function(LuaFunction::native("beta_loader", |vm, _args| {
            // beta's require of alpha must not recurse: it sees the
            // "currently loading" marker instead
            let require = vm.get_global("require");
            let alpha = vm.new_string("alpha");
            let seen = vm.call_value(require, vec![alpha])?.first_value();
            vm.set_global("beta_saw", seen);
            Ok(vm.new_table())
        })),
    );

    let name = vm.new_string("alpha");
    let alpha = call_global(&mut vm, "require", vec![name.clone()])
        .unwrap()
        .first_value();
    assert!(alpha.is_table());
    assert_eq!(vm.get_global("beta_saw"), LuaValue::Boolean(false));

    // A later require returns the finished module, not the marker
    let again = call_global(&mut vm, "require", vec![name]).unwrap().first_value();
    assert_eq!(again, alpha);
}

#[test]
fn test_loader_error_clears_marker() {
    let mut vm = new_vm();
    let attempts = Rc::new(Cell::new(0u32));
    let counter = attempts.clone();
    preload(
        &mut vm,
        "flaky",
        LuaValue::Function(LuaFunction::native_closure("flaky_loader", move |vm, _args| {
            counter.set(counter.get() + 1);
            if counter.get() == 1 {
                Err(vm.error("first attempt fails"))
            } else {
                Ok(vm.new_table())
            }
        })),
    );

    let name = vm.new_string("flaky");
    let err = call_global(&mut vm, "require", vec![name.clone()]).unwrap_err();
    assert!(err.to_string().contains("first attempt fails"));
    // The in-progress marker is gone, so a retry runs the loader again
    assert!(loaded_table(&vm).borrow().get_str("flaky").is_nil());
    let value = call_global(&mut vm, "require", vec![name]).unwrap().first_value();
    assert!(value.is_table());
    assert_eq!(attempts.get(), 2);
}

#[test]
fn test_missing_module_accumulates_diagnostics() {
    let mut vm = new_vm();
    let name = vm.new_string("no.such.module");
    let err = call_global(&mut vm, "require", vec![name]).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("module 'no.such.module' not found"));
    assert!(message.contains("no field package.preload['no.such.module']"));
    assert!(message.contains("no file"));
}

#[test]
fn test_custom_searcher_supplies_loader() {
    let mut vm = new_vm();
    let package = vm.registry_get("_PACKAGE").as_table().unwrap();
    let searchers = package.borrow().get_str("searchers").as_table().unwrap();

    let searcher = LuaValue::Function(LuaFunction::native("custom_searcher", |vm, args| {
        if args[0].as_str() == Some("virtual.mod") {
            let loader = LuaValue::Function(LuaFunction::native("virtual_loader", |vm, args| {
                // data flows through from the searcher reply
                assert_eq!(args[1].as_str(), Some("virtual://mod"));
                Ok(vm.new_string("virtual exports"))
            }));
            let data = vm.new_string("virtual://mod");
            Ok(LuaValue::multi(vec![loader, data]))
        } else {
            let msg = vm.new_string("\n\tnot virtual");
            Ok(msg)
        }
    }));
    let len = searchers.borrow().border();
    searchers.borrow_mut().set_int(len + 1, searcher);

    let name = vm.new_string("virtual.mod");
    let reply = call_global(&mut vm, "require", vec![name]).unwrap().into_values();
    assert_eq!(reply[0].as_str(), Some("virtual exports"));
    assert_eq!(reply[1].as_str(), Some("virtual://mod"));
}

#[test]
fn test_searchpath_reports_all_candidates() {
    let mut vm = new_vm();
    let package = vm.get_global("package").as_table().unwrap();
    let searchpath = package.borrow().get_str("searchpath");
    let name = vm.new_string("definitely.absent");
    let path = vm.new_string("./?.lua;./lib/?.lua");
    let reply = vm
        .call_value(searchpath, vec![name, path])
        .unwrap()
        .into_values();
    assert_eq!(reply[0], LuaValue::Nil);
    let message = reply[1].as_str().unwrap().to_string();
    assert!(message.contains("definitely/absent.lua"));
    assert!(message.matches("no file").count() >= 2);
}

#[test]
fn test_package_loaded_lists_package_itself() {
    let vm = new_vm();
    let loaded = loaded_table(&vm);
    let package_entry = loaded.borrow().get_str("package");
    assert!(package_entry.is_table());
}
