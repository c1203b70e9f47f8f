// Basic library (_G global functions)
// Implements: type, assert, error, tonumber, tostring, select, ipairs,
// pairs, next, pcall, xpcall, getmetatable, setmetatable, rawget, rawset,
// rawlen, rawequal, collectgarbage, load, loadfile, dofile

use num_bigint::BigInt;
use std::path::Path;

use crate::lib_registry::{get_arg, require_arg, LibraryEntry, LibraryModule};
use crate::lua_value::{LuaFunction, LuaValue};
use crate::lua_vm::metamethod;
use crate::gc::GcMode;
use crate::lua_vm::{ChunkMode, ChunkSource, LoadOptions, LuaResult, LuaVm};

pub fn create_basic_lib() -> LibraryModule {
    let mut module = crate::lib_module!("_G", {
        "type" => lua_type,
        "assert" => lua_assert,
        "error" => lua_error,
        "tonumber" => lua_tonumber,
        "tostring" => lua_tostring,
        "select" => lua_select,
        "ipairs" => lua_ipairs,
        "pairs" => lua_pairs,
        "next" => lua_next,
        "pcall" => lua_pcall,
        "xpcall" => lua_xpcall,
        "getmetatable" => lua_getmetatable,
        "setmetatable" => lua_setmetatable,
        "rawget" => lua_rawget,
        "rawset" => lua_rawset,
        "rawlen" => lua_rawlen,
        "rawequal" => lua_rawequal,
        "collectgarbage" => lua_collectgarbage,
        "load" => lua_load,
        "loadfile" => lua_loadfile,
        "dofile" => lua_dofile,
    });
    module
        .entries
        .push(("_VERSION", LibraryEntry::Value(|vm| vm.new_string("Lua 5.4"))));
    module
}

/// type(v) - Return the type of a value as a string
fn lua_type(vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let value = require_arg(args, 1, "type")?;
    Ok(vm.new_string(value.type_name()))
}

/// assert(v [, message, ...]) - Raise an error if v is false or nil;
/// on success all arguments come back unchanged
fn lua_assert(vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    vm.check_assertion(args)
}

/// error([message [, level]]) - Raise an error; with no arguments the
/// thrown value is nil
fn lua_error(vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let value = get_arg(args, 1).cloned().unwrap_or(LuaValue::Nil);
    Err(vm.raise_error(value))
}

/// tonumber(e [, base]) - Convert to a number, nil when not convertible
fn lua_tonumber(vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let value = require_arg(args, 1, "tonumber")?;
    let base = get_arg(args, 2).and_then(|v| v.as_integer());

    if let Some(base) = base {
        if !(2..=36).contains(&base) {
            return Err(vm.error("bad argument #2 to 'tonumber' (base out of range)"));
        }
        let Some(s) = value.as_str() else {
            return Err(vm.error("bad argument #1 to 'tonumber' (string expected)"));
        };
        let s = s.trim();
        if let Ok(i) = i64::from_str_radix(s, base as u32) {
            return Ok(LuaValue::Integer(i));
        }
        if let Some(b) = BigInt::parse_bytes(s.as_bytes(), base as u32) {
            return Ok(LuaValue::big_int(b));
        }
        return Ok(LuaValue::Nil);
    }

    match value {
        LuaValue::Integer(_) | LuaValue::Float(_) | LuaValue::BigInt(_) => Ok(value.clone()),
        LuaValue::Str(s) => {
            let Some(text) = s.as_str() else {
                return Ok(LuaValue::Nil);
            };
            Ok(parse_number(text.trim()))
        }
        _ => Ok(LuaValue::Nil),
    }
}

/// Decimal/hex parsing: integers first (promoting to a big integer on
/// overflow), then floats.
fn parse_number(s: &str) -> LuaValue {
    if s.is_empty() {
        return LuaValue::Nil;
    }
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        return match u64::from_str_radix(hex, 16) {
            Ok(u) => {
                let i = u as i64;
                LuaValue::Integer(if negative { i.wrapping_neg() } else { i })
            }
            Err(_) => LuaValue::Nil,
        };
    }
    if let Ok(i) = s.parse::<i64>() {
        return LuaValue::Integer(i);
    }
    if digits.bytes().all(|b| b.is_ascii_digit()) && !digits.is_empty() {
        if let Some(b) = BigInt::parse_bytes(s.as_bytes(), 10) {
            return LuaValue::big_int(b);
        }
    }
    if let Ok(f) = s.parse::<f64>() {
        return LuaValue::Float(f);
    }
    LuaValue::Nil
}

/// tostring(v) - Convert to a string, honoring __tostring/__name
fn lua_tostring(vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let value = require_arg(args, 1, "tostring")?.clone();

    // Fast paths for values that cannot carry metamethods
    if let LuaValue::Str(_) = &value {
        return Ok(value);
    }
    if let LuaValue::Integer(i) = &value {
        let mut buffer = itoa::Buffer::new();
        return Ok(vm.new_string(buffer.format(*i)));
    }

    let text = vm.value_to_string(&value)?;
    Ok(vm.new_string(&text))
}

/// select(index, ...) - Return the arguments after index, or the
/// argument count for "#"
fn lua_select(vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let index = require_arg(args, 1, "select")?;
    let rest = &args[1..];

    if index.as_str() == Some("#") {
        return Ok(LuaValue::Integer(rest.len() as i64));
    }
    let Some(i) = index.as_integer() else {
        return Err(vm.error("bad argument #1 to 'select' (number expected)"));
    };
    if i == 0 {
        return Err(vm.error("bad argument #1 to 'select' (index out of range)"));
    }
    let start = if i > 0 {
        (i - 1) as usize
    } else {
        let back = (-i) as usize;
        if back > rest.len() {
            return Err(vm.error("bad argument #1 to 'select' (index out of range)"));
        }
        rest.len() - back
    };
    if start >= rest.len() {
        return Ok(LuaValue::multi(Vec::new()));
    }
    Ok(LuaValue::multi(rest[start..].to_vec()))
}

/// ipairs(t) - Iterate the array part: iterator, table, 0
fn lua_ipairs(vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let table = require_arg(args, 1, "ipairs")?.clone();
    Ok(LuaValue::Multi(std::rc::Rc::new(vec![
        LuaValue::Function(LuaFunction::native("ipairs_iterator", ipairs_next)),
        table,
        LuaValue::Integer(0),
    ])))
}

fn ipairs_next(vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let table = require_arg(args, 1, "ipairs")?.clone();
    let index = get_arg(args, 2).and_then(|v| v.as_integer()).unwrap_or(0);
    let next_index = index + 1;
    // Indexing goes through dispatch so __index proxies iterate too
    let value = metamethod::index(vm, &table, &LuaValue::Integer(next_index))?;
    if value.is_nil() {
        return Ok(LuaValue::Nil);
    }
    Ok(LuaValue::Multi(std::rc::Rc::new(vec![
        LuaValue::Integer(next_index),
        value,
    ])))
}

/// pairs(t) - Full iteration: __pairs hook when present, else raw next
fn lua_pairs(vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let table = require_arg(args, 1, "pairs")?.clone();
    if let Some(handler) = metamethod::pairs_hook(&table) {
        return vm.call_value(handler, vec![table]);
    }
    if !table.is_table() {
        return Err(vm.type_error(format!(
            "bad argument #1 to 'pairs' (table expected, got {})",
            table.type_name()
        )));
    }
    Ok(LuaValue::Multi(std::rc::Rc::new(vec![
        LuaValue::Function(LuaFunction::native("next", lua_next)),
        table,
        LuaValue::Nil,
    ])))
}

/// next(table [, index]) - Stateless iteration step
fn lua_next(vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let table = require_arg(args, 1, "next")?;
    let key = get_arg(args, 2).cloned().unwrap_or(LuaValue::Nil);
    let Some(t) = table.as_table() else {
        return Err(vm.type_error(format!(
            "bad argument #1 to 'next' (table expected, got {})",
            table.type_name()
        )));
    };
    let step = t.borrow().next(&key)?;
    match step {
        Some((k, v)) => Ok(LuaValue::Multi(std::rc::Rc::new(vec![k, v]))),
        None => Ok(LuaValue::Nil),
    }
}

/// pcall(f [, arg1, ...]) - Protected call: (true, results...) or
/// (false, error payload)
fn lua_pcall(vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let func = require_arg(args, 1, "pcall")?.clone();
    let call_args = flatten_args(&args[1..]);
    let (ok, payload) = vm.protected_call(func, call_args)?;
    let mut out = vec![LuaValue::Boolean(ok)];
    payload.append_to(&mut out);
    Ok(LuaValue::Multi(std::rc::Rc::new(out)))
}

/// xpcall(f, msgh [, arg1, ...]) - Protected call with a message handler
fn lua_xpcall(vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let func = require_arg(args, 1, "xpcall")?.clone();
    let handler = require_arg(args, 2, "xpcall")?.clone();
    let call_args = flatten_args(&args[2..]);
    let (ok, payload) = vm.protected_call_with_handler(func, call_args, handler)?;
    let mut out = vec![LuaValue::Boolean(ok)];
    payload.append_to(&mut out);
    Ok(LuaValue::Multi(std::rc::Rc::new(out)))
}

fn flatten_args(args: &[LuaValue]) -> Vec<LuaValue> {
    let mut out = Vec::with_capacity(args.len());
    for a in args {
        a.append_to(&mut out);
    }
    out
}

/// getmetatable(object) - The __metatable field when present, else the
/// metatable itself
fn lua_getmetatable(_vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let value = require_arg(args, 1, "getmetatable")?;
    Ok(metamethod::get_metatable(value))
}

/// setmetatable(table, metatable) - Install or clear a metatable
fn lua_setmetatable(_vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let table = require_arg(args, 1, "setmetatable")?;
    let meta = require_arg(args, 2, "setmetatable")?;
    metamethod::set_metatable(table, meta)
}

/// rawget(table, index) - Read without metamethods
fn lua_rawget(_vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let table = require_arg(args, 1, "rawget")?;
    let key = require_arg(args, 2, "rawget")?;
    metamethod::raw_get(table, key)
}

/// rawset(table, index, value) - Write without metamethods
fn lua_rawset(_vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let table = require_arg(args, 1, "rawset")?;
    let key = require_arg(args, 2, "rawset")?.clone();
    let value = require_arg(args, 3, "rawset")?.clone();
    metamethod::raw_set(table, key, value)?;
    Ok(table.clone())
}

/// rawlen(v) - Border length without __len
fn lua_rawlen(_vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let value = require_arg(args, 1, "rawlen")?;
    metamethod::raw_len(value).map(LuaValue::Integer)
}

/// rawequal(v1, v2) - Equality without metamethods
fn lua_rawequal(_vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let a = require_arg(args, 1, "rawequal")?;
    let b = require_arg(args, 2, "rawequal")?;
    Ok(LuaValue::Boolean(metamethod::raw_equal(a, b)))
}

/// collectgarbage([opt [, ...]]) - The collector control surface
fn lua_collectgarbage(vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let opt = get_arg(args, 1)
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .unwrap_or_else(|| "collect".to_string());

    match opt.as_str() {
        "collect" => {
            vm.gc_collect();
            Ok(LuaValue::Integer(0))
        }
        "count" => {
            let kb = vm.gc_count_kb();
            let minor = vm.gc.minor_mult();
            Ok(LuaValue::Multi(std::rc::Rc::new(vec![
                LuaValue::Float(kb),
                LuaValue::Integer(minor as i64),
            ])))
        }
        "step" => {
            let kb = get_arg(args, 2)
                .and_then(|v| v.as_integer())
                .unwrap_or(0)
                .max(0) as usize;
            Ok(LuaValue::Boolean(vm.gc_step(kb)))
        }
        "stop" => {
            vm.gc_stop();
            Ok(LuaValue::Integer(0))
        }
        "restart" => {
            vm.gc_restart();
            Ok(LuaValue::Integer(0))
        }
        "isrunning" => Ok(LuaValue::Boolean(vm.gc_is_running())),
        "incremental" | "generational" => {
            let mode = if opt == "incremental" {
                GcMode::Incremental
            } else {
                GcMode::Generational
            };
            let t = |i: usize| {
                get_arg(args, i)
                    .and_then(|v| v.as_integer())
                    .unwrap_or(0)
                    .max(0) as u32
            };
            let previous = vm.gc_set_mode(mode, t(2), t(3), t(4));
            Ok(vm.new_string(previous))
        }
        other => Err(vm.error(format!(
            "bad argument #1 to 'collectgarbage' (invalid option '{}')",
            other
        ))),
    }
}

/// load(chunk [, chunkname [, mode [, env]]]) - Build a callable from
/// source text, bytes, or a reader function
fn lua_load(vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let chunk = require_arg(args, 1, "load")?;
    let name = get_arg(args, 2).and_then(|v| v.as_str().map(|s| s.to_string()));
    let mode_str = get_arg(args, 3).and_then(|v| v.as_str().map(|s| s.to_string()));
    // A fourth argument, even an explicit nil, means "environment
    // provided" and isolates the chunk onto it.
    let env = if args.len() >= 4 {
        Some(args[3].clone())
    } else {
        None
    };

    let mode = match ChunkMode::parse(mode_str.as_deref()) {
        Ok(m) => m,
        Err(message) => return Ok(load_failure(vm, message)),
    };
    let source = match chunk {
        LuaValue::Str(s) => ChunkSource::Bytes(s.as_bytes().to_vec()),
        LuaValue::Function(_) => ChunkSource::Reader(chunk.clone()),
        other => {
            return Err(vm.type_error(format!(
                "bad argument #1 to 'load' (string or function expected, got {})",
                other.type_name()
            )));
        }
    };

    match vm.load_chunk(source, LoadOptions { name, mode, env }) {
        Ok(func) => Ok(func),
        Err(message) => Ok(load_failure(vm, message)),
    }
}

/// loadfile([filename [, mode [, env]]]) - load from a file or stdin
fn lua_loadfile(vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let path = get_arg(args, 1).and_then(|v| v.as_str().map(|s| s.to_string()));
    let mode_str = get_arg(args, 2).and_then(|v| v.as_str().map(|s| s.to_string()));
    let env = if args.len() >= 3 {
        Some(args[2].clone())
    } else {
        None
    };
    let mode = match ChunkMode::parse(mode_str.as_deref()) {
        Ok(m) => m,
        Err(message) => return Ok(load_failure(vm, message)),
    };
    match vm.load_file(path.as_deref().map(Path::new), mode, env) {
        Ok(func) => Ok(func),
        Err(message) => Ok(load_failure(vm, message)),
    }
}

/// dofile([filename]) - load and run, errors propagate
fn lua_dofile(vm: &mut LuaVm, args: &[LuaValue]) -> LuaResult<LuaValue> {
    let path = get_arg(args, 1).and_then(|v| v.as_str().map(|s| s.to_string()));
    vm.do_file(path.as_deref().map(Path::new))
}

fn load_failure(vm: &mut LuaVm, message: String) -> LuaValue {
    let msg = vm.new_string(&message);
    LuaValue::Multi(std::rc::Rc::new(vec![LuaValue::Nil, msg]))
}
