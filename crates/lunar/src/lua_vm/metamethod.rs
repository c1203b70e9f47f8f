// Metamethod dispatch
//
// Metatables do not inherit from each other: resolving a metamethod is a
// single raw lookup on the value's metatable. The chains that do exist
// (`__index`/`__newindex` through table handlers) are bounded by a depth
// limit so a cyclic metatable graph surfaces as an error, not a hang.

use crate::lua_value::{LuaString, LuaValue, TableRef};

use super::lua_error::{LuaError, LuaResult};
use super::lua_state::LuaVm;

pub const MM_INDEX: &str = "__index";
pub const MM_NEWINDEX: &str = "__newindex";
pub const MM_CALL: &str = "__call";
pub const MM_TOSTRING: &str = "__tostring";
pub const MM_LEN: &str = "__len";
pub const MM_LT: &str = "__lt";
pub const MM_PAIRS: &str = "__pairs";
pub const MM_CONCAT: &str = "__concat";
pub const MM_METATABLE: &str = "__metatable";
pub const MM_NAME: &str = "__name";

/// The raw metatable reference of a value, ignoring `__metatable`.
/// Only tables carry metatables.
pub fn raw_metatable(value: &LuaValue) -> Option<TableRef> {
    match value {
        LuaValue::Table(t) => t.borrow().metatable(),
        _ => None,
    }
}

/// What `getmetatable` sees: the `__metatable` field verbatim when
/// present (even a non-table), otherwise the stored metatable itself.
pub fn get_metatable(value: &LuaValue) -> LuaValue {
    let Some(mt) = raw_metatable(value) else {
        return LuaValue::Nil;
    };
    let protected = mt
        .borrow()
        .raw_get(&LuaValue::Str(LuaString::from_str(MM_METATABLE)));
    if !protected.is_nil() {
        return protected;
    }
    LuaValue::Table(mt)
}

/// `setmetatable` semantics: tables only, protected metatables refuse
/// replacement, nil clears. The stored reference is the argument itself,
/// so identity round-trips through `getmetatable`.
pub fn set_metatable(value: &LuaValue, meta: &LuaValue) -> LuaResult<LuaValue> {
    let LuaValue::Table(t) = value else {
        return Err(LuaError::Type(format!(
            "bad argument #1 to 'setmetatable' (table expected, got {})",
            value.type_name()
        )));
    };
    let current = t.borrow().metatable();
    if let Some(mt) = current {
        let protected = mt
            .borrow()
            .raw_get(&LuaValue::Str(LuaString::from_str(MM_METATABLE)));
        if !protected.is_nil() {
            return Err(LuaError::Runtime(
                "cannot change a protected metatable".to_string(),
            ));
        }
    }
    match meta {
        LuaValue::Nil => t.borrow_mut().set_metatable_ref(None),
        LuaValue::Table(m) => t.borrow_mut().set_metatable_ref(Some(m.clone())),
        other => {
            return Err(LuaError::Type(format!(
                "bad argument #2 to 'setmetatable' (nil or table expected, got {})",
                other.type_name()
            )));
        }
    }
    Ok(value.clone())
}

/// Direct, non-chained metamethod lookup.
pub fn resolve_metamethod(value: &LuaValue, name: &str) -> Option<LuaValue> {
    let mt = raw_metatable(value)?;
    let handler = mt.borrow().raw_get(&LuaValue::Str(LuaString::from_str(name)));
    if handler.is_nil() {
        None
    } else {
        Some(handler)
    }
}

/// Resolve a metamethod against the first argument and invoke it through
/// the VM's full callable dispatch.
pub fn call_metamethod(vm: &mut LuaVm, name: &str, args: Vec<LuaValue>) -> LuaResult<LuaValue> {
    let subject = args.first().cloned().unwrap_or(LuaValue::Nil);
    let handler = resolve_metamethod(&subject, name).ok_or_else(|| {
        LuaError::Runtime(format!(
            "no '{}' metamethod on a {} value",
            name,
            subject.type_name()
        ))
    })?;
    vm.call_value(handler, args)
}

// ============ Raw operations (never consult metamethods) ============

pub fn raw_equal(a: &LuaValue, b: &LuaValue) -> bool {
    a == b
}

pub fn raw_len(value: &LuaValue) -> LuaResult<i64> {
    match value {
        LuaValue::Str(s) => Ok(s.len() as i64),
        LuaValue::Table(t) => Ok(t.borrow().border()),
        other => Err(LuaError::Type(format!(
            "table or string expected, got {}",
            other.type_name()
        ))),
    }
}

pub fn raw_get(table: &LuaValue, key: &LuaValue) -> LuaResult<LuaValue> {
    match table {
        LuaValue::Table(t) => Ok(t.borrow().raw_get(key)),
        other => Err(LuaError::Type(format!(
            "table expected, got {}",
            other.type_name()
        ))),
    }
}

pub fn raw_set(table: &LuaValue, key: LuaValue, value: LuaValue) -> LuaResult<()> {
    match table {
        LuaValue::Table(t) => t.borrow_mut().raw_set(key, value),
        other => Err(LuaError::Type(format!(
            "table expected, got {}",
            other.type_name()
        ))),
    }
}

// ============ Dispatched operations ============

/// Indexing with the `__index` chain. Table handlers re-enter the loop,
/// function handlers are called once.
pub fn index(vm: &mut LuaVm, target: &LuaValue, key: &LuaValue) -> LuaResult<LuaValue> {
    let mut current = target.clone();
    for _ in 0..vm.config.metamethod_depth {
        if let LuaValue::Table(t) = &current {
            let raw = t.borrow().raw_get(key);
            if !raw.is_nil() {
                return Ok(raw);
            }
            match resolve_metamethod(&current, MM_INDEX) {
                None => return Ok(LuaValue::Nil),
                Some(handler @ LuaValue::Function(_)) => {
                    return vm
                        .call_value(handler, vec![current, key.clone()])
                        .map(|r| r.first_value());
                }
                Some(next) => {
                    current = next;
                }
            }
        } else {
            match resolve_metamethod(&current, MM_INDEX) {
                Some(handler @ LuaValue::Function(_)) => {
                    return vm
                        .call_value(handler, vec![current, key.clone()])
                        .map(|r| r.first_value());
                }
                Some(next) => {
                    current = next;
                }
                None => {
                    return Err(LuaError::Type(format!(
                        "attempt to index a {} value",
                        current.type_name()
                    )));
                }
            }
        }
    }
    Err(LuaError::Runtime("'__index' chain too long; possible loop".to_string()))
}

/// Assignment with the `__newindex` chain.
pub fn newindex(
    vm: &mut LuaVm,
    target: &LuaValue,
    key: LuaValue,
    value: LuaValue,
) -> LuaResult<()> {
    let mut current = target.clone();
    for _ in 0..vm.config.metamethod_depth {
        if let LuaValue::Table(t) = &current {
            let existing = t.borrow().raw_get(&key);
            if !existing.is_nil() {
                return t.borrow_mut().raw_set(key, value);
            }
            match resolve_metamethod(&current, MM_NEWINDEX) {
                None => return t.borrow_mut().raw_set(key, value),
                Some(handler @ LuaValue::Function(_)) => {
                    vm.call_value(handler, vec![current, key, value])?;
                    return Ok(());
                }
                Some(next) => {
                    current = next;
                }
            }
        } else {
            match resolve_metamethod(&current, MM_NEWINDEX) {
                Some(handler @ LuaValue::Function(_)) => {
                    vm.call_value(handler, vec![current, key, value])?;
                    return Ok(());
                }
                Some(next) => {
                    current = next;
                }
                None => {
                    return Err(LuaError::Type(format!(
                        "attempt to index a {} value",
                        current.type_name()
                    )));
                }
            }
        }
    }
    Err(LuaError::Runtime("'__newindex' chain too long; possible loop".to_string()))
}

/// The `#` operation: `__len` first, then the string/table fallbacks.
pub fn length(vm: &mut LuaVm, value: &LuaValue) -> LuaResult<LuaValue> {
    if let Some(handler) = resolve_metamethod(value, MM_LEN) {
        return vm
            .call_value(handler, vec![value.clone()])
            .map(|r| r.first_value());
    }
    match value {
        LuaValue::Str(s) => Ok(LuaValue::Integer(s.len() as i64)),
        LuaValue::Table(t) => Ok(LuaValue::Integer(t.borrow().border())),
        other => Err(LuaError::Type(format!(
            "attempt to get length of a {} value",
            other.type_name()
        ))),
    }
}

/// Ordered comparison. Numbers and strings compare directly; otherwise
/// `a.__lt(a, b)` is tried, and failing that `b.__lt(b, a)` with the
/// result inverted — either operand may supply the comparator.
pub fn less_than(vm: &mut LuaVm, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
    match (a, b) {
        (LuaValue::Integer(x), LuaValue::Integer(y)) => return Ok(x < y),
        (LuaValue::Str(x), LuaValue::Str(y)) => return Ok(x < y),
        (LuaValue::BigInt(x), LuaValue::BigInt(y)) => return Ok(x < y),
        (LuaValue::BigInt(x), LuaValue::Integer(y)) => {
            return Ok(x.as_ref() < &num_bigint::BigInt::from(*y));
        }
        (LuaValue::Integer(x), LuaValue::BigInt(y)) => {
            return Ok(&num_bigint::BigInt::from(*x) < y.as_ref());
        }
        _ => {}
    }
    if a.is_number() && b.is_number() {
        let x = a.as_float().unwrap_or(f64::NAN);
        let y = b.as_float().unwrap_or(f64::NAN);
        return Ok(x < y);
    }
    if let Some(handler) = resolve_metamethod(a, MM_LT) {
        let r = vm.call_value(handler, vec![a.clone(), b.clone()])?;
        return Ok(r.is_truthy());
    }
    if let Some(handler) = resolve_metamethod(b, MM_LT) {
        let r = vm.call_value(handler, vec![b.clone(), a.clone()])?;
        return Ok(!r.is_truthy());
    }
    Err(LuaError::Runtime(format!(
        "attempt to compare {} with {}",
        a.type_name(),
        b.type_name()
    )))
}

/// Concatenation: strings and numbers coerce, anything else goes through
/// `__concat` on either operand.
pub fn concat(vm: &mut LuaVm, a: &LuaValue, b: &LuaValue) -> LuaResult<LuaValue> {
    fn coerce(v: &LuaValue) -> Option<Vec<u8>> {
        match v {
            LuaValue::Str(s) => Some(s.as_bytes().to_vec()),
            LuaValue::Integer(_) | LuaValue::Float(_) | LuaValue::BigInt(_) => {
                Some(v.to_string().into_bytes())
            }
            _ => None,
        }
    }
    if let (Some(mut left), Some(right)) = (coerce(a), coerce(b)) {
        left.extend_from_slice(&right);
        return Ok(vm.new_string_bytes(&left));
    }
    if let Some(handler) = resolve_metamethod(a, MM_CONCAT) {
        return vm
            .call_value(handler, vec![a.clone(), b.clone()])
            .map(|r| r.first_value());
    }
    if let Some(handler) = resolve_metamethod(b, MM_CONCAT) {
        return vm
            .call_value(handler, vec![a.clone(), b.clone()])
            .map(|r| r.first_value());
    }
    let offender = if coerce(a).is_none() { a } else { b };
    Err(LuaError::Type(format!(
        "attempt to concatenate a {} value",
        offender.type_name()
    )))
}

/// String conversion: `__tostring`, then `__name`, then the plain form.
pub fn tostring(vm: &mut LuaVm, value: &LuaValue) -> LuaResult<String> {
    if let Some(handler) = resolve_metamethod(value, MM_TOSTRING) {
        let r = vm.call_value(handler, vec![value.clone()])?.first_value();
        return match r {
            LuaValue::Str(s) => Ok(s.to_string_lossy()),
            other => Err(LuaError::Runtime(format!(
                "'__tostring' must return a string (got {})",
                other.type_name()
            ))),
        };
    }
    if let Some(LuaValue::Str(name)) = resolve_metamethod(value, MM_NAME) {
        if let Some(ptr) = value.heap_ptr() {
            return Ok(format!("{}: 0x{:x}", name.to_string_lossy(), ptr));
        }
    }
    Ok(value.to_string())
}

/// The `__pairs` hook, if any.
pub fn pairs_hook(value: &LuaValue) -> Option<LuaValue> {
    resolve_metamethod(value, MM_PAIRS)
}
