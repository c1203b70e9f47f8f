// Dynamic value representation
//
// A tagged enum over every runtime type. Heap-backed payloads sit behind
// `Rc`, so cloning a value never copies a table or closure: two values
// wrapping the same table compare identical and share one metatable slot.
//
// `Multi` carries the multiple-return protocol as a flat sequence; the
// constructors flatten, so a `Multi` never nests another `Multi`.

use num_bigint::BigInt;
use std::rc::Rc;

use super::lua_function::LuaFunction;
use super::lua_table::{LuaTable, TableRef};
use super::lua_string::LuaString;

/// Opaque host object handle. Carries no metatable: dispatch is a table
/// affair, a handle is only routed through, never operated on.
pub struct LuaUserdata {
    pub type_name: String,
    pub data: Rc<dyn std::any::Any>,
}

#[derive(Clone)]
pub enum LuaValue {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    BigInt(Rc<BigInt>),
    Str(LuaString),
    Table(TableRef),
    Function(LuaFunction),
    Userdata(Rc<LuaUserdata>),
    Multi(Rc<Vec<LuaValue>>),
}

/// Type enum for pattern matching without payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuaValueKind {
    Nil,
    Boolean,
    Integer,
    Float,
    BigInt,
    String,
    Table,
    Function,
    Userdata,
    Multi,
}

impl LuaValue {
    // ============ Constructors ============

    #[inline]
    pub fn boolean(b: bool) -> Self {
        LuaValue::Boolean(b)
    }

    #[inline]
    pub fn integer(i: i64) -> Self {
        LuaValue::Integer(i)
    }

    #[inline]
    pub fn float(n: f64) -> Self {
        LuaValue::Float(n)
    }

    pub fn big_int(b: BigInt) -> Self {
        LuaValue::BigInt(Rc::new(b))
    }

    pub fn table(t: LuaTable) -> Self {
        LuaValue::Table(Rc::new(std::cell::RefCell::new(t)))
    }

    pub fn string(s: LuaString) -> Self {
        LuaValue::Str(s)
    }

    /// Build a multi-value from a flat list. A single element collapses to
    /// the element itself; nested multis are spliced in place.
    pub fn multi(values: Vec<LuaValue>) -> Self {
        let mut flat = Vec::with_capacity(values.len());
        for v in values {
            v.append_to(&mut flat);
        }
        if flat.len() == 1 {
            return flat.into_iter().next().unwrap();
        }
        LuaValue::Multi(Rc::new(flat))
    }

    /// Append this value to `out`, splicing a `Multi` flat.
    pub fn append_to(&self, out: &mut Vec<LuaValue>) {
        match self {
            LuaValue::Multi(vs) => out.extend(vs.iter().cloned()),
            v => out.push(v.clone()),
        }
    }

    /// First value of a multi, or the value itself. An empty multi is nil.
    pub fn first_value(&self) -> LuaValue {
        match self {
            LuaValue::Multi(vs) => vs.first().cloned().unwrap_or(LuaValue::Nil),
            v => v.clone(),
        }
    }

    /// Expand into the flat value list (a plain value becomes a singleton).
    pub fn into_values(self) -> Vec<LuaValue> {
        match self {
            LuaValue::Multi(vs) => match Rc::try_unwrap(vs) {
                Ok(v) => v,
                Err(rc) => rc.as_ref().clone(),
            },
            v => vec![v],
        }
    }

    pub fn values_len(&self) -> usize {
        match self {
            LuaValue::Multi(vs) => vs.len(),
            _ => 1,
        }
    }

    // ============ Type checks ============

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, LuaValue::Nil)
    }

    #[inline]
    pub fn is_boolean(&self) -> bool {
        matches!(self, LuaValue::Boolean(_))
    }

    #[inline]
    pub fn is_integer(&self) -> bool {
        matches!(self, LuaValue::Integer(_))
    }

    #[inline]
    pub fn is_float(&self) -> bool {
        matches!(self, LuaValue::Float(_))
    }

    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(
            self,
            LuaValue::Integer(_) | LuaValue::Float(_) | LuaValue::BigInt(_)
        )
    }

    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, LuaValue::Str(_))
    }

    #[inline]
    pub fn is_table(&self) -> bool {
        matches!(self, LuaValue::Table(_))
    }

    #[inline]
    pub fn is_function(&self) -> bool {
        matches!(self, LuaValue::Function(_))
    }

    #[inline]
    pub fn is_multi(&self) -> bool {
        matches!(self, LuaValue::Multi(_))
    }

    // ============ Truthiness (Lua semantics) ============

    /// Only nil and false are falsy. A multi is judged by its first value.
    #[inline]
    pub fn is_truthy(&self) -> bool {
        !self.is_falsy()
    }

    #[inline]
    pub fn is_falsy(&self) -> bool {
        match self {
            LuaValue::Nil | LuaValue::Boolean(false) => true,
            LuaValue::Multi(vs) => vs.first().map_or(true, |v| v.is_falsy()),
            _ => false,
        }
    }

    // ============ Extraction ============

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            LuaValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer_strict(&self) -> Option<i64> {
        match self {
            LuaValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Integer view: floats with a zero fraction convert when exactly
    /// representable, big integers when they fit.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            LuaValue::Integer(i) => Some(*i),
            LuaValue::Float(f) => float_to_exact_int(*f),
            LuaValue::BigInt(b) => i64::try_from(b.as_ref()).ok(),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            LuaValue::Float(f) => Some(*f),
            LuaValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_lua_string(&self) -> Option<&LuaString> {
        match self {
            LuaValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            LuaValue::Str(s) => s.as_str(),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<TableRef> {
        match self {
            LuaValue::Table(t) => Some(t.clone()),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&LuaFunction> {
        match self {
            LuaValue::Function(f) => Some(f),
            _ => None,
        }
    }

    // ============ Type name ============

    pub fn type_name(&self) -> &'static str {
        match self {
            LuaValue::Nil => "nil",
            LuaValue::Boolean(_) => "boolean",
            LuaValue::Integer(_) | LuaValue::Float(_) | LuaValue::BigInt(_) => "number",
            LuaValue::Str(_) => "string",
            LuaValue::Table(_) => "table",
            LuaValue::Function(_) => "function",
            LuaValue::Userdata(_) => "userdata",
            LuaValue::Multi(vs) => vs.first().map_or("nil", |v| v.type_name()),
        }
    }

    pub fn kind(&self) -> LuaValueKind {
        match self {
            LuaValue::Nil => LuaValueKind::Nil,
            LuaValue::Boolean(_) => LuaValueKind::Boolean,
            LuaValue::Integer(_) => LuaValueKind::Integer,
            LuaValue::Float(_) => LuaValueKind::Float,
            LuaValue::BigInt(_) => LuaValueKind::BigInt,
            LuaValue::Str(_) => LuaValueKind::String,
            LuaValue::Table(_) => LuaValueKind::Table,
            LuaValue::Function(_) => LuaValueKind::Function,
            LuaValue::Userdata(_) => LuaValueKind::Userdata,
            LuaValue::Multi(_) => LuaValueKind::Multi,
        }
    }

    /// Identity of the heap allocation behind this value, if it has one.
    pub fn heap_ptr(&self) -> Option<usize> {
        match self {
            LuaValue::Str(s) => Some(s.data_ptr()),
            LuaValue::Table(t) => Some(Rc::as_ptr(t) as usize),
            LuaValue::Function(f) => Some(f.addr()),
            LuaValue::Userdata(u) => Some(Rc::as_ptr(u) as *const () as usize),
            LuaValue::BigInt(b) => Some(Rc::as_ptr(b) as usize),
            LuaValue::Multi(vs) => Some(Rc::as_ptr(vs) as usize),
            _ => None,
        }
    }
}

/// Exact float-to-integer conversion. The upper bound is exclusive at
/// 2^63 because `i64::MAX as f64` rounds up past the representable range.
pub(crate) fn float_to_exact_int(f: f64) -> Option<i64> {
    if f >= (i64::MIN as f64) && f < -(i64::MIN as f64) && f == (f as i64 as f64) {
        Some(f as i64)
    } else {
        None
    }
}

/// Whether a float exactly equals an integer value.
pub(crate) fn float_eq_int(f: f64, i: i64) -> bool {
    match float_to_exact_int(f) {
        Some(fi) => fi == i,
        None => false,
    }
}

fn big_eq_int(b: &BigInt, i: i64) -> bool {
    match i64::try_from(b) {
        Ok(bi) => bi == i,
        Err(_) => false,
    }
}

fn big_eq_float(b: &BigInt, f: f64) -> bool {
    match float_to_exact_int(f) {
        Some(i) => big_eq_int(b, i),
        None => false,
    }
}

impl PartialEq for LuaValue {
    fn eq(&self, other: &Self) -> bool {
        use LuaValue::*;
        match (self, other) {
            (Nil, Nil) => true,
            (Boolean(a), Boolean(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            // NaN != NaN falls out of the f64 comparison
            (Float(a), Float(b)) => a == b,
            (Integer(i), Float(f)) | (Float(f), Integer(i)) => float_eq_int(*f, *i),
            (BigInt(a), BigInt(b)) => a == b,
            (BigInt(b), Integer(i)) | (Integer(i), BigInt(b)) => big_eq_int(b, *i),
            (BigInt(b), Float(f)) | (Float(f), BigInt(b)) => big_eq_float(b, *f),
            (Str(a), Str(b)) => a == b,
            (Table(a), Table(b)) => Rc::ptr_eq(a, b),
            (Function(a), Function(b)) => a == b,
            (Userdata(a), Userdata(b)) => Rc::ptr_eq(a, b),
            (Multi(a), Multi(b)) => a == b,
            _ => false,
        }
    }
}

impl Default for LuaValue {
    fn default() -> Self {
        LuaValue::Nil
    }
}

impl From<bool> for LuaValue {
    fn from(b: bool) -> Self {
        LuaValue::Boolean(b)
    }
}

impl From<i64> for LuaValue {
    fn from(i: i64) -> Self {
        LuaValue::Integer(i)
    }
}

impl From<f64> for LuaValue {
    fn from(n: f64) -> Self {
        LuaValue::Float(n)
    }
}

/// Float formatting close to `%.14g`: integral values keep a trailing
/// `.0` so they read as floats.
pub(crate) fn format_float(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let s = format!("{}", n);
    if s.contains('.') || s.contains('e') || s.contains('E') {
        s
    } else {
        format!("{}.0", s)
    }
}

impl std::fmt::Debug for LuaValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LuaValue::Nil => write!(f, "nil"),
            LuaValue::Boolean(b) => write!(f, "{}", b),
            LuaValue::Integer(i) => write!(f, "{}", i),
            LuaValue::Float(n) => write!(f, "{}", format_float(*n)),
            LuaValue::BigInt(b) => write!(f, "{}", b),
            LuaValue::Str(s) => write!(f, "{:?}", s),
            LuaValue::Table(t) => write!(f, "table(0x{:x})", Rc::as_ptr(t) as usize),
            LuaValue::Function(func) => write!(f, "function(0x{:x})", func.addr()),
            LuaValue::Userdata(u) => {
                write!(f, "userdata(0x{:x})", Rc::as_ptr(u) as *const () as usize)
            }
            LuaValue::Multi(vs) => {
                write!(f, "multi[")?;
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl std::fmt::Display for LuaValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LuaValue::Nil => write!(f, "nil"),
            LuaValue::Boolean(b) => write!(f, "{}", b),
            LuaValue::Integer(i) => write!(f, "{}", i),
            LuaValue::Float(n) => write!(f, "{}", format_float(*n)),
            LuaValue::BigInt(b) => write!(f, "{}", b),
            LuaValue::Str(s) => write!(f, "{}", s),
            LuaValue::Table(t) => write!(f, "table: 0x{:x}", Rc::as_ptr(t) as usize),
            LuaValue::Function(func) => write!(f, "function: 0x{:x}", func.addr()),
            LuaValue::Userdata(u) => {
                write!(f, "userdata: 0x{:x}", Rc::as_ptr(u) as *const () as usize)
            }
            LuaValue::Multi(vs) => match vs.first() {
                Some(v) => write!(f, "{}", v),
                None => write!(f, "nil"),
            },
        }
    }
}
