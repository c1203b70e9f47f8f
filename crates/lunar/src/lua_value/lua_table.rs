// Tables
//
// An insertion-ordered raw map plus an optional metatable slot. Keys are
// compared by raw value: nil and NaN are rejected on write, a float key
// with a zero fraction collapses onto the integer key, and writing nil
// removes the entry.
//
// The length of a table is a border: an `n >= 0` with `t[n]` non-nil and
// `t[n+1]` nil. Tables with holes have several valid borders; `border()`
// returns the one the doubling/bisection probe lands on, which callers
// must treat as authoritative.

use ahash::RandomState;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::lua_vm::{LuaError, LuaResult};

use super::lua_value::{float_to_exact_int, LuaValue};

pub type TableRef = Rc<RefCell<LuaTable>>;

/// A raw table key. Construction enforces the key invariants and
/// normalizes numeric representations, so `Hash` and `Eq` stay consistent
/// with raw value equality.
#[derive(Clone, PartialEq)]
pub struct LuaKey(LuaValue);

impl LuaKey {
    /// Normalize and validate a key for writing.
    pub fn new(value: LuaValue) -> LuaResult<Self> {
        let value = value.first_value();
        match &value {
            LuaValue::Nil => Err(LuaError::Type("table index is nil".to_string())),
            LuaValue::Float(f) if f.is_nan() => {
                Err(LuaError::Type("table index is NaN".to_string()))
            }
            LuaValue::Float(f) => match float_to_exact_int(*f) {
                Some(i) => Ok(LuaKey(LuaValue::Integer(i))),
                None => Ok(LuaKey(value)),
            },
            LuaValue::BigInt(b) => match i64::try_from(b.as_ref()) {
                Ok(i) => Ok(LuaKey(LuaValue::Integer(i))),
                Err(_) => Ok(LuaKey(value)),
            },
            _ => Ok(LuaKey(value)),
        }
    }

    /// Normalize a key for reading; invalid keys simply match nothing.
    fn for_lookup(value: &LuaValue) -> Option<Self> {
        LuaKey::new(value.clone()).ok()
    }

    pub fn value(&self) -> &LuaValue {
        &self.0
    }
}

impl Eq for LuaKey {}

impl Hash for LuaKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.0 {
            LuaValue::Boolean(b) => {
                0u8.hash(state);
                b.hash(state);
            }
            LuaValue::Integer(i) => {
                1u8.hash(state);
                i.hash(state);
            }
            // Only non-integral floats survive normalization, so they can
            // never collide with an equal integer.
            LuaValue::Float(f) => {
                2u8.hash(state);
                f.to_bits().hash(state);
            }
            LuaValue::BigInt(b) => {
                3u8.hash(state);
                b.hash(state);
            }
            LuaValue::Str(s) => {
                4u8.hash(state);
                s.hash64().hash(state);
            }
            LuaValue::Table(t) => {
                5u8.hash(state);
                (Rc::as_ptr(t) as usize).hash(state);
            }
            LuaValue::Function(f) => {
                6u8.hash(state);
                f.addr().hash(state);
            }
            LuaValue::Userdata(u) => {
                7u8.hash(state);
                (Rc::as_ptr(u) as *const () as usize).hash(state);
            }
            // Excluded at construction.
            LuaValue::Nil | LuaValue::Multi(_) => {
                8u8.hash(state);
            }
        }
    }
}

impl std::fmt::Debug for LuaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

pub struct LuaTable {
    entries: IndexMap<LuaKey, LuaValue, RandomState>,
    meta: Option<TableRef>,
}

impl LuaTable {
    pub fn new() -> Self {
        Self {
            entries: IndexMap::with_hasher(RandomState::new()),
            meta: None,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity_and_hasher(capacity, RandomState::new()),
            meta: None,
        }
    }

    // ============ Metatable slot ============

    #[inline]
    pub fn has_metatable(&self) -> bool {
        self.meta.is_some()
    }

    /// The stored metatable reference. Identity is preserved: this is the
    /// exact table passed to `set_metatable_ref`.
    pub fn metatable(&self) -> Option<TableRef> {
        self.meta.clone()
    }

    pub fn set_metatable_ref(&mut self, meta: Option<TableRef>) {
        self.meta = meta;
    }

    // ============ Raw access ============

    /// Raw read: metamethods are never consulted. Reads with invalid keys
    /// (nil, NaN) see an absent entry rather than an error.
    pub fn raw_get(&self, key: &LuaValue) -> LuaValue {
        match LuaKey::for_lookup(key) {
            Some(k) => self.entries.get(&k).cloned().unwrap_or(LuaValue::Nil),
            None => LuaValue::Nil,
        }
    }

    /// Raw write: rejects nil/NaN keys, removes the entry on nil values.
    pub fn raw_set(&mut self, key: LuaValue, value: LuaValue) -> LuaResult<()> {
        let k = LuaKey::new(key)?;
        if value.is_nil() {
            self.entries.shift_remove(&k);
        } else {
            self.entries.insert(k, value.first_value());
        }
        Ok(())
    }

    #[inline]
    pub fn get_int(&self, key: i64) -> LuaValue {
        self.entries
            .get(&LuaKey(LuaValue::Integer(key)))
            .cloned()
            .unwrap_or(LuaValue::Nil)
    }

    #[inline]
    pub fn set_int(&mut self, key: i64, value: LuaValue) {
        let k = LuaKey(LuaValue::Integer(key));
        if value.is_nil() {
            self.entries.shift_remove(&k);
        } else {
            self.entries.insert(k, value.first_value());
        }
    }

    pub fn get_str(&self, key: &str) -> LuaValue {
        self.raw_get(&LuaValue::Str(super::LuaString::from_str(key)))
    }

    pub fn set_str(&mut self, key: &str, value: LuaValue) {
        let k = LuaKey(LuaValue::Str(super::LuaString::from_str(key)));
        if value.is_nil() {
            self.entries.shift_remove(&k);
        } else {
            self.entries.insert(k, value.first_value());
        }
    }

    /// Number of live entries (not the Lua length).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // ============ Border ============

    /// A border of the table: `t[n]` non-nil and `t[n+1]` nil. Found by
    /// doubling from 1 until a nil slot appears, then bisecting.
    pub fn border(&self) -> i64 {
        if self.get_int(1).is_nil() {
            return 0;
        }
        let mut i: i64 = 1;
        let mut j: i64 = 2;
        while !self.get_int(j).is_nil() {
            i = j;
            if j > i64::MAX / 2 {
                // Pathological key range; fall back to a linear walk.
                let mut n = i;
                while !self.get_int(n + 1).is_nil() {
                    n += 1;
                }
                return n;
            }
            j *= 2;
        }
        while j - i > 1 {
            let m = (i + j) / 2;
            if self.get_int(m).is_nil() {
                j = m;
            } else {
                i = m;
            }
        }
        i
    }

    // ============ Iteration ============

    /// Stateless iteration step: nil starts, the last key of the table
    /// ends with `None`. A key not present in the table is an error,
    /// which is what happens when a traversal key was removed mid-loop.
    pub fn next(&self, key: &LuaValue) -> LuaResult<Option<(LuaValue, LuaValue)>> {
        if key.is_nil() {
            return Ok(self
                .entries
                .get_index(0)
                .map(|(k, v)| (k.0.clone(), v.clone())));
        }
        let lk = LuaKey::new(key.clone())?;
        match self.entries.get_index_of(&lk) {
            Some(idx) => Ok(self
                .entries
                .get_index(idx + 1)
                .map(|(k, v)| (k.0.clone(), v.clone()))),
            None => Err(LuaError::Runtime("invalid key to 'next'".to_string())),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LuaValue, &LuaValue)> {
        self.entries.iter().map(|(k, v)| (&k.0, v))
    }
}

impl Default for LuaTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua_value::LuaString;

    #[test]
    fn test_set_get() {
        let mut t = LuaTable::new();
        t.set_int(1, LuaValue::Integer(42));
        t.set_str("key", LuaValue::Boolean(true));
        assert_eq!(t.get_int(1), LuaValue::Integer(42));
        assert_eq!(t.get_str("key"), LuaValue::Boolean(true));
        assert_eq!(t.get_str("missing"), LuaValue::Nil);
    }

    #[test]
    fn test_nil_assignment_removes() {
        let mut t = LuaTable::new();
        t.set_str("k", LuaValue::Integer(1));
        assert_eq!(t.len(), 1);
        t.set_str("k", LuaValue::Nil);
        assert_eq!(t.len(), 0);
        assert_eq!(t.get_str("k"), LuaValue::Nil);
    }

    #[test]
    fn test_invalid_keys_rejected() {
        let mut t = LuaTable::new();
        assert!(t.raw_set(LuaValue::Nil, LuaValue::Integer(1)).is_err());
        assert!(t
            .raw_set(LuaValue::Float(f64::NAN), LuaValue::Integer(1))
            .is_err());
        // Reads are tolerant
        assert_eq!(t.raw_get(&LuaValue::Nil), LuaValue::Nil);
    }

    #[test]
    fn test_float_key_normalization() {
        let mut t = LuaTable::new();
        t.raw_set(LuaValue::Float(2.0), LuaValue::Str(LuaString::from_str("x")))
            .unwrap();
        assert_eq!(t.get_int(2), LuaValue::Str(LuaString::from_str("x")));
        t.raw_set(LuaValue::Float(2.5), LuaValue::Integer(9)).unwrap();
        assert_eq!(t.raw_get(&LuaValue::Float(2.5)), LuaValue::Integer(9));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_border_dense() {
        let mut t = LuaTable::new();
        for i in 1..=10 {
            t.set_int(i, LuaValue::Integer(i * 100));
        }
        assert_eq!(t.border(), 10);
    }

    #[test]
    fn test_border_empty_and_holes() {
        let t = LuaTable::new();
        assert_eq!(t.border(), 0);

        let mut t = LuaTable::new();
        for i in 1..=10 {
            t.set_int(i, LuaValue::Integer(i));
        }
        t.set_int(5, LuaValue::Nil);
        let b = t.border();
        // Any valid border: t[b] non-nil, t[b+1] nil
        assert!(b >= 1);
        assert!(!t.get_int(b).is_nil());
        assert!(t.get_int(b + 1).is_nil());
        assert!(b <= 10);
    }

    #[test]
    fn test_next_walks_insertion_order() {
        let mut t = LuaTable::new();
        t.set_str("a", LuaValue::Integer(1));
        t.set_str("b", LuaValue::Integer(2));
        let (k1, v1) = t.next(&LuaValue::Nil).unwrap().unwrap();
        assert_eq!(v1, LuaValue::Integer(1));
        let (_k2, v2) = t.next(&k1).unwrap().unwrap();
        assert_eq!(v2, LuaValue::Integer(2));
        let (k2, _) = t.next(&k1).unwrap().unwrap();
        assert!(t.next(&k2).unwrap().is_none());
    }

    #[test]
    fn test_next_invalid_key() {
        let t = LuaTable::new();
        assert!(t.next(&LuaValue::Integer(99)).is_err());
    }

    #[test]
    fn test_metatable_identity() {
        let mut t = LuaTable::new();
        let mt: TableRef = Rc::new(RefCell::new(LuaTable::new()));
        t.set_metatable_ref(Some(mt.clone()));
        let got = t.metatable().unwrap();
        assert!(Rc::ptr_eq(&got, &mt));
    }
}
