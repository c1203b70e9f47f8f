// String interner
//
// All short strings are deduplicated: same content, same allocation, so
// identity comparison works for them the way it does for tables. Long
// strings bypass the intern map entirely. The sweep drops entries whose
// only remaining owner is the map itself.

use ahash::RandomState;
use std::collections::HashMap;

use crate::lua_value::{content_hash, LuaString};

use super::GcState;

pub struct StringInterner {
    // content hash -> strings with that hash (collision chain)
    map: HashMap<u64, Vec<LuaString>, RandomState>,
}

impl StringInterner {
    pub const SHORT_STRING_LIMIT: usize = 40;

    pub fn new() -> Self {
        Self {
            map: HashMap::with_capacity_and_hasher(256, RandomState::new()),
        }
    }

    /// Intern a byte string: an existing allocation comes back for known
    /// short content, anything else is created and accounted.
    pub fn intern(&mut self, bytes: &[u8], gc: &mut GcState) -> LuaString {
        if bytes.len() > Self::SHORT_STRING_LIMIT {
            gc.record_allocation(40 + bytes.len());
            return LuaString::new(bytes.to_vec());
        }

        let hash = content_hash(bytes);
        if let Some(strings) = self.map.get(&hash) {
            for s in strings {
                if s.as_bytes() == bytes {
                    return s.clone();
                }
            }
        }

        gc.record_allocation(40 + bytes.len());
        let s = LuaString::new(bytes.to_vec());
        self.map.entry(hash).or_default().push(s.clone());
        s
    }

    /// Number of interned strings currently held.
    pub fn len(&self) -> usize {
        self.map.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Drop interned strings nobody else references. Returns freed bytes.
    pub fn sweep_dead(&mut self) -> usize {
        let mut freed = 0;
        self.map.retain(|_, strings| {
            strings.retain(|s| {
                if s.strong_count() > 1 {
                    true
                } else {
                    freed += 40 + s.len();
                    false
                }
            });
            !strings.is_empty()
        });
        freed
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}
