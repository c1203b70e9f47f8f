// Byte strings
//
// Lua strings are byte sequences, not Unicode text: they must carry
// arbitrary (non-UTF-8) content through indexing, case folding and
// reversal without corruption. The host-native `String` type is only a
// view, available when the bytes happen to be valid UTF-8.
//
// Short strings (<= 40 bytes) are interned by the VM so that equal
// content shares one allocation; long strings are never interned.

use ahash::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};
use std::rc::Rc;

/// Content hashes must agree for equal bytes no matter where a string was
/// built, so a single fixed-seed state is used for all of them.
const CONTENT_HASH_STATE: RandomState =
    RandomState::with_seeds(0x243f_6a88, 0x85a3_08d3, 0x1319_8a2e, 0x0370_7344);

pub(crate) fn content_hash(bytes: &[u8]) -> u64 {
    let mut hasher = CONTENT_HASH_STATE.build_hasher();
    bytes.hash(&mut hasher);
    hasher.finish()
}

struct LuaStrData {
    bytes: Box<[u8]>,
    hash: u64,
}

/// Immutable, reference-counted byte string with a precomputed content hash.
#[derive(Clone)]
pub struct LuaString(Rc<LuaStrData>);

impl LuaString {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        let hash = content_hash(&bytes);
        Self(Rc::new(LuaStrData {
            bytes: bytes.into_boxed_slice(),
            hash,
        }))
    }

    pub fn from_str(s: &str) -> Self {
        Self::new(s.as_bytes().to_vec())
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0.bytes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.bytes.is_empty()
    }

    /// UTF-8 view, when the bytes allow one.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0.bytes).ok()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0.bytes).into_owned()
    }

    #[inline]
    pub fn hash64(&self) -> u64 {
        self.0.hash
    }

    /// Identity comparison: true only when both handles share one allocation.
    /// Interned short strings of equal content always do.
    pub fn ptr_eq(&self, other: &LuaString) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn strong_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    pub(crate) fn data_ptr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    /// 1-based byte access, Lua-style; negative indices count from the end.
    pub fn byte(&self, index: i64) -> Option<u8> {
        let len = self.len() as i64;
        let idx = if index < 0 { len + index + 1 } else { index };
        if idx < 1 || idx > len {
            return None;
        }
        Some(self.0.bytes[(idx - 1) as usize])
    }

    /// Per-byte ASCII upper folding; bytes >= 0x80 pass through untouched.
    pub fn fold_upper(&self) -> Vec<u8> {
        self.0.bytes.iter().map(|b| b.to_ascii_uppercase()).collect()
    }

    /// Per-byte ASCII lower folding; bytes >= 0x80 pass through untouched.
    pub fn fold_lower(&self) -> Vec<u8> {
        self.0.bytes.iter().map(|b| b.to_ascii_lowercase()).collect()
    }

    pub fn reversed(&self) -> Vec<u8> {
        let mut out = self.0.bytes.to_vec();
        out.reverse();
        out
    }
}

impl PartialEq for LuaString {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        if Rc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        self.0.hash == other.0.hash && self.0.bytes == other.0.bytes
    }
}

impl Eq for LuaString {}

impl PartialOrd for LuaString {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LuaString {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.bytes.cmp(&other.0.bytes)
    }
}

impl std::fmt::Debug for LuaString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{}\"", self.to_string_lossy())
    }
}

impl std::fmt::Display for LuaString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_lossy())
    }
}
