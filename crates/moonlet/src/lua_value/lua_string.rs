// Immutable Lua string
//
// A Lua string is a byte sequence, not UTF-8 text: equality is byte-wise
// and length is the byte count. The content hash is computed once at
// creation and cached, so equality gets a hash fast path and table keys
// never rehash the bytes.

use std::hash::{BuildHasher, Hasher};
use std::sync::Arc;

/// Fixed seeds so a given byte sequence hashes identically across the
/// whole runtime (the hash is cached inside every clone).
const HASH_SEEDS: (u64, u64, u64, u64) = (
    0x9e37_79b9_7f4a_7c15,
    0xf39c_c060_5ced_c834,
    0x1082_276b_f3a2_7251,
    0x8ebc_6af0_9c88_c6e3,
);

#[derive(Clone)]
pub struct LuaString {
    data: Arc<[u8]>,
    hash: u64,
}

impl LuaString {
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        let data: Arc<[u8]> = bytes.into();
        let hash = hash_bytes(&data);
        LuaString { data, hash }
    }

    pub fn from_str(s: &str) -> Self {
        Self::from_bytes(s.as_bytes().to_vec())
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The content as UTF-8 text, when it happens to be valid UTF-8.
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    /// Byte length (what the `#` operator reports).
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn cached_hash(&self) -> u64 {
        self.hash
    }

    /// Byte-wise concatenation (the `..` operator's raw case).
    pub fn concat(&self, other: &LuaString) -> LuaString {
        let mut out = Vec::with_capacity(self.len() + other.len());
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&other.data);
        LuaString::from_bytes(out)
    }
}

fn hash_bytes(bytes: &[u8]) -> u64 {
    let (k0, k1, k2, k3) = HASH_SEEDS;
    let mut hasher = ahash::RandomState::with_seeds(k0, k1, k2, k3).build_hasher();
    hasher.write(bytes);
    hasher.finish()
}

impl PartialEq for LuaString {
    fn eq(&self, other: &Self) -> bool {
        // Hash mismatch settles it without touching the bytes
        if self.hash != other.hash {
            return false;
        }
        self.data == other.data
    }
}

impl Eq for LuaString {}

impl std::hash::Hash for LuaString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl PartialOrd for LuaString {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LuaString {
    /// Lexicographic over bytes, the `<` / `<=` string order.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.data.cmp(&other.data)
    }
}

impl std::fmt::Debug for LuaString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.data))
    }
}

impl std::fmt::Display for LuaString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.data))
    }
}

impl From<&str> for LuaString {
    fn from(s: &str) -> Self {
        LuaString::from_str(s)
    }
}

impl From<String> for LuaString {
    fn from(s: String) -> Self {
        LuaString::from_bytes(s.into_bytes())
    }
}

impl From<Vec<u8>> for LuaString {
    fn from(bytes: Vec<u8>) -> Self {
        LuaString::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_is_bytewise() {
        let a = LuaString::from_str("hello");
        let b = LuaString::from_bytes(b"hello".to_vec());
        let c = LuaString::from_str("hellO");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_cached_hash_is_stable() {
        let a = LuaString::from_str("key");
        let b = LuaString::from_str("key");
        assert_eq!(a.cached_hash(), b.cached_hash());
    }

    #[test]
    fn test_len_is_byte_count() {
        // 3 codepoints, 7 bytes
        let s = LuaString::from_str("a\u{00e9}\u{4e2d}a");
        assert_eq!(s.len(), 7);
    }

    #[test]
    fn test_non_utf8_content() {
        let s = LuaString::from_bytes(vec![0xff, 0x00, 0x80]);
        assert_eq!(s.len(), 3);
        assert!(s.as_str().is_none());
    }

    #[test]
    fn test_concat() {
        let a = LuaString::from_str("foo");
        let b = LuaString::from_str("bar");
        assert_eq!(a.concat(&b).as_str(), Some("foobar"));
    }

    #[test]
    fn test_byte_order() {
        let a = LuaString::from_str("abc");
        let b = LuaString::from_str("abd");
        assert!(a < b);
    }
}
