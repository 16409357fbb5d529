// Lua table implementation
// - Array part for integer keys [1..n]
// - Hash part keyed by normalized values (integral floats collapse to
//   integers, nil and NaN are rejected)
// - Optional metatable handle plus a weak mode derived from __mode
//
// Weak entries hold their collectable side through `Weak` handles; dead
// entries read as absent and are swept out at mutation points, so no
// caller ever observes a dangling reference.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use ahash::AHashMap;

use crate::lua_value::{LightUserdata, LuaString, LuaValue, WeakValue};
use crate::lua_vm::{LuaError, LuaResult};

/// Weak semantics requested by the metatable's __mode string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeakMode {
    Keys,
    Values,
    KeysValues,
}

impl WeakMode {
    pub fn from_mode_string(mode: &LuaString) -> Option<WeakMode> {
        let bytes = mode.as_bytes();
        let k = bytes.contains(&b'k');
        let v = bytes.contains(&b'v');
        match (k, v) {
            (true, true) => Some(WeakMode::KeysValues),
            (true, false) => Some(WeakMode::Keys),
            (false, true) => Some(WeakMode::Values),
            (false, false) => None,
        }
    }

    #[inline]
    pub fn weak_keys(self) -> bool {
        matches!(self, WeakMode::Keys | WeakMode::KeysValues)
    }

    #[inline]
    pub fn weak_values(self) -> bool {
        matches!(self, WeakMode::Values | WeakMode::KeysValues)
    }
}

// ============ Hash-part keys ============

/// Normalized hash key. Primitive keys hash by content; collectable keys
/// hash by identity so a weak key stays findable after its referent dies.
#[derive(Clone)]
pub(crate) enum TableKey {
    Integer(i64),
    /// Bit pattern of a non-integral, non-NaN float
    Float(u64),
    Boolean(bool),
    Str(LuaString),
    Obj(ObjKey),
}

#[derive(Clone)]
pub(crate) struct ObjKey {
    addr: usize,
    handle: ObjHandle,
}

#[derive(Clone)]
enum ObjHandle {
    Strong(LuaValue),
    Weak(WeakValue),
    Light(LightUserdata),
}

impl TableKey {
    /// The key as a Lua value; None when a weak key has died.
    fn to_value(&self) -> Option<LuaValue> {
        match self {
            TableKey::Integer(i) => Some(LuaValue::Integer(*i)),
            TableKey::Float(bits) => Some(LuaValue::Float(f64::from_bits(*bits))),
            TableKey::Boolean(b) => Some(LuaValue::Boolean(*b)),
            TableKey::Str(s) => Some(LuaValue::String(s.clone())),
            TableKey::Obj(o) => match &o.handle {
                ObjHandle::Strong(v) => Some(v.clone()),
                ObjHandle::Weak(w) => w.upgrade(),
                ObjHandle::Light(p) => Some(LuaValue::LightUserdata(*p)),
            },
        }
    }

    fn is_live(&self) -> bool {
        match self {
            TableKey::Obj(ObjKey { handle: ObjHandle::Weak(w), .. }) => !w.is_dead(),
            _ => true,
        }
    }
}

impl PartialEq for TableKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TableKey::Integer(a), TableKey::Integer(b)) => a == b,
            (TableKey::Float(a), TableKey::Float(b)) => a == b,
            (TableKey::Boolean(a), TableKey::Boolean(b)) => a == b,
            (TableKey::Str(a), TableKey::Str(b)) => a == b,
            (TableKey::Obj(a), TableKey::Obj(b)) => a.addr == b.addr,
            _ => false,
        }
    }
}

impl Eq for TableKey {}

impl std::hash::Hash for TableKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            TableKey::Integer(i) => {
                state.write_u8(1);
                state.write_i64(*i);
            }
            TableKey::Float(bits) => {
                state.write_u8(2);
                state.write_u64(*bits);
            }
            TableKey::Boolean(b) => {
                state.write_u8(3);
                state.write_u8(*b as u8);
            }
            TableKey::Str(s) => {
                state.write_u8(4);
                state.write_u64(s.cached_hash());
            }
            TableKey::Obj(o) => {
                state.write_u8(5);
                state.write_usize(o.addr);
            }
        }
    }
}

/// Stored value: strong, or weak under a weak-values mode.
#[derive(Clone)]
enum TableSlot {
    Strong(LuaValue),
    Weak(WeakValue),
}

impl TableSlot {
    fn get(&self) -> Option<LuaValue> {
        match self {
            TableSlot::Strong(v) => Some(v.clone()),
            TableSlot::Weak(w) => w.upgrade(),
        }
    }

    fn is_live(&self) -> bool {
        match self {
            TableSlot::Strong(_) => true,
            TableSlot::Weak(w) => !w.is_dead(),
        }
    }
}

// ============ The table ============

pub struct LuaTable {
    /// Array part: values for integer keys [1..array.len()]
    array: Vec<LuaValue>,
    /// Hash part for every other key
    hash: AHashMap<TableKey, TableSlot>,
    metatable: Option<LuaTableRef>,
    weak: Option<WeakMode>,
}

impl LuaTable {
    pub fn new() -> Self {
        LuaTable {
            array: Vec::new(),
            hash: AHashMap::new(),
            metatable: None,
            weak: None,
        }
    }

    /// Build a table from key/value pairs (nil keys and NaN keys fail
    /// the same way rawset would).
    pub fn from_pairs(
        pairs: impl IntoIterator<Item = (LuaValue, LuaValue)>,
    ) -> LuaResult<LuaTable> {
        let mut t = LuaTable::new();
        for (k, v) in pairs {
            t.raw_set(k, v)?;
        }
        Ok(t)
    }

    pub fn get_metatable(&self) -> Option<LuaTableRef> {
        self.metatable.clone()
    }

    /// Store the metatable handle. The weak mode is applied separately
    /// (see [`LuaTableRef::set_metatable`]) because reading __mode needs
    /// the metatable's own lock.
    pub(crate) fn set_metatable_handle(&mut self, mt: Option<LuaTableRef>) {
        self.metatable = mt;
    }

    /// Read __mode out of this table's own contents (used when a table
    /// serves as a metatable).
    pub(crate) fn read_weak_mode(&self) -> Option<WeakMode> {
        match self.raw_get(&LuaValue::str("__mode")) {
            LuaValue::String(s) => WeakMode::from_mode_string(&s),
            _ => None,
        }
    }

    pub fn weak_mode(&self) -> Option<WeakMode> {
        self.weak
    }

    /// Switch the weak mode and rebuild entry representation. Weak
    /// tables keep everything in the hash part so one representation
    /// covers both sides.
    pub(crate) fn apply_weak_mode(&mut self, mode: Option<WeakMode>) {
        if self.weak == mode {
            return;
        }
        let entries = self.iter_all();
        self.array.clear();
        self.hash.clear();
        self.weak = mode;
        for (k, v) in entries {
            // keys were valid when first inserted
            let _ = self.raw_set(k, v);
        }
    }

    // ============ Raw access ============

    /// Fast integer access into the array part.
    #[inline]
    pub fn get_int(&self, key: i64) -> Option<LuaValue> {
        if key >= 1 && (key as u64) <= self.array.len() as u64 {
            let val = &self.array[(key - 1) as usize];
            if !val.is_nil() {
                return Some(val.clone());
            }
        }
        None
    }

    /// rawget: no metamethods; absent (or nil/NaN) keys read as nil.
    pub fn raw_get(&self, key: &LuaValue) -> LuaValue {
        if let Some(i) = key.as_integer() {
            if let Some(val) = self.get_int(i) {
                return val;
            }
        }
        match lookup_key(key) {
            Some(k) => self
                .hash
                .get(&k)
                .and_then(TableSlot::get)
                .unwrap_or(LuaValue::Nil),
            None => LuaValue::Nil,
        }
    }

    pub fn has_key(&self, key: &LuaValue) -> bool {
        !self.raw_get(key).is_nil()
    }

    /// rawset: no metamethods. Setting nil removes the key; nil and NaN
    /// keys are rejected.
    pub fn raw_set(&mut self, key: LuaValue, value: LuaValue) -> LuaResult<()> {
        if self.weak.is_some() {
            // safe point: sweep entries whose weak side died
            self.prune();
        }
        let key = normalize_key(key)?;
        if self.weak.is_none() {
            if let LuaValue::Integer(i) = key {
                if self.set_int_in_array(i, &value) {
                    return Ok(());
                }
            }
        }
        self.set_in_hash_value(key, value);
        Ok(())
    }

    fn set_in_hash_value(&mut self, key: LuaValue, value: LuaValue) {
        // normalize_key already rejected nil and NaN
        if let Some(k) = lookup_key(&key) {
            self.set_in_hash(k, value);
        }
    }

    /// Try to place an integer key in the array part. Returns false when
    /// the key belongs to the hash part.
    fn set_int_in_array(&mut self, key: i64, value: &LuaValue) -> bool {
        if key < 1 {
            return false;
        }
        let idx = (key - 1) as usize;
        let len = self.array.len();
        if idx < len {
            self.array[idx] = value.clone();
            true
        } else if idx == len {
            if value.is_nil() {
                // removing a key that was never in the array
                return !self.hash.contains_key(&TableKey::Integer(key));
            }
            self.array.push(value.clone());
            self.migrate_tail_from_hash();
            true
        } else {
            false
        }
    }

    /// After an append, pull any now-contiguous integer keys out of the
    /// hash part so the array part stays dense.
    fn migrate_tail_from_hash(&mut self) {
        loop {
            let next = self.array.len() as i64 + 1;
            match self.hash.remove(&TableKey::Integer(next)) {
                Some(slot) => match slot.get() {
                    Some(v) => self.array.push(v),
                    None => break,
                },
                None => break,
            }
        }
    }

    fn set_in_hash(&mut self, key: TableKey, value: LuaValue) {
        if value.is_nil() {
            self.hash.remove(&key);
            return;
        }
        let key = match (self.weak, key) {
            (Some(mode), TableKey::Obj(o)) if mode.weak_keys() => TableKey::Obj(o.into_weak()),
            (_, k) => k,
        };
        let slot = match (self.weak, value.downgrade()) {
            (Some(mode), Some(w)) if mode.weak_values() => TableSlot::Weak(w),
            _ => TableSlot::Strong(value),
        };
        self.hash.insert(key, slot);
    }

    /// Drop every entry whose weak side has died.
    pub fn prune(&mut self) {
        if self.weak.is_none() {
            return;
        }
        self.hash.retain(|k, v| k.is_live() && v.is_live());
    }

    // ============ Length ============

    /// The `#` operator's raw result: a border (an index n with t[n]
    /// non-nil and t[n+1] nil). Follows the reference boundary search:
    /// binary search over the array part, hash continuation when the
    /// array part is full.
    pub fn length(&self) -> i64 {
        let asize = self.array.len();
        if asize > 0 && self.array[asize - 1].is_nil() {
            // border lies inside the array part
            let mut i = 0usize;
            let mut j = asize;
            while j - i > 1 {
                let m = (i + j) / 2;
                if self.array[m - 1].is_nil() {
                    j = m;
                } else {
                    i = m;
                }
            }
            return i as i64;
        }
        let n = asize as i64;
        if !self.hash_has_int(n + 1) {
            return n;
        }
        self.hash_boundary_search(n + 1)
    }

    fn hash_has_int(&self, key: i64) -> bool {
        self.hash
            .get(&TableKey::Integer(key))
            .is_some_and(TableSlot::is_live)
    }

    /// t[start] is present in the hash part; widen exponentially to find
    /// an absent index, then binary search between them.
    fn hash_boundary_search(&self, start: i64) -> i64 {
        let mut i = start;
        let mut j = start;
        loop {
            if j > i64::MAX / 2 {
                // pathological table: fall back to a linear scan
                let mut l = i;
                while self.hash_has_int(l + 1) {
                    l += 1;
                }
                return l;
            }
            j *= 2;
            if !self.hash_has_int(j) {
                break;
            }
            i = j;
        }
        while j - i > 1 {
            let m = i + (j - i) / 2;
            if self.hash_has_int(m) {
                i = m;
            } else {
                j = m;
            }
        }
        i
    }

    // ============ Iteration ============

    /// Stateless iteration step: nil starts, each call returns the next
    /// live (key, value) pair, None at the end. Array part first in
    /// index order, then the hash part in its (mutation-stable) order.
    pub fn next(&self, key: &LuaValue) -> LuaResult<Option<(LuaValue, LuaValue)>> {
        if key.is_nil() {
            if let Some(found) = self.first_array_entry(0) {
                return Ok(Some(found));
            }
            return Ok(self.first_hash_entry());
        }

        if self.weak.is_none() {
            if let Some(i) = key.as_integer() {
                if i >= 1 && (i as u64) <= self.array.len() as u64 {
                    if let Some(found) = self.first_array_entry(i as usize) {
                        return Ok(Some(found));
                    }
                    return Ok(self.first_hash_entry());
                }
            }
        }

        let target = lookup_key(key)
            .ok_or_else(|| LuaError::Argument("invalid key to 'next'".to_string()))?;
        let mut iter = self.hash.iter();
        for (k, _) in iter.by_ref() {
            if *k == target {
                break;
            }
        }
        for (k, slot) in iter {
            if let (Some(kv), Some(vv)) = (k.to_value(), slot.get()) {
                return Ok(Some((kv, vv)));
            }
        }
        Ok(None)
    }

    fn first_array_entry(&self, from: usize) -> Option<(LuaValue, LuaValue)> {
        for (i, val) in self.array.iter().enumerate().skip(from) {
            if !val.is_nil() {
                return Some((LuaValue::Integer((i + 1) as i64), val.clone()));
            }
        }
        None
    }

    fn first_hash_entry(&self) -> Option<(LuaValue, LuaValue)> {
        for (k, slot) in self.hash.iter() {
            if let (Some(kv), Some(vv)) = (k.to_value(), slot.get()) {
                return Some((kv, vv));
            }
        }
        None
    }

    /// Every live (key, value) pair, array part first.
    pub fn iter_all(&self) -> Vec<(LuaValue, LuaValue)> {
        let mut result = Vec::new();
        for (i, val) in self.array.iter().enumerate() {
            if !val.is_nil() {
                result.push((LuaValue::Integer((i + 1) as i64), val.clone()));
            }
        }
        for (k, slot) in self.hash.iter() {
            if let (Some(kv), Some(vv)) = (k.to_value(), slot.get()) {
                result.push((kv, vv));
            }
        }
        result
    }

    /// Number of live entries (for tests and diagnostics; not the `#`
    /// operator).
    pub fn entry_count(&self) -> usize {
        self.array.iter().filter(|v| !v.is_nil()).count()
            + self
                .hash
                .iter()
                .filter(|(k, v)| k.is_live() && v.is_live())
                .count()
    }
}

impl Default for LuaTable {
    fn default() -> Self {
        LuaTable::new()
    }
}

impl ObjKey {
    fn into_weak(self) -> ObjKey {
        match self.handle {
            ObjHandle::Strong(v) => match v.downgrade() {
                Some(w) => ObjKey {
                    addr: self.addr,
                    handle: ObjHandle::Weak(w),
                },
                None => ObjKey {
                    addr: self.addr,
                    handle: ObjHandle::Strong(v),
                },
            },
            other => ObjKey {
                addr: self.addr,
                handle: other,
            },
        }
    }
}

/// Normalized key for a lookup: integral floats collapse to integers,
/// nil and NaN give None.
fn lookup_key(key: &LuaValue) -> Option<TableKey> {
    match key {
        LuaValue::Nil => None,
        LuaValue::Integer(i) => Some(TableKey::Integer(*i)),
        LuaValue::Float(f) => {
            if f.is_nan() {
                None
            } else if let Some(i) = crate::lua_value::lua_convert::float_to_exact_integer(*f) {
                Some(TableKey::Integer(i))
            } else {
                Some(TableKey::Float(f.to_bits()))
            }
        }
        LuaValue::Boolean(b) => Some(TableKey::Boolean(*b)),
        LuaValue::String(s) => Some(TableKey::Str(s.clone())),
        LuaValue::LightUserdata(p) => Some(TableKey::Obj(ObjKey {
            addr: p.addr(),
            handle: ObjHandle::Light(*p),
        })),
        other => other.handle_addr().map(|addr| {
            TableKey::Obj(ObjKey {
                addr,
                handle: ObjHandle::Strong(other.clone()),
            })
        }),
    }
}

/// Front-loads the error cases and the float collapse for an insertion:
/// nil and NaN keys are errors, integral floats become integers.
fn normalize_key(key: LuaValue) -> LuaResult<LuaValue> {
    match key {
        LuaValue::Nil => Err(LuaError::TableKey("table index is nil".to_string())),
        LuaValue::Float(f) => {
            if f.is_nan() {
                Err(LuaError::TableKey("table index is NaN".to_string()))
            } else if let Some(i) = crate::lua_value::lua_convert::float_to_exact_integer(f) {
                Ok(LuaValue::Integer(i))
            } else {
                Ok(LuaValue::Float(f))
            }
        }
        other => Ok(other),
    }
}

// ============ Shared handle ============

#[derive(Clone)]
pub struct LuaTableRef(Arc<Mutex<LuaTable>>);

impl LuaTableRef {
    pub fn new(table: LuaTable) -> Self {
        LuaTableRef(Arc::new(Mutex::new(table)))
    }

    pub(crate) fn from_arc(arc: Arc<Mutex<LuaTable>>) -> Self {
        LuaTableRef(arc)
    }

    /// Lock the table. Poisoning is recovered: the runtime is logically
    /// single-threaded, a poisoned lock only means a test body panicked.
    pub fn lock(&self) -> MutexGuard<'_, LuaTable> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    pub fn ptr_eq(&self, other: &LuaTableRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    #[inline]
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub(crate) fn downgrade(&self) -> Weak<Mutex<LuaTable>> {
        Arc::downgrade(&self.0)
    }

    /// Install a metatable and apply its __mode. Reads the mode before
    /// taking the target's lock so a table may be its own metatable.
    pub fn set_metatable(&self, mt: Option<LuaTableRef>) {
        let mode = match &mt {
            None => None,
            Some(m) if m.ptr_eq(self) => self.lock().read_weak_mode(),
            Some(m) => m.lock().read_weak_mode(),
        };
        let mut t = self.lock();
        t.set_metatable_handle(mt);
        t.apply_weak_mode(mode);
    }

    pub fn metatable(&self) -> Option<LuaTableRef> {
        self.lock().get_metatable()
    }

    // Conveniences that take the lock internally

    pub fn raw_get(&self, key: &LuaValue) -> LuaValue {
        self.lock().raw_get(key)
    }

    pub fn raw_set(&self, key: LuaValue, value: LuaValue) -> LuaResult<()> {
        self.lock().raw_set(key, value)
    }

    pub fn length(&self) -> i64 {
        self.lock().length()
    }

    pub fn next(&self, key: &LuaValue) -> LuaResult<Option<(LuaValue, LuaValue)>> {
        self.lock().next(key)
    }
}

impl Default for LuaTableRef {
    fn default() -> Self {
        LuaTableRef::new(LuaTable::new())
    }
}

impl std::fmt::Debug for LuaTableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "table: {:#014x}", self.addr())
    }
}
