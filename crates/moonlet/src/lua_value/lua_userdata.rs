// Full userdata - arbitrary host data with an optional metatable
//
// The payload is opaque to the runtime; only the host that created it
// can downcast it back. Light userdata (a bare pointer) lives in
// lua_value.rs and carries no metatable.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::lua_value::LuaTableRef;

pub struct LuaUserdata {
    data: Box<dyn Any + Send>,
    metatable: Option<LuaTableRef>,
}

impl LuaUserdata {
    pub fn new<T: Any + Send>(data: T) -> Self {
        LuaUserdata {
            data: Box::new(data),
            metatable: None,
        }
    }

    pub fn with_metatable<T: Any + Send>(data: T, metatable: LuaTableRef) -> Self {
        LuaUserdata {
            data: Box::new(data),
            metatable: Some(metatable),
        }
    }

    pub fn get_metatable(&self) -> Option<LuaTableRef> {
        self.metatable.clone()
    }

    pub fn set_metatable(&mut self, metatable: Option<LuaTableRef>) {
        self.metatable = metatable;
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.data.downcast_mut::<T>()
    }
}

impl std::fmt::Debug for LuaUserdata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "userdata")
    }
}

#[derive(Clone)]
pub struct LuaUserdataRef(Arc<Mutex<LuaUserdata>>);

impl LuaUserdataRef {
    pub fn new(data: LuaUserdata) -> Self {
        LuaUserdataRef(Arc::new(Mutex::new(data)))
    }

    pub(crate) fn from_arc(arc: Arc<Mutex<LuaUserdata>>) -> Self {
        LuaUserdataRef(arc)
    }

    pub fn lock(&self) -> MutexGuard<'_, LuaUserdata> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    pub fn ptr_eq(&self, other: &LuaUserdataRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    #[inline]
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub(crate) fn downgrade(&self) -> Weak<Mutex<LuaUserdata>> {
        Arc::downgrade(&self.0)
    }
}

impl std::fmt::Debug for LuaUserdataRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "userdata: {:#014x}", self.addr())
    }
}
