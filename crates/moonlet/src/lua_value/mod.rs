// Value representation: the tagged value itself plus the shared-handle
// containers it points at (strings, tables, functions, userdata,
// threads) and the string<->number conversion rules.

pub mod lua_convert;
mod lua_function;
mod lua_string;
mod lua_table;
mod lua_thread;
mod lua_userdata;
mod lua_value;

pub use lua_function::{BuiltinFn, FunctionBody, LuaFunction, LuaFunctionRef};
pub use lua_string::LuaString;
pub use lua_table::{LuaTable, LuaTableRef, WeakMode};
pub use lua_thread::{CoroutineStatus, LuaThread, LuaThreadRef};
pub(crate) use lua_thread::{ResumeSignal, YieldSignal};
pub use lua_userdata::{LuaUserdata, LuaUserdataRef};
pub use lua_value::{LightUserdata, LuaValue, LuaValueKind, WeakValue};
