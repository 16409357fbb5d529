// Lua 5.4 core runtime
// Value representation, tables with metatables and weak modes,
// metamethod dispatch, operation semantics, string<->number conversion,
// the Lua pattern engine, stackful coroutines, and scoped variables
// with const/close attributes.
//
// The lexer/parser, the executor that walks code and calls into these
// operations, and the outer standard library are external to this
// crate; they consume the surface re-exported below.

#[cfg(test)]
mod test;

pub mod lua_coroutine;
pub mod lua_pattern;
pub mod lua_value;
pub mod lua_vm;

pub use lua_value::{
    CoroutineStatus, FunctionBody, LightUserdata, LuaFunction, LuaFunctionRef, LuaString,
    LuaTable, LuaTableRef, LuaThread, LuaThreadRef, LuaUserdata, LuaUserdataRef, LuaValue,
    LuaValueKind, WeakMode,
};
pub use lua_value::lua_convert;
pub use lua_vm::{
    LuaEnv, LuaError, LuaResult, LuaVariable, LuaVariableRef, MetaMethod, VarAttribute, lua_ops,
};
