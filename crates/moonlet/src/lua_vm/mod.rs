// Operation semantics: errors, metamethod dispatch, the operation entry
// points, and scoped variables.

mod lua_env;
mod lua_error;
pub mod lua_ops;
pub mod metamethod;

pub use lua_env::{LuaEnv, LuaVariable, LuaVariableRef, VarAttribute};
pub(crate) use lua_env::close_variable;
pub use lua_error::{LuaError, LuaResult};
pub use metamethod::{
    MetaMethod, get_binop_metamethod, get_eq_metamethod, get_metamethod, get_metatable,
};
